//! Discovery transport over the shared multicast group, plus the network
//! interface selection it needs at startup.

use crate::error::{NodeError, NodeResult};
use crate::transport::{Datagram, Transport};
use log::{debug, info, warn};
use pnet::datalink;
use pnet::ipnetwork::IpNetwork;
use shared::GameMessage;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

/// What interface selection needs to know about one network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub up: bool,
    pub multicast: bool,
    pub ipv4: Vec<Ipv4Addr>,
}

impl InterfaceInfo {
    fn usable(&self) -> bool {
        self.up && self.multicast && !self.ipv4.is_empty()
    }
}

/// Picks the local address to join the group on: the interface carrying the
/// host's default address if it qualifies, otherwise the first interface
/// that is up and multicast-capable.
pub fn choose_interface(
    interfaces: &[InterfaceInfo],
    default_address: Option<Ipv4Addr>,
) -> Option<Ipv4Addr> {
    if let Some(default_address) = default_address {
        let owner = interfaces
            .iter()
            .find(|iface| iface.ipv4.contains(&default_address));
        if let Some(owner) = owner {
            if owner.usable() {
                return Some(default_address);
            }
            debug!(
                "Default interface {} cannot be used for multicast",
                owner.name
            );
        }
    }

    interfaces
        .iter()
        .find(|iface| iface.usable())
        .and_then(|iface| iface.ipv4.first().copied())
}

fn local_interfaces() -> Vec<InterfaceInfo> {
    datalink::interfaces()
        .into_iter()
        .map(|iface| InterfaceInfo {
            up: iface.is_up(),
            multicast: iface.is_multicast(),
            ipv4: iface
                .ips
                .iter()
                .filter_map(|network| match network {
                    IpNetwork::V4(v4) => Some(v4.ip()),
                    IpNetwork::V6(_) => None,
                })
                .collect(),
            name: iface.name,
        })
        .collect()
}

/// Resolves the host name to its first IPv4 address.
async fn default_host_address() -> Option<Ipv4Addr> {
    let hostname = match hostname::get() {
        Ok(name) => name.to_string_lossy().to_string(),
        Err(e) => {
            warn!("Failed to get hostname: {}", e);
            return None;
        }
    };

    match tokio::net::lookup_host(format!("{}:0", hostname)).await {
        Ok(addrs) => addrs
            .filter_map(|addr| match addr.ip() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .next(),
        Err(e) => {
            warn!("Failed to resolve hostname {}: {}", hostname, e);
            None
        }
    }
}

fn group_socket(group: SocketAddrV4, interface: Ipv4Addr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, group.port())).into())?;
    socket.join_multicast_v4(group.ip(), &interface)?;
    UdpSocket::from_std(socket.into())
}

fn announce_socket(interface: Ipv4Addr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_multicast_if_v4(&interface)?;
    socket.set_multicast_ttl_v4(1)?;
    socket.set_multicast_loop_v4(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)).into())?;
    UdpSocket::from_std(socket.into())
}

/// Sends to and listens on one multicast group.
pub struct DiscoveryTransport {
    group: SocketAddrV4,
    inner: Transport,
}

impl DiscoveryTransport {
    pub async fn open(group: SocketAddrV4, cancel: CancellationToken) -> NodeResult<Self> {
        let default_address = default_host_address().await;
        let interface = choose_interface(&local_interfaces(), default_address)
            .ok_or(NodeError::NoMulticastInterface)?;
        info!("Joining multicast group {} on {}", group, interface);

        let recv_socket = Arc::new(group_socket(group, interface)?);
        let send_socket = Arc::new(announce_socket(interface)?);
        let inner = Transport::spawn("discovery", recv_socket, send_socket, cancel)?;

        Ok(Self { group, inner })
    }

    pub fn group(&self) -> SocketAddrV4 {
        self.group
    }

    /// Queues a message for the whole group.
    pub fn send(&self, message: GameMessage) {
        self.inner.send_to(message, SocketAddr::V4(self.group));
    }

    pub async fn receive(&self) -> Option<Datagram> {
        self.inner.receive().await
    }

    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}
