//! Datagram transports.
//!
//! A transport owns two tasks: a sender draining an unbounded outbound queue
//! onto the socket, and a receiver decoding datagrams from the socket into an
//! unbounded inbound queue. Callers only ever touch the queues, so `send_to`
//! never blocks and `receive` waits on the queue rather than the socket.

use crate::error::{NodeError, NodeResult};
use log::{debug, error, info, warn};
use shared::{GameMessage, MAX_DATAGRAM_SIZE};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A decoded inbound message together with the address it came from.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub message: GameMessage,
    pub from: SocketAddr,
}

#[derive(Debug)]
struct Outgoing {
    message: GameMessage,
    to: SocketAddr,
}

pub struct Transport {
    name: &'static str,
    local_addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Outgoing>,
    inbound: Mutex<mpsc::UnboundedReceiver<Datagram>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Transport {
    /// Starts the send and receive loops. `recv_socket` and `send_socket` may
    /// be the same socket.
    pub fn spawn(
        name: &'static str,
        recv_socket: Arc<UdpSocket>,
        send_socket: Arc<UdpSocket>,
        cancel: CancellationToken,
    ) -> NodeResult<Self> {
        let local_addr = recv_socket.local_addr()?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let receiver = tokio::spawn(receive_loop(
            name,
            recv_socket,
            inbound_tx,
            cancel.clone(),
        ));
        let sender = tokio::spawn(send_loop(name, send_socket, outbound_rx, cancel.clone()));

        Ok(Self {
            name,
            local_addr,
            outbound: outbound_tx,
            inbound: Mutex::new(inbound_rx),
            cancel,
            tasks: Mutex::new(vec![receiver, sender]),
        })
    }

    /// Binds the first free port in `base..base + attempts` on all
    /// interfaces and starts a point-to-point transport on it.
    pub async fn bind_unicast(
        base: u16,
        attempts: u16,
        cancel: CancellationToken,
    ) -> NodeResult<Self> {
        for offset in 0..attempts {
            let Some(port) = base.checked_add(offset) else {
                break;
            };
            match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await {
                Ok(socket) => {
                    info!("Unicast transport listening on port {}", port);
                    let socket = Arc::new(socket);
                    return Self::spawn("unicast", Arc::clone(&socket), socket, cancel);
                }
                Err(e) if e.kind() == ErrorKind::AddrInUse => {
                    debug!("Port {} is taken, trying the next one", port);
                }
                Err(e) => return Err(NodeError::Io(e)),
            }
        }
        Err(NodeError::NoFreePort { base, attempts })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queues a message for asynchronous delivery.
    pub fn send_to(&self, message: GameMessage, to: SocketAddr) {
        if let Err(e) = self.outbound.send(Outgoing { message, to }) {
            debug!("{} transport stopped, dropping {}", self.name, e.0.message.kind());
        }
    }

    /// Waits for the next inbound datagram. Returns `None` once the transport
    /// has been stopped.
    pub async fn receive(&self) -> Option<Datagram> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            datagram = inbound.recv() => datagram,
        }
    }

    /// Cancels both loops and waits for them to exit, closing the sockets.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                error!("{} transport task panicked: {}", self.name, e);
            }
        }
    }
}

async fn receive_loop(
    name: &'static str,
    socket: Arc<UdpSocket>,
    inbound: mpsc::UnboundedSender<Datagram>,
    cancel: CancellationToken,
) {
    let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buffer) => received,
        };

        match received {
            Ok((len, from)) => match GameMessage::decode(&buffer[..len]) {
                Ok(message) => {
                    if inbound.send(Datagram { message, from }).is_err() {
                        break;
                    }
                }
                Err(_) => debug!("{}: dropping undecodable datagram from {}", name, from),
            },
            Err(e) => {
                warn!("{}: error receiving datagram: {}", name, e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }

    debug!("{} receive loop stopped", name);
}

async fn send_loop(
    name: &'static str,
    socket: Arc<UdpSocket>,
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
    cancel: CancellationToken,
) {
    loop {
        let outgoing = tokio::select! {
            _ = cancel.cancelled() => break,
            next = outbound.recv() => match next {
                Some(outgoing) => outgoing,
                None => break,
            },
        };

        let data = match outgoing.message.encode() {
            Ok(data) => data,
            Err(e) => {
                error!("{}: failed to encode {}: {}", name, outgoing.message.kind(), e);
                continue;
            }
        };

        if let Err(e) = socket.send_to(&data, outgoing.to).await {
            debug!("{}: failed to send to {}: {}", name, outgoing.to, e);
        }
    }

    debug!("{} send loop stopped", name);
}
