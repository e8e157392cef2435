use shared::{
    GameConfig, ANNOUNCE_INTERVAL_MS, DEFAULT_BASE_PORT, MULTICAST_GROUP_IP, MULTICAST_PORT,
    NODE_TIMEOUT_MS, PORT_ATTEMPTS, RETRY_ATTEMPTS, RETRY_INTERVAL_MS,
    ROSTER_PUBLISH_INTERVAL_MS,
};
use std::net::SocketAddrV4;
use std::time::Duration;

/// Retransmission policy for Join and RoleChange messages.
///
/// `attempts` counts retransmissions after the first send; zero disables
/// retrying entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: RETRY_ATTEMPTS,
            interval: Duration::from_millis(RETRY_INTERVAL_MS),
        }
    }
}

/// Process-wide settings for one node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// First unicast port tried at startup
    pub base_port: u16,
    /// How many consecutive ports are tried before giving up
    pub port_attempts: u16,
    pub multicast_group: SocketAddrV4,
    /// Join the multicast group to announce and discover games. Without it
    /// the node is reachable only by direct unicast joins.
    pub multicast_discovery: bool,
    pub announce_interval: Duration,
    /// Silence after which a peer is removed by the liveness sweep
    pub node_timeout: Duration,
    pub roster_publish_interval: Duration,
    /// Game settings used when this node creates a game; also supplies the
    /// ping and state delays until a snapshot arrives.
    pub game: GameConfig,
    pub retry: RetryPolicy,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            base_port: DEFAULT_BASE_PORT,
            port_attempts: PORT_ATTEMPTS,
            multicast_group: SocketAddrV4::new(MULTICAST_GROUP_IP, MULTICAST_PORT),
            multicast_discovery: true,
            announce_interval: Duration::from_millis(ANNOUNCE_INTERVAL_MS),
            node_timeout: Duration::from_millis(NODE_TIMEOUT_MS),
            roster_publish_interval: Duration::from_millis(ROSTER_PUBLISH_INTERVAL_MS),
            game: GameConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}
