use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

pub const MULTICAST_GROUP_IP: Ipv4Addr = Ipv4Addr::new(239, 192, 0, 4);
pub const MULTICAST_PORT: u16 = 9192;

pub const DEFAULT_BASE_PORT: u16 = 5000;
pub const PORT_ATTEMPTS: u16 = 10;

pub const ANNOUNCE_INTERVAL_MS: u64 = 1000;
pub const NODE_TIMEOUT_MS: u64 = 800;
pub const ROSTER_PUBLISH_INTERVAL_MS: u64 = 500;

pub const DEFAULT_STATE_DELAY_MS: u64 = 100;
pub const DEFAULT_PING_DELAY_MS: u64 = 100;

pub const RETRY_ATTEMPTS: u32 = 3;
pub const RETRY_INTERVAL_MS: u64 = 200;

pub const RECENT_GAMES_CAPACITY: usize = 5;
pub const VISIBLE_GAMES_CAPACITY: usize = 10_000;
pub const VISIBLE_GAMES_TTL_MS: u64 = 1000;

pub const MAX_DATAGRAM_SIZE: usize = 65_000;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Master,
    Deputy,
    Normal,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeRole::Master => "MASTER",
            NodeRole::Deputy => "DEPUTY",
            NodeRole::Normal => "NORMAL",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// Network identity of a player: the address its datagrams come from.
///
/// The local player's own signature carries an empty `ip`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub ip: String,
    pub port: u16,
}

impl Signature {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    /// Resolves the signature to a socket address. An empty ip means "this
    /// host" and resolves to loopback.
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        if self.ip.is_empty() {
            return Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), self.port));
        }
        self.ip
            .parse::<IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl From<SocketAddr> for Signature {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ip.is_empty() {
            write!(f, "<self>:{}", self.port)
        } else {
            write!(f, "{}:{}", self.ip, self.port)
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: u32,
    pub name: String,
    pub ip_address: String,
    pub port: u16,
    pub role: NodeRole,
    pub score: u32,
}

impl Player {
    pub fn new(id: u32, name: impl Into<String>, signature: Signature, role: NodeRole) -> Self {
        Self {
            id,
            name: name.into(),
            ip_address: signature.ip,
            port: signature.port,
            role,
            score: 0,
        }
    }

    pub fn signature(&self) -> Signature {
        Signature::new(self.ip_address.clone(), self.port)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct GameConfig {
    pub width: u32,
    pub height: u32,
    pub food_static: u32,
    pub food_per_player: u32,
    pub state_delay_ms: u64,
    pub ping_delay_ms: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            width: 40,
            height: 30,
            food_static: 1,
            food_per_player: 1,
            state_delay_ms: DEFAULT_STATE_DELAY_MS,
            ping_delay_ms: DEFAULT_PING_DELAY_MS,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum SnakeState {
    Alive,
    Zombie,
}

/// Simulation-owned body of one snake. The node protocol carries it
/// without looking inside.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Snake {
    pub player_id: u32,
    pub points: Vec<Coord>,
    pub state: SnakeState,
    pub head_direction: Direction,
}

/// One authoritative world snapshot issued by the master.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GameState {
    pub state_order: u32,
    pub config: GameConfig,
    pub players: Vec<Player>,
    pub snakes: Vec<Snake>,
    pub foods: Vec<Coord>,
}

impl GameState {
    pub fn new(config: GameConfig) -> Self {
        Self {
            state_order: 0,
            config,
            players: Vec::new(),
            snakes: Vec::new(),
            foods: Vec::new(),
        }
    }

    pub fn master(&self) -> Option<&Player> {
        self.players.iter().find(|p| p.role == NodeRole::Master)
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new(GameConfig::default())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Ping,
    Ack,
    Join {
        name: String,
        view_only: bool,
    },
    Steer {
        direction: Direction,
    },
    RoleChange {
        sender_role: Option<NodeRole>,
        receiver_role: Option<NodeRole>,
    },
    State {
        state: GameState,
    },
    Announcement {
        can_join: bool,
        config: GameConfig,
        players: Vec<Player>,
    },
}

/// Envelope for every datagram exchanged between nodes.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GameMessage {
    pub msg_seq: u64,
    pub sender_id: Option<u32>,
    pub receiver_id: Option<u32>,
    pub body: MessageBody,
}

impl GameMessage {
    pub fn new(body: MessageBody) -> Self {
        Self {
            msg_seq: 0,
            sender_id: None,
            receiver_id: None,
            body,
        }
    }

    pub fn with_seq(mut self, msg_seq: u64) -> Self {
        self.msg_seq = msg_seq;
        self
    }

    pub fn from_player(mut self, sender_id: Option<u32>) -> Self {
        self.sender_id = sender_id;
        self
    }

    pub fn to_player(mut self, receiver_id: Option<u32>) -> Self {
        self.receiver_id = receiver_id;
        self
    }

    /// Messages that change membership or roles and are not superseded by
    /// the next periodic message.
    pub fn is_reliable(&self) -> bool {
        matches!(
            self.body,
            MessageBody::Join { .. } | MessageBody::RoleChange { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self.body {
            MessageBody::Ping => "Ping",
            MessageBody::Ack => "Ack",
            MessageBody::Join { .. } => "Join",
            MessageBody::Steer { .. } => "Steer",
            MessageBody::RoleChange { .. } => "RoleChange",
            MessageBody::State { .. } => "State",
            MessageBody::Announcement { .. } => "Announcement",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
