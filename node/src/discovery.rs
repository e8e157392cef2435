//! Available games: what the multicast group has announced recently.

use crate::multicast::DiscoveryTransport;
use crate::transport::Datagram;
use log::debug;
use shared::{
    GameConfig, GameMessage, MessageBody, NodeRole, Player, Signature, RECENT_GAMES_CAPACITY,
    VISIBLE_GAMES_CAPACITY, VISIBLE_GAMES_TTL_MS,
};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

/// One announced game, addressed at its master's unicast port.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredGame {
    pub ip: String,
    pub port: u16,
    pub can_join: bool,
    pub config: GameConfig,
    pub players: Vec<Player>,
    pub received_at: Instant,
}

impl DiscoveredGame {
    pub fn signature(&self) -> Signature {
        Signature::new(self.ip.clone(), self.port)
    }

    /// Where to send a Join for this game.
    pub fn address(&self) -> Option<SocketAddr> {
        self.signature().to_socket_addr()
    }
}

/// Port of the announcing game's master: the first roster entry with role
/// MASTER and a declared port, else the port the announcement came from.
pub fn resolve_master_port(players: &[Player], sender_port: u16) -> u16 {
    players
        .iter()
        .find(|player| player.role == NodeRole::Master && player.port != 0)
        .map(|player| player.port)
        .unwrap_or(sender_port)
}

/// A small ring of the latest announcements plus a larger, time-bounded
/// cache of every distinct game currently visible.
#[derive(Debug)]
pub struct DiscoveryCache {
    recent: VecDeque<DiscoveredGame>,
    recent_capacity: usize,
    visible: HashMap<Signature, DiscoveredGame>,
    visible_capacity: usize,
    ttl: Duration,
}

impl Default for DiscoveryCache {
    fn default() -> Self {
        Self::new(
            RECENT_GAMES_CAPACITY,
            VISIBLE_GAMES_CAPACITY,
            Duration::from_millis(VISIBLE_GAMES_TTL_MS),
        )
    }
}

impl DiscoveryCache {
    pub fn new(recent_capacity: usize, visible_capacity: usize, ttl: Duration) -> Self {
        Self {
            recent: VecDeque::with_capacity(recent_capacity),
            recent_capacity,
            visible: HashMap::new(),
            visible_capacity,
            ttl,
        }
    }

    /// Records the datagram if it carries an announcement.
    pub fn record(&mut self, datagram: &Datagram, now: Instant) -> Option<DiscoveredGame> {
        let MessageBody::Announcement {
            can_join,
            config,
            players,
        } = &datagram.message.body
        else {
            return None;
        };

        let game = DiscoveredGame {
            ip: datagram.from.ip().to_string(),
            port: resolve_master_port(players, datagram.from.port()),
            can_join: *can_join,
            config: *config,
            players: players.clone(),
            received_at: now,
        };
        self.insert(game.clone(), now);
        Some(game)
    }

    pub fn insert(&mut self, game: DiscoveredGame, now: Instant) {
        if self.recent_capacity > 0 {
            if self.recent.len() == self.recent_capacity {
                self.recent.pop_front();
            }
            self.recent.push_back(game.clone());
        }

        let key = game.signature();
        if !self.visible.contains_key(&key) && self.visible.len() >= self.visible_capacity {
            self.purge_expired(now);
            if self.visible.len() >= self.visible_capacity {
                let oldest = self
                    .visible
                    .iter()
                    .min_by_key(|(_, game)| game.received_at)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    self.visible.remove(&oldest);
                }
            }
        }
        if self.visible_capacity > 0 {
            self.visible.insert(key, game);
        }
    }

    fn is_fresh(&self, game: &DiscoveredGame, now: Instant) -> bool {
        now.saturating_duration_since(game.received_at) <= self.ttl
    }

    fn purge_expired(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.visible
            .retain(|_, game| now.saturating_duration_since(game.received_at) <= ttl);
    }

    /// The latest announcements, oldest first.
    pub fn recent(&self) -> Vec<DiscoveredGame> {
        self.recent.iter().cloned().collect()
    }

    /// Every distinct game announced within the TTL.
    pub fn visible(&self, now: Instant) -> Vec<DiscoveredGame> {
        let mut games: Vec<DiscoveredGame> = self
            .visible
            .values()
            .filter(|game| self.is_fresh(game, now))
            .cloned()
            .collect();
        games.sort_by(|a, b| (&a.ip, a.port).cmp(&(&b.ip, b.port)));
        games
    }
}

/// Listens on the discovery transport and keeps the [`DiscoveryCache`]
/// current. Also announces this node's game when asked to.
pub struct AvailableGames {
    transport: Arc<DiscoveryTransport>,
    cache: Arc<RwLock<DiscoveryCache>>,
    discovered: broadcast::Sender<DiscoveredGame>,
}

impl AvailableGames {
    pub fn spawn(transport: Arc<DiscoveryTransport>) -> (Self, JoinHandle<()>) {
        let cache = Arc::new(RwLock::new(DiscoveryCache::default()));
        let (discovered, _) = broadcast::channel(64);

        let task = {
            let transport = Arc::clone(&transport);
            let cache = Arc::clone(&cache);
            let discovered = discovered.clone();
            tokio::spawn(async move {
                while let Some(datagram) = transport.receive().await {
                    let game = cache.write().await.record(&datagram, Instant::now());
                    match game {
                        Some(game) => {
                            let _ = discovered.send(game);
                        }
                        None => debug!(
                            "Ignoring {} on the discovery group from {}",
                            datagram.message.kind(),
                            datagram.from
                        ),
                    }
                }
                debug!("Discovery listener stopped");
            })
        };

        (
            Self {
                transport,
                cache,
                discovered,
            },
            task,
        )
    }

    pub fn announce(&self, can_join: bool, config: GameConfig, players: Vec<Player>) {
        self.transport.send(GameMessage::new(MessageBody::Announcement {
            can_join,
            config,
            players,
        }));
    }

    pub async fn recent_five(&self) -> Vec<DiscoveredGame> {
        self.cache.read().await.recent()
    }

    pub async fn all_visible(&self) -> Vec<DiscoveredGame> {
        self.cache.read().await.visible(Instant::now())
    }

    /// Every announcement as it is recorded.
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveredGame> {
        self.discovered.subscribe()
    }
}
