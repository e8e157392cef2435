//! The node controller: owns the local role and drives every periodic cycle.
//!
//! [`Node::start`] binds both transports, starts the registry actor and the
//! discovery listener, then spawns the controller loops:
//!
//! - announce: MASTER only, advertises the game on the multicast group
//! - ping: keeps `last_seen` fresh on the other side
//! - unicast listener: feeds every inbound message through [`protocol::interpret`]
//! - multicast listener: republishes discovered games to observers
//! - state: MASTER only, advances the simulation and sends State to everyone
//! - failover: reacts to players removed by the liveness sweep
//! - retry: retransmits unacknowledged Join and RoleChange messages
//!
//! All of them stop on one cancellation token and are awaited by [`Node::stop`].

use crate::config::NodeConfig;
use crate::discovery::{AvailableGames, DiscoveredGame};
use crate::error::{NodeError, NodeResult};
use crate::multicast::DiscoveryTransport;
use crate::outbox::Outbox;
use crate::protocol::{self, Effect, NodeView, Outcome};
use crate::registry::{RegistryHandle, RegistrySettings};
use crate::simulation::{ControlEvent, Simulation};
use crate::transport::{Datagram, Transport};
use log::{debug, error, info, warn};
use shared::{Direction, GameMessage, GameState, MessageBody, NodeRole, Player, Signature};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Role-dependent state, guarded by the role lock.
struct NodeCore {
    role: NodeRole,
    self_id: Option<u32>,
    state: GameState,
    controls: Vec<ControlEvent>,
    simulation: Box<dyn Simulation>,
}

impl NodeCore {
    fn view<'a>(&self, players: &'a [Player], fresh_id: Option<u32>) -> NodeView<'a> {
        NodeView {
            role: self.role,
            self_id: self.self_id,
            players,
            fresh_id,
        }
    }
}

struct Events {
    messages: broadcast::Sender<Datagram>,
    roles: broadcast::Sender<NodeRole>,
    controls: broadcast::Sender<ControlEvent>,
    discovered: broadcast::Sender<DiscoveredGame>,
}

impl Events {
    fn new() -> Self {
        Self {
            messages: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            roles: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            controls: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            discovered: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
        }
    }
}

struct Shared {
    name: String,
    config: NodeConfig,
    core: Mutex<NodeCore>,
    registry: RegistryHandle,
    unicast: Transport,
    /// Absent when multicast discovery is switched off
    discovery: Option<Arc<DiscoveryTransport>>,
    games: Option<AvailableGames>,
    outbox: Mutex<Outbox>,
    next_seq: AtomicU64,
    events: Events,
}

impl Shared {
    fn port(&self) -> u16 {
        self.unicast.local_addr().port()
    }

    /// Sends with a fresh sequence number, tracking Join and RoleChange for
    /// retransmission.
    async fn dispatch(&self, message: GameMessage, to: SocketAddr) {
        let message = message.with_seq(self.next_seq.fetch_add(1, Ordering::Relaxed));
        if message.is_reliable() {
            self.outbox
                .lock()
                .await
                .track(message.clone(), to, Instant::now());
        }
        self.unicast.send_to(message, to);
    }

    async fn dispatch_to(&self, message: GameMessage, to: &Signature) {
        match to.to_socket_addr() {
            Some(addr) => self.dispatch(message, addr).await,
            None => warn!("Cannot resolve {}, dropping {}", to, message.kind()),
        }
    }

    fn reply_to(&self, message: GameMessage, to: &Signature) {
        match to.to_socket_addr() {
            Some(addr) => self.unicast.send_to(message, addr),
            None => warn!("Cannot resolve {}, dropping {}", to, message.kind()),
        }
    }

    fn set_role(&self, core: &mut NodeCore, role: NodeRole) {
        if core.role == role {
            return;
        }
        info!("{} is now {} (was {})", self.name, role, core.role);
        core.role = role;
        let _ = self.events.roles.send(role);
    }

    fn set_self_id(&self, core: &mut NodeCore, id: u32) {
        if core.self_id != Some(id) {
            info!("{} was assigned player id {}", self.name, id);
        }
        core.self_id = Some(id);
        self.registry.set_self_id(id);
    }

    /// Registers the local player; its address stays empty.
    fn register_self(&self, id: u32, role: NodeRole) {
        self.registry.upsert(
            Player::new(id, self.name.clone(), Signature::new("", self.port()), role),
            true,
        );
    }

    fn queue_control(&self, core: &mut NodeCore, event: ControlEvent) {
        core.controls.push(event);
        let _ = self.events.controls.send(event);
    }

    async fn apply(&self, core: &mut NodeCore, outcome: Outcome) {
        for effect in outcome.effects {
            match effect {
                Effect::Send { message, to } => self.dispatch_to(message, &to).await,
                Effect::Reply { message, to } => self.reply_to(message, &to),
                Effect::Upsert { player, touch } => self.registry.upsert(player, touch),
                Effect::ChangeRole { id, role } => self.registry.change_role(id, role),
                Effect::AdoptSelfId(id) => {
                    self.set_self_id(core, id);
                    self.register_self(id, core.role);
                }
                Effect::AdoptState(state) => core.state = state,
                Effect::Control(event) => self.queue_control(core, event),
            }
        }
        if let Some(role) = outcome.role {
            self.set_role(core, role);
        }
    }
}

/// A running peer node.
pub struct Node {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Binds the transports and starts every background task. The node
    /// starts as NORMAL with no game; call [`Node::create_game`] or
    /// [`Node::join_game`] next.
    pub async fn start(
        name: impl Into<String>,
        config: NodeConfig,
        simulation: impl Simulation,
    ) -> NodeResult<Self> {
        let name = name.into();
        let cancel = CancellationToken::new();

        let unicast =
            Transport::bind_unicast(config.base_port, config.port_attempts, cancel.child_token())
                .await?;

        let discovery = if config.multicast_discovery {
            match DiscoveryTransport::open(config.multicast_group, cancel.child_token()).await {
                Ok(discovery) => Some(Arc::new(discovery)),
                Err(e) => {
                    unicast.shutdown().await;
                    return Err(e);
                }
            }
        } else {
            None
        };

        let (registry, dead, registry_task) = RegistryHandle::spawn(
            RegistrySettings {
                node_timeout: config.node_timeout,
                publish_interval: config.roster_publish_interval,
            },
            cancel.child_token(),
        );
        let mut tasks = vec![registry_task];
        let games = match &discovery {
            Some(discovery) => {
                info!(
                    "{} started on port {}, discovery on {}",
                    name,
                    unicast.local_addr().port(),
                    discovery.group()
                );
                let (games, games_task) = AvailableGames::spawn(Arc::clone(discovery));
                tasks.push(games_task);
                Some(games)
            }
            None => {
                info!(
                    "{} started on port {} without multicast discovery",
                    name,
                    unicast.local_addr().port()
                );
                None
            }
        };

        let state = GameState::new(config.game);
        let shared = Arc::new(Shared {
            outbox: Mutex::new(Outbox::new(config.retry)),
            core: Mutex::new(NodeCore {
                role: NodeRole::Normal,
                self_id: None,
                state,
                controls: Vec::new(),
                simulation: Box::new(simulation),
            }),
            name,
            config,
            registry,
            unicast,
            discovery,
            games,
            next_seq: AtomicU64::new(1),
            events: Events::new(),
        });

        if let Some(games) = &shared.games {
            let discovered = games.subscribe();
            tasks.push(tokio::spawn(announce_loop(Arc::clone(&shared), cancel.clone())));
            tasks.push(tokio::spawn(multicast_loop(
                Arc::clone(&shared),
                discovered,
                cancel.clone(),
            )));
        }
        tasks.extend([
            tokio::spawn(ping_loop(Arc::clone(&shared), cancel.clone())),
            tokio::spawn(unicast_loop(Arc::clone(&shared))),
            tokio::spawn(state_loop(Arc::clone(&shared), cancel.clone())),
            tokio::spawn(failover_loop(Arc::clone(&shared), dead, cancel.clone())),
            tokio::spawn(retry_loop(Arc::clone(&shared), cancel.clone())),
        ]);

        Ok(Self {
            shared,
            cancel,
            tasks,
        })
    }

    /// Starts a new game with this node as MASTER. Returns the local player id.
    ///
    /// A node that is already hosting keeps its game. A node that had joined
    /// someone else's game leaves it: the old roster is forgotten and the
    /// node takes a fresh id.
    pub async fn create_game(&self) -> NodeResult<u32> {
        let shared = &self.shared;
        let mut core = shared.core.lock().await;

        if core.role == NodeRole::Master {
            if let Some(id) = core.self_id {
                debug!("{} is already hosting as player {}", shared.name, id);
                return Ok(id);
            }
        }
        if let Some(old_id) = core.self_id.take() {
            info!("{} leaving its game as player {}", shared.name, old_id);
            shared.registry.reset();
            core.controls.clear();
        }

        let id = shared.registry.next_id().await.ok_or(NodeError::Stopped)?;
        shared.set_self_id(&mut core, id);
        shared.register_self(id, NodeRole::Master);
        core.state = GameState::new(shared.config.game);
        shared.set_role(&mut core, NodeRole::Master);

        info!("{} created a game as player {}", shared.name, id);
        Ok(id)
    }

    /// Asks the master at `master` to admit this node. The id arrives later
    /// in the master's Ack.
    pub async fn join_game(&self, master: SocketAddr, view_only: bool) {
        let shared = &self.shared;
        let core = shared.core.lock().await;
        if core.role == NodeRole::Master {
            warn!("{} is already hosting a game, not joining {}", shared.name, master);
            return;
        }

        info!("{} joining the game at {}", shared.name, master);
        let join = GameMessage::new(MessageBody::Join {
            name: shared.name.clone(),
            view_only,
        })
        .from_player(core.self_id);
        shared.dispatch(join, master).await;
    }

    /// Steers the local snake.
    pub async fn steer(&self, direction: Direction) {
        let shared = &self.shared;
        let mut core = shared.core.lock().await;
        let Some(self_id) = core.self_id else {
            debug!("Not in a game yet, ignoring steer");
            return;
        };

        if core.role == NodeRole::Master {
            shared.queue_control(
                &mut core,
                ControlEvent {
                    player_id: self_id,
                    direction,
                },
            );
            return;
        }

        match shared.registry.master().await {
            Some(master) => {
                let steer = GameMessage::new(MessageBody::Steer { direction })
                    .from_player(Some(self_id))
                    .to_player(Some(master.id));
                shared.dispatch_to(steer, &master.signature()).await;
            }
            None => debug!("No master known, dropping steer"),
        }
    }

    pub async fn role(&self) -> NodeRole {
        self.shared.core.lock().await.role
    }

    pub async fn self_id(&self) -> Option<u32> {
        self.shared.core.lock().await.self_id
    }

    /// Latest world snapshot, as simulated or as received.
    pub async fn state(&self) -> GameState {
        self.shared.core.lock().await.state.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.unicast.local_addr()
    }

    /// Current registry contents, ordered by id.
    pub async fn players(&self) -> Vec<Player> {
        self.shared.registry.players().await
    }

    /// The roster as periodically republished by the registry.
    pub fn roster(&self) -> watch::Receiver<Vec<Player>> {
        self.shared.registry.roster()
    }

    /// Empty when multicast discovery is off.
    pub async fn recent_games(&self) -> Vec<DiscoveredGame> {
        match &self.shared.games {
            Some(games) => games.recent_five().await,
            None => Vec::new(),
        }
    }

    pub async fn visible_games(&self) -> Vec<DiscoveredGame> {
        match &self.shared.games {
            Some(games) => games.all_visible().await,
            None => Vec::new(),
        }
    }

    /// Every decoded unicast message.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<Datagram> {
        self.shared.events.messages.subscribe()
    }

    pub fn subscribe_roles(&self) -> broadcast::Receiver<NodeRole> {
        self.shared.events.roles.subscribe()
    }

    /// Control events queued for the simulation on this node.
    pub fn subscribe_controls(&self) -> broadcast::Receiver<ControlEvent> {
        self.shared.events.controls.subscribe()
    }

    pub fn subscribe_discovered(&self) -> broadcast::Receiver<DiscoveredGame> {
        self.shared.events.discovered.subscribe()
    }

    /// Stops every task and closes both transports.
    pub async fn stop(self) {
        info!("{} stopping", self.shared.name);
        self.cancel.cancel();

        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Node task panicked: {}", e);
            }
        }
        self.shared.unicast.shutdown().await;
        if let Some(discovery) = &self.shared.discovery {
            discovery.shutdown().await;
        }
    }
}

async fn announce_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut ticker = interval(shared.config.announce_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let (role, config) = {
            let core = shared.core.lock().await;
            (core.role, core.state.config)
        };
        if role != NodeRole::Master {
            continue;
        }

        let Some(games) = &shared.games else {
            break;
        };
        let players = shared.registry.players().await;
        games.announce(true, config, players);
    }

    debug!("Announce loop stopped");
}

async fn ping_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        let (delay, role, self_id) = {
            let core = shared.core.lock().await;
            (
                Duration::from_millis(core.state.config.ping_delay_ms.max(1)),
                core.role,
                core.self_id,
            )
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(delay) => {}
        }

        let Some(self_id) = self_id else {
            continue;
        };

        let targets: Vec<Player> = if role == NodeRole::Master {
            shared
                .registry
                .players()
                .await
                .into_iter()
                .filter(|player| player.id != self_id)
                .collect()
        } else {
            shared
                .registry
                .master()
                .await
                .filter(|master| master.id != self_id)
                .into_iter()
                .collect()
        };

        for target in targets {
            let ping = GameMessage::new(MessageBody::Ping)
                .from_player(Some(self_id))
                .to_player(Some(target.id));
            shared.dispatch_to(ping, &target.signature()).await;
        }
    }

    debug!("Ping loop stopped");
}

async fn unicast_loop(shared: Arc<Shared>) {
    while let Some(datagram) = shared.unicast.receive().await {
        let from = Signature::from(datagram.from);
        shared.registry.touch(from.clone());

        if datagram.message.body == MessageBody::Ack {
            shared
                .outbox
                .lock()
                .await
                .acknowledge(datagram.message.msg_seq, datagram.from);
        }

        let mut core = shared.core.lock().await;
        let players = shared.registry.players().await;

        let unknown_joiner = core.role == NodeRole::Master
            && matches!(datagram.message.body, MessageBody::Join { .. })
            && !players.iter().any(|player| player.signature() == from);
        let fresh_id = if unknown_joiner {
            shared.registry.next_id().await
        } else {
            None
        };

        let outcome = protocol::interpret(&core.view(&players, fresh_id), &datagram);
        shared.apply(&mut core, outcome).await;
        drop(core);

        // Subscribers only see a message once its effects are visible
        let _ = shared.events.messages.send(datagram);
    }

    debug!("Unicast listener stopped");
}

async fn multicast_loop(
    shared: Arc<Shared>,
    mut discovered: broadcast::Receiver<DiscoveredGame>,
    cancel: CancellationToken,
) {
    loop {
        let game = tokio::select! {
            _ = cancel.cancelled() => break,
            game = discovered.recv() => game,
        };

        match game {
            Ok(game) => {
                let _ = shared.events.discovered.send(game);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Multicast listener skipped {} announcements", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    debug!("Multicast listener stopped");
}

async fn state_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        let delay = {
            let core = shared.core.lock().await;
            Duration::from_millis(core.state.config.state_delay_ms.max(1))
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(delay) => {}
        }

        let mut core = shared.core.lock().await;
        if core.role != NodeRole::Master {
            continue;
        }
        broadcast_state(&shared, &mut core).await;
    }

    debug!("State loop stopped");
}

/// One MASTER tick: simulate, absorb the resulting roster, make sure a
/// deputy exists, then send the snapshot to every other player.
async fn broadcast_state(shared: &Shared, core: &mut NodeCore) {
    let mut previous = core.state.clone();
    previous.players = shared.registry.players().await;
    let controls = std::mem::take(&mut core.controls);

    let mut next = core.simulation.next_state(previous, controls);
    shared.registry.absorb(std::mem::take(&mut next.players));

    let players = shared.registry.players().await;
    let outcome = protocol::select_deputy(&core.view(&players, None));
    shared.apply(core, outcome).await;

    next.players = shared.registry.players().await;
    core.state = next;

    let self_id = core.self_id;
    for player in &core.state.players {
        if Some(player.id) == self_id {
            continue;
        }
        let message = GameMessage::new(MessageBody::State {
            state: core.state.clone(),
        })
        .from_player(self_id)
        .to_player(Some(player.id));
        shared.dispatch_to(message, &player.signature()).await;
    }
}

async fn failover_loop(
    shared: Arc<Shared>,
    mut dead: mpsc::UnboundedReceiver<Player>,
    cancel: CancellationToken,
) {
    loop {
        let player = tokio::select! {
            _ = cancel.cancelled() => break,
            player = dead.recv() => match player {
                Some(player) => player,
                None => break,
            },
        };

        let mut core = shared.core.lock().await;
        let players = shared.registry.players().await;
        let outcome = protocol::failover(&core.view(&players, None), &player);
        shared.apply(&mut core, outcome).await;
    }

    debug!("Failover loop stopped");
}

async fn retry_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let period = (shared.config.retry.interval / 2).max(Duration::from_millis(1));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let due = shared.outbox.lock().await.due(Instant::now());
        for (message, to) in due {
            debug!("Retransmitting {} {} to {}", message.kind(), message.msg_seq, to);
            shared.unicast.send_to(message, to);
        }
    }

    debug!("Retry loop stopped");
}
