//! Game registry: the local node's view of every known player.
//!
//! [`Registry`] is the plain data structure with its liveness bookkeeping.
//! At runtime it is owned by a single actor task; every other task goes
//! through a cloneable [`RegistryHandle`], so all reads and writes are
//! serialised by the actor's command queue and a roster read is always a
//! consistent snapshot.
//!
//! The actor also runs the liveness sweep and periodically republishes the
//! roster on a watch channel for observers.

use log::{debug, info};
use shared::{NodeRole, Player, Signature};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct Entry {
    player: Player,
    last_seen: Instant,
}

/// Known players keyed by id, each with the time we last heard from them.
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<u32, Entry>,
    max_id: u32,
    self_id: Option<u32>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves and returns a fresh player id, one past the highest id ever
    /// seen. Ids are never handed out twice.
    pub fn next_id(&mut self) -> u32 {
        self.max_id += 1;
        self.max_id
    }

    /// Inserts or replaces the entry for `player.id`.
    ///
    /// With `touch` the entry is marked as seen at `now`; without it an
    /// existing entry keeps its previous timestamp.
    pub fn upsert(&mut self, player: Player, touch: bool, now: Instant) {
        self.max_id = self.max_id.max(player.id);
        let last_seen = match self.entries.get(&player.id) {
            Some(existing) if touch => existing.last_seen.max(now),
            Some(existing) => existing.last_seen,
            None => now,
        };
        self.entries.insert(player.id, Entry { player, last_seen });
    }

    /// Replaces the details of players that are still registered, keeping
    /// their `last_seen`. Players missing from the registry stay missing.
    pub fn absorb(&mut self, players: Vec<Player>) {
        for player in players {
            if let Some(entry) = self.entries.get_mut(&player.id) {
                entry.player = player;
            }
        }
    }

    /// Forgets every player and the local id. Ids already handed out are
    /// not reused.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.self_id = None;
    }

    /// Refreshes the entry whose address matches `signature`.
    pub fn touch(&mut self, signature: &Signature, now: Instant) -> bool {
        match self
            .entries
            .values_mut()
            .find(|entry| entry.player.signature() == *signature)
        {
            Some(entry) => {
                entry.last_seen = entry.last_seen.max(now);
                true
            }
            None => false,
        }
    }

    pub fn change_role(&mut self, id: u32, role: NodeRole) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.player.role = role;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: u32) -> Option<Player> {
        self.entries.remove(&id).map(|entry| entry.player)
    }

    pub fn get(&self, id: u32) -> Option<&Player> {
        self.entries.get(&id).map(|entry| &entry.player)
    }

    pub fn find_by_signature(&self, signature: &Signature) -> Option<&Player> {
        self.entries
            .values()
            .map(|entry| &entry.player)
            .find(|player| player.signature() == *signature)
    }

    /// Lowest-id player holding `role`.
    fn first_with_role(&self, role: NodeRole) -> Option<&Player> {
        self.entries
            .values()
            .map(|entry| &entry.player)
            .filter(|player| player.role == role)
            .min_by_key(|player| player.id)
    }

    pub fn master(&self) -> Option<&Player> {
        self.first_with_role(NodeRole::Master)
    }

    pub fn deputy(&self) -> Option<&Player> {
        self.first_with_role(NodeRole::Deputy)
    }

    pub fn any_normal(&self) -> Option<&Player> {
        self.first_with_role(NodeRole::Normal)
    }

    /// All players ordered by id.
    pub fn players(&self) -> Vec<Player> {
        let mut players: Vec<Player> = self
            .entries
            .values()
            .map(|entry| entry.player.clone())
            .collect();
        players.sort_by_key(|player| player.id);
        players
    }

    pub fn set_self_id(&mut self, id: u32) {
        self.max_id = self.max_id.max(id);
        self.self_id = Some(id);
    }

    pub fn self_id(&self) -> Option<u32> {
        self.self_id
    }

    pub fn last_seen(&self, id: u32) -> Option<Instant> {
        self.entries.get(&id).map(|entry| entry.last_seen)
    }

    /// Removes at most one player silent for longer than `timeout`.
    ///
    /// A timed-out master is reported before anyone else; the rest are
    /// picked up on later sweeps. Nothing is swept until the local id is
    /// known, and the local player is never swept.
    pub fn sweep(&mut self, now: Instant, timeout: Duration) -> Option<Player> {
        let self_id = self.self_id?;

        let victim = self
            .entries
            .values()
            .filter(|entry| entry.player.id != self_id)
            .filter(|entry| now.saturating_duration_since(entry.last_seen) > timeout)
            .min_by_key(|entry| (entry.player.role != NodeRole::Master, entry.player.id))
            .map(|entry| entry.player.id)?;

        self.remove(victim)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

enum Lookup {
    Master,
    Deputy,
    AnyNormal,
    BySignature(Signature),
}

enum Command {
    NextId(oneshot::Sender<u32>),
    Upsert { player: Player, touch: bool },
    Absorb(Vec<Player>),
    Reset,
    Touch(Signature),
    ChangeRole { id: u32, role: NodeRole },
    SetSelfId(u32),
    Lookup(Lookup, oneshot::Sender<Option<Player>>),
    Players(oneshot::Sender<Vec<Player>>),
}

impl Registry {
    fn apply(&mut self, command: Command) {
        match command {
            Command::NextId(reply) => {
                let _ = reply.send(self.next_id());
            }
            Command::Upsert { player, touch } => self.upsert(player, touch, Instant::now()),
            Command::Absorb(players) => self.absorb(players),
            Command::Reset => self.reset(),
            Command::Touch(signature) => {
                self.touch(&signature, Instant::now());
            }
            Command::ChangeRole { id, role } => {
                if self.change_role(id, role) {
                    debug!("Player {} is now {}", id, role);
                }
            }
            Command::SetSelfId(id) => self.set_self_id(id),
            Command::Lookup(lookup, reply) => {
                let found = match lookup {
                    Lookup::Master => self.master(),
                    Lookup::Deputy => self.deputy(),
                    Lookup::AnyNormal => self.any_normal(),
                    Lookup::BySignature(signature) => self.find_by_signature(&signature),
                };
                let _ = reply.send(found.cloned());
            }
            Command::Players(reply) => {
                let _ = reply.send(self.players());
            }
        }
    }
}

/// Timing for the registry actor.
#[derive(Debug, Clone, Copy)]
pub struct RegistrySettings {
    pub node_timeout: Duration,
    pub publish_interval: Duration,
}

/// Cloneable access to the registry actor.
///
/// Mutations are queued without waiting; queries wait for the actor's reply.
/// Because one queue carries both, a query always observes every mutation
/// queued before it from the same handle.
#[derive(Clone)]
pub struct RegistryHandle {
    commands: mpsc::UnboundedSender<Command>,
    roster: watch::Receiver<Vec<Player>>,
}

impl RegistryHandle {
    /// Starts the actor. Players removed by the liveness sweep are delivered
    /// on the returned receiver.
    pub fn spawn(
        settings: RegistrySettings,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<Player>, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        let (roster_tx, roster_rx) = watch::channel(Vec::new());

        let task = tokio::spawn(run_registry(
            Registry::new(),
            settings,
            commands_rx,
            dead_tx,
            roster_tx,
            cancel,
        ));

        let handle = Self {
            commands: commands_tx,
            roster: roster_rx,
        };
        (handle, dead_rx, task)
    }

    fn post(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Registry stopped, dropping command");
        }
    }

    async fn lookup(&self, lookup: Lookup) -> Option<Player> {
        let (reply, response) = oneshot::channel();
        self.post(Command::Lookup(lookup, reply));
        response.await.ok().flatten()
    }

    /// Reserves a fresh id. `None` only after the registry has stopped.
    pub async fn next_id(&self) -> Option<u32> {
        let (reply, response) = oneshot::channel();
        self.post(Command::NextId(reply));
        response.await.ok()
    }

    pub fn upsert(&self, player: Player, touch: bool) {
        self.post(Command::Upsert { player, touch });
    }

    /// Folds a simulated roster back in without reviving swept players.
    pub fn absorb(&self, players: Vec<Player>) {
        self.post(Command::Absorb(players));
    }

    pub fn reset(&self) {
        self.post(Command::Reset);
    }

    pub fn touch(&self, signature: Signature) {
        self.post(Command::Touch(signature));
    }

    pub fn change_role(&self, id: u32, role: NodeRole) {
        self.post(Command::ChangeRole { id, role });
    }

    pub fn set_self_id(&self, id: u32) {
        self.post(Command::SetSelfId(id));
    }

    pub async fn find_by_signature(&self, signature: Signature) -> Option<Player> {
        self.lookup(Lookup::BySignature(signature)).await
    }

    pub async fn master(&self) -> Option<Player> {
        self.lookup(Lookup::Master).await
    }

    pub async fn deputy(&self) -> Option<Player> {
        self.lookup(Lookup::Deputy).await
    }

    pub async fn any_normal(&self) -> Option<Player> {
        self.lookup(Lookup::AnyNormal).await
    }

    pub async fn players(&self) -> Vec<Player> {
        let (reply, response) = oneshot::channel();
        self.post(Command::Players(reply));
        response.await.unwrap_or_default()
    }

    /// Latest periodically published roster.
    pub fn roster(&self) -> watch::Receiver<Vec<Player>> {
        self.roster.clone()
    }
}

async fn run_registry(
    mut registry: Registry,
    settings: RegistrySettings,
    mut commands: mpsc::UnboundedReceiver<Command>,
    dead: mpsc::UnboundedSender<Player>,
    roster: watch::Sender<Vec<Player>>,
    cancel: CancellationToken,
) {
    let mut sweep = interval(settings.node_timeout);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut publish = interval(settings.publish_interval);
    publish.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            command = commands.recv() => match command {
                Some(command) => registry.apply(command),
                None => break,
            },

            _ = sweep.tick() => {
                if let Some(player) = registry.sweep(Instant::now(), settings.node_timeout) {
                    info!(
                        "Player {} ({}) at {} timed out",
                        player.id,
                        player.role,
                        player.signature()
                    );
                    let _ = dead.send(player);
                }
            },

            _ = publish.tick() => {
                roster.send_replace(registry.players());
            },
        }
    }

    debug!("Registry stopped");
}
