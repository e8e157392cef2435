//! # Snake Peer Node Library
//!
//! This library implements one peer of a local-network snake game. There is
//! no dedicated server: every node can host a game, join one it discovered
//! on the multicast group, and take over hosting when the current host
//! disappears.
//!
//! ## Roles
//!
//! ### MASTER
//! Runs the authoritative simulation, admits joiners, assigns ids and
//! unicasts a State snapshot to every player on each tick. Announces the
//! game on the multicast group once a second.
//!
//! ### DEPUTY
//! A regular player that holds the full roster and takes over as MASTER
//! when the current one stops answering. At most one DEPUTY is appointed
//! at a time.
//!
//! ### NORMAL
//! Sends steering input to the MASTER and adopts whatever snapshot it
//! receives.
//!
//! ## Liveness
//!
//! Every unicast datagram refreshes the sender's `last_seen` in the
//! registry. Nodes ping their counterpart (the MASTER pings everybody,
//! everyone else pings the MASTER) so silence only happens when a node is
//! gone. The registry sweeps one timed-out player per tick and hands it to
//! the failover logic in [`protocol::failover`].
//!
//! ## Module Organization
//!
//! ### Transport Modules (`transport`, `multicast`)
//! UDP transports with queued sends and a decoding receive loop, plus the
//! multicast group setup and interface selection.
//!
//! ### Registry Module (`registry`)
//! The player roster, owned by an actor task and reached through
//! [`registry::RegistryHandle`].
//!
//! ### Discovery Module (`discovery`)
//! Recent and currently visible game announcements.
//!
//! ### Protocol Module (`protocol`)
//! Pure decision functions: what to do about an inbound message or a dead
//! peer, expressed as a list of effects.
//!
//! ### Controller Module (`controller`)
//! [`Node`], which owns the local role and runs every periodic loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use node::{Node, NodeConfig, PassiveSimulation};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = Node::start("alice", NodeConfig::default(), PassiveSimulation).await?;
//!     host.create_game().await?;
//!
//!     let guest = Node::start("bob", NodeConfig::default(), PassiveSimulation).await?;
//!     let master = std::net::SocketAddr::from(([127, 0, 0, 1], host.local_addr().port()));
//!     guest.join_game(master, false).await;
//!
//!     guest.stop().await;
//!     host.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod multicast;
pub mod outbox;
pub mod protocol;
pub mod registry;
pub mod simulation;
pub mod transport;

pub use config::{NodeConfig, RetryPolicy};
pub use controller::Node;
pub use discovery::DiscoveredGame;
pub use error::{NodeError, NodeResult};
pub use simulation::{ControlEvent, PassiveSimulation, Simulation};
pub use transport::Datagram;
