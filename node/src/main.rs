use clap::Parser;
use log::{info, warn};
use node::{Node, NodeConfig, PassiveSimulation};
use std::net::{SocketAddr, SocketAddrV4};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Player name announced to the game
    #[arg(short = 'n', long, default_value = "player")]
    name: String,

    /// First unicast port to try
    #[arg(short = 'p', long, default_value = "5000")]
    base_port: u16,

    /// Multicast group used for game announcements
    #[arg(short = 'g', long, default_value = "239.192.0.4:9192")]
    group: SocketAddrV4,

    /// Skip the multicast group; only direct joins with --join work
    #[arg(long)]
    no_discovery: bool,

    /// Host a new game instead of joining one
    #[arg(short = 'c', long)]
    create: bool,

    /// Join the master at this address instead of waiting for an announcement
    #[arg(short = 'j', long, conflicts_with = "create")]
    join: Option<SocketAddr>,

    /// Join without a snake
    #[arg(long)]
    view_only: bool,

    /// Milliseconds between State snapshots when hosting
    #[arg(long, default_value = "100")]
    state_delay: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = NodeConfig {
        base_port: args.base_port,
        multicast_group: args.group,
        multicast_discovery: !args.no_discovery,
        ..NodeConfig::default()
    };
    config.game.state_delay_ms = args.state_delay;

    let node = Node::start(args.name, config, PassiveSimulation).await?;
    let mut roles = node.subscribe_roles();
    let mut discovered = node.subscribe_discovered();

    if args.create {
        let id = node.create_game().await?;
        info!("Hosting a game as player {}", id);
    } else if let Some(master) = args.join {
        node.join_game(master, args.view_only).await;
    } else {
        info!("Waiting for a game announcement...");
    }
    let mut joined = args.create || args.join.is_some();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
            role = roles.recv() => {
                if let Ok(role) = role {
                    info!("Role changed to {}", role);
                }
            }
            game = discovered.recv() => {
                let Ok(game) = game else { continue };
                if joined || !game.can_join {
                    continue;
                }
                match game.address() {
                    Some(master) => {
                        info!("Found a game at {} with {} players", master, game.players.len());
                        node.join_game(master, args.view_only).await;
                        joined = true;
                    }
                    None => warn!("Announcement from unresolvable address {}", game.signature()),
                }
            }
        }
    }

    node.stop().await;
    Ok(())
}
