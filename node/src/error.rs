//! Errors surfaced by node construction.
//!
//! Per-datagram transport failures never reach this type: they are logged
//! and dropped inside the transport loops.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("no free unicast port among {attempts} candidates starting at {base}")]
    NoFreePort { base: u16, attempts: u16 },

    #[error("no up, multicast-capable network interface found")]
    NoMulticastInterface,

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("node has been stopped")]
    Stopped,
}

pub type NodeResult<T> = Result<T, NodeError>;
