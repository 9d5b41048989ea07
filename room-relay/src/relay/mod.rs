//! Per-room chat relay: a host that fans lines out to every peer and the
//! client peers use to join it.
//!
//! Both sides report to their owner through an [`EventSender`]. Every relayed
//! line and every system notice is delivered on it exactly once, in the order
//! the session observed them. The receiving end decides which thread renders
//! them.

use std::{fmt, net::SocketAddr};

use tokio::sync::{mpsc, watch};
use tracing::debug;

pub mod client;
pub mod host;

pub use client::{ClientState, RelayClient};
pub use host::{HostState, PEER_QUEUE_DEPTH, RelayHost};

/// Sink a relay session delivers its events to.
pub type EventSender = mpsc::UnboundedSender<RelayEvent>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// The host is accepting peers on `addr`.
    Listening { addr: SocketAddr },
    /// The client reached the host at `addr`.
    Connected { addr: SocketAddr },
    /// A chat line, delivered verbatim.
    Message(String),
    /// The client's connection to the host is gone.
    Disconnected,
    /// The session could not start.
    Failed { reason: String },
}

impl fmt::Display for RelayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayEvent::Listening { addr } => write!(f, "[system] hosting room on {addr}"),
            RelayEvent::Connected { addr } => write!(f, "[system] connected to {addr}"),
            RelayEvent::Message(line) => f.write_str(line),
            RelayEvent::Disconnected => f.write_str("[system] disconnected from room"),
            RelayEvent::Failed { reason } => write!(f, "[error] {reason}"),
        }
    }
}

pub(crate) fn deliver(events: &EventSender, event: RelayEvent) {
    if let Err(err) = events.send(event) {
        debug!(event = ?err.0, "event receiver dropped");
    }
}

/// Resolves once the running flag is cleared or its owner is gone.
pub(crate) async fn stopped(running: &mut watch::Receiver<bool>) {
    let _ = running.wait_for(|running| !*running).await;
}
