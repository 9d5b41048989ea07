use std::{io, net::SocketAddr};

/// Failures surfaced by the directory and relay layers.
///
/// Workers never let these escape: they turn them into cleanup plus, where it
/// matters, a single [`RelayEvent`](crate::relay::RelayEvent) for the session
/// owner. Only [`DirectoryClient::list_rooms`](crate::directory::DirectoryClient::list_rooms)
/// and the room join flow hand them back to a caller.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to bind {addr}: {source}")]
    BindFailure {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    ConnectFailure {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("peer disconnected")]
    PeerDisconnected,

    #[error("directory at {addr} unavailable: {reason}")]
    DirectoryUnavailable { addr: SocketAddr, reason: String },

    #[error("wrong password for room '{room}'")]
    PasswordRejected { room: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RelayError {
    pub(crate) fn malformed(reason: impl ToString) -> Self {
        RelayError::MalformedMessage(reason.to_string())
    }
}

pub type Result<T, E = RelayError> = std::result::Result<T, E>;
