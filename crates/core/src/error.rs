//! Error of chordring_core

use serde::Deserialize;
use serde::Serialize;

/// A wrap `Result` contains custom errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds that travel over the wire inside a failed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Bad hex or byte width in a ring identifier.
    MalformedIdentifier,
    /// Dial or open failure, or the peer went away mid call.
    UnreachablePeer,
    /// No response within the deadline.
    RequestTimedOut,
    /// The remote dispatcher does not know the operation.
    UnsupportedOperation,
    /// Routing exhausted its retries.
    LookupFailed,
    /// Rejected before any network round trip.
    InvalidArgument,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Errors collections in chordring-core.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Malformed ring identifier: {0}")]
    MalformedIdentifier(String),

    #[error("Peer {0} is unreachable")]
    UnreachablePeer(String),

    #[error("Request {0} timed out")]
    RequestTimedOut(u64),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Lookup of {0} failed")]
    LookupFailed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Remote peer answered with {0}")]
    Remote(ErrorKind),

    #[error("Transport error: {0}")]
    Transport(#[from] chordring_transport::error::Error),

    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("YAML config error: {0}")]
    ConfigYaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Local node is released")]
    NodeReleased,

    #[error("Node is {0}, operation not allowed")]
    InvalidState(String),

    #[error("DHT lock failed")]
    DHTSyncLockError,
}

impl Error {
    /// Project onto the kinds a caller or a remote peer can act on.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedIdentifier(_) => ErrorKind::MalformedIdentifier,
            Error::UnreachablePeer(_) | Error::Transport(_) | Error::NodeReleased => {
                ErrorKind::UnreachablePeer
            }
            Error::RequestTimedOut(_) => ErrorKind::RequestTimedOut,
            Error::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            Error::LookupFailed(_) => ErrorKind::LookupFailed,
            Error::Remote(kind) => *kind,
            Error::InvalidArgument(_)
            | Error::Serialize(_)
            | Error::ConfigYaml(_)
            | Error::Io(_)
            | Error::InvalidState(_)
            | Error::DHTSyncLockError => ErrorKind::InvalidArgument,
        }
    }

    /// Errors after which the peer should be treated as gone.
    pub fn is_peer_failure(&self) -> bool {
        matches!(
            self,
            Error::UnreachablePeer(_)
                | Error::Transport(_)
                | Error::NodeReleased
                | Error::RequestTimedOut(_)
        )
    }
}
