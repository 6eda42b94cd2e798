#![allow(missing_docs)]

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Connection {0} already exists")]
    ConnectionAlreadyExists(String),

    #[error("Connection {0} not found, should dial first")]
    ConnectionNotFound(String),

    #[error("Connection {0} is released")]
    ConnectionReleased(String),

    #[error("Connection {0} is closed")]
    ConnectionClosed(String),

    #[error("Peer {0} is unreachable")]
    PeerUnreachable(String),

    #[error("Opening connection to {0} timed out")]
    OpenTimeout(String),

    #[error("Peer id {0} is already registered")]
    PeerIdTaken(String),

    #[error("Should not connect to self")]
    ShouldNotConnectSelf,

    #[error("Transport of {0} is destroyed")]
    TransportDestroyed(String),
}

impl Error {
    /// Errors that mean the remote peer cannot be talked to right now.
    pub fn is_unreachable(&self) -> bool {
        !matches!(
            self,
            Error::Bincode(_) | Error::PeerIdTaken(_) | Error::ShouldNotConnectSelf
        )
    }
}
