//! Traits every transport implementation provides.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::connection_ref::ConnectionRef;
use crate::core::callback::SharedTransportCallback;

/// Minimum interval between two dial attempts, in milliseconds.
pub const DEFAULT_CONNECT_RATE_LIMIT_MS: u64 = 3000;
/// Upper bound for a single dial attempt, in milliseconds.
pub const DEFAULT_CONNECTION_OPEN_TIMEOUT_MS: u64 = 30000;

/// The frame exchanged between two connected peers.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    /// Opaque payload owned by the upper layer.
    Custom(Vec<u8>),
}

/// State of a connection, reported through
/// [TransportCallback::on_connection_state_change](crate::core::callback::TransportCallback::on_connection_state_change).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Created but not dialed yet.
    New,
    /// Dial in progress.
    Connecting,
    /// Ready to carry messages.
    Connected,
    /// The remote side went away without closing.
    Disconnected,
    /// The dial failed.
    Failed,
    /// Closed by either side.
    Closed,
}

/// Options resolved once before a transport is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Id this peer registers under. A random id is generated when absent.
    pub peer_id: Option<String>,
    /// Minimum interval between two dial attempts.
    pub connect_rate_limit: Duration,
    /// Upper bound for a single dial attempt.
    pub connection_open_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            peer_id: None,
            connect_rate_limit: Duration::from_millis(DEFAULT_CONNECT_RATE_LIMIT_MS),
            connection_open_timeout: Duration::from_millis(DEFAULT_CONNECTION_OPEN_TIMEOUT_MS),
        }
    }
}

/// One bidirectional connection to a remote peer.
#[async_trait]
pub trait ConnectionInterface {
    /// Error type of the connection.
    type Error: std::error::Error;

    /// Send a frame to the remote peer.
    async fn send_message(&self, msg: TransportMessage) -> Result<(), Self::Error>;

    /// Current state of the connection.
    fn connection_state(&self) -> ConnectionState;

    /// Close the connection. The remote side is notified with [ConnectionState::Closed].
    async fn close(&self) -> Result<(), Self::Error>;
}

/// A transport dials peers and keeps the pool of connections of one local peer.
#[async_trait]
pub trait TransportInterface {
    /// Connection type managed by the transport.
    type Connection: ConnectionInterface<Error = Self::Error>;
    /// Error type of the transport.
    type Error: std::error::Error;

    /// The id the local peer is reachable under.
    fn peer_id(&self) -> &str;

    /// Register the handler of incoming messages and connection events.
    /// Replaces any previously registered handler.
    fn set_callback(&self, callback: SharedTransportCallback);

    /// Get the connection to `peer_id`, dialing it if there is none.
    /// Dials are subject to the rate limit and open timeout of the transport.
    async fn open_connection(
        &self,
        peer_id: &str,
    ) -> Result<ConnectionRef<Self::Connection>, Self::Error>;

    /// Get an existing connection by peer id.
    fn connection(&self, peer_id: &str) -> Result<ConnectionRef<Self::Connection>, Self::Error>;

    /// Get all connections of the transport.
    fn connections(&self) -> Vec<(String, ConnectionRef<Self::Connection>)>;

    /// Get the peer ids of all connections.
    fn connection_ids(&self) -> Vec<String>;

    /// Send a frame to `peer_id`, dialing it first when there is no live connection.
    async fn send_message(&self, peer_id: &str, msg: TransportMessage) -> Result<(), Self::Error>;

    /// Close and release the connection to `peer_id`.
    async fn close_connection(&self, peer_id: &str) -> Result<(), Self::Error>;

    /// Close every connection and stop accepting new ones.
    async fn destroy(&self) -> Result<(), Self::Error>;
}
