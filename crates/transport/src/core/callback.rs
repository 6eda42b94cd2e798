//! Callback interface of a transport.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::transport::ConnectionState;

/// Error returned by callback handlers. It is only logged by the transport.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Any object that implements this trait can be registered on a transport
/// with [TransportInterface::set_callback](crate::core::transport::TransportInterface::set_callback).
///
/// The `cid` passed to every method is the peer id of the remote side.
#[async_trait]
pub trait TransportCallback {
    /// This method is invoked on every message arriving from the remote peer `cid`.
    async fn on_message(&self, _cid: &str, _msg: &[u8]) -> Result<(), CallbackError> {
        Ok(())
    }

    /// This method is invoked when the state of the connection to `cid` has changed.
    /// A [ConnectionState::Connected] change for a peer this side never dialed
    /// announces an incoming connection.
    async fn on_connection_state_change(
        &self,
        _cid: &str,
        _state: ConnectionState,
    ) -> Result<(), CallbackError> {
        Ok(())
    }
}

/// The transport stores its callback as a shared trait object.
pub type SharedTransportCallback = Arc<dyn TransportCallback + Send + Sync>;
