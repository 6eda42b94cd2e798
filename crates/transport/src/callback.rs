//! This module contains the [InnerTransportCallback] struct.

use crate::core::callback::SharedTransportCallback;
use crate::core::transport::ConnectionState;
use crate::core::transport::TransportMessage;

/// [InnerTransportCallback] wraps the [SharedTransportCallback] with inner handling for a specific connection.
pub struct InnerTransportCallback {
    /// The id of the connection to which the current callback is assigned.
    pub cid: String,
    callback: SharedTransportCallback,
}

impl InnerTransportCallback {
    /// Create a new [InnerTransportCallback].
    pub fn new(cid: &str, callback: SharedTransportCallback) -> Self {
        Self {
            cid: cid.to_string(),
            callback,
        }
    }

    /// This method is invoked on a raw frame arriving from the remote peer.
    pub async fn on_message(&self, msg: &[u8]) {
        match bincode::deserialize(msg) {
            Ok(m) => self.handle_message(&m).await,
            Err(e) => {
                tracing::error!("Deserialize TransportMessage failed: {e:?}");
            }
        };
    }

    /// This method is invoked when the state of connection has changed.
    pub async fn on_connection_state_change(&self, s: ConnectionState) {
        if let Err(e) = self.callback.on_connection_state_change(&self.cid, s).await {
            tracing::error!("Callback on_connection_state_change failed: {e:?}");
        }
    }

    async fn handle_message(&self, msg: &TransportMessage) {
        match msg {
            TransportMessage::Custom(bytes) => {
                if let Err(e) = self.callback.on_message(&self.cid, bytes).await {
                    tracing::error!("Callback on_message failed: {e:?}")
                }
            }
        }
    }
}
