//! Binding between the ring and a [TransportInterface] implementation.

use std::sync::Arc;

use async_trait::async_trait;
use chordring_transport::core::callback::SharedTransportCallback;
use chordring_transport::core::transport::TransportInterface;
use chordring_transport::core::transport::TransportMessage;
use chordring_transport::error::Error as TransportError;

use crate::error::Result;

/// The part of a transport the ring uses. Blanket implemented for every
/// [TransportInterface] so the node can hold any of them behind one pointer.
#[async_trait]
pub trait ChordTransport: Send + Sync {
    /// The id the local peer is reachable under.
    fn peer_id(&self) -> &str;

    /// Register the handler of incoming frames and connection events.
    fn set_callback(&self, callback: SharedTransportCallback);

    /// Send an opaque payload to `peer_id`, dialing it when needed.
    async fn send(&self, peer_id: &str, data: Vec<u8>) -> Result<()>;

    /// Peer ids of the open connections.
    fn connection_ids(&self) -> Vec<String>;

    /// Close everything and stop accepting connections.
    async fn destroy(&self) -> Result<()>;
}

/// Transport shared by the node, its handles and its dispatcher.
pub type SharedTransport = Arc<dyn ChordTransport>;

#[async_trait]
impl<T> ChordTransport for T
where T: TransportInterface<Error = TransportError> + Send + Sync
{
    fn peer_id(&self) -> &str {
        TransportInterface::peer_id(self)
    }

    fn set_callback(&self, callback: SharedTransportCallback) {
        TransportInterface::set_callback(self, callback)
    }

    async fn send(&self, peer_id: &str, data: Vec<u8>) -> Result<()> {
        TransportInterface::send_message(self, peer_id, TransportMessage::Custom(data)).await?;
        Ok(())
    }

    fn connection_ids(&self) -> Vec<String> {
        TransportInterface::connection_ids(self)
    }

    async fn destroy(&self) -> Result<()> {
        TransportInterface::destroy(self).await?;
        Ok(())
    }
}

/// Build the default in-process transport.
#[cfg(feature = "memory")]
pub fn memory_transport(
    config: &chordring_transport::core::transport::TransportConfig,
) -> Result<SharedTransport> {
    let transport = chordring_transport::connections::MemoryTransport::new(config)?;
    Ok(Arc::new(transport))
}
