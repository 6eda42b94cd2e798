use std::sync::Arc;
use std::sync::Weak;

use crate::dht::NodeInfo;
use crate::error::Result;
use crate::message::RequestHandler;
use crate::node::LocalNode;
use crate::peer::LocalPeer;
use crate::peer::RemotePeer;
use crate::peer::SharedPeer;
use crate::transport::SharedTransport;

/// NodeFactory builds member handles for the local node and owns its transport binding.
/// Handles to the same remote member are cheap to create and share the
/// transport connection to it.
pub struct NodeFactory {
    node: Weak<LocalNode>,
    info: NodeInfo,
    handler: Arc<RequestHandler>,
    transport: SharedTransport,
}

impl NodeFactory {
    pub fn new(
        node: Weak<LocalNode>,
        info: NodeInfo,
        handler: Arc<RequestHandler>,
        transport: SharedTransport,
    ) -> Self {
        Self {
            node,
            info,
            handler,
            transport,
        }
    }

    /// Dispatcher the remote handles send their requests through.
    pub fn handler(&self) -> &Arc<RequestHandler> {
        &self.handler
    }

    /// Handle of the local node.
    pub fn local(&self) -> SharedPeer {
        Arc::new(LocalPeer::new(self.info.clone(), self.node.clone()))
    }

    /// Handle of the member `info` describes. `None` when the descriptor is
    /// malformed, the local handle when it names the local node.
    pub fn create(self: &Arc<Self>, info: &NodeInfo) -> Option<SharedPeer> {
        if !info.is_valid() {
            tracing::debug!("refuse to create handle of invalid member {info:?}");
            return None;
        }
        if info.ring_id() == self.info.ring_id() {
            return Some(self.local());
        }
        Some(Arc::new(RemotePeer::new(
            info.clone(),
            self.handler.clone(),
            self.clone(),
        )))
    }

    /// Handle of the member reachable under `peer_id`.
    pub fn create_by_peer_id(self: &Arc<Self>, peer_id: &str) -> Option<SharedPeer> {
        self.create(&NodeInfo::new(peer_id))
    }

    /// Handles of `infos` in order, malformed ones dropped.
    pub fn create_all(self: &Arc<Self>, infos: &[NodeInfo]) -> Vec<SharedPeer> {
        infos.iter().filter_map(|n| self.create(n)).collect()
    }

    /// Peer ids of the open connections.
    pub fn connection_ids(&self) -> Vec<String> {
        self.transport.connection_ids()
    }

    /// Release the transport.
    pub async fn destroy(&self) -> Result<()> {
        self.transport.destroy().await
    }
}
