//! The embedding surface: lifecycle and argument checks around one [LocalNode].

use std::sync::Arc;

use chordring_transport::core::transport::TransportConfig;
use serde_json::Value;

use crate::config::ChordConfig;
use crate::error::Error;
use crate::error::Result;
use crate::inspect::NodeStatus;
use crate::node::LocalNode;
use crate::storage::ValueSet;
use crate::transport::SharedTransport;

/// Builds the transport of each new node.
pub type TransportProvider = Arc<dyn Fn(&TransportConfig) -> Result<SharedTransport> + Send + Sync>;

/// Chord owns at most one [LocalNode] at a time. After [Chord::leave] a new
/// node may be started with [Chord::create] or [Chord::join].
pub struct Chord {
    config: ChordConfig,
    provider: TransportProvider,
    node: Option<Arc<LocalNode>>,
}

impl Chord {
    /// Use `provider` to build transports.
    pub fn with_transport_provider(config: ChordConfig, provider: TransportProvider) -> Self {
        Self {
            config,
            provider,
            node: None,
        }
    }

    /// Build nodes over the in-process [MemoryTransport](chordring_transport::connections::MemoryTransport).
    #[cfg(feature = "memory")]
    pub fn new(config: ChordConfig) -> Self {
        Self::with_transport_provider(config, Arc::new(crate::transport::memory_transport))
    }

    pub fn config(&self) -> &ChordConfig {
        &self.config
    }

    /// The current node, if any.
    pub fn node(&self) -> Option<&Arc<LocalNode>> {
        self.node.as_ref()
    }

    fn active(&self) -> Result<&Arc<LocalNode>> {
        self.node
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("no node, create or join first".to_string()))
    }

    fn spawn_node(&self) -> Result<Arc<LocalNode>> {
        if self.node.is_some() {
            return Err(Error::InvalidArgument(
                "a node is already running".to_string(),
            ));
        }
        let transport = (self.provider)(&TransportConfig::from(&self.config))?;
        Ok(LocalNode::new(transport, &self.config))
    }

    /// Start a new ring.
    pub async fn create(&mut self) -> Result<()> {
        let node = self.spawn_node()?;
        if let Err(e) = node.create() {
            Self::release(&node).await;
            return Err(e);
        }
        self.node = Some(node);
        Ok(())
    }

    /// Join the ring of `bootstrap_peer_id`. On failure nothing is kept, so the
    /// call may be retried.
    pub async fn join(&mut self, bootstrap_peer_id: &str) -> Result<()> {
        let node = self.spawn_node()?;
        if let Err(e) = node.join(bootstrap_peer_id).await {
            Self::release(&node).await;
            return Err(e);
        }
        self.node = Some(node);
        Ok(())
    }

    async fn release(node: &LocalNode) {
        if let Err(e) = node.factory().destroy().await {
            tracing::warn!("failed to release transport of {}: {}", node.info(), e);
        }
    }

    /// Leave the ring, handing owned keys to the successor. No-op without a node.
    pub async fn leave(&mut self) -> Result<()> {
        match self.node.take() {
            Some(node) => node.leave().await,
            None => Ok(()),
        }
    }

    pub async fn insert(&self, key: &str, value: Value) -> Result<()> {
        check_key(key)?;
        check_value(&value)?;
        self.active()?.insert(key, value).await
    }

    pub async fn retrieve(&self, key: &str) -> Result<ValueSet> {
        check_key(key)?;
        self.active()?.retrieve(key).await
    }

    pub async fn remove(&self, key: &str, value: &Value) -> Result<()> {
        check_key(key)?;
        check_value(value)?;
        self.active()?.remove(key, value).await
    }

    pub async fn get_statuses(&self) -> Result<NodeStatus> {
        self.active()?.get_statuses().await
    }

    pub fn get_peer_id(&self) -> Option<&str> {
        self.node.as_ref().map(|n| n.get_peer_id())
    }
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("empty key".to_string()));
    }
    Ok(())
}

/// `null` stands for an undefined value.
fn check_value(value: &Value) -> Result<()> {
    if value.is_null() {
        return Err(Error::InvalidArgument("undefined value".to_string()));
    }
    Ok(())
}
