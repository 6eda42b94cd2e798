//! Handles to ring members.
//!
//! Routing and storage code talks to any member through a [SharedPeer] and never
//! branches on where it lives: [LocalPeer] calls straight into the local node,
//! [RemotePeer] turns every call into a request over the transport.

mod factory;
pub use factory::NodeFactory;

use std::sync::Arc;
use std::sync::Weak;

use async_trait::async_trait;
use serde_json::json;
use serde_json::Value;

use crate::dht::NodeInfo;
use crate::dht::RingId;
use crate::error::Error;
use crate::error::Result;
use crate::message::KeyEntry;
use crate::message::Operation;
use crate::message::RequestHandler;
use crate::node::LocalNode;
use crate::storage::ValueSet;

/// A handle to a ring member, shared between tasks.
pub type SharedPeer = Arc<dyn PeerHandle>;

/// Capabilities of a ring member.
#[async_trait]
pub trait PeerHandle: Send + Sync {
    /// Descriptor of the member.
    fn info(&self) -> &NodeInfo;

    /// Whether the member is the local node.
    fn is_local(&self) -> bool;

    /// The member responsible for `id`.
    async fn find_successor(&self, id: RingId) -> Result<SharedPeer>;

    async fn get_predecessor(&self) -> Result<Option<SharedPeer>>;

    async fn get_successors(&self) -> Result<Vec<SharedPeer>>;

    /// Tell the member that `node` might be its predecessor.
    async fn notify(&self, node: &NodeInfo) -> Result<()>;

    /// Add a value to a key the member owns.
    async fn insert(&self, key: RingId, value: Value) -> Result<()>;

    async fn retrieve(&self, key: RingId) -> Result<ValueSet>;

    async fn remove(&self, key: RingId, value: &Value) -> Result<()>;

    /// Hand over keys in bulk.
    async fn insert_entries(&self, entries: Vec<(RingId, ValueSet)>) -> Result<()>;

    /// Keep copies of entries the caller owns.
    async fn replicate(&self, entries: Vec<(RingId, ValueSet)>) -> Result<()>;

    /// Drop one value from the copies of `key`.
    async fn remove_replica(&self, key: RingId, value: &Value) -> Result<()>;

    /// Tell a neighbour that `leaver` departs, with its predecessor and successors.
    async fn leaving(
        &self,
        leaver: &NodeInfo,
        pred: Option<NodeInfo>,
        succs: &[NodeInfo],
    ) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}

/// The local node seen as a member.
pub struct LocalPeer {
    info: NodeInfo,
    node: Weak<LocalNode>,
}

impl LocalPeer {
    pub fn new(info: NodeInfo, node: Weak<LocalNode>) -> Self {
        Self { info, node }
    }

    fn node(&self) -> Result<Arc<LocalNode>> {
        self.node.upgrade().ok_or(Error::NodeReleased)
    }
}

#[async_trait]
impl PeerHandle for LocalPeer {
    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn find_successor(&self, id: RingId) -> Result<SharedPeer> {
        self.node()?.find_successor(id).await
    }

    async fn get_predecessor(&self) -> Result<Option<SharedPeer>> {
        let node = self.node()?;
        Ok(node
            .predecessor()?
            .and_then(|p| node.factory().create(&p)))
    }

    async fn get_successors(&self) -> Result<Vec<SharedPeer>> {
        let node = self.node()?;
        Ok(node.factory().create_all(&node.successors()?))
    }

    async fn notify(&self, node: &NodeInfo) -> Result<()> {
        self.node()?.notify(node).await
    }

    async fn insert(&self, key: RingId, value: Value) -> Result<()> {
        self.node()?.store_insert(key, value).await
    }

    async fn retrieve(&self, key: RingId) -> Result<ValueSet> {
        self.node()?.store_retrieve(key).await
    }

    async fn remove(&self, key: RingId, value: &Value) -> Result<()> {
        self.node()?.store_remove(key, value).await
    }

    async fn insert_entries(&self, entries: Vec<(RingId, ValueSet)>) -> Result<()> {
        self.node()?.store_entries(entries).await
    }

    async fn replicate(&self, entries: Vec<(RingId, ValueSet)>) -> Result<()> {
        self.node()?.store_replicas(entries).await
    }

    async fn remove_replica(&self, key: RingId, value: &Value) -> Result<()> {
        self.node()?.store_remove_replica(key, value).await
    }

    async fn leaving(
        &self,
        leaver: &NodeInfo,
        pred: Option<NodeInfo>,
        succs: &[NodeInfo],
    ) -> Result<()> {
        self.node()?.on_leaving(leaver, pred, succs)
    }

    async fn ping(&self) -> Result<()> {
        self.node().map(|_| ())
    }
}

/// A member behind the transport.
pub struct RemotePeer {
    info: NodeInfo,
    handler: Arc<RequestHandler>,
    factory: Arc<NodeFactory>,
}

impl RemotePeer {
    pub fn new(info: NodeInfo, handler: Arc<RequestHandler>, factory: Arc<NodeFactory>) -> Self {
        Self {
            info,
            handler,
            factory,
        }
    }

    async fn request(&self, op: Operation, args: Vec<Value>) -> Result<Value> {
        self.handler.request(self.info.peer_id(), op, args).await
    }

    /// Turn a member returned by the remote side into a handle.
    fn handle(&self, v: Value) -> Result<SharedPeer> {
        let info: NodeInfo = serde_json::from_value(v).map_err(|e| {
            Error::LookupFailed(format!("{} returned a bad member: {e}", self.info))
        })?;
        self.factory
            .create(&info)
            .ok_or_else(|| Error::LookupFailed(format!("{} returned invalid {info}", self.info)))
    }
}

#[async_trait]
impl PeerHandle for RemotePeer {
    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn is_local(&self) -> bool {
        false
    }

    async fn find_successor(&self, id: RingId) -> Result<SharedPeer> {
        let v = self.request(Operation::FindSuccessor, vec![json!(id)]).await?;
        self.handle(v)
    }

    async fn get_predecessor(&self) -> Result<Option<SharedPeer>> {
        match self.request(Operation::GetPredecessor, vec![]).await? {
            Value::Null => Ok(None),
            v => self.handle(v).map(Some),
        }
    }

    async fn get_successors(&self) -> Result<Vec<SharedPeer>> {
        let v = self.request(Operation::GetSuccessors, vec![]).await?;
        let infos: Vec<NodeInfo> = serde_json::from_value(v).map_err(|e| {
            Error::LookupFailed(format!("{} returned bad successors: {e}", self.info))
        })?;
        Ok(self.factory.create_all(&infos))
    }

    async fn notify(&self, node: &NodeInfo) -> Result<()> {
        self.request(Operation::Notify, vec![json!(node)]).await?;
        Ok(())
    }

    async fn insert(&self, key: RingId, value: Value) -> Result<()> {
        self.request(Operation::Insert, vec![json!(key), value]).await?;
        Ok(())
    }

    async fn retrieve(&self, key: RingId) -> Result<ValueSet> {
        let v = self.request(Operation::Retrieve, vec![json!(key)]).await?;
        match v {
            Value::Array(values) => Ok(values),
            Value::Null => Ok(vec![]),
            v => Err(Error::InvalidArgument(format!(
                "{} returned a non array value set: {v}",
                self.info
            ))),
        }
    }

    async fn remove(&self, key: RingId, value: &Value) -> Result<()> {
        self.request(Operation::Remove, vec![json!(key), value.clone()]).await?;
        Ok(())
    }

    async fn insert_entries(&self, entries: Vec<(RingId, ValueSet)>) -> Result<()> {
        let entries: Vec<KeyEntry> = entries.into_iter().map(Into::into).collect();
        self.request(Operation::InsertEntries, vec![serde_json::to_value(entries)?]).await?;
        Ok(())
    }

    async fn replicate(&self, entries: Vec<(RingId, ValueSet)>) -> Result<()> {
        let entries: Vec<KeyEntry> = entries.into_iter().map(Into::into).collect();
        self.request(Operation::Replicate, vec![serde_json::to_value(entries)?]).await?;
        Ok(())
    }

    async fn remove_replica(&self, key: RingId, value: &Value) -> Result<()> {
        let args = vec![json!(key), value.clone()];
        self.request(Operation::RemoveReplica, args).await?;
        Ok(())
    }

    async fn leaving(
        &self,
        leaver: &NodeInfo,
        pred: Option<NodeInfo>,
        succs: &[NodeInfo],
    ) -> Result<()> {
        self.request(Operation::Leaving, vec![
            json!(leaver),
            json!(pred),
            json!(succs),
        ])
        .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.request(Operation::Ping, vec![]).await?;
        Ok(())
    }
}
