//! The local ring member: routing state, owned keys and the protocol algorithms.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use futures::future::join_all;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::config::ChordConfig;
use crate::consts::ID_BITS;
use crate::consts::LOOKUP_ATTEMPTS;
use crate::dht::Chord;
use crate::dht::NodeInfo;
use crate::dht::PeerRing;
use crate::dht::PeerRingAction;
use crate::dht::PeerRingRemoteAction;
use crate::dht::RingId;
use crate::dht::Stabilizer;
use crate::error::Error;
use crate::error::Result;
use crate::inspect::NodeStatus;
use crate::message::RequestHandler;
use crate::peer::NodeFactory;
use crate::peer::SharedPeer;
use crate::storage::KeyStore;
use crate::storage::ValueSet;
use crate::transport::SharedTransport;

/// Lifecycle of a [LocalNode]. A node never goes back once it has left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeState {
    Fresh,
    Bootstrapping,
    Active,
    Leaving,
    Left,
}

/// LocalNode runs the Chord protocol for one member.
///
/// Ring state lives in [PeerRing], which only answers with actions. The node
/// performs those actions through member handles built by its [NodeFactory].
pub struct LocalNode {
    info: NodeInfo,
    config: ChordConfig,
    ring: PeerRing,
    store: KeyStore,
    replicas: KeyStore,
    factory: Arc<NodeFactory>,
    state: Mutex<NodeState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalNode {
    /// Bind a fresh node to `transport`. The ring id is derived from the transport peer id.
    pub fn new(transport: SharedTransport, config: &ChordConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| {
            let info = NodeInfo::new(transport.peer_id());
            let handler = Arc::new(RequestHandler::new(
                me.clone(),
                transport.clone(),
                config.request_timeout(),
            ));
            handler.listen();
            let factory = Arc::new(NodeFactory::new(
                me.clone(),
                info.clone(),
                handler,
                transport,
            ));
            Self {
                ring: PeerRing::new(info.clone(), config.successor_list_size),
                info,
                config: config.clone(),
                store: KeyStore::default(),
                replicas: KeyStore::default(),
                factory,
                state: Mutex::new(NodeState::Fresh),
                tasks: Mutex::new(vec![]),
            }
        })
    }

    pub fn info(&self) -> &NodeInfo {
        &self.info
    }

    pub fn get_peer_id(&self) -> &str {
        self.info.peer_id()
    }

    pub fn ring_id(&self) -> RingId {
        self.info.ring_id()
    }

    pub fn config(&self) -> &ChordConfig {
        &self.config
    }

    /// Routing state.
    pub fn ring(&self) -> &PeerRing {
        &self.ring
    }

    /// Keys owned by this member.
    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    /// Copies of keys owned by the predecessors.
    pub fn replicas(&self) -> &KeyStore {
        &self.replicas
    }

    pub fn factory(&self) -> &Arc<NodeFactory> {
        &self.factory
    }

    fn lock_state(&self) -> Result<MutexGuard<NodeState>> {
        self.state.lock().map_err(|_| Error::DHTSyncLockError)
    }

    pub fn state(&self) -> Result<NodeState> {
        Ok(*self.lock_state()?)
    }

    /// Move to `to` if the current state is `from`.
    fn transition(&self, from: NodeState, to: NodeState) -> Result<()> {
        let mut state = self.lock_state()?;
        if *state != from {
            return Err(Error::InvalidState(format!("{:?}", *state)));
        }
        tracing::debug!("{} {:?} -> {:?}", self.info, *state, to);
        *state = to;
        Ok(())
    }

    fn set_state(&self, to: NodeState) -> Result<()> {
        *self.lock_state()? = to;
        Ok(())
    }

    fn handle_of(&self, node: &NodeInfo) -> Result<SharedPeer> {
        self.factory
            .create(node)
            .ok_or_else(|| Error::InvalidArgument(format!("invalid member {node:?}")))
    }

    /// Start a new ring with this node as its only member.
    pub fn create(self: &Arc<Self>) -> Result<()> {
        self.transition(NodeState::Fresh, NodeState::Bootstrapping)?;
        self.ring.reset()?;
        self.start_maintenance()?;
        self.set_state(NodeState::Active)?;
        tracing::info!("{} created a ring", self.info);
        Ok(())
    }

    /// Join the ring `bootstrap_peer_id` is a member of.
    /// On failure the node is [NodeState::Fresh] again and may retry.
    pub async fn join(self: &Arc<Self>, bootstrap_peer_id: &str) -> Result<()> {
        let bootstrap = NodeInfo::new(bootstrap_peer_id);
        if !bootstrap.is_valid() {
            return Err(Error::InvalidArgument("empty bootstrap peer id".to_string()));
        }
        if bootstrap.ring_id() == self.ring_id() {
            return Err(Error::InvalidArgument(
                "cannot bootstrap from self".to_string(),
            ));
        }

        self.transition(NodeState::Fresh, NodeState::Bootstrapping)?;
        match self.bootstrap(&bootstrap).await {
            Ok(()) => {
                self.start_maintenance()?;
                self.set_state(NodeState::Active)?;
                tracing::info!("{} joined the ring via {}", self.info, bootstrap);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("{} failed to join via {}: {}", self.info, bootstrap, e);
                self.ring.reset()?;
                self.set_state(NodeState::Fresh)?;
                Err(e)
            }
        }
    }

    async fn bootstrap(&self, bootstrap: &NodeInfo) -> Result<()> {
        let (entry, id) = match self.ring.join(bootstrap)? {
            PeerRingAction::RemoteAction(n, PeerRingRemoteAction::FindSuccessor(id)) => (n, id),
            act => return Err(Error::InvalidState(format!("unexpected join action {act:?}"))),
        };
        let succ = self.handle_of(&entry)?.find_successor(id).await?;
        if succ.is_local() {
            // The ring still routes our id to us, from an earlier session.
            self.ring.set_successor(entry)?;
        } else {
            self.ring.set_successor(succ.info().clone())?;
            self.ring.record(&entry)?;
        }
        if let Err(e) = self.stabilize().await {
            tracing::warn!("{} first stabilization failed: {}", self.info, e);
        }
        Ok(())
    }

    fn start_maintenance(self: &Arc<Self>) -> Result<()> {
        let stabilizer = Arc::new(Stabilizer::new(Arc::downgrade(self), &self.config));
        let handles = stabilizer.spawn();
        self.tasks
            .lock()
            .map_err(|_| Error::DHTSyncLockError)?
            .extend(handles);
        Ok(())
    }

    fn stop_maintenance(&self) -> Result<()> {
        for h in self
            .tasks
            .lock()
            .map_err(|_| Error::DHTSyncLockError)?
            .drain(..)
        {
            h.abort();
        }
        Ok(())
    }

    /// Find the member responsible for `id`.
    ///
    /// A hop that fails is dropped from the routing state when it is unreachable,
    /// and the lookup is tried once more through the next best member.
    /// Fails with [Error::LookupFailed] when no route is left.
    pub async fn find_successor(&self, id: RingId) -> Result<SharedPeer> {
        let mut tried: Vec<RingId> = vec![];

        for _ in 0..LOOKUP_ATTEMPTS {
            let hop = match self.ring.find_successor(id)? {
                PeerRingAction::Some(n) => {
                    return self
                        .factory
                        .create(&n)
                        .ok_or_else(|| Error::LookupFailed(id.to_string()))
                }
                PeerRingAction::RemoteAction(n, PeerRingRemoteAction::FindSuccessor(_)) => n,
                act => {
                    return Err(Error::InvalidState(format!(
                        "unexpected find_successor action {act:?}"
                    )))
                }
            };
            let hop = if tried.contains(&hop.ring_id()) {
                match self.alternate_hop(id, &tried)? {
                    Some(n) => n,
                    None => break,
                }
            } else {
                hop
            };
            tried.push(hop.ring_id());

            let peer = self.handle_of(&hop)?;
            match peer.find_successor(id).await {
                Ok(succ) => return Ok(succ),
                Err(e) => {
                    tracing::warn!("{} lookup of {} via {} failed: {}", self.info, id, hop, e);
                    // A timeout may come from further down the route, so the hop
                    // is only dropped when it does not answer a ping either.
                    if e.is_peer_failure() && peer.ping().await.is_err() {
                        self.ring.remove(hop.ring_id())?;
                    }
                }
            }
        }
        Err(Error::LookupFailed(id.to_string()))
    }

    fn alternate_hop(&self, id: RingId, tried: &[RingId]) -> Result<Option<NodeInfo>> {
        Ok(self
            .ring
            .next_hops(id)?
            .into_iter()
            .chain(self.ring.successors()?)
            .find(|n| !tried.contains(&n.ring_id())))
    }

    /// Current predecessor.
    pub fn predecessor(&self) -> Result<Option<NodeInfo>> {
        self.ring.predecessor()
    }

    /// Successor list, nearest first.
    pub fn successors(&self) -> Result<Vec<NodeInfo>> {
        self.ring.successors()
    }

    /// Fetch the predecessor and successor list of the successor, adopt its
    /// predecessor when it sits in between, then notify the successor.
    pub async fn stabilize(&self) -> Result<()> {
        let successor = self.ring.successor()?;

        let (succ_pred, succ_list) = if successor.ring_id() == self.ring_id() {
            (self.ring.predecessor()?, vec![])
        } else {
            let peer = self.handle_of(&successor)?;
            let fetched = async {
                let pred = peer.get_predecessor().await?;
                let succs = peer.get_successors().await?;
                Ok::<_, Error>((pred, succs))
            }
            .await;
            match fetched {
                Ok((pred, succs)) => (
                    pred.map(|p| p.info().clone()),
                    succs.iter().map(|s| s.info().clone()).collect::<Vec<_>>(),
                ),
                Err(e) => {
                    if e.is_peer_failure() {
                        tracing::info!("{} lost successor {}", self.info, successor);
                        self.ring.remove(successor.ring_id())?;
                    }
                    return Err(e);
                }
            }
        };

        match self.ring.stabilize(succ_pred, &succ_list)? {
            PeerRingAction::None => Ok(()),
            PeerRingAction::RemoteAction(next, PeerRingRemoteAction::Notify(me)) => {
                if let Err(e) = self.handle_of(&next)?.notify(&me).await {
                    if e.is_peer_failure() {
                        self.ring.remove(next.ring_id())?;
                    }
                    return Err(e);
                }
                Ok(())
            }
            act => Err(Error::InvalidState(format!(
                "unexpected stabilize action {act:?}"
            ))),
        }
    }

    /// `candidate` believes it might be our predecessor. When it is adopted,
    /// keys it is now responsible for are handed over to it.
    pub async fn notify(&self, candidate: &NodeInfo) -> Result<()> {
        if !candidate.is_valid() {
            return Err(Error::InvalidArgument(format!("invalid member {candidate:?}")));
        }
        if let Some(pred) = self.ring.notify(candidate)? {
            tracing::info!("{} adopts predecessor {}", self.info, pred);
            self.ring.record(&pred)?;
            self.promote_replicas().await?;
            self.hand_over(&pred).await?;
        }
        Ok(())
    }

    async fn hand_over(&self, pred: &NodeInfo) -> Result<()> {
        let (p, me) = (pred.ring_id(), self.ring_id());
        let moving = self
            .store
            .take_where(|key| !key.is_in_half_open_interval(&p, &me))
            .await?;
        if moving.is_empty() {
            return Ok(());
        }
        tracing::debug!("{} moves {} keys to {}", self.info, moving.len(), pred);
        if let Err(e) = self.handle_of(pred)?.insert_entries(moving.clone()).await {
            tracing::warn!("{} failed to move keys to {}: {}", self.info, pred, e);
            self.store.insert_entries(moving).await?;
        }
        Ok(())
    }

    /// Refresh the finger table. Each resolved member also fills the following
    /// slots it covers, and resolution stops at the first slot owned by self.
    pub async fn fix_fingers(&self) -> Result<()> {
        let mut index = 0;
        while index < ID_BITS {
            let succ = self.find_successor(self.ring.finger_start(index)).await?;
            if succ.is_local() {
                break;
            }
            index = self.ring.set_finger(index, succ.info().clone())?;
        }
        Ok(())
    }

    /// Ping the predecessor and forget it when it does not answer.
    /// Copies of keys the node is now responsible for are promoted to owned keys.
    pub async fn check_predecessor(&self) -> Result<()> {
        let mut ret = Ok(());
        if let PeerRingAction::RemoteAction(p, PeerRingRemoteAction::CheckPredecessor) =
            self.ring.check_predecessor()?
        {
            if let Err(e) = self.handle_of(&p)?.ping().await {
                if e.is_peer_failure() {
                    tracing::info!("{} lost predecessor {}", self.info, p);
                    self.ring.remove(p.ring_id())?;
                }
                ret = Err(e);
            }
        }
        self.promote_replicas().await?;
        ret
    }

    /// Move the copies of keys in `(predecessor, self]` into the owned store and
    /// replicate them further. Without a predecessor this waits for the next
    /// `notify`, unless the node is alone and owns every key.
    async fn promote_replicas(&self) -> Result<()> {
        let me = self.ring_id();
        let pred = match self.ring.predecessor()? {
            Some(p) => Some(p.ring_id()),
            None if self.ring.successor()?.ring_id() == me => None,
            None => return Ok(()),
        };
        let promoted = self
            .replicas
            .take_where(|key| pred.map_or(true, |p| key.is_in_half_open_interval(&p, &me)))
            .await?;
        if promoted.is_empty() {
            return Ok(());
        }
        tracing::info!("{} takes over {} replicated keys", self.info, promoted.len());
        self.store.insert_entries(promoted.clone()).await?;
        self.replicate(promoted).await;
        Ok(())
    }

    /// The first R-1 successors, which keep copies of the owned keys.
    fn replica_holders(&self) -> Result<Vec<SharedPeer>> {
        let count = self.config.successor_list_size.saturating_sub(1);
        let holders: Vec<NodeInfo> = self.ring.successors()?.into_iter().take(count).collect();
        Ok(self.factory.create_all(&holders))
    }

    /// Push copies of owned entries to the replica holders. A holder that
    /// cannot be reached only lowers the redundancy.
    async fn replicate(&self, entries: Vec<(RingId, ValueSet)>) {
        if entries.is_empty() {
            return;
        }
        let holders = match self.replica_holders() {
            Ok(holders) => holders,
            Err(e) => {
                tracing::warn!("{} cannot list replica holders: {}", self.info, e);
                return;
            }
        };
        let pushes = holders.iter().map(|h| h.replicate(entries.clone()));
        for (h, ret) in holders.iter().zip(join_all(pushes).await) {
            if let Err(e) = ret {
                tracing::warn!("{} failed to replicate to {}: {}", self.info, h.info(), e);
            }
        }
    }

    /// A neighbour departs.
    pub fn on_leaving(
        &self,
        leaver: &NodeInfo,
        pred: Option<NodeInfo>,
        succs: &[NodeInfo],
    ) -> Result<()> {
        tracing::info!("{} is leaving", leaver);
        self.ring.leaving(leaver, pred, succs)
    }

    /// The transport lost the connection to `peer_id`.
    pub fn forget_peer(&self, peer_id: &str) -> Result<()> {
        let id = RingId::create(peer_id);
        if id != self.ring_id() {
            self.ring.remove(id)?;
        }
        Ok(())
    }

    /// Hand every owned key to the successor, tell the neighbours, and release
    /// the transport. Keys are lost when the successor cannot take them.
    pub async fn leave(&self) -> Result<()> {
        self.transition(NodeState::Active, NodeState::Leaving)?;
        self.stop_maintenance()?;

        let successor = self.ring.successor()?;
        let pred = self.ring.predecessor()?;
        let succs = self.ring.successors()?;
        let entries = self.store.take_where(|_| true).await?;

        if successor.ring_id() != self.ring_id() {
            let peer = self.handle_of(&successor)?;
            if !entries.is_empty() {
                if let Err(e) = peer.insert_entries(entries).await {
                    tracing::warn!("{} dropped its keys, successor {}: {}", self.info, successor, e);
                }
            }
            let mut neighbours = vec![peer];
            if let Some(p) = pred.as_ref().filter(|p| **p != successor) {
                match self.handle_of(p) {
                    Ok(h) => neighbours.push(h),
                    Err(e) => tracing::warn!("{} skipped predecessor {}: {}", self.info, p, e),
                }
            }
            for n in neighbours {
                if let Err(e) = n.leaving(&self.info, pred.clone(), &succs).await {
                    tracing::warn!("{} failed to tell {} about leaving: {}", self.info, n.info(), e);
                }
            }
        }

        if let Err(e) = self.factory.destroy().await {
            tracing::warn!("{} failed to release transport: {}", self.info, e);
        }
        self.set_state(NodeState::Left)?;
        tracing::info!("{} left the ring", self.info);
        Ok(())
    }

    /// Add `value` to `key` on its owner, which copies it to its replica holders.
    pub async fn insert(&self, key: &str, value: Value) -> Result<()> {
        let id = RingId::create(key);
        self.find_successor(id).await?.insert(id, value).await
    }

    /// All values of `key`, read from its owner.
    pub async fn retrieve(&self, key: &str) -> Result<ValueSet> {
        let id = RingId::create(key);
        self.find_successor(id).await?.retrieve(id).await
    }

    /// Delete one `value` of `key` on its owner.
    pub async fn remove(&self, key: &str, value: &Value) -> Result<()> {
        let id = RingId::create(key);
        self.find_successor(id).await?.remove(id, value).await
    }

    /// Add `value` to an owned key, then to its copies.
    pub async fn store_insert(&self, key: RingId, value: Value) -> Result<()> {
        self.store.insert(key, value.clone()).await?;
        self.replicate(vec![(key, vec![value])]).await;
        Ok(())
    }

    pub async fn store_retrieve(&self, key: RingId) -> Result<ValueSet> {
        self.store.retrieve(key).await
    }

    /// Delete one value of an owned key, then from its copies.
    pub async fn store_remove(&self, key: RingId, value: &Value) -> Result<()> {
        self.store.remove(key, value).await?;
        let holders = self.replica_holders()?;
        let drops = holders.iter().map(|h| h.remove_replica(key, value));
        for (h, ret) in holders.iter().zip(join_all(drops).await) {
            if let Err(e) = ret {
                tracing::warn!("{} failed to update replica on {}: {}", self.info, h.info(), e);
            }
        }
        Ok(())
    }

    /// Take ownership of entries handed over by another member.
    pub async fn store_entries(&self, entries: Vec<(RingId, ValueSet)>) -> Result<()> {
        let keys: Vec<RingId> = entries.iter().map(|(key, _)| *key).collect();
        self.replicas.take_where(|key| keys.contains(key)).await?;
        self.store.insert_entries(entries.clone()).await?;
        self.replicate(entries).await;
        Ok(())
    }

    /// Keep copies pushed by the owner of the keys.
    pub async fn store_replicas(&self, entries: Vec<(RingId, ValueSet)>) -> Result<()> {
        self.replicas.insert_entries(entries).await
    }

    pub async fn store_remove_replica(&self, key: RingId, value: &Value) -> Result<()> {
        self.replicas.remove(key, value).await
    }

    /// Snapshot for diagnostics.
    pub async fn get_statuses(&self) -> Result<NodeStatus> {
        NodeStatus::inspect(self).await
    }
}

impl Drop for LocalNode {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for h in tasks.drain(..) {
                h.abort();
            }
        }
    }
}
