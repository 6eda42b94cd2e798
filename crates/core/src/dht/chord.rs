//! Chord algorithm implement.
#![warn(missing_docs)]
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use super::finger::FingerTable;
use super::id::BiasId;
use super::id::RingId;
use super::successor::SuccessorReader;
use super::successor::SuccessorSeq;
use super::successor::SuccessorWriter;
use super::types::Chord;
use super::types::NodeInfo;
use crate::consts::ID_BITS;
use crate::error::Error;
use crate::error::Result;

/// PeerRing holds the routing state of the local member: finger table,
/// successor list and predecessor. It never talks to the network. Steps that need
/// another member come back as [PeerRingAction::RemoteAction].
///
/// Each field is locked on its own and no lock outlives a method call, so
/// concurrent maintenance and lookups only ever observe whole values.
#[derive(Clone)]
pub struct PeerRing {
    /// The local member.
    pub info: NodeInfo,
    /// [FingerTable] help node to find successor quickly.
    pub finger: Arc<Mutex<FingerTable>>,
    /// The next members on the ring, nearest first.
    /// The [SuccessorSeq] contains several members for fault tolerance.
    pub successor_seq: SuccessorSeq,
    /// The previous member on the ring.
    pub predecessor: Arc<Mutex<Option<NodeInfo>>>,
}

/// `PeerRing` use this to describe the result of [Chord] algorithm. Sometimes it's a
/// direct result, sometimes it's an action that is continued externally.
#[derive(Clone, Debug, PartialEq)]
pub enum PeerRingAction {
    /// No result, the whole manipulation is done internally.
    None,
    /// Found some node.
    Some(NodeInfo),
    /// Trigger a remote action.
    RemoteAction(NodeInfo, RemoteAction),
}

/// Some of the process needs to be done remotely. This enum is used to describe that.
/// In the comments, `node_a` is the member declared in [PeerRingAction::RemoteAction].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteAction {
    /// Need `node_a` to find the successor of the id.
    FindSuccessor(RingId),
    /// Let `node_a` [notify](Chord::notify) with the given member.
    Notify(NodeInfo),
    /// Check `node_a` is alive.
    CheckPredecessor,
}

impl PeerRing {
    /// Create the state of a member that is alone on its ring.
    pub fn new(info: NodeInfo, succ_max: usize) -> Self {
        let id = info.ring_id();
        Self {
            finger: Arc::new(Mutex::new(FingerTable::new(id, ID_BITS))),
            successor_seq: SuccessorSeq::new(id, succ_max),
            predecessor: Arc::new(Mutex::new(None)),
            info,
        }
    }

    /// Ring id of the local member.
    pub fn id(&self) -> RingId {
        self.info.ring_id()
    }

    /// Lock and return MutexGuard of finger table.
    pub fn lock_finger(&self) -> Result<MutexGuard<FingerTable>> {
        self.finger.lock().map_err(|_| Error::DHTSyncLockError)
    }

    /// Lock and return MutexGuard of predecessor.
    pub fn lock_predecessor(&self) -> Result<MutexGuard<Option<NodeInfo>>> {
        self.predecessor.lock().map_err(|_| Error::DHTSyncLockError)
    }

    /// Current predecessor.
    pub fn predecessor(&self) -> Result<Option<NodeInfo>> {
        Ok(self.lock_predecessor()?.clone())
    }

    /// Immediate successor, the local member itself when it is alone.
    pub fn successor(&self) -> Result<NodeInfo> {
        Ok(self
            .successor_seq
            .min()?
            .unwrap_or_else(|| self.info.clone()))
    }

    /// The successor list, nearest first. Never contains the local member.
    pub fn successors(&self) -> Result<Vec<NodeInfo>> {
        self.successor_seq.list()
    }

    /// Adopt `node` as immediate successor.
    /// It only becomes the successor when no closer member is known.
    pub fn set_successor(&self, node: NodeInfo) -> Result<()> {
        if node.ring_id() == self.id() {
            return Ok(());
        }
        self.successor_seq.update(node.clone())?;
        self.lock_finger()?.set(0, node);
        Ok(())
    }

    /// Record a member learned about, as a finger and as a successor candidate.
    pub fn record(&self, node: &NodeInfo) -> Result<()> {
        if node.ring_id() == self.id() {
            return Ok(());
        }
        self.lock_finger()?.join(node);
        self.successor_seq.update(node.clone())?;
        Ok(())
    }

    /// Remove a node from finger table, successor sequence and predecessor.
    /// If successor_seq become empty, try setting the closest finger to it.
    pub fn remove(&self, id: RingId) -> Result<()> {
        {
            let mut predecessor = self.lock_predecessor()?;
            if predecessor.as_ref().map(|p| p.ring_id()) == Some(id) {
                *predecessor = None;
            }
        }
        let mut finger = self.lock_finger()?;
        finger.remove(id);
        self.successor_seq.remove(id)?;
        if self.successor_seq.is_empty()? {
            if let Some(x) = finger.first() {
                self.successor_seq.update(x)?;
            }
        }
        Ok(())
    }

    /// Forget every other member.
    pub fn reset(&self) -> Result<()> {
        *self.lock_predecessor()? = None;
        *self.lock_finger()? = FingerTable::new(self.id(), ID_BITS);
        for n in self.successors()? {
            self.successor_seq.remove(n.ring_id())?;
        }
        Ok(())
    }

    /// Calculate bias of the id on the ring.
    pub fn bias(&self, id: RingId) -> BiasId {
        BiasId::new(self.id(), id)
    }

    /// Known members lying strictly between self and `id`, closest to `id` first.
    /// These are the candidates to forward a lookup of `id` to.
    pub fn next_hops(&self, id: RingId) -> Result<Vec<NodeInfo>> {
        let mut hops = self.lock_finger()?.preceding(id);
        for n in self.successors()? {
            if n.ring_id().is_in_interval(&self.id(), &id) && !hops.contains(&n) {
                hops.push(n);
            }
        }
        hops.sort_by(|a, b| self.bias(b.ring_id()).cmp(&self.bias(a.ring_id())));
        Ok(hops)
    }

    /// Start of finger slot `index`.
    pub fn finger_start(&self, index: usize) -> RingId {
        self.id().add_power_of_two(index)
    }

    /// Set finger `index` and the following slots `node` also covers.
    /// Returns the next slot left to resolve.
    pub fn set_finger(&self, index: usize, node: NodeInfo) -> Result<usize> {
        if node.ring_id() == self.id() {
            return Ok(index + 1);
        }
        Ok(self.lock_finger()?.set_and_fill(index, node))
    }

    /// A departing member hands over its neighbours: its predecessor, and its
    /// successor list nearest first.
    pub fn leaving(
        &self,
        leaver: &NodeInfo,
        pred: Option<NodeInfo>,
        succ_list: &[NodeInfo],
    ) -> Result<()> {
        let pred_was_leaver =
            self.predecessor()?.map(|p| p.ring_id()) == Some(leaver.ring_id());
        self.remove(leaver.ring_id())?;
        if pred_was_leaver {
            if let Some(p) = pred {
                if p.ring_id() != self.id() {
                    *self.lock_predecessor()? = Some(p);
                }
            }
        }
        for n in succ_list {
            if n.ring_id() != leaver.ring_id() {
                self.record(n)?;
            }
        }
        Ok(())
    }
}

impl Chord<PeerRingAction> for PeerRing {
    /// Clear the state and ask `bootstrap` for the successor of the local member.
    fn join(&self, bootstrap: &NodeInfo) -> Result<PeerRingAction> {
        if bootstrap.ring_id() == self.id() {
            return Ok(PeerRingAction::None);
        }
        self.reset()?;
        Ok(PeerRingAction::RemoteAction(
            bootstrap.clone(),
            RemoteAction::FindSuccessor(self.id()),
        ))
    }

    /// If `id` lies in `(self, successor]` the successor is the answer. Otherwise the
    /// lookup is forwarded to the closest known member preceding `id`.
    fn find_successor(&self, id: RingId) -> Result<PeerRingAction> {
        let successor = self.successor()?;

        let ret = if successor.ring_id() == self.id()
            || id.is_in_half_open_interval(&self.id(), &successor.ring_id())
        {
            PeerRingAction::Some(successor)
        } else {
            match self.next_hops(id)?.into_iter().next() {
                Some(hop) => PeerRingAction::RemoteAction(hop, RemoteAction::FindSuccessor(id)),
                None => PeerRingAction::RemoteAction(successor, RemoteAction::FindSuccessor(id)),
            }
        };

        tracing::debug!("find_successor: self: {}, id: {}, result: {:?}", self.info, id, ret);
        Ok(ret)
    }

    /// Adopt `node` as predecessor when there is none, or when it lies strictly
    /// between the current predecessor and self.
    fn notify(&self, node: &NodeInfo) -> Result<Option<NodeInfo>> {
        if node.ring_id() == self.id() {
            return Ok(None);
        }
        let mut predecessor = self.lock_predecessor()?;

        let adopt = match &*predecessor {
            Some(pre) => node.ring_id().is_in_interval(&pre.ring_id(), &self.id()),
            None => true,
        };
        if adopt {
            *predecessor = Some(node.clone());
            Ok(Some(node.clone()))
        } else {
            Ok(None)
        }
    }

    fn stabilize(
        &self,
        succ_pred: Option<NodeInfo>,
        succ_list: &[NodeInfo],
    ) -> Result<PeerRingAction> {
        let old = self.successor()?;
        let mut successor = old.clone();
        let mut tail = succ_list.to_vec();

        if let Some(x) = succ_pred {
            if x.ring_id().is_in_interval(&self.id(), &old.ring_id()) {
                tracing::debug!("stabilize: {} adopts successor {}", self.info, x);
                self.set_successor(x.clone())?;
                tail.insert(0, old);
                successor = x;
            }
        }

        if successor.ring_id() == self.id() {
            return Ok(PeerRingAction::None);
        }
        self.successor_seq.sync(successor.clone(), &tail)?;

        Ok(PeerRingAction::RemoteAction(
            successor,
            RemoteAction::Notify(self.info.clone()),
        ))
    }

    fn check_predecessor(&self) -> Result<PeerRingAction> {
        Ok(match self.predecessor()? {
            Some(p) => PeerRingAction::RemoteAction(p, RemoteAction::CheckPredecessor),
            None => PeerRingAction::None,
        })
    }
}
