//! Successor for PeerRing
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

use super::id::BiasId;
use super::id::RingId;
use super::types::NodeInfo;
use crate::error::Error;
use crate::error::Result;

/// A sequence of successors for a node on the ring.
/// It's necessary to have multiple successors to prevent a single point of failure.
/// Note the successors are in order of a clockwise distance from the node.
/// See also [super::id::BiasId].
#[derive(Debug, Clone)]
pub struct SuccessorSeq {
    /// Node id
    id: RingId,
    /// Max successor num
    max: usize,
    /// Successors
    successors: Arc<RwLock<Vec<NodeInfo>>>,
}

pub trait SuccessorReader {
    fn is_empty(&self) -> Result<bool>;
    fn is_full(&self) -> Result<bool>;
    fn get(&self, index: usize) -> Result<Option<NodeInfo>>;
    fn len(&self) -> Result<usize>;
    /// The immediate successor, `None` when the list is empty.
    fn min(&self) -> Result<Option<NodeInfo>>;
    fn max(&self) -> Result<Option<NodeInfo>>;
    fn list(&self) -> Result<Vec<NodeInfo>>;
    fn contains(&self, id: RingId) -> Result<bool>;
}

pub trait SuccessorWriter {
    fn update(&self, successor: NodeInfo) -> Result<Option<NodeInfo>>;
    fn extend(&self, succ_list: &[NodeInfo]) -> Result<Vec<NodeInfo>>;
    /// Replace the whole list with `head` followed by `tail`.
    /// Tail entries closer than `head` are stale and dropped.
    fn sync(&self, head: NodeInfo, tail: &[NodeInfo]) -> Result<()>;
    fn remove(&self, id: RingId) -> Result<()>;
}

impl SuccessorSeq {
    pub fn new(id: RingId, max: usize) -> Self {
        Self {
            id,
            max,
            successors: Arc::new(RwLock::new(vec![])),
        }
    }

    pub fn successors(&self) -> Result<RwLockReadGuard<Vec<NodeInfo>>> {
        self.successors.read().map_err(|_| Error::DHTSyncLockError)
    }

    fn successors_mut(&self) -> Result<RwLockWriteGuard<Vec<NodeInfo>>> {
        self.successors.write().map_err(|_| Error::DHTSyncLockError)
    }

    /// Calculate bias of the id on the ring.
    pub fn bias(&self, id: RingId) -> BiasId {
        BiasId::new(self.id, id)
    }

    fn normalize(&self, succs: &mut Vec<NodeInfo>) {
        let origin = self.id;
        succs.retain(|n| n.ring_id() != origin);
        succs.sort_by_key(|n| n.ring_id() - origin);
        succs.dedup();
        succs.truncate(self.max);
    }
}

impl SuccessorReader for SuccessorSeq {
    fn contains(&self, id: RingId) -> Result<bool> {
        let succs = self.successors()?;
        Ok(succs.iter().any(|n| n.ring_id() == id))
    }

    fn is_empty(&self) -> Result<bool> {
        let succs = self.successors()?;
        Ok(succs.is_empty())
    }

    fn is_full(&self) -> Result<bool> {
        let succs = self.successors()?;
        Ok(succs.len() >= self.max)
    }

    fn get(&self, index: usize) -> Result<Option<NodeInfo>> {
        let succs = self.successors()?;
        Ok(succs.get(index).cloned())
    }

    fn len(&self) -> Result<usize> {
        let succs = self.successors()?;
        Ok(succs.len())
    }

    fn min(&self) -> Result<Option<NodeInfo>> {
        self.get(0)
    }

    fn max(&self) -> Result<Option<NodeInfo>> {
        let succs = self.successors()?;
        Ok(succs.last().cloned())
    }

    fn list(&self) -> Result<Vec<NodeInfo>> {
        let succs = self.successors()?;
        Ok(succs.clone())
    }
}

impl SuccessorWriter for SuccessorSeq {
    fn update(&self, successor: NodeInfo) -> Result<Option<NodeInfo>> {
        if self.contains(successor.ring_id())? || successor.ring_id() == self.id {
            return Ok(None);
        }

        if let Some(max) = self.max()? {
            if self.bias(successor.ring_id()) >= self.bias(max.ring_id()) && self.is_full()? {
                return Ok(None);
            }
        }

        let mut succs = self.successors_mut()?;
        succs.push(successor.clone());
        self.normalize(&mut succs);
        if succs.contains(&successor) {
            Ok(Some(successor))
        } else {
            Ok(None)
        }
    }

    fn extend(&self, succ_list: &[NodeInfo]) -> Result<Vec<NodeInfo>> {
        let mut ret = vec![];
        for s in succ_list {
            if let Some(r) = self.update(s.clone())? {
                ret.push(r);
            }
        }
        Ok(ret)
    }

    fn sync(&self, head: NodeInfo, tail: &[NodeInfo]) -> Result<()> {
        let (origin, h) = (self.id, head.ring_id());
        let mut list = vec![head];
        list.extend(
            tail.iter()
                .filter(|n| !n.ring_id().is_in_interval(&origin, &h))
                .cloned(),
        );
        let mut succs = self.successors_mut()?;
        self.normalize(&mut list);
        *succs = list;
        Ok(())
    }

    fn remove(&self, id: RingId) -> Result<()> {
        let mut succs = self.successors_mut()?;
        succs.retain(|v| v.ring_id() != id);
        Ok(())
    }
}
