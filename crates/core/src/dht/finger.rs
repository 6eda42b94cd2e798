#![warn(missing_docs)]
use std::ops::Index;

use serde::Serialize;

use super::id::RingId;
use super::types::NodeInfo;

/// Finger table of Chord DHT.
/// Entry `k` references the first known member at or after `id + 2^k`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FingerTable {
    id: RingId,
    size: usize,
    finger: Vec<Option<NodeInfo>>,
}

impl FingerTable {
    /// builder
    pub fn new(id: RingId, size: usize) -> Self {
        Self {
            id,
            size,
            finger: vec![None; size],
        }
    }

    /// is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get first element from Finger Table
    pub fn first(&self) -> Option<NodeInfo> {
        self.finger.iter().flatten().next().cloned()
    }

    /// getter
    pub fn get(&self, index: usize) -> Option<NodeInfo> {
        self.finger.get(index).cloned().flatten()
    }

    /// Ring position that slot `index` starts at.
    pub fn start(&self, index: usize) -> RingId {
        self.id.add_power_of_two(index)
    }

    /// setter
    pub fn set(&mut self, index: usize, node: NodeInfo) {
        tracing::debug!("set finger table index: {} node: {}", index, node);
        if index >= self.finger.len() {
            tracing::error!("set finger index out of range, index: {}", index);
            return;
        }
        if node.ring_id() == self.id {
            tracing::debug!("set finger table with self id, ignore it");
            return;
        }
        self.finger[index] = Some(node);
    }

    /// Set slot `index` to `node`, then every following slot whose start lies in `(id, node]`.
    /// Returns the next slot left to resolve.
    pub fn set_and_fill(&mut self, index: usize, node: NodeInfo) -> usize {
        let mut next = index + 1;
        while next < self.size
            && self
                .start(next)
                .is_in_half_open_interval(&self.id, &node.ring_id())
        {
            next += 1;
        }
        for k in index..next {
            self.set(k, node.clone());
        }
        next
    }

    /// remove a node from dht finger table
    pub fn remove(&mut self, id: RingId) {
        let indexes: Vec<usize> = self
            .finger
            .iter()
            .enumerate()
            .filter(|(_, x)| x.as_ref().map(|n| n.ring_id()) == Some(id))
            .map(|(k, _)| k)
            .collect();

        if let (Some(&first_idx), Some(&last_idx)) = (indexes.first(), indexes.last()) {
            let end_idx = last_idx + 1;
            // Update to the entry following the last removed one, or None.
            let fix = self.finger.get(end_idx).cloned().flatten();
            for idx in first_idx..end_idx {
                self.finger[idx] = fix.clone();
            }
        }
    }

    /// Record a newly seen member in every slot it is a better fit for.
    pub fn join(&mut self, node: &NodeInfo) {
        if node.ring_id() == self.id {
            return;
        }
        let bias = node.ring_id().bias(self.id);

        for k in 0..self.size {
            if bias.pos() < RingId::power_of_two(k) {
                continue;
            }

            if let Some(v) = &self.finger[k] {
                if bias > v.ring_id().bias(self.id) {
                    continue;
                }
            }

            self.finger[k] = Some(node.clone());
        }
    }

    /// Check finger contains the node
    pub fn contains(&self, id: RingId) -> bool {
        self.finger.iter().flatten().any(|n| n.ring_id() == id)
    }

    /// Distinct fingers, highest slot first, that lie strictly between self and `id`.
    pub fn preceding(&self, id: RingId) -> Vec<NodeInfo> {
        let mut ret: Vec<NodeInfo> = vec![];
        for n in self.finger.iter().rev().flatten() {
            if n.ring_id().is_in_interval(&self.id, &id) && !ret.contains(n) {
                ret.push(n.clone());
            }
        }
        ret
    }

    /// get length of finger
    pub fn len(&self) -> usize {
        self.finger.iter().flatten().count()
    }

    /// get finger list
    pub fn list(&self) -> &Vec<Option<NodeInfo>> {
        &self.finger
    }

    /// Run length form of the table: `(first slot, last slot, entry)`.
    pub fn compressed(&self) -> Vec<(usize, usize, Option<NodeInfo>)> {
        let mut ret: Vec<(usize, usize, Option<NodeInfo>)> = vec![];
        for (k, entry) in self.finger.iter().enumerate() {
            match ret.last_mut() {
                Some((_, end, last)) if last == entry => *end = k,
                _ => ret.push((k, k, entry.clone())),
            }
        }
        ret
    }

    #[cfg(test)]
    pub fn reset_finger(&mut self) {
        self.finger = vec![None; self.size]
    }
}

impl Index<usize> for FingerTable {
    type Output = Option<NodeInfo>;
    fn index(&self, index: usize) -> &Self::Output {
        self.finger.get(index).unwrap_or(&None)
    }
}
