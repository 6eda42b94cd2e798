//! DHT types about `PeerRing`.
#![warn(missing_docs)]

use derivative::Derivative;
use serde::Deserialize;
use serde::Serialize;

use super::id::RingId;
use crate::error::Result;

/// Chord is a distributed hash table (DHT) algorithm that is designed to efficiently
/// distribute data across peer-to-peer network nodes. You may want to browse its
/// [wiki](https://en.wikipedia.org/wiki/Chord_(peer-to-peer)) before you read this.
///
/// The implementor only holds ring state. Whenever a step needs another member,
/// it returns an `Action` describing the remote call, and the caller performs
/// it and feeds the answer back.
pub trait Chord<Action> {
    /// Prepare to join the ring that `bootstrap` is a member of.
    fn join(&self, bootstrap: &NodeInfo) -> Result<Action>;

    /// Ask the ring for the member responsible for `id`.
    /// May return a remote action when the answer is known by another member.
    fn find_successor(&self, id: RingId) -> Result<Action>;

    /// A member believes it might be our predecessor.
    /// Returns the member when it was adopted.
    fn notify(&self, node: &NodeInfo) -> Result<Option<NodeInfo>>;

    /// Continue stabilization with what the successor reported: its predecessor and its
    /// successor list. Returns the notification to send to the (possibly new) successor.
    fn stabilize(&self, succ_pred: Option<NodeInfo>, succ_list: &[NodeInfo]) -> Result<Action>;

    /// Called periodically. Returns the liveness check of the predecessor.
    fn check_predecessor(&self) -> Result<Action>;
}

/// A ring member: the opaque peer id used by the transport, and the ring id derived from it.
/// Equality, ordering and hashing only look at the ring id.
#[derive(Derivative, Clone, Serialize, Deserialize)]
#[derivative(PartialEq, Eq, Hash, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    #[derivative(PartialEq = "ignore", Hash = "ignore")]
    peer_id: String,
    #[derivative(Debug = "ignore")]
    ring_id: RingId,
}

impl NodeInfo {
    /// Describe the member reachable under `peer_id`.
    pub fn new(peer_id: &str) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            ring_id: RingId::create(peer_id),
        }
    }

    /// The transport level id.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// The position on the ring.
    pub fn ring_id(&self) -> RingId {
        self.ring_id
    }

    /// A descriptor is valid when the peer id is not empty and the ring id is its digest.
    /// Descriptors built with [NodeInfo::new] are always valid, decoded ones may not be.
    pub fn is_valid(&self) -> bool {
        !self.peer_id.is_empty() && self.ring_id == RingId::create(&self.peer_id)
    }
}

impl std::fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}@{}", self.peer_id, self.ring_id)
    }
}
