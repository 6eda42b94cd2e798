//! Serializable snapshots of a node, for diagnostics.

use serde::Deserialize;
use serde::Serialize;

use crate::dht::NodeInfo;
use crate::dht::PeerRing;
use crate::error::Result;
use crate::node::LocalNode;
use crate::node::NodeState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub peer_id: String,
    pub ring_id: String,
    pub state: NodeState,
    pub dht: DHTInspect,
    /// Number of keys owned.
    pub keys: u32,
    /// Number of keys held as copies for predecessors.
    #[serde(default)]
    pub replicas: u32,
    /// Peer ids of the open connections.
    pub connections: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DHTInspect {
    #[serde(default)]
    pub predecessor: Option<String>,
    pub successors: Vec<String>,
    /// `(member, first slot, last slot)`, runs of equal entries merged.
    pub finger_table: Vec<(Option<String>, usize, usize)>,
}

impl NodeStatus {
    pub async fn inspect(node: &LocalNode) -> Result<Self> {
        let mut connections = node.factory().connection_ids();
        connections.sort();
        Ok(Self {
            peer_id: node.get_peer_id().to_string(),
            ring_id: node.ring_id().to_string(),
            state: node.state()?,
            dht: DHTInspect::inspect(node.ring())?,
            keys: node.store().count().await?,
            replicas: node.replicas().count().await?,
            connections,
        })
    }
}

impl DHTInspect {
    pub fn inspect(dht: &PeerRing) -> Result<Self> {
        let name = |n: &NodeInfo| n.peer_id().to_string();
        let finger_table = dht
            .lock_finger()?
            .compressed()
            .into_iter()
            .map(|(start, end, n)| (n.as_ref().map(name), start, end))
            .collect();
        Ok(Self {
            predecessor: dht.predecessor()?.as_ref().map(name),
            successors: dht.successors()?.iter().map(name).collect(),
            finger_table,
        })
    }
}
