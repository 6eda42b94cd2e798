use std::sync::Arc;
use std::time::Duration;

use chordring_transport::connections::MemoryTransport;
use chordring_transport::core::transport::TransportConfig;

use crate::config::ChordConfig;
use crate::dht::NodeInfo;
use crate::dht::RingId;
use crate::node::LocalNode;

mod test_join;
mod test_request_handler;
mod test_ring;
mod test_storage;

pub struct TestNode {
    pub node: Arc<LocalNode>,
    pub transport: Arc<MemoryTransport>,
}

impl TestNode {
    pub fn info(&self) -> &NodeInfo {
        self.node.info()
    }
}

/// Maintenance loops effectively off, tests drive the routines themselves.
pub fn manual_config() -> ChordConfig {
    ChordConfig::builder()
        .connect_rate_limit_ms(0)
        .stabilize_interval_ms(3_600_000)
        .fix_fingers_interval_ms(3_600_000)
        .check_predecessor_interval_ms(3_600_000)
        .request_timeout_ms(300)
        .connection_open_timeout_ms(300)
        .build()
        .unwrap()
}

pub fn prepare_node(config: &ChordConfig) -> TestNode {
    let transport = Arc::new(MemoryTransport::new(&TransportConfig::from(config)).unwrap());
    let node = LocalNode::new(transport.clone(), config);
    println!("node: {}", node.info());
    TestNode { node, transport }
}

/// Create a ring of `n` members, `n` at least 2, and let it converge.
pub async fn prepare_ring(n: usize, config: &ChordConfig) -> Vec<TestNode> {
    let nodes: Vec<TestNode> = (0..n).map(|_| prepare_node(config)).collect();
    nodes[0].node.create().unwrap();
    for t in &nodes[1..] {
        t.node.join(nodes[0].node.get_peer_id()).await.unwrap();
        stabilize_all(&nodes, 2).await;
    }
    for _ in 0..10 {
        if is_ring_converged(&sorted(&nodes)) {
            break;
        }
        stabilize_all(&nodes, 1).await;
    }
    assert!(is_ring_converged(&sorted(&nodes)));
    // successor lists travel one hop per round
    stabilize_all(&nodes, n).await;
    for t in &nodes {
        t.node.fix_fingers().await.unwrap();
    }
    nodes
}

/// Run the maintenance routines of every member that has not left, `rounds` times.
pub async fn stabilize_all(nodes: &[TestNode], rounds: usize) {
    for _ in 0..rounds {
        for t in nodes {
            if t.node.state().unwrap() != crate::node::NodeState::Active {
                continue;
            }
            let _ = t.node.check_predecessor().await;
            let _ = t.node.stabilize().await;
        }
    }
}

/// Members sorted by ring id.
pub fn sorted(nodes: &[TestNode]) -> Vec<&TestNode> {
    let mut ret: Vec<&TestNode> = nodes.iter().collect();
    ret.sort_by_key(|t| t.info().ring_id());
    ret
}

/// The member that should own `key`: the first one at or after it clockwise.
pub fn expected_owner(nodes: &[&TestNode], key: RingId) -> NodeInfo {
    let ids: Vec<&NodeInfo> = nodes.iter().map(|t| t.info()).collect();
    ids.iter()
        .find(|n| n.ring_id() >= key)
        .or_else(|| ids.first())
        .map(|n| (*n).clone())
        .unwrap()
}

/// Whether successor and predecessor pointers of `nodes` form one ring.
pub fn is_ring_converged(nodes: &[&TestNode]) -> bool {
    let n = nodes.len();
    (0..n).all(|i| {
        let next = nodes[(i + 1) % n].info();
        let prev = nodes[(i + n - 1) % n].info();
        let node = &nodes[i].node;
        node.ring().successor().ok().as_ref() == Some(next)
            && node.predecessor().ok().flatten().as_ref() == Some(prev)
    })
}

pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
