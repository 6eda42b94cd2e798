use std::time::Duration;

use tokio::time::Instant;

use crate::dht::RingId;
use crate::error::Error;
use crate::error::Result;
use crate::tests::default::expected_owner;
use crate::tests::default::is_ring_converged;
use crate::tests::default::manual_config;
use crate::tests::default::prepare_node;
use crate::tests::default::prepare_ring;
use crate::tests::default::sorted;
use crate::tests::default::stabilize_all;

#[tokio::test]
async fn test_single_node_owns_every_id() -> Result<()> {
    let a = prepare_node(&manual_config());
    a.node.create()?;

    for seed in ["", "a", "b", "some key"] {
        let succ = a.node.find_successor(RingId::create(seed)).await?;
        assert!(succ.is_local());
        assert_eq!(succ.info(), a.info());
    }
    let succ = a.node.find_successor(a.info().ring_id()).await?;
    assert!(succ.is_local());
    Ok(())
}

#[tokio::test]
async fn test_second_node_joins() -> Result<()> {
    let config = manual_config();
    let a = prepare_node(&config);
    let b = prepare_node(&config);
    a.node.create()?;
    b.node.join(a.node.get_peer_id()).await?;

    // the first stabilization of b already notified a
    assert_eq!(a.node.predecessor()?.as_ref(), Some(b.info()));
    assert_eq!(b.node.ring().successor()?, *a.info());

    let nodes = vec![a, b];
    stabilize_all(&nodes, 2).await;
    let (a, b) = (&nodes[0], &nodes[1]);
    assert!(is_ring_converged(&sorted(&nodes)));

    let succ = a.node.find_successor(b.info().ring_id()).await?;
    assert_eq!(succ.info(), b.info());
    assert!(!succ.is_local());

    let succ = b.node.find_successor(b.info().ring_id()).await?;
    assert_eq!(succ.info(), b.info());
    assert!(succ.is_local());

    assert_eq!(a.node.successors()?, vec![b.info().clone()]);
    assert_eq!(b.node.successors()?, vec![a.info().clone()]);
    Ok(())
}

#[tokio::test]
async fn test_three_nodes_converge() -> Result<()> {
    let nodes = prepare_ring(3, &manual_config()).await;
    let ordered = sorted(&nodes);

    for (i, t) in ordered.iter().enumerate() {
        let next = ordered[(i + 1) % 3].info().clone();
        let after = ordered[(i + 2) % 3].info().clone();
        assert_eq!(t.node.successors()?, vec![next, after]);
    }

    for seed in ["alpha", "beta", "gamma", "delta", "epsilon", "zeta"] {
        let key = RingId::create(seed);
        let owner = expected_owner(&ordered, key);
        for t in &nodes {
            let succ = t.node.find_successor(key).await?;
            assert_eq!(succ.info(), &owner, "lookup of {seed} from {}", t.info());
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_fix_fingers_fill_the_table() -> Result<()> {
    let nodes = prepare_ring(4, &manual_config()).await;
    let ordered = sorted(&nodes);

    for (i, t) in ordered.iter().enumerate() {
        let finger = t.node.ring().lock_finger()?.clone();
        let next = ordered[(i + 1) % 4].info();
        assert_eq!(finger.first().as_ref(), Some(next));
        for k in 0..finger.size() {
            // every resolved slot holds the first member at or after its start
            if let Some(n) = finger.get(k) {
                assert_eq!(n, expected_owner(&ordered, finger.start(k)));
            }
        }
    }

    let status = ordered[0].node.get_statuses().await?;
    assert_eq!(status.peer_id, ordered[0].node.get_peer_id());
    assert_eq!(status.dht.successors.len(), 3);
    assert_eq!(
        status.dht.predecessor.as_deref(),
        Some(ordered[3].node.get_peer_id())
    );
    assert!(!status.connections.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_lookup_gives_up_after_alternate_route() -> Result<()> {
    let nodes = prepare_ring(4, &manual_config()).await;
    let ordered = sorted(&nodes);
    let querier = ordered[0];
    for t in &ordered[1..] {
        t.transport.isolate();
    }
    // the predecessor id is never owned by the successor, so the lookup has to hop
    let target = ordered[3].info().ring_id();

    let start = Instant::now();
    let ret = querier.node.find_successor(target).await;
    assert!(matches!(ret, Err(Error::LookupFailed(_))));
    // two hops, each a timed out lookup and a timed out ping
    assert!(start.elapsed() >= Duration::from_millis(1200));
    // both hops were dropped from the routing state
    assert_eq!(querier.node.successors()?.len(), 1);
    Ok(())
}
