use std::sync::Arc;
use std::sync::Mutex;

use chordring_transport::connections::MemoryTransport;
use chordring_transport::core::transport::TransportConfig;

use crate::chord::Chord;
use crate::error::Error;
use crate::error::Result;
use crate::node::NodeState;
use crate::tests::default::is_ring_converged;
use crate::tests::default::manual_config;
use crate::tests::default::prepare_node;
use crate::tests::default::prepare_ring;
use crate::tests::default::sorted;
use crate::tests::default::stabilize_all;
use crate::transport::SharedTransport;

#[tokio::test]
async fn test_join_unreachable_bootstrap() -> Result<()> {
    let a = prepare_node(&manual_config());

    let ret = a.node.join("nobody-listens-here").await;
    assert!(matches!(ret, Err(Error::UnreachablePeer(_))), "{ret:?}");
    assert_eq!(a.node.state()?, NodeState::Fresh);

    // the instance is still usable
    a.node.create()?;
    assert_eq!(a.node.state()?, NodeState::Active);
    Ok(())
}

#[tokio::test]
async fn test_join_rejects_bad_bootstrap() -> Result<()> {
    let a = prepare_node(&manual_config());
    assert!(matches!(a.node.join("").await, Err(Error::InvalidArgument(_))));
    let me = a.node.get_peer_id().to_string();
    assert!(matches!(a.node.join(&me).await, Err(Error::InvalidArgument(_))));

    a.node.create()?;
    assert!(matches!(a.node.create(), Err(Error::InvalidState(_))));
    Ok(())
}

#[tokio::test]
async fn test_facade_join_failure_then_retry() -> Result<()> {
    let config = manual_config();
    let mut bootstrap = Chord::new(config.clone());
    bootstrap.create().await?;
    let bootstrap_id = bootstrap.get_peer_id().unwrap().to_string();

    let mut chord = Chord::new(config);
    assert!(matches!(
        chord.join("nobody-listens-here").await,
        Err(Error::UnreachablePeer(_))
    ));
    assert!(chord.node().is_none());

    chord.join(&bootstrap_id).await?;
    chord.insert("k", serde_json::json!("v")).await?;
    assert_eq!(bootstrap.retrieve("k").await?, vec![serde_json::json!("v")]);

    let status = chord.get_statuses().await?;
    assert_eq!(status.state, NodeState::Active);
    assert_eq!(status.dht.successors, vec![bootstrap_id]);
    Ok(())
}

#[tokio::test]
async fn test_silent_failure_is_healed() -> Result<()> {
    let nodes = prepare_ring(4, &manual_config()).await;
    let crashed = &nodes[2];
    crashed.transport.isolate();

    let rest = vec![&nodes[0], &nodes[1], &nodes[3]];
    let mut ordered = rest.clone();
    ordered.sort_by_key(|t| t.info().ring_id());

    for _ in 0..10 {
        if is_ring_converged(&ordered) {
            break;
        }
        stabilize_all(&nodes, 1).await;
    }
    assert!(is_ring_converged(&ordered));
    // successor lists are copied along the ring, one hop per round
    stabilize_all(&nodes, 3).await;

    for t in &rest {
        assert!(!t.node.successors()?.contains(crashed.info()));
        // stale fingers are dropped by the lookups that hit them
        let mut found = None;
        for _ in 0..5 {
            if let Ok(succ) = t.node.find_successor(crashed.info().ring_id()).await {
                found = Some(succ);
                break;
            }
        }
        let succ = found.expect("lookup of the crashed position");
        assert_ne!(succ.info(), crashed.info());
    }
    Ok(())
}

#[tokio::test]
async fn test_custom_transport_provider() -> Result<()> {
    let built: Arc<Mutex<Vec<Arc<MemoryTransport>>>> = Arc::new(Mutex::new(vec![]));
    let slot = built.clone();
    let mut chord = Chord::with_transport_provider(
        manual_config(),
        Arc::new(move |config: &TransportConfig| -> Result<SharedTransport> {
            let transport = Arc::new(MemoryTransport::new(config)?);
            slot.lock().unwrap().push(transport.clone());
            Ok(transport as SharedTransport)
        }),
    );
    chord.create().await?;
    assert_eq!(built.lock().unwrap().len(), 1);
    chord.leave().await?;
    Ok(())
}

#[tokio::test]
async fn test_join_through_any_member() -> Result<()> {
    let mut nodes = prepare_ring(2, &manual_config()).await;
    let late = prepare_node(&manual_config());
    late.node.join(nodes[1].node.get_peer_id()).await?;
    nodes.push(late);

    for _ in 0..10 {
        if is_ring_converged(&sorted(&nodes)) {
            break;
        }
        stabilize_all(&nodes, 1).await;
    }
    assert!(is_ring_converged(&sorted(&nodes)));
    Ok(())
}

/// Deterministic choices for the churn sequence.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: usize) -> usize {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 33) as usize) % bound
    }
}

#[tokio::test]
async fn test_ring_converges_under_churn() -> Result<()> {
    let config = manual_config();
    let mut nodes = prepare_ring(3, &config).await;
    let mut live: Vec<usize> = (0..nodes.len()).collect();
    let mut rng = Lcg(0x5eed);

    for step in 0..10 {
        let op = if live.len() <= 3 { 0 } else { rng.next(3) };
        match op {
            0 => {
                let t = prepare_node(&config);
                let mut joined = false;
                for _ in 0..3 {
                    let via = live[rng.next(live.len())];
                    if t.node.join(nodes[via].node.get_peer_id()).await.is_ok() {
                        joined = true;
                        break;
                    }
                }
                assert!(joined, "step {step}: join");
                live.push(nodes.len());
                nodes.push(t);
            }
            1 => {
                let i = live.remove(rng.next(live.len()));
                println!("step {step}: isolate {}", nodes[i].info());
                nodes[i].transport.isolate();
            }
            _ => {
                let i = live.remove(rng.next(live.len()));
                println!("step {step}: leave {}", nodes[i].info());
                nodes[i].node.leave().await?;
                assert_eq!(nodes[i].node.state()?, NodeState::Left);
            }
        }

        let mut ordered: Vec<_> = live.iter().map(|&i| &nodes[i]).collect();
        ordered.sort_by_key(|t| t.info().ring_id());
        for _ in 0..20 {
            if is_ring_converged(&ordered) {
                break;
            }
            stabilize_all(&nodes, 1).await;
        }
        assert!(is_ring_converged(&ordered), "step {step}: ring of {}", live.len());
        // let the successor lists catch up before the next change
        stabilize_all(&nodes, live.len()).await;
    }
    Ok(())
}
