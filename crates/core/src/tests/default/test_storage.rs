use serde_json::json;

use crate::dht::RingId;
use crate::error::Result;
use crate::tests::default::expected_owner;
use crate::tests::default::is_ring_converged;
use crate::tests::default::manual_config;
use crate::tests::default::prepare_node;
use crate::tests::default::prepare_ring;
use crate::tests::default::settle;
use crate::tests::default::sorted;
use crate::tests::default::stabilize_all;

const KEYS: [&str; 8] = ["k", "apple", "banana", "cherry", "durian", "elder", "fig", "grape"];

#[tokio::test]
async fn test_insert_retrieve_remove_on_single_node() -> Result<()> {
    let a = prepare_node(&manual_config());
    a.node.create()?;

    a.node.insert("k", json!("v")).await?;
    assert_eq!(a.node.retrieve("k").await?, vec![json!("v")]);
    a.node.remove("k", &json!("v")).await?;
    assert!(a.node.retrieve("k").await?.is_empty());
    assert!(a.node.retrieve("never inserted").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_insert_is_idempotent_across_the_ring() -> Result<()> {
    let nodes = prepare_ring(2, &manual_config()).await;
    let (a, b) = (&nodes[0], &nodes[1]);

    for key in KEYS {
        a.node.insert(key, json!("v")).await?;
        b.node.insert(key, json!("v")).await?;
        a.node.insert(key, json!({"n": 1})).await?;
    }
    for key in KEYS {
        assert_eq!(b.node.retrieve(key).await?, vec![json!("v"), json!({"n": 1})]);
        assert_eq!(a.node.retrieve(key).await?, vec![json!("v"), json!({"n": 1})]);
    }

    for key in KEYS {
        b.node.remove(key, &json!("v")).await?;
        // removing an absent value is a no-op
        a.node.remove(key, &json!("v")).await?;
    }
    for key in KEYS {
        assert_eq!(a.node.retrieve(key).await?, vec![json!({"n": 1})]);
    }
    Ok(())
}

#[tokio::test]
async fn test_keys_live_on_their_owner() -> Result<()> {
    let nodes = prepare_ring(3, &manual_config()).await;
    let ordered = sorted(&nodes);

    for key in KEYS {
        nodes[0].node.insert(key, json!(key)).await?;
    }
    for key in KEYS {
        let id = RingId::create(key);
        let owner = expected_owner(&ordered, id);
        for t in &nodes {
            let local = t.node.store().retrieve(id).await?;
            if t.info() == &owner {
                assert_eq!(local, vec![json!(key)]);
            } else {
                assert!(local.is_empty());
            }
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_concurrent_requests_do_not_cross() -> Result<()> {
    let nodes = prepare_ring(3, &manual_config()).await;
    for key in KEYS {
        nodes[1].node.insert(key, json!(key)).await?;
    }

    let node = nodes[2].node.clone();
    let lookups = KEYS.iter().map(|key| {
        let node = node.clone();
        async move { (key, node.retrieve(key).await) }
    });
    for (key, values) in futures::future::join_all(lookups).await {
        assert_eq!(values?, vec![json!(key)]);
    }
    Ok(())
}

#[tokio::test]
async fn test_joining_node_takes_over_its_keys() -> Result<()> {
    let config = manual_config();
    let a = prepare_node(&config);
    a.node.create()?;
    for key in KEYS {
        a.node.insert(key, json!(key)).await?;
    }
    assert_eq!(a.node.store().count().await?, KEYS.len() as u32);

    let b = prepare_node(&config);
    b.node.join(a.node.get_peer_id()).await?;
    let nodes = vec![a, b];
    stabilize_all(&nodes, 2).await;
    let ordered = sorted(&nodes);
    assert!(is_ring_converged(&ordered));

    for key in KEYS {
        let id = RingId::create(key);
        let owner = expected_owner(&ordered, id);
        for t in &nodes {
            let local = t.node.store().retrieve(id).await?;
            assert_eq!(!local.is_empty(), t.info() == &owner, "key {key}");
        }
        assert_eq!(nodes[1].node.retrieve(key).await?, vec![json!(key)]);
    }
    Ok(())
}

#[tokio::test]
async fn test_leave_hands_keys_to_successor() -> Result<()> {
    let nodes = prepare_ring(3, &manual_config()).await;
    for key in KEYS {
        nodes[0].node.insert(key, json!(key)).await?;
    }

    let leaver = &nodes[1];
    leaver.node.leave().await?;
    assert_eq!(leaver.node.state()?, crate::node::NodeState::Left);
    assert_eq!(leaver.node.store().count().await?, 0);
    settle().await;

    let rest = vec![&nodes[0], &nodes[2]];
    // the leaving notice closes the ring without waiting for failure detection
    for t in &rest {
        assert!(!t.node.successors()?.contains(leaver.info()));
        assert_ne!(t.node.predecessor()?.as_ref(), Some(leaver.info()));
    }
    let total = nodes[0].node.store().count().await? + nodes[2].node.store().count().await?;
    assert_eq!(total, KEYS.len() as u32);

    stabilize_all(&nodes, 2).await;
    let mut ordered = rest.clone();
    ordered.sort_by_key(|t| t.info().ring_id());
    assert!(is_ring_converged(&ordered));

    for key in KEYS {
        assert_eq!(nodes[0].node.retrieve(key).await?, vec![json!(key)]);
        assert_eq!(nodes[2].node.retrieve(key).await?, vec![json!(key)]);
    }
    Ok(())
}

#[tokio::test]
async fn test_keys_survive_a_crashed_owner() -> Result<()> {
    let nodes = prepare_ring(4, &manual_config()).await;
    let ordered = sorted(&nodes);
    let id = RingId::create("replicated-key");
    let owner_info = expected_owner(&ordered, id);

    nodes[0].node.insert("replicated-key", json!("v")).await?;
    nodes[1].node.insert("replicated-key", json!("w")).await?;
    nodes[2].node.remove("replicated-key", &json!("w")).await?;

    let mut holders = 0;
    for t in &nodes {
        if t.info() == &owner_info {
            assert_eq!(t.node.store().retrieve(id).await?, vec![json!("v")]);
            assert!(t.node.replicas().retrieve(id).await?.is_empty());
        } else if t.node.replicas().retrieve(id).await? == vec![json!("v")] {
            holders += 1;
        }
    }
    // R = 3: the owner and two successors
    assert_eq!(holders, 2);

    let owner = nodes.iter().find(|t| t.info() == &owner_info).unwrap();
    owner.transport.isolate();
    let mut rest: Vec<&_> = nodes.iter().filter(|t| t.info() != &owner_info).collect();
    rest.sort_by_key(|t| t.info().ring_id());
    for _ in 0..10 {
        if is_ring_converged(&rest) {
            break;
        }
        stabilize_all(&nodes, 1).await;
    }
    assert!(is_ring_converged(&rest));
    stabilize_all(&nodes, 3).await;

    for t in &rest {
        let mut found = None;
        for _ in 0..5 {
            if let Ok(values) = t.node.retrieve("replicated-key").await {
                found = Some(values);
                break;
            }
        }
        assert_eq!(found, Some(vec![json!("v")]), "retrieve on {}", t.info());
    }
    Ok(())
}
