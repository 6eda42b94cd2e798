use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chordring_transport::connections::MemoryTransport;
use chordring_transport::core::callback::CallbackError;
use chordring_transport::core::callback::TransportCallback;
use chordring_transport::core::transport::TransportConfig;
use serde_json::json;
use tokio::sync::mpsc;

use crate::config::ChordConfig;
use crate::dht::RingId;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::message::Envelope;
use crate::message::Operation;
use crate::tests::default::manual_config;
use crate::tests::default::prepare_node;
use crate::transport::ChordTransport;

/// A bare peer that records the envelopes it receives.
struct Recorder {
    tx: mpsc::UnboundedSender<Envelope>,
}

#[async_trait]
impl TransportCallback for Recorder {
    async fn on_message(&self, _cid: &str, msg: &[u8]) -> std::result::Result<(), CallbackError> {
        let envelope = Envelope::from_bytes(msg)?;
        let _ = self.tx.send(envelope);
        Ok(())
    }
}

fn prepare_raw_peer() -> (Arc<MemoryTransport>, mpsc::UnboundedReceiver<Envelope>) {
    let config = TransportConfig {
        connect_rate_limit: Duration::ZERO,
        ..Default::default()
    };
    let transport = Arc::new(MemoryTransport::new(&config).unwrap());
    let (tx, rx) = mpsc::unbounded_channel();
    ChordTransport::set_callback(transport.as_ref(), Arc::new(Recorder { tx }));
    (transport, rx)
}

async fn next_response(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("response in time")
        .expect("channel open")
}

#[tokio::test]
async fn test_unsupported_operation_is_answered() -> Result<()> {
    let a = prepare_node(&manual_config());
    a.node.create()?;
    let (raw, mut rx) = prepare_raw_peer();
    let target = a.node.get_peer_id();

    let req = Envelope::Request {
        id: 1,
        op: "shutdown".to_string(),
        args: vec![],
    };
    raw.send(target, req.to_bytes()?).await?;
    assert_eq!(
        next_response(&mut rx).await,
        Envelope::failure(1, ErrorKind::UnsupportedOperation)
    );

    // bad arguments are reported too
    let req = Envelope::request(2, Operation::FindSuccessor, vec![json!("not hex")]);
    raw.send(target, req.to_bytes()?).await?;
    assert_eq!(
        next_response(&mut rx).await,
        Envelope::failure(2, ErrorKind::MalformedIdentifier)
    );

    let req = Envelope::request(3, Operation::Notify, vec![]);
    raw.send(target, req.to_bytes()?).await?;
    assert_eq!(
        next_response(&mut rx).await,
        Envelope::failure(3, ErrorKind::InvalidArgument)
    );

    // the dispatcher keeps serving
    let req = Envelope::request(4, Operation::FindSuccessor, vec![json!(a.info().ring_id())]);
    raw.send(target, req.to_bytes()?).await?;
    assert_eq!(
        next_response(&mut rx).await,
        Envelope::success(4, json!(a.info()))
    );

    let req = Envelope::request(5, Operation::Ping, vec![]);
    raw.send(target, req.to_bytes()?).await?;
    assert_eq!(next_response(&mut rx).await, Envelope::success(5, json!(true)));

    // null is not a storable value
    let key = json!(RingId::create("k"));
    let req = Envelope::request(6, Operation::Insert, vec![key.clone(), json!(null)]);
    raw.send(target, req.to_bytes()?).await?;
    assert_eq!(
        next_response(&mut rx).await,
        Envelope::failure(6, ErrorKind::InvalidArgument)
    );
    let req = Envelope::request(7, Operation::Remove, vec![key]);
    raw.send(target, req.to_bytes()?).await?;
    assert_eq!(
        next_response(&mut rx).await,
        Envelope::failure(7, ErrorKind::InvalidArgument)
    );
    assert_eq!(a.node.store().count().await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_request_times_out() -> Result<()> {
    let a = prepare_node(&manual_config());
    a.node.create()?;
    let (raw, mut rx) = prepare_raw_peer();
    let silent = a
        .node
        .factory()
        .create_by_peer_id(raw.peer_id())
        .unwrap();

    let ret = silent.ping().await;
    assert!(matches!(ret, Err(Error::RequestTimedOut(_))), "{ret:?}");
    assert!(ret.unwrap_err().is_peer_failure());

    // the request arrived, answering it now is too late
    let Envelope::Request { id, op, .. } = next_response(&mut rx).await else {
        panic!("expected a request");
    };
    assert_eq!(op, "ping");
    let late = Envelope::success(id, json!(true));
    raw.send(a.node.get_peer_id(), late.to_bytes()?).await?;

    // a response nobody waits for is dropped, the node still works
    let stray = Envelope::success(9999, json!(true));
    raw.send(a.node.get_peer_id(), stray.to_bytes()?).await?;
    let succ = a.node.find_successor(a.info().ring_id()).await?;
    assert!(succ.is_local());
    Ok(())
}

#[tokio::test]
async fn test_request_deadline_covers_dialing() -> Result<()> {
    let config = ChordConfig::builder()
        .connect_rate_limit_ms(2000)
        .stabilize_interval_ms(3_600_000)
        .fix_fingers_interval_ms(3_600_000)
        .check_predecessor_interval_ms(3_600_000)
        .request_timeout_ms(300)
        .connection_open_timeout_ms(300)
        .build()?;
    let a = prepare_node(&config);
    a.node.create()?;
    let (x, _x_rx) = prepare_raw_peer();
    let (y, _y_rx) = prepare_raw_peer();

    let first = a.node.factory().create_by_peer_id(x.peer_id()).unwrap();
    let ret = first.ping().await;
    assert!(matches!(ret, Err(Error::RequestTimedOut(_))), "{ret:?}");

    // the second dial is throttled for far longer than the request may take
    let second = a.node.factory().create_by_peer_id(y.peer_id()).unwrap();
    let start = tokio::time::Instant::now();
    let ret = second.ping().await;
    assert!(matches!(ret, Err(Error::RequestTimedOut(_))), "{ret:?}");
    assert!(start.elapsed() < Duration::from_millis(1000), "{:?}", start.elapsed());
    assert_eq!(a.node.factory().handler().pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_departed_member_is_unreachable() -> Result<()> {
    let a = prepare_node(&manual_config());
    let b = prepare_node(&manual_config());
    a.node.create()?;
    b.node.create()?;

    let handle = b.node.factory().create(a.info()).unwrap();
    handle.ping().await?;

    // a member that left no longer answers, and is reported unreachable
    a.node.leave().await?;
    let ret = handle.ping().await;
    assert!(matches!(ret, Err(Error::UnreachablePeer(_))), "{ret:?}");
    Ok(())
}
