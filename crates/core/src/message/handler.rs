use std::str::FromStr;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use chordring_transport::core::callback::CallbackError;
use chordring_transport::core::callback::TransportCallback;
use chordring_transport::core::transport::ConnectionState;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::dht::NodeInfo;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::message::types::arg;
use crate::message::types::id_arg;
use crate::message::types::node_arg;
use crate::message::types::optional_node_arg;
use crate::message::types::value_arg;
use crate::message::types::Envelope;
use crate::message::types::KeyEntry;
use crate::message::types::Operation;
use crate::node::LocalNode;
use crate::transport::SharedTransport;

/// An outbound request waiting for its response.
struct Pending {
    peer_id: String,
    tx: oneshot::Sender<Result<Value>>,
}

/// Drops the pending entry of a request however the call ends.
struct PendingGuard<'a> {
    pending: &'a DashMap<u64, Pending>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// RequestHandler correlates outbound requests with their responses and
/// serves the requests other members send to the local node.
pub struct RequestHandler {
    node: Weak<LocalNode>,
    transport: SharedTransport,
    pending: DashMap<u64, Pending>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl RequestHandler {
    /// Create a handler serving `node`. Call [RequestHandler::listen] to receive frames.
    pub fn new(node: Weak<LocalNode>, transport: SharedTransport, timeout: Duration) -> Self {
        Self {
            node,
            transport,
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    /// Register on the transport.
    pub fn listen(self: &Arc<Self>) {
        self.transport.set_callback(Arc::new(HandlerCallback {
            handler: Arc::downgrade(self),
        }));
    }

    /// Number of requests waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send `op` to `peer_id` and wait for the response.
    ///
    /// The deadline covers dialing, sending and waiting for the answer.
    /// Fails with [Error::UnreachablePeer] when the frame cannot be sent or the
    /// connection closes before the answer, with [Error::RequestTimedOut] when the
    /// deadline passes, and with [Error::Remote] when the peer answered with an error.
    pub async fn request(&self, peer_id: &str, op: Operation, args: Vec<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, Pending {
            peer_id: peer_id.to_string(),
            tx,
        });
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        let data = Envelope::request(id, op, args).to_bytes()?;
        tracing::debug!("request {id} {op} -> {peer_id}");
        let exchange = async {
            if let Err(e) = self.transport.send(peer_id, data).await {
                tracing::debug!("failed to send request {id} to {peer_id}: {e}");
                return Err(Error::UnreachablePeer(peer_id.to_string()));
            }
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::UnreachablePeer(peer_id.to_string())),
            }
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!("request {id} {op} to {peer_id} timed out");
                Err(Error::RequestTimedOut(id))
            }
        }
    }

    fn on_frame(self: &Arc<Self>, peer_id: &str, data: &[u8]) -> Result<()> {
        match Envelope::from_bytes(data)? {
            Envelope::Request { id, op, args } => {
                let this = self.clone();
                let peer_id = peer_id.to_string();
                // A handler may itself wait on a response delivered by this same
                // connection, so it must not run on the delivery task.
                tokio::spawn(async move { this.respond(&peer_id, id, &op, args).await });
            }
            Envelope::Response {
                id,
                ok,
                result,
                error,
            } => self.resolve(peer_id, id, ok, result, error),
        }
        Ok(())
    }

    fn resolve(
        &self,
        peer_id: &str,
        id: u64,
        ok: bool,
        result: Option<Value>,
        error: Option<ErrorKind>,
    ) {
        match self.pending.remove_if(&id, |_, p| p.peer_id == peer_id) {
            Some((_, pending)) => {
                let ret = if ok {
                    Ok(result.unwrap_or(Value::Null))
                } else {
                    Err(Error::Remote(error.unwrap_or(ErrorKind::UnreachablePeer)))
                };
                // The caller may have timed out in between.
                let _ = pending.tx.send(ret);
            }
            None => tracing::debug!("discard response {id} from {peer_id}"),
        }
    }

    async fn respond(&self, peer_id: &str, id: u64, op: &str, args: Vec<Value>) {
        let envelope = match self.dispatch(op, &args).await {
            Ok(v) => Envelope::success(id, v),
            Err(e) => {
                tracing::debug!("request {id} {op} from {peer_id} failed: {e}");
                Envelope::failure(id, e.kind())
            }
        };
        let data = match envelope.to_bytes() {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("failed to encode response {id}: {e}");
                return;
            }
        };
        if let Err(e) = self.transport.send(peer_id, data).await {
            tracing::warn!("failed to answer request {id} of {peer_id}: {e}");
        }
    }

    /// Run an inbound request against the local node.
    pub async fn dispatch(&self, op: &str, args: &[Value]) -> Result<Value> {
        let op = Operation::from_str(op)?;
        let node = self.node.upgrade().ok_or(Error::NodeReleased)?;

        match op {
            Operation::FindSuccessor => {
                let id = id_arg(args, 0)?;
                let succ = node.find_successor(id).await?;
                Ok(serde_json::to_value(succ.info())?)
            }
            Operation::GetPredecessor => Ok(serde_json::to_value(node.predecessor()?)?),
            Operation::GetSuccessors => Ok(serde_json::to_value(node.successors()?)?),
            Operation::Notify => {
                node.notify(&node_arg(args, 0)?).await?;
                Ok(Value::Null)
            }
            Operation::Insert => {
                let key = id_arg(args, 0)?;
                node.store_insert(key, value_arg(args, 1)?).await?;
                Ok(Value::Null)
            }
            Operation::Retrieve => {
                let key = id_arg(args, 0)?;
                Ok(Value::Array(node.store_retrieve(key).await?))
            }
            Operation::Remove => {
                let key = id_arg(args, 0)?;
                node.store_remove(key, &value_arg(args, 1)?).await?;
                Ok(Value::Null)
            }
            Operation::InsertEntries => {
                let entries: Vec<KeyEntry> = arg(args, 0)?;
                node.store_entries(entries.into_iter().map(Into::into).collect())
                    .await?;
                Ok(Value::Null)
            }
            Operation::Replicate => {
                let entries: Vec<KeyEntry> = arg(args, 0)?;
                node.store_replicas(entries.into_iter().map(Into::into).collect())
                    .await?;
                Ok(Value::Null)
            }
            Operation::RemoveReplica => {
                let key = id_arg(args, 0)?;
                node.store_remove_replica(key, &value_arg(args, 1)?).await?;
                Ok(Value::Null)
            }
            Operation::Leaving => {
                let leaver = node_arg(args, 0)?;
                let pred = optional_node_arg(args, 1)?;
                let succs: Vec<NodeInfo> = arg(args, 2)?;
                let succs = succs
                    .into_iter()
                    .filter(NodeInfo::is_valid)
                    .collect::<Vec<_>>();
                node.on_leaving(&leaver, pred, &succs)?;
                Ok(Value::Null)
            }
            Operation::Ping => Ok(Value::Bool(true)),
        }
    }

    /// Fail every request waiting on `peer_id`.
    fn fail_pending(&self, peer_id: &str) {
        let ids: Vec<u64> = self
            .pending
            .iter()
            .filter(|p| p.peer_id == peer_id)
            .map(|p| *p.key())
            .collect();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending
                    .tx
                    .send(Err(Error::UnreachablePeer(peer_id.to_string())));
            }
        }
    }

    fn on_peer_closed(&self, peer_id: &str) {
        self.fail_pending(peer_id);
        if let Some(node) = self.node.upgrade() {
            if let Err(e) = node.forget_peer(peer_id) {
                tracing::warn!("failed to drop {peer_id} from ring: {e}");
            }
        }
    }
}

/// Registered on the transport. Holds the handler weakly since the handler owns the transport.
struct HandlerCallback {
    handler: Weak<RequestHandler>,
}

#[async_trait]
impl TransportCallback for HandlerCallback {
    async fn on_message(&self, cid: &str, msg: &[u8]) -> std::result::Result<(), CallbackError> {
        let Some(handler) = self.handler.upgrade() else {
            return Ok(());
        };
        handler.on_frame(cid, msg).map_err(|e| e.into())
    }

    async fn on_connection_state_change(
        &self,
        cid: &str,
        state: ConnectionState,
    ) -> std::result::Result<(), CallbackError> {
        let Some(handler) = self.handler.upgrade() else {
            return Ok(());
        };
        match state {
            ConnectionState::Connected => tracing::debug!("connected with {cid}"),
            ConnectionState::Closed | ConnectionState::Failed | ConnectionState::Disconnected => {
                tracing::info!("connection with {cid} is {state:?}");
                handler.on_peer_closed(cid);
            }
            _ => {}
        }
        Ok(())
    }
}
