use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lazy_static::lazy_static;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::mpsc;

use crate::callback::InnerTransportCallback;
use crate::connection_ref::ConnectionRef;
use crate::core::callback::SharedTransportCallback;
use crate::core::transport::ConnectionInterface;
use crate::core::transport::ConnectionState;
use crate::core::transport::TransportConfig;
use crate::core::transport::TransportInterface;
use crate::core::transport::TransportMessage;
use crate::error::Error;
use crate::error::Result;
use crate::limiter::ConnectLimiter;
use crate::pool::Pool;

/// Length of generated peer ids.
const RANDOM_PEER_ID_LEN: usize = 16;

lazy_static! {
    static ref PEERS: DashMap<String, Weak<MemoryPeer>> = DashMap::new();
}

/// Registry entry of a live [MemoryTransport].
struct MemoryPeer {
    peer_id: String,
    callback: RwLock<Option<SharedTransportCallback>>,
    pool: Pool<MemoryConnection>,
    limiter: ConnectLimiter,
    open_timeout: Duration,
    destroyed: AtomicBool,
    isolated: AtomicBool,
}

impl MemoryPeer {
    fn lookup(peer_id: &str) -> Option<Arc<MemoryPeer>> {
        PEERS.get(peer_id).and_then(|p| p.upgrade())
    }

    fn accepts_frames(&self) -> bool {
        !self.destroyed.load(Ordering::SeqCst) && !self.isolated.load(Ordering::SeqCst)
    }

    fn inner_callback(&self, cid: &str) -> Option<InnerTransportCallback> {
        self.callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .map(|cb| InnerTransportCallback::new(cid, cb))
    }

    async fn notify(&self, cid: &str, state: ConnectionState) {
        if let Some(cb) = self.inner_callback(cid) {
            cb.on_connection_state_change(state).await;
        }
    }

    fn unregister(self: &Arc<Self>) {
        let me = Arc::downgrade(self);
        PEERS.remove_if(&self.peer_id, |_, p| p.ptr_eq(&me));
    }
}

/// One direction of an in-process link.
/// Frames are queued and handed to the remote callback in send order by a delivery task.
pub struct MemoryConnection {
    remote_id: String,
    state: Mutex<ConnectionState>,
    tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
}

impl MemoryConnection {
    fn open(local: &MemoryPeer, remote: &Arc<MemoryPeer>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let target = Arc::downgrade(remote);
        let from = local.peer_id.clone();

        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let Some(target) = target.upgrade() else {
                    break;
                };
                if !target.accepts_frames() {
                    tracing::debug!("frame from {from} dropped by {}", target.peer_id);
                    continue;
                }
                if let Some(cb) = target.inner_callback(&from) {
                    cb.on_message(&frame).await;
                }
            }
        });

        Self {
            remote_id: remote.peer_id.clone(),
            state: Mutex::new(ConnectionState::Connected),
            tx: Mutex::new(Some(tx)),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

#[async_trait]
impl ConnectionInterface for MemoryConnection {
    type Error = Error;

    async fn send_message(&self, msg: TransportMessage) -> Result<()> {
        if self.connection_state() != ConnectionState::Connected {
            return Err(Error::ConnectionClosed(self.remote_id.clone()));
        }
        let data = bincode::serialize(&msg).map(Bytes::from)?;
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match tx.as_ref() {
            Some(tx) => tx
                .send(data)
                .map_err(|_| Error::ConnectionClosed(self.remote_id.clone())),
            None => Err(Error::ConnectionClosed(self.remote_id.clone())),
        }
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn close(&self) -> Result<()> {
        self.set_state(ConnectionState::Closed);
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(())
    }
}

/// [MemoryTransport] connects peers living in the same process.
/// Every transport registers its peer id in a process wide registry, and any
/// other transport can dial it by that id.
pub struct MemoryTransport {
    shared: Arc<MemoryPeer>,
}

impl MemoryTransport {
    /// Register a new transport. A random peer id is used when the config carries none.
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let peer_id = config.peer_id.clone().unwrap_or_else(random_peer_id);
        let shared = Arc::new(MemoryPeer {
            peer_id: peer_id.clone(),
            callback: RwLock::new(None),
            pool: Pool::new(),
            limiter: ConnectLimiter::new(config.connect_rate_limit),
            open_timeout: config.connection_open_timeout,
            destroyed: AtomicBool::new(false),
            isolated: AtomicBool::new(false),
        });

        match PEERS.entry(peer_id.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().upgrade().is_some() {
                    return Err(Error::PeerIdTaken(peer_id));
                }
                entry.insert(Arc::downgrade(&shared));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::downgrade(&shared));
            }
        }

        tracing::debug!("memory transport {peer_id} registered");
        Ok(Self { shared })
    }

    /// Make this peer vanish without telling anyone, the way a crashed process does.
    /// Frames sent to it are dropped and it can no longer be dialed.
    pub fn isolate(&self) {
        self.shared.isolated.store(true, Ordering::SeqCst);
        self.shared.unregister();
        drop(self.shared.pool.drain());
        tracing::debug!("memory transport {} isolated", self.shared.peer_id);
    }

    fn check_alive(&self) -> Result<()> {
        if self.shared.accepts_frames() {
            Ok(())
        } else {
            Err(Error::TransportDestroyed(self.shared.peer_id.clone()))
        }
    }

    async fn dial(&self, peer_id: &str) -> Result<ConnectionRef<MemoryConnection>> {
        let remote = MemoryPeer::lookup(peer_id)
            .filter(|p| p.accepts_frames())
            .ok_or_else(|| Error::PeerUnreachable(peer_id.to_string()))?;

        let conn = match self
            .shared
            .pool
            .safely_insert(peer_id, MemoryConnection::open(&self.shared, &remote))
        {
            Ok(conn) => conn,
            Err(Error::ConnectionAlreadyExists(_)) => return self.shared.pool.connection(peer_id),
            Err(e) => return Err(e),
        };

        let local_id = self.shared.peer_id.as_str();
        if remote
            .pool
            .safely_insert(local_id, MemoryConnection::open(&remote, &self.shared))
            .is_ok()
        {
            remote.notify(local_id, ConnectionState::Connected).await;
        }
        self.shared
            .notify(peer_id, ConnectionState::Connected)
            .await;

        tracing::debug!("memory transport {local_id} connected to {peer_id}");
        Ok(conn)
    }
}

#[async_trait]
impl TransportInterface for MemoryTransport {
    type Connection = MemoryConnection;
    type Error = Error;

    fn peer_id(&self) -> &str {
        &self.shared.peer_id
    }

    fn set_callback(&self, callback: SharedTransportCallback) {
        *self
            .shared
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    async fn open_connection(&self, peer_id: &str) -> Result<ConnectionRef<Self::Connection>> {
        if peer_id == self.shared.peer_id {
            return Err(Error::ShouldNotConnectSelf);
        }
        if let Ok(conn) = self.shared.pool.connection(peer_id) {
            if conn.connection_state() == ConnectionState::Connected {
                return Ok(conn);
            }
        }
        self.check_alive()?;

        self.shared.limiter.wait().await;
        tokio::time::timeout(self.shared.open_timeout, self.dial(peer_id))
            .await
            .map_err(|_| Error::OpenTimeout(peer_id.to_string()))?
    }

    fn connection(&self, peer_id: &str) -> Result<ConnectionRef<Self::Connection>> {
        self.shared.pool.connection(peer_id)
    }

    fn connections(&self) -> Vec<(String, ConnectionRef<Self::Connection>)> {
        self.shared.pool.connections()
    }

    fn connection_ids(&self) -> Vec<String> {
        self.shared.pool.connection_ids()
    }

    async fn send_message(&self, peer_id: &str, msg: TransportMessage) -> Result<()> {
        self.open_connection(peer_id)
            .await?
            .send_message(msg)
            .await
    }

    async fn close_connection(&self, peer_id: &str) -> Result<()> {
        self.shared.pool.safely_remove(peer_id).await?;
        self.shared.notify(peer_id, ConnectionState::Closed).await;

        let local_id = self.shared.peer_id.as_str();
        if let Some(remote) = MemoryPeer::lookup(peer_id) {
            if let Some(mirror) = remote.pool.take(local_id) {
                mirror.close().await?;
                remote.notify(local_id, ConnectionState::Closed).await;
            }
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.shared.destroyed.store(true, Ordering::SeqCst);
        self.shared.unregister();
        for peer_id in self.connection_ids() {
            if let Err(e) = self.close_connection(&peer_id).await {
                tracing::warn!("failed to close connection to {peer_id}: {e}");
            }
        }
        tracing::debug!("memory transport {} destroyed", self.shared.peer_id);
        Ok(())
    }
}

fn random_peer_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_PEER_ID_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::sync::mpsc::UnboundedSender;

    use super::*;
    use crate::core::callback::CallbackError;
    use crate::core::callback::TransportCallback;

    #[derive(Debug, PartialEq)]
    enum Event {
        Message(String, Vec<u8>),
        State(String, ConnectionState),
    }

    struct RecordingCallback {
        events: UnboundedSender<Event>,
    }

    #[async_trait]
    impl TransportCallback for RecordingCallback {
        async fn on_message(&self, cid: &str, msg: &[u8]) -> std::result::Result<(), CallbackError> {
            self.events.send(Event::Message(cid.to_string(), msg.to_vec()))?;
            Ok(())
        }

        async fn on_connection_state_change(
            &self,
            cid: &str,
            state: ConnectionState,
        ) -> std::result::Result<(), CallbackError> {
            self.events.send(Event::State(cid.to_string(), state))?;
            Ok(())
        }
    }

    fn config() -> TransportConfig {
        TransportConfig {
            peer_id: None,
            connect_rate_limit: Duration::ZERO,
            connection_open_timeout: Duration::from_secs(1),
        }
    }

    fn prepare() -> (MemoryTransport, UnboundedReceiver<Event>) {
        let trans = MemoryTransport::new(&config()).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        trans.set_callback(Arc::new(RecordingCallback { events: tx }));
        (trans, rx)
    }

    async fn next_event(rx: &mut UnboundedReceiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_dial_and_exchange_messages() {
        let (t1, mut rx1) = prepare();
        let (t2, mut rx2) = prepare();
        let id1 = t1.peer_id().to_string();
        let id2 = t2.peer_id().to_string();

        let conn = t1.open_connection(&id2).await.unwrap();
        assert_eq!(
            next_event(&mut rx2).await,
            Event::State(id1.clone(), ConnectionState::Connected)
        );
        assert_eq!(
            next_event(&mut rx1).await,
            Event::State(id2.clone(), ConnectionState::Connected)
        );
        assert_eq!(t2.connection_ids(), vec![id1.clone()]);

        for i in 0..5u8 {
            conn.send_message(TransportMessage::Custom(vec![i]))
                .await
                .unwrap();
        }
        for i in 0..5u8 {
            assert_eq!(
                next_event(&mut rx2).await,
                Event::Message(id1.clone(), vec![i])
            );
        }

        t2.connection(&id1)
            .unwrap()
            .send_message(TransportMessage::Custom(b"pong".to_vec()))
            .await
            .unwrap();
        assert_eq!(
            next_event(&mut rx1).await,
            Event::Message(id2.clone(), b"pong".to_vec())
        );
    }

    #[tokio::test]
    async fn test_open_connection_reuses_live_connection() {
        let (t1, _rx1) = prepare();
        let (t2, _rx2) = prepare();
        t1.open_connection(t2.peer_id()).await.unwrap();
        t1.open_connection(t2.peer_id()).await.unwrap();
        t2.open_connection(t1.peer_id()).await.unwrap();
        assert_eq!(t1.connections().len(), 1);
        assert_eq!(t2.connections().len(), 1);
    }

    #[tokio::test]
    async fn test_close_notifies_remote() {
        let (t1, _rx1) = prepare();
        let (t2, mut rx2) = prepare();
        let id1 = t1.peer_id().to_string();
        let id2 = t2.peer_id().to_string();

        let conn = t1.open_connection(&id2).await.unwrap();
        next_event(&mut rx2).await;

        t1.close_connection(&id2).await.unwrap();
        assert_eq!(
            next_event(&mut rx2).await,
            Event::State(id1.clone(), ConnectionState::Closed)
        );
        assert!(t2.connection_ids().is_empty());
        assert!(matches!(
            conn.send_message(TransportMessage::Custom(vec![])).await,
            Err(Error::ConnectionReleased(_))
        ));
    }

    #[tokio::test]
    async fn test_dial_guards() {
        let (t1, _rx1) = prepare();
        assert!(matches!(
            t1.open_connection(t1.peer_id()).await,
            Err(Error::ShouldNotConnectSelf)
        ));
        assert!(matches!(
            t1.open_connection("nobody-is-here").await,
            Err(Error::PeerUnreachable(_))
        ));

        let taken = TransportConfig {
            peer_id: Some(t1.peer_id().to_string()),
            ..config()
        };
        assert!(matches!(
            MemoryTransport::new(&taken),
            Err(Error::PeerIdTaken(_))
        ));
    }

    #[tokio::test]
    async fn test_destroyed_peer_is_unreachable() {
        let (t1, _rx1) = prepare();
        let (t2, mut rx2) = prepare();
        let id1 = t1.peer_id().to_string();
        let id2 = t2.peer_id().to_string();
        t2.open_connection(&id1).await.unwrap();
        next_event(&mut rx2).await;

        t1.destroy().await.unwrap();
        assert_eq!(
            next_event(&mut rx2).await,
            Event::State(id1.clone(), ConnectionState::Closed)
        );
        assert!(matches!(
            t2.open_connection(&id1).await,
            Err(Error::PeerUnreachable(_))
        ));
        assert!(matches!(
            t1.open_connection(&id2).await,
            Err(Error::TransportDestroyed(_))
        ));

        // the id can be registered again
        let again = TransportConfig {
            peer_id: Some(id1),
            ..config()
        };
        drop(t1);
        MemoryTransport::new(&again).unwrap();
    }

    #[tokio::test]
    async fn test_isolated_peer_drops_frames_silently() {
        let (t1, mut rx1) = prepare();
        let (t2, _rx2) = prepare();
        let id1 = t1.peer_id().to_string();
        let conn = t2.open_connection(&id1).await.unwrap();
        next_event(&mut rx1).await;

        t1.isolate();
        conn.send_message(TransportMessage::Custom(vec![1]))
            .await
            .unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(200), rx1.recv())
                .await
                .is_err()
        );
        assert_eq!(t2.connection_ids(), vec![id1]);
    }
}
