//! This module contains the [ConnectionRef] struct.

use std::sync::Arc;
use std::sync::Weak;

use async_trait::async_trait;

use crate::core::transport::ConnectionInterface;
use crate::core::transport::ConnectionState;
use crate::core::transport::TransportMessage;
use crate::error::Error;
use crate::error::Result;

/// The [ConnectionRef] is a weak reference to a connection and implements the `ConnectionInterface` trait.
/// When the connection is dropped from its pool, it returns an error called [Error::ConnectionReleased].
/// It serves as the return value for the connection getters of a transport.
pub struct ConnectionRef<C> {
    cid: String,
    conn: Weak<C>,
}

impl<C> Clone for ConnectionRef<C> {
    fn clone(&self) -> Self {
        Self {
            cid: self.cid.clone(),
            conn: self.conn.clone(),
        }
    }
}

impl<C> ConnectionRef<C> {
    /// Create a new connection reference.
    pub fn new(cid: &str, conn: &Arc<C>) -> Self {
        Self {
            cid: cid.to_string(),
            conn: Arc::downgrade(conn),
        }
    }

    /// The peer id of the remote side.
    pub fn cid(&self) -> &str {
        &self.cid
    }

    pub(crate) fn upgrade(&self) -> Result<Arc<C>> {
        match self.conn.upgrade() {
            Some(conn) => Ok(conn),
            None => Err(Error::ConnectionReleased(self.cid.clone())),
        }
    }
}

#[async_trait]
impl<C> ConnectionInterface for ConnectionRef<C>
where C: ConnectionInterface<Error = Error> + Send + Sync
{
    type Error = C::Error;

    async fn send_message(&self, msg: TransportMessage) -> Result<()> {
        self.upgrade()?.send_message(msg).await
    }

    fn connection_state(&self) -> ConnectionState {
        self.upgrade()
            .map(|c| c.connection_state())
            .unwrap_or(ConnectionState::Closed)
    }

    async fn close(&self) -> Result<()> {
        self.upgrade()?.close().await
    }
}
