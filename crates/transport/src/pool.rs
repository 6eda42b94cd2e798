//! This module contains the [Pool] struct.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::connection_ref::ConnectionRef;
use crate::core::transport::ConnectionInterface;
use crate::core::transport::ConnectionState;
use crate::error::Error;
use crate::error::Result;

/// [Pool] manages all the connections of one peer, keyed by remote peer id.
pub struct Pool<C> {
    connections: DashMap<String, Arc<C>>,
}

impl<C> Default for Pool<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Pool<C> {
    /// Create a new [Pool] instance.
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Get a reference of the connection by its id.
    pub fn connection(&self, cid: &str) -> Result<ConnectionRef<C>> {
        self.connections
            .get(cid)
            .map(|c| ConnectionRef::new(cid, c.value()))
            .ok_or(Error::ConnectionNotFound(cid.to_string()))
    }

    /// Get all the connections in the pool.
    pub fn connections(&self) -> Vec<(String, ConnectionRef<C>)> {
        self.connections
            .iter()
            .map(|kv| (kv.key().clone(), ConnectionRef::new(kv.key(), kv.value())))
            .collect()
    }

    /// Get all the connection ids in the pool.
    pub fn connection_ids(&self) -> Vec<String> {
        self.connections.iter().map(|kv| kv.key().clone()).collect()
    }

    /// Take the connection out of the pool without closing it.
    pub fn take(&self, cid: &str) -> Option<Arc<C>> {
        self.connections.remove(cid).map(|(_, c)| c)
    }

    /// Take every connection out of the pool without closing them.
    pub fn drain(&self) -> Vec<(String, Arc<C>)> {
        let ids = self.connection_ids();
        ids.into_iter()
            .filter_map(|cid| self.connections.remove(&cid))
            .collect()
    }
}

impl<C> Pool<C>
where C: ConnectionInterface<Error = Error> + Send + Sync
{
    /// The `safely_insert` method is used to insert a connection into the pool.
    /// It ensures that the connection is not inserted twice in concurrent scenarios.
    ///
    /// The implementation of match statement refers to Entry::insert in dashmap.
    /// An extra check is added to see if the connection is already connected.
    /// See also: https://docs.rs/dashmap/latest/dashmap/mapref/entry/enum.Entry.html#method.insert
    pub fn safely_insert(&self, cid: &str, conn: C) -> Result<ConnectionRef<C>> {
        let Some(entry) = self.connections.try_entry(cid.to_string()) else {
            return Err(Error::ConnectionAlreadyExists(cid.to_string()));
        };

        let inserted = match entry {
            Entry::Occupied(mut entry) => {
                let existed_conn = entry.get();
                if matches!(
                    existed_conn.connection_state(),
                    ConnectionState::New | ConnectionState::Connecting | ConnectionState::Connected
                ) {
                    return Err(Error::ConnectionAlreadyExists(cid.to_string()));
                }

                entry.insert(Arc::new(conn));
                entry.into_ref()
            }
            Entry::Vacant(entry) => entry.insert(Arc::new(conn)),
        };

        Ok(ConnectionRef::new(cid, inserted.value()))
    }

    /// This method closes and releases the connection from pool.
    /// All references to this cid, created by `connection`, will be released.
    /// The [ConnectionInterface] methods of them will return [Error::ConnectionReleased].
    pub async fn safely_remove(&self, cid: &str) -> Result<()> {
        let Some((_, conn)) = self.connections.remove(cid) else {
            return Err(Error::ConnectionNotFound(cid.to_string()));
        };
        conn.close().await
    }
}
