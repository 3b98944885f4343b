use std::collections::HashMap;

use crate::server::connection::{ConnId, ConnectionHandle};

/// Events connection tasks report back to the task owning the registry.
#[derive(Debug)]
pub(crate) enum RegistryEvent {
    Closed(ConnId),
}

/// Live connections, keyed by id.
///
/// Owned by the server task; other tasks see it only through
/// [`ServerHandle::post`](crate::server::ServerHandle::post).
#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<ConnId, ConnectionHandle>,
}

impl Registry {
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn get(&self, id: ConnId) -> Option<&ConnectionHandle> {
        self.connections.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionHandle> {
        self.connections.values()
    }

    pub(crate) fn insert(&mut self, handle: ConnectionHandle) {
        self.connections.insert(handle.id(), handle);
    }

    pub(crate) fn remove(&mut self, id: ConnId) -> Option<ConnectionHandle> {
        self.connections.remove(&id)
    }
}
