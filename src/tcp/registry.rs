use crate::tcp::conn::Connection;
use crate::tcp::errors::TcpError;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::SocketAddrV4;

/// Application-facing reference to a connection.
///
/// Ids are never reused, so a handle to a destroyed connection simply misses on lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnHandle(u64);

impl fmt::Display for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The triple identifying a connection. The local address is implicit (single-homed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnKey {
    pub remote: SocketAddrV4,
    pub local_port: u16,
}

impl ConnKey {
    pub fn new(remote: SocketAddrV4, local_port: u16) -> Self {
        ConnKey { remote, local_port }
    }
}

/// Owns every live connection.
pub struct ConnRegistry<'buf> {
    conns: BTreeMap<ConnHandle, Connection<'buf>>,
    index: HashMap<ConnKey, ConnHandle>,
    next_id: u64,
    capacity: usize,
}

impl<'buf> ConnRegistry<'buf> {
    pub fn new(capacity: usize) -> Self {
        ConnRegistry {
            conns: BTreeMap::new(),
            index: HashMap::new(),
            next_id: 1,
            capacity,
        }
    }

    /// Create a connection for `key`, built by `make` once a handle has been assigned.
    /// Rejects duplicates and refuses when full; nothing is left behind on failure.
    pub fn create<F>(&mut self, key: ConnKey, make: F) -> Result<&mut Connection<'buf>, TcpError>
    where
        F: FnOnce(ConnHandle) -> Connection<'buf>,
    {
        if self.index.contains_key(&key) {
            return Err(TcpError::ConnectionExists);
        }
        if self.conns.len() >= self.capacity {
            return Err(TcpError::ResourceExhausted("connection table full"));
        }

        let handle = ConnHandle(self.next_id);
        self.next_id += 1;

        let conn = make(handle);
        debug_assert_eq!(conn.key(), key);
        self.index.insert(key, handle);
        Ok(self.conns.entry(handle).or_insert(conn))
    }

    pub fn find(&self, key: &ConnKey) -> Option<ConnHandle> {
        self.index.get(key).copied()
    }

    pub fn get(&self, handle: ConnHandle) -> Option<&Connection<'buf>> {
        self.conns.get(&handle)
    }

    pub fn get_mut(&mut self, handle: ConnHandle) -> Option<&mut Connection<'buf>> {
        self.conns.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: ConnHandle) -> Option<Connection<'buf>> {
        let conn = self.conns.remove(&handle)?;
        self.index.remove(&conn.key());
        Some(conn)
    }

    /// Snapshot of the live handles, oldest first.
    pub fn handles(&self) -> Vec<ConnHandle> {
        self.conns.keys().copied().collect()
    }

    /// Drop every connection that reached `Closed`. Returns how many went.
    pub fn sweep(&mut self) -> usize {
        let dead: Vec<ConnHandle> = self
            .conns
            .iter()
            .filter(|(_, conn)| conn.is_dead())
            .map(|(handle, _)| *handle)
            .collect();

        for handle in &dead {
            self.remove(*handle);
        }
        dead.len()
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}

impl fmt::Debug for ConnRegistry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnRegistry")
            .field("conns", &self.conns)
            .field("capacity", &self.capacity)
            .finish()
    }
}

// -- Unit tests --

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TcpConfig;
    use crate::tcp::state::TcpState;
    use crate::tcp::wrap32::Wrap32;
    use std::net::Ipv4Addr;
    use std::rc::Rc;

    fn key(port: u16) -> ConnKey {
        ConnKey::new(SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 2), port), 80)
    }

    fn make<'buf>(key: ConnKey) -> impl FnOnce(ConnHandle) -> Connection<'buf> {
        move |handle| {
            let local = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 1), key.local_port);
            Connection::connect(handle, local, key.remote, Wrap32::new(0), &TcpConfig::default(), Rc::new(|_, _| {}), 0)
        }
    }

    #[test]
    fn test_create_find_remove() {
        let mut registry = ConnRegistry::new(4);
        let handle = registry.create(key(40000), make(key(40000))).unwrap().handle();

        assert_eq!(registry.find(&key(40000)), Some(handle));
        assert_eq!(registry.find(&key(40001)), None);
        assert!(registry.get(handle).is_some());

        assert!(registry.remove(handle).is_some());
        assert_eq!(registry.find(&key(40000)), None);
        assert!(registry.get(handle).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = ConnRegistry::new(4);
        registry.create(key(40000), make(key(40000))).unwrap();

        let result = registry.create(key(40000), make(key(40000)));
        assert!(matches!(result, Err(TcpError::ConnectionExists)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_capacity() {
        let mut registry = ConnRegistry::new(2);
        registry.create(key(1), make(key(1))).unwrap();
        registry.create(key(2), make(key(2))).unwrap();
        assert_eq!(registry.len(), 2);

        let result = registry.create(key(3), make(key(3)));
        assert!(matches!(result, Err(TcpError::ResourceExhausted(_))));
        assert_eq!(registry.find(&key(3)), None);
    }

    #[test]
    fn test_handles_not_reused() {
        let mut registry = ConnRegistry::new(4);
        let first = registry.create(key(1), make(key(1))).unwrap().handle();
        registry.remove(first);

        let second = registry.create(key(1), make(key(1))).unwrap().handle();
        assert_ne!(first, second);
        assert!(registry.get(first).is_none());
    }

    #[test]
    fn test_sweep_removes_closed() {
        let mut registry = ConnRegistry::new(4);
        let a = registry.create(key(1), make(key(1))).unwrap().handle();
        let b = registry.create(key(2), make(key(2))).unwrap().handle();

        registry.get_mut(a).unwrap().state = TcpState::Closed;
        assert_eq!(registry.sweep(), 1);
        assert_eq!(registry.handles(), vec![b]);
        assert_eq!(registry.find(&key(1)), None);
    }
}
