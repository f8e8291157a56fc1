use crate::tcp::conn::ConnCallback;
use crate::tcp::errors::TcpError;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Local ports accepting inbound connections, each with the callback handed to accepted connections.
pub struct ListenerRegistry<'buf> {
    listeners: BTreeMap<u16, ConnCallback<'buf>>,
    capacity: usize,
}

impl<'buf> ListenerRegistry<'buf> {
    pub fn new(capacity: usize) -> Self {
        ListenerRegistry {
            listeners: BTreeMap::new(),
            capacity,
        }
    }

    pub fn listen(&mut self, port: u16, callback: ConnCallback<'buf>) -> Result<(), TcpError> {
        if port == 0 {
            return Err(TcpError::InvalidArgument("port 0"));
        }
        if self.listeners.contains_key(&port) {
            return Err(TcpError::AddressInUse(port));
        }
        if self.listeners.len() >= self.capacity {
            return Err(TcpError::ResourceExhausted("listener table full"));
        }

        self.listeners.insert(port, callback);
        Ok(())
    }

    pub fn stop(&mut self, port: u16) -> Result<(), TcpError> {
        self.listeners
            .remove(&port)
            .map(|_| ())
            .ok_or(TcpError::ListenerNotFound(port))
    }

    pub fn find(&self, port: u16) -> Option<ConnCallback<'buf>> {
        self.listeners.get(&port).map(Rc::clone)
    }

    pub fn contains(&self, port: u16) -> bool {
        self.listeners.contains_key(&port)
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl fmt::Debug for ListenerRegistry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("ports", &self.listeners.keys().collect::<Vec<_>>())
            .field("capacity", &self.capacity)
            .finish()
    }
}

// -- Unit tests --
