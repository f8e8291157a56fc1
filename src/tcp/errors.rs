use crate::packet::errors::HeaderError;
use crate::tcp::registry::ConnHandle;
use crate::tcp::state::TcpState;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum TcpError {
    #[error("Header error: {0}")]
    HeaderError(#[from] HeaderError), // Wrapper around HeaderError

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str), // EINVAL

    #[error("Address in use: port {0}")]
    AddressInUse(u16), // EADDRINUSE

    #[error("No listener on port {0}")]
    ListenerNotFound(u16),

    #[error("Unknown connection {0}")]
    InvalidHandle(ConnHandle),

    #[error("Connection already exists")]
    ConnectionExists, // EISCONN

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(&'static str), // ENOMEM

    #[error("Operation not allowed in state {0}")]
    InvalidState(TcpState),
}
