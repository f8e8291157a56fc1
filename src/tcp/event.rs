use crate::tcp::registry::ConnHandle;
use std::net::SocketAddrV4;

/// Why the connection callback was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NewConnection, // Handshake completed
    DataReceived,  // In-order payload in `TcpEvent::payload`
    DataSent,      // The queued chunk is fully acknowledged, `send` may be called again
    RemoteClosing, // Peer sent FIN
    RemoteClosed,  // Peer reset, retransmission timeout, or passive close completed
    Closing,       // Our FIN went out
    Closed,        // Graceful close completed
}

/// One notification delivered through a connection's callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpEvent<'a> {
    pub kind: EventKind,
    pub handle: ConnHandle,
    pub remote: SocketAddrV4,
    pub local_port: u16,
    pub payload: Option<&'a [u8]>,
    /// Set when the connection was abandoned after exhausting its retransmission budget.
    pub timed_out: bool,
}
