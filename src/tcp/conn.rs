use crate::config::TcpConfig;
use crate::link::HwAddr;
use crate::tcp::errors::TcpError;
use crate::tcp::event::{EventKind, TcpEvent};
use crate::tcp::options::{SynOptions, MAX_WINDOW_SCALE};
use crate::tcp::registry::{ConnHandle, ConnKey};
use crate::tcp::rtt::{RexmitTimer, RttEstimator};
use crate::tcp::state::TcpState;
use crate::tcp::tcp_header::TcpPacket;
use crate::tcp::wrap32::Wrap32;
use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::net::SocketAddrV4;
use std::rc::Rc;

/// Application callback. Listener callbacks are shared by every connection they accept.
pub type ConnCallback<'buf> = Rc<dyn Fn(&TcpEvent<'_>, &mut ConnContext<'_, 'buf>) + 'buf>;

/// Result of queueing a chunk for transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Queued,
    /// The previous chunk is still in flight, or a close was requested.
    Busy,
}

/// The Transmission Control Block of one connection.
///
/// Send sequence space, oldest first:
///
/// ```text
///   snd_una <= snd_nxt
///   |-- acked --|-- in flight --|-- unsent (tx) --|
///   snd_base is where the current tx chunk starts
/// ```
pub struct Connection<'buf> {
    pub(crate) handle: ConnHandle,
    pub(crate) state: TcpState,
    pub(crate) local: SocketAddrV4,
    pub(crate) remote: SocketAddrV4,
    pub(crate) hw: Option<HwAddr>, // Cached once the link layer resolves the peer

    // -- Sequence state --
    pub(crate) iss: Wrap32,
    pub(crate) snd_nxt: Wrap32,  // Next sequence number to assign
    pub(crate) snd_base: Wrap32, // First byte of the current tx chunk
    pub(crate) snd_una: Wrap32,  // Oldest unacknowledged byte
    pub(crate) rcv_nxt: Wrap32,  // Next byte expected from the peer
    pub(crate) mss: u16,
    pub(crate) peer_wnd: u32, // Already scaled by `peer_ws`
    pub(crate) peer_ws: u8,
    pub(crate) zero_window: bool,

    // -- Timing state --
    pub(crate) rtt: RttEstimator,
    pub(crate) timer: RexmitTimer,
    pub(crate) handshake_ts: u64, // When our SYN (or SYN-ACK) first went out

    /// Caller-owned chunk being transmitted. Borrowed until `DataSent`, never copied.
    pub(crate) tx: Option<&'buf [u8]>,

    // -- Control flags --
    pub(crate) close_requested: bool,
    pub(crate) abort_requested: bool,
    pub(crate) ack_owed: bool,
    pub(crate) rexmit_mode: bool,
    pub(crate) rexmit_wait_ack: bool,

    pub(crate) callback: ConnCallback<'buf>,
    pub(crate) user_data: Option<Box<dyn Any>>,
}

impl<'buf> Connection<'buf> {
    /// Record for an inbound SYN that matched a listener. The SYN-ACK is not sent here.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn accept(
        handle: ConnHandle,
        local: SocketAddrV4,
        remote: SocketAddrV4,
        hw: HwAddr,
        syn: &TcpPacket<'_>,
        iss: Wrap32,
        config: &TcpConfig,
        callback: ConnCallback<'buf>,
        now: u64,
    ) -> Self {
        let mut conn = Connection::new(handle, TcpState::SynRcvd, local, remote, iss, config, callback, now);
        conn.hw = Some(hw).filter(|hw| !hw.is_null());
        conn.apply_syn(syn, config);
        conn
    }

    /// Record for an active open; the first tick sends the SYN.
    pub(crate) fn connect(
        handle: ConnHandle,
        local: SocketAddrV4,
        remote: SocketAddrV4,
        iss: Wrap32,
        config: &TcpConfig,
        callback: ConnCallback<'buf>,
        now: u64,
    ) -> Self {
        Connection::new(handle, TcpState::Init, local, remote, iss, config, callback, now)
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        handle: ConnHandle,
        state: TcpState,
        local: SocketAddrV4,
        remote: SocketAddrV4,
        iss: Wrap32,
        config: &TcpConfig,
        callback: ConnCallback<'buf>,
        now: u64,
    ) -> Self {
        // The SYN occupies `iss`
        let snd_nxt = iss + 1;
        Connection {
            handle,
            state,
            local,
            remote,
            hw: None,
            iss,
            snd_nxt,
            snd_base: snd_nxt,
            snd_una: iss,
            rcv_nxt: Wrap32::new(0),
            mss: config.mss,
            peer_wnd: 0,
            peer_ws: 0,
            zero_window: false,
            rtt: RttEstimator::new(config.initial_rto_ms),
            timer: RexmitTimer::new(now),
            handshake_ts: now,
            tx: None,
            close_requested: false,
            abort_requested: false,
            ack_owed: false,
            rexmit_mode: false,
            rexmit_wait_ack: false,
            callback,
            user_data: None,
        }
    }

    /// Take the peer's initial sequence number, window and options from its SYN.
    /// A malformed option list leaves the defaults in place.
    pub(crate) fn apply_syn(&mut self, syn: &TcpPacket<'_>, config: &TcpConfig) {
        let options = SynOptions::parse(syn.options);

        self.rcv_nxt = syn.header.seq_no + 1;
        self.mss = options.negotiate_mss(config.mss);
        self.peer_ws = options.window_scale.map_or(0, |ws| ws.min(MAX_WINDOW_SCALE));
        // The window field of a SYN is never scaled
        self.peer_wnd = syn.header.window as u32;
    }

    /// Refresh the peer window from a non-SYN segment.
    pub(crate) fn update_window(&mut self, window: u16) {
        let wnd = (window as u32) << self.peer_ws;
        if wnd > 0 {
            self.zero_window = false;
        }
        self.peer_wnd = wnd;
    }

    pub fn handle(&self) -> ConnHandle {
        self.handle
    }

    pub fn state(&self) -> TcpState {
        self.state
    }

    pub fn key(&self) -> ConnKey {
        ConnKey::new(self.remote, self.local.port())
    }

    pub fn local(&self) -> SocketAddrV4 {
        self.local
    }

    pub fn remote(&self) -> SocketAddrV4 {
        self.remote
    }

    pub fn mss(&self) -> u16 {
        self.mss
    }

    pub fn is_established(&self) -> bool {
        self.state == TcpState::Established
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.state == TcpState::Closed
    }

    /// Bytes of the current chunk already handed to the link layer.
    pub(crate) fn bytes_sent(&self) -> usize {
        self.snd_nxt.distance_from(self.snd_base) as usize
    }

    /// Bytes of the current chunk acknowledged by the peer.
    pub(crate) fn bytes_acked(&self) -> usize {
        self.snd_una.distance_from(self.snd_base) as usize
    }

    /// Hand a caller-owned chunk to the connection. At most one chunk is in flight.
    pub fn queue(&mut self, data: &'buf [u8]) -> Result<SendStatus, TcpError> {
        if data.is_empty() {
            return Err(TcpError::InvalidArgument("empty send buffer"));
        }
        if !matches!(self.state, TcpState::Established | TcpState::CloseWait) {
            return Err(TcpError::InvalidState(self.state));
        }
        if self.close_requested || self.tx.is_some() {
            return Ok(SendStatus::Busy);
        }

        self.tx = Some(data);
        self.snd_base = self.snd_nxt;
        self.snd_una = self.snd_nxt;
        Ok(SendStatus::Queued)
    }

    /// Graceful close once the current chunk is acknowledged, or abort.
    pub(crate) fn request_close(&mut self, reset: bool) {
        if reset {
            self.abort_requested = true;
        } else {
            self.close_requested = true;
        }
    }

    pub fn set_user_data(&mut self, data: Box<dyn Any>) -> Option<Box<dyn Any>> {
        self.user_data.replace(data)
    }

    pub fn user_data<T: Any>(&self) -> Option<&T> {
        self.user_data.as_ref()?.downcast_ref()
    }

    pub fn user_data_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.user_data.as_mut()?.downcast_mut()
    }

    /// Invoke the callback. The callback may queue data or request a close through the context.
    pub(crate) fn notify(&mut self, kind: EventKind, payload: Option<&[u8]>, timed_out: bool) {
        let callback = Rc::clone(&self.callback);
        let event = TcpEvent {
            kind,
            handle: self.handle,
            remote: self.remote,
            local_port: self.local.port(),
            payload,
            timed_out,
        };

        let mut ctx = ConnContext { conn: self };
        callback(&event, &mut ctx);
    }
}

impl fmt::Debug for Connection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("handle", &self.handle)
            .field("state", &self.state)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("snd_una", &self.snd_una)
            .field("snd_nxt", &self.snd_nxt)
            .field("rcv_nxt", &self.rcv_nxt)
            .field("mss", &self.mss)
            .field("peer_wnd", &self.peer_wnd)
            .field("tx_len", &self.tx.map(<[u8]>::len))
            .finish_non_exhaustive()
    }
}

/// A connection as seen from inside its own callback. Read-only accessors come from [`Connection`].
pub struct ConnContext<'c, 'buf> {
    conn: &'c mut Connection<'buf>,
}

impl<'buf> Deref for ConnContext<'_, 'buf> {
    type Target = Connection<'buf>;

    fn deref(&self) -> &Connection<'buf> {
        self.conn
    }
}

impl<'c, 'buf> ConnContext<'c, 'buf> {
    /// Same contract as `TcpStack::send`.
    pub fn send(&mut self, data: &'buf [u8]) -> Result<SendStatus, TcpError> {
        self.conn.queue(data)
    }

    /// Request a close. A reset takes effect as soon as the callback returns;
    /// no further events are delivered for this connection.
    pub fn close(&mut self, reset: bool) {
        self.conn.request_close(reset);
    }

    /// Replace the user data, returning the previous value.
    pub fn set_user_data<T: Any>(&mut self, data: T) -> Option<Box<dyn Any>> {
        self.conn.set_user_data(Box::new(data))
    }

    pub fn user_data_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.conn.user_data_mut()
    }
}
