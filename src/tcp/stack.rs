use crate::config::TcpConfig;
use crate::ip::ip_header::IpHeader;
use crate::link::{HwAddr, Link};
use crate::packet;
use crate::tcp::conn::{ConnCallback, Connection, SendStatus};
use crate::tcp::errors::TcpError;
use crate::tcp::listener::ListenerRegistry;
use crate::tcp::options::syn_options;
use crate::tcp::receiver;
use crate::tcp::registry::{ConnHandle, ConnKey, ConnRegistry};
use crate::tcp::sender;
use crate::tcp::state::TcpState;
use crate::tcp::tcp_flags::TcpFlags;
use crate::tcp::tcp_header::TcpPacket;
use crate::tcp::tcp_segment::Transmitter;
use crate::tcp::wrap32::Wrap32;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::any::Any;
use std::net::SocketAddrV4;

/// The engine: listeners, connections and the link they transmit through.
///
/// `'buf` is the lifetime of the application buffers handed to [`TcpStack::send`];
/// a buffer stays borrowed until its `DataSent` event.
#[derive(Debug)]
pub struct TcpStack<'buf, L: Link> {
    config: TcpConfig,
    transmitter: Transmitter<L>,
    listeners: ListenerRegistry<'buf>,
    connections: ConnRegistry<'buf>,
    rng: StdRng,     // Initial sequence numbers and ephemeral ports
    next_port: u16,  // Next ephemeral port candidate
    accepting: bool, // Cleared by `close_all` / `reset_all`
    now: u64,        // Clock of the last tick, ms
}

impl<'buf, L: Link> TcpStack<'buf, L> {
    pub fn new(config: TcpConfig, link: L) -> Result<Self, TcpError> {
        config.validate()?;

        let mut rng = match config.isn_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let next_port = rng.gen_range(config.ephemeral_ports.clone());

        Ok(TcpStack {
            transmitter: Transmitter::new(link, config.ttl),
            listeners: ListenerRegistry::new(config.max_listeners),
            connections: ConnRegistry::new(config.max_connections),
            rng,
            next_port,
            accepting: true,
            now: 0,
            config,
        })
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    pub fn link(&self) -> &L {
        self.transmitter.link()
    }

    pub fn link_mut(&mut self) -> &mut L {
        self.transmitter.link_mut()
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    // -- Listeners --

    pub fn listen(&mut self, port: u16, callback: ConnCallback<'buf>) -> Result<(), TcpError> {
        self.listeners.listen(port, callback)?;
        info!("listening on port {}", port);
        Ok(())
    }

    pub fn stop_listen(&mut self, port: u16) -> Result<(), TcpError> {
        self.listeners.stop(port)
    }

    // -- Connections --

    /// Open a connection to `remote`. The SYN goes out on the next tick.
    pub fn connect(&mut self, remote: SocketAddrV4, callback: ConnCallback<'buf>) -> Result<ConnHandle, TcpError> {
        if remote.port() == 0 || remote.ip().is_unspecified() {
            return Err(TcpError::InvalidArgument("remote address"));
        }

        if self.config.local_ip.is_unspecified() {
            return Err(TcpError::InvalidArgument("local_ip unset"));
        }

        let port = self.allocate_port(remote)?;
        let local = SocketAddrV4::new(self.config.local_ip, port);
        let iss = Wrap32::new(self.rng.gen());
        let (config, now) = (&self.config, self.now);

        let conn = self.connections.create(ConnKey::new(remote, port), |handle| {
            Connection::connect(handle, local, remote, iss, config, callback, now)
        })?;

        info!("{}: connecting {} -> {}", conn.handle(), local, remote);
        Ok(conn.handle())
    }

    fn allocate_port(&mut self, remote: SocketAddrV4) -> Result<u16, TcpError> {
        let range = self.config.ephemeral_ports.clone();

        for _ in 0..range.len() {
            let port = self.next_port;
            self.next_port = if port + 1 >= range.end { range.start } else { port + 1 };

            let in_use = self.listeners.contains(port) || self.connections.find(&ConnKey::new(remote, port)).is_some();
            if !in_use {
                return Ok(port);
            }
        }

        Err(TcpError::ResourceExhausted("no free ephemeral port"))
    }

    /// Queue `data` on the connection. The buffer is borrowed, not copied, until `DataSent`.
    pub fn send(&mut self, handle: ConnHandle, data: &'buf [u8]) -> Result<SendStatus, TcpError> {
        self.conn_mut(handle)?.queue(data)
    }

    /// Close gracefully (FIN once the current chunk is acknowledged) or reset immediately.
    /// A reset destroys the connection without raising an event.
    pub fn close(&mut self, handle: ConnHandle, reset: bool) -> Result<(), TcpError> {
        let conn = self.connections.get_mut(handle).ok_or(TcpError::InvalidHandle(handle))?;

        if reset {
            sender::abort(conn, &mut self.transmitter);
            self.connections.remove(handle);
        } else if matches!(conn.state, TcpState::Init | TcpState::SynSent) {
            // Nothing synchronized yet, nothing to close
            debug!("{}: dropping unfinished connect to {}", handle, conn.remote);
            self.connections.remove(handle);
        } else {
            conn.request_close(false);
        }
        Ok(())
    }

    /// Replace the application data attached to a connection, returning the previous value.
    pub fn set_user_data(
        &mut self,
        handle: ConnHandle,
        data: Box<dyn Any>,
    ) -> Result<Option<Box<dyn Any>>, TcpError> {
        Ok(self.conn_mut(handle)?.set_user_data(data))
    }

    pub fn user_data<T: Any>(&self, handle: ConnHandle) -> Option<&T> {
        self.connections.get(handle)?.user_data()
    }

    pub fn is_established(&self, handle: ConnHandle) -> bool {
        self.connections.get(handle).is_some_and(Connection::is_established)
    }

    /// Current state, or `None` once the connection is gone.
    pub fn state(&self, handle: ConnHandle) -> Option<TcpState> {
        self.connections.get(handle).map(Connection::state)
    }

    pub fn connection(&self, handle: ConnHandle) -> Option<&Connection<'buf>> {
        self.connections.get(handle)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn conn_mut(&mut self, handle: ConnHandle) -> Result<&mut Connection<'buf>, TcpError> {
        self.connections.get_mut(handle).ok_or(TcpError::InvalidHandle(handle))
    }

    // -- Bulk shutdown --

    /// Gracefully close every connection and stop accepting new ones.
    pub fn close_all(&mut self) {
        for handle in self.connections.handles() {
            let _ = self.close(handle, false);
        }
        self.accepting = false;
    }

    /// Reset every connection and stop accepting new ones.
    pub fn reset_all(&mut self) {
        for handle in self.connections.handles() {
            let _ = self.close(handle, true);
        }
        self.accepting = false;
    }

    /// Accept inbound connections again.
    pub fn start(&mut self) {
        self.accepting = true;
    }

    /// Nothing left to serve: stopped (or no listeners) and no live connections.
    pub fn is_finished(&self) -> bool {
        (!self.accepting || self.listeners.is_empty()) && self.connections.is_empty()
    }

    // -- Entry points --

    /// Periodic work for every connection. `now` is a monotonic millisecond clock.
    pub fn tick(&mut self, now: u64) {
        self.now = self.now.max(now);

        for handle in self.connections.handles() {
            if let Some(conn) = self.connections.get_mut(handle) {
                sender::poll(conn, &mut self.transmitter, &self.config, self.now);
            }
        }

        let swept = self.connections.sweep();
        if swept > 0 {
            debug!("released {} connection(s), {} live", swept, self.connections.len());
        }
    }

    /// Handle a raw IPv4 datagram. Returns false when it was not a TCP segment for us.
    pub fn receive_datagram(&mut self, datagram: &[u8], src_hw: HwAddr) -> bool {
        match packet::split(datagram) {
            Ok((iph, segment)) => self.on_frame_received(&iph, segment, src_hw),
            Err(err) => {
                debug!("dropping datagram: {}", err);
                false
            }
        }
    }

    /// Decode and dispatch one TCP segment (`segment` excludes the IP header).
    /// Malformed segments are dropped silently. Returns whether the segment was consumed.
    pub fn on_frame_received(&mut self, iph: &IpHeader, segment: &[u8], src_hw: HwAddr) -> bool {
        let seg = match TcpPacket::parse(segment, iph) {
            Ok(seg) => seg,
            Err(err) => {
                debug!("dropping segment from {}: {}", iph.src_ip, err);
                return false;
            }
        };

        let remote = SocketAddrV4::new(iph.src_ip, seg.header.src_port);
        let key = ConnKey::new(remote, seg.header.dst_port);

        if let Some(handle) = self.connections.find(&key) {
            if let Some(conn) = self.connections.get_mut(handle) {
                if conn.hw.is_none() && !src_hw.is_null() {
                    conn.hw = Some(src_hw);
                }

                receiver::dispatch(conn, &seg, &mut self.transmitter, &self.config, self.now);
                if conn.is_dead() {
                    self.connections.remove(handle);
                }
            }
            return true;
        }

        if !seg.header.flags.is_bare_syn() {
            debug!("no connection for {:?} from {} to port {}", seg.header.flags, remote, key.local_port);
            return false;
        }

        self.admit(iph, &seg, remote, src_hw)
    }

    /// Passive open for a bare SYN.
    fn admit(&mut self, iph: &IpHeader, syn: &TcpPacket<'_>, remote: SocketAddrV4, src_hw: HwAddr) -> bool {
        let port = syn.header.dst_port;
        let callback = match self.listeners.find(port) {
            Some(callback) if self.accepting => callback,
            _ => {
                debug!("no listener for SYN from {} to port {}", remote, port);
                return false;
            }
        };

        let local = SocketAddrV4::new(iph.dst_ip, port);
        let iss = Wrap32::new(self.rng.gen());
        let (config, now) = (&self.config, self.now);

        let created = self.connections.create(ConnKey::new(remote, port), |handle| {
            Connection::accept(handle, local, remote, src_hw, syn, iss, config, callback, now)
        });

        match created {
            Ok(conn) => {
                debug!("{}: SYN from {} to port {}, mss {}", conn.handle(), remote, port, conn.mss());
                let options = syn_options(conn.mss());
                self.transmitter.transmit(conn, TcpFlags::SYN | TcpFlags::ACK, iss, &options, &[]);
            }
            Err(err) => {
                warn!("refusing connection from {}: {}", remote, err);
                let ack = syn.header.seq_no + 1;
                self.transmitter.transmit_reset(local, remote, Some(src_hw), Wrap32::new(0), ack);
            }
        }
        true
    }
}

// -- Unit tests --
