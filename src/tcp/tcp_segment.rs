use crate::ip::ip_header::IpHeader;
use crate::link::{Delivery, HwAddr, Link};
use crate::packet;
use crate::packet::errors::HeaderError;
use crate::tcp::conn::Connection;
use crate::tcp::tcp_flags::TcpFlags;
use crate::tcp::tcp_header::{TcpHeader, TCP_HDR_SIZE};
use crate::tcp::wrap32::Wrap32;
use log::{trace, warn};
use std::net::SocketAddrV4;

/// A builder for outbound IPv4+TCP datagrams. Options and payload are borrowed.
#[derive(Debug, Clone)]
pub struct TcpSegment<'a> {
    local: SocketAddrV4,
    remote: SocketAddrV4,
    tcph: TcpHeader, // TCP header template
    ttl: u8,
    ip_id: u16,
    options: &'a [u8],
    payload: &'a [u8],
}

impl<'a> TcpSegment<'a> {
    pub fn new(local: SocketAddrV4, remote: SocketAddrV4) -> Self {
        let tcph = TcpHeader {
            src_port: local.port(),
            dst_port: remote.port(),
            ..Default::default()
        };

        TcpSegment {
            local,
            remote,
            tcph,
            ttl: 64,
            ip_id: 0,
            options: &[],
            payload: &[],
        }
    }

    pub fn build(&self) -> Result<Vec<u8>, HeaderError> {
        let segment_len = TCP_HDR_SIZE + (self.options.len() + 3) / 4 * 4 + self.payload.len();
        let iph = IpHeader::for_tcp(*self.local.ip(), *self.remote.ip(), self.ip_id, self.ttl, segment_len);
        packet::wrap(&iph, &self.tcph, self.options, self.payload)
    }

    pub fn ttl(&mut self, ttl: u8) -> &mut Self {
        self.ttl = ttl;
        self
    }

    pub fn ip_id(&mut self, id: u16) -> &mut Self {
        self.ip_id = id;
        self
    }

    pub fn seq_no(&mut self, seq_no: Wrap32) -> &mut Self {
        self.tcph.seq_no = seq_no;
        self
    }

    pub fn ack_no(&mut self, ack_no: Wrap32) -> &mut Self {
        self.tcph.ack_no = ack_no;
        self
    }

    pub fn tcp_flags(&mut self, flags: TcpFlags) -> &mut Self {
        self.tcph.flags = flags;
        self
    }

    pub fn window_size(&mut self, window_size: u16) -> &mut Self {
        self.tcph.window = window_size;
        self
    }

    pub fn tcp_options(&mut self, options: &'a [u8]) -> &mut Self {
        self.options = options;
        self
    }

    pub fn payload(&mut self, payload: &'a [u8]) -> &mut Self {
        self.payload = payload;
        self
    }
}

/// Encodes segments and hands them to the link layer. Single threaded only.
#[derive(Debug)]
pub struct Transmitter<L> {
    link: L,
    ttl: u8,
    next_id: u16, // IPv4 identification, one per datagram
}

impl<L: Link> Transmitter<L> {
    pub fn new(link: L, ttl: u8) -> Self {
        Transmitter { link, ttl, next_id: 0 }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Send a segment on `conn`, acknowledging `rcv_nxt`. The advertised window is the MSS.
    pub fn transmit(
        &mut self,
        conn: &mut Connection<'_>,
        flags: TcpFlags,
        seq: Wrap32,
        options: &[u8],
        payload: &[u8],
    ) {
        let mut segment = TcpSegment::new(conn.local, conn.remote);
        segment
            .seq_no(seq)
            .ack_no(conn.rcv_nxt)
            .tcp_flags(flags)
            .window_size(conn.mss)
            .tcp_options(options)
            .payload(payload);

        if let Some(hw) = self.emit(&mut segment, conn.hw) {
            conn.hw = Some(hw);
        }
    }

    /// Reset aimed at a peer we keep no record for.
    pub fn transmit_reset(
        &mut self,
        local: SocketAddrV4,
        remote: SocketAddrV4,
        hw: Option<HwAddr>,
        seq: Wrap32,
        ack: Wrap32,
    ) {
        let mut segment = TcpSegment::new(local, remote);
        segment.seq_no(seq).ack_no(ack).tcp_flags(TcpFlags::RST | TcpFlags::ACK).window_size(0);
        self.emit(&mut segment, hw);
    }

    fn emit(&mut self, segment: &mut TcpSegment<'_>, hw: Option<HwAddr>) -> Option<HwAddr> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let datagram = match segment.ttl(self.ttl).ip_id(id).build() {
            Ok(datagram) => datagram,
            Err(err) => {
                warn!("failed to encode segment to {}: {}", segment.remote, err);
                return None;
            }
        };

        trace!(
            "{} -> {} [{:?}] seq={} ack={} len={}",
            segment.local,
            segment.remote,
            segment.tcph.flags,
            segment.tcph.seq_no,
            segment.tcph.ack_no,
            segment.payload.len()
        );

        match self.link.resolve_and_send(*segment.remote.ip(), hw, &datagram) {
            Delivery::Sent(hw) => Some(hw),
            Delivery::Pending => None,
        }
    }
}

// -- Unit tests --

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::ip_flags::IpFlags;
    use crate::link::test_utils::RecordingLink;
    use std::net::Ipv4Addr;

    fn endpoints() -> (SocketAddrV4, SocketAddrV4) {
        (
            SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 1), 12345),
            SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 2), 80),
        )
    }

    #[test]
    fn test_build() {
        let (local, remote) = endpoints();

        let packet = TcpSegment::new(local, remote)
            .ttl(64)
            .seq_no(Wrap32::new(12345))
            .ack_no(Wrap32::new(67890))
            .tcp_flags(TcpFlags::SYN)
            .window_size(65535)
            .build()
            .unwrap();

        let (iph, tcp) = packet::unwrap(&packet).unwrap();

        assert_eq!(iph.src_ip, *local.ip());
        assert_eq!(iph.dst_ip, *remote.ip());
        assert_eq!(iph.ttl, 64);
        assert_eq!(iph.flags, IpFlags::DF);
        assert_eq!(tcp.header.src_port, 12345);
        assert_eq!(tcp.header.dst_port, 80);
        assert_eq!(tcp.header.seq_no, Wrap32::new(12345));
        assert_eq!(tcp.header.ack_no, Wrap32::new(67890));
        assert_eq!(tcp.header.flags, TcpFlags::SYN);
        assert_eq!(tcp.header.window, 65535);
        assert!(tcp.options.is_empty());
        assert!(tcp.payload.is_empty());
    }

    #[test]
    fn test_build_with_options_and_payload() {
        let (local, remote) = endpoints();
        let options = [2u8, 4, 0x05, 0xb4, 3, 3, 0]; // Padded to 8 on the wire
        let payload = b"Hello, world!";

        let packet = TcpSegment::new(local, remote)
            .seq_no(Wrap32::new(1))
            .tcp_flags(TcpFlags::SYN | TcpFlags::ACK)
            .tcp_options(&options)
            .payload(payload)
            .build()
            .unwrap();

        assert_eq!(packet.len(), 20 + 20 + 8 + payload.len());

        let (iph, tcp) = packet::unwrap(&packet).unwrap();
        assert_eq!(iph.total_len as usize, packet.len());
        assert_eq!(tcp.header.data_offset, 7);
        assert_eq!(tcp.options, &[2, 4, 0x05, 0xb4, 3, 3, 0, 0]);
        assert_eq!(tcp.payload, payload);
    }

    #[test]
    fn test_transmit_reset_without_record() {
        let (local, remote) = endpoints();
        let mut transmitter = Transmitter::new(RecordingLink::new(), 32);

        transmitter.transmit_reset(local, remote, None, Wrap32::new(0), Wrap32::new(1001));
        transmitter.transmit_reset(local, remote, None, Wrap32::new(0), Wrap32::new(1001));

        let sent = transmitter.link_mut().take();
        assert_eq!(sent.len(), 2);

        let (iph, tcp) = packet::unwrap(&sent[0]).unwrap();
        assert_eq!(iph.ttl, 32);
        assert_eq!(tcp.header.flags, TcpFlags::RST | TcpFlags::ACK);
        assert_eq!(tcp.header.ack_no, Wrap32::new(1001));

        // Every datagram gets its own identification
        let (iph2, _) = packet::unwrap(&sent[1]).unwrap();
        assert_eq!(iph2.id, iph.id.wrapping_add(1));
    }
}
