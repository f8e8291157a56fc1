use crate::ip::ip_header::IpHeader;
use crate::packet;
use crate::packet::errors::HeaderError;
use crate::tcp::tcp_flags::TcpFlags;
use crate::tcp::wrap32::Wrap32;

/// Size of a TCP header without options.
pub const TCP_HDR_SIZE: usize = 20;

/// Largest header the 4-bit data offset can describe.
pub const TCP_MAX_HDR_SIZE: usize = 60;

#[derive(Debug, Clone, PartialEq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_no: Wrap32,
    pub ack_no: Wrap32,
    pub data_offset: u8, // Upper 4 bits, filled in by `serialize`
    pub reserved: u8,    // Lower 4 bits
    pub flags: TcpFlags,
    pub window: u16,
    pub checksum: u16,
    pub urgent: u16,
}

impl Default for TcpHeader {
    fn default() -> Self {
        TcpHeader {
            src_port: 0,
            dst_port: 0,
            seq_no: Wrap32::new(0),
            ack_no: Wrap32::new(0),
            data_offset: 5,
            reserved: 0,
            flags: TcpFlags::ACK,
            window: 0,
            checksum: 0,
            urgent: 0,
        }
    }
}

impl TcpHeader {
    /// Write the header, `options` (zero padded to a word boundary) and `payload` into `buf`.
    /// The data offset and checksum are computed here; the ones stored in `self` are ignored.
    pub fn serialize(
        &self,
        buf: &mut [u8],
        options: &[u8],
        payload: &[u8],
        iph: &IpHeader,
    ) -> Result<usize, HeaderError> {
        let header_len = TCP_HDR_SIZE + (options.len() + 3) / 4 * 4; // 20 + options
        if header_len > TCP_MAX_HDR_SIZE {
            return Err(HeaderError::BadHeaderLength((header_len / 4) as u8));
        }
        let total_len = header_len + payload.len(); // 20 + options + payload

        if buf.len() < total_len {
            return Err(HeaderError::BufferTooSmall { expected: total_len, found: buf.len() });
        }

        buf[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        buf[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        buf[4..8].copy_from_slice(&self.seq_no.value().to_be_bytes());
        buf[8..12].copy_from_slice(&self.ack_no.value().to_be_bytes());
        buf[12] = (((header_len / 4) as u8) << 4) | (self.reserved & 0x0f);
        buf[13] = self.flags.bits();
        buf[14..16].copy_from_slice(&self.window.to_be_bytes());
        buf[16..18].fill(0); // Set checksum to 0 initially
        buf[18..20].copy_from_slice(&self.urgent.to_be_bytes());

        buf[20..20 + options.len()].copy_from_slice(options);
        buf[20 + options.len()..header_len].fill(0); // EOL padding
        buf[header_len..total_len].copy_from_slice(payload);

        let checksum = Self::checksum(&buf[..total_len], iph);
        buf[16..18].copy_from_slice(&checksum.to_be_bytes());

        Ok(total_len)
    }

    /// Compute the checksum of a TCP segment over the IPv4 pseudo-header.
    /// Verifying a received segment yields 0.
    pub fn checksum(data: &[u8], iph: &IpHeader) -> u16 {
        let src_bytes = iph.src_ip.octets();
        let dst_bytes = iph.dst_ip.octets();

        // Pseudo-header: addresses, zero + protocol, segment length
        let mut sum = packet::sum_words(&src_bytes, 0);
        sum = packet::sum_words(&dst_bytes, sum);
        sum += iph.protocol as u32;
        sum += data.len() as u32;

        // Sum the TCP header and payload
        sum = packet::sum_words(data, sum);
        packet::fold_checksum(sum)
    }
}

/// A decoded inbound segment borrowing from the received datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct TcpPacket<'a> {
    pub header: TcpHeader,
    pub options: &'a [u8],
    /// Payload with urgent bytes already stripped.
    pub payload: &'a [u8],
    /// Urgent bytes that were discarded from the front of the payload.
    pub urgent_skipped: usize,
}

impl<'a> TcpPacket<'a> {
    /// Validate and decode a segment. Checksum mismatches and short headers are rejected.
    pub fn parse(buf: &'a [u8], iph: &IpHeader) -> Result<Self, HeaderError> {
        if buf.len() < TCP_HDR_SIZE {
            return Err(HeaderError::BufferTooSmall { expected: TCP_HDR_SIZE, found: buf.len() });
        }

        if TcpHeader::checksum(buf, iph) != 0 {
            return Err(HeaderError::BadChecksum("TCP".to_string()));
        }

        let src_port = u16::from_be_bytes([buf[0], buf[1]]);
        let dst_port = u16::from_be_bytes([buf[2], buf[3]]);
        let seq_no = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let ack_no = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let data_offset = buf[12] >> 4;
        let reserved = buf[12] & 0x0f;
        let flags = TcpFlags::from_bits_truncate(buf[13]);
        let window = u16::from_be_bytes([buf[14], buf[15]]);
        let checksum = u16::from_be_bytes([buf[16], buf[17]]);
        let urgent = u16::from_be_bytes([buf[18], buf[19]]);

        let header_len = data_offset as usize * 4;
        if header_len < TCP_HDR_SIZE {
            return Err(HeaderError::BadHeaderLength(data_offset));
        }
        if buf.len() < header_len {
            return Err(HeaderError::BufferTooSmall { expected: header_len, found: buf.len() });
        }

        let options = &buf[TCP_HDR_SIZE..header_len];
        let mut payload = &buf[header_len..];

        // Urgent data is discarded, never delivered out-of-band
        let mut urgent_skipped = 0;
        if flags.contains(TcpFlags::URG) {
            urgent_skipped = (urgent as usize).min(payload.len());
            payload = &payload[urgent_skipped..];
        }

        Ok(TcpPacket {
            header: TcpHeader {
                src_port,
                dst_port,
                seq_no: Wrap32::new(seq_no),
                ack_no: Wrap32::new(ack_no),
                data_offset,
                reserved,
                flags,
                window,
                checksum,
                urgent,
            },
            options,
            payload,
            urgent_skipped,
        })
    }

    /// Sequence space occupied by data, urgent bytes included, SYN/FIN excluded.
    pub fn data_len(&self) -> u32 {
        (self.urgent_skipped + self.payload.len()) as u32
    }
}

// -- Unit tests --

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::test_utils;
    use std::net::Ipv4Addr;

    fn captured_iph() -> IpHeader {
        let ip_bytes = hex::decode(test_utils::get_ip_hex()).unwrap();
        IpHeader::parse(&ip_bytes).unwrap()
    }

    fn local_iph(segment_len: usize) -> IpHeader {
        IpHeader::for_tcp(
            Ipv4Addr::new(192, 168, 1, 1),
            Ipv4Addr::new(192, 168, 1, 2),
            0,
            64,
            segment_len,
        )
    }

    #[test]
    fn test_tcp_header_to_bytes() {
        let tcp_header = TcpHeader {
            src_port: 50871,
            dst_port: 80,
            seq_no: Wrap32::new(2753993875),
            ack_no: Wrap32::new(0),
            flags: TcpFlags::SYN,
            window: 65535,
            ..Default::default()
        };
        let options = hex::decode("020405b4010303060101080abb6879f80000000004020000").unwrap();

        let iph = captured_iph();
        let mut buf = vec![0u8; 1024];
        let n = tcp_header.serialize(&mut buf, &options, &[], &iph).unwrap();

        // Verify that checksum is 0
        let checksum = TcpHeader::checksum(&buf[..n], &iph);
        assert_eq!(checksum, 0);

        // Check that constructed data is equal to wireshark data
        let tcp_bytes = hex::decode(test_utils::get_tcp_hex()).unwrap();
        assert_eq!(buf[..n], tcp_bytes)
    }

    #[test]
    fn test_tcp_header_from_bytes() {
        let iph = captured_iph();
        let tcp_bytes = hex::decode(test_utils::get_tcp_hex()).unwrap();
        let tcp = TcpPacket::parse(&tcp_bytes, &iph).unwrap();
        let tcph = &tcp.header;

        assert_eq!(tcph.src_port, 50871);
        assert_eq!(tcph.dst_port, 80);
        assert_eq!(tcph.seq_no, Wrap32::new(2753993875));
        assert_eq!(tcph.ack_no, Wrap32::new(0));
        assert_eq!(tcph.data_offset, 11);
        assert_eq!(tcph.reserved, 0);
        assert_eq!(tcph.flags, TcpFlags::SYN);
        assert_eq!(tcph.window, 65535);
        assert_eq!(tcph.checksum, 37527);
        assert_eq!(tcph.urgent, 0);
        assert_eq!(
            tcp.options,
            hex::decode("020405b4010303060101080abb6879f80000000004020000").unwrap()
        );
        assert!(tcp.payload.is_empty())
    }

    #[test]
    fn test_encode_then_decode() {
        let header = TcpHeader {
            src_port: 80,
            dst_port: 40000,
            seq_no: Wrap32::new(0xffff_fff0),
            ack_no: Wrap32::new(1001),
            flags: TcpFlags::ACK | TcpFlags::PSH,
            window: 1460,
            ..Default::default()
        };
        let payload = b"HTTP/1.0 200 OK\r\n\r\n";
        let iph = local_iph(TCP_HDR_SIZE + payload.len());

        let mut buf = vec![0u8; 128];
        let n = header.serialize(&mut buf, &[], payload, &iph).unwrap();
        let tcp = TcpPacket::parse(&buf[..n], &iph).unwrap();

        assert_eq!(tcp.header.seq_no, header.seq_no);
        assert_eq!(tcp.header.ack_no, header.ack_no);
        assert_eq!(tcp.header.flags, header.flags);
        assert_eq!(tcp.header.window, header.window);
        assert_eq!(tcp.header.data_offset, 5);
        assert!(tcp.options.is_empty());
        assert_eq!(tcp.payload, payload);
        assert_eq!(tcp.data_len(), payload.len() as u32);
    }

    #[test]
    fn test_any_corrupt_byte_fails_checksum() {
        let iph = captured_iph();
        let tcp_bytes = hex::decode(test_utils::get_tcp_hex()).unwrap();

        for i in 0..tcp_bytes.len() {
            let mut corrupt = tcp_bytes.clone();
            corrupt[i] ^= 0x20;
            assert_eq!(
                TcpPacket::parse(&corrupt, &iph),
                Err(HeaderError::BadChecksum("TCP".to_string())),
                "byte {} corrupted",
                i
            );
        }
    }

    #[test]
    fn test_checksum_covers_pseudo_header() {
        let tcp_bytes = hex::decode(test_utils::get_tcp_hex()).unwrap();
        let mut iph = captured_iph();
        iph.dst_ip = Ipv4Addr::new(204, 44, 192, 61);

        assert!(TcpPacket::parse(&tcp_bytes, &iph).is_err());
    }

    #[test]
    fn test_short_data_offset_rejected() {
        let header = TcpHeader::default();
        let iph = local_iph(TCP_HDR_SIZE);
        let mut buf = vec![0u8; TCP_HDR_SIZE];
        header.serialize(&mut buf, &[], &[], &iph).unwrap();

        // Claim a 16-byte header, then fix up the checksum so only the length is wrong
        buf[12] = 4 << 4;
        buf[16..18].fill(0);
        let checksum = TcpHeader::checksum(&buf, &iph);
        buf[16..18].copy_from_slice(&checksum.to_be_bytes());

        assert_eq!(TcpPacket::parse(&buf, &iph), Err(HeaderError::BadHeaderLength(4)));
    }

    #[test]
    fn test_truncated_segment_rejected() {
        let iph = local_iph(TCP_HDR_SIZE);
        assert_eq!(
            TcpPacket::parse(&[0u8; 12], &iph),
            Err(HeaderError::BufferTooSmall { expected: 20, found: 12 })
        );
    }

    #[test]
    fn test_urgent_bytes_are_skipped() {
        let header = TcpHeader {
            flags: TcpFlags::ACK | TcpFlags::URG,
            urgent: 3,
            ..Default::default()
        };
        let payload = b"!!!hello";
        let iph = local_iph(TCP_HDR_SIZE + payload.len());
        let mut buf = vec![0u8; 64];
        let n = header.serialize(&mut buf, &[], payload, &iph).unwrap();

        let tcp = TcpPacket::parse(&buf[..n], &iph).unwrap();
        assert_eq!(tcp.payload, b"hello");
        assert_eq!(tcp.urgent_skipped, 3);
        assert_eq!(tcp.data_len(), 8);
    }

    #[test]
    fn test_urgent_pointer_past_payload_is_clamped() {
        let header = TcpHeader {
            flags: TcpFlags::ACK | TcpFlags::URG,
            urgent: 500,
            ..Default::default()
        };
        let iph = local_iph(TCP_HDR_SIZE + 4);
        let mut buf = vec![0u8; 64];
        let n = header.serialize(&mut buf, &[], b"data", &iph).unwrap();

        let tcp = TcpPacket::parse(&buf[..n], &iph).unwrap();
        assert!(tcp.payload.is_empty());
        assert_eq!(tcp.urgent_skipped, 4);
    }

    #[test]
    fn test_options_are_padded() {
        let header = TcpHeader { flags: TcpFlags::SYN, ..Default::default() };
        let iph = local_iph(TCP_HDR_SIZE + 4);
        let mut buf = vec![0xaau8; 64];
        let n = header.serialize(&mut buf, &[3, 3, 0], &[], &iph).unwrap();

        assert_eq!(n, 24);
        assert_eq!(buf[12] >> 4, 6);
        assert_eq!(&buf[20..24], &[3, 3, 0, 0]);
    }

    #[test]
    fn test_oversized_options_rejected() {
        let header = TcpHeader::default();
        let iph = local_iph(TCP_HDR_SIZE);
        let mut buf = vec![0u8; 128];
        assert_eq!(
            header.serialize(&mut buf, &[1u8; 44], &[], &iph),
            Err(HeaderError::BadHeaderLength(16))
        );
    }
}
