use crate::ip::ip_flags::IpFlags;
use crate::ip::PROTO_TCP;
use crate::packet;
use crate::packet::errors::HeaderError;
use std::net::Ipv4Addr;

/// Minimum IPv4 header size, no options.
pub const IP_HDR_SIZE: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct IpHeader {
    pub version: u8, // Always 4
    pub ihl: u8,     // 5 when we send out, may carry options when receiving
    pub tos: u8,
    pub total_len: u16,
    pub id: u16,
    pub flags: IpFlags,   // 3 bits, part of u16
    pub frag_offset: u16, // 13 bits, part of u16
    pub ttl: u8,
    pub protocol: u8, // 6 for TCP
    pub checksum: u16,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
}

impl IpHeader {
    /// Envelope for an outbound TCP segment of `segment_len` bytes.
    pub fn for_tcp(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, id: u16, ttl: u8, segment_len: usize) -> Self {
        IpHeader {
            version: 4,
            ihl: 5,
            total_len: (IP_HDR_SIZE + segment_len) as u16,
            id,
            ttl,
            protocol: PROTO_TCP,
            src_ip,
            dst_ip,
            ..Default::default()
        }
    }

    /// Length of the header in bytes, including options.
    pub fn header_len(&self) -> usize {
        self.ihl as usize * 4
    }

    /// Serialize an `IpHeader` into a byte array of size 20.
    pub fn serialize(&self, buf: &mut [u8]) -> Result<usize, HeaderError> {
        if buf.len() < IP_HDR_SIZE {
            return Err(HeaderError::BufferTooSmall { expected: IP_HDR_SIZE, found: buf.len() });
        }

        buf[0] = (self.version << 4) | 5; // We never emit IP options
        buf[1] = self.tos;
        buf[2..4].copy_from_slice(&self.total_len.to_be_bytes());
        buf[4..6].copy_from_slice(&self.id.to_be_bytes());
        let flags = self.flags.pack(self.frag_offset);
        buf[6..8].copy_from_slice(&flags.to_be_bytes());
        buf[8] = self.ttl;
        buf[9] = self.protocol;
        buf[10..12].fill(0); // Set checksum to 0 initially
        buf[12..16].copy_from_slice(&self.src_ip.octets());
        buf[16..20].copy_from_slice(&self.dst_ip.octets());

        let checksum = Self::checksum(&buf[0..IP_HDR_SIZE]);
        buf[10..12].copy_from_slice(&checksum.to_be_bytes());

        Ok(IP_HDR_SIZE)
    }

    /// Parse a byte array into an `IpHeader`, verifying the header checksum.
    pub fn parse(buf: &[u8]) -> Result<Self, HeaderError> {
        if buf.len() < IP_HDR_SIZE {
            return Err(HeaderError::BufferTooSmall { expected: IP_HDR_SIZE, found: buf.len() });
        }

        let version = buf[0] >> 4;
        let ihl = buf[0] & 0x0f;
        let header_len = ihl as usize * 4;
        if header_len < IP_HDR_SIZE {
            return Err(HeaderError::BadHeaderLength(ihl));
        }
        if buf.len() < header_len {
            return Err(HeaderError::BufferTooSmall { expected: header_len, found: buf.len() });
        }

        if Self::checksum(&buf[0..header_len]) != 0 {
            return Err(HeaderError::BadChecksum("IP".to_string()));
        };

        let tos = buf[1];
        let total_len = u16::from_be_bytes([buf[2], buf[3]]);
        let id = u16::from_be_bytes([buf[4], buf[5]]);
        let combo_flags = u16::from_be_bytes([buf[6], buf[7]]);
        let (flags, frag_offset) = IpFlags::unpack(combo_flags);
        let ttl = buf[8];
        let protocol = buf[9];
        let checksum = u16::from_be_bytes([buf[10], buf[11]]);
        let src_ip = Ipv4Addr::new(buf[12], buf[13], buf[14], buf[15]);
        let dst_ip = Ipv4Addr::new(buf[16], buf[17], buf[18], buf[19]);

        Ok(IpHeader {
            version,
            ihl,
            tos,
            total_len,
            id,
            flags,
            frag_offset,
            ttl,
            protocol,
            checksum,
            src_ip,
            dst_ip,
        })
    }

    /// Compute the checksum for an `IpHeader` (Ipv4).
    /// Wiki: https://en.wikipedia.org/wiki/IPv4_header_checksum.
    pub fn checksum(data: &[u8]) -> u16 {
        packet::fold_checksum(packet::sum_words(data, 0))
    }
}

impl Default for IpHeader {
    fn default() -> Self {
        IpHeader {
            version: 4,
            ihl: 5,
            tos: 0,
            total_len: 0,
            id: 0,
            flags: IpFlags::DF,
            frag_offset: 0,
            ttl: 64,
            protocol: PROTO_TCP,
            checksum: 0,
            src_ip: Ipv4Addr::UNSPECIFIED,
            dst_ip: Ipv4Addr::UNSPECIFIED,
        }
    }
}

// -- Unit tests --
