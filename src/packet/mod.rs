pub mod errors;

use crate::ip::ip_header::IpHeader;
use crate::ip::PROTO_TCP;
use crate::packet::errors::HeaderError;
use crate::tcp::tcp_header::{TcpHeader, TcpPacket};

/// Wrap a TCP header, its options and payload into a complete IPv4 datagram.
pub fn wrap(
    iph: &IpHeader,
    tcph: &TcpHeader,
    options: &[u8],
    payload: &[u8],
) -> Result<Vec<u8>, HeaderError> {
    let total_len = iph.total_len as usize;
    let mut datagram = vec![0u8; total_len];

    let n = iph.serialize(&mut datagram)?;
    let m = tcph.serialize(&mut datagram[n..], options, payload, iph)?;
    datagram.truncate(n + m);
    Ok(datagram)
}

/// Unwrap an IPv4 datagram into an `IpHeader` and a borrowed `TcpPacket`.
pub fn unwrap(datagram: &[u8]) -> Result<(IpHeader, TcpPacket<'_>), HeaderError> {
    let (iph, segment) = split(datagram)?;
    let tcp = TcpPacket::parse(segment, &iph)?;
    Ok((iph, tcp))
}

/// Parse the IPv4 header of a TCP datagram and slice out the raw segment.
pub fn split(datagram: &[u8]) -> Result<(IpHeader, &[u8]), HeaderError> {
    let iph = IpHeader::parse(datagram)?;
    if iph.protocol != PROTO_TCP {
        return Err(HeaderError::NotTcp(iph.protocol));
    }

    // Trailing link-layer padding is not part of the segment
    let total_len = iph.total_len as usize;
    let header_len = iph.header_len();
    if total_len < header_len || datagram.len() < total_len {
        return Err(HeaderError::BufferTooSmall { expected: total_len.max(header_len), found: datagram.len() });
    }

    Ok((iph, &datagram[header_len..total_len]))
}

/// Sum `data` as big-endian 16-bit words on top of `initial`.
/// An odd trailing byte is padded with a zero byte.
pub fn sum_words(data: &[u8], initial: u32) -> u32 {
    let mut sum = initial;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    sum
}

/// Fold the carry bits and take the one's complement.
pub fn fold_checksum(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

// Unit test helpers


// -- Unit tests --

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::tcp_flags::TcpFlags;
    use crate::tcp::wrap32::Wrap32;
    use std::net::Ipv4Addr;

    #[test]
    fn test_unwrap_captured_syn() {
        let ip_bytes = hex::decode(test_utils::get_ip_hex()).unwrap();
        let tcp_bytes = hex::decode(test_utils::get_tcp_hex()).unwrap();
        let datagram = [ip_bytes, tcp_bytes].concat();

        let (iph, tcp) = unwrap(&datagram).unwrap();
        assert_eq!(iph.src_ip, Ipv4Addr::new(10, 110, 208, 106));
        assert_eq!(tcp.header.src_port, 50871);
        assert_eq!(tcp.header.dst_port, 80);
        assert_eq!(tcp.header.flags, TcpFlags::SYN);
        assert!(tcp.payload.is_empty());
    }

    #[test]
    fn test_unwrap_ignores_link_padding() {
        let ip_bytes = hex::decode(test_utils::get_ip_hex()).unwrap();
        let tcp_bytes = hex::decode(test_utils::get_tcp_hex()).unwrap();
        let mut datagram = [ip_bytes, tcp_bytes].concat();
        datagram.extend_from_slice(&[0u8; 6]);

        let (_, tcp) = unwrap(&datagram).unwrap();
        assert!(tcp.payload.is_empty());
    }

    #[test]
    fn test_unwrap_truncated_datagram() {
        let ip_bytes = hex::decode(test_utils::get_ip_hex()).unwrap();
        let tcp_bytes = hex::decode(test_utils::get_tcp_hex()).unwrap();
        let datagram = [ip_bytes, tcp_bytes].concat();

        let result = unwrap(&datagram[..50]);
        assert_eq!(result.unwrap_err(), HeaderError::BufferTooSmall { expected: 64, found: 50 });
    }

    #[test]
    fn test_unwrap_not_tcp() {
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        let mut iph = IpHeader::for_tcp(src, dst, 1, 64, 8);
        iph.protocol = 17;
        let mut datagram = vec![0u8; 28];
        iph.serialize(&mut datagram).unwrap();

        assert_eq!(unwrap(&datagram).unwrap_err(), HeaderError::NotTcp(17));
    }

    #[test]
    fn test_wrap_then_unwrap_odd_payload() {
        let src = Ipv4Addr::new(192, 168, 1, 1);
        let dst = Ipv4Addr::new(192, 168, 1, 2);
        let payload = b"odd!!";
        let options = [2u8, 4, 0x05, 0xb4];

        let tcph = TcpHeader {
            src_port: 80,
            dst_port: 47652,
            seq_no: Wrap32::new(3280096596),
            ack_no: Wrap32::new(1563085193),
            flags: TcpFlags::ACK | TcpFlags::PSH,
            window: 235,
            ..Default::default()
        };
        let iph = IpHeader::for_tcp(src, dst, 9, 64, 20 + options.len() + payload.len());

        let datagram = wrap(&iph, &tcph, &options, payload).unwrap();
        assert_eq!(datagram.len(), 20 + 24 + 5);

        let (iph2, tcp) = unwrap(&datagram).unwrap();
        assert_eq!(iph2.dst_ip, dst);
        assert_eq!(tcp.header.seq_no, Wrap32::new(3280096596));
        assert_eq!(tcp.header.data_offset, 6);
        assert_eq!(tcp.options, &options);
        assert_eq!(tcp.payload, payload);
    }

    #[test]
    fn test_fold_checksum_carries() {
        // 0xffff + 0xffff = 0x1fffe -> 0xffff -> complement 0
        assert_eq!(fold_checksum(sum_words(&[0xff, 0xff, 0xff, 0xff], 0)), 0);
        assert_eq!(fold_checksum(sum_words(&[], 0)), 0xffff);
        assert_eq!(sum_words(&[0x12], 0), 0x1200);
    }
}
