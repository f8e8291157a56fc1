use std::fmt;
use std::net::Ipv4Addr;

/// Link-layer (Ethernet) address of the next hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HwAddr(pub [u8; 6]);

impl HwAddr {
    pub fn is_null(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl fmt::Display for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

/// What the link layer did with an outbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Framed and sent to this hardware address.
    Sent(HwAddr),
    /// Held until address resolution completes; the link layer resends it.
    Pending,
}

/// The lower layer the engine transmits through.
pub trait Link {
    /// Frame `datagram` (a complete IPv4 packet) for `dst`. `hw` is the cached
    /// hardware address of the peer, if one is known.
    fn resolve_and_send(&mut self, dst: Ipv4Addr, hw: Option<HwAddr>, datagram: &[u8]) -> Delivery;
}

// Unit test helpers


// -- Unit tests --

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hwaddr_display() {
        let addr = HwAddr([0x00, 0x1b, 0x21, 0xaa, 0x0f, 0xff]);
        assert_eq!(addr.to_string(), "00:1b:21:aa:0f:ff");
        assert!(!addr.is_null());
        assert!(HwAddr::default().is_null());
    }
}
