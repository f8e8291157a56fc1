use bitflags::bitflags;

bitflags! {
    // Bit positions [ CWR, ECE, URG, ACK, PSH, RST, SYN, FIN ]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TcpFlags: u8 {
        const CWR = 1 << 7;
        const ECE = 1 << 6;
        const URG = 1 << 5;
        const ACK = 1 << 4;
        const PSH = 1 << 3;
        const RST = 1 << 2;
        const SYN = 1 << 1;
        const FIN = 1 << 0;
    }
}

impl TcpFlags {
    /// The six classic control bits, ignoring ECN.
    pub fn control(self) -> TcpFlags {
        self & (TcpFlags::URG | TcpFlags::ACK | TcpFlags::PSH | TcpFlags::RST | TcpFlags::SYN | TcpFlags::FIN)
    }

    /// A bare SYN, the only segment that may open a passive connection.
    pub fn is_bare_syn(self) -> bool {
        self.control() == TcpFlags::SYN
    }
}

// -- Unit tests --
