use std::fmt;

/// Per-connection protocol state. Listening is kept in the listener registry,
/// so there is no `Listen` state here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpState {
    // -- Opening states --
    Init,    // Active open requested, SYN goes out on the next tick
    SynSent, // SYN sent, waiting for SYN-ACK
    SynRcvd, // SYN received, SYN-ACK sent, expecting ACK

    // -- Steady state; opened --
    Established, // Connection established, exchanging data

    // -- Passive close states --
    CloseWait, // FIN received, draining our last chunk before sending FIN
    LastAck,   // FIN sent, waiting for ACK

    // -- Active close states --
    FinWait1, // FIN sent, waiting for ACK of FIN or FIN from peer
    FinWait2, // FIN acknowledged, waiting for FIN from peer
    Closing,  // Both FINs sent, waiting for final ACK
    TimeWait, // Both FINs acknowledged, final ACK goes out on the next tick
    Closed,   // Dead, removed from the registry at the next sweep
}

impl TcpState {
    /// Our FIN has been sent.
    pub fn fin_sent(self) -> bool {
        matches!(
            self,
            TcpState::FinWait1 | TcpState::FinWait2 | TcpState::Closing | TcpState::LastAck | TcpState::TimeWait
        )
    }
}

impl fmt::Display for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TcpState::Init => "INIT",
            TcpState::SynSent => "SYN-SENT",
            TcpState::SynRcvd => "SYN-RECEIVED",
            TcpState::Established => "ESTABLISHED",
            TcpState::CloseWait => "CLOSE-WAIT",
            TcpState::LastAck => "LAST-ACK",
            TcpState::FinWait1 => "FIN-WAIT-1",
            TcpState::FinWait2 => "FIN-WAIT-2",
            TcpState::Closing => "CLOSING",
            TcpState::TimeWait => "TIME-WAIT",
            TcpState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

// -- Unit tests --
