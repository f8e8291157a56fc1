use crate::tcp::errors::TcpError;
use std::net::Ipv4Addr;
use std::ops::Range;

/// Engine tunables. All durations are milliseconds on the clock passed to `TcpStack::tick`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConfig {
    pub local_ip: Ipv4Addr, // Source address for active opens
    pub mss: u16,           // Offered on SYN, upper bound after negotiation
    pub ttl: u8,

    // -- RTT estimation --
    pub rtt_floor_ms: u64, // G
    pub rtt_k: u64,        // K
    pub rtt_alpha: u32,    // srtt gain, as a shift
    pub rtt_beta: u32,     // rttvar gain, as a shift
    pub rtt_sample_interval_ms: u64,

    // -- Retransmission --
    pub initial_rto_ms: u64,          // RTO until the handshake yields a sample
    pub max_segment_delay_ms: u64,    // Cap of one backed-off timeout
    pub max_connection_delay_ms: u64, // No-progress budget before giving up

    // -- Capacity --
    pub max_connections: usize,
    pub max_listeners: usize,
    pub ephemeral_ports: Range<u16>,

    /// Seed for initial sequence numbers and ephemeral ports. `None` seeds from OS entropy.
    pub isn_seed: Option<u64>,
}

impl TcpConfig {
    pub fn validate(&self) -> Result<(), TcpError> {
        if self.mss == 0 {
            return Err(TcpError::InvalidArgument("mss must be non-zero"));
        }
        if self.rtt_alpha >= 64 || self.rtt_beta >= 64 {
            return Err(TcpError::InvalidArgument("rtt gain shift out of range"));
        }
        if self.ephemeral_ports.is_empty() || self.ephemeral_ports.start == 0 {
            return Err(TcpError::InvalidArgument("empty ephemeral port range"));
        }
        if self.max_connections == 0 {
            return Err(TcpError::InvalidArgument("max_connections must be non-zero"));
        }
        Ok(())
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            local_ip: Ipv4Addr::UNSPECIFIED,
            mss: 1460,
            ttl: 64,
            rtt_floor_ms: 200,
            rtt_k: 4,
            rtt_alpha: 3,
            rtt_beta: 2,
            rtt_sample_interval_ms: 3000,
            initial_rto_ms: 1000,
            max_segment_delay_ms: 60_000,
            max_connection_delay_ms: 300_000,
            max_connections: 16,
            max_listeners: 8,
            ephemeral_ports: 50000..60000,
            isn_seed: None,
        }
    }
}

// -- Unit tests --
