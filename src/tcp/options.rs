use crate::packet::errors::HeaderError;
use log::debug;

// TCP option kinds
pub const OPT_EOL: u8 = 0;
pub const OPT_NOP: u8 = 1;
pub const OPT_MSS: u8 = 2;
pub const OPT_WS: u8 = 3;

/// RFC 7323 caps the shift count at 14.
pub const MAX_WINDOW_SCALE: u8 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpOption<'a> {
    NoOperation,
    MaxSegmentSize(u16),
    WindowScale(u8),
    Unknown { kind: u8, data: &'a [u8] },
}

/// Bounds-checked walk over a raw option list.
///
/// Stops at End-of-List or at the end of the buffer. A malformed entry yields
/// one `Err` and ends the iteration.
#[derive(Debug, Clone)]
pub struct TcpOptionIter<'a> {
    buf: &'a [u8],
    done: bool,
}

impl<'a> TcpOptionIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        TcpOptionIter { buf, done: false }
    }

    fn fail(&mut self, kind: u8) -> Option<Result<TcpOption<'a>, HeaderError>> {
        self.done = true;
        Some(Err(HeaderError::MalformedOption(kind)))
    }
}

impl<'a> Iterator for TcpOptionIter<'a> {
    type Item = Result<TcpOption<'a>, HeaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let (&kind, rest) = match self.buf.split_first() {
            Some(split) => split,
            None => {
                self.done = true;
                return None;
            }
        };

        match kind {
            OPT_EOL => {
                self.done = true;
                None
            }
            OPT_NOP => {
                self.buf = rest;
                Some(Ok(TcpOption::NoOperation))
            }
            _ => {
                let len = match rest.first() {
                    Some(&len) => len as usize,
                    None => return self.fail(kind),
                };
                if len < 2 || len > self.buf.len() {
                    return self.fail(kind);
                }

                let data = &self.buf[2..len];
                self.buf = &self.buf[len..];

                match (kind, data) {
                    (OPT_MSS, &[hi, lo]) => Some(Ok(TcpOption::MaxSegmentSize(u16::from_be_bytes([hi, lo])))),
                    (OPT_WS, &[shift]) => Some(Ok(TcpOption::WindowScale(shift))),
                    (OPT_MSS, _) | (OPT_WS, _) => self.fail(kind),
                    _ => Some(Ok(TcpOption::Unknown { kind, data })),
                }
            }
        }
    }
}

/// What the peer offered on its SYN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SynOptions {
    pub mss: Option<u16>,
    pub window_scale: Option<u8>,
}

impl SynOptions {
    /// Collect MSS and window scale. Any malformed entry falls back to the defaults.
    pub fn parse(buf: &[u8]) -> Self {
        let mut opts = SynOptions::default();

        for opt in TcpOptionIter::new(buf) {
            match opt {
                Ok(TcpOption::MaxSegmentSize(mss)) if mss > 0 => opts.mss = Some(mss),
                Ok(TcpOption::WindowScale(shift)) => opts.window_scale = Some(shift.min(MAX_WINDOW_SCALE)),
                Ok(_) => {}
                Err(err) => {
                    debug!("ignoring SYN options: {}", err);
                    return SynOptions::default();
                }
            }
        }

        opts
    }

    /// Negotiated MSS: the smaller of ours and the peer's.
    pub fn negotiate_mss(&self, local_mss: u16) -> u16 {
        self.mss.map_or(local_mss, |mss| mss.min(local_mss))
    }
}

/// Options carried on our SYN and SYN+ACK: MSS, window scale 0 (we never scale), EOL.
pub fn syn_options(mss: u16) -> [u8; 8] {
    let [hi, lo] = mss.to_be_bytes();
    [OPT_MSS, 4, hi, lo, OPT_WS, 3, 0, OPT_EOL]
}

// -- Unit tests --
