use thiserror::Error;

#[derive(Debug, PartialEq, Error)]
pub enum HeaderError {
    #[error("Buffer too small: expected {expected} bytes, found {found} bytes")]
    BufferTooSmall { expected: usize, found: usize },

    #[error("Bad checksum")]
    BadChecksum(String),

    #[error("Bad header length: {0} words")]
    BadHeaderLength(u8),

    #[error("Not a TCP datagram: protocol {0}")]
    NotTcp(u8),

    #[error("Malformed option of kind {0}")]
    MalformedOption(u8),
}
