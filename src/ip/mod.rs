pub mod ip_flags;
pub mod ip_header;

// -- Re-export structs for more concise usage

pub use ip_flags::IpFlags;
pub use ip_header::IpHeader;

/// IANA protocol number carried in the IPv4 header for TCP.
pub const PROTO_TCP: u8 = 6;
