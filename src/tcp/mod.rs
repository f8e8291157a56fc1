pub mod conn;
pub mod errors;
pub mod event;
pub mod listener;
pub mod options;
pub mod registry;
pub mod rtt;
pub mod stack;
pub mod state;
pub mod tcp_flags;
pub mod tcp_header;
pub mod tcp_segment;
pub mod wrap32;
mod receiver;
mod sender;

// -- Re-export structs for more concise usage

pub use conn::{ConnCallback, ConnContext, SendStatus};
pub use errors::TcpError;
pub use event::{EventKind, TcpEvent};
pub use registry::ConnHandle;
pub use stack::TcpStack;
pub use state::TcpState;
pub use tcp_flags::TcpFlags;
pub use wrap32::Wrap32;
