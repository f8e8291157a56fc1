//! A single-threaded, cooperative TCP engine for bootloader recovery services.
//!
//! The engine sits between a link layer (anything implementing [`link::Link`])
//! and an application that talks to it through callbacks. It is driven by two
//! entry points: [`TcpStack::on_frame_received`] for every inbound IPv4 TCP
//! datagram, and [`TcpStack::tick`] from the polling loop, which also advances
//! the millisecond clock used for every timeout.

pub mod config;
pub mod ip;
pub mod link;
pub mod packet;
pub mod tcp;

pub use config::TcpConfig;
pub use link::{Delivery, HwAddr, Link};
pub use tcp::{ConnCallback, ConnContext, ConnHandle, EventKind, SendStatus, TcpError, TcpEvent, TcpStack, TcpState};
