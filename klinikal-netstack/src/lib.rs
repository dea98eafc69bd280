//! Userspace transport for the klinikal Winsock bridge.
//!
//! The stack owns a set of interface addresses and port tables. Endpoints
//! created through [`Stack`] deliver to each other in-process when the
//! destination is one of the stack's own addresses; UDP datagrams and ICMP
//! echoes addressed elsewhere are encapsulated as IPv4 frames and handed to
//! the attached [`Link`] (normally the WireGuard device). Every endpoint
//! exposes its readiness through a public [`waiter::WaitQueue`] so callers
//! can multiplex without poking at internals.

pub mod dns;
pub mod error;
pub mod packet;
pub mod ping;
pub mod pipe;
pub mod stack;
pub mod tcp;
pub mod udp;
pub mod waiter;

pub use error::{NetError, Result};
pub use ping::PingSocket;
pub use stack::{Link, Stack, StackBuilder, StackConfig};
pub use tcp::{TcpListener, TcpStream};
pub use udp::UdpSocket;
pub use waiter::{Readiness, SignalSlot, SlotWaker, Wake, WaitQueue};

/// Largest UDP payload the stack will carry, matching the value the bridge
/// reports in WSADATA.iMaxUdpDg.
pub const MAX_UDP_PAYLOAD: usize = 65467;
