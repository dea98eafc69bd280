//! The Winsock2 emulation core.
//!
//! Everything a ws2_32 caller can reach lives here: the handle registry
//! and per-socket state machine, the BSD-style lifecycle, synchronous and
//! overlapped I/O, select/poll/event multiplexing, the resolver family,
//! option dispatch, and the reference-counted startup/cleanup pair. All
//! traffic is carried by the userspace transport in `klinikal-netstack`,
//! tunnelled through `klinikal-wire`.
//!
//! Functions mirror their Win32 parameter layouts (raw pointers and all);
//! the `klinikal-ws2` cdylib re-exports them under the ABI symbol names.

#[macro_use]
mod trace;

pub mod addr;
pub mod byte_order;
pub mod conn_ext;
pub mod error;
pub mod events;
pub mod ext_io;
pub mod io;
pub mod lifecycle;
pub mod multiplex;
pub mod name;
pub mod options;
pub mod proto_svc;
pub mod registry;
pub mod stack;
pub mod startup;
pub mod stubs;
pub mod types;

pub use error::{wsa_get_last_error, wsa_set_last_error};
pub use types::{INVALID_SOCKET, SOCKET_ERROR};
