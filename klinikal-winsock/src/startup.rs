//! Reference-counted WSAStartup/WSACleanup. Startup fills the WSADATA
//! block and best-effort initializes the transport; the last cleanup
//! purges every handle and shuts the transport down.

use std::ffi::c_void;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

use crate::registry::registry;
use crate::stack;
use crate::types::WsaData;

pub const WINSOCK_VERSION: u16 = 0x0202;
const DESCRIPTION: &str = "Go-Winsock Bridge";
const SYSTEM_STATUS: &str = "Running";
const MAX_SOCKETS: u16 = 32767;
const MAX_UDP_DG: u16 = 65467;

static REF_COUNT: Lazy<Mutex<u32>> = Lazy::new(|| Mutex::new(0));

/// Initializes the bridge: bumps the reference count, fills WSADATA, and
/// best-effort brings the transport up from the canonical configuration
/// path. Always succeeds.
///
/// # Safety
/// `data` must be null or valid for sizeof(WSADATA) bytes.
pub unsafe fn wsa_startup(version_requested: u16, data: *mut c_void) -> i32 {
    trace_call!("WSAStartup", version_requested, data);
    let mut count = REF_COUNT.lock();
    *count += 1;

    if !data.is_null() {
        let out = &mut *(data as *mut WsaData);
        out.version = version_requested;
        out.high_version = WINSOCK_VERSION;
        out.description = [0; 257];
        out.description[..DESCRIPTION.len()].copy_from_slice(DESCRIPTION.as_bytes());
        out.system_status = [0; 129];
        out.system_status[..SYSTEM_STATUS.len()].copy_from_slice(SYSTEM_STATUS.as_bytes());
        out.max_sockets = MAX_SOCKETS;
        out.max_udp_dg = MAX_UDP_DG;
        out.vendor_info = std::ptr::null_mut();
    }

    // The stack also initializes lazily on first use, so failure here is
    // not fatal.
    if let Err(err) = stack::initialize_stack(stack::DEFAULT_CONFIG_PATH) {
        debug!(%err, "deferred stack initialization");
    }
    0
}

/// Decrements the reference count; the final cleanup purges the registry
/// and tears the transport down.
pub fn wsa_cleanup() -> i32 {
    trace_call!("WSACleanup");
    let mut count = REF_COUNT.lock();
    if *count > 0 {
        *count -= 1;
        if *count == 0 {
            registry().purge_all();
            stack::close_stack();
        }
    }
    0
}

/// Current reference count, for the lifecycle balance tests.
pub fn startup_ref_count() -> u32 {
    *REF_COUNT.lock()
}
