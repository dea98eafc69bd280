//! Event objects: one-slot signals with create/close/set/reset and the
//! multi-object wait.

use std::ffi::c_void;
use std::time::{Duration, Instant};

use klinikal_netstack::SignalSlot;
use std::sync::Arc;

use crate::registry::registry;

pub const WSA_INFINITE: u32 = 0xFFFF_FFFF;
pub const WSA_WAIT_TIMEOUT: u32 = 0x102;
pub const WSA_WAIT_FAILED: u32 = 0xFFFF_FFFF;

/// Poll cadence for the wait-any path.
const WAIT_ANY_TICK: Duration = Duration::from_millis(1);

/// Creates an event object and returns its handle.
pub fn wsa_create_event() -> *mut c_void {
    trace_call!("WSACreateEvent");
    registry().register_event() as *mut c_void
}

/// Closes an event object handle. Returns TRUE.
pub fn wsa_close_event(event: *mut c_void) -> i32 {
    trace_call!("WSACloseEvent", event);
    registry().unregister_event(event as usize);
    1
}

/// Signals the event (set-or-drop). Returns TRUE when the handle is known.
pub fn wsa_set_event(event: *mut c_void) -> i32 {
    trace_call!("WSASetEvent", event);
    match registry().get_event(event as usize) {
        Some(slot) => {
            slot.signal();
            1
        }
        None => 0,
    }
}

/// Drains the event. Returns TRUE when the handle is known.
pub fn wsa_reset_event(event: *mut c_void) -> i32 {
    trace_call!("WSAResetEvent", event);
    match registry().get_event(event as usize) {
        Some(slot) => {
            slot.reset();
            1
        }
        None => 0,
    }
}

/// Waits for one (or, with `wait_all`, every) event to signal. Returns the
/// 0-based index of the signalled event, WSA_WAIT_TIMEOUT on expiry, or
/// WSA_WAIT_FAILED for bad arguments.
///
/// # Safety
/// `events` must point to `count` event handles.
pub unsafe fn wsa_wait_for_multiple_events(
    count: u32,
    events: *const *mut c_void,
    wait_all: i32,
    timeout_ms: u32,
    _alertable: i32,
) -> u32 {
    trace_call!("WSAWaitForMultipleEvents", count, events, wait_all, timeout_ms);
    if events.is_null() || count == 0 {
        return WSA_WAIT_FAILED;
    }
    let handles = std::slice::from_raw_parts(events, count as usize);
    let slots: Vec<Arc<SignalSlot>> = handles
        .iter()
        .filter_map(|h| registry().get_event(*h as usize))
        .collect();
    if slots.is_empty() {
        return WSA_WAIT_FAILED;
    }

    let deadline = if timeout_ms != WSA_INFINITE {
        Some(Instant::now() + Duration::from_millis(u64::from(timeout_ms)))
    } else {
        None
    };

    if wait_all != 0 {
        // Drain each handle in order under the shared deadline.
        for slot in &slots {
            if !slot.wait_deadline(deadline) {
                return WSA_WAIT_TIMEOUT;
            }
        }
        return 0;
    }

    loop {
        for (index, slot) in slots.iter().enumerate() {
            if slot.reset() {
                return index as u32;
            }
        }
        if let Some(d) = deadline {
            if Instant::now() >= d {
                return WSA_WAIT_TIMEOUT;
            }
        }
        std::thread::sleep(WAIT_ANY_TICK);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_reset_lifecycle() {
        let e = wsa_create_event();
        assert_eq!(wsa_set_event(e), 1);
        assert_eq!(wsa_reset_event(e), 1);
        assert_eq!(wsa_close_event(e), 1);
        // Unknown handle after close.
        assert_eq!(wsa_set_event(e), 0);
    }

    #[test]
    fn wait_any_returns_signalled_index() {
        let a = wsa_create_event();
        let b = wsa_create_event();
        wsa_set_event(b);
        let handles = [a, b];
        let index = unsafe { wsa_wait_for_multiple_events(2, handles.as_ptr(), 0, 1000, 0) };
        assert_eq!(index, 1);
        wsa_close_event(a);
        wsa_close_event(b);
    }

    #[test]
    fn wait_times_out() {
        let a = wsa_create_event();
        let handles = [a];
        let rc = unsafe { wsa_wait_for_multiple_events(1, handles.as_ptr(), 0, 30, 0) };
        assert_eq!(rc, WSA_WAIT_TIMEOUT);
        wsa_close_event(a);
    }

    #[test]
    fn wait_all_drains_every_event() {
        let a = wsa_create_event();
        let b = wsa_create_event();
        wsa_set_event(a);
        wsa_set_event(b);
        let handles = [a, b];
        let rc = unsafe { wsa_wait_for_multiple_events(2, handles.as_ptr(), 1, 100, 0) };
        assert_eq!(rc, 0);
        // Both tokens consumed.
        let rc = unsafe { wsa_wait_for_multiple_events(2, handles.as_ptr(), 0, 30, 0) };
        assert_eq!(rc, WSA_WAIT_TIMEOUT);
        wsa_close_event(a);
        wsa_close_event(b);
    }

    #[test]
    fn null_arguments_fail() {
        let rc = unsafe { wsa_wait_for_multiple_events(0, std::ptr::null(), 0, 0, 0) };
        assert_eq!(rc, WSA_WAIT_FAILED);
    }
}
