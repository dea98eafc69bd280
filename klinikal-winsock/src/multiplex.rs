//! I/O multiplexing: select over fd_sets, WSAPoll, the WSAEventSelect /
//! WSAEnumNetworkEvents pair, and __WSAFDIsSet.
//!
//! select and WSAPoll build transient registrations on each probed
//! endpoint's readiness queue, probe once, and only then block on a shared
//! signal slot; registrations are always torn down before returning.

use std::ffi::c_void;
use std::sync::Arc;
use std::time::Duration;

use klinikal_netstack::{Readiness, SignalSlot, SlotWaker, Wake, WaitQueue};

use crate::error::{set_last_error, WSAEFAULT, WSAEINVAL, WSAENOTSOCK, WSAEOPNOTSUPP};
use crate::registry::{registry, SocketState};
use crate::types::{FdSet, Timeval, WsaNetworkEvents, WsaPollFd};

pub const POLLERR: i16 = 0x0001;
pub const POLLHUP: i16 = 0x0002;
pub const POLLNVAL: i16 = 0x0004;
pub const POLLWRNORM: i16 = 0x0010;
pub const POLLOUT: i16 = POLLWRNORM;
pub const POLLRDNORM: i16 = 0x0100;
pub const POLLIN: i16 = POLLRDNORM;

fn check_read_ready(st: &SocketState) -> bool {
    !st.readiness(Readiness::read_interest()).is_empty()
}

fn check_write_ready(st: &SocketState) -> bool {
    !st.readiness(Readiness::write_interest()).is_empty()
}

/// Temporary readiness subscriptions held for the duration of one
/// select/poll call.
struct Registrations {
    entries: Vec<(Arc<WaitQueue>, u64)>,
    // Keeps the waker alive while registered.
    _waker: Arc<dyn Wake>,
}

impl Registrations {
    fn new(slot: &Arc<SignalSlot>) -> Registrations {
        Registrations {
            entries: Vec::new(),
            _waker: Arc::new(SlotWaker(slot.clone())),
        }
    }

    fn subscribe(&mut self, st: &SocketState, interest: Readiness) {
        if let Some(queue) = st.wait_queue() {
            let id = queue.register(interest, Arc::downgrade(&self._waker));
            self.entries.push((queue, id));
        }
    }
}

impl Drop for Registrations {
    fn drop(&mut self) {
        for (queue, id) in self.entries.drain(..) {
            queue.unregister(id);
        }
    }
}

unsafe fn fd_set_handles(set: *mut FdSet) -> Vec<u64> {
    if set.is_null() {
        return Vec::new();
    }
    let fds = &*set;
    let count = (fds.count as usize).min(fds.array.len());
    fds.array[..count].iter().map(|&h| u64::from(h)).collect()
}

unsafe fn rewrite_fd_set(set: *mut FdSet, ready: &[u32]) {
    if set.is_null() {
        return;
    }
    let fds = &mut *set;
    fds.count = ready.len().min(fds.array.len()) as u32;
    for (slot, handle) in fds.array.iter_mut().zip(ready.iter()) {
        *slot = *handle;
    }
}

/// Determines the status of one or more sockets, waiting if necessary.
/// The fd_sets are rewritten to the ready handles on return.
///
/// # Safety
/// Set pointers must be null or valid FdSet buffers; `timeout` null or a
/// valid timeval.
pub unsafe fn select(
    _nfds: i32,
    readfds: *mut FdSet,
    writefds: *mut FdSet,
    exceptfds: *mut FdSet,
    timeout: *const Timeval,
) -> i32 {
    trace_call!("Select", _nfds, readfds, writefds, exceptfds, timeout);

    let wait: Option<Duration> = if timeout.is_null() {
        None
    } else {
        let tv = &*timeout;
        Some(
            Duration::from_secs(tv.sec.max(0) as u64)
                + Duration::from_micros(tv.usec.max(0) as u64),
        )
    };

    let read_handles = fd_set_handles(readfds);
    let write_handles = fd_set_handles(writefds);

    let probe = || {
        let mut ready_read: Vec<u32> = Vec::new();
        let mut ready_write: Vec<u32> = Vec::new();
        for &h in &read_handles {
            if let Some(st) = registry().get(h) {
                if check_read_ready(&st) {
                    ready_read.push(h as u32);
                }
            }
        }
        for &h in &write_handles {
            if let Some(st) = registry().get(h) {
                if check_write_ready(&st) {
                    ready_write.push(h as u32);
                }
            }
        }
        (ready_read, ready_write)
    };

    // Out-of-band data is not tracked; the except set always clears.
    if !exceptfds.is_null() {
        (*exceptfds).count = 0;
    }

    let slot = Arc::new(SignalSlot::new());
    let mut regs = Registrations::new(&slot);
    for &h in &read_handles {
        if let Some(st) = registry().get(h) {
            regs.subscribe(&st, Readiness::read_interest());
        }
    }
    for &h in &write_handles {
        if let Some(st) = registry().get(h) {
            regs.subscribe(&st, Readiness::write_interest());
        }
    }

    let (ready_read, ready_write) = probe();
    if !ready_read.is_empty()
        || !ready_write.is_empty()
        || wait.map_or(false, |d| d.is_zero())
    {
        let count = (ready_read.len() + ready_write.len()) as i32;
        rewrite_fd_set(readfds, &ready_read);
        rewrite_fd_set(writefds, &ready_write);
        return count;
    }

    slot.wait(wait);

    let (ready_read, ready_write) = probe();
    let count = (ready_read.len() + ready_write.len()) as i32;
    rewrite_fd_set(readfds, &ready_read);
    rewrite_fd_set(writefds, &ready_write);
    count
}

fn poll_revents(st: &SocketState, events: i16) -> i16 {
    let ready = st.readiness(
        Readiness::READABLE | Readiness::WRITABLE | Readiness::ERROR | Readiness::HANGUP,
    );
    let mut revents = 0i16;
    if ready.contains(Readiness::ERROR) {
        revents |= POLLERR;
    }
    if ready.contains(Readiness::HANGUP) {
        revents |= POLLHUP;
    }
    if events & (POLLIN | POLLRDNORM) != 0 && ready.contains(Readiness::READABLE) {
        revents |= POLLRDNORM;
    }
    if events & (POLLOUT | POLLWRNORM) != 0 && ready.contains(Readiness::WRITABLE) {
        revents |= POLLWRNORM;
    }
    revents
}

/// WSAPoll: readiness over a WSAPOLLFD array. POLLNVAL marks unknown
/// handles.
///
/// # Safety
/// `fd_array` must point to `count` valid WSAPOLLFD entries.
pub unsafe fn wsa_poll(fd_array: *mut WsaPollFd, count: u32, timeout_ms: i32) -> i32 {
    trace_call!("WSAPoll", fd_array, count, timeout_ms);
    if fd_array.is_null() || count == 0 {
        set_last_error(WSAEINVAL);
        return -1;
    }
    let entries = std::slice::from_raw_parts_mut(fd_array, count as usize);
    let wait = if timeout_ms < 0 {
        None
    } else {
        Some(Duration::from_millis(timeout_ms as u64))
    };

    let probe = |entries: &mut [WsaPollFd]| {
        let mut ready = 0i32;
        for entry in entries.iter_mut() {
            entry.revents = 0;
            match registry().get(u64::from(entry.fd)) {
                Some(st) => entry.revents = poll_revents(&st, entry.events),
                None => entry.revents = POLLNVAL,
            }
            if entry.revents != 0 {
                ready += 1;
            }
        }
        ready
    };

    let slot = Arc::new(SignalSlot::new());
    let mut regs = Registrations::new(&slot);
    for entry in entries.iter() {
        if let Some(st) = registry().get(u64::from(entry.fd)) {
            let mut interest = Readiness::ERROR | Readiness::HANGUP;
            if entry.events & (POLLIN | POLLRDNORM) != 0 {
                interest |= Readiness::READABLE;
            }
            if entry.events & (POLLOUT | POLLWRNORM) != 0 {
                interest |= Readiness::WRITABLE;
            }
            regs.subscribe(&st, interest);
        }
    }

    let ready = probe(entries);
    if ready > 0 || wait.map_or(false, |d| d.is_zero()) {
        return ready;
    }

    slot.wait(wait);
    probe(entries)
}

/// Binds a socket to an event object and a network-event mask. The socket
/// switches to non-blocking automatically; already-pending readiness is
/// delivered immediately.
///
/// # Safety
/// `event` is used as an opaque handle, never dereferenced.
pub unsafe fn wsa_event_select(s: u64, event: *mut c_void, network_events: i32) -> i32 {
    trace_call!("WSAEventSelect", s, event, network_events);
    let Some(st) = registry().get(s) else {
        set_last_error(WSAENOTSOCK);
        return -1;
    };
    let handle = event as usize;
    if handle != 0 && registry().get_event(handle).is_none() {
        set_last_error(WSAEINVAL);
        return -1;
    }

    st.unregister_waiter();
    st.set_event_selection(handle, network_events);
    st.set_nonblocking(true);
    st.rebind_waiter();
    0
}

/// Atomically consumes the accumulated fired events and drains the
/// associated event object.
///
/// # Safety
/// `network_events` must be null (reported WSAEFAULT) or valid.
pub unsafe fn wsa_enum_network_events(
    s: u64,
    event: *mut c_void,
    network_events: *mut WsaNetworkEvents,
) -> i32 {
    trace_call!("WSAEnumNetworkEvents", s, event, network_events);
    let Some(st) = registry().get(s) else {
        set_last_error(WSAENOTSOCK);
        return -1;
    };
    if network_events.is_null() {
        set_last_error(WSAEFAULT);
        return -1;
    }

    let fired = st.take_fired_events();
    let out = &mut *network_events;
    out.network_events = fired;
    out.error_code = [0; crate::types::FD_MAX_EVENTS];

    if !event.is_null() {
        if let Some(slot) = registry().get_event(event as usize) {
            slot.reset();
        }
    }
    0
}

/// Window-message notification is outside the bridge.
///
/// # Safety
/// Nothing is dereferenced.
pub unsafe fn wsa_async_select(s: u64, _hwnd: *mut c_void, _msg: u32, _events: i32) -> i32 {
    trace_call!("WSAAsyncSelect", s, _hwnd, _msg, _events);
    set_last_error(WSAEOPNOTSUPP);
    -1
}

/// Completion-port notification is outside the bridge.
///
/// # Safety
/// Nothing is dereferenced.
pub unsafe fn process_socket_notifications(
    _completion_port: *mut c_void,
    _registration_count: u32,
    _registration_infos: *mut c_void,
    _timeout_ms: u32,
    _completion_count: u32,
    _completion_infos: *mut c_void,
    _received_count: *mut u32,
) -> i32 {
    trace_call!("ProcessSocketNotifications");
    set_last_error(WSAEOPNOTSUPP);
    -1
}

/// # Safety
/// Nothing is dereferenced.
pub unsafe fn socket_notification_retrieve_events(
    _registration: *mut c_void,
    _events: *mut c_void,
) -> i32 {
    trace_call!("SocketNotificationRetrieveEvents");
    set_last_error(WSAEOPNOTSUPP);
    -1
}

/// Linear scan of an fd_set for a handle.
///
/// # Safety
/// `set` must be null or a valid FdSet.
pub unsafe fn wsa_fd_is_set(s: u64, set: *const FdSet) -> i32 {
    trace_call!("WSAFDIsSet", s, set);
    if set.is_null() {
        return 0;
    }
    let fds = &*set;
    let count = (fds.count as usize).min(fds.array.len());
    for &slot in &fds.array[..count] {
        if u64::from(slot) == s {
            return 1;
        }
    }
    0
}
