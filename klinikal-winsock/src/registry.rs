//! The handle registry and per-socket state.
//!
//! Sockets, event objects and overlapped completions live in one singleton
//! keyed by monotonically increasing 64-bit handles (never reused within a
//! process lifetime). Map access is serialized under reader/writer locks;
//! the fired-event bits on each socket are atomics updated outside the
//! locks.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use klinikal_netstack::{
    PingSocket, Readiness, SignalSlot, TcpListener, TcpStream, UdpSocket, Wake, WaitQueue,
};

use crate::types::{FD_ACCEPT, FD_CLOSE, FD_READ, FD_WRITE, SOCK_DGRAM, SOCK_RAW};

/// First allocated handle is 1001.
const HANDLE_BASE: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Stream,
    Dgram,
    RawIcmp,
}

impl SocketKind {
    pub fn from_socktype(socktype: i32) -> SocketKind {
        match socktype {
            SOCK_DGRAM => SocketKind::Dgram,
            SOCK_RAW => SocketKind::RawIcmp,
            _ => SocketKind::Stream,
        }
    }
}

/// The live transport endpoint behind a socket, one variant per kind of
/// traffic it can carry.
#[derive(Clone)]
pub enum Endpoint {
    Stream(Arc<TcpStream>),
    Dgram(Arc<UdpSocket>),
    Ping(Arc<PingSocket>),
}

impl Endpoint {
    pub fn close(&self) {
        match self {
            Endpoint::Stream(s) => s.close(),
            Endpoint::Dgram(d) => d.close(),
            Endpoint::Ping(p) => p.close(),
        }
    }

    pub fn readiness(&self, interest: Readiness) -> Readiness {
        match self {
            Endpoint::Stream(s) => s.readiness(interest),
            Endpoint::Dgram(d) => d.readiness(interest),
            Endpoint::Ping(p) => p.readiness(interest),
        }
    }

    pub fn wait_queue(&self) -> Arc<WaitQueue> {
        match self {
            Endpoint::Stream(s) => s.wait_queue().clone(),
            Endpoint::Dgram(d) => d.wait_queue().clone(),
            Endpoint::Ping(p) => p.wait_queue().clone(),
        }
    }

    /// Whether the endpoint has a fixed remote, i.e. plain send/recv work.
    pub fn is_connected(&self) -> bool {
        match self {
            Endpoint::Stream(_) => true,
            Endpoint::Dgram(d) => d.is_connected(),
            Endpoint::Ping(p) => p.is_connected(),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Endpoint::Stream(s) => Some(s.local_addr()),
            Endpoint::Dgram(d) => Some(d.local_addr()),
            Endpoint::Ping(p) => Some(SocketAddr::new(p.local_ip(), 0)),
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self {
            Endpoint::Stream(s) => Some(s.peer_addr()),
            Endpoint::Dgram(d) => d.peer_addr(),
            Endpoint::Ping(p) => p.peer_ip().map(|ip| SocketAddr::new(ip, 0)),
        }
    }

    pub fn peer_ip(&self) -> Option<IpAddr> {
        self.peer_addr().map(|sa| sa.ip())
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) {
        match self {
            Endpoint::Stream(s) => s.set_read_timeout(timeout),
            Endpoint::Dgram(d) => d.set_read_timeout(timeout),
            Endpoint::Ping(p) => p.set_read_timeout(timeout),
        }
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) {
        match self {
            Endpoint::Stream(s) => s.set_write_timeout(timeout),
            Endpoint::Dgram(d) => d.set_write_timeout(timeout),
            Endpoint::Ping(p) => p.set_write_timeout(timeout),
        }
    }

    /// Connected-mode write with the endpoint's sticky timeout. Streams
    /// write the whole buffer or fail, matching the blocking contract.
    pub fn write(&self, data: &[u8]) -> klinikal_netstack::Result<usize> {
        match self {
            Endpoint::Stream(s) => s.write_all(data),
            Endpoint::Dgram(d) => d.send(data),
            Endpoint::Ping(p) => p.send(data),
        }
    }

    /// Write with an explicit deadline overriding the sticky timeout.
    pub fn write_deadline(
        &self,
        data: &[u8],
        deadline: Option<Instant>,
    ) -> klinikal_netstack::Result<usize> {
        match self {
            Endpoint::Stream(s) => {
                let mut off = 0;
                while off < data.len() {
                    off += s.write_deadline(&data[off..], deadline)?;
                }
                Ok(data.len())
            }
            Endpoint::Dgram(d) => d.send(data),
            Endpoint::Ping(p) => p.send(data),
        }
    }

    /// Connected-mode read with the endpoint's sticky timeout.
    pub fn read(&self, buf: &mut [u8]) -> klinikal_netstack::Result<usize> {
        match self {
            Endpoint::Stream(s) => s.read(buf),
            Endpoint::Dgram(d) => d.recv(buf),
            Endpoint::Ping(p) => p.recv(buf),
        }
    }

    /// Read with an explicit deadline overriding the sticky timeout.
    pub fn read_deadline(
        &self,
        buf: &mut [u8],
        deadline: Option<Instant>,
    ) -> klinikal_netstack::Result<usize> {
        match self {
            Endpoint::Stream(s) => s.read_deadline(buf, deadline),
            Endpoint::Dgram(d) => d.recv_deadline(buf, deadline),
            Endpoint::Ping(p) => p.recv_deadline(buf, deadline),
        }
    }

    /// Bytes immediately available to read, used by the FIONREAD peek
    /// path.
    pub fn pending_input(&self) -> usize {
        match self {
            Endpoint::Stream(s) => s.pending_input(),
            Endpoint::Dgram(d) => d.pending_input(),
            Endpoint::Ping(_) => 0,
        }
    }
}

struct SocketInner {
    endpoint: Option<Endpoint>,
    listener: Option<Arc<TcpListener>>,
    bound_addr: String,
    /// Raw option bytes keyed by `level<<16 | optname`, re-applied to a
    /// fresh endpoint on connect.
    options: HashMap<i32, Vec<u8>>,
    /// Bytes taken by MSG_PEEK, drained by the next non-peek recv.
    peek_buf: Vec<u8>,
    /// Active readiness registration (queue, id) for the waiter bridge.
    waiter: Option<(Arc<WaitQueue>, u64)>,
}

/// Per-handle record.
pub struct SocketState {
    pub handle: u64,
    pub kind: SocketKind,
    pub family: i32,
    pub protocol: i32,
    inner: Mutex<SocketInner>,
    nonblocking: AtomicBool,
    last_error: AtomicI32,
    has_listener: AtomicBool,
    /// Associated event object handle (0 = none).
    event_handle: AtomicUsize,
    /// Requested FD_* mask from WSAEventSelect.
    network_events: AtomicI32,
    /// Accumulated FD_* bits, consumed by WSAEnumNetworkEvents.
    fired_events: AtomicI32,
}

impl SocketState {
    pub fn new(kind: SocketKind, family: i32, protocol: i32) -> SocketState {
        SocketState {
            handle: 0,
            kind,
            family,
            protocol,
            inner: Mutex::new(SocketInner {
                endpoint: None,
                listener: None,
                bound_addr: String::new(),
                options: HashMap::new(),
                peek_buf: Vec::new(),
                waiter: None,
            }),
            nonblocking: AtomicBool::new(false),
            last_error: AtomicI32::new(0),
            has_listener: AtomicBool::new(false),
            event_handle: AtomicUsize::new(0),
            network_events: AtomicI32::new(0),
            fired_events: AtomicI32::new(0),
        }
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.inner.lock().endpoint.clone()
    }

    pub fn listener(&self) -> Option<Arc<TcpListener>> {
        self.inner.lock().listener.clone()
    }

    /// Install a fresh endpoint, closing any previous one.
    pub fn set_endpoint(&self, endpoint: Endpoint) {
        let old = {
            let mut inner = self.inner.lock();
            inner.endpoint.replace(endpoint)
        };
        if let Some(old) = old {
            old.close();
        }
    }

    pub fn set_listener(&self, listener: Arc<TcpListener>) {
        self.inner.lock().listener = Some(listener);
        self.has_listener.store(true, Ordering::SeqCst);
    }

    pub fn bound_addr(&self) -> String {
        self.inner.lock().bound_addr.clone()
    }

    pub fn set_bound_addr(&self, addr: String) {
        self.inner.lock().bound_addr = addr;
    }

    pub fn store_option(&self, key: i32, value: Vec<u8>) {
        self.inner.lock().options.insert(key, value);
    }

    pub fn option(&self, key: i32) -> Option<Vec<u8>> {
        self.inner.lock().options.get(&key).cloned()
    }

    pub fn options_snapshot(&self) -> Vec<(i32, Vec<u8>)> {
        self.inner
            .lock()
            .options
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    pub fn peek_len(&self) -> usize {
        self.inner.lock().peek_buf.len()
    }

    /// Copy up to `out.len()` bytes from the peek buffer; consume them
    /// unless `keep` is set.
    pub fn drain_peek(&self, out: &mut [u8], keep: bool) -> usize {
        let mut inner = self.inner.lock();
        let n = out.len().min(inner.peek_buf.len());
        out[..n].copy_from_slice(&inner.peek_buf[..n]);
        if !keep {
            inner.peek_buf.drain(..n);
        }
        n
    }

    pub fn append_peek(&self, data: &[u8]) {
        self.inner.lock().peek_buf.extend_from_slice(data);
    }

    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking.load(Ordering::SeqCst)
    }

    pub fn set_nonblocking(&self, enable: bool) {
        self.nonblocking.store(enable, Ordering::SeqCst);
    }

    /// Pending SO_ERROR value; reading clears it.
    pub fn take_socket_error(&self) -> i32 {
        self.last_error.swap(0, Ordering::SeqCst)
    }

    pub fn set_socket_error(&self, code: i32) {
        self.last_error.store(code, Ordering::SeqCst);
    }

    pub fn event_handle(&self) -> usize {
        self.event_handle.load(Ordering::SeqCst)
    }

    pub fn set_event_selection(&self, event_handle: usize, mask: i32) {
        self.event_handle.store(event_handle, Ordering::SeqCst);
        self.network_events.store(mask, Ordering::SeqCst);
    }

    pub fn network_events(&self) -> i32 {
        self.network_events.load(Ordering::SeqCst)
    }

    /// Swap the accumulated event bits to zero; each bit is observed
    /// exactly once.
    pub fn take_fired_events(&self) -> i32 {
        self.fired_events.swap(0, Ordering::SeqCst)
    }

    /// The deadline implementing non-blocking mode: effectively "already
    /// expired", so a would-block turns into an immediate timeout.
    pub fn op_deadline(&self) -> Option<Instant> {
        if self.is_nonblocking() {
            Some(Instant::now() + Duration::from_nanos(1))
        } else {
            None
        }
    }

    fn interest_from_mask(mask: i32) -> Readiness {
        let mut interest = Readiness::empty();
        if mask & (FD_READ | FD_ACCEPT) != 0 {
            interest |= Readiness::READABLE;
        }
        if mask & FD_WRITE != 0 {
            interest |= Readiness::WRITABLE;
        }
        if mask & FD_CLOSE != 0 {
            interest |= Readiness::ERROR | Readiness::HANGUP;
        }
        interest
    }

    /// Current readiness queue, from the endpoint or the listener.
    pub fn wait_queue(&self) -> Option<Arc<WaitQueue>> {
        let inner = self.inner.lock();
        if let Some(ep) = &inner.endpoint {
            Some(ep.wait_queue())
        } else {
            inner.listener.as_ref().map(|l| l.wait_queue().clone())
        }
    }

    /// Readiness probe across endpoint or listener.
    pub fn readiness(&self, interest: Readiness) -> Readiness {
        let (endpoint, listener) = {
            let inner = self.inner.lock();
            (inner.endpoint.clone(), inner.listener.clone())
        };
        if let Some(ep) = endpoint {
            ep.readiness(interest)
        } else if let Some(l) = listener {
            l.readiness(interest)
        } else {
            Readiness::empty()
        }
    }

    /// Drop the active waiter registration, if any.
    pub fn unregister_waiter(&self) {
        let waiter = self.inner.lock().waiter.take();
        if let Some((queue, id)) = waiter {
            queue.unregister(id);
        }
    }

    /// Re-subscribe this socket to its (possibly new) endpoint's readiness
    /// queue. Installs a persistent waiter only when WSAEventSelect state
    /// is present, and replays already-pending readiness so no edge is
    /// lost across the rebind.
    pub fn rebind_waiter(self: &Arc<Self>) {
        self.unregister_waiter();

        let mask = self.network_events();
        if mask == 0 || self.event_handle() == 0 {
            return;
        }
        let interest = Self::interest_from_mask(mask);
        if interest.is_empty() {
            return;
        }
        let Some(queue) = self.wait_queue() else {
            return;
        };
        let waker: Arc<dyn Wake> = self.clone();
        let id = queue.register(interest, Arc::downgrade(&waker));
        self.inner.lock().waiter = Some((queue, id));

        let ready = self.readiness(interest);
        if !ready.is_empty() {
            self.on_event(ready);
        }
    }

    /// Close transport resources and drop the waiter registration.
    pub(crate) fn teardown(&self) {
        self.unregister_waiter();
        let (endpoint, listener) = {
            let mut inner = self.inner.lock();
            (inner.endpoint.take(), inner.listener.take())
        };
        if let Some(ep) = endpoint {
            ep.close();
        }
        if let Some(l) = listener {
            l.close();
        }
        self.has_listener.store(false, Ordering::SeqCst);
    }
}

impl Wake for SocketState {
    /// The waiter bridge: translate transport readiness into FD_* bits,
    /// accumulate the requested subset, and signal the selected event
    /// object.
    fn on_event(&self, ready: Readiness) {
        let mut fired = 0i32;
        if ready.contains(Readiness::READABLE) {
            if self.has_listener.load(Ordering::SeqCst) {
                fired |= FD_ACCEPT;
            } else {
                fired |= FD_READ;
            }
        }
        if ready.contains(Readiness::WRITABLE) {
            fired |= FD_WRITE;
        }
        if ready.intersects(Readiness::ERROR | Readiness::HANGUP) {
            fired |= FD_CLOSE;
        }

        fired &= self.network_events.load(Ordering::SeqCst);
        if fired == 0 {
            return;
        }
        self.fired_events.fetch_or(fired, Ordering::SeqCst);

        let event = self.event_handle.load(Ordering::SeqCst);
        if event != 0 {
            if let Some(slot) = registry().get_event(event) {
                slot.signal();
            }
        }
    }
}

/// Completion record for one overlapped operation, keyed by the caller's
/// WSAOVERLAPPED pointer.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlappedResult {
    pub bytes: u32,
    pub error: i32,
    pub complete: bool,
    pub flags: u32,
}

pub struct Registry {
    sockets: RwLock<HashMap<u64, Arc<SocketState>>>,
    events: RwLock<HashMap<usize, Arc<SignalSlot>>>,
    overlapped: dashmap::DashMap<usize, OverlappedResult>,
    next_handle: AtomicU64,
}

static REGISTRY: Lazy<Registry> = Lazy::new(|| Registry {
    sockets: RwLock::new(HashMap::new()),
    events: RwLock::new(HashMap::new()),
    overlapped: dashmap::DashMap::new(),
    next_handle: AtomicU64::new(HANDLE_BASE),
});

pub fn registry() -> &'static Registry {
    &REGISTRY
}

impl Registry {
    fn alloc_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Insert a socket under a fresh handle.
    pub fn register(&self, mut state: SocketState) -> (u64, Arc<SocketState>) {
        let handle = self.alloc_handle();
        state.handle = handle;
        let state = Arc::new(state);
        self.sockets.write().insert(handle, state.clone());
        (handle, state)
    }

    pub fn get(&self, handle: u64) -> Option<Arc<SocketState>> {
        self.sockets.read().get(&handle).cloned()
    }

    /// Remove a socket; its waiter registration goes with it. Transport
    /// resources are the caller's to close.
    pub fn unregister(&self, handle: u64) -> Option<Arc<SocketState>> {
        let state = self.sockets.write().remove(&handle);
        if let Some(state) = &state {
            state.unregister_waiter();
        }
        state
    }

    /// Close every socket and event and empty the maps; the WSACleanup
    /// teardown path.
    pub fn purge_all(&self) {
        let drained: Vec<Arc<SocketState>> = {
            let mut sockets = self.sockets.write();
            sockets.drain().map(|(_, st)| st).collect()
        };
        for state in drained {
            state.teardown();
        }
        self.events.write().clear();
        self.overlapped.clear();
    }

    /// Create an event object handle with a one-slot signal.
    pub fn register_event(&self) -> usize {
        let handle = self.alloc_handle() as usize;
        self.events
            .write()
            .insert(handle, Arc::new(SignalSlot::new()));
        handle
    }

    pub fn get_event(&self, handle: usize) -> Option<Arc<SignalSlot>> {
        self.events.read().get(&handle).cloned()
    }

    pub fn unregister_event(&self, handle: usize) {
        self.events.write().remove(&handle);
    }

    pub fn set_overlapped(&self, key: usize, result: OverlappedResult) {
        self.overlapped.insert(key, result);
    }

    /// Retrieve and remove a completion record.
    pub fn take_overlapped(&self, key: usize) -> Option<OverlappedResult> {
        self.overlapped.remove(&key).map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_monotonic_and_unique() {
        let (a, _) = registry().register(SocketState::new(SocketKind::Stream, 2, 6));
        let (b, _) = registry().register(SocketState::new(SocketKind::Dgram, 2, 17));
        assert!(b > a);
        assert!(a > HANDLE_BASE);
        registry().unregister(a);
        registry().unregister(b);
        // Closed handles are never reissued.
        let (c, _) = registry().register(SocketState::new(SocketKind::Stream, 2, 6));
        assert!(c > b);
        registry().unregister(c);
    }

    #[test]
    fn get_after_unregister_fails() {
        let (h, _) = registry().register(SocketState::new(SocketKind::Stream, 2, 6));
        assert!(registry().get(h).is_some());
        registry().unregister(h);
        assert!(registry().get(h).is_none());
    }

    #[test]
    fn event_objects_signal_and_drain() {
        let h = registry().register_event();
        let slot = registry().get_event(h).unwrap();
        assert!(slot.signal());
        assert!(slot.reset());
        registry().unregister_event(h);
        assert!(registry().get_event(h).is_none());
    }

    #[test]
    fn overlapped_records_are_consumed_once() {
        let key = 0xDEAD_BEEFusize;
        registry().set_overlapped(
            key,
            OverlappedResult {
                bytes: 5,
                error: 0,
                complete: true,
                flags: 0,
            },
        );
        let got = registry().take_overlapped(key).unwrap();
        assert_eq!(got.bytes, 5);
        assert!(registry().take_overlapped(key).is_none());
    }

    #[test]
    fn peek_buffer_drains_fifo() {
        let st = SocketState::new(SocketKind::Stream, 2, 6);
        st.append_peek(b"abcdef");
        let mut buf = [0u8; 4];
        assert_eq!(st.drain_peek(&mut buf, true), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(st.peek_len(), 6);
        assert_eq!(st.drain_peek(&mut buf, false), 4);
        assert_eq!(st.peek_len(), 2);
        let mut rest = [0u8; 4];
        assert_eq!(st.drain_peek(&mut rest, false), 2);
        assert_eq!(&rest[..2], b"ef");
    }

    #[test]
    fn fired_events_accumulate_with_or() {
        let st = SocketState::new(SocketKind::Stream, 2, 6);
        st.set_event_selection(0, FD_READ | FD_CLOSE);
        st.on_event(Readiness::READABLE);
        st.on_event(Readiness::READABLE);
        st.on_event(Readiness::WRITABLE); // not in the mask
        assert_eq!(st.take_fired_events(), FD_READ);
        assert_eq!(st.take_fired_events(), 0);
    }
}
