//! Stream endpoints.
//!
//! A [`TcpStream`] is a pair of byte pipes with a readiness queue on each
//! end; the stack creates both ends at dial time and parks the passive end
//! in the listener's accept queue. Option knobs that have no observable
//! effect inside a userspace stack (keepalive, nodelay, MSS, TOS) are
//! recorded so the bridge's store-then-apply option model round-trips.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{NetError, Result};
use crate::pipe::Pipe;
use crate::stack::StackInner;
use crate::waiter::{Readiness, WaitQueue};

const DEFAULT_MSS: usize = 1380;

#[derive(Debug)]
pub struct TcpStream {
    local: SocketAddr,
    peer: SocketAddr,
    /// Bytes flowing from the peer to us.
    rx: Arc<Pipe>,
    /// Bytes flowing from us to the peer.
    tx: Arc<Pipe>,
    queue: Arc<WaitQueue>,
    read_timeout: Mutex<Option<Duration>>,
    write_timeout: Mutex<Option<Duration>>,
    nodelay: AtomicBool,
    keepalive: AtomicBool,
    linger: Mutex<Option<u16>>,
    tos: AtomicU32,
    mss: AtomicUsize,
}

impl TcpStream {
    /// Build both ends of an established connection.
    pub(crate) fn pair(
        client_local: SocketAddr,
        server_local: SocketAddr,
    ) -> (Arc<TcpStream>, Arc<TcpStream>) {
        let client_to_server = Pipe::new();
        let server_to_client = Pipe::new();
        let client_queue = Arc::new(WaitQueue::new());
        let server_queue = Arc::new(WaitQueue::new());

        client_to_server.attach_writer(&client_queue);
        client_to_server.attach_reader(&server_queue);
        server_to_client.attach_writer(&server_queue);
        server_to_client.attach_reader(&client_queue);

        let client = Arc::new(TcpStream {
            local: client_local,
            peer: server_local,
            rx: server_to_client.clone(),
            tx: client_to_server.clone(),
            queue: client_queue,
            read_timeout: Mutex::new(None),
            write_timeout: Mutex::new(None),
            nodelay: AtomicBool::new(false),
            keepalive: AtomicBool::new(false),
            linger: Mutex::new(None),
            tos: AtomicU32::new(0),
            mss: AtomicUsize::new(DEFAULT_MSS),
        });
        let server = Arc::new(TcpStream {
            local: server_local,
            peer: client_local,
            rx: client_to_server,
            tx: server_to_client,
            queue: server_queue,
            read_timeout: Mutex::new(None),
            write_timeout: Mutex::new(None),
            nodelay: AtomicBool::new(false),
            keepalive: AtomicBool::new(false),
            linger: Mutex::new(None),
            tos: AtomicU32::new(0),
            mss: AtomicUsize::new(DEFAULT_MSS),
        });
        (client, server)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Read using the sticky receive timeout.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let deadline = self.read_timeout.lock().map(|t| Instant::now() + t);
        self.rx.read(buf, deadline)
    }

    /// Read with an explicit deadline, overriding the sticky timeout.
    pub fn read_deadline(&self, buf: &mut [u8], deadline: Option<Instant>) -> Result<usize> {
        self.rx.read(buf, deadline)
    }

    /// Write using the sticky send timeout.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let deadline = self.write_timeout.lock().map(|t| Instant::now() + t);
        self.tx.write(buf, deadline)
    }

    /// Write with an explicit deadline, overriding the sticky timeout.
    pub fn write_deadline(&self, buf: &[u8], deadline: Option<Instant>) -> Result<usize> {
        self.tx.write(buf, deadline)
    }

    /// Write the whole buffer, honouring the sticky send timeout.
    pub fn write_all(&self, mut buf: &[u8]) -> Result<usize> {
        let total = buf.len();
        while !buf.is_empty() {
            let n = self.write(buf)?;
            buf = &buf[n..];
        }
        Ok(total)
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) {
        *self.read_timeout.lock() = timeout;
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) {
        *self.write_timeout.lock() = timeout;
    }

    /// Stop receiving: buffered data is dropped and peer writes fail.
    pub fn close_read(&self) {
        self.rx.close_read();
    }

    /// Half-close the send direction: the peer drains then sees EOF.
    pub fn close_write(&self) {
        self.tx.close_write();
    }

    /// Full close.
    pub fn close(&self) {
        self.tx.close_write();
        self.rx.close_read();
        self.queue.notify(Readiness::HANGUP);
    }

    /// Abortive teardown, used when a listener is torn down with pending
    /// connections.
    pub(crate) fn reset(&self) {
        self.tx.reset();
        self.rx.reset();
    }

    pub fn readiness(&self, interest: Readiness) -> Readiness {
        let mut ready = Readiness::empty();
        if self.rx.readable_now() {
            ready |= Readiness::READABLE;
        }
        if self.tx.writable_now() {
            ready |= Readiness::WRITABLE;
        }
        if self.rx.hangup_now() {
            ready |= Readiness::HANGUP;
        }
        if self.rx.error_now() || self.tx.error_now() {
            ready |= Readiness::ERROR;
        }
        ready & interest
    }

    pub fn wait_queue(&self) -> &Arc<WaitQueue> {
        &self.queue
    }

    /// Bytes queued for reading; backs the peek-path FIONREAD estimate.
    pub fn pending_input(&self) -> usize {
        self.rx.buffered()
    }

    pub fn set_nodelay(&self, enable: bool) {
        self.nodelay.store(enable, Ordering::Relaxed);
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay.load(Ordering::Relaxed)
    }

    pub fn set_keepalive(&self, enable: bool) {
        self.keepalive.store(enable, Ordering::Relaxed);
    }

    pub fn keepalive(&self) -> bool {
        self.keepalive.load(Ordering::Relaxed)
    }

    /// `None` disables linger.
    pub fn set_linger(&self, seconds: Option<u16>) {
        *self.linger.lock() = seconds;
    }

    pub fn linger(&self) -> Option<u16> {
        *self.linger.lock()
    }

    pub fn set_recv_buffer(&self, bytes: usize) {
        self.rx.set_capacity(bytes);
    }

    pub fn set_send_buffer(&self, bytes: usize) {
        self.tx.set_capacity(bytes);
    }

    pub fn set_tos(&self, tos: u32) {
        self.tos.store(tos, Ordering::Relaxed);
    }

    pub fn tos(&self) -> u32 {
        self.tos.load(Ordering::Relaxed)
    }

    pub fn set_mss(&self, mss: usize) {
        self.mss.store(mss.max(1), Ordering::Relaxed);
    }

    pub fn mss(&self) -> usize {
        self.mss.load(Ordering::Relaxed)
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        self.tx.close_write();
        self.rx.close_read();
    }
}

#[derive(Debug)]
struct ListenerState {
    pending: VecDeque<Arc<TcpStream>>,
    backlog: usize,
    closed: bool,
}

#[derive(Debug)]
pub struct TcpListener {
    local: SocketAddr,
    state: Mutex<ListenerState>,
    cond: Condvar,
    queue: Arc<WaitQueue>,
    stack: Weak<StackInner>,
}

impl TcpListener {
    pub(crate) fn new(local: SocketAddr, backlog: usize, stack: Weak<StackInner>) -> Arc<Self> {
        Arc::new(TcpListener {
            local,
            state: Mutex::new(ListenerState {
                pending: VecDeque::new(),
                backlog: backlog.max(1),
                closed: false,
            }),
            cond: Condvar::new(),
            queue: Arc::new(WaitQueue::new()),
            stack,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Block until a connection is pending.
    pub fn accept(&self) -> Result<Arc<TcpStream>> {
        let mut state = self.state.lock();
        loop {
            if let Some(stream) = state.pending.pop_front() {
                return Ok(stream);
            }
            if state.closed {
                return Err(NetError::Closed);
            }
            self.cond.wait(&mut state);
        }
    }

    /// Queue an established connection, called by the stack's dial path.
    pub(crate) fn push(&self, stream: Arc<TcpStream>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(NetError::ConnectionRefused);
            }
            if state.pending.len() >= state.backlog {
                return Err(NetError::ConnectionRefused);
            }
            state.pending.push_back(stream);
        }
        self.cond.notify_one();
        self.queue.notify(Readiness::READABLE);
        Ok(())
    }

    pub fn close(&self) {
        let drained: Vec<Arc<TcpStream>> = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.pending.drain(..).collect()
        };
        for stream in drained {
            stream.reset();
        }
        self.cond.notify_all();
        self.queue.notify(Readiness::READABLE | Readiness::HANGUP);
        if let Some(stack) = self.stack.upgrade() {
            stack.release_tcp_port(self.local.port());
        }
    }

    pub fn readiness(&self, interest: Readiness) -> Readiness {
        let state = self.state.lock();
        let mut ready = Readiness::empty();
        if !state.pending.is_empty() {
            ready |= Readiness::READABLE;
        }
        if state.closed {
            ready |= Readiness::HANGUP;
        }
        ready & interest
    }

    pub fn wait_queue(&self) -> &Arc<WaitQueue> {
        &self.queue
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        // close() cannot be called here (it needs &self through an Arc held
        // by the port table); the stack removes the table entry explicitly.
        let mut state = self.state.lock();
        state.closed = true;
    }
}
