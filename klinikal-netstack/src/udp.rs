//! Datagram endpoints.

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{NetError, Result};
use crate::stack::StackInner;
use crate::waiter::{Readiness, WaitQueue};

/// Datagrams queued per socket before the stack starts dropping.
const RECV_QUEUE_DEPTH: usize = 512;

struct UdpState {
    queue: VecDeque<(SocketAddr, Vec<u8>)>,
    depth: usize,
    closed: bool,
}

pub struct UdpSocket {
    local: SocketAddr,
    peer: Mutex<Option<SocketAddr>>,
    state: Mutex<UdpState>,
    cond: Condvar,
    wq: Arc<WaitQueue>,
    read_timeout: Mutex<Option<Duration>>,
    write_timeout: Mutex<Option<Duration>>,
    broadcast: AtomicBool,
    tos: AtomicU32,
    stack: Weak<StackInner>,
}

impl UdpSocket {
    pub(crate) fn new(local: SocketAddr, stack: Weak<StackInner>) -> Arc<Self> {
        Arc::new(UdpSocket {
            local,
            peer: Mutex::new(None),
            state: Mutex::new(UdpState {
                queue: VecDeque::new(),
                depth: RECV_QUEUE_DEPTH,
                closed: false,
            }),
            cond: Condvar::new(),
            wq: Arc::new(WaitQueue::new()),
            read_timeout: Mutex::new(None),
            write_timeout: Mutex::new(None),
            broadcast: AtomicBool::new(false),
            tos: AtomicU32::new(0),
            stack,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.peer.lock()
    }

    pub(crate) fn set_peer(&self, peer: SocketAddr) {
        *self.peer.lock() = Some(peer);
    }

    pub fn is_connected(&self) -> bool {
        self.peer.lock().is_some()
    }

    /// Send to an explicit destination.
    pub fn send_to(&self, data: &[u8], dst: SocketAddr) -> Result<usize> {
        let stack = self.stack.upgrade().ok_or(NetError::Closed)?;
        stack.route_udp(self, data, dst)
    }

    /// Connected-mode send.
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        let peer = self.peer_addr().ok_or(NetError::NotConnected)?;
        self.send_to(data, peer)
    }

    /// Receive one datagram with the sticky timeout.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let deadline = self.read_timeout.lock().map(|t| Instant::now() + t);
        self.recv_from_deadline(buf, deadline)
    }

    /// Receive one datagram with an explicit deadline. Oversized datagrams
    /// are truncated to the caller's buffer.
    pub fn recv_from_deadline(
        &self,
        buf: &mut [u8],
        deadline: Option<Instant>,
    ) -> Result<(usize, SocketAddr)> {
        let mut state = self.state.lock();
        loop {
            if let Some((from, data)) = state.queue.pop_front() {
                let n = buf.len().min(data.len());
                buf[..n].copy_from_slice(&data[..n]);
                return Ok((n, from));
            }
            if state.closed {
                return Err(NetError::Closed);
            }
            match deadline {
                None => self.cond.wait(&mut state),
                Some(d) => {
                    if self.cond.wait_until(&mut state, d).timed_out() {
                        return Err(NetError::TimedOut);
                    }
                }
            }
        }
    }

    pub fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.recv_from(buf).map(|(n, _)| n)
    }

    pub fn recv_deadline(&self, buf: &mut [u8], deadline: Option<Instant>) -> Result<usize> {
        self.recv_from_deadline(buf, deadline).map(|(n, _)| n)
    }

    /// Inbound delivery, called by the stack. Connected sockets filter on
    /// the peer address; a full queue drops the datagram, as UDP does.
    pub(crate) fn deliver(&self, from: SocketAddr, data: Vec<u8>) {
        if let Some(peer) = self.peer_addr() {
            if peer != from {
                return;
            }
        }
        {
            let mut state = self.state.lock();
            if state.closed || state.queue.len() >= state.depth {
                return;
            }
            state.queue.push_back((from, data));
        }
        self.cond.notify_one();
        self.wq.notify(Readiness::READABLE);
    }

    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.queue.clear();
        }
        self.cond.notify_all();
        self.wq.notify(Readiness::HANGUP);
        if let Some(stack) = self.stack.upgrade() {
            stack.release_udp_port(self.local.port());
        }
    }

    pub fn readiness(&self, interest: Readiness) -> Readiness {
        let state = self.state.lock();
        let mut ready = Readiness::WRITABLE;
        if !state.queue.is_empty() {
            ready |= Readiness::READABLE;
        }
        if state.closed {
            ready |= Readiness::HANGUP;
        }
        ready & interest
    }

    pub fn wait_queue(&self) -> &Arc<WaitQueue> {
        &self.wq
    }

    pub fn pending_input(&self) -> usize {
        self.state.lock().queue.front().map_or(0, |(_, d)| d.len())
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) {
        *self.read_timeout.lock() = timeout;
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) {
        *self.write_timeout.lock() = timeout;
    }

    pub fn set_broadcast(&self, enable: bool) {
        self.broadcast.store(enable, Ordering::Relaxed);
    }

    pub fn broadcast(&self) -> bool {
        self.broadcast.load(Ordering::Relaxed)
    }

    pub fn set_tos(&self, tos: u32) {
        self.tos.store(tos, Ordering::Relaxed);
    }

    pub fn tos(&self) -> u32 {
        self.tos.load(Ordering::Relaxed)
    }

    /// Queue depth knob, driven by SO_RCVBUF.
    pub fn set_recv_buffer(&self, bytes: usize) {
        // One slot per typical 1400-byte datagram, at least one.
        self.state.lock().depth = (bytes / 1400).max(1);
    }

    pub fn local_ip(&self) -> IpAddr {
        self.local.ip()
    }
}
