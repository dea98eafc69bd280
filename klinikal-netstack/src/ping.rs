//! ICMP echo endpoints.
//!
//! A ping socket carries whole ICMP messages (header + payload, no IP
//! header). Outbound echo requests are stamped with the socket's identifier
//! so replies can be routed back; the stack itself answers echo requests
//! addressed to one of its interface addresses.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::AtomicU32;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{NetError, Result};
use crate::stack::StackInner;
use crate::waiter::{Readiness, WaitQueue};

const RECV_QUEUE_DEPTH: usize = 64;

struct PingState {
    queue: VecDeque<(IpAddr, Vec<u8>)>,
    closed: bool,
}

pub struct PingSocket {
    ident: u16,
    local: IpAddr,
    peer: Mutex<Option<IpAddr>>,
    state: Mutex<PingState>,
    cond: Condvar,
    wq: Arc<WaitQueue>,
    read_timeout: Mutex<Option<Duration>>,
    write_timeout: Mutex<Option<Duration>>,
    tos: AtomicU32,
    stack: Weak<StackInner>,
}

impl PingSocket {
    pub(crate) fn new(ident: u16, local: IpAddr, stack: Weak<StackInner>) -> Arc<Self> {
        Arc::new(PingSocket {
            ident,
            local,
            peer: Mutex::new(None),
            state: Mutex::new(PingState {
                queue: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
            wq: Arc::new(WaitQueue::new()),
            read_timeout: Mutex::new(None),
            write_timeout: Mutex::new(None),
            tos: AtomicU32::new(0),
            stack,
        })
    }

    /// Echo identifier used to stamp outbound requests and demultiplex
    /// replies.
    pub fn ident(&self) -> u16 {
        self.ident
    }

    pub fn local_ip(&self) -> IpAddr {
        self.local
    }

    pub fn peer_ip(&self) -> Option<IpAddr> {
        *self.peer.lock()
    }

    pub(crate) fn set_peer(&self, peer: IpAddr) {
        *self.peer.lock() = Some(peer);
    }

    pub fn is_connected(&self) -> bool {
        self.peer.lock().is_some()
    }

    /// Send an ICMP message to `dst`. The message's echo identifier is
    /// rewritten to this socket's identifier.
    pub fn send_to(&self, message: &[u8], dst: IpAddr) -> Result<usize> {
        let stack = self.stack.upgrade().ok_or(NetError::Closed)?;
        stack.route_ping(self, message, dst)
    }

    pub fn send(&self, message: &[u8]) -> Result<usize> {
        let peer = self.peer_ip().ok_or(NetError::NotConnected)?;
        self.send_to(message, peer)
    }

    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, IpAddr)> {
        let deadline = self.read_timeout.lock().map(|t| Instant::now() + t);
        self.recv_from_deadline(buf, deadline)
    }

    pub fn recv_from_deadline(
        &self,
        buf: &mut [u8],
        deadline: Option<Instant>,
    ) -> Result<(usize, IpAddr)> {
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

    pub(crate) fn deliver(&self, from: IpAddr, message: Vec<u8>) {
        if let Some(peer) = self.peer_ip() {
            if peer != from {
                return;
            }
        }
        {
            let mut state = self.state.lock();
            if state.closed || state.queue.len() >= RECV_QUEUE_DEPTH {
                return;
            }
            state.queue.push_back((from, message));
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
            stack.release_ping_ident(self.ident);
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

    pub fn set_read_timeout(&self, timeout: Option<Duration>) {
        *self.read_timeout.lock() = timeout;
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) {
        *self.write_timeout.lock() = timeout;
    }

    pub fn set_tos(&self, tos: u32) {
        self.tos.store(tos, std::sync::atomic::Ordering::Relaxed);
    }
}
