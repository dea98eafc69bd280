//! Bounded byte ring backing one direction of a stream endpoint.
//!
//! Each `TcpStream` pair shares two pipes, one per direction. A pipe knows
//! the wait queues of the endpoints on either side so that writes wake the
//! reader and drained space wakes the writer.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{NetError, Result};
use crate::waiter::{Readiness, WaitQueue};

const DEFAULT_CAPACITY: usize = 64 * 1024;

#[derive(Debug)]
struct PipeState {
    buf: VecDeque<u8>,
    capacity: usize,
    /// Writer half-closed: drained bytes then EOF.
    write_closed: bool,
    /// Reader shut down: buffered bytes discarded, further writes fail.
    read_closed: bool,
    /// Hard teardown; both directions error out.
    reset: bool,
}

#[derive(Debug)]
pub struct Pipe {
    state: Mutex<PipeState>,
    readable: Condvar,
    writable: Condvar,
    reader_queue: Mutex<Weak<WaitQueue>>,
    writer_queue: Mutex<Weak<WaitQueue>>,
}

impl Pipe {
    pub fn new() -> Arc<Pipe> {
        Arc::new(Pipe {
            state: Mutex::new(PipeState {
                buf: VecDeque::new(),
                capacity: DEFAULT_CAPACITY,
                write_closed: false,
                read_closed: false,
                reset: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            reader_queue: Mutex::new(Weak::new()),
            writer_queue: Mutex::new(Weak::new()),
        })
    }

    pub fn attach_reader(&self, queue: &Arc<WaitQueue>) {
        *self.reader_queue.lock() = Arc::downgrade(queue);
    }

    pub fn attach_writer(&self, queue: &Arc<WaitQueue>) {
        *self.writer_queue.lock() = Arc::downgrade(queue);
    }

    fn wake_reader(&self, ready: Readiness) {
        if let Some(q) = self.reader_queue.lock().upgrade() {
            q.notify(ready);
        }
    }

    fn wake_writer(&self, ready: Readiness) {
        if let Some(q) = self.writer_queue.lock().upgrade() {
            q.notify(ready);
        }
    }

    /// Write as many bytes as currently fit, blocking for space until the
    /// deadline when the ring is full. Returns the number of bytes accepted
    /// (short writes are possible under a deadline).
    pub fn write(&self, data: &[u8], deadline: Option<Instant>) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock();
        loop {
            if state.reset {
                return Err(NetError::ConnectionReset);
            }
            if state.write_closed {
                return Err(NetError::Closed);
            }
            if state.read_closed {
                // Peer is no longer reading.
                return Err(NetError::ConnectionReset);
            }
            let space = state.capacity.saturating_sub(state.buf.len());
            if space > 0 {
                let n = space.min(data.len());
                state.buf.extend(&data[..n]);
                drop(state);
                self.readable.notify_all();
                self.wake_reader(Readiness::READABLE);
                return Ok(n);
            }
            if wait_until(&self.writable, &mut state, deadline) {
                return Err(NetError::TimedOut);
            }
        }
    }

    /// Read available bytes, blocking until the deadline when the ring is
    /// empty. Returns `Ok(0)` at EOF.
    pub fn read(&self, out: &mut [u8], deadline: Option<Instant>) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock();
        loop {
            if state.read_closed {
                return Err(NetError::Closed);
            }
            if !state.buf.is_empty() {
                let n = out.len().min(state.buf.len());
                for slot in out.iter_mut().take(n) {
                    *slot = state.buf.pop_front().unwrap();
                }
                drop(state);
                self.writable.notify_all();
                self.wake_writer(Readiness::WRITABLE);
                return Ok(n);
            }
            if state.write_closed {
                return Ok(0);
            }
            if state.reset {
                return Err(NetError::ConnectionReset);
            }
            if wait_until(&self.readable, &mut state, deadline) {
                return Err(NetError::TimedOut);
            }
        }
    }

    /// Writer-side half close: remaining bytes stay readable, then EOF.
    pub fn close_write(&self) {
        {
            let mut state = self.state.lock();
            if state.write_closed {
                return;
            }
            state.write_closed = true;
        }
        self.readable.notify_all();
        self.writable.notify_all();
        self.wake_reader(Readiness::READABLE | Readiness::HANGUP);
    }

    /// Reader-side shutdown: discards buffered data; subsequent writes from
    /// the peer fail as a reset.
    pub fn close_read(&self) {
        {
            let mut state = self.state.lock();
            if state.read_closed {
                return;
            }
            state.read_closed = true;
            state.buf.clear();
        }
        self.readable.notify_all();
        self.writable.notify_all();
        self.wake_writer(Readiness::ERROR | Readiness::HANGUP);
    }

    /// Hard teardown of the direction.
    pub fn reset(&self) {
        {
            let mut state = self.state.lock();
            state.reset = true;
        }
        self.readable.notify_all();
        self.writable.notify_all();
        self.wake_reader(Readiness::ERROR | Readiness::HANGUP);
        self.wake_writer(Readiness::ERROR | Readiness::HANGUP);
    }

    pub fn set_capacity(&self, capacity: usize) {
        let mut state = self.state.lock();
        state.capacity = capacity.max(1);
        drop(state);
        self.writable.notify_all();
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.state.lock().buf.len()
    }

    pub fn readable_now(&self) -> bool {
        let state = self.state.lock();
        !state.buf.is_empty() || state.write_closed || state.reset
    }

    pub fn writable_now(&self) -> bool {
        let state = self.state.lock();
        state.buf.len() < state.capacity || state.read_closed || state.reset
    }

    pub fn hangup_now(&self) -> bool {
        let state = self.state.lock();
        state.write_closed || state.reset
    }

    pub fn error_now(&self) -> bool {
        self.state.lock().reset
    }
}

/// Wait on `cond` until notified or `deadline` passes. Returns true on
/// deadline expiry.
fn wait_until(cond: &Condvar, guard: &mut MutexGuard<'_, PipeState>, deadline: Option<Instant>) -> bool {
    match deadline {
        None => {
            cond.wait(guard);
            false
        }
        Some(d) => cond.wait_until(guard, d).timed_out(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fifo_roundtrip() {
        let pipe = Pipe::new();
        assert_eq!(pipe.write(b"hello", None).unwrap(), 5);
        let mut buf = [0u8; 8];
        assert_eq!(pipe.read(&mut buf, None).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn read_times_out_when_empty() {
        let pipe = Pipe::new();
        let deadline = Some(Instant::now() + Duration::from_millis(10));
        assert_eq!(pipe.read(&mut [0u8; 4], deadline), Err(NetError::TimedOut));
    }

    #[test]
    fn eof_after_close_write() {
        let pipe = Pipe::new();
        pipe.write(b"x", None).unwrap();
        pipe.close_write();
        let mut buf = [0u8; 4];
        assert_eq!(pipe.read(&mut buf, None).unwrap(), 1);
        assert_eq!(pipe.read(&mut buf, None).unwrap(), 0);
        assert!(matches!(pipe.write(b"y", None), Err(NetError::Closed)));
    }

    #[test]
    fn write_blocks_until_drained() {
        let pipe = Pipe::new();
        pipe.set_capacity(4);
        assert_eq!(pipe.write(b"abcdef", None).unwrap(), 4);
        let p2 = pipe.clone();
        let h = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let mut buf = [0u8; 4];
            p2.read(&mut buf, None).unwrap()
        });
        // Full ring: this blocks until the reader drains.
        assert_eq!(pipe.write(b"gh", None).unwrap(), 2);
        assert_eq!(h.join().unwrap(), 4);
    }

    #[test]
    fn reset_propagates_to_both_sides() {
        let pipe = Pipe::new();
        pipe.reset();
        assert_eq!(pipe.read(&mut [0u8; 1], None), Err(NetError::ConnectionReset));
        assert_eq!(pipe.write(b"x", None), Err(NetError::ConnectionReset));
    }
}
