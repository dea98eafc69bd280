//! Readiness queues.
//!
//! Every endpoint owns a [`WaitQueue`]; interested parties register a
//! [`Wake`] callback together with an interest mask and are invoked whenever
//! the endpoint's readiness changes in a direction they asked about. This is
//! the transport's public notification surface: the Winsock layer builds
//! select/poll/event-select on top of it without reaching into endpoint
//! internals.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

bitflags::bitflags! {
    /// Direction bits reported by readiness probes and notifications.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Readiness: u8 {
        const READABLE = 0b0001;
        const WRITABLE = 0b0010;
        const ERROR    = 0b0100;
        const HANGUP   = 0b1000;
    }
}

impl Readiness {
    /// Interest mask covering everything a reader cares about.
    pub fn read_interest() -> Readiness {
        Readiness::READABLE | Readiness::ERROR | Readiness::HANGUP
    }

    /// Interest mask covering everything a writer cares about.
    pub fn write_interest() -> Readiness {
        Readiness::WRITABLE | Readiness::ERROR | Readiness::HANGUP
    }
}

/// Callback invoked by a [`WaitQueue`] when readiness changes.
pub trait Wake: Send + Sync {
    fn on_event(&self, ready: Readiness);
}

#[derive(Debug)]
struct Entry {
    id: u64,
    interest: Readiness,
    waker: Weak<dyn Wake>,
}

/// A list of registered waiters attached to one endpoint.
#[derive(Default, Debug)]
pub struct WaitQueue {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waker for the given interest bits. Returns a registration
    /// id for [`unregister`](Self::unregister). Holding only a `Weak` keeps
    /// the queue from pinning socket state alive.
    pub fn register(&self, interest: Readiness, waker: Weak<dyn Wake>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.entries.lock().push(Entry {
            id,
            interest,
            waker,
        });
        id
    }

    pub fn unregister(&self, id: u64) {
        self.entries.lock().retain(|e| e.id != id);
    }

    /// Deliver a readiness change to every waiter whose interest overlaps it.
    /// Dead waiters are pruned as they are found.
    pub fn notify(&self, ready: Readiness) {
        let wakers: Vec<(Arc<dyn Wake>, Readiness)> = {
            let mut entries = self.entries.lock();
            entries.retain(|e| e.waker.strong_count() > 0);
            entries
                .iter()
                .filter(|e| e.interest.intersects(ready))
                .filter_map(|e| e.waker.upgrade().map(|w| (w, ready & e.interest)))
                .collect()
        };
        // Callbacks run outside the entry lock; they may re-enter the queue.
        for (waker, hit) in wakers {
            waker.on_event(hit);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// A one-slot, set-or-drop signal.
///
/// `signal` fills the slot if it is empty and is otherwise a no-op; `reset`
/// drains it; `wait` blocks until the slot fills or the deadline passes and
/// consumes the token on success. No fairness is guaranteed between
/// concurrent waiters.
#[derive(Default)]
pub struct SignalSlot {
    filled: Mutex<bool>,
    cond: Condvar,
}

impl SignalSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill the slot. Returns true when this call transitioned it.
    pub fn signal(&self) -> bool {
        let mut filled = self.filled.lock();
        let was_empty = !*filled;
        *filled = true;
        if was_empty {
            self.cond.notify_one();
        }
        was_empty
    }

    /// Drain the slot. Returns true when a token was present.
    pub fn reset(&self) -> bool {
        let mut filled = self.filled.lock();
        std::mem::replace(&mut *filled, false)
    }

    pub fn is_signaled(&self) -> bool {
        *self.filled.lock()
    }

    /// Block until signalled or until `timeout` elapses. Consumes the token.
    /// `None` blocks indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        self.wait_deadline(deadline)
    }

    /// Deadline form of [`wait`](Self::wait).
    pub fn wait_deadline(&self, deadline: Option<Instant>) -> bool {
        let mut filled = self.filled.lock();
        loop {
            if *filled {
                *filled = false;
                return true;
            }
            match deadline {
                None => self.cond.wait(&mut filled),
                Some(d) => {
                    if self.cond.wait_until(&mut filled, d).timed_out() {
                        return std::mem::replace(&mut *filled, false);
                    }
                }
            }
        }
    }
}

/// Adapter that turns any readiness notification into a [`SignalSlot`]
/// signal. select/poll register one of these on every probed endpoint.
pub struct SlotWaker(pub Arc<SignalSlot>);

impl Wake for SlotWaker {
    fn on_event(&self, _ready: Readiness) {
        self.0.signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU8;

    struct Recorder(AtomicU8);

    impl Wake for Recorder {
        fn on_event(&self, ready: Readiness) {
            self.0.fetch_or(ready.bits(), Ordering::SeqCst);
        }
    }

    #[test]
    fn notify_respects_interest() {
        let q = WaitQueue::new();
        let rec: Arc<Recorder> = Arc::new(Recorder(AtomicU8::new(0)));
        let waker: Arc<dyn Wake> = rec.clone();
        q.register(Readiness::READABLE, Arc::downgrade(&waker));

        q.notify(Readiness::WRITABLE);
        assert_eq!(rec.0.load(Ordering::SeqCst), 0);

        q.notify(Readiness::READABLE | Readiness::HANGUP);
        assert_eq!(rec.0.load(Ordering::SeqCst), Readiness::READABLE.bits());
    }

    #[test]
    fn unregister_stops_delivery() {
        let q = WaitQueue::new();
        let rec: Arc<Recorder> = Arc::new(Recorder(AtomicU8::new(0)));
        let waker: Arc<dyn Wake> = rec.clone();
        let id = q.register(Readiness::READABLE, Arc::downgrade(&waker));
        q.unregister(id);
        q.notify(Readiness::READABLE);
        assert_eq!(rec.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn slot_is_set_or_drop() {
        let slot = SignalSlot::new();
        assert!(slot.signal());
        assert!(!slot.signal());
        assert!(slot.reset());
        assert!(!slot.reset());
    }

    #[test]
    fn slot_wait_times_out() {
        let slot = SignalSlot::new();
        assert!(!slot.wait(Some(Duration::from_millis(10))));
        slot.signal();
        assert!(slot.wait(Some(Duration::from_millis(10))));
        // Token consumed by the successful wait.
        assert!(!slot.is_signaled());
    }

    #[test]
    fn slot_wakes_across_threads() {
        let slot = Arc::new(SignalSlot::new());
        let s2 = slot.clone();
        let h = std::thread::spawn(move || s2.wait(Some(Duration::from_secs(5))));
        std::thread::sleep(Duration::from_millis(20));
        slot.signal();
        assert!(h.join().unwrap());
    }
}
