//! The wait queue.
//!
//! An ordered collection of blocked threads, ordered by thread priority with
//! FIFO tie-breaking and no priority inheritance. The queue's own mutex
//! (held by [`queue::QueueObject`](crate::queue::QueueObject)) protects the
//! membership list; each waiter additionally owns a small private
//! mutex+condvar pair used only to actually park the thread, so the queue
//! lock never has to be held across a sleep.
//!
//! `T` is per-waiter payload carried alongside the wait. The send engine
//! uses it on the receiver wait queue to stash a direct-handoff slot a
//! sender can write into without ever touching the message pool; the sender
//! wait queue uses `T = ()`.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

/// Why a waiter stopped sleeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCause {
    WokenNormal,
    TimedOut,
    Interrupted,
    /// The queue itself was destroyed out from under the waiter.
    Removed,
}

struct Park {
    cause: Option<WakeCause>,
}

/// A single blocked thread's slot in a [`WaitQueue`].
pub struct Waiter<T> {
    seq: u64,
    priority: u8,
    park: Mutex<Park>,
    condvar: Condvar,
    /// Per-waiter payload; see module docs.
    pub data: T,
}

impl<T> Waiter<T> {
    /// Block the calling thread until woken, a deadline passes, or (checked
    /// by the caller via [`scheduler`](crate::scheduler)) cancellation is
    /// requested. Does not touch the owning `WaitQueue`'s membership list —
    /// the caller reaps this waiter from it afterwards under the queue
    /// lock, see [`WaitQueue::reap`].
    pub fn block_until(&self, deadline: Option<Instant>) -> WakeCause {
        let mut guard = self.park.lock().unwrap();
        loop {
            if let Some(cause) = guard.cause {
                return cause;
            }
            match deadline {
                None => {
                    guard = self.condvar.wait(guard).unwrap();
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        // Claim the timeout ourselves unless a waker already
                        // raced us to set a cause.
                        return *guard.cause.get_or_insert(WakeCause::TimedOut);
                    }
                    let (g, timed_out) = self.condvar.wait_timeout(guard, deadline - now).unwrap();
                    guard = g;
                    if timed_out.timed_out() && guard.cause.is_none() {
                        return *guard.cause.get_or_insert(WakeCause::TimedOut);
                    }
                }
            }
        }
    }

    fn wake(&self, cause: WakeCause) {
        let mut guard = self.park.lock().unwrap();
        if guard.cause.is_none() {
            guard.cause = Some(cause);
        }
        self.condvar.notify_one();
    }
}

/// Type-erased wake target so a [`crate::scheduler::CancellationToken`] can
/// interrupt the one waiter its thread is currently parked on without the
/// token needing to know whether that waiter carries a sender's `()` or a
/// receiver's `Handoff` payload.
pub(crate) trait Wakeable: Send + Sync {
    fn wake_interrupted(&self);
}

impl<T: Send + Sync> Wakeable for Waiter<T> {
    fn wake_interrupted(&self) {
        self.wake(WakeCause::Interrupted);
    }
}

struct Entry<T> {
    seq: u64,
    priority: u8,
    waiter: Arc<Waiter<T>>,
}

/// Priority-ordered sleep structure for blocked threads.
pub struct WaitQueue<T> {
    entries: Vec<Entry<T>>,
    next_seq: u64,
}

impl<T> Default for WaitQueue<T> {
    fn default() -> Self {
        WaitQueue { entries: Vec::new(), next_seq: 0 }
    }
}

impl<T> WaitQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Register a new waiter at `priority` and return the handle the caller
    /// then calls [`Waiter::block_until`] on, *after* dropping the queue
    /// lock.
    pub fn register(&mut self, priority: u8, data: T) -> Arc<Waiter<T>> {
        let seq = self.next_seq;
        self.next_seq += 1;
        let waiter = Arc::new(Waiter { seq, priority, park: Mutex::new(Park { cause: None }), condvar: Condvar::new(), data });
        self.entries.push(Entry { seq, priority, waiter: waiter.clone() });
        waiter
    }

    fn highest_index(&self) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| (std::cmp::Reverse(e.priority), e.seq))
            .map(|(i, _)| i)
    }

    /// Peek at (without removing) the waiter that would be woken next.
    /// Lets the send engine write a direct-handoff payload into `.data`
    /// before committing to waking it.
    pub fn peek_highest(&self) -> Option<&Arc<Waiter<T>>> {
        self.highest_index().map(|i| &self.entries[i].waiter)
    }

    /// Wake the highest-priority waiter (ties broken FIFO) and remove it
    /// from the queue. Returns `None` if empty.
    pub fn wake_one(&mut self) -> Option<Arc<Waiter<T>>> {
        let idx = self.highest_index()?;
        let entry = self.entries.remove(idx);
        entry.waiter.wake(WakeCause::WokenNormal);
        Some(entry.waiter)
    }

    /// Wake every waiter with `cause` (used for queue destruction) and
    /// report whether any were woken.
    pub fn flush(&mut self, cause: WakeCause) -> bool {
        let had_any = !self.entries.is_empty();
        for entry in self.entries.drain(..) {
            entry.waiter.wake(cause);
        }
        had_any
    }

    /// Remove `waiter` from the membership list if it is still present.
    /// Called by a waiter that woke itself up (timeout/cancellation) so the
    /// queue's membership stays correct once it is no longer actually
    /// sleeping.
    pub fn reap(&mut self, waiter: &Arc<Waiter<T>>) {
        self.entries.retain(|e| e.seq != waiter.seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wake_one_picks_highest_priority_then_fifo() {
        let mut wq: WaitQueue<()> = WaitQueue::new();
        let low = wq.register(1, ());
        let high_first = wq.register(9, ());
        let high_second = wq.register(9, ());
        let woken = wq.wake_one().unwrap();
        assert!(Arc::ptr_eq(&woken, &high_first));
        let woken = wq.wake_one().unwrap();
        assert!(Arc::ptr_eq(&woken, &high_second));
        let woken = wq.wake_one().unwrap();
        assert!(Arc::ptr_eq(&woken, &low));
        assert!(wq.wake_one().is_none());
    }

    #[test]
    fn flush_wakes_everyone_with_cause() {
        let mut wq: WaitQueue<()> = WaitQueue::new();
        let a = wq.register(5, ());
        let b = wq.register(5, ());
        assert!(wq.flush(WakeCause::Removed));
        assert_eq!(a.block_until(None), WakeCause::Removed);
        assert_eq!(b.block_until(None), WakeCause::Removed);
        assert!(wq.is_empty());
    }

    #[test]
    fn timeout_fires_without_external_wake() {
        let mut wq: WaitQueue<()> = WaitQueue::new();
        let waiter = wq.register(0, ());
        let cause = waiter.block_until(Some(Instant::now() + Duration::from_millis(10)));
        assert_eq!(cause, WakeCause::TimedOut);
        wq.reap(&waiter);
        assert!(wq.is_empty());
    }

    #[test]
    fn wake_races_timeout_and_wins_if_first() {
        let wq = Arc::new(Mutex::new(WaitQueue::<()>::new()));
        let waiter = wq.lock().unwrap().register(0, ());
        let wq2 = wq.clone();
        let waiter2 = waiter.clone();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            wq2.lock().unwrap().wake_one();
            let _ = waiter2;
        });
        let cause = waiter.block_until(Some(Instant::now() + Duration::from_millis(200)));
        waker.join().unwrap();
        assert_eq!(cause, WakeCause::WokenNormal);
    }

    #[test]
    fn wakeable_interrupts_an_indefinite_wait() {
        let mut wq: WaitQueue<()> = WaitQueue::new();
        let waiter = wq.register(0, ());
        let wakeable: Arc<dyn Wakeable> = waiter.clone();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            wakeable.wake_interrupted();
        });
        // no deadline: only `wake_interrupted` can end this wait.
        let cause = waiter.block_until(None);
        waker.join().unwrap();
        assert_eq!(cause, WakeCause::Interrupted);
        wq.reap(&waiter);
    }
}
