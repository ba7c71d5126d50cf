//! The queue object.
//!
//! Composes the message pool, priority list and two wait queues behind a
//! *single* mutex, plus attributes, notifier state and the reference-counted
//! lifecycle bookkeeping that the registry consults to decide when to
//! destroy it. All five pieces of mutable state share one lock so that
//! "check the pool/list" and "register on (or wake from) a wait queue" are
//! always one atomic step — see [`QueueObject::lock`] and spec §9's
//! linearization-point requirement.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, trace};

use crate::error::Reason;
use crate::notify::{Notifier, SignalSpec};
use crate::priority_list::PriorityList;
use crate::pool::MessagePool;
use crate::wait_queue::{WaitQueue, WakeCause};

/// A pending rendezvous: a receiver already parked on `receiver_waiters`
/// publishes one of these before sleeping, so a sender can fill it in
/// directly without an unsafe pointer into another thread's stack.
pub struct Handoff {
    pub slot: Mutex<Option<(Vec<u8>, u32)>>,
}

impl Handoff {
    fn new() -> Self {
        Handoff { slot: Mutex::new(None) }
    }
}

/// Creation-time attributes: immutable once the queue exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attrs {
    pub max_messages: usize,
    pub message_size: usize,
}

/// A point-in-time snapshot of a queue's attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub max_messages: usize,
    pub message_size: usize,
    pub current_messages: usize,
    pub nonblocking: bool,
}

/// Bound on `max_messages * message_size` beyond which creation fails with
/// `Reason::NoMemory` instead of actually exhausting the process's memory.
/// Stands in for a real allocator's exhaustion signal.
pub const MAX_ARENA_BYTES: usize = 64 * 1024 * 1024;

/// Everything a queue needs to decide, atomically, whether a send or receive
/// can complete right now: the pool, the priority list, the notifier, and
/// both wait queues. All of it lives behind one [`Mutex`] (see
/// [`QueueObject::lock`]) so the send/receive engine can check state and
/// register-or-wake a waiter in a single critical section — the fix for the
/// lost-wakeup race a split-lock design allows (spec §9: "the invariant is
/// that no opener ever observes a half-built queue", generalized here to "no
/// operation ever observes a half-updated queue").
pub(crate) struct State {
    pub(crate) pool: MessagePool,
    pub(crate) list: PriorityList,
    pub(crate) notifier: Notifier,
    pub(crate) sender_waiters: WaitQueue<()>,
    pub(crate) receiver_waiters: WaitQueue<Arc<Handoff>>,
}

/// One instance per named queue; reached through an `Arc` so both the
/// registry and every open descriptor can share ownership while
/// [`unlinked`](QueueObject::mark_unlinked)/[`descriptors`](QueueObject::open_descriptor)
/// jointly decide when it is safe to tear down.
pub struct QueueObject {
    attrs: Attrs,
    state: Mutex<State>,
    open_descriptors: AtomicUsize,
    unlinked: AtomicBool,
    destroy_claimed: AtomicBool,
}

impl QueueObject {
    /// Allocates the pool arena and initializes the priority list, notifier
    /// and wait queues; the "heavy" part of creating a queue that the
    /// registry lets run with its own lock released.
    pub fn try_new(attrs: Attrs) -> Result<Self, Reason> {
        if attrs.max_messages == 0 {
            return Err(Reason::InvalidArgument("max_messages must be at least 1"));
        }
        if attrs.message_size == 0 {
            return Err(Reason::InvalidArgument("message_size must be at least 1"));
        }
        match attrs.max_messages.checked_mul(attrs.message_size) {
            Some(bytes) if bytes <= MAX_ARENA_BYTES => {}
            _ => return Err(Reason::NoMemory),
        }
        trace!("allocating pool arena: {} slots x {} bytes", attrs.max_messages, attrs.message_size);
        Ok(QueueObject {
            attrs,
            state: Mutex::new(State {
                pool: MessagePool::new(attrs.max_messages, attrs.message_size),
                list: PriorityList::new(),
                notifier: Notifier::new(),
                sender_waiters: WaitQueue::new(),
                receiver_waiters: WaitQueue::new(),
            }),
            open_descriptors: AtomicUsize::new(0),
            unlinked: AtomicBool::new(false),
            destroy_claimed: AtomicBool::new(false),
        })
    }

    pub fn attrs(&self) -> Attrs {
        self.attrs
    }

    pub fn get_attr(&self, nonblocking: bool) -> Attributes {
        let state = self.lock();
        Attributes {
            max_messages: self.attrs.max_messages,
            message_size: self.attrs.message_size,
            current_messages: state.list.count(),
            nonblocking,
        }
    }

    // --- the one lock everything below (and the send/receive engine) uses ---

    /// Lock the queue's single critical section. Held across "check
    /// pool/list" *and* "register-or-wake a waiter" so the two can never be
    /// observed as separate steps by a concurrent sender/receiver.
    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn current_count(&self) -> usize {
        self.lock().list.count()
    }

    pub fn notify(&self, by: std::thread::ThreadId, spec: Option<SignalSpec>) -> Result<(), Reason> {
        let mut state = self.lock();
        match spec {
            None => state.notifier.clear(by),
            Some(spec) => state.notifier.register(spec),
        }
    }

    // --- lifecycle: descriptor refcounting plus the unlink race ---

    pub fn open_descriptor(&self) {
        self.open_descriptors.fetch_add(1, Ordering::SeqCst);
    }

    pub fn descriptor_count(&self) -> usize {
        self.open_descriptors.load(Ordering::SeqCst)
    }

    pub fn is_unlinked(&self) -> bool {
        self.unlinked.load(Ordering::SeqCst)
    }

    /// Mark the name as unlinked. Idempotent; returns whether this call was
    /// the one that actually transitioned it (always `true` in practice,
    /// since `unlink` only reaches here after it wins the registry race to
    /// remove the name).
    pub fn mark_unlinked(&self) {
        self.unlinked.store(true, Ordering::SeqCst);
    }

    /// Close one descriptor and report whether *this* call is responsible
    /// for destroying the queue (both unlinked and now zero descriptors).
    /// At most one caller ever observes `true` for a given queue, because
    /// the check is serialized through `destroy_claimed`.
    pub fn close_descriptor(&self) -> bool {
        let remaining = self.open_descriptors.fetch_sub(1, Ordering::SeqCst) - 1;
        self.maybe_claim_destroy(remaining == 0)
    }

    /// Called by `unlink` right after it wins the registry race to remove
    /// the name, to claim destruction if descriptors had already reached
    /// zero first.
    pub fn claim_destroy_after_unlink(&self) -> bool {
        self.maybe_claim_destroy(self.open_descriptors.load(Ordering::SeqCst) == 0)
    }

    fn maybe_claim_destroy(&self, zero_descriptors: bool) -> bool {
        if zero_descriptors && self.is_unlinked() {
            self.destroy_claimed.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
        } else {
            false
        }
    }

    /// Tear the queue down: flush both wait queues with `Removed` so any
    /// blocked callers unwind with `invalid-descriptor`. Callers invoke this
    /// only after dropping the registry lock, since it must not run with any
    /// lock held that would deadlock against a waiter's own wakeup path.
    pub fn destroy(&self) {
        info!("destroying queue: flushing wait queues and freeing pool arena");
        let mut state = self.lock();
        state.sender_waiters.flush(WakeCause::Removed);
        state.receiver_waiters.flush(WakeCause::Removed);
    }
}

pub fn new_handoff() -> Arc<Handoff> {
    Arc::new(Handoff::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_capacity_attrs() {
        assert_eq!(
            QueueObject::try_new(Attrs { max_messages: 0, message_size: 8 }).unwrap_err(),
            Reason::InvalidArgument("max_messages must be at least 1")
        );
        assert_eq!(
            QueueObject::try_new(Attrs { max_messages: 1, message_size: 0 }).unwrap_err(),
            Reason::InvalidArgument("message_size must be at least 1")
        );
    }

    #[test]
    fn rejects_arena_too_large() {
        let result = QueueObject::try_new(Attrs { max_messages: usize::MAX, message_size: 2 });
        assert_eq!(result.unwrap_err(), Reason::NoMemory);
    }

    #[test]
    fn destroy_is_claimed_exactly_once() {
        let q = QueueObject::try_new(Attrs { max_messages: 1, message_size: 8 }).unwrap();
        q.open_descriptor();
        q.open_descriptor();
        q.mark_unlinked();
        assert!(!q.close_descriptor()); // one descriptor remains
        assert!(q.close_descriptor()); // last one: claims destroy
    }

    #[test]
    fn unlink_after_descriptors_already_zero_claims_destroy() {
        let q = QueueObject::try_new(Attrs { max_messages: 1, message_size: 8 }).unwrap();
        q.open_descriptor();
        assert!(!q.close_descriptor()); // not unlinked yet, doesn't destroy
        q.mark_unlinked();
        assert!(q.claim_destroy_after_unlink());
    }
}
