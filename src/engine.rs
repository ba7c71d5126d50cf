//! The send/receive engine.
//!
//! Implements the non-blocking primitives directly, and the blocking loop
//! by repeatedly calling them around a sleep on the appropriate wait queue.
//! The non-blocking attempt and the "register on the wait queue" step that
//! follows a `WouldBlock` are taken under the *same* lock acquisition (see
//! [`crate::queue::QueueObject::lock`]), so a counterpart operation can never
//! observe "queue has room/a message" and "nobody is waiting" as two
//! separate, racing moments.

use std::sync::Arc;
use std::time::Instant;

use log::trace;

use crate::error::Reason;
use crate::queue::{new_handoff, QueueObject, State};
use crate::scheduler;
use crate::wait_queue::{Wakeable, WakeCause};

/// The permission bits of a descriptor relevant to send/receive: the subset
/// of open flags relevant at runtime.
#[derive(Debug, Clone, Copy)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
}

/// The core of `try_send`, operating on an already-locked [`State`]. Shared
/// by the non-blocking entry point and the blocking loop, so both take the
/// direct-handoff-or-pool decision atomically with respect to the wait
/// queues.
fn attempt_send(state: &mut State, buf: &[u8], prio: u32) -> Result<(), Reason> {
    // Step 3: a waiting receiver gets the message directly, bypassing the
    // pool entirely. This and the pool fallback below run under the same
    // lock as a `try_receive`/registration on `receiver_waiters`, so no
    // receiver can slip between "we saw no waiter" and "we enqueued".
    if let Some(waiter) = state.receiver_waiters.peek_highest().cloned() {
        *waiter.data.slot.lock().unwrap() = Some((buf.to_vec(), prio));
        state.receiver_waiters.wake_one();
        trace!("try_send: direct handoff to waiting receiver, prio={prio}");
        return Ok(());
    }

    // Steps 4-6: pool path.
    match state.pool.alloc() {
        None => Err(Reason::WouldBlock),
        Some(idx) => {
            state.pool.slot_mut(idx).set(buf);
            state.list.enqueue(idx, prio);
            if state.list.count() == 1 {
                // empty -> non-empty transition, and no receiver was woken
                // above, so the notifier (if any) fires once.
                state.notifier.fire_if_registered();
            }
            Ok(())
        }
    }
}

/// The core of `try_receive`, operating on an already-locked [`State`].
fn attempt_receive(state: &mut State, buf_out: &mut [u8]) -> Result<(usize, u32), Reason> {
    match state.list.dequeue_head() {
        None => Err(Reason::WouldBlock),
        Some((idx, prio)) => {
            let len = state.pool.slot(idx).bytes().len();
            buf_out[..len].copy_from_slice(state.pool.slot(idx).bytes());
            state.pool.free(idx);
            // A sender could only be waiting because the queue was full;
            // freeing a slot just now means it can make progress. Waking it
            // under the same lock means it can't have registered *after* we
            // checked and found nobody, only before or not at all.
            state.sender_waiters.wake_one();
            Ok((len, prio))
        }
    }
}

/// Send without ever blocking the calling thread.
pub fn try_send(queue: &QueueObject, perm: Permissions, buf: &[u8], prio: u32) -> Result<(), Reason> {
    if !perm.write {
        return Err(Reason::PermissionDenied);
    }
    if buf.len() > queue.attrs().message_size {
        return Err(Reason::MessageTooLarge);
    }
    attempt_send(&mut queue.lock(), buf, prio)
}

/// Receive without ever blocking the calling thread.
pub fn try_receive(queue: &QueueObject, perm: Permissions, buf_out: &mut [u8]) -> Result<(usize, u32), Reason> {
    if !perm.read {
        return Err(Reason::PermissionDenied);
    }
    if buf_out.len() < queue.attrs().message_size {
        return Err(Reason::MessageTooLarge);
    }
    attempt_receive(&mut queue.lock(), buf_out)
}

fn check_blockable(nonblocking: bool) -> Result<(), Reason> {
    if nonblocking {
        return Err(Reason::WouldBlock);
    }
    if !scheduler::may_block() {
        return Err(Reason::NotPermitted);
    }
    Ok(())
}

/// The blocking-loop half of `send`. `deadline = None` blocks
/// indefinitely (what plain `send` does).
pub fn timed_send(
    queue: &QueueObject,
    perm: Permissions,
    nonblocking: bool,
    buf: &[u8],
    prio: u32,
    deadline: Option<Instant>,
) -> Result<(), Reason> {
    if !perm.write {
        return Err(Reason::PermissionDenied);
    }
    if buf.len() > queue.attrs().message_size {
        return Err(Reason::MessageTooLarge);
    }

    loop {
        let mut state = queue.lock();
        match attempt_send(&mut state, buf, prio) {
            Err(Reason::WouldBlock) => {
                check_blockable(nonblocking)?;
                // Register while still holding the lock that the pool-freeing
                // side of `try_receive` also takes to call `wake_one`: either
                // we observe this registration (and get woken), or our
                // `attempt_send` above already observed the freed slot.
                // Nothing in between is possible.
                let waiter = state.sender_waiters.register(scheduler::current_priority(), ());
                drop(state);

                let cause = block_cancellably(&waiter, deadline);
                queue.lock().sender_waiters.reap(&waiter);

                match cause {
                    WakeCause::Removed => return Err(Reason::InvalidDescriptor),
                    WakeCause::WokenNormal => continue,
                    WakeCause::TimedOut => return Err(Reason::TimedOut),
                    WakeCause::Interrupted => return Err(Reason::Interrupted),
                }
            }
            other => return other,
        }
    }
}

/// The blocking-loop half of `receive`.
pub fn timed_receive(
    queue: &QueueObject,
    perm: Permissions,
    nonblocking: bool,
    buf_out: &mut [u8],
    deadline: Option<Instant>,
) -> Result<(usize, u32), Reason> {
    if !perm.read {
        return Err(Reason::PermissionDenied);
    }
    if buf_out.len() < queue.attrs().message_size {
        return Err(Reason::MessageTooLarge);
    }

    loop {
        let mut state = queue.lock();
        match attempt_receive(&mut state, buf_out) {
            Err(Reason::WouldBlock) => {
                check_blockable(nonblocking)?;

                // Publish a direct-handoff slot and register, both still
                // under the same lock `try_send`'s direct-handoff check
                // takes: either a sender sees us in `receiver_waiters` and
                // fills the slot, or our `attempt_receive` above already
                // would have seen its message.
                let handoff = new_handoff();
                let waiter = state.receiver_waiters.register(scheduler::current_priority(), handoff.clone());
                drop(state);

                let cause = block_cancellably(&waiter, deadline);
                queue.lock().receiver_waiters.reap(&waiter);

                match cause {
                    WakeCause::Removed => return Err(Reason::InvalidDescriptor),
                    WakeCause::WokenNormal => {
                        if let Some((bytes, prio)) = handoff.slot.lock().unwrap().take() {
                            let len = bytes.len();
                            buf_out[..len].copy_from_slice(&bytes);
                            trace!("timed_receive: direct handoff accepted, prio={prio}");
                            return Ok((len, prio));
                        }
                        // Woken but no handoff delivered: reconfirm progress
                        // is possible rather than assuming it.
                        continue;
                    }
                    WakeCause::TimedOut => return Err(Reason::TimedOut),
                    WakeCause::Interrupted => return Err(Reason::Interrupted),
                }
            }
            other => return other,
        }
    }
}

/// Block on `waiter` until woken, timed out, or cancelled, actually waking
/// early on cancellation rather than only noticing it after some unrelated
/// wake. Arms the calling thread's [`scheduler::CancellationToken`] with
/// `waiter` for the duration of the sleep so a concurrent `cancel()` can
/// call [`Wakeable::wake_interrupted`] on it directly — without this, a
/// cancellation requested while the thread is parked indefinitely
/// (`deadline: None`) would never be observed, since nothing would notify
/// the condvar it's sleeping on.
fn block_cancellably<T: Send + Sync + 'static>(
    waiter: &Arc<crate::wait_queue::Waiter<T>>,
    deadline: Option<Instant>,
) -> WakeCause {
    let token = scheduler::current_cancellation_token();

    // A cancellation requested in the gap between our last check and this
    // call has only set the token's flag with nothing armed to wake; catch
    // it here instead of blocking on a cause that will never arrive.
    if token.take() {
        return WakeCause::Interrupted;
    }

    let wakeable: Arc<dyn Wakeable> = waiter.clone();
    token.arm(wakeable);
    let cause = waiter.block_until(deadline);
    token.disarm();

    // A cancellation that raced with an unrelated wake (e.g. fired just
    // after `block_until` returned `WokenNormal` but before `disarm`) is
    // still owed an `Interrupted` result rather than being silently lost.
    if cause != WakeCause::Removed && token.take() {
        return WakeCause::Interrupted;
    }
    cause
}
