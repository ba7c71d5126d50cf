//! The minimal interface this crate consumes from a real executive's
//! scheduler and thread representation.
//!
//! A real executive would wire its own scheduler/thread-control-block
//! fields in here; standing alone, this module keeps the same state in
//! thread-locals and a small process-wide registry keyed by [`ThreadId`].

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, ThreadId};

use crate::wait_queue::Wakeable;

/// Default priority for a thread that never called [`set_current_priority`].
pub const DEFAULT_PRIORITY: u8 = 128;

thread_local! {
    static PRIORITY: Cell<u8> = Cell::new(DEFAULT_PRIORITY);
    static MAY_BLOCK: Cell<bool> = Cell::new(true);
}

/// Set the scheduling priority the wait queues should use to order this
/// thread among other waiters. Higher sorts first.
pub fn set_current_priority(priority: u8) {
    PRIORITY.with(|p| p.set(priority));
}

/// The calling thread's current scheduling priority.
pub fn current_priority() -> u8 {
    PRIORITY.with(|p| p.get())
}

/// Mark the calling thread (for the extent of whatever scope calls this) as
/// unable to block, e.g. because it is running in an interrupt-like
/// context. `timed_send`/`timed_receive` consult this and fail with
/// [`crate::error::Reason::NotPermitted`] instead of sleeping.
pub fn set_may_block(may_block: bool) {
    MAY_BLOCK.with(|m| m.set(may_block));
}

pub fn may_block() -> bool {
    MAY_BLOCK.with(|m| m.get())
}

struct Inner {
    flag: AtomicBool,
    /// The waiter (if any) this token's thread is currently parked on. Lets
    /// `cancel()` wake the blocked thread directly instead of only being
    /// observed after some unrelated wake — see `arm`/`disarm`.
    armed: Mutex<Option<Arc<dyn Wakeable>>>,
}

/// A cooperative cancellation flag, standing in for an asynchronously
/// delivered cancellation signal. Cheap to clone; all clones observe the
/// same underlying state.
#[derive(Clone)]
pub struct CancellationToken(Arc<Inner>);

impl CancellationToken {
    fn new() -> Self {
        CancellationToken(Arc::new(Inner { flag: AtomicBool::new(false), armed: Mutex::new(None) }))
    }

    /// Request cancellation of whatever blocking call owns this token. If
    /// the owning thread is currently parked on a wait queue (`arm`med),
    /// wakes it immediately with [`crate::wait_queue::WakeCause::Interrupted`];
    /// otherwise just sets the flag for the owner to observe on its next
    /// `take()`.
    pub fn cancel(&self) {
        self.0.flag.store(true, Ordering::SeqCst);
        if let Some(waiter) = self.0.armed.lock().unwrap().clone() {
            waiter.wake_interrupted();
        }
    }

    /// Check and clear: a blocking loop calls this immediately after each
    /// wake, before re-checking its own wake cause.
    pub fn take(&self) -> bool {
        self.0.flag.swap(false, Ordering::SeqCst)
    }

    /// Register the waiter this token's thread is about to block on, so a
    /// concurrent `cancel()` can reach it. Must be paired with [`Self::disarm`]
    /// once the blocking call returns, whatever its outcome.
    pub(crate) fn arm(&self, waiter: Arc<dyn Wakeable>) {
        *self.0.armed.lock().unwrap() = Some(waiter);
    }

    /// Clear the armed waiter. Safe to call even if nothing is armed.
    pub(crate) fn disarm(&self) {
        *self.0.armed.lock().unwrap() = None;
    }
}

static TOKENS: OnceLock<Mutex<HashMap<ThreadId, CancellationToken>>> = OnceLock::new();

fn tokens() -> &'static Mutex<HashMap<ThreadId, CancellationToken>> {
    TOKENS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// The cancellation token for an arbitrary thread, creating one on first
/// use. Lets an external supervisor request cancellation of a thread it
/// knows is (or might be) blocked in this crate.
pub fn cancellation_token_for(thread: ThreadId) -> CancellationToken {
    let mut map = tokens().lock().unwrap();
    map.entry(thread).or_insert_with(CancellationToken::new).clone()
}

/// The calling thread's own cancellation token.
pub fn current_cancellation_token() -> CancellationToken {
    cancellation_token_for(thread::current().id())
}
