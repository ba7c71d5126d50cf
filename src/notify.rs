//! The empty-to-non-empty notifier.
//!
//! At most one registration per queue, delivered once on the
//! empty-to-non-empty transition when no receiver was already waiting, then
//! cleared. Delivery itself — "emit a signal to a thread" — is handled by
//! whatever signal delivery subsystem a real executive has; this module
//! defines the minimal [`SignalDelivery`] interface consumed from it.

use std::sync::{Arc, OnceLock};
use std::thread::ThreadId;

use log::{debug, warn};

use crate::error::Reason;

/// What to deliver and to whom, registered via `notify(desc, Some(spec))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalSpec {
    pub thread: ThreadId,
    pub signo: u32,
    pub value: i32,
}

/// Real-time signal range accepted by `notify`. Mirrors a typical POSIX
/// `SIGRTMIN`..`SIGRTMAX` band; narrower than the OS range since there is
/// no real signal subsystem underneath.
pub const SIGRTMIN: u32 = 34;
pub const SIGRTMAX: u32 = 64;

pub fn validate_signo(signo: u32) -> Result<(), Reason> {
    if (SIGRTMIN..=SIGRTMAX).contains(&signo) {
        Ok(())
    } else {
        Err(Reason::InvalidArgument("signo must be within the real-time signal range"))
    }
}

/// The interface this crate consumes from the signal delivery subsystem.
pub trait SignalDelivery: Send + Sync {
    fn deliver(&self, target: ThreadId, signo: u32, value: i32);
}

struct LoggingSignalDelivery;

impl SignalDelivery for LoggingSignalDelivery {
    fn deliver(&self, target: ThreadId, signo: u32, value: i32) {
        debug!("notifier: delivering signo={signo} value={value} to {target:?} (no sink installed, logging only)");
    }
}

static SINK: OnceLock<Arc<dyn SignalDelivery>> = OnceLock::new();

/// Install the process-wide signal delivery sink. Only the first call takes
/// effect; later calls are logged and ignored, since a real executive
/// installs this once at startup.
pub fn install_signal_delivery(sink: Arc<dyn SignalDelivery>) {
    if SINK.set(sink).is_err() {
        warn!("signal delivery sink already installed; ignoring later installation");
    }
}

fn sink() -> Arc<dyn SignalDelivery> {
    SINK.get_or_init(|| Arc::new(LoggingSignalDelivery)).clone()
}

/// At-most-one, one-shot notifier registration for a single queue.
#[derive(Default)]
pub struct Notifier {
    registered: Option<SignalSpec>,
}

impl Notifier {
    pub fn new() -> Self {
        Notifier { registered: None }
    }

    pub fn is_registered(&self) -> bool {
        self.registered.is_some()
    }

    /// `target = None` clears the registration iff `by` is the registered
    /// thread or there is no registration (clearing twice is a no-op, not
    /// an error).
    pub fn clear(&mut self, by: ThreadId) -> Result<(), Reason> {
        match self.registered {
            None => Ok(()),
            Some(spec) if spec.thread == by => {
                self.registered = None;
                Ok(())
            }
            Some(_) => Err(Reason::Busy),
        }
    }

    /// Register `spec`, allowed if unregistered or idempotently re-arming
    /// the same thread; fails `Busy` if another thread already holds it.
    pub fn register(&mut self, spec: SignalSpec) -> Result<(), Reason> {
        validate_signo(spec.signo)?;
        match self.registered {
            None => {
                self.registered = Some(spec);
                Ok(())
            }
            Some(existing) if existing.thread == spec.thread => {
                self.registered = Some(spec);
                Ok(())
            }
            Some(_) => Err(Reason::Busy),
        }
    }

    /// Fire the registration if present, clearing it (one-shot). No-op if
    /// nothing is registered.
    pub fn fire_if_registered(&mut self) {
        if let Some(spec) = self.registered.take() {
            debug!("notifier firing signo={} value={} target={:?}", spec.signo, spec.value, spec.thread);
            sink().deliver(spec.thread, spec.signo, spec.value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn spec(thread: ThreadId) -> SignalSpec {
        SignalSpec { thread, signo: SIGRTMIN, value: 7 }
    }

    #[test]
    fn register_then_clear_by_owner_is_idempotent() {
        let me = thread::current().id();
        let mut n = Notifier::new();
        n.register(spec(me)).unwrap();
        assert!(n.is_registered());
        n.clear(me).unwrap();
        assert!(!n.is_registered());
        // clearing again is a no-op, not an error.
        n.clear(me).unwrap();
    }

    #[test]
    fn second_registration_by_other_thread_is_busy() {
        let me = thread::current().id();
        let other = thread::spawn(|| thread::current().id()).join().unwrap();
        let mut n = Notifier::new();
        n.register(spec(me)).unwrap();
        assert_eq!(n.register(spec(other)), Err(Reason::Busy));
    }

    #[test]
    fn same_thread_can_idempotently_rearm() {
        let me = thread::current().id();
        let mut n = Notifier::new();
        n.register(spec(me)).unwrap();
        n.register(SignalSpec { value: 99, ..spec(me) }).unwrap();
        assert!(n.is_registered());
    }

    #[test]
    fn firing_clears_registration() {
        let me = thread::current().id();
        let mut n = Notifier::new();
        n.register(spec(me)).unwrap();
        n.fire_if_registered();
        assert!(!n.is_registered());
    }

    #[test]
    fn rejects_signo_outside_realtime_range() {
        let me = thread::current().id();
        let mut n = Notifier::new();
        let bad = SignalSpec { signo: 1, ..spec(me) };
        assert_eq!(n.register(bad), Err(Reason::InvalidArgument("signo must be within the real-time signal range")));
    }
}
