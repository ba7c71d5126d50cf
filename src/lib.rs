/* Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
 * http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
 * http://opensource.org/licenses/MIT>, at your option. This file may not be
 * copied, modified, or distributed except according to those terms.
 */

//! Named, priority-ordered, bounded message queues for real-time executives.
//!
//! Queues are not files: they live in a flat, process-wide namespace
//! addressed by name, and carry byte messages tagged with a priority, in
//! the spirit of `man mq_overview` — but the queues themselves are pure
//! in-process state; there is no kernel object and no path underneath.
//!
//! # Examples
//!
//! Send a couple of messages:
//! ```
//! use rtmq::MessageQueue;
//!
//! let mq = MessageQueue::create("/hello_rtmq").unwrap();
//! mq.send(0, b"message").unwrap();
//! // messages with equal priority are received in order
//! mq.send(0, b"queue").unwrap();
//! // but this one has higher priority and is received first
//! mq.send(10, b"Hello,").unwrap();
//! # rtmq::unlink("/hello_rtmq").unwrap();
//! ```
//!
//! and receive them:
//! ```
//! use rtmq::MessageQueue;
//!
//! let mq = MessageQueue::create("/hello_rtmq2").unwrap();
//! mq.send(10, b"Hello,").unwrap();
//! mq.send(0, b"message").unwrap();
//! mq.send(0, b"queue").unwrap();
//!
//! let mut buf = vec![0; mq.attributes().message_size];
//! assert_eq!(mq.receive(&mut buf).unwrap(), (10, "Hello,".len()));
//! assert_eq!(mq.receive(&mut buf).unwrap(), (0, "message".len()));
//! assert_eq!(mq.receive(&mut buf).unwrap(), (0, "queue".len()));
//! assert_eq!(&buf[..5], b"queue");
//! assert_eq!(mq.attributes().current_messages, 0);
//! # rtmq::unlink("/hello_rtmq2").unwrap();
//! ```

mod engine;
mod error;
pub mod name;
mod notify;
mod pool;
mod priority_list;
mod queue;
mod registry;
pub mod scheduler;
mod wait_queue;

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant, SystemTime};

use log::{info, warn};

pub use error::Reason;
pub use name::name_from_str;
pub use notify::{install_signal_delivery, SignalDelivery, SignalSpec, SIGRTMAX, SIGRTMIN};
pub use queue::Attributes;

use engine::Permissions;
use name::QueueName;
use queue::{Attrs, QueueObject};
use registry::{Lookup, Registry};

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::new)
}

/// Every queue ever built, so [`shutdown_all_queues`] can force-destroy
/// queues that have already been unlinked but are still open. Entries for
/// queues with no remaining descriptor are pruned opportunistically on
/// insert rather than tracked precisely, since a long-lived process
/// shouldn't accumulate dead `Weak`s forever.
fn live_queues() -> &'static Mutex<Vec<Weak<QueueObject>>> {
    static LIVE: OnceLock<Mutex<Vec<Weak<QueueObject>>>> = OnceLock::new();
    LIVE.get_or_init(|| Mutex::new(Vec::new()))
}

fn track_live(queue: &Arc<QueueObject>) {
    let mut live = live_queues().lock().unwrap();
    live.retain(|w| w.strong_count() > 0);
    live.push(Arc::downgrade(queue));
}

/// Force-destroy every queue still known to the process, whether or not it
/// has been unlinked. Intended for subsystem teardown, not routine use: live
/// descriptors that outlive this call will observe `ErrorKind::Other`
/// ("invalid descriptor") the next time they touch the queue.
pub fn shutdown_all_queues() {
    let live = live_queues().lock().unwrap();
    info!("shutting down message queue subsystem: {} live queue(s)", live.len());
    for weak in live.iter() {
        if let Some(queue) = weak.upgrade() {
            queue.destroy();
        }
    }
}

/// Builder for opening or creating a queue.
///
/// Mirrors the shape of a POSIX `mq_open` call: a read/write mode plus a
/// handful of flags, and — only when creating — the capacity and maximum
/// message size. There is no `mode()` permission-bits builder method: a
/// single process has no multi-user access model to enforce, so file-style
/// permission bits would be dead weight here.
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    read: bool,
    write: bool,
    max_msg_len: usize,
    capacity: usize,
    create: bool,
    create_new: bool,
    nonblocking: bool,
}

impl OpenOptions {
    fn new(read: bool, write: bool) -> Self {
        OpenOptions { read, write, max_msg_len: 8192, capacity: 10, create: false, create_new: false, nonblocking: false }
    }

    /// Open for receiving only.
    pub fn readonly() -> Self {
        OpenOptions::new(true, false)
    }

    /// Open for sending only.
    pub fn writeonly() -> Self {
        OpenOptions::new(false, true)
    }

    /// Open for both sending and receiving.
    pub fn readwrite() -> Self {
        OpenOptions::new(true, true)
    }

    /// Maximum size in bytes of a single message. Only used when creating;
    /// ignored when opening an existing queue. Defaults to 8192.
    pub fn max_msg_len(&mut self, max_msg_len: usize) -> &mut Self {
        self.max_msg_len = max_msg_len;
        self
    }

    /// Maximum number of messages the queue can hold unreceived. Only used
    /// when creating. Defaults to 10.
    pub fn capacity(&mut self, capacity: usize) -> &mut Self {
        self.capacity = capacity;
        self
    }

    /// Create the queue if it doesn't already exist.
    pub fn create(&mut self) -> &mut Self {
        self.create = true;
        self.create_new = false;
        self
    }

    /// Create the queue, failing if it already exists.
    pub fn create_new(&mut self) -> &mut Self {
        self.create = true;
        self.create_new = true;
        self
    }

    /// Fail unless the queue already exists (the default).
    pub fn existing(&mut self) -> &mut Self {
        self.create = false;
        self.create_new = false;
        self
    }

    /// Make `send`/`receive` (but not the explicit `try_*` or `*_timeout` /
    /// `*_deadline` variants) return `ErrorKind::WouldBlock` instead of
    /// parking the calling thread.
    pub fn nonblocking(&mut self) -> &mut Self {
        self.nonblocking = true;
        self
    }

    /// Open (or create) the queue named `name`.
    pub fn open<N: AsRef<str> + ?Sized>(&self, name: &N) -> io::Result<MessageQueue> {
        open_impl(self, name.as_ref()).map_err(Into::into)
    }
}

fn open_impl(opts: &OpenOptions, raw_name: &str) -> Result<MessageQueue, Reason> {
    let name = name::validate(raw_name)?;
    loop {
        match registry().lookup_or_start(&name, opts.create, opts.create_new) {
            Lookup::AlreadyExists => return Err(Reason::AlreadyExists),
            Lookup::NotFound => return Err(Reason::NotFound),
            Lookup::Found(obj) => return Ok(descriptor_for(name, obj, opts)),
            Lookup::Building(building) => {
                let obj = building.wait()?;
                return Ok(descriptor_for(name, obj, opts));
            }
            Lookup::Start(building) => {
                let attrs = Attrs { max_messages: opts.capacity, message_size: opts.max_msg_len };
                let result = QueueObject::try_new(attrs).map(Arc::new);
                registry().node_add_finished(&name, &building, result.clone());
                match result {
                    Ok(obj) => return Ok(descriptor_for(name, obj, opts)),
                    Err(_) => continue, // lost the race to report; retry the lookup
                }
            }
        }
    }
}

fn descriptor_for(name: QueueName, queue: Arc<QueueObject>, opts: &OpenOptions) -> MessageQueue {
    track_live(&queue);
    queue.open_descriptor();
    MessageQueue {
        name,
        queue,
        permissions: Permissions { read: opts.read, write: opts.write },
        nonblocking: AtomicBool::new(opts.nonblocking),
        id: next_descriptor_id(),
    }
}

fn next_descriptor_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Remove `name` from the namespace. Descriptors already open on it keep
/// working; the queue itself is destroyed once the last one closes.
pub fn unlink<N: AsRef<str> + ?Sized>(name: &N) -> io::Result<()> {
    unlink_impl(name.as_ref()).map_err(Into::into)
}

fn unlink_impl(raw_name: &str) -> Result<(), Reason> {
    let name = name::validate(raw_name)?;
    let lookup = registry().lookup_or_start(&name, false, false);
    let obj = match lookup {
        Lookup::Found(obj) => obj,
        Lookup::Building(building) => building.wait()?,
        Lookup::NotFound | Lookup::AlreadyExists => return Err(Reason::NotFound),
        Lookup::Start(_) => unreachable!("lookup_or_start(create=false) never returns Start"),
    };
    match registry().remove_if(&name, &obj) {
        Some(obj) => {
            obj.mark_unlinked();
            if obj.claim_destroy_after_unlink() {
                obj.destroy();
            }
            Ok(())
        }
        None => Err(Reason::NotFound),
    }
}

fn deadline_to_instant(deadline: SystemTime) -> Instant {
    match deadline.duration_since(SystemTime::now()) {
        Ok(remaining) => Instant::now() + remaining,
        Err(_) => Instant::now(),
    }
}

/// An open reference to a named queue.
///
/// Dropping a `MessageQueue` closes it exactly as [`close`](MessageQueue::close)
/// does; call `close` explicitly only when you want to observe the result or
/// to free the queue's resources before the descriptor's scope ends.
pub struct MessageQueue {
    name: QueueName,
    queue: Arc<QueueObject>,
    permissions: Permissions,
    nonblocking: AtomicBool,
    id: u64,
}

impl MessageQueue {
    /// Open `name` for both sending and receiving, failing if it doesn't
    /// already exist.
    pub fn open<N: AsRef<str> + ?Sized>(name: &N) -> io::Result<Self> {
        OpenOptions::readwrite().open(name)
    }

    /// Open `name` for both sending and receiving, creating it with default
    /// attributes (capacity 10, 8192-byte messages) if it doesn't exist.
    pub fn create<N: AsRef<str> + ?Sized>(name: &N) -> io::Result<Self> {
        OpenOptions::readwrite().create().open(name)
    }

    /// A process-unique, opaque identifier for this descriptor. Two
    /// `MessageQueue`s referring to the same underlying queue (via
    /// [`try_clone`](MessageQueue::try_clone) or separate `open` calls) have
    /// distinct ids.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// A snapshot of the queue's attributes.
    pub fn attributes(&self) -> Attributes {
        self.queue.get_attr(self.is_nonblocking())
    }

    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking.load(Ordering::SeqCst)
    }

    /// Toggle whether `send`/`receive` block.
    pub fn set_nonblocking(&self, nonblocking: bool) {
        self.nonblocking.store(nonblocking, Ordering::SeqCst);
    }

    /// Register (or clear, with `None`) a one-shot notification for the
    /// next empty-to-non-empty transition.
    pub fn notify(&self, target: Option<SignalSpec>) -> io::Result<()> {
        self.queue.notify(std::thread::current().id(), target).map_err(Into::into)
    }

    /// Send without blocking, regardless of the descriptor's own blocking
    /// mode.
    pub fn try_send(&self, priority: u32, msg: &[u8]) -> io::Result<()> {
        engine::try_send(&self.queue, self.permissions, msg, priority).map_err(Into::into)
    }

    /// Send, blocking the calling thread unless the descriptor is
    /// non-blocking.
    pub fn send(&self, priority: u32, msg: &[u8]) -> io::Result<()> {
        engine::timed_send(&self.queue, self.permissions, self.is_nonblocking(), msg, priority, None).map_err(Into::into)
    }

    /// Send, blocking for at most `timeout`.
    pub fn send_timeout(&self, priority: u32, msg: &[u8], timeout: Duration) -> io::Result<()> {
        let deadline = Instant::now() + timeout;
        engine::timed_send(&self.queue, self.permissions, self.is_nonblocking(), msg, priority, Some(deadline)).map_err(Into::into)
    }

    /// Send, blocking until at most the absolute time `deadline`.
    pub fn send_deadline(&self, priority: u32, msg: &[u8], deadline: SystemTime) -> io::Result<()> {
        engine::timed_send(&self.queue, self.permissions, self.is_nonblocking(), msg, priority, Some(deadline_to_instant(deadline))).map_err(Into::into)
    }

    /// Receive without blocking.
    pub fn try_receive(&self, msgbuf: &mut [u8]) -> io::Result<(u32, usize)> {
        engine::try_receive(&self.queue, self.permissions, msgbuf).map(|(len, prio)| (prio, len)).map_err(Into::into)
    }

    /// Receive, blocking the calling thread unless the descriptor is
    /// non-blocking.
    pub fn receive(&self, msgbuf: &mut [u8]) -> io::Result<(u32, usize)> {
        engine::timed_receive(&self.queue, self.permissions, self.is_nonblocking(), msgbuf, None)
            .map(|(len, prio)| (prio, len))
            .map_err(Into::into)
    }

    /// Receive, blocking for at most `timeout`.
    pub fn receive_timeout(&self, msgbuf: &mut [u8], timeout: Duration) -> io::Result<(u32, usize)> {
        let deadline = Instant::now() + timeout;
        engine::timed_receive(&self.queue, self.permissions, self.is_nonblocking(), msgbuf, Some(deadline))
            .map(|(len, prio)| (prio, len))
            .map_err(Into::into)
    }

    /// Receive, blocking until at most the absolute time `deadline`.
    pub fn receive_deadline(&self, msgbuf: &mut [u8], deadline: SystemTime) -> io::Result<(u32, usize)> {
        engine::timed_receive(&self.queue, self.permissions, self.is_nonblocking(), msgbuf, Some(deadline_to_instant(deadline)))
            .map(|(len, prio)| (prio, len))
            .map_err(Into::into)
    }

    /// A second descriptor referring to the same underlying queue, with the
    /// same permissions and blocking mode.
    pub fn try_clone(&self) -> io::Result<Self> {
        self.queue.open_descriptor();
        Ok(MessageQueue {
            name: self.name.clone(),
            queue: self.queue.clone(),
            permissions: self.permissions,
            nonblocking: AtomicBool::new(self.is_nonblocking()),
            id: next_descriptor_id(),
        })
    }

    /// An iterator that receives messages (blocking per the descriptor's own
    /// mode) until `receive` returns an error, which is then silently
    /// swallowed — mirrors the POSIX idiom of draining a queue until it's
    /// empty or closed.
    pub fn iter(&self) -> Iter<'_> {
        Iter { mq: self, buf: vec![0; self.attributes().message_size] }
    }

    /// Close this descriptor, destroying the underlying queue if it was the
    /// last open descriptor on an unlinked name.
    pub fn close(self) -> io::Result<()> {
        drop(self);
        Ok(())
    }

    fn close_descriptor(&self) {
        if self.queue.close_descriptor() {
            self.queue.destroy();
        }
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        self.close_descriptor();
    }
}

impl std::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue").field("name", &self.name).field("id", &self.id).finish()
    }
}

/// Iterator returned by [`MessageQueue::iter`].
pub struct Iter<'a> {
    mq: &'a MessageQueue,
    buf: Vec<u8>,
}

impl Iterator for Iter<'_> {
    type Item = (u32, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        let (priority, len) = self.mq.receive(&mut self.buf).ok()?;
        Some((priority, self.buf[..len].to_vec()))
    }
}

/// Iterator returned by converting a [`MessageQueue`] into one.
pub struct IntoIter {
    mq: MessageQueue,
    buf: Vec<u8>,
}

impl Iterator for IntoIter {
    type Item = (u32, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        let (priority, len) = self.mq.receive(&mut self.buf).ok()?;
        Some((priority, self.buf[..len].to_vec()))
    }
}

impl IntoIterator for MessageQueue {
    type Item = (u32, Vec<u8>);
    type IntoIter = IntoIter;

    fn into_iter(self) -> IntoIter {
        let buf = vec![0; self.attributes().message_size];
        IntoIter { mq: self, buf }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warn_if_leftover(name: &str) {
        if registry().contains(&name::validate(name).unwrap()) {
            warn!("test queue {name} was not cleaned up by a previous run");
        }
    }

    #[test]
    fn create_then_open_existing_share_state() {
        warn_if_leftover("/rtmq-test-shared");
        let a = MessageQueue::create("/rtmq-test-shared").unwrap();
        let b = MessageQueue::open("/rtmq-test-shared").unwrap();
        a.send(0, b"hi").unwrap();
        let mut buf = [0u8; 8192];
        let (_, len) = b.receive(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"hi");
        unlink("/rtmq-test-shared").unwrap();
    }

    #[test]
    fn create_new_fails_if_already_exists() {
        warn_if_leftover("/rtmq-test-excl");
        let _a = MessageQueue::create("/rtmq-test-excl").unwrap();
        let err = OpenOptions::readwrite().create_new().open("/rtmq-test-excl").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        unlink("/rtmq-test-excl").unwrap();
    }

    #[test]
    fn open_nonexistent_without_create_fails() {
        let err = MessageQueue::open("/rtmq-test-does-not-exist").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn unlink_then_reopen_creates_a_fresh_queue() {
        warn_if_leftover("/rtmq-test-unlink");
        let a = MessageQueue::create("/rtmq-test-unlink").unwrap();
        a.send(0, b"stale").unwrap();
        unlink("/rtmq-test-unlink").unwrap();
        // `a` still works: unlink only removes the name, not the object.
        let mut buf = [0u8; 8192];
        let (_, len) = a.receive(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"stale");

        let b = MessageQueue::create("/rtmq-test-unlink").unwrap();
        assert_eq!(b.attributes().current_messages, 0);
        unlink("/rtmq-test-unlink").unwrap();
    }

    #[test]
    fn descriptor_close_destroys_queue_after_unlink() {
        warn_if_leftover("/rtmq-test-destroy");
        let a = MessageQueue::create("/rtmq-test-destroy").unwrap();
        let b = a.try_clone().unwrap();
        unlink("/rtmq-test-destroy").unwrap();
        drop(a);
        // `b` is still a valid descriptor; the queue isn't destroyed until
        // every descriptor closes.
        assert_eq!(b.attributes().current_messages, 0);
    }

    #[test]
    fn iterator_drains_until_empty_in_nonblocking_mode() {
        warn_if_leftover("/rtmq-test-iter");
        let mq = OpenOptions::readwrite().create().nonblocking().open("/rtmq-test-iter").unwrap();
        mq.send(1, b"a").unwrap();
        mq.send(2, b"b").unwrap();
        let received: Vec<_> = mq.iter().collect();
        assert_eq!(received, vec![(2, b"b".to_vec()), (1, b"a".to_vec())]);
        unlink("/rtmq-test-iter").unwrap();
    }

    #[test]
    fn zero_capacity_rejected_at_creation() {
        let err = OpenOptions::readwrite().create().capacity(0).open("/rtmq-test-zero").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
