//! The named-object registry.
//!
//! A name-to-queue table with two-phase publish: a creator drops the
//! registry lock while it does the expensive part of building a queue
//! (allocating the pool arena), and concurrent openers of the same name
//! park on a per-name condvar instead of racing to create a second queue or
//! observing a half-built one.
//!
//! Reference counting and the "destroy on last reference" decision live on
//! [`QueueObject`](crate::queue::QueueObject) itself (as two atomics) rather
//! than in a separate refcount field here, so that closing a descriptor's
//! "is this the final reference" check and the registry's "is this name
//! still linked" check can be resolved together without a second lock
//! hand-off; see
//! [`QueueObject::close_descriptor`](crate::queue::QueueObject::close_descriptor)
//! and [`QueueObject::claim_destroy_after_unlink`](crate::queue::QueueObject::claim_destroy_after_unlink).

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::Reason;
use crate::name::QueueName;
use crate::queue::QueueObject;

/// Shared by all concurrent openers racing to create the same new name.
pub struct Building {
    result: Mutex<Option<Result<Arc<QueueObject>, Reason>>>,
    condvar: Condvar,
}

impl Building {
    fn new() -> Arc<Self> {
        Arc::new(Building { result: Mutex::new(None), condvar: Condvar::new() })
    }

    /// Block until the creator calls [`Registry::node_add_finished`].
    pub fn wait(&self) -> Result<Arc<QueueObject>, Reason> {
        let mut guard = self.result.lock().unwrap();
        while guard.is_none() {
            guard = self.condvar.wait(guard).unwrap();
        }
        guard.clone().unwrap()
    }
}

enum Node {
    Building(Arc<Building>),
    Ready(Arc<QueueObject>),
}

/// Outcome of looking a name up, combining a lookup and a start-building
/// step into one registry-lock critical section: the window between "does
/// it exist" and "start building it" must not admit a second creator, so
/// both steps are taken under the same lock acquisition.
pub enum Lookup {
    /// An already-built queue; bump its descriptor count and hand out a
    /// descriptor to it.
    Found(Arc<QueueObject>),
    /// `O_CREAT|O_EXCL` and the name is already taken (building or ready).
    AlreadyExists,
    /// Someone else is creating it; wait on this handle for the outcome.
    Building(Arc<Building>),
    /// The name does not exist and creation was not requested.
    NotFound,
    /// The name does not exist; the caller is now responsible for building
    /// it and must call [`Registry::node_add_finished`] exactly once.
    Start(Arc<Building>),
}

#[derive(Default)]
pub struct Registry {
    nodes: Mutex<HashMap<QueueName, Node>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn lookup_or_start(&self, name: &QueueName, create: bool, exclusive: bool) -> Lookup {
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get(name) {
            Some(Node::Ready(obj)) => {
                if create && exclusive {
                    Lookup::AlreadyExists
                } else {
                    Lookup::Found(obj.clone())
                }
            }
            Some(Node::Building(b)) => {
                if create && exclusive {
                    Lookup::AlreadyExists
                } else {
                    Lookup::Building(b.clone())
                }
            }
            None => {
                if !create {
                    return Lookup::NotFound;
                }
                let building = Building::new();
                nodes.insert(name.clone(), Node::Building(building.clone()));
                Lookup::Start(building)
            }
        }
    }

    /// Finish what `lookup_or_start`'s `Lookup::Start` began: publish the
    /// built queue, or withdraw the placeholder on failure, then wake
    /// everyone waiting on `building`.
    pub fn node_add_finished(&self, name: &QueueName, building: &Arc<Building>, result: Result<Arc<QueueObject>, Reason>) {
        {
            let mut nodes = self.nodes.lock().unwrap();
            match &result {
                Ok(obj) => {
                    nodes.insert(name.clone(), Node::Ready(obj.clone()));
                }
                Err(_) => {
                    nodes.remove(name);
                }
            }
        }
        let mut guard = building.result.lock().unwrap();
        *guard = Some(result);
        building.condvar.notify_all();
    }

    /// Unlink a name from the registry if it currently maps
    /// to `expected` (identity, not just name — a racing create could have
    /// replaced it). Returns the removed object.
    pub fn remove_if(&self, name: &QueueName, expected: &Arc<QueueObject>) -> Option<Arc<QueueObject>> {
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get(name) {
            Some(Node::Ready(obj)) if Arc::ptr_eq(obj, expected) => {
                nodes.remove(name);
                Some(expected.clone())
            }
            _ => None,
        }
    }

    /// True if `name` is not currently linked to any queue (used by tests
    /// and by `unlink`'s NotFound path).
    pub fn contains(&self, name: &QueueName) -> bool {
        self.nodes.lock().unwrap().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Attrs;

    fn attrs() -> Attrs {
        Attrs { max_messages: 4, message_size: 8 }
    }

    #[test]
    fn absent_create_then_found() {
        let reg = Registry::new();
        let name = crate::name::validate("/r1").unwrap();
        match reg.lookup_or_start(&name, true, false) {
            Lookup::Start(b) => {
                let obj = Arc::new(QueueObject::try_new(attrs()).unwrap());
                reg.node_add_finished(&name, &b, Ok(obj.clone()));
            }
            _ => panic!("expected Start"),
        }
        match reg.lookup_or_start(&name, false, false) {
            Lookup::Found(_) => {}
            _ => panic!("expected Found after publish"),
        }
    }

    #[test]
    fn exclusive_create_fails_once_present() {
        let reg = Registry::new();
        let name = crate::name::validate("/r2").unwrap();
        if let Lookup::Start(b) = reg.lookup_or_start(&name, true, false) {
            reg.node_add_finished(&name, &b, Ok(Arc::new(QueueObject::try_new(attrs()).unwrap())));
        }
        match reg.lookup_or_start(&name, true, true) {
            Lookup::AlreadyExists => {}
            _ => panic!("expected AlreadyExists"),
        }
    }

    #[test]
    fn absent_without_create_is_not_found() {
        let reg = Registry::new();
        let name = crate::name::validate("/r3").unwrap();
        match reg.lookup_or_start(&name, false, false) {
            Lookup::NotFound => {}
            _ => panic!("expected NotFound"),
        }
    }

    #[test]
    fn failed_build_is_withdrawn_and_reported_to_waiters() {
        let reg = Arc::new(Registry::new());
        let name = crate::name::validate("/r4").unwrap();
        let building = match reg.lookup_or_start(&name, true, false) {
            Lookup::Start(b) => b,
            _ => unreachable!(),
        };
        let reg2 = reg.clone();
        let name2 = name.clone();
        let waiter = std::thread::spawn(move || {
            match reg2.lookup_or_start(&name2, true, false) {
                Lookup::Building(b) => b.wait(),
                _ => panic!("expected Building"),
            }
        });
        reg.node_add_finished(&name, &building, Err(Reason::NoMemory));
        assert_eq!(waiter.join().unwrap(), Err(Reason::NoMemory));
        assert!(!reg.contains(&name));
    }
}
