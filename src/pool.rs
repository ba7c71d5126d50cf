//! A fixed-count pool of equally-sized message slots backing one queue.
//!
//! `alloc()`
//! pops from a LIFO free list (most-recently-freed first, for cache reuse);
//! `free()` pushes back onto it. Exhaustion is the sole source of
//! "queue full" on the send path.

/// A single message slot: the payload bytes actually written plus its
/// declared capacity. Slots are reused across their lifetime rather than
/// reallocated, so `payload` keeps its backing allocation between uses.
#[derive(Debug)]
pub struct Slot {
    payload: Vec<u8>,
}

impl Slot {
    fn with_capacity(message_size: usize) -> Self {
        Slot { payload: Vec::with_capacity(message_size) }
    }

    pub fn set(&mut self, bytes: &[u8]) {
        self.payload.clear();
        self.payload.extend_from_slice(bytes);
    }

    pub fn bytes(&self) -> &[u8] {
        &self.payload
    }
}

/// Fixed arena of `max_messages` slots, each with `message_size` capacity.
/// Slots are addressed by index; a slot is either on the LIFO free list or
/// handed out to the priority-ordered message list, never both.
#[derive(Debug)]
pub struct MessagePool {
    arena: Vec<Slot>,
    free: Vec<usize>,
    message_size: usize,
}

impl MessagePool {
    pub fn new(max_messages: usize, message_size: usize) -> Self {
        let arena = (0..max_messages).map(|_| Slot::with_capacity(message_size)).collect();
        let free = (0..max_messages).rev().collect();
        MessagePool { arena, free, message_size }
    }

    pub fn message_size(&self) -> usize {
        self.message_size
    }

    pub fn capacity(&self) -> usize {
        self.arena.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Pop a free slot index, most-recently-freed first. `None` means the
    /// pool is exhausted: the sole source of "queue full" on the send path.
    pub fn alloc(&mut self) -> Option<usize> {
        self.free.pop()
    }

    /// Return a slot to the free list. The caller must have taken it from
    /// `alloc()` or the priority list and not hold on to it afterwards.
    pub fn free(&mut self, index: usize) {
        debug_assert!(index < self.arena.len());
        self.free.push(index);
    }

    pub fn slot(&self, index: usize) -> &Slot {
        &self.arena[index]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut Slot {
        &mut self.arena[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_free_round_trip_all_slots() {
        let mut pool = MessagePool::new(3, 8);
        assert_eq!(pool.free_count(), 3);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        let c = pool.alloc().unwrap();
        assert!(pool.alloc().is_none());
        assert_eq!(pool.free_count(), 0);
        pool.free(b);
        pool.free(a);
        pool.free(c);
        assert_eq!(pool.free_count(), 3);
    }

    #[test]
    fn free_list_is_lifo() {
        let mut pool = MessagePool::new(3, 8);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        pool.free(a);
        pool.free(b);
        // most-recently-freed (b) comes back first
        assert_eq!(pool.alloc(), Some(b));
        assert_eq!(pool.alloc(), Some(a));
    }

    #[test]
    fn slot_retains_bytes() {
        let mut pool = MessagePool::new(1, 8);
        let idx = pool.alloc().unwrap();
        pool.slot_mut(idx).set(b"hi");
        assert_eq!(pool.slot(idx).bytes(), b"hi");
    }
}
