use crossbeam::epoch::Atomic;
use mvcckv_core::Key;
use std::cell::UnsafeCell;
use std::sync::atomic::AtomicBool;

/// A skip-list node: an owned `(key, value, tower)` triple.
///
/// `next[level]` holds the successor at `level` (0-indexed; level 0 is the
/// bottom level the public iterators walk). Towers are sized to the
/// node's randomly assigned height at construction and never resized.
pub(crate) struct Node<V> {
    pub key: Key,
    value: UnsafeCell<V>,
    pub deleted: AtomicBool,
    pub next: Vec<Atomic<Node<V>>>,
}

// SAFETY: `value` is only ever mutated through `overwrite_value`, which is
// documented as single-threaded-only; all other access is via `&V`, and V
// itself (Row) carries its own interior synchronization.
unsafe impl<V: Send> Send for Node<V> {}
unsafe impl<V: Send + Sync> Sync for Node<V> {}

impl<V: Default> Node<V> {
    pub fn new(key: Key, height: usize) -> Self {
        let mut next = Vec::with_capacity(height);
        for _ in 0..height {
            next.push(Atomic::null());
        }
        Self {
            key,
            value: UnsafeCell::new(V::default()),
            deleted: AtomicBool::new(false),
            next,
        }
    }

    pub fn with_value(key: Key, value: V, height: usize) -> Self {
        let mut next = Vec::with_capacity(height);
        for _ in 0..height {
            next.push(Atomic::null());
        }
        Self {
            key,
            value: UnsafeCell::new(value),
            deleted: AtomicBool::new(false),
            next,
        }
    }

    /// The sentinel head: reserved empty key, tower spanning every level,
    /// pre-marked deleted so it is never mistaken for a live entry.
    pub fn head(max_level: usize) -> Self {
        let node = Self::new(Key::new(), max_level);
        node.deleted.store(true, std::sync::atomic::Ordering::Relaxed);
        node
    }
}

impl<V> Node<V> {
    pub fn height(&self) -> usize {
        self.next.len()
    }

    pub fn value(&self) -> &V {
        // SAFETY: shared access only; see the `unsafe impl Send/Sync` note.
        unsafe { &*self.value.get() }
    }

    /// Overwrites the node's value in place.
    ///
    /// # Safety
    ///
    /// Not atomic with respect to concurrent readers or writers of this
    /// node's value. Reserved for single-threaded population, matching
    /// `Index::insert(key, value)`'s documented contract.
    pub unsafe fn overwrite_value(&self, value: V) {
        *self.value.get() = value;
    }
}
