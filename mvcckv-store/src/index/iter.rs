use super::node::Node;
use crossbeam::epoch::{self, Shared};
use mvcckv_core::Key;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::Ordering;

/// A position in the index's bottom (level 0) chain.
///
/// Mirrors the source's `SkipList::Iterator`: a raw reference to a node,
/// valid as long as the node hasn't been lazily erased and hasn't been
/// physically freed. [`super::Index::compact`] is the only thing that ever
/// frees a node, and its contract explicitly forbids running concurrently
/// with any reader or writer -- so an `Iter` never dangles for the
/// lifetime `'a` it borrows from the owning [`super::Index`].
pub struct Iter<'a, V> {
    node: *const Node<V>,
    _marker: PhantomData<&'a Node<V>>,
}

impl<'a, V> Iter<'a, V> {
    pub(crate) fn from_shared(shared: Shared<'_, Node<V>>) -> Self {
        Self {
            node: shared.as_raw(),
            _marker: PhantomData,
        }
    }

    /// The end iterator: an invalid position, equivalent to a null node.
    pub fn end() -> Self {
        Self {
            node: ptr::null(),
            _marker: PhantomData,
        }
    }

    /// A position is valid when it points at a node that has not been
    /// lazily erased.
    pub fn is_valid(&self) -> bool {
        if self.node.is_null() {
            return false;
        }
        // SAFETY: see the struct-level note on node lifetime.
        unsafe { !(*self.node).deleted.load(Ordering::Acquire) }
    }

    /// The key at this position.
    ///
    /// # Panics
    ///
    /// Panics if called on an end (invalid) iterator.
    pub fn key(&self) -> &'a Key {
        assert!(!self.node.is_null(), "key() called on an end iterator");
        unsafe { &(*self.node).key }
    }

    /// The value at this position.
    ///
    /// # Panics
    ///
    /// Panics if called on an end (invalid) iterator.
    pub fn value(&self) -> &'a V {
        assert!(!self.node.is_null(), "value() called on an end iterator");
        unsafe { (*self.node).value() }
    }

    pub(crate) fn node_ptr(&self) -> *const Node<V> {
        self.node
    }

    /// Advances to the successor at the bottom level. A no-op on an end
    /// iterator.
    pub fn advance(&mut self) {
        if self.node.is_null() {
            return;
        }
        let guard = &epoch::pin();
        // SAFETY: see the struct-level note on node lifetime.
        let next = unsafe { (*self.node).next[0].load(Ordering::Acquire, guard) };
        self.node = next.as_raw();
    }
}

impl<'a, V> Clone for Iter<'a, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, V> Copy for Iter<'a, V> {}

impl<'a, V> PartialEq for Iter<'a, V> {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl<'a, V> Eq for Iter<'a, V> {}
