//! Core types shared across the mvcckv workspace.

/// A key in the store, represented as an immutable byte string.
///
/// The empty key is reserved for the index sentinel head and must never
/// be used by callers.
pub type Key = Vec<u8>;

/// A value in the store, represented as an immutable byte string.
///
/// An empty value of a committed record denotes logical deletion
/// (a tombstone).
pub type Value = Vec<u8>;

/// A monotonically increasing transaction/version number.
///
/// Assigned by the coordinator's atomic sequence counter; every snapshot
/// and every write is stamped with one.
pub type Version = u64;
