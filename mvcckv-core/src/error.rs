//! Error types for mvcckv
//!
//! This module defines the error types used throughout mvcckv. Lock
//! timeouts and invalid-argument failures (e.g. an empty key on write) are
//! reported as `bool`/`Option` by the low-level API (the index, the row,
//! `Table::update`) rather than through `Error`, matching the original
//! design; `Error` is reserved for the table facade's batched operations
//! and the transaction layer, where callers expect a `Result`.

use thiserror::Error;

/// The main error type for mvcckv operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The requested key has no live entry.
    #[error("key not found")]
    KeyNotFound,

    /// A transaction's lock, execute, or commit phase failed; every record
    /// it had appended was undone and every row it held was unlocked.
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    /// Attempted to copy a row whose head record has not reached a
    /// terminal (committed or deleted) status.
    #[error("cannot copy a row whose head record is not committed")]
    UnsupportedCopy,
}

/// A specialized Result type for mvcckv operations.
pub type Result<T> = std::result::Result<T, Error>;
