//! Core types and error handling for mvcckv
//!
//! This crate contains the fundamental vocabulary shared by every other
//! crate in the workspace:
//!
//! - Common error types with [`Error`] and [`Result`]
//! - Basic data types like [`Key`], [`Value`], and [`Version`]
//!
//! # Example
//!
//! ```
//! use mvcckv_core::{Key, Value};
//!
//! let key: Key = b"user:123".to_vec();
//! let value: Value = b"John Doe".to_vec();
//! ```

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
