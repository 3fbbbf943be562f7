//! Core types for the evented promise runtime.
//!
//! This crate provides the foundational leaf types shared by the runtime:
//! the settlement sum type carried through promise chains and the event
//! loop's lifecycle error.
//!
//! # Overview
//!
//! - [`PromiseResult`] - Tagged settlement outcome (value or error)
//! - [`LoopError`] - Event loop lifecycle errors
//!
//! # Examples
//!
//! ```
//! use core_types::PromiseResult;
//!
//! let settled: PromiseResult<i32, String> = PromiseResult::value(42);
//! assert!(settled.is_value());
//! assert_eq!(settled.value_or(0), 42);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod result;

pub use error::LoopError;
pub use result::PromiseResult;
