//! Common utilities for aqueduct
//!
//! This crate provides the unified error type shared across all aqueduct
//! crates.

pub mod error;

pub use error::{AqueductError, Result};
