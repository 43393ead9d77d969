//! vproxy-rs Core Library
//!
//! This crate provides the error type, the bounds-checked byte view and the
//! small shared types used by the vproxy-rs packet codecs.

pub mod byte_array;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use byte_array::ByteArray;
pub use error::{Error, Result};
pub use types::*;
