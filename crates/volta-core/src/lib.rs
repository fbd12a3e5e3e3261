//! Volta Core - fundamental types shared by every broker module
//!
//! This crate defines the vocabulary the rest of the workspace speaks:
//! - Identifiers (NodeId, Symbol)
//! - Wall-clock primitives (WallTime, TimeDelta) and the process-global
//!   skew register
//! - The shared error type

pub mod error;
pub mod id;
pub mod time;

pub use error::*;
pub use id::*;
pub use time::*;
