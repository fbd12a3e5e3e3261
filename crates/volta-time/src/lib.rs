//! Volta Time - peer-to-peer clock synchronization
//!
//! Brokers have no common clock. This crate estimates, for every
//! reachable peer, the offset between the local clock and the peer's,
//! blends those estimates into a single correction toward the implicit
//! network consensus clock, and publishes it through the process-global
//! skew register.

pub mod sync;
pub mod table;

pub use sync::*;
pub use table::*;
