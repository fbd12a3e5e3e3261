//! Volta Runtime - the broker process shell
//!
//! The algorithm crates are synchronous; this crate gives each module a
//! cooperative event loop of its own. A module task owns its state and
//! consumes a single channel of [`Event`]s, so message handlers and
//! timer callbacks for one module never overlap, and the only thing
//! shared across modules is the skew register.

pub mod broker;
pub mod device;
pub mod transport;

pub use broker::*;
pub use device::*;
pub use transport::*;
