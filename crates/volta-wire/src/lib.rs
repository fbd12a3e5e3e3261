//! Volta wire format
//!
//! Envelope = module tag + typed payload. Payloads are the only things a
//! broker ever puts on a peer connection; the transport below this layer
//! guarantees per-pair FIFO delivery and nothing else.

pub mod envelope;
pub mod payload;

pub use envelope::*;
pub use payload::*;
