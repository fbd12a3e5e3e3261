//! Error types for the volta broker

use thiserror::Error;

/// Workspace-wide error type
#[derive(Error, Debug)]
pub enum VoltaError {
    // Wire errors
    #[error("invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("unknown payload kind: {0}")]
    UnknownPayloadKind(u8),

    #[error("unknown module tag: {0}")]
    UnknownModuleTag(u8),

    // Identity errors
    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    // Topology errors
    #[error("failed to read topology file: {0}")]
    TopologyIo(#[from] std::io::Error),

    #[error("malformed topology: {0}")]
    MalformedTopology(String),

    #[error("node {0} is not bound to any topology symbol")]
    UnboundNode(String),

    // Transport errors
    #[error("transport: {0}")]
    Transport(String),
}

/// Result type for volta operations
pub type VoltaResult<T> = Result<T, VoltaError>;
