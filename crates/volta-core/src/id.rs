//! Identity types for the volta broker
//!
//! Every broker process carries one stable UUID assigned at provisioning
//! time. Inside the dispatch plane nodes are additionally known by a short
//! symbol taken from the physical topology file.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::VoltaError;

/// Node identity - stable opaque UUID, one per broker process
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a fresh random identity
    pub fn random() -> Self {
        NodeId(Uuid::new_v4())
    }

    #[inline]
    pub fn from_uuid(id: Uuid) -> Self {
        NodeId(id)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 16] {
        *self.0.as_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        NodeId(Uuid::from_bytes(bytes))
    }
}

impl FromStr for NodeId {
    type Err = VoltaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(NodeId)
            .map_err(|_| VoltaError::InvalidNodeId(s.to_string()))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Dispatch-plane alias for a node, as written in the topology file
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Symbol(s.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sym({})", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_roundtrip() {
        let id = NodeId::random();
        let bytes = id.to_bytes();
        assert_eq!(NodeId::from_bytes(bytes), id);

        let text = id.to_string();
        assert_eq!(text.parse::<NodeId>().unwrap(), id);
    }

    #[test]
    fn test_node_id_parse_rejects_garbage() {
        assert!("not-a-uuid".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_node_id_ordering_is_stable() {
        let a = NodeId::from_bytes([1; 16]);
        let b = NodeId::from_bytes([2; 16]);
        assert!(a < b);
    }

    #[test]
    fn test_symbol_display() {
        let sym = Symbol::new("7");
        assert_eq!(sym.to_string(), "7");
        assert_eq!(sym.as_str(), "7");
    }
}
