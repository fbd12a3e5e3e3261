//! Physical topology: the adjacency graph and symbol bindings
//!
//! The topology file is a whitespace-separated token stream with two
//! record kinds:
//!
//! ```text
//! edge <sym_a> <sym_b>    # undirected physical edge
//! sst <symbol> <uuid>     # binds a symbol to a broker's node id
//! ```
//!
//! Anything else aborts startup.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use volta_core::{NodeId, Symbol, VoltaError, VoltaResult};

/// Parsed physical topology
#[derive(Clone, Debug, Default)]
pub struct Topology {
    adjacency: BTreeMap<Symbol, BTreeSet<Symbol>>,
    bindings: BTreeMap<Symbol, NodeId>,
}

impl Topology {
    /// Parse a topology token stream
    pub fn parse(text: &str) -> VoltaResult<Self> {
        let mut adjacency: BTreeMap<Symbol, BTreeSet<Symbol>> = BTreeMap::new();
        let mut bindings = BTreeMap::new();
        let mut tokens = text.split_whitespace();
        while let Some(token) = tokens.next() {
            match token {
                "edge" => {
                    let a = tokens.next().ok_or_else(|| {
                        VoltaError::MalformedTopology("edge record missing endpoints".into())
                    })?;
                    let b = tokens.next().ok_or_else(|| {
                        VoltaError::MalformedTopology(format!("edge {a} missing second endpoint"))
                    })?;
                    let a = Symbol::new(a);
                    let b = Symbol::new(b);
                    adjacency.entry(a.clone()).or_default().insert(b.clone());
                    adjacency.entry(b).or_default().insert(a);
                }
                "sst" => {
                    let symbol = tokens.next().ok_or_else(|| {
                        VoltaError::MalformedTopology("sst record missing symbol".into())
                    })?;
                    let id = tokens.next().ok_or_else(|| {
                        VoltaError::MalformedTopology(format!("sst {symbol} missing node id"))
                    })?;
                    bindings.insert(Symbol::new(symbol), id.parse::<NodeId>()?);
                }
                other => {
                    return Err(VoltaError::MalformedTopology(format!(
                        "unexpected token `{other}`"
                    )));
                }
            }
        }
        Ok(Topology {
            adjacency,
            bindings,
        })
    }

    /// Read and parse a topology file
    pub fn from_path(path: impl AsRef<Path>) -> VoltaResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Neighbour set of a symbol, if the symbol appears on any edge
    pub fn neighbours(&self, symbol: &Symbol) -> Option<&BTreeSet<Symbol>> {
        self.adjacency.get(symbol)
    }

    /// Node bound to a symbol
    pub fn node_of(&self, symbol: &Symbol) -> Option<NodeId> {
        self.bindings.get(symbol).copied()
    }

    /// Symbol bound to a node
    pub fn symbol_of(&self, node: NodeId) -> Option<&Symbol> {
        self.bindings
            .iter()
            .find(|(_, bound)| **bound == node)
            .map(|(symbol, _)| symbol)
    }

    /// All symbol-to-node bindings
    pub fn bindings(&self) -> &BTreeMap<Symbol, NodeId> {
        &self.bindings
    }

    /// Maximum vertex degree across the graph
    pub fn max_degree(&self) -> usize {
        self.adjacency
            .values()
            .map(|set| set.len())
            .max()
            .unwrap_or(0)
    }

    /// Uniform gossip weight derived from the maximum degree
    pub fn mixing_epsilon(&self) -> f64 {
        1.0 / (self.max_degree() + 1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE_A: &str = "6ea74538-9c04-4c24-aa4a-f4ec4501ba81";
    const NODE_B: &str = "2b50e32b-2d38-44de-bbbf-0b1b2b1d0d8b";

    fn sample() -> String {
        format!(
            "edge 1 3\nedge 3 4\nedge 4 1\nsst 1 {NODE_A}\nsst 3 {NODE_B}\n"
        )
    }

    #[test]
    fn test_parse_edges_and_bindings() {
        let topology = Topology::parse(&sample()).unwrap();
        let n1 = topology.neighbours(&Symbol::new("1")).unwrap();
        assert!(n1.contains(&Symbol::new("3")));
        assert!(n1.contains(&Symbol::new("4")));
        assert_eq!(n1.len(), 2);

        let bound = topology.node_of(&Symbol::new("1")).unwrap();
        assert_eq!(bound, NODE_A.parse().unwrap());
        assert_eq!(
            topology.symbol_of(NODE_B.parse().unwrap()),
            Some(&Symbol::new("3"))
        );
    }

    #[test]
    fn test_max_degree_and_epsilon() {
        let topology = Topology::parse(&sample()).unwrap();
        assert_eq!(topology.max_degree(), 2);
        assert!((topology.mixing_epsilon() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_token_is_fatal() {
        let err = Topology::parse("vertex 1 2").unwrap_err();
        assert!(matches!(err, VoltaError::MalformedTopology(_)));
    }

    #[test]
    fn test_truncated_edge_is_fatal() {
        let err = Topology::parse("edge 1").unwrap_err();
        assert!(matches!(err, VoltaError::MalformedTopology(_)));
    }

    #[test]
    fn test_bad_node_id_is_fatal() {
        let err = Topology::parse("sst 1 not-a-uuid").unwrap_err();
        assert!(matches!(err, VoltaError::InvalidNodeId(_)));
    }

    #[test]
    fn test_empty_topology() {
        let topology = Topology::parse("").unwrap();
        assert_eq!(topology.max_degree(), 0);
        assert!(topology.neighbours(&Symbol::new("1")).is_none());
    }
}
