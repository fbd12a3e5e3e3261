//! Typed module payloads exchanged between brokers

use volta_core::{NodeId, Symbol};

/// Number of future dispatch steps carried per state message
pub const DISPATCH_STEPS: usize = 3;

/// Clock round challenge: a sequence-stamped probe
#[derive(Clone, Debug, PartialEq)]
pub struct ClockExchange {
    pub query: u32,
}

/// One row of the responder's offset table.
///
/// Offsets travel as whole seconds plus fractional microseconds so the
/// codec stays integer-exact; `weight` is the responder's *effective*
/// (already decayed) confidence in the row.
#[derive(Clone, Debug, PartialEq)]
pub struct OffsetTableEntry {
    pub node: NodeId,
    pub offset_secs: i64,
    pub offset_fracs: i64,
    pub weight: f64,
    pub skew: f64,
}

/// Reply to a [`ClockExchange`]: the responder's raw send time and a
/// snapshot of everything it believes about other clocks
#[derive(Clone, Debug, PartialEq)]
pub struct ClockExchangeResponse {
    pub response: u32,
    pub unsynchronized_sendtime: String,
    pub table: Vec<OffsetTableEntry>,
}

/// Per-iteration gossip state from one dispatch neighbour
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchState {
    pub iteration: u32,
    pub symbol: Symbol,
    pub delta_p: [f64; DISPATCH_STEPS],
    pub lambda: [f64; DISPATCH_STEPS],
}

/// Current consensus group, pushed by the membership layer
#[derive(Clone, Debug, PartialEq)]
pub struct PeerList {
    pub peers: Vec<NodeId>,
}

/// Envelope payload, dispatched on by the receiving module
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    ClockExchange(ClockExchange),
    ClockExchangeResponse(ClockExchangeResponse),
    DispatchState(DispatchState),
    PeerList(PeerList),
}

impl Payload {
    pub(crate) fn kind(&self) -> u8 {
        match self {
            Payload::ClockExchange(_) => 0,
            Payload::ClockExchangeResponse(_) => 1,
            Payload::DispatchState(_) => 2,
            Payload::PeerList(_) => 3,
        }
    }

    /// Human-readable tag for drop logging
    pub fn kind_name(&self) -> &'static str {
        match self {
            Payload::ClockExchange(_) => "clock_exchange",
            Payload::ClockExchangeResponse(_) => "clock_exchange_response",
            Payload::DispatchState(_) => "dispatch_state",
            Payload::PeerList(_) => "peer_list",
        }
    }
}
