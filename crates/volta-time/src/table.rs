//! Pair-indexed confidence bookkeeping for the synchronizer

use volta_core::NodeId;

/// Directed node pair indexing every synchronizer table
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairKey {
    pub from: NodeId,
    pub to: NodeId,
}

impl PairKey {
    #[inline]
    pub fn new(from: NodeId, to: NodeId) -> Self {
        PairKey { from, to }
    }

    /// The pinned self-referential pair
    #[inline]
    pub fn self_loop(node: NodeId) -> Self {
        PairKey {
            from: node,
            to: node,
        }
    }
}

/// Confidence in a pair offset, decaying once per exchange round.
///
/// A weight is a base value stamped with the round it was set in; reading
/// it back multiplies by `DECAY` for every round elapsed since, so
/// estimates for peers that stopped answering fade instead of lingering
/// at full strength.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecayingWeight {
    pub base: f64,
    pub round: u32,
}

impl DecayingWeight {
    /// Per-round decay factor
    pub const DECAY: f64 = 0.99999;

    #[inline]
    pub fn new(base: f64, round: u32) -> Self {
        DecayingWeight { base, round }
    }

    /// Effective weight as observed at round `now`
    pub fn effective(&self, now: u32) -> f64 {
        self.base * Self::DECAY.powi(now.saturating_sub(self.round) as i32)
    }
}
