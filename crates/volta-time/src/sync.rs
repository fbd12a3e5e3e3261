//! The clock synchronizer: round-trip exchanges and offset regression
//!
//! Every round the synchronizer challenges each known peer with a
//! sequence-stamped probe. A response carries the peer's raw send time
//! plus a snapshot of its own offset table. The response history per
//! peer feeds a least-squares fit whose intercept, biased by an
//! alternating-sign estimate of the one-way delay, becomes the offset
//! estimate for that pair; third-party rows are adopted at a flat
//! confidence tax. The weighted mean over all pairs is published as the
//! process-wide correction.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime};
use tracing::{debug, warn};

use volta_core::{ClockSource, NodeId, SkewRegister, TimeDelta, VoltaError, VoltaResult, WallTime};
use volta_wire::{ClockExchange, ClockExchangeResponse, OffsetTableEntry, Payload};

use crate::{DecayingWeight, PairKey};

/// Interval between exchange rounds
pub const EXCHANGE_INTERVAL: Duration = Duration::from_secs(10);

/// Exchanges kept per peer for the regression; each contributes two samples
const MAX_REGRESSION_ENTRIES: usize = 200;

/// Flat confidence tax on offsets learned through a third party
const TRANSITIVE_TAX: f64 = 0.1;

/// One-way delay above which a response is logged as suspect
const LAG_WARN_THRESHOLD: f64 = 0.015;

/// Wire shape of the unsynchronized send time, e.g. `2026-Aug-02 09:15:00.000123`
const SENDTIME_FORMAT: &str = "%Y-%b-%d %H:%M:%S%.6f";

/// In-flight challenge awaiting a response
#[derive(Clone, Copy, Debug)]
struct Challenge {
    seq: u32,
    issued: WallTime,
}

/// Remote send time paired with a local observation of it
type TimeTuple = (WallTime, WallTime);

/// Per-peer offset/skew estimator and correction publisher.
///
/// All handlers run on the clock module's cooperative loop and complete
/// synchronously; the only state visible outside is the correction
/// written to the shared [`SkewRegister`].
pub struct ClockSynchronizer {
    local: NodeId,
    /// Current consensus group, sorted, self excluded
    peers: Vec<NodeId>,
    offsets: BTreeMap<PairKey, TimeDelta>,
    skews: BTreeMap<PairKey, f64>,
    weights: BTreeMap<PairKey, DecayingWeight>,
    responses: BTreeMap<PairKey, VecDeque<TimeTuple>>,
    queries: BTreeMap<PairKey, Challenge>,
    round: u32,
    mean_skew: f64,
    register: Arc<SkewRegister>,
    clock: Arc<dyn ClockSource>,
}

impl ClockSynchronizer {
    pub fn new(local: NodeId, register: Arc<SkewRegister>, clock: Arc<dyn ClockSource>) -> Self {
        let mut sync = ClockSynchronizer {
            local,
            peers: Vec::new(),
            offsets: BTreeMap::new(),
            skews: BTreeMap::new(),
            weights: BTreeMap::new(),
            responses: BTreeMap::new(),
            queries: BTreeMap::new(),
            round: 0,
            mean_skew: 0.0,
            register: Arc::clone(&register),
            clock,
        };
        sync.pin_self_loop();
        sync
    }

    /// Replace the known-peer set. Estimates for vanished peers are kept
    /// and simply decay.
    pub fn handle_peer_list(&mut self, peers: &[NodeId]) {
        let mut list: Vec<NodeId> = peers.iter().copied().filter(|p| *p != self.local).collect();
        list.sort();
        list.dedup();
        self.peers = list;
    }

    /// One exchange round: challenge every peer, then recompute and
    /// publish the correction. Returns the outgoing challenge batch.
    ///
    /// Peers strictly after `self` in UUID order are challenged first,
    /// wrapping around; the circular shift spreads the burst so two
    /// nodes do not hammer each other in lockstep.
    pub fn exchange_round(&mut self) -> Vec<(NodeId, Payload)> {
        let now = self.clock.wall_now();
        let pivot = self.peers.partition_point(|p| *p <= self.local);
        let mut out = Vec::with_capacity(self.peers.len());
        for peer in self.peers[pivot..].iter().chain(self.peers[..pivot].iter()) {
            self.queries.insert(
                PairKey::new(self.local, *peer),
                Challenge {
                    seq: self.round,
                    issued: now,
                },
            );
            out.push((
                *peer,
                Payload::ClockExchange(ClockExchange { query: self.round }),
            ));
        }
        self.round += 1;
        self.pin_self_loop();
        self.publish();
        debug!(round = self.round, peers = out.len(), "exchange round issued");
        out
    }

    /// Route an incoming clock payload. A challenge yields the response
    /// to send back; anything else either updates local state or is
    /// dropped with a warning.
    pub fn handle_incoming(&mut self, from: NodeId, payload: &Payload) -> Option<(NodeId, Payload)> {
        match payload {
            Payload::ClockExchange(msg) => Some((from, self.make_response(msg.query))),
            Payload::ClockExchangeResponse(msg) => {
                self.handle_response(from, msg);
                None
            }
            other => {
                warn!(
                    kind = other.kind_name(),
                    "clock module dropping unexpected payload"
                );
                None
            }
        }
    }

    /// Local time plus the published correction
    pub fn synchronized_now(&self) -> WallTime {
        self.clock.wall_now() + self.register.load()
    }

    /// Offset estimate toward a peer's clock, if one exists
    pub fn offset(&self, peer: NodeId) -> Option<TimeDelta> {
        self.offsets.get(&PairKey::new(self.local, peer)).copied()
    }

    /// Rate-deviation estimate toward a peer's clock, if one exists
    pub fn skew(&self, peer: NodeId) -> Option<f64> {
        self.skews.get(&PairKey::new(self.local, peer)).copied()
    }

    /// Effective (decayed) confidence in the estimate toward a peer
    pub fn weight(&self, peer: NodeId) -> Option<f64> {
        let key = PairKey::new(self.local, peer);
        if key == PairKey::self_loop(self.local) {
            return Some(1.0);
        }
        self.weights.get(&key).map(|w| w.effective(self.round))
    }

    /// Weighted mean rate deviation across all pairs, refreshed each
    /// round. Tracked for diagnostics; never applied to readings, since
    /// multiplying a rate into historical timestamps compounds instead
    /// of correcting.
    pub fn mean_skew(&self) -> f64 {
        self.mean_skew
    }

    /// The currently published correction
    pub fn correction(&self) -> TimeDelta {
        self.register.load()
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    /// Answer a challenge with the local raw clock and a full table snapshot
    fn make_response(&self, query: u32) -> Payload {
        let now = self.clock.wall_now();
        let mut table = Vec::with_capacity(self.offsets.len());
        for (key, offset) in &self.offsets {
            table.push(OffsetTableEntry {
                node: key.to,
                offset_secs: offset.whole_seconds(),
                offset_fracs: offset.subsec_micros(),
                weight: self.effective_weight(*key),
                skew: self.skews.get(key).copied().unwrap_or(0.0),
            });
        }
        Payload::ClockExchangeResponse(ClockExchangeResponse {
            response: query,
            unsynchronized_sendtime: format_sendtime(now),
            table,
        })
    }

    fn handle_response(&mut self, from: NodeId, msg: &ClockExchangeResponse) {
        let key = PairKey::new(self.local, from);
        let now = self.clock.wall_now();
        let response_ts = match parse_sendtime(&msg.unsynchronized_sendtime) {
            Ok(ts) => ts,
            Err(err) => {
                warn!(peer = %from, %err, "dropping exchange response with bad send time");
                return;
            }
        };
        // Stale or unknown sequence numbers are dropped without comment;
        // a slow response simply misses its window.
        let challenge = match self.queries.get(&key) {
            Some(challenge) if challenge.seq == msg.response => challenge.issued,
            _ => return,
        };
        self.queries.remove(&key);

        let history = self.responses.entry(key).or_default();
        history.push_back((response_ts, challenge));
        history.push_back((response_ts, now));
        if history.len() > MAX_REGRESSION_ENTRIES * 2 {
            history.pop_front();
            history.pop_front();
        }

        let fit = regress(history, now);
        if fit.lag < LAG_WARN_THRESHOLD {
            debug!(peer = %from, lag = fit.lag, "computed lag");
        } else {
            warn!(peer = %from, lag = fit.lag, "computed lag");
        }

        self.offsets
            .insert(key, TimeDelta::from_secs_f64(-fit.alpha));
        self.set_weight(key, 1.0);
        self.skews.insert(key, fit.slope - 1.0);

        let base_offset = self.offsets[&key];
        let base_skew = self.skews[&key];
        for entry in &msg.table {
            if entry.node == from || entry.node == self.local {
                continue;
            }
            // Borrowed rows lose a flat slice of trust to account for the
            // extra hop.
            let borrowed = entry.weight - TRANSITIVE_TAX;
            let indirect = PairKey::new(self.local, entry.node);
            if !self.offsets.contains_key(&indirect) {
                self.offsets.insert(indirect, TimeDelta::ZERO);
                self.set_weight(indirect, 0.0);
                self.skews.insert(indirect, 0.0);
            }
            if self.effective_weight(indirect) < borrowed {
                self.offsets.insert(
                    indirect,
                    base_offset + TimeDelta::from_parts(entry.offset_secs, entry.offset_fracs),
                );
                self.set_weight(indirect, borrowed);
                self.skews.insert(indirect, base_skew + entry.skew);
            }
        }
    }

    /// Recompute and publish the weighted mean offset and skew
    fn publish(&mut self) {
        let mut weighted_offset = 0.0;
        let mut weighted_skew = 0.0;
        let mut total = 0.0;
        for (key, offset) in &self.offsets {
            let w = self.effective_weight(*key);
            weighted_offset += w * offset.as_secs_f64();
            weighted_skew += w * self.skews.get(key).copied().unwrap_or(0.0);
            total += w;
        }
        if total != 0.0 {
            let correction = TimeDelta::from_secs_f64(weighted_offset / total);
            self.mean_skew = weighted_skew / total;
            debug!(correction_us = correction.as_micros(), "publishing clock correction");
            self.register.store(correction);
        }
    }

    /// Effective weight of a pair present in the offset table. Every
    /// offset entry has a weight entry; anything else is torn state.
    fn effective_weight(&self, key: PairKey) -> f64 {
        if key == PairKey::self_loop(self.local) {
            return 1.0;
        }
        self.weights
            .get(&key)
            .map(|w| w.effective(self.round))
            .expect("offset table entry has no weight entry")
    }

    fn set_weight(&mut self, key: PairKey, base: f64) {
        self.weights.insert(key, DecayingWeight::new(base, self.round));
    }

    fn pin_self_loop(&mut self) {
        let key = PairKey::self_loop(self.local);
        self.offsets.insert(key, TimeDelta::ZERO);
        self.set_weight(key, 1.0);
        self.skews.insert(key, 0.0);
    }
}

struct Regression {
    alpha: f64,
    slope: f64,
    lag: f64,
}

/// Least-squares fit of (remote send time, local time) pairs relative to
/// `base`. Putting the base at now makes the intercept directly usable
/// as an offset without ever applying a rate to a raw reading. The
/// alternating-sign mean of the local coordinates estimates the one-way
/// delay, which biases the intercept toward zero.
fn regress(history: &VecDeque<TimeTuple>, base: WallTime) -> Regression {
    let n = history.len() as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_lag = 0.0;
    let mut flip = -1.0;
    for (remote, local) in history {
        let x = (*remote - base).as_secs_f64();
        let y = (*local - base).as_secs_f64();
        sum_x += x;
        sum_y += y;
        sum_lag += flip * y;
        flip = -flip;
    }
    let lag = sum_lag / n;
    let x_bar = sum_x / n;
    let y_bar = sum_y / n;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (remote, local) in history {
        let dx = (*remote - base).as_secs_f64() - x_bar;
        let dy = (*local - base).as_secs_f64() - y_bar;
        sxy += dx * dy;
        sxx += dx * dx;
    }
    // No spread means a single x coordinate; fall back to the nominal rate.
    let slope = if sxx != 0.0 { sxy / sxx } else { 1.0 };

    let mut alpha = y_bar - slope * x_bar;
    if alpha <= 0.0 {
        alpha += lag;
    } else {
        alpha -= lag;
    }
    Regression { alpha, slope, lag }
}

fn format_sendtime(t: WallTime) -> String {
    DateTime::from_timestamp_micros(t.as_micros())
        .map(|dt| dt.format(SENDTIME_FORMAT).to_string())
        .unwrap_or_default()
}

fn parse_sendtime(s: &str) -> VoltaResult<WallTime> {
    let naive = NaiveDateTime::parse_from_str(s, SENDTIME_FORMAT)
        .map_err(|err| VoltaError::InvalidTimestamp(format!("{s}: {err}")))?;
    Ok(WallTime::from_micros(naive.and_utc().timestamp_micros()))
}
