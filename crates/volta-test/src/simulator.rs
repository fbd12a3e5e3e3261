//! Deterministic network simulator
//!
//! Links are unidirectional and independently configured. Each link is
//! FIFO: delivery times never reorder within a pair, matching the
//! persistent-connection transport the brokers assume. Latency jitter
//! and drops come from a per-link seeded generator.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use volta_core::NodeId;
use volta_wire::Envelope;

/// Conditions on one simulated link
#[derive(Clone, Debug)]
pub struct LinkConfig {
    /// Base one-way latency
    pub latency: Duration,
    /// Uniform extra latency in `[0, jitter]`
    pub jitter: Duration,
    /// Probability a packet vanishes
    pub drop_rate: f64,
}

impl LinkConfig {
    /// Fixed latency, nothing lost
    pub fn ideal(latency: Duration) -> Self {
        LinkConfig {
            latency,
            jitter: Duration::ZERO,
            drop_rate: 0.0,
        }
    }

    /// A reasonable local network
    pub fn lan() -> Self {
        LinkConfig {
            latency: Duration::from_millis(2),
            jitter: Duration::from_millis(1),
            drop_rate: 0.0,
        }
    }

    /// A congested radio hop
    pub fn lossy() -> Self {
        LinkConfig {
            latency: Duration::from_millis(20),
            jitter: Duration::from_millis(10),
            drop_rate: 0.2,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::lan()
    }
}

/// Counters per link
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkStats {
    pub sent: u64,
    pub dropped: u64,
    pub delivered: u64,
}

struct Link {
    config: LinkConfig,
    rng: StdRng,
    /// (deliver_at, envelope); deliver_at is non-decreasing
    queue: VecDeque<(Duration, Envelope)>,
    last_scheduled: Duration,
    stats: LinkStats,
}

impl Link {
    fn new(config: LinkConfig, seed: u64) -> Self {
        Link {
            config,
            rng: StdRng::seed_from_u64(seed),
            queue: VecDeque::new(),
            last_scheduled: Duration::ZERO,
            stats: LinkStats::default(),
        }
    }

    fn send(&mut self, now: Duration, envelope: Envelope) {
        self.stats.sent += 1;
        if self.config.drop_rate > 0.0 && self.rng.gen::<f64>() < self.config.drop_rate {
            self.stats.dropped += 1;
            return;
        }
        let jitter = if self.config.jitter.is_zero() {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.rng.gen_range(0..=self.config.jitter.as_nanos() as u64))
        };
        // FIFO: a packet never overtakes the one before it.
        let deliver_at = (now + self.config.latency + jitter).max(self.last_scheduled);
        self.last_scheduled = deliver_at;
        self.queue.push_back((deliver_at, envelope));
    }

    fn deliver_due(&mut self, now: Duration, out: &mut Vec<Envelope>) {
        while matches!(self.queue.front(), Some((at, _)) if *at <= now) {
            let (_, envelope) = self.queue.pop_front().expect("front checked");
            self.stats.delivered += 1;
            out.push(envelope);
        }
    }
}

/// Multi-node network with per-pair links
pub struct NetworkSimulator {
    links: BTreeMap<(NodeId, NodeId), Link>,
    default_config: LinkConfig,
    now: Duration,
    master_seed: u64,
    link_counter: u64,
}

impl NetworkSimulator {
    pub fn new(default_config: LinkConfig, master_seed: u64) -> Self {
        NetworkSimulator {
            links: BTreeMap::new(),
            default_config,
            now: Duration::ZERO,
            master_seed,
            link_counter: 0,
        }
    }

    /// Override conditions on one directed link
    pub fn set_link(&mut self, from: NodeId, to: NodeId, config: LinkConfig) {
        let seed = self.next_seed();
        self.links.insert((from, to), Link::new(config, seed));
    }

    /// Queue an envelope for delivery
    pub fn send(&mut self, from: NodeId, to: NodeId, envelope: Envelope) {
        let now = self.now;
        let link = self.link(from, to);
        link.send(now, envelope);
    }

    /// Advance simulated time and collect everything now due, in
    /// deterministic link order
    pub fn tick(&mut self, dt: Duration) -> Vec<(NodeId, NodeId, Envelope)> {
        self.now += dt;
        let mut delivered = Vec::new();
        let mut batch = Vec::new();
        for ((from, to), link) in &mut self.links {
            link.deliver_due(self.now, &mut batch);
            for envelope in batch.drain(..) {
                delivered.push((*from, *to, envelope));
            }
        }
        delivered
    }

    /// Packets queued but not yet delivered
    pub fn in_flight(&self) -> usize {
        self.links.values().map(|link| link.queue.len()).sum()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn stats(&self, from: NodeId, to: NodeId) -> Option<LinkStats> {
        self.links.get(&(from, to)).map(|link| link.stats)
    }

    fn link(&mut self, from: NodeId, to: NodeId) -> &mut Link {
        if !self.links.contains_key(&(from, to)) {
            let seed = self.next_seed();
            self.links
                .insert((from, to), Link::new(self.default_config.clone(), seed));
        }
        self.links.get_mut(&(from, to)).expect("just inserted")
    }

    fn next_seed(&mut self) -> u64 {
        self.link_counter += 1;
        self.master_seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ self.link_counter
    }
}
