//! The dispatch agent: per-iteration gossip and the primal-dual update
//!
//! One agent runs per broker. Each iteration it broadcasts its imbalance
//! estimate and balance multiplier to every graph neighbour, waits until
//! all of them have answered for the same iteration, then runs one
//! primal-dual step: a device-specific set-point update, a consensus mix
//! of the gossiped estimates every fifth iteration, and a
//! dynamic-average innovation that folds the set-point movement back
//! into the imbalance estimate. The schedule is final when the iteration
//! cap is reached.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use volta_core::{NodeId, Symbol, VoltaError, VoltaResult};
use volta_wire::{DispatchState, Payload, DISPATCH_STEPS};

use crate::{DeviceRole, DispatchConfig, Topology};

/// Where the agent is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the first membership update
    Idle,
    /// Gossiping
    Iterating,
    /// Iteration cap reached; the schedule is final
    Done,
}

/// Per-node dispatch optimizer state machine
#[derive(Debug)]
pub struct DispatchAgent {
    symbol: Symbol,
    role: DeviceRole,
    neighbours: BTreeSet<Symbol>,
    bindings: BTreeMap<Symbol, NodeId>,

    eta: f64,
    rho: f64,
    delta_time: f64,
    consensus_period: u32,
    max_iterations: u32,
    w_self: f64,
    w_adj: f64,

    phase: Phase,
    iteration: u32,
    delta_p: [f64; DISPATCH_STEPS],
    lambda: [f64; DISPATCH_STEPS],
    /// Committed estimate from the previous iteration, for extrapolation
    prev_delta_p: [f64; DISPATCH_STEPS],
    adj_delta_p: [f64; DISPATCH_STEPS],
    adj_lambda: [f64; DISPATCH_STEPS],
    pending: usize,
    contributed: BTreeSet<Symbol>,
    /// States that arrived for an iteration we have not reached yet
    deferred: BTreeMap<u32, Vec<DispatchState>>,

    power: [f64; DISPATCH_STEPS],
    mu: [f64; DISPATCH_STEPS],
    xi: [f64; DISPATCH_STEPS],
    /// Storage envelope residual against the full-capacity bound
    charge_residual: [f64; DISPATCH_STEPS],
    /// Storage envelope residual against the stored-energy bound
    discharge_residual: [f64; DISPATCH_STEPS],
    cost: f64,
}

impl DispatchAgent {
    /// Build an agent for the broker owning `local`. The topology is
    /// read once, here; the agent never re-reads it.
    pub fn new(local: NodeId, topology: &Topology, config: &DispatchConfig) -> VoltaResult<Self> {
        let symbol = topology
            .symbol_of(local)
            .cloned()
            .ok_or_else(|| VoltaError::UnboundNode(local.to_string()))?;
        let neighbours = topology
            .neighbours(&symbol)
            .cloned()
            .unwrap_or_default();
        let role = config
            .devices
            .get(&symbol)
            .cloned()
            .unwrap_or(DeviceRole::Passive);
        let epsilon = topology.mixing_epsilon();
        let seed = role.seed();
        debug!(
            %symbol,
            neighbours = neighbours.len(),
            epsilon,
            "dispatch agent constructed"
        );
        Ok(DispatchAgent {
            symbol,
            role,
            pending: neighbours.len(),
            w_self: 1.0 - neighbours.len() as f64 * epsilon,
            w_adj: epsilon,
            neighbours,
            bindings: topology.bindings().clone(),
            eta: config.eta,
            rho: config.rho,
            delta_time: config.delta_time,
            consensus_period: config.consensus_period,
            max_iterations: config.max_iterations,
            phase: Phase::Idle,
            iteration: 0,
            delta_p: seed,
            lambda: [0.0; DISPATCH_STEPS],
            prev_delta_p: seed,
            adj_delta_p: [0.0; DISPATCH_STEPS],
            adj_lambda: [0.0; DISPATCH_STEPS],
            contributed: BTreeSet::new(),
            deferred: BTreeMap::new(),
            power: [0.0; DISPATCH_STEPS],
            mu: [0.0; DISPATCH_STEPS],
            xi: [0.0; DISPATCH_STEPS],
            charge_residual: [0.0; DISPATCH_STEPS],
            discharge_residual: [0.0; DISPATCH_STEPS],
            cost: 0.0,
        })
    }

    /// Route an incoming dispatch-plane payload
    pub fn handle_incoming(&mut self, payload: &Payload) -> Vec<(NodeId, Payload)> {
        match payload {
            Payload::PeerList(_) => self.start(),
            Payload::DispatchState(msg) => self.handle_state(msg),
            other => {
                warn!(
                    kind = other.kind_name(),
                    "dispatch module dropping unexpected payload"
                );
                Vec::new()
            }
        }
    }

    /// Begin gossiping. Triggered by the first membership update after
    /// construction; later updates are no-ops.
    pub fn start(&mut self) -> Vec<(NodeId, Payload)> {
        if self.phase != Phase::Idle {
            return Vec::new();
        }
        self.phase = Phase::Iterating;
        debug!(symbol = %self.symbol, "dispatch iteration starting");
        let mut out = self.broadcast();
        out.extend(self.drain());
        out
    }

    /// Absorb one neighbour state message
    pub fn handle_state(&mut self, msg: &DispatchState) -> Vec<(NodeId, Payload)> {
        if self.phase != Phase::Iterating {
            return Vec::new();
        }
        match msg.iteration.cmp(&self.iteration) {
            // A neighbour that finished this iteration before us may
            // already be one ahead; hold its state until we get there.
            Ordering::Greater => {
                self.deferred
                    .entry(msg.iteration)
                    .or_default()
                    .push(msg.clone());
                return Vec::new();
            }
            Ordering::Less => return Vec::new(),
            Ordering::Equal => {
                self.absorb(msg);
            }
        }
        self.drain()
    }

    /// Count and accumulate a state message for the current iteration.
    /// Returns false for duplicates and symbols outside the neighbour set.
    fn absorb(&mut self, msg: &DispatchState) -> bool {
        if !self.neighbours.contains(&msg.symbol) {
            return false;
        }
        if !self.contributed.insert(msg.symbol.clone()) {
            return false;
        }
        self.pending -= 1;
        for step in 0..DISPATCH_STEPS {
            self.adj_delta_p[step] += msg.delta_p[step];
            self.adj_lambda[step] += msg.lambda[step];
        }
        true
    }

    /// Run update steps for as long as the current iteration is complete
    fn drain(&mut self) -> Vec<(NodeId, Payload)> {
        let mut out = Vec::new();
        while self.phase == Phase::Iterating && self.pending == 0 {
            out.extend(self.advance());
            if let Some(queued) = self.deferred.remove(&self.iteration) {
                for msg in queued {
                    self.absorb(&msg);
                }
            }
        }
        out
    }

    /// One complete update step, then move to the next iteration
    fn advance(&mut self) -> Vec<(NodeId, Payload)> {
        let moved = self.primal_update();
        self.consensus_update(moved);
        self.adj_delta_p = [0.0; DISPATCH_STEPS];
        self.adj_lambda = [0.0; DISPATCH_STEPS];
        self.contributed.clear();
        self.pending = self.neighbours.len();
        self.iteration += 1;
        if self.iteration < self.max_iterations {
            self.broadcast()
        } else {
            self.phase = Phase::Done;
            match &self.role {
                DeviceRole::Grid { .. } => info!(
                    symbol = %self.symbol,
                    power = ?self.power,
                    cost = self.cost,
                    "grid dispatch schedule final"
                ),
                DeviceRole::Storage { .. } => info!(
                    symbol = %self.symbol,
                    power = ?self.power,
                    "storage dispatch schedule final"
                ),
                _ => info!(symbol = %self.symbol, "dispatch iteration cap reached"),
            }
            Vec::new()
        }
    }

    /// Device-specific set-point update. Returns the per-step set-point
    /// movement, which the consensus step folds back into the imbalance
    /// estimate.
    fn primal_update(&mut self) -> [f64; DISPATCH_STEPS] {
        let mut moved = [0.0; DISPATCH_STEPS];
        match self.role.clone() {
            DeviceRole::Grid { p_min, p_max, price } => {
                let mut cost = 0.0;
                for step in 0..DISPATCH_STEPS {
                    let target = self.power[step]
                        - self.eta
                            * (price[step] - self.lambda[step] - self.rho * self.delta_p[step]);
                    cost += price[step] * self.power[step] * self.delta_time;
                    let next = target.clamp(p_min, p_max);
                    moved[step] = next - self.power[step];
                    self.power[step] = next;
                }
                self.cost = cost;
            }
            DeviceRole::Storage {
                p_min,
                p_max,
                e_init,
                e_full,
            } => {
                // Cumulative-forward positive parts: a violation at step t
                // weighs on every step up to and including t.
                let mut charge_pressure = [0.0; DISPATCH_STEPS];
                let mut discharge_pressure = [0.0; DISPATCH_STEPS];
                for step in 0..DISPATCH_STEPS {
                    for later in step..DISPATCH_STEPS {
                        charge_pressure[step] += self.charge_residual[later].max(0.0);
                        discharge_pressure[step] += self.discharge_residual[later].max(0.0);
                    }
                }
                // Upper-triangular dual sums: step t only feels the
                // multipliers of steps >= t.
                let mut sum_mu: f64 = self.mu.iter().sum();
                let mut sum_xi: f64 = self.xi.iter().sum();
                for step in 0..DISPATCH_STEPS {
                    let drive = -self.lambda[step] - sum_mu * self.delta_time
                        + sum_xi * self.delta_time
                        - self.rho * self.delta_p[step]
                        - self.rho * charge_pressure[step]
                        + self.rho * discharge_pressure[step];
                    sum_mu -= self.mu[step];
                    sum_xi -= self.xi[step];
                    let next = (self.power[step] - self.eta * drive).clamp(p_min, p_max);
                    moved[step] = next - self.power[step];
                    self.power[step] = next;
                }
                let mut drawn = 0.0;
                for step in 0..DISPATCH_STEPS {
                    drawn += self.power[step];
                    self.charge_residual[step] =
                        e_init[step] - e_full[step] - drawn * self.delta_time;
                    self.discharge_residual[step] = drawn * self.delta_time - e_init[step];
                }
                for step in 0..DISPATCH_STEPS {
                    self.mu[step] =
                        (self.mu[step] + self.eta * self.charge_residual[step]).max(0.0);
                    self.xi[step] =
                        (self.xi[step] + self.eta * self.discharge_residual[step]).max(0.0);
                }
            }
            // Loads and renewables hold their fixed profiles.
            _ => {}
        }
        moved
    }

    /// Mix the gossiped estimates and advance the multiplier.
    ///
    /// Neighbour estimates enter only every `consensus_period`-th
    /// iteration; in between, the estimate extrapolates against the
    /// previous commit and the multiplier integrates the local estimate.
    /// The set-point movement is subtracted at the end so the summed
    /// estimate across the graph keeps tracking the true imbalance.
    fn consensus_update(&mut self, moved: [f64; DISPATCH_STEPS]) {
        let mut next_delta_p = [0.0; DISPATCH_STEPS];
        let mut next_lambda = [0.0; DISPATCH_STEPS];
        if self.iteration % self.consensus_period == 0 {
            for step in 0..DISPATCH_STEPS {
                next_delta_p[step] = self.w_self * self.delta_p[step]
                    + self.w_adj * self.adj_delta_p[step]
                    + self.delta_p[step]
                    - self.prev_delta_p[step];
                next_lambda[step] = self.w_self * self.lambda[step]
                    + self.w_adj * self.adj_lambda[step]
                    + self.eta * self.delta_p[step];
            }
        } else {
            for step in 0..DISPATCH_STEPS {
                next_delta_p[step] = 2.0 * self.delta_p[step] - self.prev_delta_p[step];
                next_lambda[step] = self.lambda[step] + self.eta * self.delta_p[step];
            }
        }
        for step in 0..DISPATCH_STEPS {
            next_delta_p[step] -= moved[step];
        }
        self.prev_delta_p = next_delta_p;
        self.delta_p = next_delta_p;
        self.lambda = next_lambda;
    }

    /// Current state, addressed to every bound neighbour
    fn broadcast(&self) -> Vec<(NodeId, Payload)> {
        let state = DispatchState {
            iteration: self.iteration,
            symbol: self.symbol.clone(),
            delta_p: self.delta_p,
            lambda: self.lambda,
        };
        self.neighbours
            .iter()
            .filter_map(|symbol| {
                self.bindings
                    .get(symbol)
                    .map(|node| (*node, Payload::DispatchState(state.clone())))
            })
            .collect()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Remaining neighbour messages expected for the current iteration
    pub fn pending_neighbours(&self) -> usize {
        self.pending
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// The power schedule, one set-point per dispatch step
    pub fn set_points(&self) -> [f64; DISPATCH_STEPS] {
        self.power
    }

    /// Last computed feeder cost; zero for non-grid devices
    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn delta_p(&self) -> [f64; DISPATCH_STEPS] {
        self.delta_p
    }

    pub fn lambda(&self) -> [f64; DISPATCH_STEPS] {
        self.lambda
    }

    /// Lower-envelope multipliers; zero outside storage devices
    pub fn mu(&self) -> [f64; DISPATCH_STEPS] {
        self.mu
    }

    /// Upper-envelope multipliers; zero outside storage devices
    pub fn xi(&self) -> [f64; DISPATCH_STEPS] {
        self.xi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PRICE_PROFILE;

    fn nid(n: u8) -> NodeId {
        NodeId::from_bytes([n; 16])
    }

    fn topology_for(symbols: &[&str], edges: &[(&str, &str)]) -> Topology {
        let mut text = String::new();
        for (a, b) in edges {
            text.push_str(&format!("edge {a} {b}\n"));
        }
        for (index, symbol) in symbols.iter().enumerate() {
            let id = nid(index as u8 + 1);
            text.push_str(&format!("sst {symbol} {id}\n"));
        }
        Topology::parse(&text).unwrap()
    }

    fn state(symbol: &str, iteration: u32) -> DispatchState {
        DispatchState {
            iteration,
            symbol: Symbol::new(symbol),
            delta_p: [1.0, 2.0, 3.0],
            lambda: [0.1, 0.2, 0.3],
        }
    }

    #[test]
    fn test_unbound_node_is_fatal() {
        let topology = topology_for(&["1"], &[]);
        let err = DispatchAgent::new(nid(99), &topology, &DispatchConfig::baseline()).unwrap_err();
        assert!(matches!(err, VoltaError::UnboundNode(_)));
    }

    #[test]
    fn test_mixing_weights_from_max_degree() {
        // 1-3 line: both endpoints have degree one, so epsilon is 1/2.
        let topology = topology_for(&["1", "3"], &[("1", "3")]);
        let agent = DispatchAgent::new(nid(1), &topology, &DispatchConfig::baseline()).unwrap();
        assert!((agent.w_adj - 0.5).abs() < 1e-12);
        assert!((agent.w_self - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_duplicate_neighbour_message_dropped() {
        let topology = topology_for(&["4", "7", "10"], &[("4", "7"), ("4", "10")]);
        let config = DispatchConfig::baseline();
        let mut agent = DispatchAgent::new(nid(1), &topology, &config).unwrap();
        agent.start();
        assert_eq!(agent.pending_neighbours(), 2);

        agent.handle_state(&state("7", 0));
        assert_eq!(agent.pending_neighbours(), 1);
        agent.handle_state(&state("7", 0));
        assert_eq!(agent.pending_neighbours(), 1);
        assert_eq!(agent.iteration(), 0);
    }

    #[test]
    fn test_stale_message_dropped() {
        let topology = topology_for(&["4", "7"], &[("4", "7")]);
        let mut agent = DispatchAgent::new(nid(1), &topology, &DispatchConfig::baseline()).unwrap();
        agent.start();

        let out = agent.handle_state(&state("7", 0));
        assert_eq!(agent.iteration(), 1);
        assert_eq!(agent.pending_neighbours(), 1);
        assert!(!out.is_empty());

        // The same message again is now behind us.
        agent.handle_state(&state("7", 0));
        assert_eq!(agent.iteration(), 1);
        assert_eq!(agent.pending_neighbours(), 1);
    }

    #[test]
    fn test_message_outside_neighbour_set_dropped() {
        let topology = topology_for(&["4", "7"], &[("4", "7")]);
        let mut agent = DispatchAgent::new(nid(1), &topology, &DispatchConfig::baseline()).unwrap();
        agent.start();
        agent.handle_state(&state("99", 0));
        assert_eq!(agent.pending_neighbours(), 1);
        assert_eq!(agent.iteration(), 0);
    }

    #[test]
    fn test_future_iteration_buffered_and_replayed() {
        let topology = topology_for(&["4", "7", "10"], &[("4", "7"), ("4", "10")]);
        let mut agent = DispatchAgent::new(nid(1), &topology, &DispatchConfig::baseline()).unwrap();
        agent.start();

        agent.handle_state(&state("7", 0));
        // Neighbour 7 races ahead; its next state must not be lost.
        agent.handle_state(&state("7", 1));
        assert_eq!(agent.iteration(), 0);

        agent.handle_state(&state("10", 0));
        assert_eq!(agent.iteration(), 1);
        // The buffered state for iteration 1 was replayed on arrival.
        assert_eq!(agent.pending_neighbours(), 1);
        assert!(agent.contributed.contains(&Symbol::new("7")));
    }

    #[test]
    fn test_messages_ignored_before_start_and_after_done() {
        let topology = topology_for(&["4", "7"], &[("4", "7")]);
        let config = DispatchConfig::baseline().with_max_iterations(1);
        let mut agent = DispatchAgent::new(nid(1), &topology, &config).unwrap();

        agent.handle_state(&state("7", 0));
        assert_eq!(agent.pending_neighbours(), 1);

        agent.start();
        agent.handle_state(&state("7", 0));
        assert_eq!(agent.phase(), Phase::Done);

        let out = agent.handle_state(&state("7", 1));
        assert!(out.is_empty());
    }

    #[test]
    fn test_start_is_idempotent() {
        let topology = topology_for(&["4", "7"], &[("4", "7")]);
        let mut agent = DispatchAgent::new(nid(1), &topology, &DispatchConfig::baseline()).unwrap();
        let first = agent.start();
        assert_eq!(first.len(), 1);
        let second = agent.start();
        assert!(second.is_empty());
    }

    #[test]
    fn test_grid_primal_update_matches_hand_computation() {
        let topology = topology_for(&["1", "3"], &[("1", "3")]);
        let mut agent = DispatchAgent::new(nid(1), &topology, &DispatchConfig::baseline()).unwrap();
        assert_eq!(agent.role, DeviceRole::grid());

        agent.power = [2.0, 19.9, 0.1];
        agent.lambda = [6.0, 10.0, 2.0];
        agent.delta_p = [1.0, 2.0, -1.0];
        let moved = agent.primal_update();

        let expected = [3.115, 18.6005, 0.0];
        for step in 0..DISPATCH_STEPS {
            assert!((agent.power[step] - expected[step]).abs() < 1e-9);
        }
        assert!((moved[2] - -0.1).abs() < 1e-9);
        assert!((agent.cost - 4837.8).abs() < 1e-9);
    }

    #[test]
    fn test_grid_set_points_saturate_at_bounds() {
        let topology = topology_for(&["1", "3"], &[("1", "3")]);
        let mut agent = DispatchAgent::new(nid(1), &topology, &DispatchConfig::baseline()).unwrap();

        agent.lambda = [1000.0; DISPATCH_STEPS];
        agent.primal_update();
        assert_eq!(agent.power, [20.0; DISPATCH_STEPS]);

        agent.lambda = [-1000.0; DISPATCH_STEPS];
        agent.primal_update();
        assert_eq!(agent.power, [0.0; DISPATCH_STEPS]);
    }

    #[test]
    fn test_storage_primal_update_matches_hand_computation() {
        let topology = topology_for(&["4", "7"], &[("4", "7")]);
        let config = DispatchConfig::bare()
            .with_device("4", DeviceRole::storage([1.0; 3], [5.0; 3]))
            .with_device("7", DeviceRole::Passive);
        let mut agent = DispatchAgent::new(nid(1), &topology, &config).unwrap();

        agent.power = [1.0, -1.0, 2.0];
        agent.lambda = [2.0, 1.0, 0.0];
        agent.delta_p = [1.0, -1.0, 0.5];
        agent.mu = [0.1, 0.2, 0.3];
        agent.xi = [0.05, 0.0, 0.15];
        agent.charge_residual = [0.5, -1.0, 2.0];
        agent.discharge_residual = [-0.2, 0.3, 0.1];
        agent.primal_update();

        let expected_power = [5.0, 2.575, 4.925];
        let expected_mu = [0.0, 0.0, 0.0];
        let expected_xi = [37.05, 56.3125, 93.4];
        let expected_charge = [-79.0, -117.625, -191.5];
        let expected_discharge = [74.0, 112.625, 186.5];
        for step in 0..DISPATCH_STEPS {
            assert!((agent.power[step] - expected_power[step]).abs() < 1e-9);
            assert!((agent.mu[step] - expected_mu[step]).abs() < 1e-9);
            assert!((agent.xi[step] - expected_xi[step]).abs() < 1e-9);
            assert!((agent.charge_residual[step] - expected_charge[step]).abs() < 1e-9);
            assert!((agent.discharge_residual[step] - expected_discharge[step]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_consensus_update_mixes_on_period() {
        let topology = topology_for(&["1", "3"], &[("1", "3")]);
        let mut agent = DispatchAgent::new(nid(1), &topology, &DispatchConfig::baseline()).unwrap();

        // Iteration 0 is a consensus iteration.
        agent.delta_p = [1.0, 2.0, 3.0];
        agent.prev_delta_p = [1.0, 2.0, 3.0];
        agent.lambda = [1.0, 1.0, 1.0];
        agent.adj_delta_p = [4.0, 5.0, 6.0];
        agent.adj_lambda = [0.5, 0.5, 0.5];
        agent.consensus_update([0.0; DISPATCH_STEPS]);

        let expected_dp = [2.5, 3.5, 4.5];
        let expected_lambda = [1.25, 1.75, 2.25];
        for step in 0..DISPATCH_STEPS {
            assert!((agent.delta_p[step] - expected_dp[step]).abs() < 1e-12);
            assert!((agent.lambda[step] - expected_lambda[step]).abs() < 1e-12);
        }

        // Iteration 1 extrapolates without neighbour input.
        agent.iteration = 1;
        let dp = agent.delta_p;
        let prev = agent.prev_delta_p;
        let lambda = agent.lambda;
        agent.adj_delta_p = [9.0, 9.0, 9.0];
        agent.consensus_update([0.0; DISPATCH_STEPS]);
        for step in 0..DISPATCH_STEPS {
            assert!(
                (agent.delta_p[step] - (2.0 * dp[step] - prev[step])).abs() < 1e-12
            );
            assert!((agent.lambda[step] - (lambda[step] + 0.5 * dp[step])).abs() < 1e-12);
        }
    }

    #[test]
    fn test_tracking_innovation_subtracts_movement() {
        let topology = topology_for(&["1", "3"], &[("1", "3")]);
        let mut agent = DispatchAgent::new(nid(1), &topology, &DispatchConfig::baseline()).unwrap();
        agent.iteration = 1;
        agent.delta_p = [1.0; DISPATCH_STEPS];
        agent.prev_delta_p = [1.0; DISPATCH_STEPS];
        agent.consensus_update([0.25, -0.5, 0.0]);
        assert!((agent.delta_p[0] - 0.75).abs() < 1e-12);
        assert!((agent.delta_p[1] - 1.5).abs() < 1e-12);
        assert!((agent.delta_p[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_lone_storage_runs_to_cap_with_inactive_envelope() {
        // A storage bank with no neighbours and no balance pressure has
        // nothing to do: the schedule stays at zero and both envelope
        // multipliers never activate.
        let topology = topology_for(&["4"], &[]);
        let config = DispatchConfig::bare()
            .with_device("4", DeviceRole::storage([1.0, 1.5, 0.5], [5.0, 10.0, 5.0]));
        let mut agent = DispatchAgent::new(nid(1), &topology, &config).unwrap();

        let out = agent.start();
        assert!(out.is_empty());
        assert_eq!(agent.phase(), Phase::Done);
        assert_eq!(agent.iteration(), config.max_iterations);
        assert_eq!(agent.set_points(), [0.0; DISPATCH_STEPS]);
        assert_eq!(agent.mu(), [0.0; DISPATCH_STEPS]);
        assert_eq!(agent.xi(), [0.0; DISPATCH_STEPS]);
    }

    #[test]
    fn test_passive_symbol_without_role() {
        let topology = topology_for(&["2", "4"], &[("2", "4")]);
        let config = DispatchConfig::bare()
            .with_device("4", DeviceRole::storage([1.0; 3], [5.0; 3]));
        let agent = DispatchAgent::new(nid(1), &topology, &config).unwrap();
        assert_eq!(agent.role, DeviceRole::Passive);
        assert_eq!(agent.delta_p(), [0.0; DISPATCH_STEPS]);
    }

    #[test]
    fn test_broadcast_addresses_bound_neighbours() {
        let topology = topology_for(&["1", "3", "4"], &[("1", "3"), ("1", "4")]);
        let mut agent = DispatchAgent::new(nid(1), &topology, &DispatchConfig::baseline()).unwrap();
        let out = agent.start();
        assert_eq!(out.len(), 2);
        let targets: Vec<NodeId> = out.iter().map(|(to, _)| *to).collect();
        assert!(targets.contains(&nid(2)));
        assert!(targets.contains(&nid(3)));
        for (_, payload) in &out {
            let Payload::DispatchState(msg) = payload else {
                panic!("expected dispatch state");
            };
            assert_eq!(msg.iteration, 0);
            assert_eq!(msg.symbol, Symbol::new("1"));
        }
    }

    #[test]
    fn test_grid_price_profile_is_baseline() {
        let DeviceRole::Grid { price, .. } = DeviceRole::grid() else {
            panic!("expected grid role");
        };
        assert_eq!(price, PRICE_PROFILE);
    }
}
