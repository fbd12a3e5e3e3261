//! Whole-cluster scenario drivers
//!
//! These helpers run every broker of a topology in one process, either
//! with direct in-order delivery (dispatch convergence runs) or across
//! the [`NetworkSimulator`](crate::NetworkSimulator) with manual clocks
//! (synchronizer runs).

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use volta_core::{ClockSource, ManualClock, NodeId, SkewRegister, Symbol, TimeDelta, WallTime};
use volta_dispatch::{DispatchAgent, DispatchConfig, Topology};
use volta_time::ClockSynchronizer;
use volta_wire::{Envelope, Payload};

use crate::NetworkSimulator;

/// Drive every agent bound in the topology to its iteration cap with
/// direct in-order delivery; returns the finished agents by symbol
pub fn run_dispatch_cluster(
    topology: &Topology,
    config: &DispatchConfig,
) -> BTreeMap<Symbol, DispatchAgent> {
    let mut agents: BTreeMap<NodeId, DispatchAgent> = topology
        .bindings()
        .values()
        .map(|node| {
            let agent = DispatchAgent::new(*node, topology, config).expect("bound node");
            (*node, agent)
        })
        .collect();

    let mut queue: VecDeque<(NodeId, Payload)> = VecDeque::new();
    for agent in agents.values_mut() {
        queue.extend(agent.start());
    }
    while let Some((to, payload)) = queue.pop_front() {
        let Payload::DispatchState(msg) = &payload else {
            continue;
        };
        if let Some(agent) = agents.get_mut(&to) {
            queue.extend(agent.handle_state(msg));
        }
    }

    agents
        .into_values()
        .map(|agent| (agent.symbol().clone(), agent))
        .collect()
}

/// One synchronizer with its own manual clock and skew register
pub struct ClockNode {
    pub id: NodeId,
    pub sync: ClockSynchronizer,
    pub clock: Arc<ManualClock>,
}

impl ClockNode {
    pub fn new(id: NodeId, start: WallTime) -> Self {
        let clock = Arc::new(ManualClock::new(start));
        let sync = ClockSynchronizer::new(
            id,
            Arc::new(SkewRegister::new()),
            Arc::clone(&clock) as Arc<dyn ClockSource>,
        );
        ClockNode { id, sync, clock }
    }
}

/// Start one exchange round on every node, then settle all traffic
pub fn run_clock_round(
    sim: &mut NetworkSimulator,
    nodes: &mut BTreeMap<NodeId, ClockNode>,
    step: Duration,
) {
    let mut outgoing = Vec::new();
    for (id, node) in nodes.iter_mut() {
        for (to, payload) in node.sync.exchange_round() {
            outgoing.push((*id, to, Envelope::clock(payload)));
        }
    }
    for (from, to, envelope) in outgoing {
        sim.send(from, to, envelope);
    }
    settle_clock_traffic(sim, nodes, step);
}

/// Tick the simulator until nothing is in flight, advancing every
/// manual clock in lockstep with simulated time
pub fn settle_clock_traffic(
    sim: &mut NetworkSimulator,
    nodes: &mut BTreeMap<NodeId, ClockNode>,
    step: Duration,
) {
    loop {
        let deliveries = sim.tick(step);
        let advance = TimeDelta::from_micros(step.as_micros() as i64);
        for node in nodes.values() {
            node.clock.advance(advance);
        }
        let mut responses = Vec::new();
        for (from, to, envelope) in deliveries {
            let Some(node) = nodes.get_mut(&to) else {
                continue;
            };
            if let Some((reply_to, payload)) = node.sync.handle_incoming(from, &envelope.payload) {
                responses.push((to, reply_to, Envelope::clock(payload)));
            }
        }
        for (from, to, envelope) in responses {
            sim.send(from, to, envelope);
        }
        if sim.in_flight() == 0 {
            break;
        }
    }
}

/// Advance every manual clock through a quiet period between rounds
pub fn quiet_period(nodes: &mut BTreeMap<NodeId, ClockNode>, period: Duration) {
    let advance = TimeDelta::from_micros(period.as_micros() as i64);
    for node in nodes.values() {
        node.clock.advance(advance);
    }
}
