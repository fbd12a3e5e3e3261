//! The broker shell: one cooperative task per module
//!
//! Timer callbacks become `Tick` events on the same channel as peer
//! messages, so nothing inside a module ever runs concurrently with
//! anything else in that module. The clock ticker is the only
//! cancellable resource: stopping it pauses exchange rounds without
//! touching synchronizer state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use volta_core::{NodeId, SkewRegister, SystemClock, TimeDelta, VoltaResult};
use volta_dispatch::{DispatchAgent, DispatchConfig, Phase, Topology};
use volta_time::{ClockSynchronizer, EXCHANGE_INTERVAL};
use volta_wire::{Envelope, ModuleTag, Payload, DISPATCH_STEPS};

use crate::{Delivery, DeviceView, PeerTransport};

/// Everything a module task can be woken by
#[derive(Debug)]
pub enum Event {
    /// Envelope delivered from a peer
    Envelope { from: NodeId, envelope: Envelope },
    /// Group membership update
    PeerList(Vec<NodeId>),
    /// Periodic timer fired
    Tick,
    /// Shut the module down
    Stop,
}

/// Broker tunables
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Clock exchange period
    pub exchange_interval: Duration,
    /// Dispatch problem definition
    pub dispatch: DispatchConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            exchange_interval: EXCHANGE_INTERVAL,
            dispatch: DispatchConfig::baseline(),
        }
    }
}

/// Final dispatch result published when the iteration cap is reached
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchOutcome {
    pub set_points: [f64; DISPATCH_STEPS],
    pub cost: f64,
}

/// A running broker: router + clock module + dispatch module
pub struct Broker {
    id: NodeId,
    clock_tx: mpsc::UnboundedSender<Event>,
    dispatch_tx: mpsc::UnboundedSender<Event>,
    register: Arc<SkewRegister>,
    exchange_interval: Duration,
    ticker: Option<JoinHandle<()>>,
    router: JoinHandle<()>,
    clock_task: JoinHandle<()>,
    dispatch_task: JoinHandle<()>,
    outcome: watch::Receiver<Option<DispatchOutcome>>,
}

impl Broker {
    /// Spawn the module tasks for one broker process. The topology is
    /// parsed by the caller and read exactly once here.
    pub fn spawn(
        id: NodeId,
        transport: Arc<dyn PeerTransport>,
        inbox: mpsc::UnboundedReceiver<Delivery>,
        topology: &Topology,
        config: BrokerConfig,
        devices: Box<dyn DeviceView>,
    ) -> VoltaResult<Broker> {
        let register = Arc::new(SkewRegister::new());
        let sync = ClockSynchronizer::new(id, Arc::clone(&register), Arc::new(SystemClock));
        let agent = DispatchAgent::new(id, topology, &config.dispatch)?;

        let (clock_tx, clock_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = watch::channel(None);

        let clock_task = tokio::spawn(clock_loop(sync, Arc::clone(&transport), clock_rx));
        let dispatch_task = tokio::spawn(dispatch_loop(
            agent,
            Arc::clone(&transport),
            dispatch_rx,
            devices,
            outcome_tx,
        ));
        let router = tokio::spawn(route(inbox, clock_tx.clone(), dispatch_tx.clone()));

        Ok(Broker {
            id,
            clock_tx,
            dispatch_tx,
            register,
            exchange_interval: config.exchange_interval,
            ticker: None,
            router,
            clock_task,
            dispatch_task,
            outcome: outcome_rx,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Arm the periodic exchange timer. The first round fires one full
    /// interval from now.
    pub fn start_clock(&mut self) {
        self.stop_clock();
        let tx = self.clock_tx.clone();
        let interval = self.exchange_interval;
        self.ticker = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if tx.send(Event::Tick).is_err() {
                    break;
                }
            }
        }));
    }

    /// Cancel the exchange timer; synchronizer state is kept
    pub fn stop_clock(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    /// Push a membership update into both modules, as the group view
    /// would
    pub fn peer_list(&self, peers: Vec<NodeId>) {
        let _ = self.clock_tx.send(Event::PeerList(peers.clone()));
        let _ = self.dispatch_tx.send(Event::PeerList(peers));
    }

    /// Watch for the final dispatch schedule
    pub fn dispatch_outcome(&self) -> watch::Receiver<Option<DispatchOutcome>> {
        self.outcome.clone()
    }

    /// The currently published clock correction
    pub fn correction(&self) -> TimeDelta {
        self.register.load()
    }

    /// Stop every task and wait for the modules to wind down
    pub async fn shutdown(mut self) {
        self.stop_clock();
        let _ = self.clock_tx.send(Event::Stop);
        let _ = self.dispatch_tx.send(Event::Stop);
        self.router.abort();
        let _ = self.clock_task.await;
        let _ = self.dispatch_task.await;
    }
}

/// Forward deliveries to the owning module; membership fans out to both
async fn route(
    mut inbox: mpsc::UnboundedReceiver<Delivery>,
    clock_tx: mpsc::UnboundedSender<Event>,
    dispatch_tx: mpsc::UnboundedSender<Event>,
) {
    while let Some((from, envelope)) = inbox.recv().await {
        let delivered = match envelope.module {
            ModuleTag::Clock => clock_tx.send(Event::Envelope { from, envelope }).is_ok(),
            ModuleTag::Dispatch => dispatch_tx.send(Event::Envelope { from, envelope }).is_ok(),
            ModuleTag::Group => match &envelope.payload {
                Payload::PeerList(list) => {
                    clock_tx.send(Event::PeerList(list.peers.clone())).is_ok()
                        && dispatch_tx.send(Event::PeerList(list.peers.clone())).is_ok()
                }
                other => {
                    warn!(
                        kind = other.kind_name(),
                        "router dropping non-membership group payload"
                    );
                    true
                }
            },
        };
        if !delivered {
            break;
        }
    }
}

async fn clock_loop(
    mut sync: ClockSynchronizer,
    transport: Arc<dyn PeerTransport>,
    mut events: mpsc::UnboundedReceiver<Event>,
) {
    while let Some(event) = events.recv().await {
        match event {
            Event::Tick => {
                for (to, payload) in sync.exchange_round() {
                    send_or_log(&*transport, to, Envelope::clock(payload));
                }
            }
            Event::Envelope { from, envelope } => {
                if let Some((to, payload)) = sync.handle_incoming(from, &envelope.payload) {
                    send_or_log(&*transport, to, Envelope::clock(payload));
                }
            }
            Event::PeerList(peers) => sync.handle_peer_list(&peers),
            Event::Stop => break,
        }
    }
}

/// An iteration has no timeout of its own; a vanished neighbour stalls
/// the gossip forever. The watchdog only makes that visible.
const STALL_WARNING: Duration = Duration::from_secs(30);

async fn dispatch_loop(
    mut agent: DispatchAgent,
    transport: Arc<dyn PeerTransport>,
    mut events: mpsc::UnboundedReceiver<Event>,
    mut devices: Box<dyn DeviceView>,
    outcome_tx: watch::Sender<Option<DispatchOutcome>>,
) {
    let mut finished = false;
    loop {
        let event = if agent.phase() == Phase::Iterating {
            match tokio::time::timeout(STALL_WARNING, events.recv()).await {
                Ok(event) => event,
                Err(_) => {
                    warn!(
                        iteration = agent.iteration(),
                        pending = agent.pending_neighbours(),
                        "dispatch iteration stalled waiting for neighbour state"
                    );
                    continue;
                }
            }
        } else {
            events.recv().await
        };
        let Some(event) = event else {
            break;
        };
        let outgoing = match event {
            Event::Envelope { envelope, .. } => agent.handle_incoming(&envelope.payload),
            Event::PeerList(_) => agent.start(),
            Event::Tick => Vec::new(),
            Event::Stop => break,
        };
        for (to, payload) in outgoing {
            send_or_log(&*transport, to, Envelope::dispatch(payload));
        }
        if agent.phase() == Phase::Done && !finished {
            finished = true;
            let set_points = agent.set_points();
            devices.set("onOffSwitch", 1.0);
            devices.set("level", set_points[0]);
            let _ = outcome_tx.send(Some(DispatchOutcome {
                set_points,
                cost: agent.cost(),
            }));
        }
    }
}

fn send_or_log(transport: &dyn PeerTransport, to: NodeId, envelope: Envelope) {
    if let Err(err) = transport.send(to, envelope) {
        debug!(%to, %err, "send failed; continuing without the peer");
    }
}
