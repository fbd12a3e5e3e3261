//! Peer transport contract and an in-process realization

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use volta_core::{NodeId, VoltaError, VoltaResult};
use volta_wire::Envelope;

/// Best-effort delivery of typed envelopes to a named peer.
///
/// Delivery order between one (sender, receiver) pair is preserved;
/// nothing is guaranteed across pairs, and a send may fail or the
/// envelope may be dropped in flight. The algorithms tolerate both.
pub trait PeerTransport: Send + Sync {
    fn send(&self, to: NodeId, envelope: Envelope) -> VoltaResult<()>;
}

/// Envelope as delivered to a broker, with the sender identity the
/// transport layer vouches for
pub type Delivery = (NodeId, Envelope);

type Mailboxes = Arc<Mutex<HashMap<NodeId, mpsc::UnboundedSender<Delivery>>>>;

/// In-process transport: every registered broker gets an unbounded
/// mailbox, and sends are FIFO per pair by construction
#[derive(Clone, Default)]
pub struct ChannelTransport {
    mailboxes: Mailboxes,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the mailbox for a broker and return its receiving half
    pub fn register(&self, node: NodeId) -> mpsc::UnboundedReceiver<Delivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.mailboxes
            .lock()
            .expect("transport registry poisoned")
            .insert(node, tx);
        rx
    }

    /// A sending handle that attributes envelopes to `from`
    pub fn endpoint(&self, from: NodeId) -> Endpoint {
        Endpoint {
            from,
            mailboxes: Arc::clone(&self.mailboxes),
        }
    }
}

/// Per-broker sending half of a [`ChannelTransport`]
#[derive(Clone)]
pub struct Endpoint {
    from: NodeId,
    mailboxes: Mailboxes,
}

impl PeerTransport for Endpoint {
    fn send(&self, to: NodeId, envelope: Envelope) -> VoltaResult<()> {
        let mailboxes = self
            .mailboxes
            .lock()
            .expect("transport registry poisoned");
        let tx = mailboxes
            .get(&to)
            .ok_or_else(|| VoltaError::Transport(format!("unknown peer {to}")))?;
        tx.send((self.from, envelope))
            .map_err(|_| VoltaError::Transport(format!("mailbox for {to} closed")))
    }
}
