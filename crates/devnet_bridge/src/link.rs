//! Links: the two ends of an envelope channel between contexts.

use tokio::sync::mpsc;
use tracing::debug;

use crate::message::Envelope;

/// Sending half of a link. Cheap to clone.
///
/// Posting never blocks and never fails observably: if the peer is gone the
/// envelope is dropped, and the waiting side finds out through its timeout.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Outbox {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { tx }
    }

    /// Post an envelope to the peer context.
    pub fn post(&self, envelope: Envelope) {
        let kind = envelope.kind;
        if self.tx.send(envelope).is_err() {
            debug!(%kind, "peer link closed, envelope dropped");
        }
    }

    /// Whether the receiving side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One end of a bidirectional envelope channel.
#[derive(Debug)]
pub struct Link {
    /// Envelopes posted here arrive at the peer's inbox.
    pub outbox: Outbox,
    /// Envelopes posted by the peer.
    pub inbox: mpsc::UnboundedReceiver<Envelope>,
}

impl Link {
    /// Assemble a link from raw channel halves.
    pub fn from_parts(
        tx: mpsc::UnboundedSender<Envelope>,
        inbox: mpsc::UnboundedReceiver<Envelope>,
    ) -> Self {
        Self {
            outbox: Outbox::new(tx),
            inbox,
        }
    }
}

/// Create two connected in-process link ends.
pub fn link_pair() -> (Link, Link) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (Link::from_parts(a_tx, b_rx), Link::from_parts(b_tx, a_rx))
}
