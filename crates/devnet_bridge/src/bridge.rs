//! MessageBridge: correlates replies from the peer context with the waiters
//! that are expecting them.
//!
//! A waiter is registered *before* its request is sent and is keyed by
//! [`MessageKind`], with at most one live waiter per kind. Waiters created by
//! [`MessageBridge::first_of_correlated`] additionally filter on the
//! correlation token, which is bound atomically when the matching
//! acknowledgement is delivered.
//!
//! Every wait resolves to exactly one [`Outcome`]. Dropping a [`Waiter`] or
//! [`Race`] retires its registrations, so a late envelope can never resolve an
//! unrelated future of the same kind.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::select_all;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::BridgeError;
use crate::link::{Link, Outbox};
use crate::message::{Envelope, MessageKind};

/// Result of waiting on the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A success-tagged envelope arrived; carries its payload.
    Resolved(serde_json::Value),
    /// A failure-tagged envelope won a race; carries its payload.
    Failed(serde_json::Value),
    /// Nothing matching arrived before the deadline.
    TimedOut,
}

/// One contender in a [`Race`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Success(MessageKind),
    Failure(MessageKind),
}

impl Expect {
    pub fn success(kind: MessageKind) -> Self {
        Self::Success(kind)
    }

    pub fn failure(kind: MessageKind) -> Self {
        Self::Failure(kind)
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Success(kind) | Self::Failure(kind) => *kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type WaiterKey = (MessageKind, u64);

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenFilter {
    /// Accept any envelope of the kind.
    Any,
    /// Correlated, token not known yet: accept nothing.
    Pending,
    /// Accept only envelopes carrying this token.
    Bound(String),
}

#[derive(Debug)]
struct PendingWaiter {
    id: u64,
    filter: TokenFilter,
    tx: oneshot::Sender<Envelope>,
    /// Retired together with this waiter when it resolves.
    siblings: Vec<WaiterKey>,
    /// Receive this waiter's correlation token when it resolves.
    binds: Vec<WaiterKey>,
}

impl PendingWaiter {
    fn accepts(&self, envelope: &Envelope) -> bool {
        match &self.filter {
            TokenFilter::Any => true,
            TokenFilter::Pending => false,
            TokenFilter::Bound(token) => envelope.correlation_token() == Some(token.as_str()),
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    next_id: u64,
    waiters: HashMap<MessageKind, PendingWaiter>,
}

impl Registry {
    fn ensure_free(&self, kinds: &[MessageKind]) -> Result<(), BridgeError> {
        for (i, kind) in kinds.iter().enumerate() {
            if self.waiters.contains_key(kind) || kinds[..i].contains(kind) {
                return Err(BridgeError::WaiterBusy(*kind));
            }
        }
        Ok(())
    }

    fn insert(
        &mut self,
        kind: MessageKind,
        filter: TokenFilter,
        binds: Vec<WaiterKey>,
    ) -> (u64, oneshot::Receiver<Envelope>) {
        self.next_id += 1;
        let id = self.next_id;
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(
            kind,
            PendingWaiter {
                id,
                filter,
                tx,
                siblings: Vec::new(),
                binds,
            },
        );
        trace!(%kind, id, "waiter registered");
        (id, rx)
    }

    fn retire(&mut self, kind: MessageKind, id: u64) {
        if self.waiters.get(&kind).is_some_and(|w| w.id == id) {
            self.waiters.remove(&kind);
            trace!(%kind, id, "waiter retired");
        }
    }

    /// Route an envelope to its waiter. Returns `false` if it was discarded.
    fn deliver(&mut self, envelope: Envelope) -> bool {
        let accepted = self
            .waiters
            .get(&envelope.kind)
            .is_some_and(|w| w.accepts(&envelope));
        if !accepted {
            return false;
        }
        let Some(waiter) = self.waiters.remove(&envelope.kind) else {
            return false;
        };

        for (kind, id) in &waiter.siblings {
            self.retire(*kind, *id);
        }
        if let Some(token) = envelope.correlation_token() {
            for (kind, id) in &waiter.binds {
                if let Some(bound) = self.waiters.get_mut(kind) {
                    if bound.id == *id {
                        bound.filter = TokenFilter::Bound(token.to_string());
                    }
                }
            }
        }

        waiter.tx.send(envelope).is_ok()
    }
}

// ---------------------------------------------------------------------------
// MessageBridge
// ---------------------------------------------------------------------------

/// Requesting side of the bridge. Cheap to clone; clones share one registry.
#[derive(Debug, Clone)]
pub struct MessageBridge {
    outbox: Outbox,
    registry: Arc<Mutex<Registry>>,
}

impl MessageBridge {
    /// Create a bridge that posts through `outbox`. Inbound envelopes must be
    /// fed to [`deliver`](Self::deliver) by the caller.
    pub fn new(outbox: Outbox) -> Self {
        Self {
            outbox,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// Create a bridge over `link` and spawn the task that pumps its inbox
    /// into the registry.
    pub fn attach(link: Link) -> Self {
        let Link { outbox, mut inbox } = link;
        let bridge = Self::new(outbox);
        let pump = bridge.clone();
        tokio::spawn(async move {
            while let Some(envelope) = inbox.recv().await {
                pump.deliver(envelope);
            }
            debug!("bridge inbox closed");
        });
        bridge
    }

    /// Post an envelope to the peer context. Never blocks, never fails.
    pub fn send(&self, envelope: Envelope) {
        debug!(kind = %envelope.kind, id = %envelope.id, "sending envelope");
        self.outbox.post(envelope);
    }

    /// Hand an inbound envelope to the matching waiter. Envelopes with no
    /// live waiter are discarded; returns whether it was consumed.
    pub fn deliver(&self, envelope: Envelope) -> bool {
        let kind = envelope.kind;
        let id = envelope.id.clone();
        let consumed = self.registry.lock().deliver(envelope);
        if consumed {
            debug!(%kind, %id, "envelope delivered");
        } else {
            debug!(%kind, %id, "no waiter for envelope, discarded");
        }
        consumed
    }

    /// Register a waiter for the next envelope of `kind`.
    pub fn expect(&self, kind: MessageKind) -> Result<Waiter, BridgeError> {
        let mut registry = self.registry.lock();
        registry.ensure_free(&[kind])?;
        let (id, rx) = registry.insert(kind, TokenFilter::Any, Vec::new());
        Ok(Waiter {
            kind,
            id,
            rx: Some(rx),
            registry: Arc::clone(&self.registry),
        })
    }

    /// Register a waiter for `kind` and wait on it.
    ///
    /// Only useful when the request has already been sent by some other
    /// means; otherwise prefer [`expect`](Self::expect) before sending.
    pub async fn await_reply(
        &self,
        kind: MessageKind,
        timeout: Duration,
    ) -> Result<Outcome, BridgeError> {
        Ok(self.expect(kind)?.wait(timeout).await)
    }

    /// Register every contender of a race. The first matching envelope to
    /// arrive wins and retires the rest.
    pub fn first_of(&self, expects: &[Expect]) -> Result<Race, BridgeError> {
        self.register_race(expects, TokenFilter::Any)
    }

    /// Like [`first_of`](Self::first_of), but the contenders accept nothing
    /// until a token is bound through [`expect_binding`](Self::expect_binding).
    pub fn first_of_correlated(&self, expects: &[Expect]) -> Result<Race, BridgeError> {
        self.register_race(expects, TokenFilter::Pending)
    }

    /// Register an acknowledgement waiter whose correlation token is bound to
    /// every contender of `race` at the moment it is delivered.
    pub fn expect_binding(&self, kind: MessageKind, race: &Race) -> Result<Waiter, BridgeError> {
        let mut registry = self.registry.lock();
        registry.ensure_free(&[kind])?;
        let binds = race
            .entries
            .iter()
            .map(|(expect, id)| (expect.kind(), *id))
            .collect();
        let (id, rx) = registry.insert(kind, TokenFilter::Any, binds);
        Ok(Waiter {
            kind,
            id,
            rx: Some(rx),
            registry: Arc::clone(&self.registry),
        })
    }

    /// Number of live waiters.
    pub fn pending(&self) -> usize {
        self.registry.lock().waiters.len()
    }

    fn register_race(&self, expects: &[Expect], filter: TokenFilter) -> Result<Race, BridgeError> {
        let kinds: Vec<MessageKind> = expects.iter().map(Expect::kind).collect();
        let mut registry = self.registry.lock();
        registry.ensure_free(&kinds)?;

        let mut entries = Vec::with_capacity(expects.len());
        let mut receivers = Vec::with_capacity(expects.len());
        for expect in expects {
            let (id, rx) = registry.insert(expect.kind(), filter.clone(), Vec::new());
            entries.push((*expect, id));
            receivers.push(rx);
        }
        for (expect, id) in &entries {
            let siblings = entries
                .iter()
                .filter(|(_, other)| other != id)
                .map(|(e, other)| (e.kind(), *other))
                .collect();
            if let Some(waiter) = registry.waiters.get_mut(&expect.kind()) {
                waiter.siblings = siblings;
            }
        }

        Ok(Race {
            entries,
            receivers,
            registry: Arc::clone(&self.registry),
        })
    }
}

// ---------------------------------------------------------------------------
// Waiter / Race futures
// ---------------------------------------------------------------------------

type Arrival = Pin<Box<dyn Future<Output = (usize, Envelope)> + Send>>;

/// Resolve with the envelope, or never if the sender went away without one.
fn arrival(index: usize, rx: oneshot::Receiver<Envelope>) -> Arrival {
    Box::pin(async move {
        match rx.await {
            Ok(envelope) => (index, envelope),
            Err(_) => std::future::pending().await,
        }
    })
}

/// A single registered waiter.
#[derive(Debug)]
pub struct Waiter {
    kind: MessageKind,
    id: u64,
    rx: Option<oneshot::Receiver<Envelope>>,
    registry: Arc<Mutex<Registry>>,
}

impl Waiter {
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Wait for the envelope or the timeout, whichever comes first.
    pub async fn wait(mut self, timeout: Duration) -> Outcome {
        let Some(rx) = self.rx.take() else {
            return Outcome::TimedOut;
        };
        match tokio::time::timeout(timeout, arrival(0, rx)).await {
            Ok((_, envelope)) => Outcome::Resolved(envelope.payload),
            Err(_) => {
                debug!(kind = %self.kind, ?timeout, "waiter timed out");
                Outcome::TimedOut
            }
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.registry.lock().retire(self.kind, self.id);
    }
}

/// A set of waiters of which exactly one outcome is delivered.
#[derive(Debug)]
pub struct Race {
    entries: Vec<(Expect, u64)>,
    receivers: Vec<oneshot::Receiver<Envelope>>,
    registry: Arc<Mutex<Registry>>,
}

impl Race {
    /// Wait for the first contender or the timeout.
    pub async fn wait(mut self, timeout: Duration) -> Outcome {
        let receivers = std::mem::take(&mut self.receivers);
        if receivers.is_empty() {
            tokio::time::sleep(timeout).await;
            return Outcome::TimedOut;
        }

        let arrivals = receivers
            .into_iter()
            .enumerate()
            .map(|(index, rx)| arrival(index, rx));

        let outcome = match tokio::time::timeout(timeout, select_all(arrivals)).await {
            Ok(((index, envelope), _, _)) => match self.entries[index].0 {
                Expect::Success(_) => Outcome::Resolved(envelope.payload),
                Expect::Failure(_) => Outcome::Failed(envelope.payload),
            },
            Err(_) => {
                debug!(?timeout, "race timed out");
                Outcome::TimedOut
            }
        };
        self.retire_all();
        outcome
    }

    fn retire_all(&self) {
        let mut registry = self.registry.lock();
        for (expect, id) in &self.entries {
            registry.retire(expect.kind(), *id);
        }
    }
}

impl Drop for Race {
    fn drop(&mut self) {
        self.retire_all();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
