//! Devnet Bridge: request/response correlation between two isolated contexts.
//!
//! The page context (a connected dApp, a CLI) cannot touch key material. It
//! posts typed envelopes to a privileged signer context and waits for the
//! correlated replies. This crate provides that plumbing and nothing
//! chain-specific.
//!
//! # Architecture
//!
//! - **Protocol**: [`Envelope`]s tagged with a closed [`MessageKind`]
//!   vocabulary and a JSON payload.
//! - **Links**: a [`Link`] is one end of a bidirectional envelope channel,
//!   either in-process ([`link_pair`]) or over WebSocket ([`transport`]).
//! - **Bridge**: [`MessageBridge`] owns the waiter registry on the requesting
//!   side. Waiters are registered before the request is sent and resolve to an
//!   explicit [`Outcome`].
//! - **Routing**: [`Router`] dispatches inbound requests to handlers on the
//!   privileged side.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use devnet_bridge::{Envelope, MessageBridge, MessageKind, Outcome, link_pair};
//!
//! # async fn example() {
//! let (page, _signer) = link_pair();
//! let bridge = MessageBridge::attach(page);
//!
//! let reply = bridge.expect(MessageKind::ReplyExecute).unwrap();
//! bridge.send(Envelope::new(MessageKind::RequestExecute, serde_json::json!({})));
//! match reply.wait(Duration::from_secs(5)).await {
//!     Outcome::Resolved(payload) => println!("{payload}"),
//!     Outcome::Failed(_) | Outcome::TimedOut => {}
//! }
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod link;
pub mod message;
pub mod router;
pub mod transport;

// ── Re-exports for convenience ──────────────────────────────────────────

pub use bridge::{Expect, MessageBridge, Outcome, Race, Waiter};
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use link::{Link, Outbox, link_pair};
pub use message::{Envelope, MessageKind};
pub use router::{MessageHandler, Router};
