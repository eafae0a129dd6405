//! Bridge error types.

use crate::message::MessageKind;

/// Errors that can occur in the devnet_bridge crate.
///
/// Waiting never produces an error: timeouts and explicit failures are
/// reported through [`Outcome`](crate::Outcome). These cover setup and
/// transport problems only.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A transport-level error (WebSocket connect/send/receive).
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON serialization / deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A live waiter is already registered for this kind.
    #[error("A waiter for {0} is already pending")]
    WaiterBusy(MessageKind),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
