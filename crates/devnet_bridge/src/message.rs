//! Bridge message protocol: envelope-based typed messaging.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Payload field carrying the correlation token of a multi-step request.
pub const ACTION_HASH_FIELD: &str = "actionHash";

/// The kind of message carried in an [`Envelope`].
///
/// The vocabulary is closed: every request has a fixed set of reply kinds.
///
/// | request | replies |
/// |---|---|
/// | `RequestExecute` | `ReplyExecute` |
/// | `RequestDeclare` | `AckDeclare` → `ReplyDeclareOk` \| `ReplyDeclareFailed` |
/// | `RequestSign` | `ReplySignOk` \| `ReplySignFailed` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    // ── Requests (page → signer) ────────────────────────────────────
    /// Execute a batch of calls from the account.
    RequestExecute,
    /// Declare a contract class.
    RequestDeclare,
    /// Sign typed data.
    RequestSign,

    // ── Replies (signer → page) ─────────────────────────────────────
    /// Result of an execute request.
    ReplyExecute,
    /// A declare request was accepted; carries the correlation token.
    AckDeclare,
    /// The declare transaction was submitted.
    ReplyDeclareOk,
    /// The declare was rejected or failed.
    ReplyDeclareFailed,
    /// The typed data was signed.
    ReplySignOk,
    /// The signature request was rejected.
    ReplySignFailed,
}

impl MessageKind {
    /// Every kind, in declaration order.
    pub const ALL: [MessageKind; 9] = [
        Self::RequestExecute,
        Self::RequestDeclare,
        Self::RequestSign,
        Self::ReplyExecute,
        Self::AckDeclare,
        Self::ReplyDeclareOk,
        Self::ReplyDeclareFailed,
        Self::ReplySignOk,
        Self::ReplySignFailed,
    ];

    /// Wire tag for this kind.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::RequestExecute => "request_execute",
            Self::RequestDeclare => "request_declare",
            Self::RequestSign => "request_sign",
            Self::ReplyExecute => "reply_execute",
            Self::AckDeclare => "ack_declare",
            Self::ReplyDeclareOk => "reply_declare_ok",
            Self::ReplyDeclareFailed => "reply_declare_failed",
            Self::ReplySignOk => "reply_sign_ok",
            Self::ReplySignFailed => "reply_sign_failed",
        }
    }

    /// Whether this kind travels from the page to the signer.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Self::RequestExecute | Self::RequestDeclare | Self::RequestSign
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A message envelope carrying a typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message identifier (UUID v4), used for logging only.
    pub id: String,
    /// The kind/type of message.
    pub kind: MessageKind,
    /// The payload data (JSON value, interpreted based on `kind`).
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Create a new envelope.
    pub fn new(kind: MessageKind, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            payload,
        }
    }

    /// The correlation token carried in the payload, if any.
    pub fn correlation_token(&self) -> Option<&str> {
        self.payload.get(ACTION_HASH_FIELD)?.as_str()
    }

    /// Serialize the envelope to a JSON string for transmission.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize an envelope from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
