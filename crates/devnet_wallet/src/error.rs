//! Wallet error types and the structured report handed to UI/CLI callers.

use std::fmt;

use alloy_primitives::U256;
use devnet_bridge::BridgeError;
use serde::{Deserialize, Serialize};

/// The step of an operation at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Execute,
    Acknowledge,
    Declare,
    Sign,
    AwaitInclusion,
    FetchInterface,
    CompileConstructor,
    Deploy,
    ReadBalance,
    EstimateFee,
    Mint,
    Transfer,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Acknowledge => "acknowledge",
            Self::Declare => "declare",
            Self::Sign => "sign",
            Self::AwaitInclusion => "await inclusion",
            Self::FetchInterface => "fetch interface",
            Self::CompileConstructor => "compile constructor",
            Self::Deploy => "deploy",
            Self::ReadBalance => "read balance",
            Self::EstimateFee => "estimate fee",
            Self::Mint => "mint",
            Self::Transfer => "transfer",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors surfaced by accounts, the orchestrator and the reconciler.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("{stage} timed out waiting for the signer")]
    BridgeTimeout { stage: Stage },

    #[error("{stage} aborted by user: {reason}")]
    UserAborted { stage: Stage, reason: String },

    #[error("Constructor arguments do not match the contract interface: {0}")]
    InterfaceMismatch(String),

    #[error("Insufficient balance: have {balance}, need {required}")]
    InsufficientBalance { balance: U256, required: U256 },

    #[error("Network error during {stage}: {message}")]
    Network { stage: Stage, message: String },

    #[error("Reconciliation stopped after applying {applied} of {requested}: {source}")]
    PartialReconciliation {
        applied: U256,
        requested: U256,
        #[source]
        source: Box<WalletError>,
    },

    #[error("Malformed {stage} reply: {message}")]
    Protocol { stage: Stage, message: String },

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

/// Classification of errors for callers and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BridgeTimeout,
    UserAborted,
    InterfaceMismatch,
    InsufficientBalance,
    NetworkError,
    PartialReconciliation,
    Protocol,
    Bridge,
}

impl WalletError {
    pub fn network(stage: Stage, message: impl fmt::Display) -> Self {
        Self::Network {
            stage,
            message: message.to_string(),
        }
    }

    pub fn protocol(stage: Stage, message: impl fmt::Display) -> Self {
        Self::Protocol {
            stage,
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BridgeTimeout { .. } => ErrorKind::BridgeTimeout,
            Self::UserAborted { .. } => ErrorKind::UserAborted,
            Self::InterfaceMismatch(_) => ErrorKind::InterfaceMismatch,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Self::Network { .. } => ErrorKind::NetworkError,
            Self::PartialReconciliation { .. } => ErrorKind::PartialReconciliation,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Bridge(_) => ErrorKind::Bridge,
        }
    }

    /// The stage that failed, when one is known.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::BridgeTimeout { stage }
            | Self::UserAborted { stage, .. }
            | Self::Network { stage, .. }
            | Self::Protocol { stage, .. } => Some(*stage),
            Self::InterfaceMismatch(_) => Some(Stage::CompileConstructor),
            Self::PartialReconciliation { source, .. } => source.stage(),
            Self::InsufficientBalance { .. } | Self::Bridge(_) => None,
        }
    }

    /// Returns a user-friendly message.
    pub fn user_message(&self) -> String {
        match self {
            Self::BridgeTimeout { .. } => "User action timed out".into(),
            Self::UserAborted { .. } => "User abort".into(),
            Self::InsufficientBalance { balance, .. } => {
                format!("Insufficient account balance: you have {balance}")
            }
            Self::Bridge(_) => "Signer connection error. Is the signer running?".into(),
            other => other.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Serializable error details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub message: String,
    /// Current balance, attached to `insufficient_balance` errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<String>,
}

impl From<&WalletError> for ErrorReport {
    fn from(err: &WalletError) -> Self {
        let balance = match err {
            WalletError::InsufficientBalance { balance, .. } => Some(balance.to_string()),
            _ => None,
        };
        Self {
            kind: err.kind(),
            stage: err.stage(),
            message: err.to_string(),
            balance,
        }
    }
}

/// Either `{"result": ...}` or `{"error": {...}}`. Never both, never neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationReport<T> {
    Result(T),
    Error(ErrorReport),
}

impl<T> From<Result<T, WalletError>> for OperationReport<T> {
    fn from(result: Result<T, WalletError>) -> Self {
        match result {
            Ok(value) => Self::Result(value),
            Err(err) => Self::Error(ErrorReport::from(&err)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_stages() {
        let err = WalletError::BridgeTimeout {
            stage: Stage::Acknowledge,
        };
        assert_eq!(err.kind(), ErrorKind::BridgeTimeout);
        assert_eq!(err.stage(), Some(Stage::Acknowledge));

        let partial = WalletError::PartialReconciliation {
            applied: U256::from(10u8),
            requested: U256::from(25u8),
            source: Box::new(WalletError::network(Stage::Mint, "faucet down")),
        };
        assert_eq!(partial.kind(), ErrorKind::PartialReconciliation);
        assert_eq!(partial.stage(), Some(Stage::Mint));
        assert!(partial.to_string().contains("10 of 25"));
    }

    #[test]
    fn user_messages() {
        let aborted = WalletError::UserAborted {
            stage: Stage::Sign,
            reason: "rejected".into(),
        };
        assert_eq!(aborted.user_message(), "User abort");

        let timeout = WalletError::BridgeTimeout {
            stage: Stage::Declare,
        };
        assert_eq!(timeout.user_message(), "User action timed out");
    }

    #[test]
    fn report_for_success() {
        let report: OperationReport<u32> = Ok(7).into();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json, serde_json::json!({"result": 7}));
    }

    #[test]
    fn report_for_insufficient_balance_carries_balance() {
        let report: OperationReport<u32> = Err(WalletError::InsufficientBalance {
            balance: U256::from(50u8),
            required: U256::from(55u8),
        })
        .into();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["error"]["kind"], "insufficient_balance");
        assert_eq!(json["error"]["balance"], "50");
        assert!(json["error"].get("stage").is_none());
    }

    #[test]
    fn report_for_network_error_names_stage() {
        let report: OperationReport<()> =
            Err(WalletError::network(Stage::EstimateFee, "connection refused")).into();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["error"]["kind"], "network_error");
        assert_eq!(json["error"]["stage"], "estimate_fee");
    }
}
