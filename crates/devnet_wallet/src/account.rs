//! Accounts: the [`Account`] capability and its two variants.
//!
//! [`BridgeAccount`] forwards every request over a [`MessageBridge`] to a
//! signer host and turns the reply envelopes back into typed results.
//! [`LocalAccount`] talks to an in-process [`SigningAuthority`] directly.

use std::sync::Arc;

use async_trait::async_trait;
use devnet_bridge::{
    BridgeConfig, BridgeError, Envelope, Expect, MessageBridge, MessageKind, Outcome, transport,
};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{AccountMode, WalletConfig};
use crate::error::{Stage, WalletError};
use crate::types::{
    Call, DeclarePayload, DeclareResult, ExecuteOptions, ExecuteResult, Felt, SignOptions,
    Signature,
};

/// An account that can submit transactions and sign messages.
#[async_trait]
pub trait Account: Send + Sync {
    fn address(&self) -> Felt;

    async fn execute(
        &self,
        calls: &[Call],
        options: &ExecuteOptions,
    ) -> Result<ExecuteResult, WalletError>;

    /// Declare a class. A result without a transaction hash means the class
    /// was already declared.
    async fn declare(&self, payload: &DeclarePayload) -> Result<DeclareResult, WalletError>;

    async fn sign_message(
        &self,
        typed_data: &Value,
        options: &SignOptions,
    ) -> Result<Signature, WalletError>;
}

/// Failure reported by a [`SigningAuthority`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorityError {
    /// The key holder declined the request.
    #[error("{0}")]
    Rejected(String),
    /// The request was accepted but could not be carried out.
    #[error("{0}")]
    Failed(String),
}

/// Reply field telling a refusal (`rejected`) from a failure (`failed`).
pub const REASON_FIELD: &str = "reason";

impl AuthorityError {
    fn reason_tag(&self) -> &'static str {
        match self {
            Self::Rejected(_) => "rejected",
            Self::Failed(_) => "failed",
        }
    }

    /// Failure payload as posted by the signer host:
    /// `{"error": message, "reason": "rejected" | "failed"}`.
    pub fn to_payload(&self) -> Value {
        json!({"error": self.to_string(), REASON_FIELD: self.reason_tag()})
    }

    /// Read a failure payload back. A payload without a `reason` is treated
    /// as a refusal.
    pub fn from_payload(payload: &Value) -> Self {
        let message = failure_reason(payload);
        match payload.get(REASON_FIELD).and_then(Value::as_str) {
            Some("failed") => Self::Failed(message),
            _ => Self::Rejected(message),
        }
    }

    pub fn into_wallet(self, stage: Stage) -> WalletError {
        match self {
            Self::Rejected(reason) => WalletError::UserAborted { stage, reason },
            Self::Failed(message) => WalletError::network(stage, message),
        }
    }
}

/// The privileged side: whatever holds the key material.
#[async_trait]
pub trait SigningAuthority: Send + Sync {
    fn address(&self) -> Felt;

    async fn execute(
        &self,
        calls: &[Call],
        options: &ExecuteOptions,
    ) -> Result<ExecuteResult, AuthorityError>;

    async fn declare(&self, payload: &DeclarePayload) -> Result<DeclareResult, AuthorityError>;

    async fn sign_message(
        &self,
        typed_data: &Value,
        options: &SignOptions,
    ) -> Result<Signature, AuthorityError>;
}

// ---------------------------------------------------------------------------
// BridgeAccount
// ---------------------------------------------------------------------------

/// Account whose requests are signed on the other side of a bridge.
///
/// Operations on one account are serialized: a second request waits until the
/// first has produced its outcome.
pub struct BridgeAccount {
    address: Felt,
    bridge: MessageBridge,
    config: BridgeConfig,
    in_flight: Mutex<()>,
}

impl BridgeAccount {
    pub fn new(address: Felt, bridge: MessageBridge, config: BridgeConfig) -> Self {
        Self {
            address,
            bridge,
            config,
            in_flight: Mutex::new(()),
        }
    }

    pub fn bridge(&self) -> &MessageBridge {
        &self.bridge
    }
}

/// Text of a failure payload's `error` field, or the whole payload.
fn failure_reason(payload: &Value) -> String {
    match payload.get("error") {
        Some(Value::String(reason)) => reason.clone(),
        Some(Value::Null) | None => payload.to_string(),
        Some(other) => other.to_string(),
    }
}

fn field<T: serde::de::DeserializeOwned>(
    payload: &Value,
    name: &str,
    stage: Stage,
) -> Result<T, WalletError> {
    let raw = payload
        .get(name)
        .ok_or_else(|| WalletError::protocol(stage, format!("reply has no `{name}`")))?;
    serde_json::from_value(raw.clone())
        .map_err(|e| WalletError::protocol(stage, format!("bad `{name}`: {e}")))
}

#[async_trait]
impl Account for BridgeAccount {
    fn address(&self) -> Felt {
        self.address
    }

    async fn execute(
        &self,
        calls: &[Call],
        options: &ExecuteOptions,
    ) -> Result<ExecuteResult, WalletError> {
        let _guard = self.in_flight.lock().await;

        let waiter = self.bridge.expect(MessageKind::ReplyExecute)?;
        let payload = json!({"transactions": calls, "options": options});
        self.bridge
            .send(Envelope::new(MessageKind::RequestExecute, payload));
        debug!(calls = calls.len(), "execute requested");

        let reply = match waiter.wait(self.config.outcome_timeout).await {
            Outcome::Resolved(payload) | Outcome::Failed(payload) => payload,
            Outcome::TimedOut => {
                warn!("execute timed out");
                return Err(WalletError::BridgeTimeout {
                    stage: Stage::Execute,
                });
            }
        };

        if reply.get("error").is_some_and(|e| !e.is_null()) {
            let err = AuthorityError::from_payload(&reply);
            info!(reason = %err, "execute refused by signer");
            return Err(err.into_wallet(Stage::Execute));
        }
        let transaction_hash = field(&reply, "transactionHash", Stage::Execute)?;
        info!(%transaction_hash, "execute submitted");
        Ok(ExecuteResult { transaction_hash })
    }

    async fn declare(&self, payload: &DeclarePayload) -> Result<DeclareResult, WalletError> {
        let _guard = self.in_flight.lock().await;

        // Outcome waiters first, so an outcome that chases the ack is never
        // missed. They accept nothing until the ack binds its token.
        let race = self.bridge.first_of_correlated(&[
            Expect::success(MessageKind::ReplyDeclareOk),
            Expect::failure(MessageKind::ReplyDeclareFailed),
        ])?;
        let ack = self.bridge.expect_binding(MessageKind::AckDeclare, &race)?;

        let request = serde_json::to_value(payload).map_err(BridgeError::from)?;
        self.bridge
            .send(Envelope::new(MessageKind::RequestDeclare, request));

        let action_hash: String = match ack.wait(self.config.ack_timeout).await {
            Outcome::Resolved(reply) | Outcome::Failed(reply) => {
                field(&reply, devnet_bridge::message::ACTION_HASH_FIELD, Stage::Acknowledge)?
            }
            Outcome::TimedOut => {
                warn!("declare was not acknowledged");
                return Err(WalletError::BridgeTimeout {
                    stage: Stage::Acknowledge,
                });
            }
        };
        debug!(%action_hash, "declare acknowledged");

        match race.wait(self.config.outcome_timeout).await {
            Outcome::Resolved(reply) => {
                let result: DeclareResult = serde_json::from_value(reply).map_err(|e| {
                    WalletError::protocol(Stage::Declare, format!("bad declare reply: {e}"))
                })?;
                info!(class_hash = %result.class_hash, "declare finished");
                Ok(result)
            }
            Outcome::Failed(reply) => {
                let err = AuthorityError::from_payload(&reply);
                info!(%action_hash, reason = %err, "declare refused by signer");
                Err(err.into_wallet(Stage::Declare))
            }
            Outcome::TimedOut => {
                warn!(%action_hash, "declare outcome timed out");
                Err(WalletError::BridgeTimeout {
                    stage: Stage::Declare,
                })
            }
        }
    }

    async fn sign_message(
        &self,
        typed_data: &Value,
        options: &SignOptions,
    ) -> Result<Signature, WalletError> {
        let _guard = self.in_flight.lock().await;

        let race = self.bridge.first_of(&[
            Expect::success(MessageKind::ReplySignOk),
            Expect::failure(MessageKind::ReplySignFailed),
        ])?;
        self.bridge.send(Envelope::new(
            MessageKind::RequestSign,
            json!({"typedData": typed_data, "options": options}),
        ));

        match race.wait(self.config.outcome_timeout).await {
            Outcome::Resolved(reply) => field(&reply, "signature", Stage::Sign),
            Outcome::Failed(reply) => {
                Err(AuthorityError::from_payload(&reply).into_wallet(Stage::Sign))
            }
            Outcome::TimedOut => Err(WalletError::BridgeTimeout { stage: Stage::Sign }),
        }
    }
}

// ---------------------------------------------------------------------------
// LocalAccount
// ---------------------------------------------------------------------------

/// Account backed by an in-process [`SigningAuthority`].
pub struct LocalAccount {
    authority: Arc<dyn SigningAuthority>,
}

impl LocalAccount {
    pub fn new(authority: Arc<dyn SigningAuthority>) -> Self {
        Self { authority }
    }
}

#[async_trait]
impl Account for LocalAccount {
    fn address(&self) -> Felt {
        self.authority.address()
    }

    async fn execute(
        &self,
        calls: &[Call],
        options: &ExecuteOptions,
    ) -> Result<ExecuteResult, WalletError> {
        self.authority
            .execute(calls, options)
            .await
            .map_err(|e| e.into_wallet(Stage::Execute))
    }

    async fn declare(&self, payload: &DeclarePayload) -> Result<DeclareResult, WalletError> {
        self.authority
            .declare(payload)
            .await
            .map_err(|e| e.into_wallet(Stage::Declare))
    }

    async fn sign_message(
        &self,
        typed_data: &Value,
        options: &SignOptions,
    ) -> Result<Signature, WalletError> {
        self.authority
            .sign_message(typed_data, options)
            .await
            .map_err(|e| e.into_wallet(Stage::Sign))
    }
}

/// Build the account selected by `config.account.mode`.
///
/// Bridge mode connects to the signer host at `config.bridge.signer_url`;
/// local mode requires an `authority`.
pub async fn connect(
    config: &WalletConfig,
    authority: Option<Arc<dyn SigningAuthority>>,
) -> anyhow::Result<Arc<dyn Account>> {
    match config.account.mode {
        AccountMode::Bridge => {
            let link = transport::connect(&config.bridge.signer_url).await?;
            let bridge = MessageBridge::attach(link);
            Ok(Arc::new(BridgeAccount::new(
                config.account.address,
                bridge,
                config.bridge.clone(),
            )))
        }
        AccountMode::Local => {
            let Some(authority) = authority else {
                anyhow::bail!("local account mode needs a signing authority");
            };
            if authority.address() != config.account.address {
                warn!(
                    configured = %config.account.address,
                    authority = %authority.address(),
                    "signing authority address differs from configured account"
                );
            }
            Ok(Arc::new(LocalAccount::new(authority)))
        }
    }
}
