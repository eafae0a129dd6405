//! Chain access: the [`ChainProvider`] capability and its Starknet JSON-RPC
//! implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::abi::{ContractAbi, decode_byte_array};
use crate::config::WalletConfig;
use crate::error::{Stage, WalletError};
use crate::types::{Call, Event, Felt, Receipt, join_u256, selector};

/// JSON-RPC error code for an unknown class hash.
const CLASS_HASH_NOT_FOUND: i64 = 28;
/// JSON-RPC error code for a transaction the node has not seen (yet).
const TXN_HASH_NOT_FOUND: i64 = 29;

/// Version used for fee-estimation queries of v1 invokes (`2^128 + 1`).
const QUERY_VERSION_V1: &str = "0x100000000000000000000000000000001";

/// A declared contract class. Only the ABI is interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractClass {
    /// Sierra classes carry the ABI as a JSON string, legacy classes as an
    /// array.
    #[serde(default)]
    pub abi: Value,
}

impl ContractClass {
    pub fn contract_abi(&self) -> Result<ContractAbi, WalletError> {
        ContractAbi::from_value(&self.abi)
    }
}

/// Read access to the chain plus inclusion tracking. Every call may be slow
/// and every call may fail.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    async fn get_class_at(&self, address: Felt) -> Result<ContractClass, WalletError>;

    async fn get_class_by_hash(&self, class_hash: Felt) -> Result<ContractClass, WalletError>;

    async fn is_class_declared(&self, class_hash: Felt) -> Result<bool, WalletError>;

    /// Suspend until the transaction is included, returning its receipt.
    /// A reverted transaction is an error.
    async fn wait_for_inclusion(&self, transaction_hash: Felt) -> Result<Receipt, WalletError>;

    /// Estimated fee, in the fee token's smallest unit, for `sender` executing
    /// `calls`.
    async fn estimate_fee(&self, sender: Felt, calls: &[Call]) -> Result<U256, WalletError>;

    /// ERC-20 `balanceOf(owner)`.
    async fn balance_of(&self, token: Felt, owner: Felt) -> Result<U256, WalletError>;

    /// ERC-20 `symbol()`.
    async fn token_symbol(&self, token: Felt) -> Result<String, WalletError>;
}

// ---------------------------------------------------------------------------
// JSON-RPC
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum RpcFailure {
    Transport(String),
    Rpc { code: i64, message: String },
    Decode(String),
}

impl RpcFailure {
    fn into_wallet(self, stage: Stage) -> WalletError {
        match self {
            Self::Transport(message) => WalletError::network(stage, message),
            Self::Rpc { code, message } => {
                WalletError::network(stage, format!("RPC error {code}: {message}"))
            }
            Self::Decode(message) => WalletError::protocol(stage, message),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawReceipt {
    transaction_hash: Felt,
    #[serde(default)]
    execution_status: Option<String>,
    #[serde(default)]
    revert_reason: Option<String>,
    #[serde(default)]
    events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
struct FeeEstimate {
    overall_fee: Felt,
}

/// [`ChainProvider`] over Starknet JSON-RPC.
pub struct JsonRpcProvider {
    client: reqwest::Client,
    url: String,
    poll_interval: Duration,
    inclusion_timeout: Duration,
    next_id: AtomicU64,
}

impl JsonRpcProvider {
    pub fn new(
        url: impl Into<String>,
        request_timeout: Duration,
        poll_interval: Duration,
        inclusion_timeout: Duration,
    ) -> Result<Self, WalletError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| WalletError::network(Stage::ReadBalance, e))?;
        Ok(Self {
            client,
            url: url.into(),
            poll_interval,
            inclusion_timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn from_config(config: &WalletConfig) -> Result<Self, WalletError> {
        Self::new(
            config.rpc_url.clone(),
            config.request_timeout,
            config.poll_interval,
            config.inclusion_timeout,
        )
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcFailure> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, "rpc request");
        let body = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcFailure::Transport(format!("{method}: {e}")))?;
        if !response.status().is_success() {
            return Err(RpcFailure::Transport(format!(
                "{method}: HTTP {}",
                response.status()
            )));
        }
        let response: RpcResponse = response
            .json()
            .await
            .map_err(|e| RpcFailure::Decode(format!("{method}: {e}")))?;

        if let Some(error) = response.error {
            return Err(RpcFailure::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        let result = response
            .result
            .ok_or_else(|| RpcFailure::Decode(format!("{method}: response has no result")))?;
        serde_json::from_value(result).map_err(|e| RpcFailure::Decode(format!("{method}: {e}")))
    }

    async fn nonce(&self, address: Felt) -> Result<Felt, RpcFailure> {
        self.request(
            "starknet_getNonce",
            json!({"block_id": "pending", "contract_address": address}),
        )
        .await
    }
}

/// Calldata of a multicall `__execute__`:
/// `[n, (to, selector, len, calldata...)...]`.
pub fn execute_calldata(calls: &[Call]) -> Vec<Felt> {
    let mut out = vec![Felt::from(calls.len() as u64)];
    for call in calls {
        out.push(call.contract_address);
        out.push(selector(&call.entrypoint));
        out.push(Felt::from(call.calldata.len() as u64));
        out.extend_from_slice(&call.calldata);
    }
    out
}

/// `symbol()` returns a short string from legacy tokens and a `ByteArray`
/// from Cairo 1 ones.
pub fn decode_symbol(words: &[Felt]) -> Result<String, String> {
    match words {
        [word] => word.to_short_string(),
        _ => decode_byte_array(words),
    }
}

#[async_trait]
impl ChainProvider for JsonRpcProvider {
    async fn get_class_at(&self, address: Felt) -> Result<ContractClass, WalletError> {
        self.request(
            "starknet_getClassAt",
            json!({"block_id": "latest", "contract_address": address}),
        )
        .await
        .map_err(|e| e.into_wallet(Stage::FetchInterface))
    }

    async fn get_class_by_hash(&self, class_hash: Felt) -> Result<ContractClass, WalletError> {
        self.request(
            "starknet_getClass",
            json!({"block_id": "latest", "class_hash": class_hash}),
        )
        .await
        .map_err(|e| e.into_wallet(Stage::FetchInterface))
    }

    async fn is_class_declared(&self, class_hash: Felt) -> Result<bool, WalletError> {
        match self
            .request::<Value>(
                "starknet_getClass",
                json!({"block_id": "latest", "class_hash": class_hash}),
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(RpcFailure::Rpc { code, .. }) if code == CLASS_HASH_NOT_FOUND => Ok(false),
            Err(e) => Err(e.into_wallet(Stage::Declare)),
        }
    }

    async fn wait_for_inclusion(&self, transaction_hash: Felt) -> Result<Receipt, WalletError> {
        let poll = async {
            loop {
                match self
                    .request::<RawReceipt>(
                        "starknet_getTransactionReceipt",
                        json!({"transaction_hash": transaction_hash}),
                    )
                    .await
                {
                    Ok(receipt) => return Ok(receipt),
                    Err(RpcFailure::Rpc { code, .. }) if code == TXN_HASH_NOT_FOUND => {
                        debug!(%transaction_hash, "not included yet");
                        tokio::time::sleep(self.poll_interval).await;
                    }
                    Err(e) => return Err(e.into_wallet(Stage::AwaitInclusion)),
                }
            }
        };

        let receipt = tokio::time::timeout(self.inclusion_timeout, poll)
            .await
            .map_err(|_| {
                WalletError::network(
                    Stage::AwaitInclusion,
                    format!(
                        "{transaction_hash} not included within {:?}",
                        self.inclusion_timeout
                    ),
                )
            })??;

        if receipt.execution_status.as_deref() == Some("REVERTED") {
            let reason = receipt.revert_reason.unwrap_or_default();
            warn!(%transaction_hash, %reason, "transaction reverted");
            return Err(WalletError::network(
                Stage::AwaitInclusion,
                format!("{transaction_hash} reverted: {reason}"),
            ));
        }
        info!(%transaction_hash, "transaction included");
        Ok(Receipt {
            transaction_hash: receipt.transaction_hash,
            events: receipt.events,
        })
    }

    async fn estimate_fee(&self, sender: Felt, calls: &[Call]) -> Result<U256, WalletError> {
        let nonce = self
            .nonce(sender)
            .await
            .map_err(|e| e.into_wallet(Stage::EstimateFee))?;
        let transaction = json!({
            "type": "INVOKE",
            "version": QUERY_VERSION_V1,
            "sender_address": sender,
            "calldata": execute_calldata(calls),
            "max_fee": "0x0",
            "signature": [],
            "nonce": nonce,
        });
        let estimates: Vec<FeeEstimate> = self
            .request(
                "starknet_estimateFee",
                json!({
                    "request": [transaction],
                    "simulation_flags": ["SKIP_VALIDATE"],
                    "block_id": "pending",
                }),
            )
            .await
            .map_err(|e| e.into_wallet(Stage::EstimateFee))?;

        let fee = estimates
            .first()
            .map(|estimate| estimate.overall_fee.to_u256())
            .ok_or_else(|| WalletError::protocol(Stage::EstimateFee, "empty fee estimate"))?;
        debug!(%sender, %fee, "fee estimated");
        Ok(fee)
    }

    async fn balance_of(&self, token: Felt, owner: Felt) -> Result<U256, WalletError> {
        let words: Vec<Felt> = self
            .request(
                "starknet_call",
                json!({
                    "request": {
                        "contract_address": token,
                        "entry_point_selector": selector("balanceOf"),
                        "calldata": [owner],
                    },
                    "block_id": "latest",
                }),
            )
            .await
            .map_err(|e| e.into_wallet(Stage::ReadBalance))?;

        match words.as_slice() {
            [value] => Ok(value.to_u256()),
            [low, high] => join_u256(*low, *high)
                .map_err(|e| WalletError::protocol(Stage::ReadBalance, e)),
            other => Err(WalletError::protocol(
                Stage::ReadBalance,
                format!("balanceOf returned {} words", other.len()),
            )),
        }
    }

    async fn token_symbol(&self, token: Felt) -> Result<String, WalletError> {
        let words: Vec<Felt> = self
            .request(
                "starknet_call",
                json!({
                    "request": {
                        "contract_address": token,
                        "entry_point_selector": selector("symbol"),
                        "calldata": [],
                    },
                    "block_id": "latest",
                }),
            )
            .await
            .map_err(|e| e.into_wallet(Stage::ReadBalance))?;
        decode_symbol(&words).map_err(|e| WalletError::protocol(Stage::ReadBalance, e))
    }
}
