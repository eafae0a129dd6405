//! Devnet Wallet: accounts, contract workflows and balance reconciliation
//! for a Starknet development network.
//!
//! - [`account`]: the [`Account`] capability, backed either by a signer host
//!   across a [`devnet_bridge::MessageBridge`] or by a local
//!   [`SigningAuthority`].
//! - [`host`]: the signer-side responder for bridge requests.
//! - [`orchestrator`]: declare-if-needed and UDC deployment.
//! - [`reconciler`]: faucet top-ups in capped chunks and fee-aware transfers.
//! - [`provider`] / [`faucet`]: chain and faucet access over HTTP.

pub mod abi;
pub mod account;
pub mod config;
pub mod error;
pub mod faucet;
pub mod host;
pub mod logging;
pub mod orchestrator;
pub mod provider;
pub mod reconciler;
pub mod types;

pub use account::{Account, AuthorityError, BridgeAccount, LocalAccount, SigningAuthority};
pub use config::{AccountConfig, AccountMode, WalletConfig};
pub use error::{ErrorKind, ErrorReport, OperationReport, Stage, WalletError};
pub use faucet::{Faucet, HttpFaucet};
pub use host::SignerHost;
pub use orchestrator::ContractOrchestrator;
pub use provider::{ChainProvider, ContractClass, JsonRpcProvider};
pub use reconciler::{
    BalanceReconciler, ReconcilePolicy, TokenBalance, plan_mint_chunks, read_token_balance,
};
pub use types::{
    Call, DeclarePayload, DeclareResult, DeployResult, ExecuteOptions, ExecuteResult, Felt,
    Receipt, SignOptions, Signature,
};
