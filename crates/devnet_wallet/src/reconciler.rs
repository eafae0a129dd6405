//! Balance reconciliation: faucet top-ups and fee-aware transfers.
//!
//! A transfer whose estimated fee exceeds the amount being sent is padded
//! with the fee (`amount + fee`). Every debit is checked against the balance
//! read at the start of the operation before anything is submitted.

use std::sync::Arc;

use alloy_primitives::U256;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::account::Account;
use crate::config::WalletConfig;
use crate::error::{Stage, WalletError};
use crate::faucet::Faucet;
use crate::provider::ChainProvider;
use crate::types::{Call, ExecuteOptions, Felt};

/// How [`BalanceReconciler::mint_to_target`] treats a balance above target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// Send the surplus to the sink address.
    pub return_excess: bool,
}

/// Split `deficit` into faucet requests of at most `cap` each, in order.
/// Returns `None` when `cap` is zero and the deficit cannot be covered.
pub fn plan_mint_chunks(deficit: U256, cap: U256) -> Option<Vec<U256>> {
    if deficit.is_zero() {
        return Some(Vec::new());
    }
    if cap.is_zero() {
        return None;
    }
    let mut chunks = Vec::new();
    let mut remaining = deficit;
    while !remaining.is_zero() {
        let chunk = remaining.min(cap);
        chunks.push(chunk);
        remaining -= chunk;
    }
    Some(chunks)
}

/// Amount actually transferred for a nominal `amount`.
pub fn debit_for(amount: U256, fee: U256) -> U256 {
    if fee > amount {
        amount.saturating_add(fee)
    } else {
        amount
    }
}

/// A token balance and the token's symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenBalance {
    #[serde(with = "crate::config::u256_dec_serde")]
    pub balance: U256,
    pub symbol: String,
}

/// Read `owner`'s balance of `token`. The token's class must expose
/// `balanceOf` and `symbol`.
pub async fn read_token_balance(
    provider: &dyn ChainProvider,
    token: Felt,
    owner: Felt,
) -> Result<TokenBalance, WalletError> {
    let abi = provider
        .get_class_at(token)
        .await?
        .contract_abi()
        .map_err(|e| WalletError::protocol(Stage::FetchInterface, e))?;
    if let Some(missing) = ["balanceOf", "symbol"]
        .into_iter()
        .find(|name| !abi.has_function(name))
    {
        return Err(WalletError::protocol(
            Stage::FetchInterface,
            format!("{token} is not an ERC-20 token: no `{missing}` entry point"),
        ));
    }

    let balance = provider.balance_of(token, owner).await?;
    let symbol = provider.token_symbol(token).await?;
    Ok(TokenBalance { balance, symbol })
}

pub struct BalanceReconciler {
    account: Arc<dyn Account>,
    provider: Arc<dyn ChainProvider>,
    faucet: Arc<dyn Faucet>,
    fee_token: Felt,
    sink_address: Felt,
    max_mint_chunk: U256,
}

impl BalanceReconciler {
    pub fn new(
        account: Arc<dyn Account>,
        provider: Arc<dyn ChainProvider>,
        faucet: Arc<dyn Faucet>,
        config: &WalletConfig,
    ) -> Self {
        Self {
            account,
            provider,
            faucet,
            fee_token: config.fee_token,
            sink_address: config.sink_address,
            max_mint_chunk: config.max_mint_chunk,
        }
    }

    /// Balance and symbol of `token` (the fee token by default) held by the
    /// account.
    pub async fn token_balance(&self, token: Option<Felt>) -> Result<TokenBalance, WalletError> {
        let token = token.unwrap_or(self.fee_token);
        read_token_balance(self.provider.as_ref(), token, self.account.address()).await
    }

    async fn balance(&self, token: Felt) -> Result<U256, WalletError> {
        self.provider
            .balance_of(token, self.account.address())
            .await
    }

    /// Bring the fee-token balance to `target`, minting the deficit in chunks
    /// or, with [`ReconcilePolicy::return_excess`], sending the surplus to the
    /// sink. Returns the balance read after the last step.
    pub async fn mint_to_target(
        &self,
        target: U256,
        policy: ReconcilePolicy,
    ) -> Result<U256, WalletError> {
        let address = self.account.address();
        let current = self.balance(self.fee_token).await?;
        debug!(%current, %target, "reconciling balance");

        if current > target {
            if !policy.return_excess {
                return Ok(current);
            }
            let surplus = current - target;
            self.transfer_checked(self.fee_token, self.sink_address, surplus, current)
                .await?;
        } else if current < target {
            let deficit = target - current;
            let chunks = plan_mint_chunks(deficit, self.max_mint_chunk).ok_or_else(|| {
                WalletError::network(Stage::Mint, "max_mint_chunk is zero, refusing to mint")
            })?;
            let mut applied = U256::ZERO;
            for chunk in chunks {
                if let Err(e) = self.faucet.mint(address, chunk).await {
                    if applied.is_zero() {
                        return Err(e);
                    }
                    warn!(%applied, %deficit, "mint sequence stopped partway");
                    return Err(WalletError::PartialReconciliation {
                        applied,
                        requested: deficit,
                        source: Box::new(e),
                    });
                }
                applied += chunk;
                debug!(%chunk, %applied, "chunk minted");
            }
            info!(%deficit, "minted to target");
        } else {
            return Ok(current);
        }

        self.balance(self.fee_token).await
    }

    /// Transfer `amount` of `token` (the fee token by default) to `recipient`.
    /// Returns the balance read after inclusion.
    pub async fn send_to_account(
        &self,
        recipient: Felt,
        amount: U256,
        token: Option<Felt>,
    ) -> Result<U256, WalletError> {
        let token = token.unwrap_or(self.fee_token);
        let balance = self.balance(token).await?;
        if amount > balance {
            return Err(WalletError::InsufficientBalance {
                balance,
                required: amount,
            });
        }
        self.transfer_checked(token, recipient, amount, balance)
            .await?;
        self.balance(token).await
    }

    /// Estimate, apply the overshoot rule, guard against `balance`, submit and
    /// wait for inclusion.
    async fn transfer_checked(
        &self,
        token: Felt,
        recipient: Felt,
        amount: U256,
        balance: U256,
    ) -> Result<(), WalletError> {
        let nominal = Call::erc20_transfer(token, recipient, amount);
        let fee = self
            .provider
            .estimate_fee(self.account.address(), std::slice::from_ref(&nominal))
            .await?;
        let debit = debit_for(amount, fee);
        if debit > balance {
            return Err(WalletError::InsufficientBalance {
                balance,
                required: debit,
            });
        }
        if debit != amount {
            debug!(%amount, %fee, %debit, "fee exceeds amount, sending amount plus fee");
        }

        let call = Call::erc20_transfer(token, recipient, debit);
        let submitted = self
            .account
            .execute(std::slice::from_ref(&call), &ExecuteOptions::default())
            .await?;
        self.provider
            .wait_for_inclusion(submitted.transaction_hash)
            .await?;
        info!(%recipient, %debit, transaction_hash = %submitted.transaction_hash, "transfer included");
        Ok(())
    }
}
