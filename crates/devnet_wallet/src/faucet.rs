//! Devnet faucet client.

use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::WalletConfig;
use crate::error::{Stage, WalletError};
use crate::types::Felt;

/// Mints fee tokens to an address. Each call is capped by the faucet.
#[async_trait]
pub trait Faucet: Send + Sync {
    async fn mint(&self, address: Felt, amount: U256) -> Result<(), WalletError>;
}

#[derive(Debug, Serialize)]
struct MintRequest {
    address: String,
    amount: u64,
}

/// [`Faucet`] backed by the devnet's `POST /mint` endpoint.
pub struct HttpFaucet {
    client: reqwest::Client,
    mint_url: String,
}

impl HttpFaucet {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, WalletError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| WalletError::network(Stage::Mint, e))?;
        Ok(Self {
            client,
            mint_url: format!("{}/mint", base_url.trim_end_matches('/')),
        })
    }

    pub fn from_config(config: &WalletConfig) -> Result<Self, WalletError> {
        Self::new(&config.faucet_url, config.request_timeout)
    }

    pub fn mint_url(&self) -> &str {
        &self.mint_url
    }
}

#[async_trait]
impl Faucet for HttpFaucet {
    async fn mint(&self, address: Felt, amount: U256) -> Result<(), WalletError> {
        let amount: u64 = amount.try_into().map_err(|_| {
            WalletError::network(Stage::Mint, format!("mint amount {amount} exceeds u64"))
        })?;
        debug!(%address, amount, "requesting mint");

        let response = self
            .client
            .post(&self.mint_url)
            .json(&MintRequest {
                address: address.to_string(),
                amount,
            })
            .send()
            .await
            .map_err(|e| WalletError::network(Stage::Mint, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WalletError::network(
                Stage::Mint,
                format!("faucet returned HTTP {status}: {body}"),
            ));
        }
        info!(%address, amount, "minted");
        Ok(())
    }
}
