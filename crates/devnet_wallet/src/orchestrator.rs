//! Contract declaration and deployment on top of an [`Account`].

use std::sync::Arc;

use alloy_primitives::U256;
use serde_json::Value;
use tracing::{debug, info};

use crate::account::Account;
use crate::error::{Stage, WalletError};
use crate::provider::ChainProvider;
use crate::types::{Call, DeclarePayload, DeclareResult, DeployResult, ExecuteOptions, Felt};

/// Drives multi-step contract workflows. Steps run strictly in order and the
/// first failure ends the workflow.
pub struct ContractOrchestrator {
    account: Arc<dyn Account>,
    provider: Arc<dyn ChainProvider>,
    udc_address: Felt,
}

impl ContractOrchestrator {
    pub fn new(account: Arc<dyn Account>, provider: Arc<dyn ChainProvider>, udc_address: Felt) -> Self {
        Self {
            account,
            provider,
            udc_address,
        }
    }

    /// Declare a class unless the chain already knows it.
    ///
    /// Waits for inclusion only when a declare transaction was actually
    /// submitted.
    pub async fn declare_if_not_already(
        &self,
        payload: &DeclarePayload,
    ) -> Result<DeclareResult, WalletError> {
        if let Some(class_hash) = payload.class_hash {
            if self.provider.is_class_declared(class_hash).await? {
                info!(%class_hash, "class already declared");
                return Ok(DeclareResult::already_declared(class_hash));
            }
        }

        let result = self.account.declare(payload).await?;
        match result.transaction_hash {
            Some(transaction_hash) => {
                debug!(%transaction_hash, "waiting for declare inclusion");
                self.provider.wait_for_inclusion(transaction_hash).await?;
                info!(class_hash = %result.class_hash, "class declared");
            }
            None => info!(class_hash = %result.class_hash, "class already declared"),
        }
        Ok(result)
    }

    /// Deploy an instance of `class_hash` through the Universal Deployer,
    /// compiling `constructor_args` against the class ABI.
    pub async fn deploy(
        &self,
        class_hash: Felt,
        constructor_args: &Value,
    ) -> Result<DeployResult, WalletError> {
        let class = self.provider.get_class_by_hash(class_hash).await?;
        let calldata = class.contract_abi()?.compile_constructor(constructor_args)?;
        debug!(%class_hash, words = calldata.len(), "constructor compiled");

        let call = self.deploy_call(class_hash, random_salt(), calldata);
        let submitted = self
            .account
            .execute(std::slice::from_ref(&call), &ExecuteOptions::default())
            .await?;
        let receipt = self
            .provider
            .wait_for_inclusion(submitted.transaction_hash)
            .await?;

        let contract_address = receipt
            .events
            .iter()
            .find(|event| event.from_address == self.udc_address)
            .and_then(|event| event.data.first().copied())
            .ok_or_else(|| {
                WalletError::protocol(
                    Stage::Deploy,
                    format!(
                        "no deployment event from {} in {}",
                        self.udc_address, receipt.transaction_hash
                    ),
                )
            })?;

        info!(%class_hash, %contract_address, "contract deployed");
        Ok(DeployResult {
            contract_address,
            transaction_hash: submitted.transaction_hash,
        })
    }

    /// `deployContract(class_hash, salt, unique, calldata)`.
    pub fn deploy_call(&self, class_hash: Felt, salt: Felt, calldata: Vec<Felt>) -> Call {
        let mut args = Vec::with_capacity(calldata.len() + 4);
        args.push(class_hash);
        args.push(salt);
        args.push(Felt::ZERO);
        args.push(Felt::from(calldata.len() as u64));
        args.extend(calldata);
        Call::new(self.udc_address, "deployContract", args)
    }
}

/// 248 random bits, always below the field prime.
fn random_salt() -> Felt {
    let bytes: [u8; 31] = rand::random();
    Felt::from_u256(U256::from_be_slice(&bytes)).unwrap_or(Felt::ZERO)
}
