//! In-memory chain, faucet and signing authority shared by the integration
//! tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;
use devnet_bridge::{BridgeConfig, MessageBridge, link_pair};
use devnet_wallet::account::{AuthorityError, SigningAuthority};
use devnet_wallet::types::{Event, join_u256};
use devnet_wallet::{
    BridgeAccount, Call, ChainProvider, ContractClass, DeclarePayload, DeclareResult,
    ExecuteOptions, ExecuteResult, Faucet, Felt, Receipt, SignOptions, Signature, SignerHost,
    Stage, WalletConfig, WalletError,
};
use serde_json::Value;

pub fn felt(v: u64) -> Felt {
    Felt::from(v)
}

pub fn u(v: u64) -> U256 {
    U256::from(v)
}

/// `n * 10^18`.
pub fn eth(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
}

pub const ACCOUNT: u64 = 0xacc;
pub const FEE_TOKEN: u64 = 0xfee;
pub const SINK: u64 = 0x1;
pub const UDC: u64 = 0xdc;

pub fn test_config() -> WalletConfig {
    let mut config = WalletConfig::default();
    config.account.address = felt(ACCOUNT);
    config.fee_token = felt(FEE_TOKEN);
    config.sink_address = felt(SINK);
    config.udc_address = felt(UDC);
    config.max_mint_chunk = eth(10);
    config.bridge = fast_bridge();
    config
}

pub fn fast_bridge() -> BridgeConfig {
    BridgeConfig {
        ack_timeout: Duration::from_millis(100),
        outcome_timeout: Duration::from_millis(500),
        ..BridgeConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockChain {
    pub balances: Mutex<HashMap<(Felt, Felt), U256>>,
    pub fee: Mutex<U256>,
    pub declared: Mutex<HashSet<Felt>>,
    pub classes: Mutex<HashMap<Felt, ContractClass>>,
    pub receipts: Mutex<HashMap<Felt, Receipt>>,
    pub inclusion_waits: Mutex<Vec<Felt>>,
    pub fee_estimates: Mutex<Vec<Vec<Call>>>,
    pub symbols: Mutex<HashMap<Felt, String>>,
    next_tx: Mutex<u64>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_balance(&self, token: u64, owner: u64, amount: U256) {
        self.balances
            .lock()
            .unwrap()
            .insert((felt(token), felt(owner)), amount);
    }

    pub fn balance(&self, token: u64, owner: u64) -> U256 {
        self.balances
            .lock()
            .unwrap()
            .get(&(felt(token), felt(owner)))
            .copied()
            .unwrap_or_default()
    }

    pub fn set_fee(&self, fee: U256) {
        *self.fee.lock().unwrap() = fee;
    }

    pub fn add_class(&self, class_hash: u64, abi: Value) {
        self.classes
            .lock()
            .unwrap()
            .insert(felt(class_hash), ContractClass { abi });
    }

    /// Deploy an ERC-20 class at `token` with the given symbol.
    pub fn add_erc20(&self, token: u64, symbol: &str) {
        self.add_class(
            token,
            serde_json::json!([
                {"type": "function", "name": "balanceOf", "inputs": [], "outputs": [], "stateMutability": "view"},
                {"type": "function", "name": "symbol", "inputs": [], "outputs": [], "stateMutability": "view"},
                {"type": "function", "name": "transfer", "inputs": [], "outputs": []}
            ]),
        );
        self.symbols
            .lock()
            .unwrap()
            .insert(felt(token), symbol.to_string());
    }

    fn credit(&self, token: Felt, owner: Felt, amount: U256) {
        let mut balances = self.balances.lock().unwrap();
        let entry = balances.entry((token, owner)).or_default();
        *entry += amount;
    }

    fn debit(&self, token: Felt, owner: Felt, amount: U256) -> Result<(), String> {
        let mut balances = self.balances.lock().unwrap();
        let entry = balances.entry((token, owner)).or_default();
        if *entry < amount {
            return Err(format!("balance {entry} below {amount}"));
        }
        *entry -= amount;
        Ok(())
    }

    /// Record an included transaction and return its hash.
    fn include(&self, events: Vec<Event>) -> Felt {
        let mut next = self.next_tx.lock().unwrap();
        *next += 1;
        let hash = felt(0x7000 + *next);
        self.receipts.lock().unwrap().insert(
            hash,
            Receipt {
                transaction_hash: hash,
                events,
            },
        );
        hash
    }
}

#[async_trait]
impl ChainProvider for MockChain {
    async fn get_class_at(&self, address: Felt) -> Result<ContractClass, WalletError> {
        self.get_class_by_hash(address).await
    }

    async fn get_class_by_hash(&self, class_hash: Felt) -> Result<ContractClass, WalletError> {
        self.classes
            .lock()
            .unwrap()
            .get(&class_hash)
            .cloned()
            .ok_or_else(|| WalletError::network(Stage::FetchInterface, "class not found"))
    }

    async fn is_class_declared(&self, class_hash: Felt) -> Result<bool, WalletError> {
        Ok(self.declared.lock().unwrap().contains(&class_hash))
    }

    async fn wait_for_inclusion(&self, transaction_hash: Felt) -> Result<Receipt, WalletError> {
        self.inclusion_waits.lock().unwrap().push(transaction_hash);
        self.receipts
            .lock()
            .unwrap()
            .get(&transaction_hash)
            .cloned()
            .ok_or_else(|| WalletError::network(Stage::AwaitInclusion, "unknown transaction"))
    }

    async fn estimate_fee(&self, _sender: Felt, calls: &[Call]) -> Result<U256, WalletError> {
        self.fee_estimates.lock().unwrap().push(calls.to_vec());
        Ok(*self.fee.lock().unwrap())
    }

    async fn balance_of(&self, token: Felt, owner: Felt) -> Result<U256, WalletError> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&(token, owner))
            .copied()
            .unwrap_or_default())
    }

    async fn token_symbol(&self, token: Felt) -> Result<String, WalletError> {
        self.symbols
            .lock()
            .unwrap()
            .get(&token)
            .cloned()
            .ok_or_else(|| WalletError::network(Stage::ReadBalance, "symbol() failed"))
    }
}

// ---------------------------------------------------------------------------
// Faucet
// ---------------------------------------------------------------------------

pub struct MockFaucet {
    chain: Arc<MockChain>,
    token: Felt,
    pub requests: Mutex<Vec<U256>>,
    /// Zero-based index of the request that fails, if any.
    fail_at: Option<usize>,
}

impl MockFaucet {
    pub fn new(chain: Arc<MockChain>) -> Arc<Self> {
        Self::failing_at(chain, None)
    }

    pub fn failing_at(chain: Arc<MockChain>, fail_at: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            chain,
            token: felt(FEE_TOKEN),
            requests: Mutex::new(Vec::new()),
            fail_at,
        })
    }

    pub fn requests(&self) -> Vec<U256> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Faucet for MockFaucet {
    async fn mint(&self, address: Felt, amount: U256) -> Result<(), WalletError> {
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(amount);
            requests.len() - 1
        };
        if self.fail_at == Some(index) {
            return Err(WalletError::network(Stage::Mint, "faucet unavailable"));
        }
        self.chain.credit(self.token, address, amount);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Signing authority
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Approve,
    Reject,
    /// Accepts every request but cannot carry it out.
    Fail,
}

/// Applies transfers and deployments to a [`MockChain`].
pub struct MockAuthority {
    chain: Arc<MockChain>,
    address: Felt,
    behavior: Behavior,
    pub executed: Mutex<Vec<Vec<Call>>>,
    pub declares: Mutex<usize>,
    /// Artificial latency before answering.
    pub delay: Duration,
}

impl MockAuthority {
    pub fn new(chain: Arc<MockChain>, behavior: Behavior) -> Arc<Self> {
        Self::with_delay(chain, behavior, Duration::ZERO)
    }

    pub fn with_delay(chain: Arc<MockChain>, behavior: Behavior, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            chain,
            address: felt(ACCOUNT),
            behavior,
            executed: Mutex::new(Vec::new()),
            declares: Mutex::new(0),
            delay,
        })
    }

    pub fn executed(&self) -> Vec<Vec<Call>> {
        self.executed.lock().unwrap().clone()
    }

    pub fn declare_count(&self) -> usize {
        *self.declares.lock().unwrap()
    }

    /// The error for a request this authority will not complete.
    fn refusal(&self) -> Option<AuthorityError> {
        match self.behavior {
            Behavior::Approve => None,
            Behavior::Reject => Some(AuthorityError::Rejected("User abort".into())),
            Behavior::Fail => Some(AuthorityError::Failed("node unreachable".into())),
        }
    }

    fn apply(&self, call: &Call) -> Result<Vec<Event>, AuthorityError> {
        match call.entrypoint.as_str() {
            "transfer" => {
                let [recipient, low, high] = call.calldata[..] else {
                    return Err(AuthorityError::Failed("bad transfer calldata".into()));
                };
                let amount = join_u256(low, high).map_err(AuthorityError::Failed)?;
                self.chain
                    .debit(call.contract_address, self.address, amount)
                    .map_err(AuthorityError::Failed)?;
                self.chain.credit(call.contract_address, recipient, amount);
                Ok(Vec::new())
            }
            "deployContract" => {
                let deployed = felt(0xd000 + call.calldata.len() as u64);
                Ok(vec![Event {
                    from_address: felt(UDC),
                    keys: vec![],
                    data: vec![deployed, self.address],
                }])
            }
            _ => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl SigningAuthority for MockAuthority {
    fn address(&self) -> Felt {
        self.address
    }

    async fn execute(
        &self,
        calls: &[Call],
        _options: &ExecuteOptions,
    ) -> Result<ExecuteResult, AuthorityError> {
        tokio::time::sleep(self.delay).await;
        if let Some(err) = self.refusal() {
            return Err(err);
        }
        self.executed.lock().unwrap().push(calls.to_vec());
        let mut events = Vec::new();
        for call in calls {
            events.extend(self.apply(call)?);
        }
        Ok(ExecuteResult {
            transaction_hash: self.chain.include(events),
        })
    }

    async fn declare(&self, payload: &DeclarePayload) -> Result<DeclareResult, AuthorityError> {
        tokio::time::sleep(self.delay).await;
        if let Some(err) = self.refusal() {
            return Err(err);
        }
        *self.declares.lock().unwrap() += 1;
        let class_hash = payload.class_hash.unwrap_or(felt(0xc1a55));
        if !self.chain.declared.lock().unwrap().insert(class_hash) {
            return Ok(DeclareResult::already_declared(class_hash));
        }
        Ok(DeclareResult {
            transaction_hash: Some(self.chain.include(Vec::new())),
            class_hash,
        })
    }

    async fn sign_message(
        &self,
        _typed_data: &Value,
        _options: &SignOptions,
    ) -> Result<Signature, AuthorityError> {
        tokio::time::sleep(self.delay).await;
        match self.refusal() {
            None => Ok(vec![felt(0x51), felt(0x52)]),
            Some(err) => Err(err),
        }
    }
}

/// A bridge account wired to a signer host that serves `authority`.
pub fn bridged_account(authority: Arc<dyn SigningAuthority>) -> Arc<BridgeAccount> {
    let (page, signer) = link_pair();
    let host = SignerHost::new(authority);
    tokio::spawn(async move { host.serve(signer).await });
    Arc::new(BridgeAccount::new(
        felt(ACCOUNT),
        MessageBridge::attach(page),
        fast_bridge(),
    ))
}
