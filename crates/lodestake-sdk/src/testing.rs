//! In-memory collaborators and fixtures for exercising the engine without a
//! network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::address::{KeyHash, base_address, reward_address};
use crate::backend::{TransactionBackend, TransactionDraft};
use crate::certificate::NormalizedTarget;
use crate::chain::{AccountStatus, ChainIndexer, HandleRegistry};
use crate::coordinator::Wallet;
use crate::error::{Error, Result};
use crate::filter::WalletAddresses;
use crate::keys::{SignedTransaction, SigningContext, TxSigner};
use crate::network::Network;
use crate::tx::encode_transaction;
use crate::value::{RecipientOutput, UnspentOutput, Value};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A wallet with one base address, its reward address and matching keys.
pub struct TestWallet {
    pub network: Network,
    pub context: SigningContext,
    pub address: String,
    pub reward: String,
}

impl TestWallet {
    pub fn new(seed: u8, network: Network) -> Self {
        let context = SigningContext::from_keys([seed; 32], [seed.wrapping_add(1); 32]);
        let address = base_address(network, &context.payment_key_hash(), &context.stake_key_hash())
            .expect("fixture address encodes");
        let reward = reward_address(network, &context.stake_key_hash())
            .expect("fixture reward address encodes");
        Self {
            network,
            context,
            address,
            reward,
        }
    }

    pub fn addresses(&self) -> WalletAddresses {
        WalletAddresses {
            used: vec![self.address.clone()],
            unused: vec![],
            change: Some(self.address.clone()),
            reward: Some(self.reward.clone()),
        }
    }

    pub fn wallet(&self) -> Wallet {
        Wallet::new(self.addresses(), Arc::new(self.context.key_store()))
    }

    pub fn utxo(&self, index: u32, lovelace: u64) -> UnspentOutput {
        utxo_at(&self.address, index, lovelace)
    }
}

/// A pure-lovelace UTXO with a tx hash derived from `index`.
pub fn utxo_at(address: &str, index: u32, lovelace: u64) -> UnspentOutput {
    UnspentOutput {
        tx_hash: format!("{:064x}", u64::from(index) + 1),
        output_index: index,
        address: address.to_string(),
        value: Value::lovelace(lovelace),
    }
}

/// An address owned by nobody in the tests.
pub fn foreign_address(seed: u8, network: Network) -> String {
    base_address(network, &KeyHash([seed; 28]), &KeyHash([seed.wrapping_add(1); 28]))
        .expect("fixture address encodes")
}

/// `count` lovelace-only recipients at distinct addresses.
pub fn recipients(count: usize, lovelace: u64, network: Network) -> Vec<RecipientOutput> {
    (0..count)
        .map(|i| {
            let mut payment = [0x80u8; 28];
            payment[..8].copy_from_slice(&(i as u64).to_be_bytes());
            let addr = base_address(network, &KeyHash(payment), &KeyHash([0x81; 28]))
                .expect("fixture address encodes");
            RecipientOutput::lovelace(addr, lovelace)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// MockIndexer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct IndexerState {
    utxos: HashMap<String, Vec<UnspentOutput>>,
    active: HashMap<String, bool>,
    submitted: Vec<Vec<u8>>,
    submit_failures: HashMap<usize, String>,
    submit_calls: usize,
    utxo_calls: usize,
}

/// Indexer backed by in-memory maps. Submissions are recorded; failures are
/// scripted per submit call (0-based).
#[derive(Default, Clone)]
pub struct MockIndexer {
    state: Arc<Mutex<IndexerState>>,
}

impl MockIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexerState> {
        self.state.lock().expect("mock indexer lock")
    }

    pub fn add_utxo(&self, utxo: UnspentOutput) {
        self.lock()
            .utxos
            .entry(utxo.address.clone())
            .or_default()
            .push(utxo);
    }

    /// Report `utxo` when `queried` is asked for, whatever its own address.
    pub fn add_utxo_at(&self, queried: &str, utxo: UnspentOutput) {
        self.lock()
            .utxos
            .entry(queried.to_string())
            .or_default()
            .push(utxo);
    }

    pub fn set_active(&self, reward_address: &str, active: bool) {
        self.lock().active.insert(reward_address.to_string(), active);
    }

    pub fn fail_submit(&self, call: usize, message: impl Into<String>) {
        self.lock().submit_failures.insert(call, message.into());
    }

    pub fn submitted(&self) -> Vec<Vec<u8>> {
        self.lock().submitted.clone()
    }

    pub fn submit_calls(&self) -> usize {
        self.lock().submit_calls
    }

    pub fn utxo_calls(&self) -> usize {
        self.lock().utxo_calls
    }
}

impl ChainIndexer for MockIndexer {
    fn utxos(&self, address: &str) -> Result<Vec<UnspentOutput>> {
        let mut state = self.lock();
        state.utxo_calls += 1;
        Ok(state.utxos.get(address).cloned().unwrap_or_default())
    }

    fn account_status(&self, reward_address: &str) -> Result<AccountStatus> {
        Ok(AccountStatus {
            active: self.lock().active.get(reward_address).copied().unwrap_or(false),
            ..Default::default()
        })
    }

    fn submit(&self, tx_cbor: &[u8]) -> Result<String> {
        let mut state = self.lock();
        let call = state.submit_calls;
        state.submit_calls += 1;
        if let Some(message) = state.submit_failures.get(&call) {
            return Err(Error::Submit(message.clone()));
        }
        state.submitted.push(tx_cbor.to_vec());
        Ok(format!("{:064x}", call + 1))
    }
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// A backend whose `complete` always fails.
#[derive(Default, Clone)]
pub struct FailingBackend {
    completions: Arc<AtomicUsize>,
}

impl FailingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completions(&self) -> Arc<AtomicUsize> {
        self.completions.clone()
    }
}

impl TransactionBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn reset(&mut self) {}

    fn register_stake(&mut self, _stake: &KeyHash) -> Result<()> {
        Ok(())
    }

    fn delegate(&mut self, _stake: &KeyHash, _target: &NormalizedTarget) -> Result<()> {
        Ok(())
    }

    fn add_output(&mut self, _address: &str, _value: &Value) -> Result<()> {
        Ok(())
    }

    fn set_change_address(&mut self, _address: &str) -> Result<()> {
        Ok(())
    }

    fn select_inputs(&mut self, _available: &[UnspentOutput]) -> Result<()> {
        Ok(())
    }

    fn complete(&mut self) -> Result<TransactionDraft> {
        self.completions.fetch_add(1, Ordering::SeqCst);
        Err(Error::build("failing", "cannot balance this UTXO shape"))
    }
}

/// Wraps a backend and records every call made on it, in order.
pub struct RecordingBackend<B> {
    inner: B,
    calls: Arc<Mutex<Vec<String>>>,
}

impl<B: TransactionBackend> RecordingBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the call log, usable after the backend is boxed.
    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        self.calls.clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().expect("call log lock").push(call.into());
    }
}

impl<B: TransactionBackend> TransactionBackend for RecordingBackend<B> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn reset(&mut self) {
        self.record("reset");
        self.inner.reset();
    }

    fn register_stake(&mut self, stake: &KeyHash) -> Result<()> {
        self.record("register_stake");
        self.inner.register_stake(stake)
    }

    fn delegate(&mut self, stake: &KeyHash, target: &NormalizedTarget) -> Result<()> {
        self.record("delegate");
        self.inner.delegate(stake, target)
    }

    fn add_output(&mut self, address: &str, value: &Value) -> Result<()> {
        self.record("add_output");
        self.inner.add_output(address, value)
    }

    fn set_change_address(&mut self, address: &str) -> Result<()> {
        self.record("set_change_address");
        self.inner.set_change_address(address)
    }

    fn select_inputs(&mut self, available: &[UnspentOutput]) -> Result<()> {
        self.record(format!("select_inputs:{}", available.len()));
        self.inner.select_inputs(available)
    }

    fn complete(&mut self) -> Result<TransactionDraft> {
        self.record("complete");
        self.inner.complete()
    }
}

/// Count of `name` entries in a call log.
pub fn count_calls(calls: &Mutex<Vec<String>>, name: &str) -> usize {
    calls
        .lock()
        .expect("call log lock")
        .iter()
        .filter(|c| c.as_str() == name)
        .count()
}

// ---------------------------------------------------------------------------
// Signers and registries
// ---------------------------------------------------------------------------

/// Signer that attaches no witnesses, or fails when told to.
#[derive(Default, Clone)]
pub struct StaticSigner {
    pub fail_with: Option<String>,
}

impl TxSigner for StaticSigner {
    fn sign(&self, draft: &TransactionDraft, _partial: bool) -> Result<SignedTransaction> {
        if let Some(message) = &self.fail_with {
            return Err(Error::Signer(message.clone()));
        }
        Ok(SignedTransaction {
            tx_hash: draft.tx_hash_hex(),
            cbor: encode_transaction(&draft.body_cbor, &[])?,
        })
    }
}

#[derive(Default, Clone)]
pub struct MockRegistry {
    holders: Arc<Mutex<HashMap<String, Vec<String>>>>,
    lookups: Arc<AtomicUsize>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: &str, holders: Vec<String>) {
        self.holders
            .lock()
            .expect("registry lock")
            .insert(handle.to_string(), holders);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl HandleRegistry for MockRegistry {
    fn handle_holders(&self, handle: &str) -> Result<Vec<String>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .holders
            .lock()
            .expect("registry lock")
            .get(handle)
            .cloned()
            .unwrap_or_default())
    }
}
