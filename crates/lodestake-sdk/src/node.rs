//! `LodestakeNode`: async facade over the blocking engine.
//!
//! Engine calls run on `tokio::task::spawn_blocking`. Every build → sign →
//! submit sequence for one wallet holds that wallet's async lock for its
//! whole duration, so two drafts never select the same inputs. Read-only
//! calls (UTXO snapshots, handle lookups) take no lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::address::ShelleyResolver;
use crate::batch::{BatchConfig, BatchSendResult, BatchSender, CancelFlag, MultiSendResult};
use crate::certificate::DelegationTarget;
use crate::chain::{ChainIndexer, HandleRegistry, fetch_wallet_utxos};
use crate::coordinator::{DelegationCoordinator, Wallet};
use crate::error::{Error, NodeError};
use crate::filter::{OwnedUtxoSet, WalletAddresses, filter_owned_utxos};
use crate::handle::HandleResolver;
use crate::keys::SigningContext;
use crate::network::Network;
use crate::params::ProtocolParams;
use crate::submission::SubmissionResult;
use crate::value::RecipientOutput;

type WalletLock = Arc<tokio::sync::Mutex<()>>;

pub struct LodestakeNode {
    indexer: Arc<dyn ChainIndexer>,
    registry: Option<Arc<dyn HandleRegistry>>,
    network: Network,
    params: ProtocolParams,
    batch: BatchConfig,
    wallet_locks: Mutex<HashMap<String, WalletLock>>,
}

// ── Construction ────────────────────────────────────────────────────────

impl LodestakeNode {
    pub fn new(
        indexer: Arc<dyn ChainIndexer>,
        network: Network,
        params: ProtocolParams,
        batch: BatchConfig,
    ) -> Self {
        Self {
            indexer,
            registry: None,
            network,
            params,
            batch,
            wallet_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn HandleRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn network(&self) -> Network {
        self.network
    }

    // ── Internal ────────────────────────────────────────────────────────

    /// The write lock for the wallet spending from `addresses`, keyed on its
    /// change address. A wallet without one gets no lock: both write paths
    /// reject it before touching the indexer. Locks nobody holds are dropped.
    fn lock_for(&self, addresses: &WalletAddresses) -> Result<Option<WalletLock>, NodeError> {
        let Some(key) = addresses.change_address() else {
            return Ok(None);
        };
        let mut locks = self
            .wallet_locks
            .lock()
            .map_err(|_| NodeError::MutexPoisoned)?;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(Some(locks.entry(key.to_string()).or_default().clone()))
    }

    async fn blocking<F, R>(f: F) -> Result<R, NodeError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| NodeError::Task(e.to_string()))
    }

    // ── Writes ──────────────────────────────────────────────────────────

    /// Delegate the wallet's stake. Resolves to a result value even when the
    /// delegation fails; `Err` is reserved for task failures.
    pub async fn delegate(
        &self,
        wallet: Wallet,
        signing: Option<SigningContext>,
        target: DelegationTarget,
        allow_fallback: bool,
    ) -> Result<SubmissionResult, NodeError> {
        let lock = self.lock_for(&wallet.addresses)?;
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        let indexer = self.indexer.clone();
        let network = self.network;
        let params = self.params.clone();
        Self::blocking(move || {
            let mut coordinator = DelegationCoordinator::new(indexer, network, params);
            coordinator.delegate(&wallet, signing.as_ref(), &target, allow_fallback)
        })
        .await
    }

    /// Pay `recipients` in batches. `cancel` is honoured between batches.
    pub async fn send_batched<F>(
        &self,
        wallet: Wallet,
        recipients: Vec<RecipientOutput>,
        cancel: CancelFlag,
        on_batch_complete: F,
    ) -> Result<MultiSendResult, NodeError>
    where
        F: FnMut(&BatchSendResult) + Send + 'static,
    {
        let lock = self.lock_for(&wallet.addresses)?;
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        let indexer = self.indexer.clone();
        let params = self.params.clone();
        let config = self.batch.clone();
        Self::blocking(move || {
            BatchSender::new(indexer, params, config)
                .with_cancel_flag(cancel)
                .send_batched(&wallet, &recipients, on_batch_complete)
        })
        .await?
        .map_err(NodeError::Sdk)
    }

    // ── Reads ───────────────────────────────────────────────────────────

    pub async fn owned_utxos(&self, addresses: WalletAddresses) -> Result<OwnedUtxoSet, NodeError> {
        let indexer = self.indexer.clone();
        Self::blocking(move || {
            let reported = fetch_wallet_utxos(indexer.as_ref(), &addresses.payment_addresses())?;
            Ok::<_, Error>(filter_owned_utxos(&reported, &addresses, &ShelleyResolver))
        })
        .await?
        .map_err(NodeError::Sdk)
    }

    pub async fn resolve_handles(
        &self,
        handles: Vec<String>,
    ) -> Result<Vec<(String, Result<String, Error>)>, NodeError> {
        let registry = self.registry.clone().ok_or(NodeError::NoHandleRegistry)?;
        Self::blocking(move || HandleResolver::new(registry).resolve_many(&handles)).await
    }

    pub async fn resolve_recipients(
        &self,
        recipients: Vec<RecipientOutput>,
    ) -> Result<Vec<RecipientOutput>, NodeError> {
        let registry = self.registry.clone().ok_or(NodeError::NoHandleRegistry)?;
        Self::blocking(move || HandleResolver::new(registry).resolve_recipients(&recipients))
            .await?
            .map_err(NodeError::Sdk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockIndexer, TestWallet};

    fn node(indexer: &MockIndexer) -> LodestakeNode {
        LodestakeNode::new(
            Arc::new(indexer.clone()),
            Network::Preprod,
            ProtocolParams::default(),
            BatchConfig::default(),
        )
    }

    fn pool() -> DelegationTarget {
        DelegationTarget::Pool(hex::encode([0x52u8; 28]))
    }

    #[tokio::test]
    async fn idle_wallet_locks_are_dropped() {
        let indexer = MockIndexer::new();
        let first = TestWallet::new(3, Network::Preprod);
        let second = TestWallet::new(4, Network::Preprod);
        indexer.add_utxo(first.utxo(0, 20_000_000));
        indexer.add_utxo(second.utxo(1, 20_000_000));
        let node = node(&indexer);

        for tw in [&first, &second] {
            let result = node
                .delegate(tw.wallet(), Some(tw.context.clone()), pool(), false)
                .await
                .unwrap();
            assert!(result.success, "{:?}", result.error);
        }
        let locks = node.wallet_locks.lock().unwrap();
        assert_eq!(locks.len(), 1);
        assert!(locks.contains_key(&second.address));
    }

    #[tokio::test]
    async fn wallet_without_change_address_takes_no_lock() {
        let indexer = MockIndexer::new();
        let tw = TestWallet::new(5, Network::Preprod);
        let node = node(&indexer);
        let wallet = Wallet::new(
            WalletAddresses {
                reward: Some(tw.reward.clone()),
                ..Default::default()
            },
            Arc::new(tw.context.key_store()),
        );

        let result = node
            .delegate(wallet, Some(tw.context.clone()), pool(), true)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("wallet has no change address"));
        assert_eq!(indexer.utxo_calls(), 0);
        assert!(node.wallet_locks.lock().unwrap().is_empty());
    }
}
