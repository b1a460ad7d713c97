//! Multi-recipient payouts split into sequential, independently failing
//! batches.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::address::{OwnershipResolver, ShelleyResolver};
use crate::backend::{AutoBackend, TransactionBackend};
use crate::chain::{ChainIndexer, fetch_wallet_utxos};
use crate::coordinator::Wallet;
use crate::error::{Error, Result};
use crate::filter::filter_owned_utxos;
use crate::params::ProtocolParams;
use crate::value::{AssetUnit, Quantity, RecipientOutput};

/// Recipients per transaction. Forty base-address outputs stay well under a
/// 16 KiB transaction.
pub const DEFAULT_CHUNK_SIZE: usize = 40;
/// Pause between batches so the previous batch's change is visible to the
/// indexer before the next selection.
pub const DEFAULT_INTER_BATCH_DELAY: Duration = Duration::from_secs(20);

const CANCEL_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    pub chunk_size: usize,
    pub inter_batch_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            inter_batch_delay: DEFAULT_INTER_BATCH_DELAY,
        }
    }
}

/// Cooperative cancellation, checked between batches only. A batch already
/// being submitted always runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early on cancellation. Returns whether
    /// the flag was raised.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(CANCEL_POLL.min(deadline - now));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSendResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub recipient_count: usize,
    pub batch_index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiSendResult {
    pub total_recipients: usize,
    pub total_batches: usize,
    pub successful_batches: usize,
    pub failed_batches: usize,
    /// Set when the caller abandoned the job before every batch ran.
    pub cancelled: bool,
    pub results: Vec<BatchSendResult>,
}

impl MultiSendResult {
    /// Collapse into an error when any batch failed.
    pub fn into_result(self) -> Result<Self> {
        if self.failed_batches > 0 {
            return Err(Error::PartialBatchFailure {
                failed: self.failed_batches,
                total: self.total_batches,
            });
        }
        Ok(self)
    }
}

/// Structural checks on a payout list. Pure; an empty result means valid.
pub fn validate_recipients(recipients: &[RecipientOutput]) -> Vec<String> {
    let mut errors = Vec::new();
    if recipients.is_empty() {
        errors.push("no recipients".to_string());
        return errors;
    }
    let mut first_seen: HashMap<&str, usize> = HashMap::new();
    for (i, r) in recipients.iter().enumerate() {
        let address = r.address.trim();
        if address.is_empty() {
            errors.push(format!("recipient {i}: empty address"));
        } else if let Some(first) = first_seen.insert(address, i) {
            errors.push(format!(
                "recipient {i}: duplicate address {address} (first at recipient {first})"
            ));
            first_seen.insert(address, first);
        }

        if r.assets.is_empty() {
            errors.push(format!("recipient {i}: no assets"));
            continue;
        }
        for asset in &r.assets {
            if let Err(e) = asset.unit.parse::<AssetUnit>() {
                errors.push(format!("recipient {i}: {e}"));
            }
            match asset.quantity.parse::<Quantity>() {
                Ok(q) if q.is_zero() => {
                    errors.push(format!("recipient {i}: {} quantity must be positive", asset.unit))
                }
                Ok(_) => {}
                Err(e) => errors.push(format!("recipient {i}: {e}")),
            }
        }
    }
    errors
}

pub struct BatchSender {
    indexer: Arc<dyn ChainIndexer>,
    resolver: Arc<dyn OwnershipResolver>,
    backend: Box<dyn TransactionBackend>,
    params: ProtocolParams,
    config: BatchConfig,
    cancel: CancelFlag,
}

impl BatchSender {
    pub fn new(indexer: Arc<dyn ChainIndexer>, params: ProtocolParams, config: BatchConfig) -> Self {
        Self {
            indexer,
            resolver: Arc::new(ShelleyResolver),
            backend: Box::new(AutoBackend::new(params.clone())),
            params,
            config,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn OwnershipResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_backend(mut self, backend: Box<dyn TransactionBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Pay every recipient, one transaction per chunk.
    ///
    /// Invalid input is rejected up front. After that the job only returns
    /// `Ok`: each chunk's outcome is in `results`, and a failed chunk never
    /// stops the ones after it.
    pub fn send_batched(
        &mut self,
        wallet: &Wallet,
        recipients: &[RecipientOutput],
        mut on_batch_complete: impl FnMut(&BatchSendResult),
    ) -> Result<MultiSendResult> {
        let errors = validate_recipients(recipients);
        if !errors.is_empty() {
            return Err(Error::InvalidRecipient(errors));
        }
        let change = wallet
            .addresses
            .change_address()
            .ok_or(Error::NoChangeAddress)?
            .to_string();

        let chunks: Vec<&[RecipientOutput]> =
            recipients.chunks(self.config.chunk_size.max(1)).collect();
        let mut summary = MultiSendResult {
            total_recipients: recipients.len(),
            total_batches: chunks.len(),
            ..Default::default()
        };
        log::info!(
            "sending to {} recipients in {} batches",
            summary.total_recipients,
            summary.total_batches
        );

        for (batch_index, chunk) in chunks.into_iter().enumerate() {
            if batch_index > 0 && self.cancel.sleep(self.config.inter_batch_delay) {
                log::info!("batch send cancelled before batch {batch_index}");
                summary.cancelled = true;
                break;
            }

            let result = match self.send_chunk(wallet, &change, chunk) {
                Ok(tx_hash) => {
                    log::info!("batch {batch_index} submitted: {tx_hash}");
                    summary.successful_batches += 1;
                    BatchSendResult {
                        success: true,
                        tx_hash: Some(tx_hash),
                        error: None,
                        recipient_count: chunk.len(),
                        batch_index,
                    }
                }
                Err(e) => {
                    log::warn!("batch {batch_index} failed: {e}");
                    summary.failed_batches += 1;
                    BatchSendResult {
                        success: false,
                        tx_hash: None,
                        error: Some(e.to_string()),
                        recipient_count: chunk.len(),
                        batch_index,
                    }
                }
            };
            on_batch_complete(&result);
            summary.results.push(result);
        }

        Ok(summary)
    }

    fn send_chunk(
        &mut self,
        wallet: &Wallet,
        change: &str,
        chunk: &[RecipientOutput],
    ) -> Result<String> {
        let reported =
            fetch_wallet_utxos(self.indexer.as_ref(), &wallet.addresses.payment_addresses())?;
        if reported.is_empty() {
            return Err(Error::NoUtxosAvailable);
        }
        let owned = filter_owned_utxos(&reported, &wallet.addresses, self.resolver.as_ref())
            .require_non_empty()?;

        self.backend.reset();
        for recipient in chunk {
            let mut value = recipient.value()?;
            let min = Quantity::from(self.params.min_lovelace_for(&value));
            if value.coin() < min {
                let top_up = min.saturating_sub(&value.coin());
                log::debug!("topping up output to {} by {top_up} lovelace", recipient.address);
                value.add(AssetUnit::Lovelace, top_up);
            }
            self.backend.add_output(&recipient.address, &value)?;
        }
        self.backend.set_change_address(change)?;
        self.backend.select_inputs(&owned.owned)?;
        let draft = self.backend.complete()?;
        let signed = wallet.signer.sign(&draft, false)?;
        self.indexer.submit(&signed.cbor)
    }
}
