//! Delegation with a primary backend and a manual fallback.
//!
//! ```text
//! preflight ──fail──▶ Failed(empty debug)
//!     │
//!     ▼
//! primary: fetch → filter → status → build → sign(partial) → submit ──ok──▶ Success
//!     │ fail
//!     ├── fallback disabled ─────────────────────────────────────────────▶ Failed(primary)
//!     ▼
//! secondary: fetch → filter → pick one input → manual build → witness → submit
//!     ├── ok ───▶ Success({primary, secondary})
//!     └── fail ─▶ Failed({primary, secondary})
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use crate::address::{OwnershipResolver, ShelleyResolver, network_id_of};
use crate::backend::{AutoBackend, ManualBackend, TransactionBackend};
use crate::builder::{build_delegation, pick_single_input};
use crate::certificate::DelegationTarget;
use crate::chain::{ChainIndexer, fetch_wallet_utxos};
use crate::diagnostics::{RegexWitnessMapper, WitnessMapper};
use crate::error::{Error, Result};
use crate::filter::{OwnedUtxoSet, WalletAddresses, filter_owned_utxos};
use crate::keys::{SignedTransaction, SigningContext, TxSigner};
use crate::network::Network;
use crate::params::ProtocolParams;
use crate::submission::{DebugInfo, SubmissionDebug, SubmissionResult};
use crate::value::UnspentOutput;

/// A wallet handle: its addresses and something that can sign for them.
#[derive(Clone)]
pub struct Wallet {
    pub addresses: WalletAddresses,
    pub signer: Arc<dyn TxSigner>,
}

impl Wallet {
    pub fn new(addresses: WalletAddresses, signer: Arc<dyn TxSigner>) -> Self {
        Self { addresses, signer }
    }
}

struct Preflight<'a> {
    change: &'a str,
    reward: &'a str,
}

pub struct DelegationCoordinator {
    indexer: Arc<dyn ChainIndexer>,
    resolver: Arc<dyn OwnershipResolver>,
    mapper: Arc<dyn WitnessMapper>,
    primary: Box<dyn TransactionBackend>,
    secondary: Box<dyn TransactionBackend>,
    network: Network,
    params: ProtocolParams,
}

impl DelegationCoordinator {
    pub fn new(indexer: Arc<dyn ChainIndexer>, network: Network, params: ProtocolParams) -> Self {
        Self {
            indexer,
            resolver: Arc::new(ShelleyResolver),
            mapper: Arc::new(RegexWitnessMapper::default()),
            primary: Box::new(AutoBackend::new(params.clone())),
            secondary: Box::new(ManualBackend::new(params.clone())),
            network,
            params,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn OwnershipResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn WitnessMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_backends(
        mut self,
        primary: Box<dyn TransactionBackend>,
        secondary: Box<dyn TransactionBackend>,
    ) -> Self {
        self.primary = primary;
        self.secondary = secondary;
        self
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Delegate the wallet's reward account to `target`.
    ///
    /// Always resolves to a [`SubmissionResult`]; `signing` is only used by
    /// the fallback tier.
    pub fn delegate(
        &mut self,
        wallet: &Wallet,
        signing: Option<&SigningContext>,
        target: &DelegationTarget,
        allow_fallback: bool,
    ) -> SubmissionResult {
        let pre = match self.preflight(&wallet.addresses, target) {
            Ok(pre) => pre,
            Err(e) => {
                log::warn!("delegation rejected before submission: {e}");
                return SubmissionResult::failed(&e, SubmissionDebug::Single(DebugInfo::default()));
            }
        };

        let mut primary_debug = DebugInfo::for_backend(self.primary.name());
        log::info!("delegating via {} backend to {}", self.primary.name(), target.id());
        let primary_err = match self.attempt_primary(wallet, &pre, target, &mut primary_debug) {
            Ok(tx_hash) => {
                log::info!("delegation submitted: {tx_hash}");
                return SubmissionResult::succeeded(tx_hash, primary_debug);
            }
            Err(e) => e,
        };
        primary_debug.record_error(&primary_err);

        if !allow_fallback || primary_err.is_preflight() {
            log::warn!("{} backend failed: {primary_err}", self.primary.name());
            return SubmissionResult::failed(&primary_err, SubmissionDebug::Single(primary_debug));
        }

        log::warn!(
            "{} backend failed ({primary_err}), falling back to {}",
            self.primary.name(),
            self.secondary.name()
        );
        // Inputs the node already refused to accept without witnesses.
        let avoid: HashSet<String> = match &primary_err {
            Error::MissingWitnessSubmitFailure { diagnosis, .. } => diagnosis
                .offending_utxos
                .iter()
                .map(UnspentOutput::outpoint)
                .collect(),
            _ => HashSet::new(),
        };

        let mut secondary_debug = DebugInfo::for_backend(self.secondary.name());
        let outcome = self.attempt_secondary(wallet, signing, &pre, target, &avoid, &mut secondary_debug);
        match outcome {
            Ok(tx_hash) => {
                log::info!("delegation submitted via {}: {tx_hash}", self.secondary.name());
                SubmissionResult {
                    success: true,
                    tx_hash: Some(tx_hash),
                    error: None,
                    debug: SubmissionDebug::Fallback {
                        primary: primary_debug,
                        secondary: secondary_debug,
                    },
                }
            }
            Err(e) => {
                secondary_debug.record_error(&e);
                log::warn!("{} backend failed: {e}", self.secondary.name());
                SubmissionResult::failed(
                    &e,
                    SubmissionDebug::Fallback {
                        primary: primary_debug,
                        secondary: secondary_debug,
                    },
                )
            }
        }
    }

    fn preflight<'a>(
        &self,
        addresses: &'a WalletAddresses,
        target: &DelegationTarget,
    ) -> Result<Preflight<'a>> {
        let change = addresses.change_address().ok_or(Error::NoChangeAddress)?;
        let reward = addresses.reward_address().ok_or(Error::NoRewardAddress)?;
        target.normalize()?;
        let id = network_id_of(reward)?;
        if id != self.network.network_id() {
            return Err(Error::InvalidAddress(format!(
                "reward address {reward} is not on {}",
                self.network
            )));
        }
        Ok(Preflight { change, reward })
    }

    fn snapshot(&self, addresses: &WalletAddresses, debug: &mut DebugInfo) -> Result<OwnedUtxoSet> {
        let reported = fetch_wallet_utxos(self.indexer.as_ref(), &addresses.payment_addresses())?;
        if reported.is_empty() {
            return Err(Error::NoUtxosAvailable);
        }
        let owned = filter_owned_utxos(&reported, addresses, self.resolver.as_ref());
        debug.record_filter(&owned);
        owned.require_non_empty()
    }

    fn attempt_primary(
        &mut self,
        wallet: &Wallet,
        pre: &Preflight<'_>,
        target: &DelegationTarget,
        debug: &mut DebugInfo,
    ) -> Result<String> {
        let owned = self.snapshot(&wallet.addresses, debug)?;
        let status = self.indexer.account_status(pre.reward)?;
        let draft = build_delegation(
            self.primary.as_mut(),
            &owned.owned,
            pre.change,
            pre.reward,
            target,
            status.active,
        )?;
        let signed = wallet.signer.sign(&draft, true)?;
        self.submit(&signed, &draft.inputs)
    }

    fn attempt_secondary(
        &mut self,
        wallet: &Wallet,
        signing: Option<&SigningContext>,
        pre: &Preflight<'_>,
        target: &DelegationTarget,
        avoid: &HashSet<String>,
        debug: &mut DebugInfo,
    ) -> Result<String> {
        let ctx = signing
            .ok_or_else(|| Error::Signer("no signing context for the fallback backend".into()))?;
        let owned = self.snapshot(&wallet.addresses, debug)?;
        let usable: Vec<UnspentOutput> = owned
            .owned
            .into_iter()
            .filter(|u| !avoid.contains(&u.outpoint()))
            .collect();
        let input = pick_single_input(&usable, &self.params)
            .cloned()
            .ok_or(Error::NoUtxosAvailable)?;
        let status = self.indexer.account_status(pre.reward)?;
        let draft = build_delegation(
            self.secondary.as_mut(),
            std::slice::from_ref(&input),
            pre.change,
            pre.reward,
            target,
            status.active,
        )?;
        log::info!("{} body hash {}", self.secondary.name(), draft.tx_hash_hex());
        let signed = ctx.witness(&draft, self.resolver.as_ref())?;
        self.submit(&signed, &draft.inputs)
    }

    /// Submit once. A rejection that reads as missing witnesses is mapped
    /// back to the inputs responsible.
    fn submit(&self, signed: &SignedTransaction, candidates: &[UnspentOutput]) -> Result<String> {
        match self.indexer.submit(&signed.cbor) {
            Ok(tx_hash) => Ok(tx_hash),
            Err(e) => {
                let text = match &e {
                    Error::Submit(raw) => raw.clone(),
                    other => other.to_string(),
                };
                if !self.mapper.is_missing_witness(&text) {
                    return Err(e);
                }
                let diagnosis =
                    self.mapper
                        .map_missing_witnesses(&text, candidates, self.resolver.as_ref());
                Err(Error::MissingWitnessSubmitFailure {
                    message: text,
                    diagnosis,
                })
            }
        }
    }
}
