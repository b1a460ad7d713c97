//! Ownership filtering of indexer-reported UTXOs.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::address::{KeyHash, OwnershipResolver, wallet_key_set};
use crate::error::{Error, Result};
use crate::value::UnspentOutput;

/// The address lists a wallet knows about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAddresses {
    #[serde(default)]
    pub used: Vec<String>,
    #[serde(default)]
    pub unused: Vec<String>,
    #[serde(default)]
    pub change: Option<String>,
    #[serde(default)]
    pub reward: Option<String>,
}

impl WalletAddresses {
    /// Every known address, deduplicated, first occurrence wins.
    pub fn all(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.used
            .iter()
            .chain(self.unused.iter())
            .chain(self.change.iter())
            .chain(self.reward.iter())
            .filter(|a| !a.is_empty() && seen.insert(a.as_str()))
            .cloned()
            .collect()
    }

    /// Addresses that can hold spendable outputs (everything except reward).
    pub fn payment_addresses(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.used
            .iter()
            .chain(self.unused.iter())
            .chain(self.change.iter())
            .filter(|a| !a.is_empty() && seen.insert(a.as_str()))
            .cloned()
            .collect()
    }

    /// Explicit change address, else the first used, else the first unused.
    pub fn change_address(&self) -> Option<&str> {
        self.change
            .as_deref()
            .or_else(|| self.used.first().map(String::as_str))
            .or_else(|| self.unused.first().map(String::as_str))
            .filter(|a| !a.is_empty())
    }

    pub fn reward_address(&self) -> Option<&str> {
        self.reward.as_deref().filter(|a| !a.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    NoAddress,
    UnresolvedFingerprint,
    FingerprintMismatch,
    /// Matched a wallet address literally, but none of the wallet's
    /// addresses yields a key to sign with.
    NoWalletKeys,
}

/// A reported UTXO the wallet cannot sign for, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedUtxo {
    pub utxo: UnspentOutput,
    pub address: String,
    pub resolved_fingerprint: Option<String>,
    pub reason: ExclusionReason,
}

#[derive(Debug, Clone, Default)]
pub struct OwnedUtxoSet {
    pub owned: Vec<UnspentOutput>,
    pub excluded: Vec<ExcludedUtxo>,
    pub key_set: BTreeSet<KeyHash>,
}

impl OwnedUtxoSet {
    /// Fail with the full exclusion log when nothing is spendable. A wallet
    /// with no resolvable key cannot sign, so its literal matches are moved
    /// into the log as well.
    pub fn require_non_empty(self) -> Result<Self> {
        if self.key_set.is_empty() {
            let mut excluded = self.excluded;
            excluded.extend(self.owned.into_iter().map(|utxo| ExcludedUtxo {
                address: utxo.address.clone(),
                utxo,
                resolved_fingerprint: None,
                reason: ExclusionReason::NoWalletKeys,
            }));
            return Err(Error::NoOwnedUtxos { excluded });
        }
        if self.owned.is_empty() {
            return Err(Error::NoOwnedUtxos {
                excluded: self.excluded,
            });
        }
        Ok(self)
    }

    pub fn key_fingerprints(&self) -> Vec<String> {
        self.key_set.iter().map(KeyHash::to_hex).collect()
    }
}

/// Keep the reported UTXOs whose address resolves to one of the wallet's
/// key fingerprints, or is literally one of the wallet's addresses.
pub fn filter_owned_utxos(
    reported: &[UnspentOutput],
    addresses: &WalletAddresses,
    resolver: &dyn OwnershipResolver,
) -> OwnedUtxoSet {
    let wallet = addresses.all();
    let key_set = wallet_key_set(resolver, &wallet);
    let literal: HashSet<&str> = wallet.iter().map(String::as_str).collect();

    let mut owned = Vec::new();
    let mut excluded = Vec::new();

    for utxo in reported {
        if utxo.address.is_empty() {
            excluded.push(ExcludedUtxo {
                utxo: utxo.clone(),
                address: String::new(),
                resolved_fingerprint: None,
                reason: ExclusionReason::NoAddress,
            });
            continue;
        }

        let resolved = resolver.fingerprint_of(&utxo.address).ok();
        let owns_key = resolved.as_ref().is_some_and(|kh| key_set.contains(kh));
        if owns_key || literal.contains(utxo.address.as_str()) {
            owned.push(utxo.clone());
            continue;
        }

        let reason = if resolved.is_some() {
            ExclusionReason::FingerprintMismatch
        } else {
            ExclusionReason::UnresolvedFingerprint
        };
        log::debug!(
            "excluding {} at {}: {:?} (fingerprint {:?})",
            utxo.outpoint(),
            utxo.address,
            reason,
            resolved.map(|k| k.to_hex())
        );
        excluded.push(ExcludedUtxo {
            utxo: utxo.clone(),
            address: utxo.address.clone(),
            resolved_fingerprint: resolved.map(|k| k.to_hex()),
            reason,
        });
    }

    OwnedUtxoSet {
        owned,
        excluded,
        key_set,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{ShelleyResolver, base_address, enterprise_address, reward_address};
    use crate::network::Network;
    use crate::value::Value;

    fn utxo(address: &str, idx: u32) -> UnspentOutput {
        UnspentOutput {
            tx_hash: "ab".repeat(32),
            output_index: idx,
            address: address.to_string(),
            value: Value::lovelace(3_000_000),
        }
    }

    fn wallet() -> (WalletAddresses, String) {
        let base = base_address(Network::Preprod, &KeyHash([1; 28]), &KeyHash([2; 28])).unwrap();
        let reward = reward_address(Network::Preprod, &KeyHash([2; 28])).unwrap();
        (
            WalletAddresses {
                used: vec![base.clone()],
                unused: vec![],
                change: Some(base.clone()),
                reward: Some(reward),
            },
            base,
        )
    }

    #[test]
    fn same_payment_key_under_another_address_is_owned() {
        let (addrs, _) = wallet();
        let other_form = enterprise_address(Network::Preprod, &KeyHash([1; 28])).unwrap();
        let set = filter_owned_utxos(&[utxo(&other_form, 0)], &addrs, &ShelleyResolver);
        assert_eq!(set.owned.len(), 1);
        assert!(set.excluded.is_empty());
    }

    #[test]
    fn foreign_and_unparseable_addresses_are_excluded_with_reason() {
        let (addrs, base) = wallet();
        let foreign = enterprise_address(Network::Preprod, &KeyHash([9; 28])).unwrap();
        let reported = vec![
            utxo(&base, 0),
            utxo(&foreign, 1),
            utxo("not-an-address", 2),
            utxo("", 3),
        ];
        let set = filter_owned_utxos(&reported, &addrs, &ShelleyResolver);
        assert_eq!(set.owned.len(), 1);
        let reasons: Vec<_> = set.excluded.iter().map(|e| e.reason).collect();
        assert_eq!(
            reasons,
            vec![
                ExclusionReason::FingerprintMismatch,
                ExclusionReason::UnresolvedFingerprint,
                ExclusionReason::NoAddress,
            ]
        );
        assert_eq!(
            set.excluded[0].resolved_fingerprint.as_deref(),
            Some(KeyHash([9; 28]).to_hex().as_str())
        );
    }

    #[test]
    fn literal_wallet_address_is_owned_even_if_unresolvable() {
        let addrs = WalletAddresses {
            used: vec!["legacy-wallet-address".into()],
            ..Default::default()
        };
        let set = filter_owned_utxos(&[utxo("legacy-wallet-address", 0)], &addrs, &ShelleyResolver);
        assert_eq!(set.owned.len(), 1);
        assert!(set.key_set.is_empty());
    }

    #[test]
    fn empty_result_reports_exclusions() {
        let (addrs, _) = wallet();
        let set = filter_owned_utxos(&[utxo("garbage", 0)], &addrs, &ShelleyResolver);
        match set.require_non_empty() {
            Err(Error::NoOwnedUtxos { excluded }) => assert_eq!(excluded.len(), 1),
            other => panic!("expected NoOwnedUtxos, got {other:?}"),
        }
    }

    #[test]
    fn wallet_without_keys_cannot_spend_literal_matches() {
        // enterprise script address: the wallet has no key for it
        let mut bytes = vec![0x70];
        bytes.extend_from_slice(&[7u8; 28]);
        let script = hex::encode(&bytes);
        let addrs = WalletAddresses {
            used: vec![script.clone()],
            ..Default::default()
        };
        let set = filter_owned_utxos(&[utxo(&script, 0)], &addrs, &ShelleyResolver);
        assert_eq!(set.owned.len(), 1);
        assert!(set.key_set.is_empty());
        match set.require_non_empty() {
            Err(Error::NoOwnedUtxos { excluded }) => {
                assert_eq!(excluded.len(), 1);
                assert_eq!(excluded[0].reason, ExclusionReason::NoWalletKeys);
                assert_eq!(excluded[0].address, script);
            }
            other => panic!("expected NoOwnedUtxos, got {other:?}"),
        }
    }

    #[test]
    fn change_address_falls_back_to_used_then_unused() {
        let mut addrs = WalletAddresses {
            used: vec![],
            unused: vec!["u".into()],
            change: None,
            reward: None,
        };
        assert_eq!(addrs.change_address(), Some("u"));
        addrs.used.push("a".into());
        assert_eq!(addrs.change_address(), Some("a"));
        addrs.change = Some("c".into());
        assert_eq!(addrs.change_address(), Some("c"));
        assert_eq!(addrs.reward_address(), None);
    }

    #[test]
    fn all_deduplicates() {
        let (addrs, base) = wallet();
        let all = addrs.all();
        assert_eq!(all.iter().filter(|a| **a == base).count(), 1);
        assert_eq!(all.len(), 2);
    }
}
