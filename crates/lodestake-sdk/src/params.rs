use serde::{Deserialize, Serialize};

use crate::value::{UnspentOutput, Value};

/// Ledger and product constants used when balancing transactions.
///
/// The min-UTXO and collateral figures are product choices rather than
/// protocol law, so all of them are overridable from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolParams {
    /// Linear fee coefficient (lovelace per byte).
    pub min_fee_a: u64,
    /// Linear fee constant (lovelace).
    pub min_fee_b: u64,
    /// Deposit locked by a stake registration certificate.
    pub key_deposit: u64,
    /// Minimum lovelace on an output carrying only lovelace.
    pub min_utxo_lovelace: u64,
    /// Minimum lovelace on an output carrying native assets.
    pub min_utxo_multiasset_lovelace: u64,
    /// Pure-lovelace outputs in this window are kept back as collateral.
    pub collateral_min_lovelace: u64,
    pub collateral_max_lovelace: u64,
    /// Serialized transaction size ceiling in bytes.
    pub max_tx_size: usize,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            min_fee_a: 44,
            min_fee_b: 155_381,
            key_deposit: 2_000_000,
            min_utxo_lovelace: 1_000_000,
            min_utxo_multiasset_lovelace: 1_500_000,
            collateral_min_lovelace: 5_000_000,
            collateral_max_lovelace: 10_000_000,
            max_tx_size: 16_384,
        }
    }
}

impl ProtocolParams {
    pub fn linear_fee(&self, tx_size: usize) -> u64 {
        self.min_fee_a
            .saturating_mul(tx_size as u64)
            .saturating_add(self.min_fee_b)
    }

    /// Lovelace an output holding `value` must carry at minimum.
    pub fn min_lovelace_for(&self, value: &Value) -> u64 {
        if value.is_pure_lovelace() {
            self.min_utxo_lovelace
        } else {
            self.min_utxo_multiasset_lovelace
        }
    }

    pub fn is_collateral_candidate(&self, utxo: &UnspentOutput) -> bool {
        if !utxo.value.is_pure_lovelace() {
            return false;
        }
        utxo.coin().is_some_and(|c| {
            (self.collateral_min_lovelace..=self.collateral_max_lovelace).contains(&c)
        })
    }
}
