use std::collections::BTreeMap;

use lodestake_sdk::{ExcludedUtxo, OwnedUtxoSet, UnspentOutput, Value};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAddressInfo {
    pub network: String,
    pub base_address: String,
    pub enterprise_address: String,
    pub reward_address: String,
    pub payment_key_hash: String,
    pub stake_key_hash: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBalance {
    /// Map of unit (`lovelace` or policy id ‖ asset name hex) -> quantity
    pub assets: BTreeMap<String, String>,
}

impl From<&Value> for WalletBalance {
    fn from(value: &Value) -> Self {
        Self {
            assets: value
                .iter()
                .map(|(unit, qty)| (unit.to_string(), qty.to_string()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletUtxo {
    pub tx_hash: String,
    pub output_index: u32,
    pub address: String,
    pub assets: BTreeMap<String, String>,
}

impl From<&UnspentOutput> for WalletUtxo {
    fn from(utxo: &UnspentOutput) -> Self {
        Self {
            tx_hash: utxo.tx_hash.clone(),
            output_index: utxo.output_index,
            address: utxo.address.clone(),
            assets: utxo
                .value
                .iter()
                .map(|(unit, qty)| (unit.to_string(), qty.to_string()))
                .collect(),
        }
    }
}

/// Spendable outputs, what was filtered out, and the spendable total.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UtxoReport {
    pub owned: Vec<WalletUtxo>,
    pub excluded: Vec<ExcludedUtxo>,
    pub key_fingerprints: Vec<String>,
    pub balance: WalletBalance,
}

impl UtxoReport {
    pub fn from_owned(set: &OwnedUtxoSet) -> Self {
        let mut total = Value::default();
        for utxo in &set.owned {
            total.merge(&utxo.value);
        }
        Self {
            owned: set.owned.iter().map(WalletUtxo::from).collect(),
            excluded: set.excluded.clone(),
            key_fingerprints: set.key_fingerprints(),
            balance: WalletBalance::from(&total),
        }
    }
}
