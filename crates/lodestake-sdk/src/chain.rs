use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::value::UnspentOutput;

/// Staking state of a reward account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatus {
    pub active: bool,
    #[serde(default)]
    pub pool_id: Option<String>,
    #[serde(default)]
    pub drep_id: Option<String>,
}

/// Chain indexer the engine reads UTXOs and account state from and submits
/// transactions through.
pub trait ChainIndexer: Send + Sync {
    /// Unspent outputs currently at `address`.
    fn utxos(&self, address: &str) -> Result<Vec<UnspentOutput>>;

    /// Registration and delegation state of a reward address.
    fn account_status(&self, reward_address: &str) -> Result<AccountStatus>;

    /// Submit a signed transaction and return its hash. A rejection carries
    /// the node's raw error text in `Error::Submit`.
    fn submit(&self, tx_cbor: &[u8]) -> Result<String>;
}

/// Read-only lookup of the addresses holding a handle.
pub trait HandleRegistry: Send + Sync {
    fn handle_holders(&self, handle: &str) -> Result<Vec<String>>;
}

/// Snapshot the UTXOs at every address, dropping duplicate outpoints that
/// indexers report for addresses sharing a payment key.
pub fn fetch_wallet_utxos(
    indexer: &dyn ChainIndexer,
    addresses: &[String],
) -> Result<Vec<UnspentOutput>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for address in addresses {
        for utxo in indexer.utxos(address)? {
            if seen.insert(utxo.outpoint()) {
                out.push(utxo);
            }
        }
    }
    Ok(out)
}
