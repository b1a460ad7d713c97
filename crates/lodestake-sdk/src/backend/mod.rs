//! Transaction-building backends.
//!
//! A backend accumulates certificates, outputs and a change address, is
//! handed the candidate inputs, and `complete`s into an unsigned
//! [`TransactionDraft`]. [`AutoBackend`] does its own coin selection;
//! [`ManualBackend`] spends exactly the one input it is given.

pub mod auto;
pub mod manual;

pub use auto::AutoBackend;
pub use manual::ManualBackend;

use std::collections::{BTreeSet, HashSet};

use crate::address::{KeyHash, OwnershipResolver, address_bytes};
use crate::certificate::{Certificate, CertificateSet, NormalizedTarget};
use crate::error::{Error, Result};
use crate::params::ProtocolParams;
use crate::tx::{TransactionBody, TxInput, TxOutput, estimated_size, hash_body};
use crate::value::{AssetUnit, Quantity, UnspentOutput, Value};

const MAX_FEE_ROUNDS: usize = 8;

/// Common interface of the transaction-building strategies.
pub trait TransactionBackend: Send {
    fn name(&self) -> &'static str;

    /// Drop all accumulated state so the backend can build a new draft.
    fn reset(&mut self);

    fn register_stake(&mut self, stake: &KeyHash) -> Result<()>;

    fn delegate(&mut self, stake: &KeyHash, target: &NormalizedTarget) -> Result<()>;

    fn add_output(&mut self, address: &str, value: &Value) -> Result<()>;

    fn set_change_address(&mut self, address: &str) -> Result<()>;

    /// Offer the inputs the draft may spend.
    fn select_inputs(&mut self, available: &[UnspentOutput]) -> Result<()>;

    /// Balance, compute the fee, and encode the body.
    fn complete(&mut self) -> Result<TransactionDraft>;
}

/// An unsigned, balanced transaction.
#[derive(Debug, Clone)]
pub struct TransactionDraft {
    pub backend: &'static str,
    pub inputs: Vec<UnspentOutput>,
    pub outputs: Vec<TxOutput>,
    pub certificates: CertificateSet,
    pub change_address: String,
    pub fee: u64,
    /// Lovelace locked by stake registration certificates.
    pub deposit: u64,
    pub body_cbor: Vec<u8>,
    pub tx_hash: [u8; 32],
}

impl TransactionDraft {
    pub fn tx_hash_hex(&self) -> String {
        hex::encode(self.tx_hash)
    }

    /// Key hashes that must witness this draft: the payment keys of its
    /// inputs and the stake keys of its delegation certificates.
    pub fn required_signers(&self, resolver: &dyn OwnershipResolver) -> BTreeSet<KeyHash> {
        self.inputs
            .iter()
            .filter_map(|u| resolver.fingerprint_of(&u.address).ok())
            .chain(self.certificates.required_signers().copied())
            .collect()
    }
}

// ── Shared builder state ────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct PendingTx {
    certificates: CertificateSet,
    outputs: Vec<(String, Value)>,
    change_address: Option<String>,
}

impl PendingTx {
    fn register_stake(&mut self, stake: &KeyHash) {
        self.certificates
            .push(Certificate::StakeRegistration { stake: *stake });
    }

    fn delegate(&mut self, stake: &KeyHash, target: &NormalizedTarget) {
        self.certificates.push(Certificate::delegation(*stake, *target));
    }

    fn add_output(
        &mut self,
        backend: &'static str,
        params: &ProtocolParams,
        address: &str,
        value: &Value,
    ) -> Result<()> {
        address_bytes(address).map_err(|e| Error::build(backend, e.to_string()))?;
        let min = params.min_lovelace_for(value);
        if value.coin() < Quantity::from(min) {
            return Err(Error::build(
                backend,
                format!("output to {address} carries {} lovelace, minimum is {min}", value.coin()),
            ));
        }
        self.outputs.push((address.to_string(), value.clone()));
        Ok(())
    }

    fn set_change_address(&mut self, backend: &'static str, address: &str) -> Result<()> {
        address_bytes(address).map_err(|e| Error::build(backend, e.to_string()))?;
        self.change_address = Some(address.to_string());
        Ok(())
    }

    fn deposit(&self, params: &ProtocolParams) -> u64 {
        params.key_deposit * self.certificates.registrations() as u64
    }

    /// Everything the draft pays out before fee: outputs plus deposits.
    fn spend(&self, params: &ProtocolParams) -> Value {
        let mut spend = Value::lovelace(self.deposit(params));
        for (_, value) in &self.outputs {
            spend.merge(value);
        }
        spend
    }

    /// Native asset units the outputs require.
    fn required_units(&self) -> HashSet<AssetUnit> {
        self.outputs
            .iter()
            .flat_map(|(_, v)| v.native_assets().map(|(unit, _)| unit.clone()))
            .collect()
    }

    /// Balance `inputs` against the pending outputs and certificates.
    ///
    /// Iterates the fee until the encoded body pays for its own size.
    /// Change below the min-UTXO is folded into the fee when it is pure
    /// lovelace; change carrying assets that cannot meet the min-UTXO is a
    /// shortfall.
    fn finalize(
        &self,
        backend: &'static str,
        params: &ProtocolParams,
        inputs: &[UnspentOutput],
    ) -> Result<TransactionDraft> {
        let change_address = self
            .change_address
            .clone()
            .ok_or_else(|| Error::build(backend, "change address not set"))?;
        if inputs.is_empty() {
            return Err(Error::build(backend, "no inputs selected"));
        }

        let mut total_in = Value::default();
        for utxo in inputs {
            total_in.merge(&utxo.value);
        }
        let spend = self.spend(params);
        let tx_inputs = inputs
            .iter()
            .map(|u| TxInput::from_utxo(u, backend))
            .collect::<Result<Vec<_>>>()?;
        let outputs = self
            .outputs
            .iter()
            .map(|(address, value)| TxOutput::from_value(address, value, backend))
            .collect::<Result<Vec<_>>>()?;
        let witnesses = witness_estimate(inputs, &self.certificates);

        let mut fee = params.linear_fee(0);
        for _ in 0..MAX_FEE_ROUNDS {
            let mut needed = spend.clone();
            needed.add(AssetUnit::Lovelace, Quantity::from(fee));
            let change = total_in
                .checked_sub(&needed)
                .ok_or_else(|| shortfall(&total_in, &needed))?;

            let mut body_outputs = outputs.clone();
            let mut body_fee = fee;
            if !change.is_empty() {
                let coin = change
                    .coin()
                    .to_u64()
                    .ok_or_else(|| Error::build(backend, "change overflows u64"))?;
                let min = params.min_lovelace_for(&change);
                if change.is_pure_lovelace() && coin < min {
                    body_fee += coin;
                } else if coin < min {
                    needed.add(AssetUnit::Lovelace, Quantity::from(min - coin));
                    return Err(shortfall(&total_in, &needed));
                } else {
                    body_outputs.push(TxOutput::from_value(&change_address, &change, backend)?);
                }
            }

            let body = TransactionBody {
                inputs: tx_inputs.clone(),
                outputs: body_outputs,
                fee: body_fee,
                certificates: self.certificates.clone(),
            };
            let body_cbor = body.to_cbor()?;
            let size = estimated_size(body_cbor.len(), witnesses);
            if size > params.max_tx_size {
                return Err(Error::build(
                    backend,
                    format!("transaction size {size} exceeds limit {}", params.max_tx_size),
                ));
            }
            let min_fee = params.linear_fee(size);
            if body_fee >= min_fee {
                let tx_hash = hash_body(&body_cbor);
                return Ok(TransactionDraft {
                    backend,
                    inputs: inputs.to_vec(),
                    outputs: body.outputs,
                    certificates: body.certificates,
                    change_address,
                    fee: body_fee,
                    deposit: self.deposit(params),
                    body_cbor,
                    tx_hash,
                });
            }
            fee = min_fee;
        }
        Err(Error::build(backend, "fee did not converge"))
    }
}

fn shortfall(available: &Value, needed: &Value) -> Error {
    Error::InsufficientFunds {
        available: available.coin().to_u64().unwrap_or(u64::MAX),
        required: needed.coin().to_u64().unwrap_or(u64::MAX),
    }
}

/// Upper bound on vkey witnesses: one per distinct input address (never
/// fewer than distinct payment keys) plus one per certificate signer.
fn witness_estimate(inputs: &[UnspentOutput], certificates: &CertificateSet) -> usize {
    let addresses: HashSet<&str> = inputs.iter().map(|u| u.address.as_str()).collect();
    let stake: HashSet<&KeyHash> = certificates.required_signers().collect();
    addresses.len() + stake.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{ShelleyResolver, base_address};
    use crate::network::Network;

    fn addr(b: u8) -> String {
        base_address(Network::Preprod, &KeyHash([b; 28]), &KeyHash([b + 100; 28])).unwrap()
    }

    fn utxo(coin: u64) -> UnspentOutput {
        UnspentOutput {
            tx_hash: "11".repeat(32),
            output_index: 0,
            address: addr(1),
            value: Value::lovelace(coin),
        }
    }

    #[test]
    fn fee_covers_encoded_size() {
        let params = ProtocolParams::default();
        let mut pending = PendingTx::default();
        pending.add_output("b", &params, &addr(2), &Value::lovelace(2_000_000)).unwrap();
        pending.set_change_address("b", &addr(1)).unwrap();
        let draft = pending.finalize("b", &params, &[utxo(10_000_000)]).unwrap();
        let size = estimated_size(draft.body_cbor.len(), 1);
        assert!(draft.fee >= params.linear_fee(size));
        let change = draft.outputs.last().unwrap().coin;
        assert_eq!(change + draft.fee + 2_000_000, 10_000_000);
    }

    #[test]
    fn dust_change_is_folded_into_fee() {
        let params = ProtocolParams::default();
        let mut pending = PendingTx::default();
        pending.add_output("b", &params, &addr(2), &Value::lovelace(2_000_000)).unwrap();
        pending.set_change_address("b", &addr(1)).unwrap();
        let draft = pending.finalize("b", &params, &[utxo(2_400_000)]).unwrap();
        assert_eq!(draft.outputs.len(), 1);
        assert_eq!(draft.fee, 400_000);
    }

    #[test]
    fn registration_locks_deposit() {
        let params = ProtocolParams::default();
        let mut pending = PendingTx::default();
        pending.register_stake(&KeyHash([101; 28]));
        pending.delegate(&KeyHash([101; 28]), &NormalizedTarget::Pool(KeyHash([7; 28])));
        pending.set_change_address("b", &addr(1)).unwrap();
        let draft = pending.finalize("b", &params, &[utxo(10_000_000)]).unwrap();
        assert_eq!(draft.deposit, 2_000_000);
        assert_eq!(draft.outputs[0].coin + draft.fee + 2_000_000, 10_000_000);
        let signers = draft.required_signers(&ShelleyResolver);
        assert!(signers.contains(&KeyHash([1; 28])));
        assert!(signers.contains(&KeyHash([101; 28])));
    }

    #[test]
    fn too_little_is_insufficient() {
        let params = ProtocolParams::default();
        let mut pending = PendingTx::default();
        pending.add_output("b", &params, &addr(2), &Value::lovelace(5_000_000)).unwrap();
        pending.set_change_address("b", &addr(1)).unwrap();
        assert!(matches!(
            pending.finalize("b", &params, &[utxo(5_000_000)]),
            Err(Error::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn outputs_below_min_utxo_are_rejected() {
        let params = ProtocolParams::default();
        let mut pending = PendingTx::default();
        assert!(matches!(
            pending.add_output("b", &params, &addr(2), &Value::lovelace(999_999)),
            Err(Error::TransactionBuildFailure { backend: "b", .. })
        ));
    }
}
