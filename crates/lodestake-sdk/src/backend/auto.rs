use std::cmp::Reverse;

use super::{PendingTx, TransactionBackend, TransactionDraft};
use crate::address::KeyHash;
use crate::certificate::NormalizedTarget;
use crate::error::{Error, Result};
use crate::params::ProtocolParams;
use crate::value::{AssetUnit, UnspentOutput, Value};

/// Higher-level builder with automatic coin selection.
///
/// Candidates are ranked once in `select_inputs`: inputs holding an asset
/// the outputs need come first, then largest lovelace first, with
/// collateral-sized pure-lovelace outputs held back until last. `complete`
/// accumulates candidates in that order until the draft balances.
#[derive(Debug, Clone, Default)]
pub struct AutoBackend {
    params: ProtocolParams,
    pending: PendingTx,
    candidates: Vec<UnspentOutput>,
}

impl AutoBackend {
    pub const NAME: &'static str = "primary";

    pub fn new(params: ProtocolParams) -> Self {
        Self {
            params,
            pending: PendingTx::default(),
            candidates: Vec::new(),
        }
    }
}

impl TransactionBackend for AutoBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn reset(&mut self) {
        self.pending = PendingTx::default();
        self.candidates.clear();
    }

    fn register_stake(&mut self, stake: &KeyHash) -> Result<()> {
        self.pending.register_stake(stake);
        Ok(())
    }

    fn delegate(&mut self, stake: &KeyHash, target: &NormalizedTarget) -> Result<()> {
        self.pending.delegate(stake, target);
        Ok(())
    }

    fn add_output(&mut self, address: &str, value: &Value) -> Result<()> {
        self.pending
            .add_output(Self::NAME, &self.params, address, value)
    }

    fn set_change_address(&mut self, address: &str) -> Result<()> {
        self.pending.set_change_address(Self::NAME, address)
    }

    fn select_inputs(&mut self, available: &[UnspentOutput]) -> Result<()> {
        if available.is_empty() {
            return Err(Error::NoUtxosAvailable);
        }
        let wanted = self.pending.required_units();
        let mut ranked = available.to_vec();
        ranked.sort_by_key(|u| {
            let carries_wanted = u.value.native_assets().any(|(unit, _)| wanted.contains(unit));
            (
                !carries_wanted,
                self.params.is_collateral_candidate(u),
                Reverse(u.value.coin()),
            )
        });
        self.candidates = ranked;
        Ok(())
    }

    fn complete(&mut self) -> Result<TransactionDraft> {
        if self.candidates.is_empty() {
            return Err(Error::build(Self::NAME, "no inputs offered"));
        }
        let spend = self.pending.spend(&self.params);
        let lovelace_needed = spend.get(&AssetUnit::Lovelace);

        let mut selected: Vec<UnspentOutput> = Vec::new();
        let mut total = Value::default();
        let mut last_shortfall = None;
        for utxo in &self.candidates {
            selected.push(utxo.clone());
            total.merge(&utxo.value);
            // Not worth encoding until the fee-less spend is covered.
            if !total.covers(&spend) || total.coin() <= lovelace_needed {
                continue;
            }
            match self.pending.finalize(Self::NAME, &self.params, &selected) {
                Ok(draft) => {
                    log::info!(
                        "{} backend selected {} of {} inputs, fee {}",
                        Self::NAME,
                        selected.len(),
                        self.candidates.len(),
                        draft.fee
                    );
                    return Ok(draft);
                }
                Err(e @ Error::InsufficientFunds { .. }) => last_shortfall = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_shortfall.unwrap_or_else(|| Error::InsufficientFunds {
            available: total.coin().to_u64().unwrap_or(u64::MAX),
            required: lovelace_needed.to_u64().unwrap_or(u64::MAX),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::base_address;
    use crate::network::Network;
    use crate::value::Quantity;

    const POLICY: &str = "0b1c2d3e4f5a6b7c8d9e0f1a2b3c4d5e6f7a8b9c0d1e2f3a4b5c6d7e";

    fn addr(b: u8) -> String {
        base_address(Network::Preprod, &KeyHash([b; 28]), &KeyHash([b + 100; 28])).unwrap()
    }

    fn utxo(idx: u32, value: Value) -> UnspentOutput {
        UnspentOutput {
            tx_hash: format!("{:064x}", idx + 1),
            output_index: idx,
            address: addr(1),
            value,
        }
    }

    fn token() -> AssetUnit {
        format!("{POLICY}746f6b").parse().unwrap()
    }

    #[test]
    fn largest_first_stops_once_balanced() {
        let mut b = AutoBackend::new(ProtocolParams::default());
        b.add_output(&addr(2), &Value::lovelace(3_000_000)).unwrap();
        b.set_change_address(&addr(1)).unwrap();
        b.select_inputs(&[
            utxo(0, Value::lovelace(2_000_000)),
            utxo(1, Value::lovelace(20_000_000)),
            utxo(2, Value::lovelace(3_000_000)),
        ])
        .unwrap();
        let draft = b.complete().unwrap();
        assert_eq!(draft.inputs.len(), 1);
        assert_eq!(draft.inputs[0].output_index, 1);
    }

    #[test]
    fn collateral_sized_inputs_are_used_last() {
        let mut b = AutoBackend::new(ProtocolParams::default());
        b.add_output(&addr(2), &Value::lovelace(2_000_000)).unwrap();
        b.set_change_address(&addr(1)).unwrap();
        b.select_inputs(&[
            utxo(0, Value::lovelace(5_000_000)),
            utxo(1, Value::lovelace(4_000_000)),
        ])
        .unwrap();
        let draft = b.complete().unwrap();
        assert_eq!(draft.inputs[0].output_index, 1);
    }

    #[test]
    fn inputs_holding_required_assets_come_first() {
        let mut with_token = Value::lovelace(2_000_000);
        with_token.add(token(), Quantity::from(50));
        let mut out = Value::lovelace(1_500_000);
        out.add(token(), Quantity::from(10));

        let mut b = AutoBackend::new(ProtocolParams::default());
        b.add_output(&addr(2), &out).unwrap();
        b.set_change_address(&addr(1)).unwrap();
        b.select_inputs(&[
            utxo(0, Value::lovelace(50_000_000)),
            utxo(1, with_token),
        ])
        .unwrap();
        let draft = b.complete().unwrap();
        assert_eq!(draft.inputs[0].output_index, 1);
        // 2 ADA alone cannot cover 1.5 ADA out, fee and a 1.5 ADA token change
        assert_eq!(draft.inputs.len(), 2);
        let change = draft.outputs.last().unwrap();
        assert_eq!(change.assets.values().next().unwrap().values().sum::<u64>(), 40);
    }

    #[test]
    fn exhausting_candidates_is_insufficient_funds() {
        let mut b = AutoBackend::new(ProtocolParams::default());
        b.add_output(&addr(2), &Value::lovelace(30_000_000)).unwrap();
        b.set_change_address(&addr(1)).unwrap();
        b.select_inputs(&[utxo(0, Value::lovelace(10_000_000))]).unwrap();
        assert!(matches!(b.complete(), Err(Error::InsufficientFunds { .. })));
    }

    #[test]
    fn reset_clears_pending_state() {
        let mut b = AutoBackend::new(ProtocolParams::default());
        b.add_output(&addr(2), &Value::lovelace(3_000_000)).unwrap();
        b.select_inputs(&[utxo(0, Value::lovelace(10_000_000))]).unwrap();
        b.reset();
        assert!(b.complete().is_err());
    }
}
