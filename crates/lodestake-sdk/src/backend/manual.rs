use super::{PendingTx, TransactionBackend, TransactionDraft};
use crate::address::KeyHash;
use crate::certificate::NormalizedTarget;
use crate::error::{Error, Result};
use crate::params::ProtocolParams;
use crate::value::{UnspentOutput, Value};

/// Lower-level builder that assembles the body by hand around exactly one
/// caller-chosen input. There is no coin selection: if the input does not
/// cover outputs, deposit and fee, `complete` fails.
#[derive(Debug, Clone, Default)]
pub struct ManualBackend {
    params: ProtocolParams,
    pending: PendingTx,
    input: Option<UnspentOutput>,
}

impl ManualBackend {
    pub const NAME: &'static str = "secondary";

    pub fn new(params: ProtocolParams) -> Self {
        Self {
            params,
            pending: PendingTx::default(),
            input: None,
        }
    }
}

impl TransactionBackend for ManualBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn reset(&mut self) {
        self.pending = PendingTx::default();
        self.input = None;
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
        match available {
            [] => Err(Error::NoUtxosAvailable),
            [single] => {
                self.input = Some(single.clone());
                Ok(())
            }
            _ => Err(Error::build(
                Self::NAME,
                format!("expects exactly one input, got {}", available.len()),
            )),
        }
    }

    fn complete(&mut self) -> Result<TransactionDraft> {
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| Error::build(Self::NAME, "no input supplied"))?;
        let draft = self
            .pending
            .finalize(Self::NAME, &self.params, std::slice::from_ref(input))?;
        log::info!(
            "{} backend assembled body from {}, fee {}",
            Self::NAME,
            input.outpoint(),
            draft.fee
        );
        Ok(draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{base_address, reward_address};
    use crate::network::Network;

    fn utxo(idx: u32, coin: u64) -> UnspentOutput {
        UnspentOutput {
            tx_hash: "cd".repeat(32),
            output_index: idx,
            address: base_address(Network::Preview, &KeyHash([1; 28]), &KeyHash([2; 28])).unwrap(),
            value: Value::lovelace(coin),
        }
    }

    #[test]
    fn rejects_more_than_one_input() {
        let mut b = ManualBackend::new(ProtocolParams::default());
        assert!(matches!(
            b.select_inputs(&[utxo(0, 5_000_000), utxo(1, 5_000_000)]),
            Err(Error::TransactionBuildFailure { backend: "secondary", .. })
        ));
    }

    #[test]
    fn builds_delegation_from_single_input() {
        let mut b = ManualBackend::new(ProtocolParams::default());
        let stake = KeyHash([2; 28]);
        b.register_stake(&stake).unwrap();
        b.delegate(&stake, &NormalizedTarget::Pool(KeyHash([3; 28]))).unwrap();
        b.set_change_address(&utxo(0, 0).address).unwrap();
        b.select_inputs(&[utxo(0, 8_000_000)]).unwrap();
        let draft = b.complete().unwrap();
        assert_eq!(draft.backend, "secondary");
        assert_eq!(draft.certificates.len(), 2);
        assert_eq!(draft.outputs[0].coin + draft.fee + draft.deposit, 8_000_000);
    }

    #[test]
    fn change_address_must_decode() {
        let mut b = ManualBackend::new(ProtocolParams::default());
        assert!(b.set_change_address("nope").is_err());
        let reward = reward_address(Network::Preview, &KeyHash([2; 28])).unwrap();
        assert!(b.set_change_address(&reward).is_ok());
    }

    #[test]
    fn undersized_input_fails_without_selection() {
        let mut b = ManualBackend::new(ProtocolParams::default());
        let stake = KeyHash([2; 28]);
        b.register_stake(&stake).unwrap();
        b.delegate(&stake, &NormalizedTarget::Pool(KeyHash([3; 28]))).unwrap();
        b.set_change_address(&utxo(0, 0).address).unwrap();
        b.select_inputs(&[utxo(0, 2_100_000)]).unwrap();
        assert!(matches!(b.complete(), Err(Error::InsufficientFunds { .. })));
    }
}
