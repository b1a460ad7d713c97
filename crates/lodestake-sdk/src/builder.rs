//! Certificate-aware transaction assembly.

use crate::address::{KeyHash, reward_key_hash};
use crate::backend::{TransactionBackend, TransactionDraft};
use crate::certificate::{Certificate, CertificateSet, DelegationTarget, NormalizedTarget};
use crate::error::{Error, Result};
use crate::params::ProtocolParams;
use crate::value::UnspentOutput;

/// Registration (only for an inactive reward account) followed by exactly
/// one delegation.
pub fn certificates_for(
    stake: KeyHash,
    target: NormalizedTarget,
    is_reward_active: bool,
) -> CertificateSet {
    let mut certs = CertificateSet::default();
    if !is_reward_active {
        certs.push(Certificate::StakeRegistration { stake });
    }
    certs.push(Certificate::delegation(stake, target));
    certs
}

/// Build an unsigned delegation draft on `backend`.
///
/// The target id is normalized before the backend sees anything, so an
/// unparseable id never reaches it.
pub fn build_delegation(
    backend: &mut dyn TransactionBackend,
    owned: &[UnspentOutput],
    change_address: &str,
    reward_address: &str,
    target: &DelegationTarget,
    is_reward_active: bool,
) -> Result<TransactionDraft> {
    let normalized = target.normalize()?;
    let stake = reward_key_hash(reward_address).map_err(|_| Error::NoRewardAddress)?;
    if owned.is_empty() {
        return Err(Error::NoUtxosAvailable);
    }

    backend.reset();
    for cert in certificates_for(stake, normalized, is_reward_active).as_slice() {
        match cert {
            Certificate::StakeRegistration { stake } => backend.register_stake(stake)?,
            Certificate::StakeDelegation { stake, .. } | Certificate::VoteDelegation { stake, .. } => {
                backend.delegate(stake, &normalized)?
            }
        }
    }
    backend.set_change_address(change_address)?;
    backend.select_inputs(owned)?;
    backend.complete()
}

/// Choose the single input the manual backend will spend: the smallest
/// pure-lovelace output that comfortably covers deposit, fee and change,
/// else the largest pure-lovelace output.
pub fn pick_single_input<'a>(
    owned: &'a [UnspentOutput],
    params: &ProtocolParams,
) -> Option<&'a UnspentOutput> {
    // a 1 KiB body is far above a single-input delegation
    let comfortable = params.key_deposit + params.min_utxo_lovelace + params.linear_fee(1024);
    let pure = || {
        owned
            .iter()
            .filter(|u| u.value.is_pure_lovelace())
            .filter_map(|u| u.coin().map(|c| (c, u)))
    };
    pure()
        .filter(|(c, _)| *c >= comfortable)
        .min_by_key(|(c, _)| *c)
        .or_else(|| pure().max_by_key(|(c, _)| *c))
        .map(|(_, u)| u)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{base_address, reward_address};
    use crate::backend::AutoBackend;
    use crate::network::Network;
    use crate::value::{AssetUnit, Quantity, Value};

    fn pool() -> DelegationTarget {
        DelegationTarget::Pool(hex::encode([0x50u8; 28]))
    }

    fn fixture() -> (Vec<UnspentOutput>, String, String) {
        let pay = KeyHash([1; 28]);
        let stake = KeyHash([2; 28]);
        let addr = base_address(Network::Preprod, &pay, &stake).unwrap();
        let reward = reward_address(Network::Preprod, &stake).unwrap();
        let utxos = vec![UnspentOutput {
            tx_hash: "aa".repeat(32),
            output_index: 0,
            address: addr.clone(),
            value: Value::lovelace(20_000_000),
        }];
        (utxos, addr, reward)
    }

    #[test]
    fn inactive_account_registers_first() {
        let certs = certificates_for(KeyHash([2; 28]), NormalizedTarget::Pool(KeyHash([3; 28])), false);
        assert_eq!(certs.len(), 2);
        assert!(certs.as_slice()[0].is_registration());
        assert!(!certs.as_slice()[1].is_registration());
    }

    #[test]
    fn active_account_only_delegates() {
        let certs = certificates_for(KeyHash([2; 28]), NormalizedTarget::Pool(KeyHash([3; 28])), true);
        assert_eq!(certs.len(), 1);
        assert_eq!(certs.registrations(), 0);
    }

    #[test]
    fn draft_carries_ordered_certificates() {
        let (utxos, addr, reward) = fixture();
        let mut backend = AutoBackend::new(ProtocolParams::default());
        let draft = build_delegation(&mut backend, &utxos, &addr, &reward, &pool(), false).unwrap();
        let certs = draft.certificates.as_slice();
        assert_eq!(certs.len(), 2);
        assert_eq!(
            certs[0],
            Certificate::StakeRegistration {
                stake: KeyHash([2; 28])
            }
        );
        assert_eq!(
            certs[1],
            Certificate::StakeDelegation {
                stake: KeyHash([2; 28]),
                pool: KeyHash([0x50; 28])
            }
        );
        assert_eq!(draft.deposit, 2_000_000);
    }

    #[test]
    fn bad_target_fails_before_backend() {
        let (utxos, addr, reward) = fixture();
        let mut backend = AutoBackend::new(ProtocolParams::default());
        let err = build_delegation(
            &mut backend,
            &utxos,
            &addr,
            &reward,
            &DelegationTarget::VotingDelegate("drep1???".into()),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidDelegationTarget(_)));
    }

    #[test]
    fn pick_prefers_smallest_sufficient_pure_lovelace() {
        let params = ProtocolParams::default();
        let mk = |i: u32, coin: u64, token: bool| {
            let mut value = Value::lovelace(coin);
            if token {
                let unit: AssetUnit = format!("{}01", "ab".repeat(28)).parse().unwrap();
                value.add(unit, Quantity::from(1));
            }
            UnspentOutput {
                tx_hash: "bb".repeat(32),
                output_index: i,
                address: String::new(),
                value,
            }
        };
        let owned = vec![
            mk(0, 50_000_000, false),
            mk(1, 4_000_000, false),
            mk(2, 6_000_000, true),
            mk(3, 1_000_000, false),
        ];
        assert_eq!(pick_single_input(&owned, &params).unwrap().output_index, 1);
        let small = vec![mk(0, 1_000_000, false), mk(1, 2_000_000, false), mk(2, 9_000_000, true)];
        assert_eq!(pick_single_input(&small, &params).unwrap().output_index, 1);
        assert!(pick_single_input(&[mk(0, 9_000_000, true)], &params).is_none());
    }
}
