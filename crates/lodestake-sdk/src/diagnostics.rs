//! Mapping "missing witness" submission failures back to the inputs that
//! caused them.
//!
//! The node reports the key hashes it expected signatures for as bare hex
//! tokens somewhere in its error text. The mapper scrapes those tokens and
//! correlates them with the candidate inputs' resolved fingerprints.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::address::OwnershipResolver;
use crate::value::UnspentOutput;

/// A standalone 56-hex-char token: the encoded width of a key hash.
static KEY_HASH_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9a-fA-F]{56}\b").expect("key hash pattern compiles"));

static ADDRESS_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:addr|addr_test|stake|stake_test)1[02-9ac-hj-np-z]+")
        .expect("address pattern compiles")
});

/// Bech32 data characters (after the `hrp1` separator) two addresses must
/// share to count as the same address in the fallback. Sixteen characters
/// cover the header and the first nine credential bytes on every network.
pub const DEBUG_PREFIX_DATA_CHARS: usize = 16;

const MISSING_WITNESS_PHRASES: &[&str] = &[
    "missingvkeywitnesses",
    "missing vkey witness",
    "missing witness",
    "missing signature",
    "missing required signer",
];

/// Whether a submission error reports absent signatures.
pub fn is_missing_witness(error_text: &str) -> bool {
    let lower = error_text.to_ascii_lowercase();
    MISSING_WITNESS_PHRASES.iter().any(|p| lower.contains(p))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessDiagnosis {
    pub missing_key_hashes: BTreeSet<String>,
    pub offending_utxos: Vec<UnspentOutput>,
    pub offending_addresses: BTreeSet<String>,
}

pub trait WitnessMapper: Send + Sync {
    fn map_missing_witnesses(
        &self,
        error_text: &str,
        candidates: &[UnspentOutput],
        resolver: &dyn OwnershipResolver,
    ) -> WitnessDiagnosis;

    fn is_missing_witness(&self, error_text: &str) -> bool {
        is_missing_witness(error_text)
    }
}

/// Regex-driven mapper. The key-hash pattern can be replaced if the node's
/// error format changes.
#[derive(Debug, Clone)]
pub struct RegexWitnessMapper {
    key_hash: Regex,
}

impl Default for RegexWitnessMapper {
    fn default() -> Self {
        Self {
            key_hash: KEY_HASH_TOKEN.clone(),
        }
    }
}

impl RegexWitnessMapper {
    pub fn with_pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            key_hash: Regex::new(pattern)?,
        })
    }

    /// Key-hash tokens in `error_text`, lower-cased. A pattern with a
    /// capture group yields the first group instead of the whole match.
    pub fn extract_key_hashes(&self, error_text: &str) -> BTreeSet<String> {
        self.key_hash
            .captures_iter(error_text)
            .filter_map(|c| c.get(1).or_else(|| c.get(0)))
            .map(|m| m.as_str().to_ascii_lowercase())
            .collect()
    }
}

impl WitnessMapper for RegexWitnessMapper {
    fn map_missing_witnesses(
        &self,
        error_text: &str,
        candidates: &[UnspentOutput],
        resolver: &dyn OwnershipResolver,
    ) -> WitnessDiagnosis {
        let missing = self.extract_key_hashes(error_text);
        let mut diagnosis = WitnessDiagnosis {
            missing_key_hashes: missing,
            ..Default::default()
        };
        if diagnosis.missing_key_hashes.is_empty() {
            return diagnosis;
        }

        for utxo in candidates {
            let Ok(fingerprint) = resolver.fingerprint_of(&utxo.address) else {
                continue;
            };
            if diagnosis.missing_key_hashes.contains(&fingerprint.to_hex()) {
                diagnosis.offending_utxos.push(utxo.clone());
                diagnosis.offending_addresses.insert(utxo.address.clone());
            }
        }

        if diagnosis.offending_utxos.is_empty() {
            let quoted: Vec<&str> = ADDRESS_TOKEN
                .find_iter(error_text)
                .map(|m| m.as_str())
                .collect();
            for utxo in candidates {
                if quoted.iter().any(|q| shares_prefix(q, &utxo.address)) {
                    diagnosis.offending_utxos.push(utxo.clone());
                    diagnosis.offending_addresses.insert(utxo.address.clone());
                }
            }
            if !diagnosis.offending_utxos.is_empty() {
                log::debug!(
                    "no fingerprint matched; {} inputs matched by address prefix",
                    diagnosis.offending_utxos.len()
                );
            }
        }

        diagnosis
    }
}

fn shares_prefix(quoted: &str, address: &str) -> bool {
    let (Some((hrp_a, data_a)), Some((hrp_b, data_b))) =
        (quoted.split_once('1'), address.split_once('1'))
    else {
        return false;
    };
    hrp_a == hrp_b
        && data_a
            .bytes()
            .zip(data_b.bytes())
            .take_while(|(x, y)| x == y)
            .count()
            >= DEBUG_PREFIX_DATA_CHARS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{KeyHash, ShelleyResolver, enterprise_address};
    use crate::network::Network;
    use crate::value::Value;

    fn utxo(owner: u8, idx: u32) -> UnspentOutput {
        UnspentOutput {
            tx_hash: "ef".repeat(32),
            output_index: idx,
            address: enterprise_address(Network::Preprod, &KeyHash([owner; 28])).unwrap(),
            value: Value::lovelace(2_000_000),
        }
    }

    #[test]
    fn maps_reported_key_hash_to_its_input() {
        let h = KeyHash([0xab; 28]).to_hex();
        let text = format!(
            "ConwayUtxowFailure (MissingVKeyWitnessesUTXOW (fromList [KeyHash {{unKeyHash = \"{}\"}}]))",
            h.to_uppercase()
        );
        let candidates = vec![utxo(0x01, 0), utxo(0xab, 1), utxo(0x02, 2)];
        let d = RegexWitnessMapper::default().map_missing_witnesses(&text, &candidates, &ShelleyResolver);
        assert_eq!(d.missing_key_hashes, BTreeSet::from([h]));
        assert_eq!(d.offending_utxos, vec![candidates[1].clone()]);
        assert_eq!(d.offending_addresses.len(), 1);
    }

    #[test]
    fn tx_hashes_are_not_key_hashes() {
        let text = format!("bad input {} missing witness", "cd".repeat(32));
        let d = RegexWitnessMapper::default().map_missing_witnesses(&text, &[utxo(1, 0)], &ShelleyResolver);
        assert!(d.missing_key_hashes.is_empty());
        assert!(d.offending_utxos.is_empty());
    }

    #[test]
    fn falls_back_to_address_prefix() {
        let victim = utxo(0x33, 0);
        let text = format!(
            "missing signature {} for {}",
            "00".repeat(28),
            &victim.address
        );
        let d = RegexWitnessMapper::default().map_missing_witnesses(
            &text,
            &[victim.clone()],
            &ShelleyResolver,
        );
        assert_eq!(d.offending_utxos, vec![victim]);
    }

    #[test]
    fn unrelated_same_network_address_is_not_offending() {
        let quoted = utxo(0x34, 0);
        let bystander = utxo(0x33, 1);
        // same hrp and header character, credentials diverge right after
        assert!(quoted.address.starts_with(&bystander.address[..12]));
        let text = format!(
            "missing signature {} for {}",
            "00".repeat(28),
            &quoted.address
        );
        let d = RegexWitnessMapper::default().map_missing_witnesses(
            &text,
            &[bystander],
            &ShelleyResolver,
        );
        assert!(d.offending_utxos.is_empty());
        assert!(d.offending_addresses.is_empty());
    }

    #[test]
    fn prefix_match_requires_the_same_hrp() {
        let main = enterprise_address(Network::Mainnet, &KeyHash([0x33; 28])).unwrap();
        let test = enterprise_address(Network::Preprod, &KeyHash([0x33; 28])).unwrap();
        assert!(shares_prefix(&test, &test));
        assert!(!shares_prefix(&main, &test));
        assert!(!shares_prefix("no separator here", &test));
    }

    #[test]
    fn phrase_match_is_case_insensitive() {
        assert!(is_missing_witness("MissingVKeyWitnessesUTXOW"));
        assert!(is_missing_witness("tx failed: Missing Signature"));
        assert!(!is_missing_witness("ValueNotConservedUTxO"));
    }

    #[test]
    fn custom_pattern_can_replace_default() {
        let m = RegexWitnessMapper::with_pattern(r"kh:([0-9a-f]{56})").unwrap();
        let h = KeyHash([0x44; 28]).to_hex();
        assert_eq!(
            m.extract_key_hashes(&format!("expected kh:{h}")),
            BTreeSet::from([h])
        );
        assert!(RegexWitnessMapper::with_pattern("(").is_err());
    }
}
