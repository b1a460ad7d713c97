use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::diagnostics::WitnessDiagnosis;
use crate::error::Error;
use crate::filter::{ExcludedUtxo, OwnedUtxoSet};
use crate::value::UnspentOutput;

/// Machine-readable context attached to every delegation outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    pub excluded_utxos: Vec<ExcludedUtxo>,
    pub wallet_key_fingerprints: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_key_hashes: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offending_utxos: Option<Vec<UnspentOutput>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offending_addresses: Option<BTreeSet<String>>,
}

impl DebugInfo {
    pub fn for_backend(backend: &str) -> Self {
        Self {
            backend: Some(backend.to_string()),
            ..Default::default()
        }
    }

    pub fn record_filter(&mut self, owned: &OwnedUtxoSet) {
        self.excluded_utxos = owned.excluded.clone();
        self.wallet_key_fingerprints = owned.key_fingerprints();
    }

    pub fn record_diagnosis(&mut self, diagnosis: WitnessDiagnosis) {
        self.missing_key_hashes = Some(diagnosis.missing_key_hashes);
        self.offending_utxos = Some(diagnosis.offending_utxos);
        self.offending_addresses = Some(diagnosis.offending_addresses);
    }

    /// Pull whatever diagnostics an error carries.
    pub fn record_error(&mut self, error: &Error) {
        match error {
            Error::NoOwnedUtxos { excluded } => self.excluded_utxos = excluded.clone(),
            Error::MissingWitnessSubmitFailure { diagnosis, .. } => {
                self.record_diagnosis(diagnosis.clone())
            }
            _ => {}
        }
    }
}

/// Either one tier's debug, or both tiers after a failed fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubmissionDebug {
    Fallback {
        #[serde(rename = "mesh")]
        primary: DebugInfo,
        secondary: DebugInfo,
    },
    Single(DebugInfo),
}

impl SubmissionDebug {
    pub fn primary(&self) -> &DebugInfo {
        match self {
            SubmissionDebug::Single(d) => d,
            SubmissionDebug::Fallback { primary, .. } => primary,
        }
    }
}

/// Outcome of a delegation. Failures never escape as `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub debug: SubmissionDebug,
}

impl SubmissionResult {
    pub fn succeeded(tx_hash: String, debug: DebugInfo) -> Self {
        Self {
            success: true,
            tx_hash: Some(tx_hash),
            error: None,
            debug: SubmissionDebug::Single(debug),
        }
    }

    pub fn failed(error: &Error, debug: SubmissionDebug) -> Self {
        Self {
            success: false,
            tx_hash: None,
            error: Some(error.to_string()),
            debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_debug_serializes_both_tiers() {
        let result = SubmissionResult::failed(
            &Error::Submit("rejected".into()),
            SubmissionDebug::Fallback {
                primary: DebugInfo::for_backend("primary"),
                secondary: DebugInfo::for_backend("secondary"),
            },
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["debug"]["mesh"]["backend"], "primary");
        assert!(json["debug"].get("primary").is_none());
        assert_eq!(json["debug"]["secondary"]["backend"], "secondary");
        assert_eq!(json["error"], "submit error: rejected");
        assert!(json.get("tx_hash").is_none());

        let back: SubmissionResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn mapped_fields_only_appear_after_diagnosis() {
        let mut d = DebugInfo::default();
        let json = serde_json::to_value(&d).unwrap();
        assert!(json.get("missing_key_hashes").is_none());
        d.record_diagnosis(WitnessDiagnosis::default());
        let json = serde_json::to_value(&d).unwrap();
        assert!(json["missing_key_hashes"].is_array());
    }
}
