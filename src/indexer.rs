//! HTTP adapter for a Blockfrost-compatible indexer. Implements both the
//! engine's `ChainIndexer` and its `HandleRegistry`.

use std::time::Duration;

use lodestake_sdk::{
    AccountStatus, AssetAmount, AssetUnit, ChainIndexer, HandleRegistry, Quantity, UnspentOutput,
    Value,
};
use reqwest::StatusCode;
use reqwest::blocking::{Client as HttpClient, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::AppConfig;

/// Minting policy of the ADA Handle collection.
pub const HANDLE_POLICY_ID: &str = "f0ff48bbb7bbe9d59a40f1ce90e9e9d0ff5002ec48f232b49ca0fb9a";
/// CIP-68 (222) user-token label prefixed to newer handle asset names.
const CIP68_USER_TOKEN_LABEL: &str = "000de140";
const PAGE_SIZE: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("indexer returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("decode error: {0}")]
    Decode(String),
}

impl From<IndexerError> for lodestake_sdk::Error {
    fn from(e: IndexerError) -> Self {
        lodestake_sdk::Error::Indexer(e.to_string())
    }
}

#[derive(Deserialize)]
struct RawUtxo {
    tx_hash: String,
    output_index: u32,
    address: String,
    amount: Vec<AssetAmount>,
}

impl RawUtxo {
    fn into_utxo(self) -> Result<UnspentOutput, IndexerError> {
        let mut value = Value::default();
        for asset in &self.amount {
            let unit: AssetUnit = asset
                .unit
                .parse()
                .map_err(|e| IndexerError::Decode(format!("{}#{}: {e}", self.tx_hash, self.output_index)))?;
            let quantity: Quantity = asset
                .quantity
                .parse()
                .map_err(|e| IndexerError::Decode(format!("{}#{}: {e}", self.tx_hash, self.output_index)))?;
            value.add(unit, quantity);
        }
        Ok(UnspentOutput {
            tx_hash: self.tx_hash,
            output_index: self.output_index,
            address: self.address,
            value,
        })
    }
}

#[derive(Deserialize)]
struct RawHolder {
    address: String,
}

pub struct BlockfrostIndexer {
    client: HttpClient,
    base_url: String,
    project_id: Option<String>,
}

impl BlockfrostIndexer {
    pub fn new(base_url: &str, project_id: Option<String>) -> Result<Self, IndexerError> {
        let client = HttpClient::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, IndexerError> {
        Self::new(config.indexer_url(), config.project_id.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.project_id {
            Some(id) => request.header("project_id", id),
            None => request,
        }
    }

    /// GET `path` as JSON. A 404 is an empty result, not an error.
    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, IndexerError> {
        let response = self.authorize(self.client.get(self.url(path))).send()?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response)?;
        response
            .json::<T>()
            .map(Some)
            .map_err(|e| IndexerError::Decode(format!("{path}: {e}")))
    }

    fn get_paged<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, IndexerError> {
        let mut out = Vec::new();
        for page in 1.. {
            let Some(batch) = self.get_json::<Vec<T>>(&format!("{path}?page={page}"))? else {
                break;
            };
            let done = batch.len() < PAGE_SIZE;
            out.extend(batch);
            if done {
                break;
            }
        }
        Ok(out)
    }

    fn asset_holders(&self, unit: &str) -> Result<Vec<String>, IndexerError> {
        let holders: Vec<RawHolder> = self.get_paged(&format!("assets/{unit}/addresses"))?;
        Ok(holders.into_iter().map(|h| h.address).collect())
    }
}

fn check_status(response: Response) -> Result<Response, IndexerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(IndexerError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Candidate asset units for a handle: the CIP-68 user token first, then the
/// original plain-name token.
pub fn handle_asset_units(name: &str) -> [String; 2] {
    let name_hex = hex::encode(name.as_bytes());
    [
        format!("{HANDLE_POLICY_ID}{CIP68_USER_TOKEN_LABEL}{name_hex}"),
        format!("{HANDLE_POLICY_ID}{name_hex}"),
    ]
}

impl ChainIndexer for BlockfrostIndexer {
    fn utxos(&self, address: &str) -> lodestake_sdk::Result<Vec<UnspentOutput>> {
        let raw: Vec<RawUtxo> = self.get_paged(&format!("addresses/{address}/utxos"))?;
        log::debug!("{} utxos at {address}", raw.len());
        raw.into_iter()
            .map(|u| u.into_utxo().map_err(Into::into))
            .collect()
    }

    fn account_status(&self, reward_address: &str) -> lodestake_sdk::Result<AccountStatus> {
        let status: Option<AccountStatus> = self.get_json(&format!("accounts/{reward_address}"))?;
        Ok(status.unwrap_or_default())
    }

    fn submit(&self, tx_cbor: &[u8]) -> lodestake_sdk::Result<String> {
        let response = self
            .authorize(self.client.post(self.url("tx/submit")))
            .header("Content-Type", "application/cbor")
            .body(tx_cbor.to_vec())
            .send()
            .map_err(IndexerError::from)?;
        let status = response.status();
        if !status.is_success() {
            // Raw node text, so missing-witness rejections can be diagnosed.
            let body = response.text().unwrap_or_default();
            return Err(lodestake_sdk::Error::Submit(format!("{status}: {body}")));
        }
        response
            .json::<String>()
            .map_err(|e| IndexerError::Decode(format!("submit response: {e}")).into())
    }
}

impl HandleRegistry for BlockfrostIndexer {
    fn handle_holders(&self, handle: &str) -> lodestake_sdk::Result<Vec<String>> {
        for unit in handle_asset_units(handle) {
            let holders = self.asset_holders(&unit)?;
            if !holders.is_empty() {
                return Ok(holders);
            }
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexer_utxo_json_decodes_into_value() {
        let json = format!(
            r#"[{{
                "tx_hash": "{}",
                "output_index": 1,
                "address": "addr_test1xyz",
                "amount": [
                    {{"unit": "lovelace", "quantity": "4200000"}},
                    {{"unit": "{HANDLE_POLICY_ID}616c696365", "quantity": "1"}}
                ],
                "block": "ignored"
            }}]"#,
            "ab".repeat(32)
        );
        let raw: Vec<RawUtxo> = serde_json::from_str(&json).unwrap();
        let utxo = raw.into_iter().next().unwrap().into_utxo().unwrap();
        assert_eq!(utxo.coin(), Some(4_200_000));
        assert!(!utxo.value.is_pure_lovelace());
        assert_eq!(utxo.outpoint(), format!("{}#1", "ab".repeat(32)));
    }

    #[test]
    fn malformed_unit_is_a_decode_error() {
        let raw = RawUtxo {
            tx_hash: "00".repeat(32),
            output_index: 0,
            address: "addr_test1xyz".into(),
            amount: vec![AssetAmount {
                unit: "nonsense".into(),
                quantity: "1".into(),
            }],
        };
        assert!(matches!(raw.into_utxo(), Err(IndexerError::Decode(_))));
    }

    #[test]
    fn handle_units_cover_both_token_standards() {
        let [cip68, legacy] = handle_asset_units("alice");
        assert_eq!(legacy, format!("{HANDLE_POLICY_ID}616c696365"));
        assert_eq!(cip68, format!("{HANDLE_POLICY_ID}000de140616c696365"));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let indexer = BlockfrostIndexer::new("http://localhost:3000/api/", None).unwrap();
        assert_eq!(indexer.url("/tx/submit"), "http://localhost:3000/api/tx/submit");
    }
}
