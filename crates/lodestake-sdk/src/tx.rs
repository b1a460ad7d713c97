//! Transaction body assembly and hashing.

use std::collections::BTreeMap;

use pallas_codec::minicbor::encode::{Error as EncodeError, Write};
use pallas_codec::minicbor::{self, Encode, Encoder};
use pallas_crypto::hash::Hasher;

use crate::address::address_bytes;
use crate::certificate::CertificateSet;
use crate::error::{Error, Result};
use crate::value::{AssetUnit, UnspentOutput, Value};

type EncodeResult<W> = std::result::Result<(), EncodeError<<W as Write>::Error>>;

/// Bytes one vkey witness adds to a serialized transaction
/// (array header + 32-byte vkey + 64-byte signature with headers).
pub const VKEY_WITNESS_SIZE: usize = 1 + (2 + 32) + (2 + 64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    pub tx_hash: [u8; 32],
    pub index: u32,
}

impl TxInput {
    pub fn from_utxo(utxo: &UnspentOutput, backend: &'static str) -> Result<Self> {
        let bytes = hex::decode(&utxo.tx_hash)
            .map_err(|e| Error::build(backend, format!("{}: tx hash: {e}", utxo.outpoint())))?;
        let tx_hash: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::build(backend, format!("{}: tx hash must be 32 bytes", utxo.outpoint())))?;
        Ok(Self {
            tx_hash,
            index: utxo.output_index,
        })
    }
}

impl<C> Encode<C> for TxInput {
    fn encode<W: Write>(&self, e: &mut Encoder<W>, _ctx: &mut C) -> EncodeResult<W> {
        e.array(2)?.bytes(&self.tx_hash)?.u32(self.index)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub address: String,
    pub address_bytes: Vec<u8>,
    pub coin: u64,
    /// policy id → asset name → quantity
    pub assets: BTreeMap<[u8; 28], BTreeMap<Vec<u8>, u64>>,
}

impl TxOutput {
    /// Narrow a [`Value`] into ledger words.
    pub fn from_value(address: &str, value: &Value, backend: &'static str) -> Result<Self> {
        let raw = address_bytes(address).map_err(|e| Error::build(backend, e.to_string()))?;
        let mut out = TxOutput {
            address: address.to_string(),
            address_bytes: raw,
            coin: 0,
            assets: BTreeMap::new(),
        };
        for (unit, qty) in value.iter() {
            let amount = qty
                .to_u64()
                .ok_or_else(|| Error::build(backend, format!("{unit}: quantity {qty} overflows u64")))?;
            match unit {
                AssetUnit::Lovelace => out.coin = amount,
                AssetUnit::Native {
                    policy_id,
                    asset_name,
                } => {
                    out.assets
                        .entry(*policy_id)
                        .or_default()
                        .insert(asset_name.clone(), amount);
                }
            }
        }
        Ok(out)
    }
}

impl<C> Encode<C> for TxOutput {
    fn encode<W: Write>(&self, e: &mut Encoder<W>, _ctx: &mut C) -> EncodeResult<W> {
        e.array(2)?.bytes(&self.address_bytes)?;
        if self.assets.is_empty() {
            e.u64(self.coin)?;
            return Ok(());
        }
        e.array(2)?.u64(self.coin)?.map(self.assets.len() as u64)?;
        for (policy, names) in &self.assets {
            e.bytes(policy)?.map(names.len() as u64)?;
            for (name, qty) in names {
                e.bytes(name)?.u64(*qty)?;
            }
        }
        Ok(())
    }
}

/// An unsigned transaction body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionBody {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub fee: u64,
    pub certificates: CertificateSet,
}

impl TransactionBody {
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        minicbor::to_vec(self).map_err(|e| Error::build("encoder", e.to_string()))
    }
}

impl<C> Encode<C> for TransactionBody {
    fn encode<W: Write>(&self, e: &mut Encoder<W>, ctx: &mut C) -> EncodeResult<W> {
        let fields = if self.certificates.is_empty() { 3 } else { 4 };
        e.map(fields)?;

        e.u8(0)?.array(self.inputs.len() as u64)?;
        for input in &self.inputs {
            e.encode_with(input, ctx)?;
        }

        e.u8(1)?.array(self.outputs.len() as u64)?;
        for output in &self.outputs {
            e.encode_with(output, ctx)?;
        }

        e.u8(2)?.u64(self.fee)?;

        if !self.certificates.is_empty() {
            e.u8(4)?.array(self.certificates.len() as u64)?;
            for cert in self.certificates.as_slice() {
                e.encode_with(cert, ctx)?;
            }
        }
        Ok(())
    }
}

/// Blake2b-256 of the encoded body.
pub fn hash_body(body_cbor: &[u8]) -> [u8; 32] {
    *Hasher::<256>::hash(body_cbor)
}

/// A vkey witness: verification key and signature over the body hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VkeyWitness {
    pub vkey: [u8; 32],
    pub signature: [u8; 64],
}

impl<C> Encode<C> for VkeyWitness {
    fn encode<W: Write>(&self, e: &mut Encoder<W>, _ctx: &mut C) -> EncodeResult<W> {
        e.array(2)?.bytes(&self.vkey)?.bytes(&self.signature)?;
        Ok(())
    }
}

/// Wrap an encoded body and its witnesses into a full transaction. The body
/// bytes are spliced in as-is so the signed hash stays valid.
pub fn encode_transaction(body_cbor: &[u8], witnesses: &[VkeyWitness]) -> Result<Vec<u8>> {
    let capacity = estimated_size(body_cbor.len(), witnesses.len());
    let mut e = Encoder::new(Vec::with_capacity(capacity));
    write_transaction(&mut e, body_cbor, witnesses)
        .map_err(|err| Error::build("encoder", err.to_string()))?;
    Ok(e.into_writer())
}

fn write_transaction(
    e: &mut Encoder<Vec<u8>>,
    body_cbor: &[u8],
    witnesses: &[VkeyWitness],
) -> EncodeResult<Vec<u8>> {
    e.array(4)?;
    e.writer_mut().extend_from_slice(body_cbor);
    if witnesses.is_empty() {
        e.map(0)?;
    } else {
        e.map(1)?.u8(0)?.array(witnesses.len() as u64)?;
        for w in witnesses {
            e.encode(w)?;
        }
    }
    e.bool(true)?.null()?;
    Ok(())
}

/// Serialized size of a transaction carrying `body_len` body bytes and
/// `witness_count` vkey witnesses.
pub fn estimated_size(body_len: usize, witness_count: usize) -> usize {
    // outer array + witness map/array headers + validity flag + auxiliary data
    let envelope = 1 + 1 + 1 + 3 + 1 + 1;
    body_len + envelope + witness_count * VKEY_WITNESS_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{KeyHash, enterprise_address};
    use crate::network::Network;

    fn output(coin: u64) -> TxOutput {
        let address = enterprise_address(Network::Preprod, &KeyHash([1; 28])).unwrap();
        TxOutput::from_value(&address, &Value::lovelace(coin), "test").unwrap()
    }

    #[test]
    fn body_without_certificates_has_three_fields() {
        let body = TransactionBody {
            inputs: vec![TxInput {
                tx_hash: [0xaa; 32],
                index: 1,
            }],
            outputs: vec![output(2_000_000)],
            fee: 170_000,
            certificates: CertificateSet::default(),
        };
        let bytes = body.to_cbor().unwrap();
        assert_eq!(bytes[0], 0xa3);
        // key 0, array(1), array(2), bytes(32)
        assert_eq!(&bytes[1..6], &[0x00, 0x81, 0x82, 0x58, 0x20]);
    }

    #[test]
    fn body_hash_changes_with_fee() {
        let mut body = TransactionBody {
            inputs: vec![],
            outputs: vec![output(1_000_000)],
            fee: 1,
            certificates: CertificateSet::default(),
        };
        let a = hash_body(&body.to_cbor().unwrap());
        body.fee = 2;
        let b = hash_body(&body.to_cbor().unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn size_estimate_accounts_for_witnesses() {
        let body = vec![0u8; 200];
        let unsigned = encode_transaction(&body, &[]).unwrap();
        let signed = encode_transaction(
            &body,
            &[VkeyWitness {
                vkey: [1; 32],
                signature: [2; 64],
            }],
        )
        .unwrap();
        assert_eq!(&unsigned[..2], &[0x84, 0x00]);
        assert_eq!(&unsigned[unsigned.len() - 3..], &[0xa0, 0xf5, 0xf6]);
        assert!(estimated_size(200, 0) >= unsigned.len());
        assert!(estimated_size(200, 1) >= signed.len());
    }

    #[test]
    fn multiasset_output_encodes_asset_map() {
        let mut value = Value::lovelace(1_500_000);
        let unit: AssetUnit = format!("{}6869", "cd".repeat(28)).parse().unwrap();
        value.add(unit, 7u64.into());
        let out = TxOutput::from_value(&output(0).address, &value, "test").unwrap();
        assert_eq!(out.coin, 1_500_000);
        assert_eq!(out.assets.len(), 1);
        let bytes = minicbor::to_vec(&out).unwrap();
        // array(2), address bytes(29), then [coin, {policy: {name: qty}}]
        let value = &bytes[1 + 2 + 29..];
        assert_eq!(&value[..2], &[0x82, 0x1a]);
        assert_eq!(&value[6..9], &[0xa1, 0x58, 0x1c]);
        assert_eq!(&value[value.len() - 5..], &[0xa1, 0x42, 0x68, 0x69, 0x07]);
    }
}
