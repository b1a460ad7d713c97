//! Address decoding and key-ownership resolution.
//!
//! The "fingerprint" of an address is its primary credential when that
//! credential is a key hash: the payment key for base/pointer/enterprise
//! addresses, the stake key for reward addresses.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use pallas_addresses::{
    Address, ShelleyAddress, ShelleyDelegationPart, ShelleyPaymentPart, StakeAddress, StakePayload,
};
use pallas_crypto::hash::{Hash as LedgerHash, Hasher};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::error::{Error, Result};
use crate::network::Network;

pub const KEY_HASH_LEN: usize = 28;

const KIND_BYRON: u8 = 0b1000;

// ── KeyHash ─────────────────────────────────────────────────────────────

/// Blake2b-224 hash of an ed25519 verification key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyHash(pub [u8; KEY_HASH_LEN]);

impl KeyHash {
    pub fn of_verification_key(vkey: &[u8; 32]) -> Self {
        KeyHash::from(&Hasher::<224>::hash(vkey))
    }

    fn to_pallas(self) -> LedgerHash<KEY_HASH_LEN> {
        LedgerHash::new(self.0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_HASH_LEN] {
        &self.0
    }
}

impl From<&LedgerHash<KEY_HASH_LEN>> for KeyHash {
    fn from(hash: &LedgerHash<KEY_HASH_LEN>) -> Self {
        KeyHash(**hash)
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyHash({})", self.to_hex())
    }
}

impl FromStr for KeyHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidAddress(format!("key hash: {e}")))?;
        let arr: [u8; KEY_HASH_LEN] = bytes
            .try_into()
            .map_err(|_| Error::InvalidAddress("key hash must be 28 bytes".into()))?;
        Ok(KeyHash(arr))
    }
}

impl Serialize for KeyHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for KeyHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Resolution ──────────────────────────────────────────────────────────

/// Why an address has no key fingerprint. Callers treat every variant as
/// "not owned".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Unresolvable {
    #[error("not a bech32 or hex address")]
    Encoding,
    #[error("address payload too short")]
    Truncated,
    #[error("malformed address: {0}")]
    Malformed(String),
    #[error("credential is a script hash")]
    ScriptCredential,
    #[error("byron address has no key credential")]
    Byron,
    #[error("unknown address header {0:#04x}")]
    UnknownHeader(u8),
}

/// Maps an address to the key hash that must sign for it.
pub trait OwnershipResolver: Send + Sync {
    fn fingerprint_of(&self, address: &str) -> std::result::Result<KeyHash, Unresolvable>;
}

/// Resolver for Shelley-era addresses in bech32 or raw hex form.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShelleyResolver;

impl OwnershipResolver for ShelleyResolver {
    fn fingerprint_of(&self, address: &str) -> std::result::Result<KeyHash, Unresolvable> {
        let bytes = decode_address(address)?;
        primary_key_hash(&parse_address(&bytes)?)
    }
}

/// Decode a bech32 (`addr…`, `stake…`) or raw hex address into its bytes.
pub fn decode_address(address: &str) -> std::result::Result<Vec<u8>, Unresolvable> {
    let trimmed = address.trim();
    if trimmed.starts_with("addr") || trimmed.starts_with("stake") {
        let (hrp, data) = bech32::decode(trimmed).map_err(|_| Unresolvable::Encoding)?;
        return match hrp.as_str() {
            "addr" | "addr_test" | "stake" | "stake_test" => Ok(data),
            _ => Err(Unresolvable::Encoding),
        };
    }
    if !trimmed.is_empty() && trimmed.len() % 2 == 0 {
        if let Ok(bytes) = hex::decode(trimmed) {
            return Ok(bytes);
        }
    }
    Err(Unresolvable::Encoding)
}

/// Parse raw address bytes. Payload lengths are checked against the header
/// kind before the bytes reach the ledger parser.
fn parse_address(bytes: &[u8]) -> std::result::Result<Address, Unresolvable> {
    let header = *bytes.first().ok_or(Unresolvable::Truncated)?;
    let well_sized = match header >> 4 {
        0..=3 => bytes.len() == 1 + 2 * KEY_HASH_LEN,
        4 | 5 => pointer_is_well_formed(bytes.get(1 + KEY_HASH_LEN..).unwrap_or_default()),
        6 | 7 | 14 | 15 => bytes.len() == 1 + KEY_HASH_LEN,
        KIND_BYRON => return Err(Unresolvable::Byron),
        _ => return Err(Unresolvable::UnknownHeader(header)),
    };
    if !well_sized {
        return Err(Unresolvable::Truncated);
    }
    Address::from_bytes(bytes).map_err(|e| Unresolvable::Malformed(e.to_string()))
}

/// A chain pointer is exactly three variable-length naturals.
fn pointer_is_well_formed(pointer: &[u8]) -> bool {
    let terminators = pointer.iter().filter(|b| *b & 0x80 == 0).count();
    terminators == 3 && pointer.last().is_some_and(|b| b & 0x80 == 0)
}

fn primary_key_hash(address: &Address) -> std::result::Result<KeyHash, Unresolvable> {
    match address {
        Address::Shelley(shelley) => match shelley.payment() {
            ShelleyPaymentPart::Key(hash) => Ok(KeyHash::from(hash)),
            ShelleyPaymentPart::Script(_) => Err(Unresolvable::ScriptCredential),
        },
        Address::Stake(stake) => match stake.payload() {
            StakePayload::Stake(hash) => Ok(KeyHash::from(hash)),
            StakePayload::Script(_) => Err(Unresolvable::ScriptCredential),
        },
        Address::Byron(_) => Err(Unresolvable::Byron),
    }
}

/// Classify a wallet's own addresses into a fingerprint set. Addresses that
/// don't resolve are skipped.
pub fn wallet_key_set<'a>(
    resolver: &dyn OwnershipResolver,
    addresses: impl IntoIterator<Item = &'a String>,
) -> BTreeSet<KeyHash> {
    addresses
        .into_iter()
        .filter_map(|addr| resolver.fingerprint_of(addr).ok())
        .collect()
}

fn parse(address: &str) -> Result<Address> {
    decode_address(address)
        .and_then(|bytes| parse_address(&bytes))
        .map_err(|e| Error::InvalidAddress(format!("{address}: {e}")))
}

/// Raw bytes of an address, for embedding in a transaction output.
pub fn address_bytes(address: &str) -> Result<Vec<u8>> {
    parse(address).map(|a| a.to_vec())
}

/// Network id nibble of a Shelley address header.
pub fn network_id_of(address: &str) -> Result<u8> {
    let network = match parse(address)? {
        Address::Shelley(shelley) => shelley.network(),
        Address::Stake(stake) => stake.network(),
        Address::Byron(_) => {
            return Err(Error::InvalidAddress(format!("{address}: no shelley header")));
        }
    };
    Ok(match network {
        pallas_addresses::Network::Testnet => 0,
        pallas_addresses::Network::Mainnet => 1,
        pallas_addresses::Network::Other(id) => id,
    })
}

/// Stake credential of a reward address.
pub fn reward_key_hash(reward_address: &str) -> Result<KeyHash> {
    match parse(reward_address)? {
        Address::Stake(stake) => match stake.payload() {
            StakePayload::Stake(hash) => Ok(KeyHash::from(hash)),
            StakePayload::Script(_) => Err(Error::InvalidAddress(format!(
                "{reward_address} is not a key-hash reward address"
            ))),
        },
        _ => Err(Error::InvalidAddress(format!(
            "{reward_address} is not a key-hash reward address"
        ))),
    }
}

// ── Construction ────────────────────────────────────────────────────────

fn shelley(network: Network, payment: &KeyHash, delegation: ShelleyDelegationPart) -> ShelleyAddress {
    ShelleyAddress::new(
        pallas_addresses::Network::from(network.network_id()),
        ShelleyPaymentPart::Key(payment.to_pallas()),
        delegation,
    )
}

fn encode_error(e: pallas_addresses::Error) -> Error {
    Error::InvalidAddress(format!("bech32 encode: {e}"))
}

/// Base address: payment key + stake key.
pub fn base_address(network: Network, payment: &KeyHash, stake: &KeyHash) -> Result<String> {
    shelley(network, payment, ShelleyDelegationPart::Key(stake.to_pallas()))
        .to_bech32()
        .map_err(encode_error)
}

/// Enterprise address: payment key only.
pub fn enterprise_address(network: Network, payment: &KeyHash) -> Result<String> {
    shelley(network, payment, ShelleyDelegationPart::Null)
        .to_bech32()
        .map_err(encode_error)
}

/// Reward (stake) address for a stake key.
pub fn reward_address(network: Network, stake: &KeyHash) -> Result<String> {
    let base = shelley(network, stake, ShelleyDelegationPart::Key(stake.to_pallas()));
    StakeAddress::try_from(base)
        .and_then(|reward| reward.to_bech32())
        .map_err(encode_error)
}
