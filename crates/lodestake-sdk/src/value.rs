//! Multi-asset values, unspent outputs and payout recipients.
//!
//! Quantities are arbitrary-precision unsigned integers carried as decimal
//! strings on the wire. Backends narrow them to `u64` only when encoding a
//! transaction body.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Hex length of a minting policy id (28 bytes).
pub const POLICY_ID_HEX_LEN: usize = 56;
/// Maximum asset name length in bytes.
pub const MAX_ASSET_NAME_LEN: usize = 32;

const LOVELACE: &str = "lovelace";

// ── Quantity ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity(BigUint);

impl Quantity {
    pub fn zero() -> Self {
        Self(BigUint::default())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == BigUint::default()
    }

    /// Narrow to `u64`, or `None` when the amount exceeds the ledger's word size.
    pub fn to_u64(&self) -> Option<u64> {
        u64::try_from(&self.0).ok()
    }

    /// Saturating subtraction.
    pub fn saturating_sub(&self, other: &Quantity) -> Quantity {
        if self.0 > other.0 {
            Quantity(&self.0 - &other.0)
        } else {
            Quantity::zero()
        }
    }
}

impl From<u64> for Quantity {
    fn from(v: u64) -> Self {
        Self(BigUint::from(v))
    }
}

impl FromStr for Quantity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidAsset(format!("quantity {s:?} is not a decimal integer")));
        }
        BigUint::parse_bytes(trimmed.as_bytes(), 10)
            .map(Quantity)
            .ok_or_else(|| Error::InvalidAsset(format!("quantity {s:?} is not a decimal integer")))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<&Quantity> for &Quantity {
    type Output = Quantity;

    fn add(self, rhs: &Quantity) -> Quantity {
        Quantity(&self.0 + &rhs.0)
    }
}

impl AddAssign<&Quantity> for Quantity {
    fn add_assign(&mut self, rhs: &Quantity) {
        self.0 += &rhs.0;
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        // Indexers disagree on whether amounts are JSON strings or numbers.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Raw::Number(n) => Ok(Quantity::from(n)),
        }
    }
}

// ── AssetUnit ───────────────────────────────────────────────────────────

/// Either the native coin or `policy_id ‖ asset_name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AssetUnit {
    Lovelace,
    Native {
        policy_id: [u8; 28],
        asset_name: Vec<u8>,
    },
}

impl AssetUnit {
    pub fn is_lovelace(&self) -> bool {
        matches!(self, AssetUnit::Lovelace)
    }
}

impl FromStr for AssetUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == LOVELACE {
            return Ok(AssetUnit::Lovelace);
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidAsset(format!("unit {s:?} is not hex")));
        }
        if s.len() < POLICY_ID_HEX_LEN {
            return Err(Error::InvalidAsset(format!("unit {s:?} is shorter than a policy id")));
        }
        let (policy_hex, name_hex) = s.split_at(POLICY_ID_HEX_LEN);
        let policy = hex::decode(policy_hex)
            .map_err(|e| Error::InvalidAsset(format!("unit {s:?}: policy id: {e}")))?;
        let asset_name = hex::decode(name_hex)
            .map_err(|e| Error::InvalidAsset(format!("unit {s:?}: asset name: {e}")))?;
        if asset_name.len() > MAX_ASSET_NAME_LEN {
            return Err(Error::InvalidAsset(format!(
                "unit {s:?}: asset name longer than {MAX_ASSET_NAME_LEN} bytes"
            )));
        }
        let policy_id: [u8; 28] = policy
            .try_into()
            .map_err(|_| Error::InvalidAsset(format!("unit {s:?}: policy id must be 28 bytes")))?;
        Ok(AssetUnit::Native {
            policy_id,
            asset_name,
        })
    }
}

impl fmt::Display for AssetUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetUnit::Lovelace => f.write_str(LOVELACE),
            AssetUnit::Native {
                policy_id,
                asset_name,
            } => write!(f, "{}{}", hex::encode(policy_id), hex::encode(asset_name)),
        }
    }
}

impl Serialize for AssetUnit {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AssetUnit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Value ───────────────────────────────────────────────────────────────

/// A bundle of assets keyed by unit. Zero entries are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Value(BTreeMap<AssetUnit, Quantity>);

impl Value {
    pub fn lovelace(amount: u64) -> Self {
        let mut v = Value::default();
        v.add(AssetUnit::Lovelace, Quantity::from(amount));
        v
    }

    pub fn add(&mut self, unit: AssetUnit, quantity: Quantity) {
        if quantity.is_zero() {
            return;
        }
        *self.0.entry(unit).or_default() += &quantity;
    }

    pub fn merge(&mut self, other: &Value) {
        for (unit, qty) in &other.0 {
            self.add(unit.clone(), qty.clone());
        }
    }

    pub fn get(&self, unit: &AssetUnit) -> Quantity {
        self.0.get(unit).cloned().unwrap_or_default()
    }

    pub fn coin(&self) -> Quantity {
        self.get(&AssetUnit::Lovelace)
    }

    pub fn is_pure_lovelace(&self) -> bool {
        self.0.keys().all(AssetUnit::is_lovelace)
    }

    pub fn native_assets(&self) -> impl Iterator<Item = (&AssetUnit, &Quantity)> {
        self.0.iter().filter(|(unit, _)| !unit.is_lovelace())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AssetUnit, &Quantity)> {
        self.0.iter()
    }

    /// Subtract `other` unit by unit. Fails if any unit would go negative.
    pub fn checked_sub(&self, other: &Value) -> Option<Value> {
        let mut out = self.clone();
        for (unit, qty) in &other.0 {
            let have = out.get(unit);
            if have < *qty {
                return None;
            }
            let left = have.saturating_sub(qty);
            if left.is_zero() {
                out.0.remove(unit);
            } else {
                out.0.insert(unit.clone(), left);
            }
        }
        Some(out)
    }

    /// Whether `self` holds at least `other` of every unit.
    pub fn covers(&self, other: &Value) -> bool {
        other.0.iter().all(|(unit, qty)| self.get(unit) >= *qty)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(AssetUnit, Quantity)> for Value {
    fn from_iter<I: IntoIterator<Item = (AssetUnit, Quantity)>>(iter: I) -> Self {
        let mut v = Value::default();
        for (unit, qty) in iter {
            v.add(unit, qty);
        }
        v
    }
}

// ── UnspentOutput ───────────────────────────────────────────────────────

/// An indexer snapshot of one unspent output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub tx_hash: String,
    pub output_index: u32,
    pub address: String,
    pub value: Value,
}

impl UnspentOutput {
    /// `tx_hash#index`, the conventional display form of an outpoint.
    pub fn outpoint(&self) -> String {
        format!("{}#{}", self.tx_hash, self.output_index)
    }

    /// Lovelace held, if it fits the ledger word size.
    pub fn coin(&self) -> Option<u64> {
        self.value.coin().to_u64()
    }
}

// ── Recipients ──────────────────────────────────────────────────────────

/// One `{unit, quantity}` entry as supplied by the caller (unparsed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    pub unit: String,
    pub quantity: String,
}

/// One payout destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientOutput {
    pub address: String,
    pub assets: Vec<AssetAmount>,
}

impl RecipientOutput {
    pub fn lovelace(address: impl Into<String>, amount: u64) -> Self {
        Self {
            address: address.into(),
            assets: vec![AssetAmount {
                unit: LOVELACE.to_string(),
                quantity: amount.to_string(),
            }],
        }
    }

    /// Parse the asset list into a [`Value`].
    pub fn value(&self) -> Result<Value> {
        let mut value = Value::default();
        for asset in &self.assets {
            let unit: AssetUnit = asset.unit.parse()?;
            let qty: Quantity = asset.quantity.parse()?;
            value.add(unit, qty);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = "0b1c2d3e4f5a6b7c8d9e0f1a2b3c4d5e6f7a8b9c0d1e2f3a4b5c6d7e";

    #[test]
    fn asset_unit_parses_policy_and_name() {
        let unit: AssetUnit = format!("{POLICY}746f6b656e").parse().unwrap();
        match &unit {
            AssetUnit::Native {
                policy_id,
                asset_name,
            } => {
                assert_eq!(hex::encode(policy_id), POLICY);
                assert_eq!(asset_name, b"token");
            }
            AssetUnit::Lovelace => panic!("expected native unit"),
        }
        assert_eq!(unit.to_string(), format!("{POLICY}746f6b656e"));
    }

    #[test]
    fn asset_unit_rejects_short_or_non_hex() {
        assert!("abcd".parse::<AssetUnit>().is_err());
        assert!(format!("{POLICY}zz").parse::<AssetUnit>().is_err());
        assert!("lovelace".parse::<AssetUnit>().unwrap().is_lovelace());
    }

    #[test]
    fn asset_unit_rejects_multibyte_chars_at_policy_boundary() {
        let unit = format!("{}\u{e9}00", "a".repeat(55));
        assert!(matches!(unit.parse::<AssetUnit>(), Err(Error::InvalidAsset(_))));
        let unit = format!("{}\u{e9}", &POLICY[..54]);
        assert!(matches!(unit.parse::<AssetUnit>(), Err(Error::InvalidAsset(_))));
    }

    #[test]
    fn quantity_is_arbitrary_precision() {
        let q: Quantity = "340282366920938463463374607431768211456".parse().unwrap();
        assert!(q.to_u64().is_none());
        assert_eq!(q.to_string(), "340282366920938463463374607431768211456");
        assert!("1.5".parse::<Quantity>().is_err());
        assert!("-3".parse::<Quantity>().is_err());
        assert!("".parse::<Quantity>().is_err());
    }

    #[test]
    fn quantity_deserializes_from_string_or_number() {
        let a: Quantity = serde_json::from_str("\"42\"").unwrap();
        let b: Quantity = serde_json::from_str("42").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn value_checked_sub_refuses_negative() {
        let mut have = Value::lovelace(5_000_000);
        let unit: AssetUnit = format!("{POLICY}01").parse().unwrap();
        have.add(unit.clone(), Quantity::from(10));

        let mut spend = Value::lovelace(2_000_000);
        spend.add(unit.clone(), Quantity::from(10));
        let left = have.checked_sub(&spend).unwrap();
        assert_eq!(left, Value::lovelace(3_000_000));
        assert!(left.is_pure_lovelace());

        assert!(Value::lovelace(1).checked_sub(&Value::lovelace(2)).is_none());
    }

    #[test]
    fn value_serializes_as_unit_map() {
        let v = Value::lovelace(7);
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"{"lovelace":"7"}"#);
        let back: Value = serde_json::from_str(r#"{"lovelace":"7"}"#).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn recipient_value_parses_assets() {
        let r = RecipientOutput::lovelace("addr_test1xyz", 5_000_000);
        assert_eq!(r.value().unwrap().coin(), Quantity::from(5_000_000));
    }
}
