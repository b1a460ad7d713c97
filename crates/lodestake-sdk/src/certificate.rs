//! Delegation targets and the certificates that bind a reward account to them.

use pallas_codec::minicbor::encode::{Error as EncodeError, Write};
use pallas_codec::minicbor::{Encode, Encoder};
use serde::{Deserialize, Serialize};

use crate::address::{KEY_HASH_LEN, KeyHash};
use crate::error::{Error, Result};

// Conway certificate tags.
const CERT_STAKE_REGISTRATION: u64 = 0;
const CERT_STAKE_DELEGATION: u64 = 2;
const CERT_VOTE_DELEGATION: u64 = 9;

// CIP-129 governance id headers.
const DREP_KEY_HEADER: u8 = 0x22;
const DREP_SCRIPT_HEADER: u8 = 0x23;

/// Where the reward account's stake (or vote) should go. The id is kept as
/// the caller supplied it until [`DelegationTarget::normalize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum DelegationTarget {
    Pool(String),
    VotingDelegate(String),
}

/// A voting delegate credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DRep {
    Key(KeyHash),
    Script([u8; KEY_HASH_LEN]),
}

/// A target whose id has been reduced to a fixed-length hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizedTarget {
    Pool(KeyHash),
    VotingDelegate(DRep),
}

impl DelegationTarget {
    pub fn id(&self) -> &str {
        match self {
            DelegationTarget::Pool(id) | DelegationTarget::VotingDelegate(id) => id,
        }
    }

    /// Reduce a bech32 or hex id to its 28-byte hash.
    pub fn normalize(&self) -> Result<NormalizedTarget> {
        match self {
            DelegationTarget::Pool(id) => {
                let bytes = decode_id(id, &["pool"])?;
                Ok(NormalizedTarget::Pool(KeyHash(fixed(&bytes, id)?)))
            }
            DelegationTarget::VotingDelegate(id) => {
                let bytes = decode_id(id, &["drep", "drep_vkh", "drep_script"])?;
                let drep = match bytes.len() {
                    KEY_HASH_LEN if id.starts_with("drep_script") => DRep::Script(fixed(&bytes, id)?),
                    KEY_HASH_LEN => DRep::Key(KeyHash(fixed(&bytes, id)?)),
                    29 if bytes[0] == DREP_KEY_HEADER => DRep::Key(KeyHash(fixed(&bytes[1..], id)?)),
                    29 if bytes[0] == DREP_SCRIPT_HEADER => DRep::Script(fixed(&bytes[1..], id)?),
                    _ => {
                        return Err(Error::InvalidDelegationTarget(format!(
                            "{id}: unexpected drep id length {}",
                            bytes.len()
                        )));
                    }
                };
                Ok(NormalizedTarget::VotingDelegate(drep))
            }
        }
    }
}

fn decode_id(id: &str, hrps: &[&str]) -> Result<Vec<u8>> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidDelegationTarget("empty id".into()));
    }
    if trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        return hex::decode(trimmed)
            .map_err(|e| Error::InvalidDelegationTarget(format!("{id}: {e}")));
    }
    let (hrp, data) = bech32::decode(trimmed)
        .map_err(|e| Error::InvalidDelegationTarget(format!("{id}: {e}")))?;
    if !hrps.contains(&hrp.as_str()) {
        return Err(Error::InvalidDelegationTarget(format!(
            "{id}: unexpected prefix {}",
            hrp.as_str()
        )));
    }
    Ok(data)
}

fn fixed(bytes: &[u8], id: &str) -> Result<[u8; KEY_HASH_LEN]> {
    bytes.try_into().map_err(|_| {
        Error::InvalidDelegationTarget(format!(
            "{id}: expected a {KEY_HASH_LEN}-byte hash, got {} bytes",
            bytes.len()
        ))
    })
}

// ── Certificates ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Certificate {
    StakeRegistration { stake: KeyHash },
    StakeDelegation { stake: KeyHash, pool: KeyHash },
    VoteDelegation { stake: KeyHash, drep: DRep },
}

impl Certificate {
    pub fn delegation(stake: KeyHash, target: NormalizedTarget) -> Self {
        match target {
            NormalizedTarget::Pool(pool) => Certificate::StakeDelegation { stake, pool },
            NormalizedTarget::VotingDelegate(drep) => Certificate::VoteDelegation { stake, drep },
        }
    }

    pub fn stake_credential(&self) -> &KeyHash {
        match self {
            Certificate::StakeRegistration { stake }
            | Certificate::StakeDelegation { stake, .. }
            | Certificate::VoteDelegation { stake, .. } => stake,
        }
    }

    pub fn is_registration(&self) -> bool {
        matches!(self, Certificate::StakeRegistration { .. })
    }
}

impl<C> Encode<C> for Certificate {
    fn encode<W: Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut C,
    ) -> std::result::Result<(), EncodeError<W::Error>> {
        match self {
            Certificate::StakeRegistration { stake } => {
                e.array(2)?.u64(CERT_STAKE_REGISTRATION)?;
                encode_key_credential(e, stake)?;
            }
            Certificate::StakeDelegation { stake, pool } => {
                e.array(3)?.u64(CERT_STAKE_DELEGATION)?;
                encode_key_credential(e, stake)?;
                e.bytes(pool.as_bytes())?;
            }
            Certificate::VoteDelegation { stake, drep } => {
                e.array(3)?.u64(CERT_VOTE_DELEGATION)?;
                encode_key_credential(e, stake)?;
                match drep {
                    DRep::Key(kh) => e.array(2)?.u8(0)?.bytes(kh.as_bytes())?,
                    DRep::Script(sh) => e.array(2)?.u8(1)?.bytes(sh)?,
                };
            }
        }
        Ok(())
    }
}

fn encode_key_credential<W: Write>(
    e: &mut Encoder<W>,
    key: &KeyHash,
) -> std::result::Result<(), EncodeError<W::Error>> {
    e.array(2)?.u8(0)?.bytes(key.as_bytes())?;
    Ok(())
}

/// Ordered certificates: an optional registration first, then delegations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateSet(Vec<Certificate>);

impl CertificateSet {
    pub fn push(&mut self, cert: Certificate) {
        self.0.push(cert);
    }

    pub fn as_slice(&self) -> &[Certificate] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn registrations(&self) -> usize {
        self.0.iter().filter(|c| c.is_registration()).count()
    }

    /// Stake keys that must witness these certificates. Registration alone
    /// needs no witness.
    pub fn required_signers(&self) -> impl Iterator<Item = &KeyHash> {
        self.0
            .iter()
            .filter(|c| !c.is_registration())
            .map(Certificate::stake_credential)
    }
}
