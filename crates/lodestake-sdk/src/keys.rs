//! Signing: the key-store interface and a software implementation.
//!
//! Keys are derived from a BIP-39 seed with a labelled HMAC-SHA512 step.
//! This is not a CIP-1852 path; any store that can sign can
//! stand in through [`TxSigner`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use ed25519_dalek::{Signer, SigningKey};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use zeroize::{Zeroize, Zeroizing};

use crate::address::{KeyHash, OwnershipResolver, ShelleyResolver};
use crate::backend::TransactionDraft;
use crate::error::{Error, Result};
use crate::tx::{VkeyWitness, encode_transaction};

type HmacSha512 = Hmac<Sha512>;

const DERIVATION_KEY: &[u8] = b"lodestake key derivation";

/// A fully encoded transaction ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx_hash: String,
    pub cbor: Vec<u8>,
}

/// Signing capability supplied by the key/seed store.
pub trait TxSigner: Send + Sync {
    /// Witness `draft`. With `partial`, required signers this store has no
    /// key for are skipped instead of failing.
    fn sign(&self, draft: &TransactionDraft, partial: bool) -> Result<SignedTransaction>;
}

fn derive_key(seed: &[u8], label: &str) -> Result<SigningKey> {
    let mut mac = HmacSha512::new_from_slice(DERIVATION_KEY)
        .map_err(|e| Error::Signer(format!("hmac init: {e}")))?;
    mac.update(seed);
    mac.update(label.as_bytes());
    let mut out = mac.finalize().into_bytes();
    let mut secret = Zeroizing::new([0u8; 32]);
    secret.copy_from_slice(&out[..32]);
    out.as_mut_slice().zeroize();
    Ok(SigningKey::from_bytes(&secret))
}

fn seed_from_mnemonic(phrase: &str) -> Result<Zeroizing<[u8; 64]>> {
    let mnemonic = bip39::Mnemonic::parse_normalized(phrase)
        .map_err(|e| Error::Signer(format!("invalid mnemonic: {e}")))?;
    Ok(Zeroizing::new(mnemonic.to_seed("")))
}

fn key_hash(key: &SigningKey) -> KeyHash {
    KeyHash::of_verification_key(&key.verifying_key().to_bytes())
}

fn witness_with<'a>(
    keys: impl IntoIterator<Item = &'a SigningKey>,
    draft: &TransactionDraft,
    required: &BTreeSet<KeyHash>,
    partial: bool,
) -> Result<SignedTransaction> {
    let mut witnesses = Vec::new();
    let mut covered = BTreeSet::new();
    for key in keys {
        let hash = key_hash(key);
        if required.contains(&hash) && covered.insert(hash) {
            witnesses.push(VkeyWitness {
                vkey: key.verifying_key().to_bytes(),
                signature: key.sign(&draft.tx_hash).to_bytes(),
            });
        }
    }
    if !partial {
        let missing: Vec<String> = required.difference(&covered).map(KeyHash::to_hex).collect();
        if !missing.is_empty() {
            return Err(Error::Signer(format!("no key for {}", missing.join(", "))));
        }
    }
    Ok(SignedTransaction {
        tx_hash: draft.tx_hash_hex(),
        cbor: encode_transaction(&draft.body_cbor, &witnesses)?,
    })
}

// ── SigningContext ──────────────────────────────────────────────────────

/// Raw key material for hand-witnessing a manually assembled body. Scoped to
/// a single delegation call; keys are zeroized on drop.
#[derive(Clone)]
pub struct SigningContext {
    payment: SigningKey,
    stake: SigningKey,
}

impl SigningContext {
    pub fn from_mnemonic(phrase: &str, account: u32) -> Result<Self> {
        let seed = seed_from_mnemonic(phrase)?;
        Ok(Self {
            payment: derive_key(&seed[..], &format!("account/{account}/payment"))?,
            stake: derive_key(&seed[..], &format!("account/{account}/stake"))?,
        })
    }

    pub fn from_keys(payment: [u8; 32], stake: [u8; 32]) -> Self {
        Self {
            payment: SigningKey::from_bytes(&payment),
            stake: SigningKey::from_bytes(&stake),
        }
    }

    pub fn payment_key_hash(&self) -> KeyHash {
        key_hash(&self.payment)
    }

    pub fn stake_key_hash(&self) -> KeyHash {
        key_hash(&self.stake)
    }

    /// Witness every required signer; fails if the draft needs a key this
    /// context doesn't hold.
    pub fn witness(
        &self,
        draft: &TransactionDraft,
        resolver: &dyn OwnershipResolver,
    ) -> Result<SignedTransaction> {
        let required = draft.required_signers(resolver);
        witness_with([&self.payment, &self.stake], draft, &required, false)
    }

    pub fn key_store(&self) -> SoftwareKeyStore {
        SoftwareKeyStore::new(vec![self.payment.clone(), self.stake.clone()])
    }
}

impl fmt::Debug for SigningContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningContext")
            .field("payment", &self.payment_key_hash())
            .field("stake", &self.stake_key_hash())
            .finish()
    }
}

// ── SoftwareKeyStore ────────────────────────────────────────────────────

/// In-memory key store.
pub struct SoftwareKeyStore {
    keys: Vec<SigningKey>,
    resolver: Arc<dyn OwnershipResolver>,
}

impl SoftwareKeyStore {
    pub fn new(keys: Vec<SigningKey>) -> Self {
        Self {
            keys,
            resolver: Arc::new(ShelleyResolver),
        }
    }

    pub fn from_mnemonic(phrase: &str, account: u32) -> Result<Self> {
        Ok(SigningContext::from_mnemonic(phrase, account)?.key_store())
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn OwnershipResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn key_hashes(&self) -> Vec<KeyHash> {
        self.keys.iter().map(key_hash).collect()
    }
}

impl TxSigner for SoftwareKeyStore {
    fn sign(&self, draft: &TransactionDraft, partial: bool) -> Result<SignedTransaction> {
        let required = draft.required_signers(self.resolver.as_ref());
        witness_with(&self.keys, draft, &required, partial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::enterprise_address;
    use crate::backend::{AutoBackend, TransactionBackend};
    use crate::network::Network;
    use crate::params::ProtocolParams;
    use crate::value::{UnspentOutput, Value};
    use ed25519_dalek::{Signature, Verifier};

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn draft_for(owner: &KeyHash, foreign: Option<&KeyHash>) -> TransactionDraft {
        let own = enterprise_address(Network::Preprod, owner).unwrap();
        let mut utxos = vec![UnspentOutput {
            tx_hash: "01".repeat(32),
            output_index: 0,
            address: own.clone(),
            value: Value::lovelace(3_000_000),
        }];
        // with a foreign input, pay enough that both inputs are needed
        let pay = match foreign {
            Some(f) => {
                utxos.push(UnspentOutput {
                    tx_hash: "02".repeat(32),
                    output_index: 0,
                    address: enterprise_address(Network::Preprod, f).unwrap(),
                    value: Value::lovelace(3_000_000),
                });
                5_000_000
            }
            None => 1_000_000,
        };
        let mut b = AutoBackend::new(ProtocolParams::default());
        b.add_output(&own, &Value::lovelace(pay)).unwrap();
        b.set_change_address(&own).unwrap();
        b.select_inputs(&utxos).unwrap();
        b.complete().unwrap()
    }

    #[test]
    fn derivation_is_deterministic_and_separates_roles() {
        let a = SigningContext::from_mnemonic(PHRASE, 0).unwrap();
        let b = SigningContext::from_mnemonic(PHRASE, 0).unwrap();
        let c = SigningContext::from_mnemonic(PHRASE, 1).unwrap();
        assert_eq!(a.payment_key_hash(), b.payment_key_hash());
        assert_ne!(a.payment_key_hash(), a.stake_key_hash());
        assert_ne!(a.payment_key_hash(), c.payment_key_hash());
    }

    #[test]
    fn invalid_mnemonic_is_a_signer_error() {
        assert!(matches!(
            SigningContext::from_mnemonic("not a phrase", 0),
            Err(Error::Signer(_))
        ));
    }

    #[test]
    fn witness_signature_verifies_over_body_hash() {
        let ctx = SigningContext::from_keys([7; 32], [8; 32]);
        let draft = draft_for(&ctx.payment_key_hash(), None);
        let signed = ctx.witness(&draft, &ShelleyResolver).unwrap();
        assert_eq!(signed.tx_hash, draft.tx_hash_hex());

        // [body, {0: [[vkey, sig]]}, true, null]
        let w = 1 + draft.body_cbor.len();
        assert_eq!(&signed.cbor[w..w + 6], &[0xa1, 0x00, 0x81, 0x82, 0x58, 0x20]);
        let vkey: [u8; 32] = signed.cbor[w + 6..w + 38].try_into().unwrap();
        assert_eq!(&signed.cbor[w + 38..w + 40], &[0x58, 0x40]);
        let sig: [u8; 64] = signed.cbor[w + 40..w + 104].try_into().unwrap();
        assert_eq!(&signed.cbor[w + 104..], &[0xf5, 0xf6]);

        let vk = ed25519_dalek::VerifyingKey::from_bytes(&vkey).unwrap();
        vk.verify(&draft.tx_hash, &Signature::from_bytes(&sig)).unwrap();
    }

    #[test]
    fn partial_signing_skips_foreign_keys() {
        let ctx = SigningContext::from_keys([7; 32], [8; 32]);
        let foreign = KeyHash([0xee; 28]);
        let draft = draft_for(&ctx.payment_key_hash(), Some(&foreign));
        let store = ctx.key_store();
        assert!(store.sign(&draft, true).is_ok());
        assert!(matches!(store.sign(&draft, false), Err(Error::Signer(_))));
        assert!(ctx.witness(&draft, &ShelleyResolver).is_err());
    }
}
