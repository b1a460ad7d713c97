use std::path::Path;
use std::sync::Arc;

use lodestake_sdk::address::{base_address, enterprise_address, reward_address};
use lodestake_sdk::{Network, SigningContext, Wallet, WalletAddresses};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::config::{self, AppConfig, ConfigError};

use super::types::{WalletAddressInfo, WalletStatus};

/// Entropy for a 24-word phrase.
const MNEMONIC_ENTROPY_BYTES: usize = 32;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Wallet not unlocked")]
    NotUnlocked,

    #[error("No mnemonic provided; set {}", config::MNEMONIC_ENV)]
    NoMnemonic,

    #[error("Address error: {0}")]
    Address(lodestake_sdk::Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Keys are held only while unlocked.
struct Unlocked {
    context: SigningContext,
    addresses: WalletAddressInfo,
}

pub struct WalletManager {
    network: Network,
    account: u32,
    unlocked: Option<Unlocked>,
}

impl WalletManager {
    pub fn new(network: Network, account: u32) -> Self {
        Self {
            network,
            account,
            unlocked: None,
        }
    }

    /// Load the config from `data_dir` and unlock from `LODESTAKE_MNEMONIC`.
    pub fn open(data_dir: &Path) -> Result<(AppConfig, Self), WalletError> {
        let config = AppConfig::load(data_dir)?;
        let mut manager = Self::new(config.network, config.account);
        let mnemonic = config::mnemonic_from_env().ok_or(WalletError::NoMnemonic)?;
        manager.unlock(&mnemonic)?;
        Ok((config, manager))
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn status(&self) -> WalletStatus {
        if self.unlocked.is_some() {
            WalletStatus::Unlocked
        } else {
            WalletStatus::Locked
        }
    }

    /// Generate a fresh 24-word mnemonic. Nothing is stored.
    pub fn generate_mnemonic() -> Result<Zeroizing<String>, WalletError> {
        let entropy = Zeroizing::new(rand::random::<[u8; MNEMONIC_ENTROPY_BYTES]>());
        let mnemonic = bip39::Mnemonic::from_entropy(&entropy[..])
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
        Ok(Zeroizing::new(mnemonic.to_string()))
    }

    /// Derive this account's keys and addresses from `mnemonic`.
    pub fn unlock(&mut self, mnemonic: &str) -> Result<(), WalletError> {
        let context = SigningContext::from_mnemonic(mnemonic, self.account)
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
        let addresses = self.derive_addresses(&context)?;
        log::info!(
            "wallet unlocked on {} (account {}, reward {})",
            self.network,
            self.account,
            addresses.reward_address
        );
        self.unlocked = Some(Unlocked { context, addresses });
        Ok(())
    }

    pub fn lock(&mut self) {
        self.unlocked = None;
    }

    fn derive_addresses(&self, context: &SigningContext) -> Result<WalletAddressInfo, WalletError> {
        let payment = context.payment_key_hash();
        let stake = context.stake_key_hash();
        Ok(WalletAddressInfo {
            network: self.network.as_str().to_string(),
            base_address: base_address(self.network, &payment, &stake)
                .map_err(WalletError::Address)?,
            enterprise_address: enterprise_address(self.network, &payment)
                .map_err(WalletError::Address)?,
            reward_address: reward_address(self.network, &stake).map_err(WalletError::Address)?,
            payment_key_hash: payment.to_hex(),
            stake_key_hash: stake.to_hex(),
        })
    }

    fn unlocked(&self) -> Result<&Unlocked, WalletError> {
        self.unlocked.as_ref().ok_or(WalletError::NotUnlocked)
    }

    pub fn address_info(&self) -> Result<WalletAddressInfo, WalletError> {
        Ok(self.unlocked()?.addresses.clone())
    }

    /// The base address is used for change; the enterprise address shares
    /// the payment key, so outputs there are spendable too.
    pub fn addresses(&self) -> Result<WalletAddresses, WalletError> {
        let info = &self.unlocked()?.addresses;
        Ok(WalletAddresses {
            used: vec![info.base_address.clone()],
            unused: vec![info.enterprise_address.clone()],
            change: Some(info.base_address.clone()),
            reward: Some(info.reward_address.clone()),
        })
    }

    pub fn signing_context(&self) -> Result<SigningContext, WalletError> {
        Ok(self.unlocked()?.context.clone())
    }

    /// Engine wallet handle backed by a software key store.
    pub fn wallet(&self) -> Result<Wallet, WalletError> {
        let unlocked = self.unlocked()?;
        Ok(Wallet::new(
            self.addresses()?,
            Arc::new(unlocked.context.key_store()),
        ))
    }
}
