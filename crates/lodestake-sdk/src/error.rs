use thiserror::Error;

use crate::diagnostics::WitnessDiagnosis;
use crate::filter::ExcludedUtxo;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no UTXOs available at the wallet's addresses")]
    NoUtxosAvailable,

    #[error("wallet has no change address")]
    NoChangeAddress,

    #[error("wallet has no reward address")]
    NoRewardAddress,

    #[error("invalid delegation target: {0}")]
    InvalidDelegationTarget(String),

    #[error("none of the reported UTXOs are spendable by this wallet ({} excluded)", .excluded.len())]
    NoOwnedUtxos { excluded: Vec<ExcludedUtxo> },

    #[error("{backend} backend failed to build transaction: {message}")]
    TransactionBuildFailure {
        backend: &'static str,
        message: String,
    },

    #[error(
        "submission rejected for missing witnesses ({} key hashes, {} offending UTXOs): {message}",
        .diagnosis.missing_key_hashes.len(),
        .diagnosis.offending_utxos.len()
    )]
    MissingWitnessSubmitFailure {
        message: String,
        diagnosis: WitnessDiagnosis,
    },

    #[error("insufficient funds: {available} lovelace available, {required} required")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("{failed} of {total} batches failed")]
    PartialBatchFailure { failed: usize, total: usize },

    #[error("invalid recipients: {}", .0.join("; "))]
    InvalidRecipient(Vec<String>),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid asset: {0}")]
    InvalidAsset(String),

    #[error("indexer error: {0}")]
    Indexer(String),

    #[error("submit error: {0}")]
    Submit(String),

    #[error("signer error: {0}")]
    Signer(String),

    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    #[error("no holder found for handle ${0}")]
    HandleNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Convenience constructor for backend-specific build failures.
    pub fn build(backend: &'static str, message: impl Into<String>) -> Self {
        Error::TransactionBuildFailure {
            backend,
            message: message.into(),
        }
    }

    /// Structural errors are rejected before any network call and are never
    /// retried or handed to the fallback backend.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Error::NoChangeAddress
                | Error::NoRewardAddress
                | Error::InvalidDelegationTarget(_)
                | Error::InvalidRecipient(_)
                | Error::InvalidHandle(_)
        )
    }
}

/// Errors produced by [`LodestakeNode`](crate::node::LodestakeNode) async operations.
#[derive(Debug)]
pub enum NodeError {
    /// An engine operation failed.
    Sdk(Error),
    /// A `spawn_blocking` task failed to join.
    Task(String),
    /// Handle resolution was requested but no registry is configured.
    NoHandleRegistry,
    /// The per-wallet lock table was poisoned.
    MutexPoisoned,
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeError::Sdk(e) => write!(f, "sdk error: {e}"),
            NodeError::Task(e) => write!(f, "task join error: {e}"),
            NodeError::NoHandleRegistry => write!(f, "no handle registry configured"),
            NodeError::MutexPoisoned => write!(f, "mutex poisoned"),
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NodeError::Sdk(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Error> for NodeError {
    fn from(e: Error) -> Self {
        NodeError::Sdk(e)
    }
}
