pub mod address;
pub mod backend;
pub mod batch;
pub mod builder;
pub mod certificate;
pub mod chain;
pub mod coordinator;
pub mod diagnostics;
pub mod error;
pub mod filter;
pub mod handle;
pub mod keys;
pub mod network;
pub mod node;
pub mod params;
pub mod submission;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tx;
pub mod value;

// Core types
pub use error::{Error, NodeError, Result};
pub use network::Network;
pub use node::LodestakeNode;
pub use params::ProtocolParams;
pub use value::{AssetAmount, AssetUnit, Quantity, RecipientOutput, UnspentOutput, Value};

// Ownership
pub use address::{KeyHash, OwnershipResolver, ShelleyResolver, Unresolvable};
pub use filter::{ExcludedUtxo, ExclusionReason, OwnedUtxoSet, WalletAddresses, filter_owned_utxos};

// Building and delegation
pub use backend::{AutoBackend, ManualBackend, TransactionBackend, TransactionDraft};
pub use builder::{build_delegation, certificates_for, pick_single_input};
pub use certificate::{Certificate, CertificateSet, DRep, DelegationTarget, NormalizedTarget};
pub use coordinator::{DelegationCoordinator, Wallet};
pub use submission::{DebugInfo, SubmissionDebug, SubmissionResult};

// Diagnostics
pub use diagnostics::{RegexWitnessMapper, WitnessDiagnosis, WitnessMapper, is_missing_witness};

// Payouts and handles
pub use batch::{
    BatchConfig, BatchSendResult, BatchSender, CancelFlag, MultiSendResult, validate_recipients,
};
pub use handle::{HandleResolver, parse_handle};

// Collaborator interfaces
pub use chain::{AccountStatus, ChainIndexer, HandleRegistry};
pub use keys::{SignedTransaction, SigningContext, SoftwareKeyStore, TxSigner};
