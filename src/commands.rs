use std::fs;
use std::path::Path;

use lodestake_sdk::handle::is_handle;
use lodestake_sdk::{
    BatchSendResult, CancelFlag, DelegationTarget, LodestakeNode, MultiSendResult,
    RecipientOutput, SubmissionResult, validate_recipients,
};
use serde::Serialize;

use crate::wallet::WalletManager;
use crate::wallet::types::UtxoReport;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleLookup {
    pub handle: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Offline commands
// ============================================================================

pub fn new_mnemonic() -> Result<String, String> {
    WalletManager::generate_mnemonic()
        .map(|m| m.to_string())
        .map_err(|e| e.to_string())
}

pub fn load_recipients(path: &Path) -> Result<Vec<RecipientOutput>, String> {
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    serde_json::from_str(&contents).map_err(|e| format!("invalid recipients file: {e}"))
}

/// Structural problems in a recipients file. `$handle` recipients are
/// checked for syntax only.
pub fn validate_file(path: &Path) -> Result<Vec<String>, String> {
    let recipients = load_recipients(path)?;
    let mut errors = validate_recipients(&recipients);
    for (i, r) in recipients.iter().enumerate() {
        if is_handle(&r.address) {
            if let Err(e) = lodestake_sdk::parse_handle(&r.address) {
                errors.push(format!("recipient {i}: {e}"));
            }
        }
    }
    Ok(errors)
}

pub fn parse_target(pool: Option<String>, drep: Option<String>) -> Result<DelegationTarget, String> {
    let target = match (pool, drep) {
        (Some(pool), None) => DelegationTarget::Pool(pool),
        (None, Some(drep)) => DelegationTarget::VotingDelegate(drep),
        _ => return Err("specify exactly one of --pool or --drep".to_string()),
    };
    target.normalize().map_err(|e| e.to_string())?;
    Ok(target)
}

// ============================================================================
// Wallet commands
// ============================================================================

pub async fn list_utxos(node: &LodestakeNode, wallet: &WalletManager) -> Result<UtxoReport, String> {
    let addresses = wallet.addresses().map_err(|e| e.to_string())?;
    let owned = node.owned_utxos(addresses).await.map_err(|e| e.to_string())?;
    Ok(UtxoReport::from_owned(&owned))
}

/// Delegate the wallet's stake. A failed delegation is still `Ok`: the
/// result carries the error and its diagnostics.
pub async fn delegate(
    node: &LodestakeNode,
    wallet: &WalletManager,
    target: DelegationTarget,
    allow_fallback: bool,
) -> Result<SubmissionResult, String> {
    let handle = wallet.wallet().map_err(|e| e.to_string())?;
    let signing = wallet.signing_context().map_err(|e| e.to_string())?;
    node.delegate(handle, Some(signing), target, allow_fallback)
        .await
        .map_err(|e| e.to_string())
}

/// Resolve any `$handle` recipients, then pay everyone in batches.
pub async fn send_batched<F>(
    node: &LodestakeNode,
    wallet: &WalletManager,
    recipients: Vec<RecipientOutput>,
    cancel: CancelFlag,
    on_batch_complete: F,
) -> Result<MultiSendResult, String>
where
    F: FnMut(&BatchSendResult) + Send + 'static,
{
    let handle = wallet.wallet().map_err(|e| e.to_string())?;
    let recipients = if recipients.iter().any(|r| is_handle(&r.address)) {
        node.resolve_recipients(recipients)
            .await
            .map_err(|e| e.to_string())?
    } else {
        recipients
    };
    node.send_batched(handle, recipients, cancel, on_batch_complete)
        .await
        .map_err(|e| e.to_string())
}

pub async fn resolve_handles(
    node: &LodestakeNode,
    handles: Vec<String>,
) -> Result<Vec<HandleLookup>, String> {
    let lookups = node.resolve_handles(handles).await.map_err(|e| e.to_string())?;
    Ok(lookups
        .into_iter()
        .map(|(handle, result)| match result {
            Ok(address) => HandleLookup {
                handle,
                address: Some(address),
                error: None,
            },
            Err(e) => HandleLookup {
                handle,
                address: None,
                error: Some(e.to_string()),
            },
        })
        .collect())
}
