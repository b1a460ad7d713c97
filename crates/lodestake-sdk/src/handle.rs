//! `$handle` aliases resolved to ledger addresses.

use std::sync::Arc;

use rayon::prelude::*;

use crate::chain::HandleRegistry;
use crate::error::{Error, Result};
use crate::value::RecipientOutput;

pub const HANDLE_PREFIX: char = '$';
pub const MAX_HANDLE_LEN: usize = 15;

pub fn is_handle(input: &str) -> bool {
    input.trim_start().starts_with(HANDLE_PREFIX)
}

/// Validate `$name` and return the bare, lower-cased name.
pub fn parse_handle(input: &str) -> Result<String> {
    let trimmed = input.trim();
    let name = trimmed
        .strip_prefix(HANDLE_PREFIX)
        .ok_or_else(|| Error::InvalidHandle(format!("{trimmed:?} must start with '$'")))?
        .to_lowercase();
    if name.is_empty() || name.chars().count() > MAX_HANDLE_LEN {
        return Err(Error::InvalidHandle(format!(
            "{trimmed:?} must be 1-{MAX_HANDLE_LEN} characters"
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-')))
    {
        return Err(Error::InvalidHandle(format!("{trimmed:?} contains {bad:?}")));
    }
    Ok(name)
}

pub struct HandleResolver {
    registry: Arc<dyn HandleRegistry>,
}

impl HandleResolver {
    pub fn new(registry: Arc<dyn HandleRegistry>) -> Self {
        Self { registry }
    }

    /// The current holder's address.
    pub fn resolve(&self, handle: &str) -> Result<String> {
        let name = parse_handle(handle)?;
        self.registry
            .handle_holders(&name)?
            .into_iter()
            .find(|a| !a.is_empty())
            .ok_or(Error::HandleNotFound(name))
    }

    /// Resolve independent handles in parallel; order is preserved.
    pub fn resolve_many(&self, handles: &[String]) -> Vec<(String, Result<String>)> {
        handles
            .par_iter()
            .map(|h| (h.clone(), self.resolve(h)))
            .collect()
    }

    /// Replace every `$handle` recipient address with its holder. Any
    /// failure rejects the whole list.
    pub fn resolve_recipients(&self, recipients: &[RecipientOutput]) -> Result<Vec<RecipientOutput>> {
        let resolved: Vec<Result<RecipientOutput>> = recipients
            .par_iter()
            .map(|r| {
                if !is_handle(&r.address) {
                    return Ok(r.clone());
                }
                let address = self.resolve(&r.address)?;
                log::debug!("{} resolved to {address}", r.address.trim());
                Ok(RecipientOutput {
                    address,
                    assets: r.assets.clone(),
                })
            })
            .collect();

        let mut out = Vec::with_capacity(recipients.len());
        let mut errors = Vec::new();
        for (i, r) in resolved.into_iter().enumerate() {
            match r {
                Ok(r) => out.push(r),
                Err(e) => errors.push(format!("recipient {i}: {e}")),
            }
        }
        if errors.is_empty() {
            Ok(out)
        } else {
            Err(Error::InvalidRecipient(errors))
        }
    }
}
