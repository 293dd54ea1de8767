//! Integrity, chain and signature commands.
//!
//! Each command prints a full report before failing, so every problem is
//! visible even when the process exits non-zero.

use std::path::Path;

use anyhow::{bail, Context, Result};
use context_vault_core::codec::parse_frame;

use crate::config::Config;
use crate::vault::Vault;

/// CLI entry point for `cvault verify`: object integrity plus the audit
/// chain.
pub fn run_verify(config: &Config) -> Result<()> {
    let vault = Vault::open(config.clone())?;

    let integrity = vault.verify_integrity();
    println!("Objects:  {} verified", integrity.verified);
    for id in &integrity.failed {
        println!("  CORRUPT  {}", id);
    }
    for error in &integrity.errors {
        println!("  ERROR    {}", error);
    }

    let chain = vault.verify_chain(None)?;
    println!("Audit:    {} events checked", chain.checked);
    for failure in &chain.failures {
        println!("  BROKEN   event {}: {}", failure.index, failure.reason);
    }

    if let Some(reason) = vault.audit().damage() {
        println!("  TAIL     {}", reason);
        println!("           run `cvault repair-audit` to drop a torn final event");
    }

    if !integrity.is_clean() || !chain.valid {
        bail!(
            "verification failed: {} corrupt objects, {} errors, {} broken events",
            integrity.failed.len(),
            integrity.errors.len(),
            chain.failures.len()
        );
    }
    println!("OK");
    Ok(())
}

/// CLI entry point for `cvault repair-audit`.
pub fn run_repair_audit(config: &Config) -> Result<()> {
    let mut vault = Vault::open(config.clone())?;
    if vault.audit().damage().is_none() {
        println!("Audit log tail is intact ({} events).", vault.audit().len());
        return Ok(());
    }
    let remaining = vault
        .repair_audit_tail()
        .context("audit log damage is not a torn final event; restore the log from a backup")?;
    println!("Dropped torn final event; {} events remain.", remaining);
    Ok(())
}

fn read_frame(path: &Path) -> Result<context_vault_core::codec::Frame> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read frame file: {}", path.display()))?;
    parse_frame(&bytes).with_context(|| format!("Failed to parse {}", path.display()))
}

/// CLI entry point for `cvault sign`: prints the signed frame.
pub fn run_sign(config: &Config, path: &Path, signer: &str) -> Result<()> {
    let vault = Vault::open(config.clone())?;
    let frame = read_frame(path)?;
    let signed = vault.sign_frame(&frame, signer)?;
    println!("{}", signed);
    Ok(())
}

/// CLI entry point for `cvault verify-frame`.
///
/// The key is chosen by the signer named in the trailer; `expected_signer`
/// additionally requires that name to match.
pub fn run_verify_frame(config: &Config, path: &Path, expected_signer: Option<&str>) -> Result<()> {
    let vault = Vault::open(config.clone())?;
    let frame = read_frame(path)?;
    let verification = vault.verify_frame(&frame)?;
    println!("{}", serde_json::to_string_pretty(&verification)?);
    if let Some(expected) = expected_signer {
        if verification.signer_id != expected {
            bail!(
                "frame is signed by {}, expected {}",
                verification.signer_id,
                expected
            );
        }
    }
    if !verification.verified {
        bail!("signature does not verify");
    }
    Ok(())
}
