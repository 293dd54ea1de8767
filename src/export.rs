//! Audit log export.
//!
//! Writes an [`AuditPackage`](crate::audit::AuditPackage) as pretty JSON so
//! a third party can run [`verify_package`](crate::audit::verify_package)
//! without access to the vault.

use std::path::Path;

use anyhow::Result;

use crate::config::Config;
use crate::vault::Vault;

/// Export audit events `[from, to)` (defaults: the whole log).
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub fn run_export_audit(
    config: &Config,
    from: Option<u64>,
    to: Option<u64>,
    output: Option<&Path>,
) -> Result<()> {
    let vault = Vault::open(config.clone())?;
    let from = from.unwrap_or(0);
    let to = to.unwrap_or(vault.audit().len());
    let package = vault.export_audit(Some(from..to))?;
    let json = serde_json::to_string_pretty(&package)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)?;
            eprintln!(
                "Exported {} audit events ({} objects) to {}",
                package.events.len(),
                package.object_hashes.len(),
                path.display()
            );
        }
        None => {
            println!("{}", json);
        }
    }

    Ok(())
}
