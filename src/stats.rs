//! Vault statistics and health overview.
//!
//! Provides a quick summary of what's stored: record counts per table,
//! embedding coverage, object store usage, and audit log length. Used by
//! `cvault stats` to give confidence that imports and embeddings are
//! working as expected.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::vault::Vault;

/// Counts reported by [`Vault::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VaultStats {
    pub documents: usize,
    pub chunks: usize,
    pub embedded_chunks: usize,
    pub facts: usize,
    pub summaries: usize,
    pub tombstones: usize,
    pub objects: usize,
    pub object_bytes: u64,
    pub audit_events: u64,
}

impl VaultStats {
    /// Percentage of chunks carrying an embedding.
    pub fn embedded_percent(&self) -> usize {
        if self.chunks > 0 {
            self.embedded_chunks * 100 / self.chunks
        } else {
            0
        }
    }
}

/// Run the stats command: open the vault and print a summary.
pub fn run_stats(config: &Config) -> Result<()> {
    let vault = Vault::open(config.clone())?;
    let stats = vault.stats()?;

    println!("Context Vault — Stats");
    println!("=====================");
    println!();
    println!("  Vault:       {}", config.vault.root.display());
    println!(
        "  Objects:     {} ({})",
        stats.objects,
        format_bytes(stats.object_bytes)
    );
    println!();
    println!("  Documents:   {}", stats.documents);
    println!("  Chunks:      {}", stats.chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.embedded_chunks,
        stats.chunks,
        stats.embedded_percent()
    );
    println!("  Facts:       {}", stats.facts);
    println!("  Summaries:   {}", stats.summaries);
    println!("  Tombstones:  {}", stats.tombstones);
    println!();
    println!("  Audit:       {} events", stats.audit_events);

    Ok(())
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_stats_counts() {
        let dir = TempDir::new().unwrap();
        let mut vault = Vault::open(Config::for_root(dir.path())).unwrap();
        assert_eq!(vault.stats().unwrap(), VaultStats::default());

        vault
            .import_text("The quick brown fox jumps.", "story.txt", "story.txt")
            .unwrap();
        let fact = vault.put_fact("fox", "is_a", "canine", 0.9).unwrap();
        vault.forget(&fact, "outdated").unwrap();

        let stats = vault.stats().unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.embedded_chunks, 0);
        assert_eq!(stats.facts, 1);
        assert_eq!(stats.tombstones, 1);
        // Raw text and the single chunk are byte-identical, so one object.
        assert_eq!(stats.objects, 1);
        assert_eq!(stats.audit_events, 4);
        assert_eq!(stats.embedded_percent(), 0);
    }
}
