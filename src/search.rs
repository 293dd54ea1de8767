//! Search and evidence commands.
//!
//! Ranking itself lives in [`context_vault_core::search::rank`]; this
//! module opens the vault, runs the query and prints results.

use anyhow::Result;
use context_vault_core::models::Record;
use context_vault_core::search::VectorMode;

use crate::config::Config;
use crate::vault::Vault;

/// CLI entry point for `cvault search`.
pub fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    let vault = Vault::open(config.clone())?;
    let results = vault.search(query, limit)?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let title = match vault.index().get(&result.document_id) {
            Some(Record::Document(d)) => d.title.as_str(),
            _ => "(untitled)",
        };
        println!(
            "{}. [{:.2}] {} (bytes {}..{})",
            i + 1,
            result.score,
            title,
            result.start,
            result.end
        );
        println!(
            "    keyword: {:.2}  vector: {:.2} ({})",
            result.keyword_score,
            result.vector_score,
            match result.vector_mode {
                VectorMode::Embedding => "embedding",
                VectorMode::BagOfWords => "bag of words",
            }
        );
        println!(
            "    excerpt: \"{}\"",
            result.snippet.replace('\n', " ").trim()
        );
        println!("    id: {}", result.chunk_id);
        println!();
    }

    Ok(())
}

/// CLI entry point for `cvault evidence`: prints the evidence pack as JSON.
pub fn run_evidence(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    let mut vault = Vault::open(config.clone())?;
    let pack = vault.evidence_pack(query, limit)?;
    println!("{}", serde_json::to_string_pretty(&pack)?);
    Ok(())
}
