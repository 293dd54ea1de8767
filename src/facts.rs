//! Fact and forget commands.

use anyhow::Result;
use context_vault_core::models::Fact;

use crate::config::Config;
use crate::vault::{FactFilter, NewFact, Vault};

/// CLI entry point for `cvault fact add`.
pub fn run_fact_add(
    config: &Config,
    mut fact: NewFact,
    conversation_id: Option<&str>,
) -> Result<()> {
    if let Some(conversation) = conversation_id {
        fact.metadata
            .insert(Fact::CONVERSATION_KEY.to_string(), conversation.to_string());
    }
    let mut vault = Vault::open(config.clone())?;
    let id = vault.put_fact_with(fact)?;
    println!("{}", id);
    Ok(())
}

/// CLI entry point for `cvault fact list`.
pub fn run_fact_list(config: &Config, filter: &FactFilter) -> Result<()> {
    let vault = Vault::open(config.clone())?;
    let facts = vault.list_facts(filter);

    if facts.is_empty() {
        println!("No facts.");
        return Ok(());
    }

    for fact in facts {
        let forgotten = if vault.index().is_tombstoned(&fact.id) {
            " (forgotten)"
        } else {
            ""
        };
        println!(
            "{}  {} {} {}  [{:.2}]{}",
            fact.id, fact.subject, fact.predicate, fact.object, fact.confidence, forgotten
        );
        if let Some(chunk) = &fact.source_chunk {
            println!("    source: {}", chunk);
        }
        for (key, value) in &fact.metadata {
            println!("    {}: {}", key, value);
        }
    }
    Ok(())
}

/// CLI entry point for `cvault forget`.
pub fn run_forget(config: &Config, id: &str, reason: &str) -> Result<()> {
    let mut vault = Vault::open(config.clone())?;
    let tombstone = vault.forget(id, reason)?;
    println!("{}", tombstone);
    Ok(())
}
