//! Record retrieval by id.
//!
//! `cvault get <id>` prints any record, tombstoned or not. Documents are
//! printed with their reassembled text and chunk list; other records as
//! their canonical frame. A 64-hex id is looked up in the object store
//! and written raw to stdout.

use std::io::Write;

use anyhow::Result;
use context_vault_core::models::Record;

use crate::config::Config;
use crate::object_store::is_object_id;
use crate::vault::Vault;

/// CLI entry point for `cvault get`.
pub fn run_get(config: &Config, id: &str) -> Result<()> {
    let vault = Vault::open(config.clone())?;

    if is_object_id(id) {
        let bytes = vault.get_object(id)?;
        let mut stdout = std::io::stdout();
        stdout.write_all(&bytes)?;
        stdout.flush()?;
        return Ok(());
    }

    let record = vault.get(id)?;
    if let Some(tombstone) = vault.index().tombstone_for(id) {
        println!(
            "(forgotten by {}: {})",
            tombstone.id, tombstone.reason
        );
    }

    match record {
        Record::Document(doc) => {
            println!("--- Document ---");
            println!("id:           {}", doc.id);
            println!("title:        {}", doc.title);
            println!("source:       {}", doc.source);
            println!("bytes:        {}", doc.byte_len);
            println!("created_at:   {}", doc.created_at);
            println!("objects:      {}", doc.object_ids.join(", "));
            println!();

            println!("--- Body ---");
            println!("{}", vault.document_text(&doc.id)?);
            println!();

            let chunks = vault.index().chunks_of(&doc.id);
            println!("--- Chunks ({}) ---", chunks.len());
            for chunk in chunks {
                println!("[chunk {}] {} ({}..{})", chunk.chunk_index, chunk.id, chunk.start, chunk.end);
                println!("{}", chunk.text);
                println!();
            }
        }
        other => println!("{}", other.to_frame()?),
    }

    Ok(())
}
