//! In-memory metadata index with JSON snapshots.
//!
//! One table per [`RecordKind`], each keyed by id with insertion order
//! preserved, so iteration is deterministic. Deletion is soft: a
//! [`Tombstone`] record hides its target (and, for documents, the
//! document's chunks) from visibility-filtered reads, while [`Index::get`]
//! still returns the original record.
//!
//! # Snapshots
//!
//! [`Index::save`] writes `index/<table>.json` for every table, each via a
//! temp file and a rename. Every file carries the same `generation` and the
//! audit position the snapshot reflects; [`Index::load`] rejects a set of
//! files whose generations disagree (a crash between renames), and the
//! vault then rebuilds the index by replaying the audit log.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use context_vault_core::models::{Chunk, Document, Fact, Record, RecordKind, Summary, Tombstone};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::atomic::write_atomic;
use crate::error::{Result, VaultError};
use crate::object_store::is_object_id;

#[derive(Debug, Clone, Default)]
struct Table {
    rows: Vec<Record>,
    by_id: HashMap<String, usize>,
}

impl Table {
    fn insert(&mut self, record: Record) {
        self.by_id.insert(record.id().to_string(), self.rows.len());
        self.rows.push(record);
    }

    fn get(&self, id: &str) -> Option<&Record> {
        self.by_id.get(id).map(|&i| &self.rows[i])
    }
}

/// Selection for [`Index::list`].
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Restrict to one table.
    pub kind: Option<RecordKind>,
    /// Also return tombstoned records (and chunks of tombstoned documents).
    pub include_tombstoned: bool,
}

impl RecordFilter {
    pub fn kind(kind: RecordKind) -> Self {
        Self {
            kind: Some(kind),
            include_tombstoned: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TableSnapshot {
    table: String,
    generation: u64,
    audit_position: u64,
    records: Vec<Record>,
}

#[derive(Debug, Clone, Default)]
pub struct Index {
    tables: [Table; 5],
    kinds: HashMap<String, RecordKind>,
    /// Tombstoned id -> id of the tombstone that hides it.
    tombstoned: HashMap<String, String>,
    generation: u64,
    audit_position: u64,
}

fn slot(kind: RecordKind) -> usize {
    match kind {
        RecordKind::Document => 0,
        RecordKind::Chunk => 1,
        RecordKind::Fact => 2,
        RecordKind::Summary => 3,
        RecordKind::Tombstone => 4,
    }
}

fn invalid(message: String) -> VaultError {
    VaultError::Validation(message)
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, kind: RecordKind) -> &Table {
        &self.tables[slot(kind)]
    }

    /// Snapshot generation last saved or loaded.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of audit events reflected in this index.
    pub fn audit_position(&self) -> u64 {
        self.audit_position
    }

    pub fn set_audit_position(&mut self, position: u64) {
        self.audit_position = position;
    }

    /// Look up any record by id, ignoring tombstones.
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.kinds.get(id).and_then(|&k| self.table(k).get(id))
    }

    /// Look up a record only if it is visible.
    pub fn get_visible(&self, id: &str) -> Option<&Record> {
        self.get(id).filter(|r| self.is_visible(r))
    }

    pub fn is_tombstoned(&self, id: &str) -> bool {
        self.tombstoned.contains_key(id)
    }

    /// The tombstone hiding `id`, if any.
    pub fn tombstone_for(&self, id: &str) -> Option<&Tombstone> {
        match self.tombstoned.get(id).and_then(|t| self.get(t)) {
            Some(Record::Tombstone(t)) => Some(t),
            _ => None,
        }
    }

    /// Whether `record` appears in default listings and search.
    pub fn is_visible(&self, record: &Record) -> bool {
        if self.is_tombstoned(record.id()) {
            return false;
        }
        match record {
            Record::Chunk(c) => !self.is_tombstoned(&c.document_id),
            _ => true,
        }
    }

    /// Check `record` against the index without inserting it.
    pub fn validate(&self, record: &Record) -> Result<()> {
        let id = record.id();
        if id.trim().is_empty() {
            return Err(invalid(format!("{} id must not be empty", record.kind())));
        }
        if let Some(existing) = self.kinds.get(id) {
            if *existing != record.kind() {
                return Err(invalid(format!(
                    "id {} is already used by a {}",
                    id, existing
                )));
            }
        }

        match record {
            Record::Document(d) => {
                if let Some(bad) = d.object_ids.iter().find(|o| !is_object_id(o)) {
                    return Err(invalid(format!(
                        "document {} references invalid object id {}",
                        d.id, bad
                    )));
                }
            }
            Record::Chunk(c) => {
                if !matches!(self.kinds.get(&c.document_id), Some(RecordKind::Document)) {
                    return Err(invalid(format!(
                        "chunk {} references unknown document {}",
                        c.id, c.document_id
                    )));
                }
                if c.end < c.start || c.text.len() != c.end - c.start {
                    return Err(invalid(format!(
                        "chunk {} offsets {}..{} do not match its {}-byte text",
                        c.id,
                        c.start,
                        c.end,
                        c.text.len()
                    )));
                }
                if !is_object_id(&c.content_hash) {
                    return Err(invalid(format!(
                        "chunk {} has invalid content hash {}",
                        c.id, c.content_hash
                    )));
                }
            }
            Record::Fact(f) => {
                for (field, value) in [
                    ("subject", &f.subject),
                    ("predicate", &f.predicate),
                    ("object", &f.object),
                ] {
                    if value.trim().is_empty() {
                        return Err(invalid(format!("fact {} must not be empty", field)));
                    }
                }
                if !(0.0..=1.0).contains(&f.confidence) {
                    return Err(invalid(format!(
                        "fact confidence must be in [0.0, 1.0], got {}",
                        f.confidence
                    )));
                }
                if let Some(chunk) = &f.source_chunk {
                    if !matches!(self.kinds.get(chunk), Some(RecordKind::Chunk)) {
                        return Err(invalid(format!(
                            "fact source_chunk references unknown chunk {}",
                            chunk
                        )));
                    }
                }
            }
            Record::Summary(s) => {
                if s.conversation_id.trim().is_empty() {
                    return Err(invalid("summary conversation_id must not be empty".into()));
                }
            }
            Record::Tombstone(t) => {
                if t.reason.trim().is_empty() {
                    return Err(invalid("tombstone reason must not be empty".into()));
                }
                match self.kinds.get(&t.target_id) {
                    None => return Err(VaultError::not_found("record", &t.target_id)),
                    Some(RecordKind::Tombstone) => {
                        return Err(invalid(format!(
                            "{} is a tombstone and cannot be tombstoned",
                            t.target_id
                        )))
                    }
                    Some(kind) if *kind != t.target_kind => {
                        return Err(invalid(format!(
                            "tombstone target {} is a {}, not a {}",
                            t.target_id, kind, t.target_kind
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Insert `record`.
    ///
    /// Returns `Ok(false)` when an identical record is already present.
    /// Records are immutable, so a different record under an existing id is
    /// a validation error.
    pub fn put(&mut self, record: Record) -> Result<bool> {
        if let Some(existing) = self.get(record.id()) {
            if *existing == record {
                return Ok(false);
            }
            return Err(invalid(format!(
                "{} {} already exists with different content",
                record.kind(),
                record.id()
            )));
        }
        self.validate(&record)?;
        self.insert(record);
        Ok(true)
    }

    fn insert(&mut self, record: Record) {
        if let Record::Tombstone(t) = &record {
            self.tombstoned
                .entry(t.target_id.clone())
                .or_insert_with(|| t.id.clone());
        }
        let kind = record.kind();
        self.kinds.insert(record.id().to_string(), kind);
        self.tables[slot(kind)].insert(record);
    }

    /// Build (but do not insert) a tombstone for `id`.
    pub fn new_tombstone(&self, id: &str, reason: &str, now: i64) -> Result<Tombstone> {
        let target_kind = self
            .kinds
            .get(id)
            .copied()
            .ok_or_else(|| VaultError::not_found("record", id))?;
        let tombstone = Tombstone {
            id: format!("tomb_{}", Uuid::new_v4()),
            target_id: id.to_string(),
            target_kind,
            reason: reason.to_string(),
            created_at: now,
        };
        self.validate(&Record::Tombstone(tombstone.clone()))?;
        Ok(tombstone)
    }

    /// Soft-delete `id`. Idempotent: an already tombstoned id returns its
    /// existing tombstone.
    pub fn tombstone(&mut self, id: &str, reason: &str, now: i64) -> Result<Tombstone> {
        if let Some(existing) = self.tombstone_for(id) {
            return Ok(existing.clone());
        }
        let tombstone = self.new_tombstone(id, reason, now)?;
        self.put(Record::Tombstone(tombstone.clone()))?;
        Ok(tombstone)
    }

    /// Records in table order, then insertion order.
    pub fn list(&self, filter: &RecordFilter) -> Vec<&Record> {
        let kinds: Vec<RecordKind> = match filter.kind {
            Some(k) => vec![k],
            None => RecordKind::ALL.to_vec(),
        };
        kinds
            .into_iter()
            .flat_map(|k| self.table(k).rows.iter())
            .filter(|r| filter.include_tombstoned || self.is_visible(r))
            .collect()
    }

    pub fn count(&self, kind: RecordKind) -> usize {
        self.table(kind).rows.len()
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.table(RecordKind::Document).rows.iter().filter_map(|r| match r {
            Record::Document(d) => Some(d),
            _ => None,
        })
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.table(RecordKind::Chunk).rows.iter().filter_map(|r| match r {
            Record::Chunk(c) => Some(c),
            _ => None,
        })
    }

    pub fn facts(&self) -> impl Iterator<Item = &Fact> {
        self.table(RecordKind::Fact).rows.iter().filter_map(|r| match r {
            Record::Fact(f) => Some(f),
            _ => None,
        })
    }

    pub fn summaries(&self) -> impl Iterator<Item = &Summary> {
        self.table(RecordKind::Summary).rows.iter().filter_map(|r| match r {
            Record::Summary(s) => Some(s),
            _ => None,
        })
    }

    /// Search candidates: chunks that are not tombstoned and whose document
    /// is not tombstoned, in insertion order.
    pub fn visible_chunks(&self) -> Vec<&Chunk> {
        self.chunks()
            .filter(|c| !self.is_tombstoned(&c.id) && !self.is_tombstoned(&c.document_id))
            .collect()
    }

    pub fn chunks_of(&self, document_id: &str) -> Vec<&Chunk> {
        self.chunks().filter(|c| c.document_id == document_id).collect()
    }

    /// Write every table to `dir` as a new snapshot generation.
    pub fn save(&mut self, dir: &Path) -> Result<()> {
        let generation = self.generation + 1;
        for kind in RecordKind::ALL {
            let snapshot = TableSnapshot {
                table: kind.table_name().to_string(),
                generation,
                audit_position: self.audit_position,
                records: self.table(kind).rows.clone(),
            };
            let bytes = serde_json::to_vec(&snapshot)?;
            write_atomic(&dir.join(format!("{}.json", kind.table_name())), &bytes)?;
        }
        self.generation = generation;
        debug!(generation, audit_position = self.audit_position, "index snapshot written");
        Ok(())
    }

    /// Load the snapshot in `dir`. A directory with no snapshot files yields
    /// an empty index.
    pub fn load(dir: &Path) -> Result<Index> {
        let mut snapshots = Vec::new();
        for kind in RecordKind::ALL {
            let path = dir.join(format!("{}.json", kind.table_name()));
            if !path.exists() {
                continue;
            }
            let snapshot: TableSnapshot = serde_json::from_slice(&fs::read(&path)?)?;
            if snapshot.table != kind.table_name() {
                return Err(invalid(format!(
                    "{} holds table {}",
                    path.display(),
                    snapshot.table
                )));
            }
            if let Some(bad) = snapshot.records.iter().find(|r| r.kind() != kind) {
                return Err(invalid(format!(
                    "{} holds a {} record ({})",
                    path.display(),
                    bad.kind(),
                    bad.id()
                )));
            }
            snapshots.push(snapshot);
        }

        let mut index = Index::new();
        let Some(first) = snapshots.first() else {
            return Ok(index);
        };
        let (generation, audit_position) = (first.generation, first.audit_position);
        if snapshots.len() != RecordKind::ALL.len()
            || snapshots
                .iter()
                .any(|s| s.generation != generation || s.audit_position != audit_position)
        {
            return Err(invalid(format!(
                "index snapshot in {} is inconsistent across tables",
                dir.display()
            )));
        }

        for snapshot in snapshots {
            for record in snapshot.records {
                index.insert(record);
            }
        }
        index.generation = generation;
        index.audit_position = audit_position;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    const HASH: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn doc(id: &str) -> Record {
        Record::Document(Document {
            id: id.into(),
            title: "story.txt".into(),
            source: "story.txt".into(),
            object_ids: vec![HASH.into()],
            byte_len: 5,
            created_at: 1,
        })
    }

    fn chunk(id: &str, doc: &str) -> Record {
        Record::Chunk(Chunk {
            id: id.into(),
            document_id: doc.into(),
            chunk_index: 0,
            start: 0,
            end: 5,
            content_hash: HASH.into(),
            text: "hello".into(),
            embedding: None,
        })
    }

    fn fact(id: &str) -> Record {
        Record::Fact(Fact {
            id: id.into(),
            subject: "fox".into(),
            predicate: "is_a".into(),
            object: "canine".into(),
            confidence: 0.9,
            source_chunk: None,
            metadata: BTreeMap::new(),
            created_at: 1,
        })
    }

    fn seeded() -> Index {
        let mut index = Index::new();
        index.put(doc("doc_1")).unwrap();
        index.put(chunk("chunk_1", "doc_1")).unwrap();
        index.put(fact("fact_1")).unwrap();
        index
    }

    #[test]
    fn test_put_get_and_insertion_order() {
        let mut index = seeded();
        index.put(fact("fact_0")).unwrap();
        let ids: Vec<&str> = index
            .list(&RecordFilter::kind(RecordKind::Fact))
            .iter()
            .map(|r| r.id())
            .collect();
        assert_eq!(ids, vec!["fact_1", "fact_0"]);
        assert_eq!(index.get("chunk_1").map(Record::kind), Some(RecordKind::Chunk));
    }

    #[test]
    fn test_put_is_idempotent_but_immutable() {
        let mut index = seeded();
        assert!(!index.put(fact("fact_1")).unwrap());
        let mut changed = fact("fact_1");
        if let Record::Fact(f) = &mut changed {
            f.object = "feline".into();
        }
        assert!(matches!(index.put(changed), Err(VaultError::Validation(_))));
    }

    #[test]
    fn test_validation_rules() {
        let mut index = Index::new();
        assert!(index.put(chunk("chunk_1", "doc_missing")).is_err());
        let mut bad = fact("fact_x");
        if let Record::Fact(f) = &mut bad {
            f.confidence = 1.5;
        }
        assert!(index.put(bad).is_err());
        let mut orphan = fact("fact_y");
        if let Record::Fact(f) = &mut orphan {
            f.source_chunk = Some("chunk_nope".into());
        }
        assert!(index.put(orphan).is_err());
        index.put(doc("shared")).unwrap();
        assert!(index.put(fact("shared")).is_err());
    }

    #[test]
    fn test_tombstone_hides_but_get_bypasses() {
        let mut index = seeded();
        let t = index.tombstone("fact_1", "outdated", 2).unwrap();
        assert!(t.id.starts_with("tomb_"));
        assert_eq!(t.target_kind, RecordKind::Fact);
        assert!(index.get("fact_1").is_some());
        assert!(index.get_visible("fact_1").is_none());
        let listed: Vec<&str> = index.list(&RecordFilter::default()).iter().map(|r| r.id()).collect();
        assert!(!listed.contains(&"fact_1"));
        assert!(listed.contains(&t.id.as_str()));
    }

    #[test]
    fn test_tombstoned_document_hides_its_chunks() {
        let mut index = seeded();
        assert_eq!(index.visible_chunks().len(), 1);
        index.tombstone("doc_1", "retracted", 2).unwrap();
        assert!(index.visible_chunks().is_empty());
        assert!(index.get_visible("chunk_1").is_none());
        let all = index.list(&RecordFilter {
            kind: Some(RecordKind::Chunk),
            include_tombstoned: true,
        });
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_tombstone_edge_cases() {
        let mut index = seeded();
        let first = index.tombstone("fact_1", "outdated", 2).unwrap();
        let again = index.tombstone("fact_1", "other reason", 3).unwrap();
        assert_eq!(first, again);
        assert_eq!(index.count(RecordKind::Tombstone), 1);
        assert!(matches!(
            index.tombstone(&first.id, "nested", 4),
            Err(VaultError::Validation(_))
        ));
        assert!(matches!(
            index.tombstone("nope", "missing", 4),
            Err(VaultError::NotFound { .. })
        ));
        assert!(index.tombstone("doc_1", "  ", 4).is_err());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut index = seeded();
        index.tombstone("fact_1", "outdated", 2).unwrap();
        index.set_audit_position(4);
        index.save(dir.path()).unwrap();
        for kind in RecordKind::ALL {
            assert!(dir.path().join(format!("{}.json", kind.table_name())).is_file());
        }

        let loaded = Index::load(dir.path()).unwrap();
        assert_eq!(loaded.generation(), 1);
        assert_eq!(loaded.audit_position(), 4);
        assert!(loaded.is_tombstoned("fact_1"));
        let ids = |i: &Index| -> Vec<String> {
            i.list(&RecordFilter {
                kind: None,
                include_tombstoned: true,
            })
            .iter()
            .map(|r| r.id().to_string())
            .collect()
        };
        assert_eq!(ids(&loaded), ids(&index));
    }

    #[test]
    fn test_empty_dir_loads_empty() {
        let dir = TempDir::new().unwrap();
        let index = Index::load(dir.path()).unwrap();
        assert_eq!(index.generation(), 0);
        assert!(index.list(&RecordFilter::default()).is_empty());
    }

    #[test]
    fn test_mixed_generations_are_rejected() {
        let dir = TempDir::new().unwrap();
        let mut index = seeded();
        index.save(dir.path()).unwrap();
        let stale = fs::read(dir.path().join("facts.json")).unwrap();
        index.put(fact("fact_2")).unwrap();
        index.save(dir.path()).unwrap();
        fs::write(dir.path().join("facts.json"), stale).unwrap();
        assert!(matches!(
            Index::load(dir.path()),
            Err(VaultError::Validation(_))
        ));
    }
}
