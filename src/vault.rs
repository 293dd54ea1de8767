//! The vault facade.
//!
//! A [`Vault`] owns one object store, one metadata index, one audit log and
//! an optional embedding provider, all rooted in a single directory:
//!
//! ```text
//! <root>/objects/<hash[0:2]>/<hash>
//! <root>/index/<table>.json
//! <root>/audit/<sequence>.log
//! ```
//!
//! # Mutation protocol
//!
//! Every mutation follows the same order:
//!
//! 1. Store referenced bytes in the object store (idempotent).
//! 2. Validate the record against the index.
//! 3. Append an audit event carrying the record's canonical frame.
//! 4. Insert the record into the in-memory index.
//! 5. Snapshot the index (when `index.auto_snapshot` is on).
//!
//! The audit log is therefore a write-ahead log for the index: on open, any
//! events past the snapshot's audit position are replayed, and a damaged or
//! inconsistent snapshot is rebuilt from the log alone.
//!
//! Only one writer per vault directory is supported. Coordinating several
//! processes is left to the caller.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

use chrono::Utc;
use context_vault_core::chunk::chunk_text;
use context_vault_core::codec::{is_valid_key, Frame};
use context_vault_core::embedding::EmbeddingProvider;
use context_vault_core::models::{Chunk, Document, Fact, Record, RecordKind, Summary};
use context_vault_core::search::{rank, ScoredChunk};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::audit::{event_payload, AuditEvent, AuditLog, AuditPackage, ChainReport};
use crate::config::Config;
use crate::embedding::create_provider;
use crate::error::{Result, VaultError};
use crate::index::{Index, RecordFilter};
use crate::object_store::{IntegrityReport, ObjectStore};
use crate::signature::{self, Keyring, Verification};
use crate::stats::VaultStats;

const OBJECTS_DIR: &str = "objects";
const INDEX_DIR: &str = "index";
const AUDIT_DIR: &str = "audit";

/// Objects verified per batch by [`Vault::verify_integrity`].
const SCAN_BATCH: usize = 256;

/// Provenance for one chunk of an [`EvidencePack`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub doc_title: String,
    pub document_id: String,
    pub chunk_id: String,
    pub byte_offset: usize,
    pub byte_end: usize,
    pub score: f64,
}

/// Ranked chunks plus citations for downstream display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidencePack {
    pub query: String,
    pub chunks: Vec<ScoredChunk>,
    pub citations: Vec<Citation>,
}

/// Input for [`Vault::put_fact_with`].
#[derive(Debug, Clone, Default)]
pub struct NewFact {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f64,
    pub source_chunk: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl NewFact {
    pub fn new(subject: &str, predicate: &str, object: &str, confidence: f64) -> Self {
        Self {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
            confidence,
            ..Default::default()
        }
    }
}

/// Selection for [`Vault::list_facts`]. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct FactFilter {
    pub subject: Option<String>,
    pub predicate: Option<String>,
    pub object: Option<String>,
    pub conversation_id: Option<String>,
    pub include_forgotten: bool,
}

impl FactFilter {
    fn matches(&self, fact: &Fact) -> bool {
        let eq = |want: &Option<String>, have: &str| want.as_deref().map_or(true, |w| w == have);
        eq(&self.subject, &fact.subject)
            && eq(&self.predicate, &fact.predicate)
            && eq(&self.object, &fact.object)
            && self
                .conversation_id
                .as_deref()
                .map_or(true, |c| fact.conversation_id() == Some(c))
    }
}

pub struct Vault {
    config: Config,
    objects: ObjectStore,
    index: Index,
    audit: AuditLog,
    embedder: Option<Box<dyn EmbeddingProvider>>,
    keyring: Keyring,
}

fn now() -> i64 {
    Utc::now().timestamp()
}

fn short_hash(bytes: &[u8]) -> String {
    hex::encode(&Sha256::digest(bytes)[..16])
}

/// `doc_` + hash of title, source and text.
pub fn document_id(title: &str, source: &str, text: &str) -> String {
    let frame = Frame::new()
        .with("source", source)
        .with("title", title)
        .with_payload(text);
    format!("doc_{}", short_hash(&frame.to_canonical_bytes()))
}

/// Content-derived id for a fact or summary: `prefix` + hash of the
/// record's canonical frame with a placeholder id.
fn derived_id(prefix: &str, record: &Record) -> Result<String> {
    let canonical = record.to_frame()?.with("id", "pending").to_canonical_bytes();
    Ok(format!("{}{}", prefix, short_hash(&canonical)))
}

fn event_type(kind: RecordKind) -> String {
    match kind {
        RecordKind::Tombstone => "tombstone".to_string(),
        other => format!("put_{}", other),
    }
}

impl Vault {
    /// Open (creating if needed) the vault at `config.vault.root`.
    ///
    /// Loads the index snapshot and replays any audit events it does not
    /// yet reflect. A snapshot that cannot be loaded is rebuilt from the
    /// audit log.
    pub fn open(config: Config) -> Result<Self> {
        let root = config.vault.root.clone();
        let objects = ObjectStore::open(root.join(OBJECTS_DIR))?;
        let audit = AuditLog::open(
            root.join(AUDIT_DIR),
            &config.audit.actor,
            config.audit.segment_max_events,
        )?;
        let keyring = Keyring::from_config(&config.signing)?;
        let embedder =
            create_provider(&config.embedding).map_err(|e| VaultError::Validation(e.to_string()))?;

        let index = match Index::load(&root.join(INDEX_DIR)) {
            Ok(index) if index.audit_position() <= audit.len() => index,
            Ok(index) => {
                warn!(
                    position = index.audit_position(),
                    events = audit.len(),
                    "index snapshot is ahead of the audit log; rebuilding"
                );
                Index::new()
            }
            Err(e) => {
                warn!(error = %e, "index snapshot unreadable; rebuilding from audit log");
                Index::new()
            }
        };

        let mut vault = Self {
            config,
            objects,
            index,
            audit,
            embedder,
            keyring,
        };
        let replayed = vault.replay()?;
        if replayed > 0 {
            info!(replayed, "replayed audit events into index");
            if vault.config.index.auto_snapshot {
                vault.save()?;
            }
        }
        Ok(vault)
    }

    /// Replace the configured embedding provider.
    pub fn with_embedder(mut self, provider: Box<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(provider);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.vault.root
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    fn index_dir(&self) -> PathBuf {
        self.root().join(INDEX_DIR)
    }

    /// Apply audit events past the index's audit position. Events at or
    /// after the first chain failure are not applied.
    fn replay(&mut self) -> Result<u64> {
        let start = self.index.audit_position();
        if start >= self.audit.len() {
            return Ok(0);
        }
        let chain = self.audit.verify_chain(0..self.audit.len())?;
        let trusted = chain.first_invalid_index.unwrap_or(self.audit.len());
        if trusted < self.audit.len() {
            warn!(
                first_invalid = trusted,
                events = self.audit.len(),
                "audit chain is broken; not replaying events from the first invalid one"
            );
        }
        let mut applied = 0;
        for event in self.audit.read_events()? {
            if event.event_id < start || event.event_id >= trusted {
                continue;
            }
            match self.apply_event(&event) {
                Ok(()) => applied += 1,
                Err(e) => warn!(
                    event_id = event.event_id,
                    event_type = %event.event_type,
                    error = %e,
                    "skipping audit event during replay"
                ),
            }
        }
        self.index.set_audit_position(self.audit.len());
        Ok(applied)
    }

    fn apply_event(&mut self, event: &AuditEvent) -> Result<()> {
        match event.event_type.as_str() {
            "evidence_pack" => Ok(()),
            t if t == "tombstone" || t.starts_with("put_") => {
                let mutation = event.mutation().ok_or_else(|| {
                    VaultError::Validation("audit event carries no mutation frame".into())
                })?;
                let record = Record::from_frame(mutation)?;
                if event_type(record.kind()) != t {
                    return Err(VaultError::Validation(format!(
                        "{} event carries a {} record",
                        t,
                        record.kind()
                    )));
                }
                self.index.put(record)?;
                Ok(())
            }
            other => Err(VaultError::Validation(format!("unknown event type {}", other))),
        }
    }

    /// Audit and insert one record. `Ok(false)` when an identical record is
    /// already present; no event is written in that case.
    fn commit(&mut self, record: Record, object_ids: &[String]) -> Result<bool> {
        if let Some(existing) = self.index.get(record.id()) {
            if *existing == record {
                return Ok(false);
            }
            return Err(VaultError::Validation(format!(
                "{} {} already exists with different content",
                record.kind(),
                record.id()
            )));
        }
        self.index.validate(&record)?;

        let kind = record.kind();
        let payload = event_payload(&event_type(kind), record.to_frame()?, object_ids);
        self.audit.append(&event_type(kind), payload, now())?;
        self.index.put(record)?;
        self.index.set_audit_position(self.audit.len());
        Ok(true)
    }

    fn after_mutation(&mut self) -> Result<()> {
        if self.config.index.auto_snapshot {
            self.save()?;
        }
        Ok(())
    }

    /// Write an index snapshot.
    pub fn save(&mut self) -> Result<()> {
        let dir = self.index_dir();
        self.index.save(&dir)
    }

    /// Chunk, store and index `text`, returning the document id.
    ///
    /// Importing the same title, source and text again is a no-op that
    /// returns the same id. Re-importing a forgotten document is rejected.
    pub fn import_text(&mut self, text: &str, title: &str, source: &str) -> Result<String> {
        let doc_id = document_id(title, source, text);
        if self.index.is_tombstoned(&doc_id) {
            return Err(VaultError::Validation(format!(
                "document {} was forgotten and cannot be re-imported",
                doc_id
            )));
        }

        let raw_id = self.objects.put(text.as_bytes())?;
        let document = match self.index.get(&doc_id) {
            Some(Record::Document(existing)) => existing.clone(),
            _ => Document {
                id: doc_id.clone(),
                title: title.to_string(),
                source: source.to_string(),
                object_ids: vec![raw_id.clone()],
                byte_len: text.len() as u64,
                created_at: now(),
            },
        };
        let mut changed = self.commit(document.into(), &[raw_id])?;

        let mut chunks = chunk_text(&doc_id, text, &self.config.chunking.options());
        let stored: Vec<String> = self
            .index
            .chunks_of(&doc_id)
            .iter()
            .map(|c| c.id.clone())
            .collect();
        if !stored.iter().all(|id| chunks.iter().any(|c| &c.id == id)) {
            // Chunked under other settings; the stored chunk set stands.
            debug!(document = %doc_id, "keeping chunks from the first import");
            chunks.clear();
        }
        chunks.retain(|c| self.index.get(&c.id).is_none());
        for chunk in &chunks {
            self.objects.put(chunk.text.as_bytes())?;
        }
        self.embed_chunks(&mut chunks);

        let count = chunks.len();
        for chunk in chunks {
            let hash = chunk.content_hash.clone();
            changed |= self.commit(chunk.into(), &[hash])?;
        }

        if changed {
            self.after_mutation()?;
            info!(document = %doc_id, title, chunks = count, "imported document");
        } else {
            debug!(document = %doc_id, "document already imported");
        }
        Ok(doc_id)
    }

    /// Attach embeddings when a provider is configured. Failure leaves the
    /// chunks without embeddings.
    fn embed_chunks(&self, chunks: &mut [Chunk]) {
        let Some(provider) = &self.embedder else {
            return;
        };
        if chunks.is_empty() {
            return;
        }
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        match provider.embed(&texts) {
            Ok(vectors) if vectors.len() == chunks.len() => {
                for (chunk, vector) in chunks.iter_mut().zip(vectors) {
                    chunk.embedding = Some(vector);
                }
            }
            Ok(vectors) => warn!(
                expected = chunks.len(),
                got = vectors.len(),
                "embedding provider returned the wrong number of vectors; storing chunks without embeddings"
            ),
            Err(e) => warn!(
                model = provider.model_name(),
                error = %e,
                "inline embedding failed; storing chunks without embeddings"
            ),
        }
    }

    fn query_vector(&self, query: &str) -> Option<Vec<f32>> {
        let provider = self.embedder.as_ref()?;
        if query.trim().is_empty() {
            return None;
        }
        match provider.embed(&[query]) {
            Ok(mut vectors) => vectors.pop(),
            Err(e) => {
                warn!(error = %e, "query embedding failed; falling back to bag-of-words");
                None
            }
        }
    }

    /// Rank visible chunks for `query`. `limit` overrides
    /// `retrieval.final_limit`.
    pub fn search(&self, query: &str, limit: Option<usize>) -> Result<Vec<ScoredChunk>> {
        let mut params = self.config.retrieval.params();
        if let Some(limit) = limit {
            params.final_limit = limit;
        }

        let candidates: Vec<&Chunk> = self
            .index
            .visible_chunks()
            .into_iter()
            .filter(|c| {
                let intact = c.end >= c.start && c.text.len() == c.end - c.start;
                if !intact {
                    warn!(chunk = %c.id, "skipping chunk whose text does not match its offsets");
                }
                intact
            })
            .collect();

        let query_vec = self.query_vector(query);
        Ok(rank(query, query_vec.as_deref(), &candidates, &params))
    }

    /// Search and attach citations. Recorded in the audit log.
    pub fn evidence_pack(&mut self, query: &str, limit: Option<usize>) -> Result<EvidencePack> {
        let chunks = self.search(query, limit)?;
        let citations: Vec<Citation> = chunks
            .iter()
            .map(|c| Citation {
                doc_title: match self.index.get(&c.document_id) {
                    Some(Record::Document(d)) => d.title.clone(),
                    _ => String::new(),
                },
                document_id: c.document_id.clone(),
                chunk_id: c.chunk_id.clone(),
                byte_offset: c.start,
                byte_end: c.end,
                score: c.score,
            })
            .collect();

        let mut frame = Frame::new()
            .with("kind", "evidence_pack")
            .with("query", query)
            .with("results", chunks.len() as u64);
        for chunk in &chunks {
            frame.push(chunk.chunk_id.as_str());
        }
        self.audit
            .append("evidence_pack", event_payload("evidence_pack", frame, &[]), now())?;
        self.index.set_audit_position(self.audit.len());

        Ok(EvidencePack {
            query: query.to_string(),
            chunks,
            citations,
        })
    }

    pub fn put_fact(
        &mut self,
        subject: &str,
        predicate: &str,
        object: &str,
        confidence: f64,
    ) -> Result<String> {
        self.put_fact_with(NewFact::new(subject, predicate, object, confidence))
    }

    /// Record a fact with optional provenance and metadata.
    pub fn put_fact_with(&mut self, new: NewFact) -> Result<String> {
        if let Some(key) = new.metadata.keys().find(|k| !is_valid_key(k)) {
            return Err(VaultError::Validation(format!(
                "fact metadata key `{}` may only contain letters, digits, `_`, `.` and `-`",
                key
            )));
        }
        let mut fact = Fact {
            id: String::new(),
            subject: new.subject,
            predicate: new.predicate,
            object: new.object,
            confidence: new.confidence,
            source_chunk: new.source_chunk,
            metadata: new.metadata,
            created_at: now(),
        };
        fact.id = derived_id("fact_", &Record::Fact(fact.clone()))?;
        let id = fact.id.clone();
        if self.commit(fact.into(), &[])? {
            self.after_mutation()?;
            info!(fact = %id, "fact recorded");
        }
        Ok(id)
    }

    /// Facts in insertion order. Forgotten facts are excluded unless the
    /// filter asks for them.
    pub fn list_facts(&self, filter: &FactFilter) -> Vec<&Fact> {
        self.index
            .facts()
            .filter(|f| filter.include_forgotten || !self.index.is_tombstoned(&f.id))
            .filter(|f| filter.matches(f))
            .collect()
    }

    pub fn put_summary(
        &mut self,
        conversation_id: &str,
        key_points: Vec<String>,
        open_items: Vec<String>,
    ) -> Result<String> {
        let mut summary = Summary {
            id: String::new(),
            conversation_id: conversation_id.to_string(),
            key_points,
            open_items,
            created_at: now(),
        };
        summary.id = derived_id("sum_", &Record::Summary(summary.clone()))?;
        let id = summary.id.clone();
        if self.commit(summary.into(), &[])? {
            self.after_mutation()?;
            info!(summary = %id, conversation = conversation_id, "summary recorded");
        }
        Ok(id)
    }

    /// Visible summaries, optionally for one conversation.
    pub fn list_summaries(&self, conversation_id: Option<&str>) -> Vec<&Summary> {
        self.index
            .summaries()
            .filter(|s| !self.index.is_tombstoned(&s.id))
            .filter(|s| conversation_id.map_or(true, |c| s.conversation_id == c))
            .collect()
    }

    /// Tombstone `id`, returning the tombstone id. Forgetting an id twice
    /// returns the first tombstone.
    pub fn forget(&mut self, id: &str, reason: &str) -> Result<String> {
        if let Some(existing) = self.index.tombstone_for(id) {
            return Ok(existing.id.clone());
        }
        let tombstone = self.index.new_tombstone(id, reason, now())?;
        let tombstone_id = tombstone.id.clone();
        self.commit(tombstone.into(), &[])?;
        self.after_mutation()?;
        info!(record = id, tombstone = %tombstone_id, reason, "record forgotten");
        Ok(tombstone_id)
    }

    /// Any record by id, including tombstoned ones.
    pub fn get(&self, id: &str) -> Result<&Record> {
        self.index
            .get(id)
            .ok_or_else(|| VaultError::not_found("record", id))
    }

    /// Object bytes by hash, verified.
    pub fn get_object(&self, id: &str) -> Result<Vec<u8>> {
        self.objects.get_verified(id)
    }

    /// Raw text of a document, reassembled from its objects.
    pub fn document_text(&self, document_id: &str) -> Result<String> {
        let document = match self.get(document_id)? {
            Record::Document(d) => d,
            other => {
                return Err(VaultError::Validation(format!(
                    "{} is a {}, not a document",
                    document_id,
                    other.kind()
                )))
            }
        };
        let mut bytes = Vec::with_capacity(document.byte_len as usize);
        for object in &document.object_ids {
            bytes.extend(self.objects.get_verified(object)?);
        }
        String::from_utf8(bytes).map_err(|_| {
            VaultError::Validation(format!("document {} is not valid UTF-8", document_id))
        })
    }

    pub fn list(&self, filter: &RecordFilter) -> Vec<&Record> {
        self.index.list(filter)
    }

    /// Verify every stored object and report index records whose objects
    /// are missing.
    pub fn verify_integrity(&self) -> IntegrityReport {
        let mut report = self.objects.scan_all(SCAN_BATCH);
        for document in self.index.documents() {
            for object in &document.object_ids {
                if !self.objects.contains(object) {
                    report.errors.push(format!(
                        "document {} references missing object {}",
                        document.id, object
                    ));
                }
            }
        }
        for chunk in self.index.chunks() {
            if !self.objects.contains(&chunk.content_hash) {
                report.errors.push(format!(
                    "chunk {} references missing object {}",
                    chunk.id, chunk.content_hash
                ));
            }
        }
        if !report.is_clean() {
            warn!(
                failed = report.failed.len(),
                errors = report.errors.len(),
                "integrity check found problems"
            );
        }
        report
    }

    /// Verify the audit chain over `range`, or the whole log.
    pub fn verify_chain(&self, range: Option<Range<u64>>) -> Result<ChainReport> {
        self.audit.verify_chain(range.unwrap_or(0..self.audit.len()))
    }

    /// Drop a torn final audit event left by an interrupted write so that
    /// mutations can resume. Returns the number of remaining events.
    pub fn repair_audit_tail(&mut self) -> Result<u64> {
        let remaining = self.audit.repair_tail()?;
        if self.index.audit_position() > remaining {
            self.index.set_audit_position(remaining);
            self.save()?;
        }
        Ok(remaining)
    }

    /// Sign `frame` with the configured key of `signer_id`.
    pub fn sign_frame(&self, frame: &Frame, signer_id: &str) -> Result<Frame> {
        let key = self.keyring.key(signer_id)?;
        signature::sign_frame(frame, signer_id, key, now())
    }

    /// Verify a signed frame with the configured key of its signer.
    pub fn verify_frame(&self, frame: &Frame) -> Result<Verification> {
        let (_, trailer) = signature::split_signed(frame)?;
        let key = self.keyring.key(&trailer.signer_id)?;
        signature::verify_frame(frame, key)
    }

    /// Export audit events in `range` (default: all) as a portable package.
    pub fn export_audit(&self, range: Option<Range<u64>>) -> Result<AuditPackage> {
        let range = range.unwrap_or(0..self.audit.len());
        let package = self.audit.export(range.clone(), now())?;
        info!(from = range.start, to = range.end, "audit exported");
        Ok(package)
    }

    pub fn stats(&self) -> Result<VaultStats> {
        let (objects, object_bytes) = self.objects.usage()?;
        Ok(VaultStats {
            documents: self.index.count(RecordKind::Document),
            chunks: self.index.count(RecordKind::Chunk),
            embedded_chunks: self.index.chunks().filter(|c| c.embedding.is_some()).count(),
            facts: self.index.count(RecordKind::Fact),
            summaries: self.index.count(RecordKind::Summary),
            tombstones: self.index.count(RecordKind::Tombstone),
            objects,
            object_bytes,
            audit_events: self.audit.len(),
        })
    }
}
