//! Hash-chained, append-only audit log.
//!
//! Every mutation of a vault is recorded as an [`AuditEvent`] before the
//! in-memory index changes. Events are stored one canonical frame per line
//! in `audit/<sequence>.log` segments:
//!
//! ```text
//! [actor=vault event_hash=#b.. event_id=#u3 event_type=put_fact kind=audit_event
//!  payload_hash=#b.. prev_hash=#b.. timestamp=#i1700000000 | [event=put_fact | <record frame>]]
//! ```
//!
//! # Chaining
//!
//! ```text
//! payload_hash = SHA-256(canonical(payload))
//! event_hash   = SHA-256(prev_hash ‖ canonical(payload) ‖ timestamp_be ‖ actor)
//! ```
//!
//! The first event links to [`GENESIS`]. Because the payload embeds the
//! mutation frame and the ids of the objects it references, the log alone
//! is enough to replay the index and to verify the chain.
//!
//! [`verify_lines`] never stops at the first failure: each event is checked
//! against the *stored* hash of its predecessor, so every broken event is
//! itemized in the [`ChainReport`].

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};

use context_vault_core::codec::record::{digest_token, token_digest_hex};
use context_vault_core::codec::{parse_frame, Frame, ParseError, Token};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::atomic::write_atomic;
use crate::error::{Result, VaultError};

/// A 32-byte SHA-256 digest.
pub type Hash32 = [u8; 32];

/// `prev_hash` of the first event.
pub const GENESIS: Hash32 = [0u8; 32];

/// Format tag of exported packages.
pub const PACKAGE_FORMAT: &str = "cvault-audit/1";

const EVENT_KIND: &str = "audit_event";
const SEGMENT_EXT: &str = "log";

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    /// Zero-based position in the chain.
    pub event_id: u64,
    pub timestamp: i64,
    pub event_type: String,
    pub actor: String,
    pub payload: Frame,
    pub payload_hash: Hash32,
    pub prev_event_hash: Hash32,
    pub event_hash: Hash32,
}

/// Wrap a mutation frame and the object ids it references into an event
/// payload.
pub fn event_payload(event_type: &str, mutation: Frame, object_ids: &[String]) -> Frame {
    let mut payload = Frame::new().with("event", event_type).with_payload(mutation);
    for token in object_ids.iter().filter_map(|id| digest_token(id)) {
        payload.push(token);
    }
    payload
}

pub fn payload_hash(payload: &Frame) -> Hash32 {
    Sha256::digest(payload.to_canonical_bytes()).into()
}

pub fn compute_event_hash(prev: &Hash32, payload: &Frame, timestamp: i64, actor: &str) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(prev);
    hasher.update(payload.to_canonical_bytes());
    hasher.update(timestamp.to_be_bytes());
    hasher.update(actor.as_bytes());
    hasher.finalize().into()
}

fn schema(message: String, key: &str) -> ParseError {
    ParseError::schema(message, key, None)
}

fn required<'a>(frame: &'a Frame, key: &str) -> std::result::Result<&'a Token, ParseError> {
    frame.get(key).ok_or_else(|| {
        ParseError::schema(
            format!("audit event is missing `{}`", key),
            key,
            Some(format!("add `{}=...` to the header", key)),
        )
    })
}

fn hash_field(frame: &Frame, key: &str) -> std::result::Result<Hash32, ParseError> {
    required(frame, key)?
        .as_blob()
        .and_then(|b| Hash32::try_from(b).ok())
        .ok_or_else(|| schema(format!("audit event `{}` must be a 32-byte #b digest", key), key))
}

fn word_field(frame: &Frame, key: &str) -> std::result::Result<String, ParseError> {
    required(frame, key)?
        .as_word()
        .map(str::to_string)
        .ok_or_else(|| schema(format!("audit event `{}` must be a word", key), key))
}

impl AuditEvent {
    /// Build the event at `event_id`, computing both hashes.
    pub fn new(
        event_id: u64,
        timestamp: i64,
        event_type: &str,
        actor: &str,
        payload: Frame,
        prev_event_hash: Hash32,
    ) -> Self {
        let event_hash = compute_event_hash(&prev_event_hash, &payload, timestamp, actor);
        Self {
            event_id,
            timestamp,
            event_type: event_type.to_string(),
            actor: actor.to_string(),
            payload_hash: payload_hash(&payload),
            payload,
            prev_event_hash,
            event_hash,
        }
    }

    pub fn to_frame(&self) -> Frame {
        Frame::new()
            .with("actor", self.actor.as_str())
            .with("event_hash", Token::blob(self.event_hash.to_vec()))
            .with("event_id", self.event_id)
            .with("event_type", self.event_type.as_str())
            .with("kind", EVENT_KIND)
            .with("payload_hash", Token::blob(self.payload_hash.to_vec()))
            .with("prev_hash", Token::blob(self.prev_event_hash.to_vec()))
            .with("timestamp", self.timestamp)
            .with_payload(self.payload.clone())
    }

    pub fn from_frame(frame: &Frame) -> std::result::Result<Self, ParseError> {
        const KEYS: [&str; 8] = [
            "actor",
            "event_hash",
            "event_id",
            "event_type",
            "kind",
            "payload_hash",
            "prev_hash",
            "timestamp",
        ];
        if let Some((key, _)) = frame.header().find(|(k, _)| !KEYS.contains(k)) {
            return Err(schema(format!("audit event has unknown key `{}`", key), key));
        }
        if frame.kind() != Some(EVENT_KIND) {
            return Err(schema(format!("expected kind={}", EVENT_KIND), "kind"));
        }
        let payload = match frame.payload() {
            [Token::Frame(p)] => p.clone(),
            _ => {
                return Err(schema(
                    "audit event payload must be exactly one frame".to_string(),
                    "|",
                ))
            }
        };
        let event_id = required(frame, "event_id")?
            .as_u64()
            .ok_or_else(|| schema("audit event `event_id` must be #u".to_string(), "event_id"))?;
        let timestamp = required(frame, "timestamp")?
            .as_i64()
            .ok_or_else(|| schema("audit event `timestamp` must be #i".to_string(), "timestamp"))?;

        Ok(Self {
            event_id,
            timestamp,
            event_type: word_field(frame, "event_type")?,
            actor: word_field(frame, "actor")?,
            payload,
            payload_hash: hash_field(frame, "payload_hash")?,
            prev_event_hash: hash_field(frame, "prev_hash")?,
            event_hash: hash_field(frame, "event_hash")?,
        })
    }

    /// One log line, without the trailing newline.
    pub fn encode_line(&self) -> String {
        self.to_frame().encode()
    }

    pub fn parse_line(line: &str) -> std::result::Result<Self, ParseError> {
        Self::from_frame(&parse_frame(line.as_bytes())?)
    }

    /// The mutation frame carried by this event.
    pub fn mutation(&self) -> Option<&Frame> {
        self.payload.payload().first().and_then(Token::as_frame)
    }

    /// Object ids referenced by this event.
    pub fn object_ids(&self) -> Vec<String> {
        self.payload
            .payload()
            .iter()
            .skip(1)
            .filter_map(token_digest_hex)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainFailure {
    pub index: u64,
    pub reason: String,
}

/// Outcome of a chain verification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainReport {
    pub valid: bool,
    pub first_invalid_index: Option<u64>,
    pub checked: u64,
    pub failures: Vec<ChainFailure>,
}

impl ChainReport {
    fn from_failures(checked: u64, failures: Vec<ChainFailure>) -> Self {
        Self {
            valid: failures.is_empty(),
            first_invalid_index: failures.first().map(|f| f.index),
            checked,
            failures,
        }
    }
}

fn check_event(event: &AuditEvent, index: u64, prev: Option<&Hash32>) -> Vec<String> {
    let mut problems = Vec::new();
    if event.event_id != index {
        problems.push(format!("event_id {} at position {}", event.event_id, index));
    }
    if let Some(prev) = prev {
        if &event.prev_event_hash != prev {
            problems.push("prev_hash does not link to the previous event".to_string());
        }
    }
    if payload_hash(&event.payload) != event.payload_hash {
        problems.push("payload_hash does not match the payload".to_string());
    }
    let declared = event.payload.get("event").and_then(Token::as_word);
    if declared != Some(event.event_type.as_str()) {
        problems.push(format!(
            "payload declares event {:?}, header says {}",
            declared.unwrap_or(""),
            event.event_type
        ));
    }
    let expected = compute_event_hash(
        &event.prev_event_hash,
        &event.payload,
        event.timestamp,
        &event.actor,
    );
    if expected != event.event_hash {
        problems.push("event_hash does not recompute".to_string());
    }
    problems
}

/// Verify consecutive event lines starting at chain position `start`.
///
/// `anchor` is the event hash preceding `start` ([`GENESIS`] for position
/// 0); `None` skips the first link check.
pub fn verify_lines<'a>(
    anchor: Option<Hash32>,
    start: u64,
    lines: impl IntoIterator<Item = &'a str>,
) -> ChainReport {
    let mut prev = anchor;
    let mut failures = Vec::new();
    let mut checked = 0;
    for (offset, line) in lines.into_iter().enumerate() {
        let index = start + offset as u64;
        checked += 1;
        match AuditEvent::parse_line(line) {
            Ok(event) => {
                let problems = check_event(&event, index, prev.as_ref());
                if !problems.is_empty() {
                    failures.push(ChainFailure {
                        index,
                        reason: problems.join("; "),
                    });
                }
                prev = Some(event.event_hash);
            }
            Err(e) => {
                failures.push(ChainFailure {
                    index,
                    reason: format!("unparseable event: {}", e),
                });
                prev = None;
            }
        }
    }
    ChainReport::from_failures(checked, failures)
}

/// `[from, to)` chain positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRange {
    pub from: u64,
    pub to: u64,
}

/// Self-contained slice of the audit chain for external verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditPackage {
    pub format: String,
    pub exported_at: i64,
    pub range: AuditRange,
    /// Hex event hash preceding `range.from`.
    pub anchor_hash: String,
    /// Canonical event lines.
    pub events: Vec<String>,
    /// Sorted, deduplicated object ids referenced by the events.
    pub object_hashes: Vec<String>,
}

/// Replay the chain inside `package`. Needs no vault.
pub fn verify_package(package: &AuditPackage) -> Result<ChainReport> {
    if package.format != PACKAGE_FORMAT {
        return Err(VaultError::Validation(format!(
            "unsupported audit package format {:?}",
            package.format
        )));
    }
    let anchor = hex::decode(&package.anchor_hash)
        .ok()
        .and_then(|b| Hash32::try_from(b.as_slice()).ok())
        .ok_or_else(|| VaultError::Validation("anchor_hash must be 64 hex characters".into()))?;
    let expected = package.range.to.saturating_sub(package.range.from);
    if package.range.to < package.range.from || package.events.len() as u64 != expected {
        return Err(VaultError::Validation(format!(
            "package range {}..{} does not match {} events",
            package.range.from,
            package.range.to,
            package.events.len()
        )));
    }

    let mut report = verify_lines(
        Some(anchor),
        package.range.from,
        package.events.iter().map(String::as_str),
    );
    for (offset, line) in package.events.iter().enumerate() {
        let Ok(event) = AuditEvent::parse_line(line) else {
            continue;
        };
        for id in event.object_ids() {
            if !package.object_hashes.contains(&id) {
                report.failures.push(ChainFailure {
                    index: package.range.from + offset as u64,
                    reason: format!("object {} is not listed in the package", id),
                });
            }
        }
    }
    report.failures.sort_by_key(|f| f.index);
    Ok(ChainReport::from_failures(report.checked, report.failures))
}

fn segment_name(sequence: u32) -> String {
    format!("{:06}.{}", sequence, SEGMENT_EXT)
}

fn parse_segment_name(name: &str) -> Option<u32> {
    let stem = name.strip_suffix(".log")?;
    if stem.len() != 6 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Writer for the segmented audit log of one vault.
#[derive(Debug)]
pub struct AuditLog {
    dir: PathBuf,
    actor: String,
    segment_max: u64,
    len: u64,
    head: Hash32,
    segment: u32,
    segment_len: u64,
    /// Set when the tail cannot be parsed; appends are refused.
    broken: Option<String>,
}

impl AuditLog {
    /// Open (creating if needed) the log in `dir`, positioning the writer
    /// after the last stored event.
    pub fn open(dir: impl Into<PathBuf>, actor: &str, segment_max: u64) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let mut log = Self {
            dir,
            actor: actor.to_string(),
            segment_max: segment_max.max(1),
            len: 0,
            head: GENESIS,
            segment: 1,
            segment_len: 0,
            broken: None,
        };

        let segments = log.segments()?;
        let mut last_line = None;
        for (sequence, path) in &segments {
            let lines = read_segment(path)?;
            log.len += lines.len() as u64;
            log.segment = *sequence;
            log.segment_len = lines.len() as u64;
            if let Some(line) = lines.into_iter().last() {
                last_line = Some(line);
            }
        }
        if let Some(line) = last_line {
            match AuditEvent::parse_line(&line) {
                Ok(event) if event.event_id + 1 == log.len => log.head = event.event_hash,
                Ok(event) => {
                    log.broken = Some(format!(
                        "last event has id {} but the log holds {} events",
                        event.event_id, log.len
                    ))
                }
                Err(e) => log.broken = Some(format!("last event is unparseable: {}", e)),
            }
        }
        if let Some(reason) = &log.broken {
            warn!(dir = %log.dir.display(), %reason, "audit log tail is damaged");
        }
        Ok(log)
    }

    /// Number of stored events.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Hash of the last stored event, or [`GENESIS`].
    pub fn head(&self) -> Hash32 {
        self.head
    }

    /// Why appends are refused, if the tail is damaged.
    pub fn damage(&self) -> Option<&str> {
        self.broken.as_deref()
    }

    /// Drop an unparseable final line left by an interrupted append and
    /// reposition the writer. Returns the number of remaining events.
    ///
    /// Only a torn last line is removed; any other damage is a
    /// `ChainBroken` error.
    pub fn repair_tail(&mut self) -> Result<u64> {
        let Some(reason) = self.broken.clone() else {
            return Ok(self.len);
        };
        let refuse = || VaultError::ChainBroken {
            index: self.len.saturating_sub(1),
            reason: reason.clone(),
        };
        let Some((_, path)) = self.segments()?.pop() else {
            return Err(refuse());
        };
        let mut lines = read_segment(&path)?;
        match lines.last().map(|l| AuditEvent::parse_line(l)) {
            Some(Err(e)) => {
                warn!(segment = %path.display(), error = %e, "dropping torn audit event");
                lines.pop();
            }
            _ => return Err(refuse()),
        }
        let mut content = lines.join("\n");
        if !lines.is_empty() {
            content.push('\n');
        }
        write_atomic(&path, content.as_bytes())?;

        let reopened = Self::open(self.dir.clone(), &self.actor, self.segment_max)?;
        *self = reopened;
        match &self.broken {
            Some(reason) => Err(VaultError::ChainBroken {
                index: self.len.saturating_sub(1),
                reason: reason.clone(),
            }),
            None => Ok(self.len),
        }
    }

    /// Segment files, ordered by sequence.
    pub fn segments(&self) -> Result<Vec<(u32, PathBuf)>> {
        let mut segments = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(sequence) = parse_segment_name(&name) {
                segments.push((sequence, entry.path()));
            }
        }
        segments.sort();
        Ok(segments)
    }

    /// Every stored event line, in chain order.
    pub fn read_lines(&self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        for (_, path) in self.segments()? {
            lines.extend(read_segment(&path)?);
        }
        Ok(lines)
    }

    /// Every stored event that parses, with the chain position of each.
    /// Unparseable lines are logged and skipped.
    pub fn read_events(&self) -> Result<Vec<AuditEvent>> {
        let mut events = Vec::new();
        for (index, line) in self.read_lines()?.iter().enumerate() {
            match AuditEvent::parse_line(line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(index, error = %e, "skipping unparseable audit event"),
            }
        }
        Ok(events)
    }

    /// Append one event. The line is on disk before this returns.
    pub fn append(&mut self, event_type: &str, payload: Frame, timestamp: i64) -> Result<AuditEvent> {
        if let Some(reason) = &self.broken {
            return Err(VaultError::ChainBroken {
                index: self.len,
                reason: reason.clone(),
            });
        }
        let event = AuditEvent::new(self.len, timestamp, event_type, &self.actor, payload, self.head);

        if self.segment_len >= self.segment_max {
            self.segment += 1;
            self.segment_len = 0;
        }
        let path = self.dir.join(segment_name(self.segment));
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", event.encode_line())?;
        file.flush()?;
        file.sync_data()?;

        self.len += 1;
        self.segment_len += 1;
        self.head = event.event_hash;
        debug!(event_id = event.event_id, event_type, "audit event appended");
        Ok(event)
    }

    fn check_range(&self, range: &Range<u64>) -> Result<()> {
        if range.start > range.end || range.end > self.len {
            return Err(VaultError::Validation(format!(
                "audit range {}..{} is outside 0..{}",
                range.start, range.end, self.len
            )));
        }
        Ok(())
    }

    /// Hash preceding position `from`, read from storage.
    fn anchor(lines: &[String], from: u64) -> Option<Hash32> {
        if from == 0 {
            return Some(GENESIS);
        }
        let line = lines.get(from as usize - 1)?;
        AuditEvent::parse_line(line).ok().map(|e| e.event_hash)
    }

    /// Verify events in `range` against their stored neighbours.
    pub fn verify_chain(&self, range: Range<u64>) -> Result<ChainReport> {
        self.check_range(&range)?;
        let lines = self.read_lines()?;
        let anchor = Self::anchor(&lines, range.start);
        let slice = &lines[range.start as usize..range.end as usize];
        Ok(verify_lines(anchor, range.start, slice.iter().map(String::as_str)))
    }

    pub fn export(&self, range: Range<u64>, exported_at: i64) -> Result<AuditPackage> {
        self.check_range(&range)?;
        let lines = self.read_lines()?;
        let anchor = Self::anchor(&lines, range.start).ok_or_else(|| VaultError::ChainBroken {
            index: range.start.saturating_sub(1),
            reason: "anchor event is unparseable".into(),
        })?;
        let events: Vec<String> = lines[range.start as usize..range.end as usize].to_vec();
        let mut object_hashes: Vec<String> = events
            .iter()
            .filter_map(|l| AuditEvent::parse_line(l).ok())
            .flat_map(|e| e.object_ids())
            .collect();
        object_hashes.sort();
        object_hashes.dedup();

        Ok(AuditPackage {
            format: PACKAGE_FORMAT.to_string(),
            exported_at,
            range: AuditRange {
                from: range.start,
                to: range.end,
            },
            anchor_hash: hex::encode(anchor),
            events,
            object_hashes,
        })
    }
}

fn read_segment(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mutation(n: u64) -> Frame {
        Frame::new().with("kind", "fact").with("n", n).with_payload("fox")
    }

    fn log_with(dir: &TempDir, events: u64, segment_max: u64) -> AuditLog {
        let mut log = AuditLog::open(dir.path().join("audit"), "tester", segment_max).unwrap();
        for n in 0..events {
            log.append("put_fact", event_payload("put_fact", mutation(n), &[]), 100 + n as i64)
                .unwrap();
        }
        log
    }

    fn rewrite_line(log: &AuditLog, index: usize, edit: impl FnOnce(Frame) -> Frame) {
        let (_, path) = log.segments().unwrap().remove(0);
        let mut lines = read_segment(&path).unwrap();
        let frame = parse_frame(lines[index].as_bytes()).unwrap();
        lines[index] = edit(frame).encode();
        fs::write(&path, lines.join("\n") + "\n").unwrap();
    }

    #[test]
    fn test_first_event_links_to_genesis() {
        let dir = TempDir::new().unwrap();
        let log = log_with(&dir, 1, 100);
        let events = log.read_events().unwrap();
        assert_eq!(events[0].event_id, 0);
        assert_eq!(events[0].prev_event_hash, GENESIS);
        assert_eq!(log.head(), events[0].event_hash);
    }

    #[test]
    fn test_event_line_roundtrip() {
        let payload = event_payload("put_fact", mutation(7), &["ab".repeat(32)]);
        let event = AuditEvent::new(3, -5, "put_fact", "alice smith", payload, GENESIS);
        let parsed = AuditEvent::parse_line(&event.encode_line()).unwrap();
        assert_eq!(parsed, event);
        assert_eq!(parsed.object_ids(), vec!["ab".repeat(32)]);
        assert_eq!(parsed.mutation(), Some(&mutation(7)));
    }

    #[test]
    fn test_clean_chain_verifies() {
        let dir = TempDir::new().unwrap();
        let log = log_with(&dir, 5, 100);
        let report = log.verify_chain(0..5).unwrap();
        assert!(report.valid);
        assert_eq!(report.checked, 5);
        assert_eq!(report.first_invalid_index, None);
    }

    #[test]
    fn test_corrupt_payload_hash_is_located() {
        let dir = TempDir::new().unwrap();
        let log = log_with(&dir, 5, 100);
        rewrite_line(&log, 3, |f| f.with("payload_hash", Token::blob(vec![0u8; 32])));
        let report = log.verify_chain(0..5).unwrap();
        assert!(!report.valid);
        assert_eq!(report.first_invalid_index, Some(3));
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn test_altered_payload_breaks_event_hash() {
        let dir = TempDir::new().unwrap();
        let log = log_with(&dir, 4, 100);
        rewrite_line(&log, 1, |mut f| {
            f.pop_payload();
            f.with_payload(event_payload("put_fact", mutation(99), &[]))
        });
        let report = log.verify_chain(0..4).unwrap();
        assert_eq!(report.first_invalid_index, Some(1));
        assert!(report.failures[0].reason.contains("event_hash"));
    }

    #[test]
    fn test_partial_range_uses_stored_anchor() {
        let dir = TempDir::new().unwrap();
        let log = log_with(&dir, 5, 100);
        let report = log.verify_chain(2..4).unwrap();
        assert!(report.valid);
        assert_eq!(report.checked, 2);
        assert!(log.verify_chain(3..6).is_err());
    }

    #[test]
    fn test_segments_roll_and_reopen_continues() {
        let dir = TempDir::new().unwrap();
        let log = log_with(&dir, 5, 2);
        let names: Vec<u32> = log.segments().unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(names, vec![1, 2, 3]);
        let head = log.head();
        drop(log);

        let mut reopened = AuditLog::open(dir.path().join("audit"), "tester", 2).unwrap();
        assert_eq!(reopened.len(), 5);
        assert_eq!(reopened.head(), head);
        let event = reopened
            .append("put_fact", event_payload("put_fact", mutation(5), &[]), 200)
            .unwrap();
        assert_eq!(event.event_id, 5);
        assert_eq!(event.prev_event_hash, head);
        assert!(reopened.verify_chain(0..6).unwrap().valid);
    }

    #[test]
    fn test_damaged_tail_refuses_appends() {
        let dir = TempDir::new().unwrap();
        let log = log_with(&dir, 2, 100);
        let (_, path) = log.segments().unwrap().remove(0);
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("[not an event |]\n");
        fs::write(&path, content).unwrap();

        let mut reopened = AuditLog::open(dir.path().join("audit"), "tester", 100).unwrap();
        assert!(matches!(
            reopened.append("put_fact", event_payload("put_fact", mutation(9), &[]), 1),
            Err(VaultError::ChainBroken { index: 3, .. })
        ));
    }

    #[test]
    fn test_torn_tail_is_repaired_and_appends_resume() {
        let dir = TempDir::new().unwrap();
        let log = log_with(&dir, 3, 100);
        let head = log.head();
        let (_, path) = log.segments().unwrap().remove(0);
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("[actor=tester event_id=#u3 kind=audi");
        fs::write(&path, content).unwrap();

        let mut reopened = AuditLog::open(dir.path().join("audit"), "tester", 100).unwrap();
        assert!(reopened.damage().is_some());
        assert_eq!(reopened.repair_tail().unwrap(), 3);
        assert!(reopened.damage().is_none());
        assert_eq!(reopened.head(), head);

        let event = reopened
            .append("put_fact", event_payload("put_fact", mutation(3), &[]), 300)
            .unwrap();
        assert_eq!(event.event_id, 3);
        assert!(reopened.verify_chain(0..4).unwrap().valid);
    }

    #[test]
    fn test_misnumbered_tail_is_not_repaired() {
        let dir = TempDir::new().unwrap();
        let log = log_with(&dir, 2, 100);
        let (_, path) = log.segments().unwrap().remove(0);
        let lines = read_segment(&path).unwrap();
        fs::write(&path, format!("{}\n{}\n{}\n", lines[0], lines[1], lines[0])).unwrap();

        let mut reopened = AuditLog::open(dir.path().join("audit"), "tester", 100).unwrap();
        assert!(matches!(
            reopened.repair_tail(),
            Err(VaultError::ChainBroken { .. })
        ));
        assert_eq!(read_segment(&path).unwrap().len(), 3);
    }

    #[test]
    fn test_export_package_verifies_offline() {
        let dir = TempDir::new().unwrap();
        let mut log = log_with(&dir, 3, 100);
        let object = "cd".repeat(32);
        log.append(
            "put_document",
            event_payload("put_document", mutation(3), &[object.clone()]),
            500,
        )
        .unwrap();

        let package = log.export(1..4, 900).unwrap();
        assert_eq!(package.format, PACKAGE_FORMAT);
        assert_eq!(package.events.len(), 3);
        assert_eq!(package.object_hashes, vec![object]);
        let json = serde_json::to_string(&package).unwrap();
        let back: AuditPackage = serde_json::from_str(&json).unwrap();
        assert!(verify_package(&back).unwrap().valid);

        let mut tampered = back.clone();
        tampered.anchor_hash = "00".repeat(32);
        let report = verify_package(&tampered).unwrap();
        assert_eq!(report.first_invalid_index, Some(1));

        let mut unlisted = back;
        unlisted.object_hashes.clear();
        assert_eq!(verify_package(&unlisted).unwrap().first_invalid_index, Some(3));
    }
}
