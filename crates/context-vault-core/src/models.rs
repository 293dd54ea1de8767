//! Core record types stored in a vault.
//!
//! Every logical record is one variant of the closed [`Record`] sum type.
//! The codec and the metadata index match on it exhaustively, so adding a
//! record kind is a compile-time change rather than a runtime lookup.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Discriminant of a [`Record`], also used as the codec `kind` header and
/// the index table name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Document,
    Chunk,
    Fact,
    Summary,
    Tombstone,
}

impl RecordKind {
    pub const ALL: [RecordKind; 5] = [
        RecordKind::Document,
        RecordKind::Chunk,
        RecordKind::Fact,
        RecordKind::Summary,
        RecordKind::Tombstone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Document => "document",
            RecordKind::Chunk => "chunk",
            RecordKind::Fact => "fact",
            RecordKind::Summary => "summary",
            RecordKind::Tombstone => "tombstone",
        }
    }

    /// Name of the snapshot table (`index/<table>.json`) holding this kind.
    pub fn table_name(&self) -> &'static str {
        match self {
            RecordKind::Document => "documents",
            RecordKind::Chunk => "chunks",
            RecordKind::Fact => "facts",
            RecordKind::Summary => "summaries",
            RecordKind::Tombstone => "tombstones",
        }
    }

    pub fn parse(s: &str) -> Option<RecordKind> {
        RecordKind::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical unit of ingested text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub source: String,
    /// Object ids (hex SHA-256) holding the raw document bytes.
    pub object_ids: Vec<String>,
    /// Length of the raw text in bytes.
    pub byte_len: u64,
    pub created_at: i64,
}

/// Contiguous span of a document's text.
///
/// `start`/`end` are byte offsets into the original document text and
/// `text == document_text[start..end]` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: u32,
    pub start: usize,
    pub end: usize,
    /// Object id of the chunk's bytes.
    pub content_hash: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Subject–predicate–object triple with a confidence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    /// In `[0.0, 1.0]`.
    pub confidence: f64,
    /// Chunk the fact was extracted from, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_chunk: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub created_at: i64,
}

impl Fact {
    /// Metadata key conventionally carrying the originating conversation.
    pub const CONVERSATION_KEY: &'static str = "conversation_id";

    pub fn conversation_id(&self) -> Option<&str> {
        self.metadata.get(Self::CONVERSATION_KEY).map(String::as_str)
    }
}

/// Derived conversation summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub id: String,
    pub conversation_id: String,
    pub key_points: Vec<String>,
    pub open_items: Vec<String>,
    pub created_at: i64,
}

/// Marks another record as logically deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: String,
    pub target_id: String,
    pub target_kind: RecordKind,
    pub reason: String,
    pub created_at: i64,
}

/// Any record a vault stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Document(Document),
    Chunk(Chunk),
    Fact(Fact),
    Summary(Summary),
    Tombstone(Tombstone),
}

impl Record {
    pub fn id(&self) -> &str {
        match self {
            Record::Document(d) => &d.id,
            Record::Chunk(c) => &c.id,
            Record::Fact(f) => &f.id,
            Record::Summary(s) => &s.id,
            Record::Tombstone(t) => &t.id,
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Document(_) => RecordKind::Document,
            Record::Chunk(_) => RecordKind::Chunk,
            Record::Fact(_) => RecordKind::Fact,
            Record::Summary(_) => RecordKind::Summary,
            Record::Tombstone(_) => RecordKind::Tombstone,
        }
    }
}

impl From<Document> for Record {
    fn from(d: Document) -> Self {
        Record::Document(d)
    }
}

impl From<Chunk> for Record {
    fn from(c: Chunk) -> Self {
        Record::Chunk(c)
    }
}

impl From<Fact> for Record {
    fn from(f: Fact) -> Self {
        Record::Fact(f)
    }
}

impl From<Summary> for Record {
    fn from(s: Summary) -> Self {
        Record::Summary(s)
    }
}

impl From<Tombstone> for Record {
    fn from(t: Tombstone) -> Self {
        Record::Tombstone(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip_names() {
        for kind in RecordKind::ALL {
            assert_eq!(RecordKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RecordKind::parse("event"), None);
    }

    #[test]
    fn test_record_json_is_tagged() {
        let rec = Record::Tombstone(Tombstone {
            id: "tomb_1".into(),
            target_id: "fact_1".into(),
            target_kind: RecordKind::Fact,
            reason: "outdated".into(),
            created_at: 10,
        });
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["kind"], "tombstone");
        assert_eq!(json["target_kind"], "fact");
    }
}
