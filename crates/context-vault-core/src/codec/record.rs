//! Mapping between [`Record`]s and [`Frame`]s.
//!
//! Each record kind has a fixed schema. Decoding is strict: unknown header
//! keys, missing keys, wrong numeric profiles and surplus payload tokens
//! are all errors, so a decoded record always re-encodes to the same bytes.
//!
//! | Kind | Header | Payload |
//! |------|--------|---------|
//! | document | `id title source created_at=#i bytes=#u` | object ids as `#b` |
//! | chunk | `id document index=#u start=#u end=#u hash=#b` | text, optional `[kind=embedding dims=#u \| #f...]` |
//! | fact | `id confidence=#f created_at=#i [source_chunk]` | subject predicate object, optional `[key=value... \|]` |
//! | summary | `id conversation created_at=#i` | `[kind=key_points \| ...]` `[kind=open_items \| ...]` |
//! | tombstone | `id target target_kind reason created_at=#i` | empty |
//!
//! Every header also carries `kind=<record kind>`.

use std::collections::BTreeMap;

use crate::models::{Chunk, Document, Fact, Record, RecordKind, Summary, Tombstone};

use super::{parse_frame, Frame, Number, ParseError, Token};

/// Encode a record as canonical bytes.
pub fn encode_record(record: &Record) -> Result<Vec<u8>, ParseError> {
    Ok(record.to_frame()?.to_canonical_bytes())
}

/// Decode canonical (or equivalent) bytes into a record.
pub fn decode_record(input: &[u8]) -> Result<Record, ParseError> {
    Record::from_frame(&parse_frame(input)?)
}

/// Token for a 32-byte digest given as 64 hex characters.
pub fn digest_token(hex_digest: &str) -> Option<Token> {
    let bytes = hex::decode(hex_digest).ok()?;
    (bytes.len() == 32).then(|| Token::blob(bytes))
}

/// Hex form of a 32-byte digest token.
pub fn token_digest_hex(token: &Token) -> Option<String> {
    token
        .as_blob()
        .filter(|b| b.len() == 32)
        .map(hex::encode)
}

fn invalid(kind: &str, key: &str, expected: &str) -> ParseError {
    ParseError::schema(
        format!("{} frame: `{}` must be {}", kind, key, expected),
        key,
        None,
    )
}

fn digest_or_err(kind: RecordKind, field: &str, hex_digest: &str) -> Result<Token, ParseError> {
    digest_token(hex_digest).ok_or_else(|| {
        ParseError::schema(
            format!(
                "{} `{}` is not a 64-character hex digest: {}",
                kind, field, hex_digest
            ),
            field,
            None,
        )
    })
}

fn float_or_err(kind: RecordKind, field: &str, v: f64) -> Result<Token, ParseError> {
    Number::float(v).map(Token::Number).ok_or_else(|| {
        ParseError::schema(format!("{} `{}` is not finite", kind, field), field, None)
    })
}

/// Typed header access for one frame being decoded.
struct Fields<'a> {
    frame: &'a Frame,
    kind: &'static str,
}

impl<'a> Fields<'a> {
    fn new(frame: &'a Frame, kind: RecordKind, allowed: &[&str]) -> Result<Self, ParseError> {
        for (key, _) in frame.header() {
            if key != "kind" && !allowed.contains(&key) {
                return Err(ParseError::schema(
                    format!("{} frame has unexpected header key `{}`", kind, key),
                    key,
                    Some(format!("allowed keys: kind {}", allowed.join(" "))),
                ));
            }
        }
        Ok(Self {
            frame,
            kind: kind.as_str(),
        })
    }

    fn token(&self, key: &str) -> Result<&'a Token, ParseError> {
        self.frame.get(key).ok_or_else(|| {
            ParseError::schema(
                format!("{} frame is missing header key `{}`", self.kind, key),
                key,
                Some(format!("add `{}=...` to the header", key)),
            )
        })
    }

    fn word(&self, key: &str) -> Result<String, ParseError> {
        self.token(key)?
            .as_word()
            .map(str::to_string)
            .ok_or_else(|| invalid(self.kind, key, "a word"))
    }

    fn opt_word(&self, key: &str) -> Result<Option<String>, ParseError> {
        match self.frame.get(key) {
            None => Ok(None),
            Some(t) => t
                .as_word()
                .map(|w| Some(w.to_string()))
                .ok_or_else(|| invalid(self.kind, key, "a word")),
        }
    }

    fn unsigned(&self, key: &str) -> Result<u64, ParseError> {
        self.token(key)?
            .as_u64()
            .ok_or_else(|| invalid(self.kind, key, "an unsigned integer (#u)"))
    }

    fn offset(&self, key: &str) -> Result<usize, ParseError> {
        usize::try_from(self.unsigned(key)?)
            .map_err(|_| invalid(self.kind, key, "addressable on this platform"))
    }

    fn signed(&self, key: &str) -> Result<i64, ParseError> {
        self.token(key)?
            .as_i64()
            .ok_or_else(|| invalid(self.kind, key, "a signed integer (#i)"))
    }

    fn float(&self, key: &str) -> Result<f64, ParseError> {
        self.token(key)?
            .as_f64()
            .ok_or_else(|| invalid(self.kind, key, "a float (#f)"))
    }

    fn digest(&self, key: &str) -> Result<String, ParseError> {
        token_digest_hex(self.token(key)?)
            .ok_or_else(|| invalid(self.kind, key, "a 32-byte blob (#b)"))
    }

    fn payload_len(&self, min: usize, max: usize) -> Result<&'a [Token], ParseError> {
        let payload = self.frame.payload();
        if payload.len() < min || payload.len() > max {
            let expected = if min == max {
                format!("{} payload tokens", min)
            } else {
                format!("{} to {} payload tokens", min, max)
            };
            return Err(ParseError::schema(
                format!(
                    "{} frame has {} payload tokens, expected {}",
                    self.kind,
                    payload.len(),
                    expected
                ),
                "",
                None,
            ));
        }
        Ok(payload)
    }

    fn payload_word(&self, token: &Token, what: &str) -> Result<String, ParseError> {
        token
            .as_word()
            .map(str::to_string)
            .ok_or_else(|| invalid(self.kind, what, "a word"))
    }
}

fn word_list(kind: &str, items: &[String]) -> Frame {
    items
        .iter()
        .fold(Frame::new().with("kind", kind), |f, item| {
            f.with_payload(item.as_str())
        })
}

fn read_word_list(token: &Token, record: &str, list: &str) -> Result<Vec<String>, ParseError> {
    let frame = token
        .as_frame()
        .filter(|f| f.kind() == Some(list) && f.header().count() == 1)
        .ok_or_else(|| invalid(record, list, &format!("a `[kind={} | ...]` frame", list)))?;
    frame
        .payload()
        .iter()
        .map(|t| {
            t.as_word()
                .map(str::to_string)
                .ok_or_else(|| invalid(record, list, "a list of words"))
        })
        .collect()
}

impl Record {
    /// Build the frame for this record.
    ///
    /// Fails only when a field cannot be represented: a non-hex object id,
    /// a non-finite float, or a metadata key outside the header key grammar.
    pub fn to_frame(&self) -> Result<Frame, ParseError> {
        let kind = self.kind();
        let base = Frame::new().with("kind", kind.as_str()).with("id", self.id());
        let frame = match self {
            Record::Document(d) => {
                let mut frame = base
                    .with("title", d.title.as_str())
                    .with("source", d.source.as_str())
                    .with("created_at", d.created_at)
                    .with("bytes", d.byte_len);
                for oid in &d.object_ids {
                    frame.push(digest_or_err(kind, "object_ids", oid)?);
                }
                frame
            }
            Record::Chunk(c) => {
                let mut frame = base
                    .with("document", c.document_id.as_str())
                    .with("index", u64::from(c.chunk_index))
                    .with("start", c.start as u64)
                    .with("end", c.end as u64)
                    .with("hash", digest_or_err(kind, "hash", &c.content_hash)?)
                    .with_payload(c.text.as_str());
                if let Some(embedding) = &c.embedding {
                    let mut vector = Frame::new()
                        .with("kind", "embedding")
                        .with("dims", embedding.len() as u64);
                    for v in embedding {
                        vector.push(float_or_err(kind, "embedding", f64::from(*v))?);
                    }
                    frame.push(vector);
                }
                frame
            }
            Record::Fact(f) => {
                let mut frame = base
                    .with("confidence", float_or_err(kind, "confidence", f.confidence)?)
                    .with("created_at", f.created_at)
                    .with_payload(f.subject.as_str())
                    .with_payload(f.predicate.as_str())
                    .with_payload(f.object.as_str());
                if let Some(chunk) = &f.source_chunk {
                    frame = frame.with("source_chunk", chunk.as_str());
                }
                if !f.metadata.is_empty() {
                    let mut meta = Frame::new();
                    for (k, v) in &f.metadata {
                        meta.try_insert(k, v.as_str())?;
                    }
                    frame.push(meta);
                }
                frame
            }
            Record::Summary(s) => base
                .with("conversation", s.conversation_id.as_str())
                .with("created_at", s.created_at)
                .with_payload(word_list("key_points", &s.key_points))
                .with_payload(word_list("open_items", &s.open_items)),
            Record::Tombstone(t) => base
                .with("target", t.target_id.as_str())
                .with("target_kind", t.target_kind.as_str())
                .with("reason", t.reason.as_str())
                .with("created_at", t.created_at),
        };
        Ok(frame)
    }

    /// Decode a record from a frame, enforcing its kind's schema.
    pub fn from_frame(frame: &Frame) -> Result<Record, ParseError> {
        let kind_word = frame.kind().ok_or_else(|| {
            ParseError::schema(
                "frame has no `kind` header",
                "kind",
                Some("add kind=document|chunk|fact|summary|tombstone".to_string()),
            )
        })?;
        let kind = RecordKind::parse(kind_word).ok_or_else(|| {
            ParseError::schema(
                format!("unknown record kind `{}`", kind_word),
                kind_word,
                Some("use document, chunk, fact, summary or tombstone".to_string()),
            )
        })?;

        let record = match kind {
            RecordKind::Document => {
                let f = Fields::new(frame, kind, &["id", "title", "source", "created_at", "bytes"])?;
                let object_ids = frame
                    .payload()
                    .iter()
                    .map(|t| {
                        token_digest_hex(t)
                            .ok_or_else(|| invalid(f.kind, "object_ids", "32-byte blobs (#b)"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Record::Document(Document {
                    id: f.word("id")?,
                    title: f.word("title")?,
                    source: f.word("source")?,
                    object_ids,
                    byte_len: f.unsigned("bytes")?,
                    created_at: f.signed("created_at")?,
                })
            }
            RecordKind::Chunk => {
                let f = Fields::new(
                    frame,
                    kind,
                    &["id", "document", "index", "start", "end", "hash"],
                )?;
                let payload = f.payload_len(1, 2)?;
                let text = f.payload_word(&payload[0], "text")?;
                let embedding = match payload.get(1) {
                    None => None,
                    Some(token) => Some(read_embedding(token)?),
                };
                let chunk_index = u32::try_from(f.unsigned("index")?)
                    .map_err(|_| invalid(f.kind, "index", "below 2^32"))?;
                let start = f.offset("start")?;
                let end = f.offset("end")?;
                if end < start {
                    return Err(invalid(f.kind, "end", "greater than or equal to `start`"));
                }
                Record::Chunk(Chunk {
                    id: f.word("id")?,
                    document_id: f.word("document")?,
                    chunk_index,
                    start,
                    end,
                    content_hash: f.digest("hash")?,
                    text,
                    embedding,
                })
            }
            RecordKind::Fact => {
                let f = Fields::new(
                    frame,
                    kind,
                    &["id", "confidence", "created_at", "source_chunk"],
                )?;
                let payload = f.payload_len(3, 4)?;
                let metadata = match payload.get(3) {
                    None => BTreeMap::new(),
                    Some(token) => read_metadata(token)?,
                };
                Record::Fact(Fact {
                    id: f.word("id")?,
                    subject: f.payload_word(&payload[0], "subject")?,
                    predicate: f.payload_word(&payload[1], "predicate")?,
                    object: f.payload_word(&payload[2], "object")?,
                    confidence: f.float("confidence")?,
                    source_chunk: f.opt_word("source_chunk")?,
                    metadata,
                    created_at: f.signed("created_at")?,
                })
            }
            RecordKind::Summary => {
                let f = Fields::new(frame, kind, &["id", "conversation", "created_at"])?;
                let payload = f.payload_len(2, 2)?;
                Record::Summary(Summary {
                    id: f.word("id")?,
                    conversation_id: f.word("conversation")?,
                    key_points: read_word_list(&payload[0], f.kind, "key_points")?,
                    open_items: read_word_list(&payload[1], f.kind, "open_items")?,
                    created_at: f.signed("created_at")?,
                })
            }
            RecordKind::Tombstone => {
                let f = Fields::new(
                    frame,
                    kind,
                    &["id", "target", "target_kind", "reason", "created_at"],
                )?;
                f.payload_len(0, 0)?;
                let target_kind_word = f.word("target_kind")?;
                let target_kind = RecordKind::parse(&target_kind_word)
                    .ok_or_else(|| invalid(f.kind, "target_kind", "a record kind"))?;
                Record::Tombstone(Tombstone {
                    id: f.word("id")?,
                    target_id: f.word("target")?,
                    target_kind,
                    reason: f.word("reason")?,
                    created_at: f.signed("created_at")?,
                })
            }
        };
        Ok(record)
    }
}

fn read_embedding(token: &Token) -> Result<Vec<f32>, ParseError> {
    let frame = token
        .as_frame()
        .filter(|f| f.kind() == Some("embedding"))
        .ok_or_else(|| invalid("chunk", "embedding", "a `[kind=embedding ...]` frame"))?;
    let f = Fields::new(frame, RecordKind::Chunk, &["dims"])?;
    let dims = f.unsigned("dims")?;
    let values = frame
        .payload()
        .iter()
        .map(|t| {
            t.as_f64()
                .map(|v| v as f32)
                .ok_or_else(|| invalid("chunk", "embedding", "a list of floats (#f)"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if values.len() as u64 != dims {
        return Err(ParseError::schema(
            format!(
                "chunk embedding declares {} dims but holds {} values",
                dims,
                values.len()
            ),
            "dims",
            Some(format!("dims={}", values.len())),
        ));
    }
    Ok(values)
}

fn read_metadata(token: &Token) -> Result<BTreeMap<String, String>, ParseError> {
    let frame = token
        .as_frame()
        .filter(|f| f.payload().is_empty())
        .ok_or_else(|| invalid("fact", "metadata", "a `[key=value ... |]` frame"))?;
    frame
        .header()
        .map(|(k, v)| {
            v.as_word()
                .map(|w| (k.to_string(), w.to_string()))
                .ok_or_else(|| invalid("fact", k, "a word"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const H1: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";
    const H2: &str = "60303ae22b998861bce3b28f33eec1be758a213c86c93c076dbe9f558c11c752";

    fn fact() -> Fact {
        let mut metadata = BTreeMap::new();
        metadata.insert("conversation_id".to_string(), "conv-1".to_string());
        Fact {
            id: "fact_1".into(),
            subject: "fox".into(),
            predicate: "is_a".into(),
            object: "canine".into(),
            confidence: 0.9,
            source_chunk: Some("chunk_1".into()),
            metadata,
            created_at: 1_700_000_000,
        }
    }

    #[test]
    fn test_fact_frame_layout() {
        let bytes = encode_record(&Record::Fact(fact())).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "[confidence=#f0.9 created_at=#i1700000000 id=fact_1 kind=fact source_chunk=chunk_1 \
             | fox is_a canine [conversation_id=conv-1 |]]"
        );
    }

    #[test]
    fn test_every_kind_decodes_to_the_same_record() {
        let records = vec![
            Record::Document(Document {
                id: "doc_1".into(),
                title: "story.txt".into(),
                source: "notes/story.txt".into(),
                object_ids: vec![H1.into(), H2.into()],
                byte_len: 26,
                created_at: 5,
            }),
            Record::Chunk(Chunk {
                id: "chunk_1".into(),
                document_id: "doc_1".into(),
                chunk_index: 0,
                start: 0,
                end: 26,
                content_hash: H1.into(),
                text: "The quick brown fox jumps.".into(),
                embedding: Some(vec![0.25, -1.5, 0.1]),
            }),
            Record::Fact(fact()),
            Record::Summary(Summary {
                id: "sum_1".into(),
                conversation_id: "conv-1".into(),
                key_points: vec!["fox is fast".into()],
                open_items: vec![],
                created_at: 7,
            }),
            Record::Tombstone(Tombstone {
                id: "tomb_1".into(),
                target_id: "fact_1".into(),
                target_kind: RecordKind::Fact,
                reason: "outdated".into(),
                created_at: 8,
            }),
        ];
        for record in records {
            let bytes = encode_record(&record).unwrap();
            assert_eq!(decode_record(&bytes).unwrap(), record);
        }
    }

    #[test]
    fn test_unknown_header_key_is_rejected() {
        let err = decode_record(
            b"[kind=tombstone id=t target=x target_kind=fact reason=r created_at=#i1 color=red |]",
        )
        .unwrap_err();
        assert_eq!(err.token, "color");
    }

    #[test]
    fn test_wrong_profile_is_rejected() {
        let err = decode_record(
            b"[kind=tombstone id=t target=x target_kind=fact reason=r created_at=#u1 |]",
        )
        .unwrap_err();
        assert!(err.message.contains("signed integer"));
    }

    #[test]
    fn test_missing_key_suggests_fix() {
        let err = decode_record(b"[kind=tombstone id=t target=x target_kind=fact created_at=#i1 |]")
            .unwrap_err();
        assert_eq!(err.token, "reason");
        assert_eq!(err.suggestion.as_deref(), Some("add `reason=...` to the header"));
    }

    #[test]
    fn test_bad_object_id_cannot_encode() {
        let doc = Record::Document(Document {
            id: "doc_1".into(),
            title: "t".into(),
            source: "s".into(),
            object_ids: vec!["not-hex".into()],
            byte_len: 0,
            created_at: 0,
        });
        assert!(encode_record(&doc).is_err());
    }

    #[test]
    fn test_metadata_key_must_be_header_safe() {
        let mut f = fact();
        f.metadata.insert("bad key".into(), "v".into());
        assert!(Record::Fact(f).to_frame().is_err());
    }

    #[test]
    fn test_embedding_dims_must_match() {
        let input = format!(
            "[kind=chunk id=c document=d index=#u0 start=#u0 end=#u1 hash=#b{} | x [kind=embedding dims=#u3 | #f1.0]]",
            super::super::number::encode_blob(&hex::decode(H1).unwrap())
        );
        let err = decode_record(input.as_bytes()).unwrap_err();
        assert_eq!(err.token, "dims");
    }
}
