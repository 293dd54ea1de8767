//! Text chunker with stable byte offsets.
//!
//! Splits document text into [`Chunk`]s no larger than `max_tokens`. Every
//! chunk records `start`/`end` byte offsets into the original document and
//! its text is exactly `document_text[start..end]`, so a citation can always
//! be resolved against the stored document bytes.
//!
//! # Modes
//!
//! | Mode | Behaviour |
//! |------|-----------|
//! | `paragraph` | Accumulate `\n\n`-separated paragraphs until the next one would overflow |
//! | `window` | Fixed-size windows snapped to whitespace, overlapping by `overlap_tokens` |
//!
//! # Paragraph algorithm
//!
//! 1. Convert `max_tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Split text on `\n\n` and trim each paragraph's span.
//! 3. Extend the current span over the next paragraph unless the combined
//!    span would exceed `max_chars`; otherwise flush it.
//! 4. Hard-split any single paragraph longer than `max_chars` at the
//!    nearest newline or space boundary.
//! 5. Guarantee at least one chunk per document (even for empty text).
//!
//! # Example
//!
//! ```rust
//! use context_vault_core::chunk::{chunk_text, ChunkOptions};
//!
//! let text = "Hello world.\n\nSecond paragraph.";
//! let chunks = chunk_text("doc_1", text, &ChunkOptions::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(&text[chunks[0].start..chunks[0].end], chunks[0].text);
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// How text is divided into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkMode {
    #[default]
    Paragraph,
    Window,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOptions {
    pub max_tokens: usize,
    /// Window overlap. Ignored in paragraph mode.
    pub overlap_tokens: usize,
    pub mode: ChunkMode,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_tokens: 700,
            overlap_tokens: 0,
            mode: ChunkMode::Paragraph,
        }
    }
}

/// Compute `(start, end)` byte spans for `text`.
///
/// Spans are non-empty, lie on UTF-8 boundaries, and are ordered by start.
/// Empty or whitespace-only text yields the single span `(0, 0)`.
pub fn chunk_spans(text: &str, opts: &ChunkOptions) -> Vec<(usize, usize)> {
    let max_chars = (opts.max_tokens * CHARS_PER_TOKEN).max(1);
    let spans = match opts.mode {
        ChunkMode::Paragraph => paragraph_spans(text, max_chars),
        ChunkMode::Window => {
            let overlap = (opts.overlap_tokens * CHARS_PER_TOKEN).min(max_chars - 1);
            window_spans(text, max_chars, overlap)
        }
    };
    if spans.is_empty() {
        vec![(0, 0)]
    } else {
        spans
    }
}

/// Split `text` into chunks belonging to `document_id`.
///
/// Chunk ids are UUIDv5 values derived from the document id, index and
/// offsets, so re-chunking the same text yields the same ids. Each
/// chunk's `content_hash` is the SHA-256 of its text, which is also its
/// object id in the object store.
pub fn chunk_text(document_id: &str, text: &str, opts: &ChunkOptions) -> Vec<Chunk> {
    chunk_spans(text, opts)
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| make_chunk(document_id, index as u32, text, start, end))
        .collect()
}

/// Deterministic chunk id.
pub fn chunk_id(document_id: &str, index: u32, start: usize, end: usize) -> String {
    let name = format!("{}/{}/{}/{}", document_id, index, start, end);
    format!("chunk_{}", Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
}

fn make_chunk(document_id: &str, index: u32, text: &str, start: usize, end: usize) -> Chunk {
    let body = &text[start..end];
    Chunk {
        id: chunk_id(document_id, index, start, end),
        document_id: document_id.to_string(),
        chunk_index: index,
        start,
        end,
        content_hash: hex::encode(Sha256::digest(body.as_bytes())),
        text: body.to_string(),
        embedding: None,
    }
}

fn paragraph_spans(text: &str, max_chars: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    let mut offset = 0;

    for para in text.split("\n\n") {
        let para_start = offset;
        offset += para.len() + 2;
        let (start, end) = trim_span(text, para_start, para_start + para.len());
        if start == end {
            continue;
        }

        if let Some((cs, ce)) = current {
            if end - cs > max_chars {
                spans.push((cs, ce));
                current = None;
            }
        }

        if end - start > max_chars {
            if let Some(span) = current.take() {
                spans.push(span);
            }
            hard_split(text, start, end, max_chars, &mut spans);
        } else {
            current = Some(match current {
                Some((cs, _)) => (cs, end),
                None => (start, end),
            });
        }
    }

    if let Some(span) = current {
        spans.push(span);
    }
    spans
}

/// Split an oversized span at newline/space boundaries.
fn hard_split(text: &str, start: usize, end: usize, max_chars: usize, out: &mut Vec<(usize, usize)>) {
    let mut pos = start;
    while pos < end {
        let remaining = &text[pos..end];
        let mut cut = snap_to_char_boundary(remaining, remaining.len().min(max_chars));
        if cut < remaining.len() {
            cut = remaining[..cut]
                .rfind('\n')
                .or_else(|| remaining[..cut].rfind(' '))
                .map(|p| p + 1)
                .unwrap_or(cut);
        }
        if cut == 0 {
            cut = next_char_boundary(remaining);
        }
        let (s, e) = trim_span(text, pos, pos + cut);
        if s < e {
            out.push((s, e));
        }
        pos += cut;
    }
}

fn window_spans(text: &str, max_chars: usize, overlap: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let len = text.len();
    let mut pos = 0;

    while pos < len {
        let mut end = pos + snap_to_char_boundary(&text[pos..], max_chars);
        if end < len {
            if let Some(ws) = text[pos..end].rfind(|c: char| c.is_ascii_whitespace()) {
                if ws > 0 {
                    end = pos + ws + 1;
                }
            }
        }
        if end == pos {
            end = pos + next_char_boundary(&text[pos..]);
        }

        let (s, e) = trim_span(text, pos, end);
        if s < e {
            spans.push((s, e));
        }
        if end >= len {
            break;
        }

        let mut next = snap_to_char_boundary(text, end.saturating_sub(overlap));
        if overlap > 0 && next > pos && !starts_word(text, next) {
            if let Some(ws) = text[next..end].find(|c: char| c.is_ascii_whitespace()) {
                next += ws + 1;
            }
        }
        if next <= pos {
            next = end;
        }
        pos = next;
    }
    spans
}

fn starts_word(text: &str, index: usize) -> bool {
    index == 0 || text[..index].ends_with(|c: char| c.is_ascii_whitespace())
}

/// Narrow `[start, end)` to exclude leading and trailing whitespace.
fn trim_span(text: &str, start: usize, end: usize) -> (usize, usize) {
    let slice = &text[start..end];
    let lead = slice.len() - slice.trim_start().len();
    let inner = slice.trim();
    (start + lead, start + lead + inner.len())
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn next_char_boundary(s: &str) -> usize {
    s.char_indices().nth(1).map(|(i, _)| i).unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(max_tokens: usize) -> ChunkOptions {
        ChunkOptions {
            max_tokens,
            ..ChunkOptions::default()
        }
    }

    fn window(max_tokens: usize, overlap_tokens: usize) -> ChunkOptions {
        ChunkOptions {
            max_tokens,
            overlap_tokens,
            mode: ChunkMode::Window,
        }
    }

    fn assert_offsets(text: &str, chunks: &[Chunk]) {
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as u32);
            assert_eq!(&text[c.start..c.end], c.text, "offset mismatch at {}", i);
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", &opts(700));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!((chunks[0].start, chunks[0].end), (0, 13));
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_text("doc1", "", &opts(700));
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start, chunks[0].end), (0, 0));
        assert_eq!(chunk_spans("  \n\n \t", &opts(700)), vec![(0, 0)]);
    }

    #[test]
    fn test_paragraphs_merge_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text("doc1", text, &opts(700));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn test_offsets_skip_leading_whitespace() {
        let text = "\n\n   Indented intro.\n\n\n\nAfter a gap.  ";
        let chunks = chunk_text("doc1", text, &opts(700));
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.starts_with("Indented"));
        assert!(chunks[0].text.ends_with("gap."));
        assert_offsets(text, &chunks);
    }

    #[test]
    fn test_paragraphs_exceed_limit() {
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let chunks = chunk_text("doc1", text, &opts(6));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].text, "This is paragraph two.");
        assert_offsets(text, &chunks);
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text("doc1", &text, &opts(10));
        assert!(chunks.len() > 1);
        assert_offsets(&text, &chunks);
    }

    #[test]
    fn test_long_paragraph_hard_split() {
        let text = "word ".repeat(100);
        let chunks = chunk_text("doc1", &text, &opts(5));
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.len() <= 20);
            assert!(!c.text.starts_with(' '));
        }
        assert_offsets(&text, &chunks);
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let chunks = chunk_text("doc1", text, &opts(1));
        assert!(!chunks.is_empty());
        assert_offsets(text, &chunks);
        let windows = chunk_text("doc1", text, &window(1, 0));
        assert_offsets(text, &windows);
    }

    #[test]
    fn test_window_overlap() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let chunks = chunk_text("doc1", text, &window(4, 2));
        assert!(chunks.len() > 2);
        assert_offsets(text, &chunks);
        for pair in chunks.windows(2) {
            assert!(pair[1].start < pair[0].end, "windows should overlap");
            assert!(pair[1].start > pair[0].start);
        }
        assert!(chunks.last().unwrap().text.ends_with("kappa"));
    }

    #[test]
    fn test_window_without_overlap_tiles_text() {
        let text = "one two three four five six seven eight nine ten";
        let chunks = chunk_text("doc1", text, &window(3, 0));
        for pair in chunks.windows(2) {
            assert!(pair[1].start >= pair[0].end);
        }
        let rebuilt: Vec<&str> = chunks.iter().flat_map(|c| c.text.split(' ')).collect();
        assert_eq!(rebuilt.join(" "), text);
    }

    #[test]
    fn test_deterministic_ids_and_hashes() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = chunk_text("doc1", text, &opts(2));
        let c2 = chunk_text("doc1", text, &opts(2));
        assert_eq!(c1, c2);
        assert!(c1[0].id.starts_with("chunk_"));
        assert_ne!(c1[0].id, chunk_text("doc2", text, &opts(2))[0].id);
        assert_eq!(
            c1[0].content_hash,
            hex::encode(Sha256::digest(c1[0].text.as_bytes()))
        );
    }
}
