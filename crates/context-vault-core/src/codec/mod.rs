//! Canonical codec for vault records.
//!
//! Every record serializes to a [`Frame`]: a sorted header of key/value
//! pairs and an ordered payload of tokens.
//!
//! ```text
//! frame   = "[" header "|" payload "]"
//! header  = *( key "=" token )          ; keys: [A-Za-z0-9_.-]+, unique
//! payload = *token
//! token   = word | number | frame
//! word    = bare | quoted               ; bare: [A-Za-z_][A-Za-z0-9_.:/@-]*
//! number  = "#" ("u"|"i"|"d"|"f"|"b") body
//! ```
//!
//! Whitespace between tokens is insignificant on input. The canonical
//! form sorts header keys byte-wise, separates tokens with one space,
//! writes words bare whenever the bare grammar allows, and re-emits
//! numbers in their profile's canonical form (see [`number`]):
//!
//! ```rust
//! use context_vault_core::codec::canonicalize;
//!
//! let messy = b"[ title = \"story\"   id=doc_1 |  fox   #u007 ]";
//! let canon = canonicalize(messy).unwrap();
//! assert_eq!(canon, b"[id=doc_1 title=story | fox #u7]");
//! assert_eq!(canonicalize(&canon).unwrap(), canon);
//! ```
//!
//! Canonicalization is a pure function of the decoded frame, so two inputs
//! that differ only in header order or spacing produce identical bytes.
//! Malformed input is never repaired: it yields a [`ParseError`].

pub mod number;
mod parse;
pub mod record;

use std::collections::BTreeMap;
use std::fmt;

pub use number::{Decimal, Number, Profile};
pub use parse::{parse_frame, ParseError};
pub use record::{decode_record, encode_record};

/// One payload or header value.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Word(String),
    Number(Number),
    Frame(Frame),
}

impl Token {
    pub fn blob(bytes: impl Into<Vec<u8>>) -> Token {
        Token::Number(Number::Blob(bytes.into()))
    }

    pub fn as_word(&self) -> Option<&str> {
        match self {
            Token::Word(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Token::Number(Number::Unsigned(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Token::Number(Number::Signed(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Token::Number(Number::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Token::Number(Number::Blob(b)) => Some(b),
            _ => None,
        }
    }

    pub fn as_frame(&self) -> Option<&Frame> {
        match self {
            Token::Frame(f) => Some(f),
            _ => None,
        }
    }

    fn write_canonical(&self, out: &mut String) {
        match self {
            Token::Word(w) => write_word(w, out),
            Token::Number(n) => out.push_str(&n.encode()),
            Token::Frame(f) => f.write_canonical(out),
        }
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token::Word(s.to_string())
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Token::Word(s)
    }
}

impl From<u64> for Token {
    fn from(v: u64) -> Self {
        Token::Number(Number::Unsigned(v))
    }
}

impl From<i64> for Token {
    fn from(v: i64) -> Self {
        Token::Number(Number::Signed(v))
    }
}

impl From<Number> for Token {
    fn from(n: Number) -> Self {
        Token::Number(n)
    }
}

impl From<Frame> for Token {
    fn from(f: Frame) -> Self {
        Token::Frame(f)
    }
}

/// Decoded frame. Header keys are held in a `BTreeMap`, so iteration is
/// always in byte-wise lexicographic order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    header: BTreeMap<String, Token>,
    payload: Vec<Token>,
}

/// Whether `key` is a legal header key.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

/// Whether `word` can be written without quotes.
pub fn is_bare_word(word: &str) -> bool {
    let mut bytes = word.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphabetic() || b == b'_' => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b':' | b'/' | b'@' | b'-'))
}

fn write_word(word: &str, out: &mut String) {
    if is_bare_word(word) {
        out.push_str(word);
        return;
    }
    out.push('"');
    for c in word.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{{{:x}}}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style header insert for keys known to be valid.
    ///
    /// Use [`Frame::try_insert`] for keys that come from user input.
    pub fn with(mut self, key: &str, value: impl Into<Token>) -> Self {
        debug_assert!(is_valid_key(key), "invalid header key {:?}", key);
        self.header.insert(key.to_string(), value.into());
        self
    }

    /// Insert a header pair, rejecting keys outside the key grammar.
    pub fn try_insert(&mut self, key: &str, value: impl Into<Token>) -> Result<(), ParseError> {
        if !is_valid_key(key) {
            return Err(ParseError::schema(
                format!("`{}` is not a valid header key", key),
                key,
                Some("header keys may only contain letters, digits, `_`, `.` and `-`".to_string()),
            ));
        }
        self.header.insert(key.to_string(), value.into());
        Ok(())
    }

    pub fn push(&mut self, token: impl Into<Token>) {
        self.payload.push(token.into());
    }

    pub fn with_payload(mut self, token: impl Into<Token>) -> Self {
        self.push(token);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Token> {
        self.header.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Token> {
        self.header.remove(key)
    }

    /// Header pairs in canonical (sorted) order.
    pub fn header(&self) -> impl Iterator<Item = (&str, &Token)> {
        self.header.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn payload(&self) -> &[Token] {
        &self.payload
    }

    pub fn pop_payload(&mut self) -> Option<Token> {
        self.payload.pop()
    }

    /// The `kind` header as a word, if present.
    pub fn kind(&self) -> Option<&str> {
        self.get("kind").and_then(Token::as_word)
    }

    fn write_canonical(&self, out: &mut String) {
        out.push('[');
        for (i, (key, value)) in self.header.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(key);
            out.push('=');
            value.write_canonical(out);
        }
        if !self.header.is_empty() {
            out.push(' ');
        }
        out.push('|');
        for token in &self.payload {
            out.push(' ');
            token.write_canonical(out);
        }
        out.push(']');
    }

    /// Canonical textual encoding.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }

    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        self.encode().into_bytes()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Parse `input` and re-serialize it in canonical form.
///
/// Idempotent: `canonicalize(&canonicalize(x)?)? == canonicalize(x)?`.
pub fn canonicalize(input: &[u8]) -> Result<Vec<u8>, ParseError> {
    Ok(parse_frame(input)?.to_canonical_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_frame() {
        assert_eq!(Frame::new().encode(), "[|]");
        assert_eq!(canonicalize(b"  [ | ]\n").unwrap(), b"[|]");
    }

    #[test]
    fn test_header_order_is_irrelevant() {
        let a = canonicalize(b"[b=#u2 a=#u1 | x]").unwrap();
        let b = canonicalize(b"[a=#u1 b=#u2 | x]").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, b"[a=#u1 b=#u2 | x]");
    }

    #[test]
    fn test_unsorted_messy_header_matches_built_record() {
        let messy = b"[\tsubject = fox\n  kind=fact   confidence=#f0.90 |  fox  is_a   canine ]";
        let built = Frame::new()
            .with("kind", "fact")
            .with("subject", "fox")
            .with("confidence", Number::float(0.9).unwrap())
            .with_payload("fox")
            .with_payload("is_a")
            .with_payload("canine");
        assert_eq!(canonicalize(messy).unwrap(), built.to_canonical_bytes());
    }

    #[test]
    fn test_words_quote_only_when_needed() {
        let frame = Frame::new()
            .with_payload("plain_word")
            .with_payload("two words")
            .with_payload("")
            .with_payload("9lives")
            .with_payload("tab\there \"quoted\" back\\slash");
        assert_eq!(
            frame.encode(),
            r#"[| plain_word "two words" "" "9lives" "tab\there \"quoted\" back\\slash"]"#
        );
    }

    #[test]
    fn test_quoted_bare_word_canonicalizes_bare() {
        assert_eq!(canonicalize(br#"[| "fox"]"#).unwrap(), b"[| fox]");
    }

    #[test]
    fn test_nested_frames_are_canonicalized() {
        let canon = canonicalize(b"[outer=[z=#u1 a=#u2|] | [ y = x | ] ]").unwrap();
        assert_eq!(canon, b"[outer=[a=#u2 z=#u1 |] | [y=x |]]");
    }

    #[test]
    fn test_control_characters_escape() {
        let frame = Frame::new().with_payload("bell\u{7}");
        assert_eq!(frame.encode(), "[| \"bell\\u{7}\"]");
        let parsed = parse_frame(frame.encode().as_bytes()).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_try_insert_rejects_bad_keys() {
        let mut frame = Frame::new();
        assert!(frame.try_insert("ok_key.v-1", "x").is_ok());
        assert!(frame.try_insert("bad key", "x").is_err());
        assert!(frame.try_insert("", "x").is_err());
    }
}
