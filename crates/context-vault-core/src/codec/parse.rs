//! Frame parser.

use thiserror::Error;

use super::number::{parse_number, Profile};
use super::{is_bare_word, is_valid_key, Frame, Token};

/// Nesting limit for frames inside frames.
const MAX_DEPTH: usize = 64;

/// Structured codec failure.
///
/// Carries the byte offset and 1-based line/column of the offending token,
/// the token text itself, and a suggested fix where one can be derived.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{line}:{column}: {message}{}", render_context(.token, .suggestion))]
pub struct ParseError {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
    pub token: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl ParseError {
    fn at(
        src: &str,
        offset: usize,
        token: impl Into<String>,
        message: impl Into<String>,
        suggestion: Option<String>,
    ) -> Self {
        let prefix = &src[..offset.min(src.len())];
        let line = prefix.matches('\n').count() + 1;
        let column = match prefix.rfind('\n') {
            Some(nl) => prefix[nl + 1..].chars().count() + 1,
            None => prefix.chars().count() + 1,
        };
        Self {
            offset,
            line,
            column,
            token: token.into(),
            message: message.into(),
            suggestion,
        }
    }

    /// Error about a well-formed frame that does not fit a record schema.
    /// Located at the start of the frame.
    pub fn schema(
        message: impl Into<String>,
        token: impl Into<String>,
        suggestion: Option<String>,
    ) -> Self {
        Self {
            offset: 0,
            line: 1,
            column: 1,
            token: token.into(),
            message: message.into(),
            suggestion,
        }
    }
}

fn render_context(token: &str, suggestion: &Option<String>) -> String {
    let mut out = String::new();
    if !token.is_empty() {
        out.push_str(&format!(" (near `{}`)", token));
    }
    if let Some(hint) = suggestion {
        out.push_str(&format!("; hint: {}", hint));
    }
    out
}

/// Parse exactly one frame (surrounding whitespace allowed).
pub fn parse_frame(input: &[u8]) -> Result<Frame, ParseError> {
    let src = match std::str::from_utf8(input) {
        Ok(s) => s,
        Err(e) => {
            let offset = e.valid_up_to();
            let valid = std::str::from_utf8(&input[..offset]).unwrap_or_default();
            return Err(ParseError::at(
                valid,
                offset,
                format!("{:#04x}", input[offset]),
                "input is not valid UTF-8",
                None,
            ));
        }
    };
    let mut parser = Parser {
        src,
        pos: 0,
        depth: 0,
    };
    parser.skip_ws();
    if parser.peek() != Some('[') {
        let (raw, start) = parser.scan_raw();
        return Err(parser.error(
            start,
            raw,
            "expected `[` to start a frame",
            None,
        ));
    }
    let frame = parser.parse_frame()?;
    parser.skip_ws();
    if parser.pos < src.len() {
        let start = parser.pos;
        let (raw, _) = parser.scan_raw();
        let token = if raw.is_empty() {
            src[start..].chars().next().map(String::from).unwrap_or_default()
        } else {
            raw.to_string()
        };
        return Err(parser.error(
            start,
            token,
            "unexpected input after the end of the frame",
            Some("a frame is a single `[...]`; remove the trailing text".to_string()),
        ));
    }
    Ok(frame)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '[' | ']' | '|' | '"' | '=')
}

impl<'a> Parser<'a> {
    fn error(
        &self,
        offset: usize,
        token: impl Into<String>,
        message: impl Into<String>,
        suggestion: Option<String>,
    ) -> ParseError {
        ParseError::at(self.src, offset, token, message, suggestion)
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    /// Consume a run of non-delimiter characters.
    fn scan_raw(&mut self) -> (&'a str, usize) {
        let src = self.src;
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_delimiter(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        (&src[start..self.pos], start)
    }

    fn eof_error(&self) -> ParseError {
        self.error(
            self.src.len(),
            "",
            "unexpected end of input; frame is not terminated",
            Some("close the frame with `]`".to_string()),
        )
    }

    fn parse_frame(&mut self) -> Result<Frame, ParseError> {
        let src = self.src;
        let open = self.pos;
        self.bump();
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(
                open,
                "[",
                format!("frames nest deeper than {} levels", MAX_DEPTH),
                None,
            ));
        }

        let mut frame = Frame::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Err(self.eof_error()),
                Some('|') => {
                    self.bump();
                    break;
                }
                Some(']') => {
                    return Err(self.error(
                        self.pos,
                        "]",
                        "missing `|` between header and payload",
                        Some("insert `|` before the payload, e.g. `[key=value | tokens]`".to_string()),
                    ));
                }
                Some(_) => {
                    let key_start = self.pos;
                    while let Some(c) = self.peek() {
                        if !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')) {
                            break;
                        }
                        self.pos += 1;
                    }
                    let key = &src[key_start..self.pos];
                    if key.is_empty() {
                        let (raw, start) = self.scan_raw();
                        let token = if raw.is_empty() {
                            self.peek().map(String::from).unwrap_or_default()
                        } else {
                            raw.to_string()
                        };
                        return Err(self.error(
                            start,
                            token,
                            "expected a header key or `|`",
                            Some("header entries are written key=value before `|`".to_string()),
                        ));
                    }
                    debug_assert!(is_valid_key(key));
                    self.skip_ws();
                    if self.peek() != Some('=') {
                        return Err(self.error(
                            key_start,
                            key,
                            format!("expected `=` after header key `{}`", key),
                            Some(format!("write `{}=<value>` or move it after `|`", key)),
                        ));
                    }
                    self.bump();
                    self.skip_ws();
                    let value = self.parse_token()?;
                    if frame.get(key).is_some() {
                        return Err(self.error(
                            key_start,
                            key,
                            format!("duplicate header key `{}`", key),
                            Some(format!("remove one of the `{}` entries", key)),
                        ));
                    }
                    frame = frame.with(key, value);
                }
            }
        }

        loop {
            self.skip_ws();
            match self.peek() {
                None => return Err(self.eof_error()),
                Some(']') => {
                    self.bump();
                    break;
                }
                Some('|') => {
                    return Err(self.error(
                        self.pos,
                        "|",
                        "unexpected `|` in payload",
                        Some("a frame has one `|`; quote it (\"|\") if it is data".to_string()),
                    ));
                }
                Some(_) => {
                    let token = self.parse_token()?;
                    frame.push(token);
                }
            }
        }

        self.depth -= 1;
        Ok(frame)
    }

    fn parse_token(&mut self) -> Result<Token, ParseError> {
        match self.peek() {
            None => Err(self.eof_error()),
            Some('[') => Ok(Token::Frame(self.parse_frame()?)),
            Some('"') => self.parse_quoted(),
            Some('#') => self.parse_number(),
            Some(c) if is_delimiter(c) => Err(self.error(
                self.pos,
                c.to_string(),
                format!("unexpected `{}` where a token was expected", c),
                None,
            )),
            Some(_) => {
                let (raw, start) = self.scan_raw();
                if !is_bare_word(raw) {
                    let quoted = Frame::new().with_payload(raw).encode();
                    let quoted = quoted
                        .trim_start_matches("[| ")
                        .trim_end_matches(']')
                        .to_string();
                    return Err(self.error(
                        start,
                        raw,
                        format!("`{}` is not a valid bare word", raw),
                        Some(format!("quote it: {}", quoted)),
                    ));
                }
                Ok(Token::Word(raw.to_string()))
            }
        }
    }

    fn parse_number(&mut self) -> Result<Token, ParseError> {
        let (raw, start) = self.scan_raw();
        let profile = raw.chars().nth(1).and_then(Profile::from_sigil);
        let Some(profile) = profile else {
            return Err(self.error(
                start,
                raw,
                "unknown numeric profile",
                Some("numbers start with #u, #i, #d, #f or #b".to_string()),
            ));
        };
        parse_number(profile, &raw[2..])
            .map(Token::Number)
            .map_err(|e| self.error(start, raw, e.message, e.suggestion))
    }

    fn parse_quoted(&mut self) -> Result<Token, ParseError> {
        let src = self.src;
        let start = self.pos;
        self.bump();
        let mut word = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(self.error(
                    start,
                    &src[start..],
                    "unterminated quoted word",
                    Some("add a closing `\"`".to_string()),
                ));
            };
            match c {
                '"' => break,
                '\\' => {
                    let escape_at = self.pos - 1;
                    match self.bump() {
                        Some('n') => word.push('\n'),
                        Some('r') => word.push('\r'),
                        Some('t') => word.push('\t'),
                        Some('"') => word.push('"'),
                        Some('\\') => word.push('\\'),
                        Some('u') => word.push(self.parse_unicode_escape(escape_at)?),
                        other => {
                            let shown = other.map(|c| format!("\\{}", c)).unwrap_or_else(|| "\\".into());
                            return Err(self.error(
                                escape_at,
                                shown.clone(),
                                format!("unknown escape `{}`", shown),
                                Some("write a literal backslash as `\\\\`".to_string()),
                            ));
                        }
                    }
                }
                c => word.push(c),
            }
        }
        Ok(Token::Word(word))
    }

    fn parse_unicode_escape(&mut self, escape_at: usize) -> Result<char, ParseError> {
        let src = self.src;
        let bad = |p: &Self| {
            let end = p.src[escape_at..]
                .find('}')
                .map(|i| escape_at + i + 1)
                .unwrap_or(p.pos);
            p.error(
                escape_at,
                &p.src[escape_at..end],
                "malformed unicode escape",
                Some("write unicode escapes as \\u{1f98a}".to_string()),
            )
        };
        if self.bump() != Some('{') {
            return Err(bad(self));
        }
        let digits_start = self.pos;
        while let Some(c) = self.peek() {
            if !c.is_ascii_hexdigit() {
                break;
            }
            self.pos += 1;
        }
        let digits = &src[digits_start..self.pos];
        if digits.is_empty() || digits.len() > 6 || self.bump() != Some('}') {
            return Err(bad(self));
        }
        match u32::from_str_radix(digits, 16).ok().and_then(char::from_u32) {
            Some(c) => Ok(c),
            None => Err(bad(self)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(input: &str) -> ParseError {
        parse_frame(input.as_bytes()).unwrap_err()
    }

    #[test]
    fn test_error_carries_line_and_column() {
        let e = err("[kind=fact |\n  fox #x12 ]");
        assert_eq!(e.line, 2);
        assert_eq!(e.column, 7);
        assert_eq!(e.offset, 19);
        assert_eq!(e.token, "#x12");
        assert!(e.suggestion.is_some());
    }

    #[test]
    fn test_missing_separator() {
        let e = err("[kind=fact]");
        assert!(e.message.contains("missing `|`"));
        assert_eq!(e.offset, 10);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let e = err("[a=#u1 a=#u2 |]");
        assert!(e.message.contains("duplicate"));
        assert_eq!(e.token, "a");
    }

    #[test]
    fn test_unterminated_frame() {
        let e = err("[a=#u1 | x y");
        assert!(e.message.contains("not terminated"));
        assert_eq!(e.suggestion.as_deref(), Some("close the frame with `]`"));
    }

    #[test]
    fn test_invalid_bare_word_suggests_quoting() {
        let e = err("[| fox! ]");
        assert_eq!(e.token, "fox!");
        assert_eq!(e.suggestion.as_deref(), Some("quote it: \"fox!\""));
    }

    #[test]
    fn test_trailing_input_rejected() {
        let e = err("[|] extra");
        assert_eq!(e.token, "extra");
        assert_eq!(e.offset, 4);
    }

    #[test]
    fn test_invalid_utf8_location() {
        let e = parse_frame(b"[| ab\xff ]").unwrap_err();
        assert_eq!(e.offset, 5);
        assert_eq!(e.token, "0xff");
    }

    #[test]
    fn test_bad_escape() {
        let e = err(r#"[| "a\qb" ]"#);
        assert!(e.message.contains("unknown escape"));
        assert_eq!(e.token, "\\q");
    }

    #[test]
    fn test_unicode_escape() {
        let frame = parse_frame(br#"[| "fox \u{1f98a}" ]"#).unwrap();
        assert_eq!(frame.payload()[0].as_word(), Some("fox \u{1f98a}"));
    }

    #[test]
    fn test_pipe_in_payload_rejected() {
        let e = err("[| a | b]");
        assert!(e.message.contains("unexpected `|`"));
    }

    #[test]
    fn test_depth_limit() {
        let deep = format!("{}{}", "[| ".repeat(70), "]".repeat(70));
        let e = err(&deep);
        assert!(e.message.contains("nest deeper"));
    }

    #[test]
    fn test_not_a_frame() {
        let e = err("hello");
        assert!(e.message.contains("expected `[`"));
        assert_eq!(e.token, "hello");
    }
}
