//! Numeric token profiles.
//!
//! A numeric token is written `#<profile><body>`:
//!
//! | Profile | Sigil | Example | Canonical form |
//! |---------|-------|---------|----------------|
//! | Unsigned integer | `u` | `#u42` | no sign, no leading zeros |
//! | Signed integer | `i` | `#i-7` | `-` only when negative, no leading zeros |
//! | Exact-scaled decimal | `d` | `#d12.50` | scale (fraction digits) preserved, no leading zeros |
//! | Floating approximation | `f` | `#f0.9` | shortest round-trip form, finite only |
//! | Binary blob | `b` | `#b...` | radix-32 groups plus `~` tail escape |
//!
//! # Binary blobs
//!
//! Bytes are packed five at a time into eight symbols of the alphabet
//! `0123456789abcdefghjkmnpqrstvwxyz`. A final partial group of `r` bytes
//! (1..=4) is written as the escape `~`, one symbol holding `r`, then
//! `ceil(8r / 5)` symbols with zero padding bits. Decoding rejects
//! uppercase symbols, non-zero padding and misplaced escapes, so every
//! byte sequence has exactly one encoding.

use std::fmt;

/// Symbol alphabet for binary blobs (index = 5-bit value).
pub const BLOB_ALPHABET: &[u8; 32] = b"0123456789abcdefghjkmnpqrstvwxyz";
/// Escape introducing a partial final byte group.
pub const BLOB_ESCAPE: char = '~';

const MAX_DECIMAL_DIGITS: usize = 38;

/// Declared profile of a numeric token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Unsigned,
    Signed,
    Decimal,
    Float,
    Blob,
}

impl Profile {
    pub fn sigil(&self) -> char {
        match self {
            Profile::Unsigned => 'u',
            Profile::Signed => 'i',
            Profile::Decimal => 'd',
            Profile::Float => 'f',
            Profile::Blob => 'b',
        }
    }

    pub fn from_sigil(c: char) -> Option<Profile> {
        match c {
            'u' => Some(Profile::Unsigned),
            'i' => Some(Profile::Signed),
            'd' => Some(Profile::Decimal),
            'f' => Some(Profile::Float),
            'b' => Some(Profile::Blob),
            _ => None,
        }
    }
}

/// Exact decimal: `mantissa × 10^-scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimal {
    pub mantissa: i128,
    pub scale: u32,
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa.unsigned_abs().to_string();
        let scale = self.scale as usize;
        let padded = if digits.len() <= scale {
            format!("{}{}", "0".repeat(scale + 1 - digits.len()), digits)
        } else {
            digits
        };
        if self.mantissa < 0 {
            f.write_str("-")?;
        }
        let split = padded.len() - scale;
        f.write_str(&padded[..split])?;
        if scale > 0 {
            write!(f, ".{}", &padded[split..])?;
        }
        Ok(())
    }
}

/// A validated numeric token value.
#[derive(Debug, Clone, PartialEq)]
pub enum Number {
    Unsigned(u64),
    Signed(i64),
    Decimal(Decimal),
    /// Always finite; `-0.0` is stored as `0.0`.
    Float(f64),
    Blob(Vec<u8>),
}

impl Number {
    pub fn profile(&self) -> Profile {
        match self {
            Number::Unsigned(_) => Profile::Unsigned,
            Number::Signed(_) => Profile::Signed,
            Number::Decimal(_) => Profile::Decimal,
            Number::Float(_) => Profile::Float,
            Number::Blob(_) => Profile::Blob,
        }
    }

    /// Build a float token value, rejecting NaN and infinities.
    pub fn float(v: f64) -> Option<Number> {
        if !v.is_finite() {
            return None;
        }
        Some(Number::Float(if v == 0.0 { 0.0 } else { v }))
    }

    /// Canonical textual form, including the `#` and profile sigil.
    pub fn encode(&self) -> String {
        let body = match self {
            Number::Unsigned(v) => v.to_string(),
            Number::Signed(v) => v.to_string(),
            Number::Decimal(d) => d.to_string(),
            Number::Float(v) => format!("{:?}", if *v == 0.0 { 0.0 } else { *v }),
            Number::Blob(bytes) => encode_blob(bytes),
        };
        format!("#{}{}", self.profile().sigil(), body)
    }
}

/// Validation failure for a numeric token body, before location is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberError {
    pub message: String,
    pub suggestion: Option<String>,
}

impl NumberError {
    fn new(message: impl Into<String>, suggestion: Option<String>) -> Self {
        Self {
            message: message.into(),
            suggestion,
        }
    }
}

/// Parse the body of a numeric token (the text after `#<sigil>`).
pub fn parse_number(profile: Profile, body: &str) -> Result<Number, NumberError> {
    match profile {
        Profile::Unsigned => parse_unsigned(body),
        Profile::Signed => parse_signed(body),
        Profile::Decimal => parse_decimal(body),
        Profile::Float => parse_float(body),
        Profile::Blob => decode_blob(body).map(Number::Blob),
    }
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_unsigned(body: &str) -> Result<Number, NumberError> {
    if body.starts_with('+') || body.starts_with('-') {
        return Err(NumberError::new(
            format!("unsigned token `#u{}` must not carry a sign", body),
            Some(if body.starts_with('-') {
                format!("use the signed profile: #i{}", body)
            } else {
                format!("#u{}", &body[1..])
            }),
        ));
    }
    if !all_digits(body) {
        return Err(NumberError::new(
            format!("unsigned token `#u{}` must contain only digits", body),
            None,
        ));
    }
    body.parse::<u64>().map(Number::Unsigned).map_err(|_| {
        NumberError::new(
            format!("unsigned token `#u{}` exceeds {}", body, u64::MAX),
            Some(format!("use the decimal profile: #d{}", body)),
        )
    })
}

fn parse_signed(body: &str) -> Result<Number, NumberError> {
    let digits = body.strip_prefix(['+', '-']).unwrap_or(body);
    if !all_digits(digits) {
        return Err(NumberError::new(
            format!("signed token `#i{}` must be an optional sign followed by digits", body),
            None,
        ));
    }
    body.parse::<i64>().map(Number::Signed).map_err(|_| {
        NumberError::new(
            format!("signed token `#i{}` is outside the 64-bit range", body),
            Some(format!("use the decimal profile: #d{}", body)),
        )
    })
}

fn parse_decimal(body: &str) -> Result<Number, NumberError> {
    let (negative, unsigned) = match body.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, body.strip_prefix('+').unwrap_or(body)),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, f),
        None => (unsigned, ""),
    };
    if int_part.is_empty() && !frac_part.is_empty() {
        return Err(NumberError::new(
            format!("decimal token `#d{}` has no integer digits", body),
            Some(format!("#d{}0.{}", if negative { "-" } else { "" }, frac_part)),
        ));
    }
    if unsigned.ends_with('.') {
        return Err(NumberError::new(
            format!("decimal token `#d{}` ends with a bare `.`", body),
            Some(format!("#d{}", body.trim_end_matches('.'))),
        ));
    }
    if !all_digits(int_part) || !(frac_part.is_empty() || all_digits(frac_part)) {
        return Err(NumberError::new(
            format!("decimal token `#d{}` must look like -123.45", body),
            None,
        ));
    }
    let significant = int_part.trim_start_matches('0').len() + frac_part.len();
    if significant > MAX_DECIMAL_DIGITS {
        return Err(NumberError::new(
            format!(
                "decimal token `#d{}` has more than {} significant digits",
                body, MAX_DECIMAL_DIGITS
            ),
            Some("use the floating profile #f for approximate values".to_string()),
        ));
    }
    let combined = format!("{}{}", int_part, frac_part);
    let magnitude: i128 = combined
        .parse()
        .map_err(|_| NumberError::new(format!("decimal token `#d{}` is out of range", body), None))?;
    Ok(Number::Decimal(Decimal {
        mantissa: if negative { -magnitude } else { magnitude },
        scale: frac_part.len() as u32,
    }))
}

fn parse_float(body: &str) -> Result<Number, NumberError> {
    let unsigned = body.strip_prefix(['+', '-']).unwrap_or(body);
    let (mantissa, exponent) = match unsigned.split_once(['e', 'E']) {
        Some((m, e)) => (m, Some(e)),
        None => (unsigned, None),
    };
    let mantissa_ok = match mantissa.split_once('.') {
        Some((i, f)) => all_digits(i) && all_digits(f),
        None => all_digits(mantissa),
    };
    let exponent_ok = exponent
        .map(|e| all_digits(e.strip_prefix(['+', '-']).unwrap_or(e)))
        .unwrap_or(true);
    if !mantissa_ok || !exponent_ok {
        return Err(NumberError::new(
            format!("float token `#f{}` is not a finite decimal number", body),
            Some("write floats like #f0.25 or #f1.5e-3".to_string()),
        ));
    }
    let value: f64 = body
        .parse()
        .map_err(|_| NumberError::new(format!("float token `#f{}` does not parse", body), None))?;
    Number::float(value).ok_or_else(|| {
        NumberError::new(
            format!("float token `#f{}` overflows to infinity", body),
            Some(format!("use the decimal profile: #d{}", body)),
        )
    })
}

/// Number of symbols needed for `n` bytes (n <= 5).
fn symbols_for(n: usize) -> usize {
    (n * 8).div_ceil(5)
}

fn pack(bytes: &[u8], out: &mut String) {
    let mut acc: u32 = 0;
    let mut bits = 0u32;
    for &b in bytes {
        acc = (acc << 8) | u32::from(b);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BLOB_ALPHABET[((acc >> bits) & 31) as usize] as char);
        }
        acc &= (1 << bits) - 1;
    }
    if bits > 0 {
        out.push(BLOB_ALPHABET[((acc << (5 - bits)) & 31) as usize] as char);
    }
}

/// Encode raw bytes as a blob token body (without the `#b` prefix).
pub fn encode_blob(bytes: &[u8]) -> String {
    let full = bytes.len() / 5 * 5;
    let mut out = String::with_capacity(bytes.len() * 8 / 5 + 4);
    for group in bytes[..full].chunks(5) {
        pack(group, &mut out);
    }
    let tail = &bytes[full..];
    if !tail.is_empty() {
        out.push(BLOB_ESCAPE);
        out.push(BLOB_ALPHABET[tail.len()] as char);
        pack(tail, &mut out);
    }
    out
}

fn symbol_value(c: u8) -> Result<u32, NumberError> {
    if let Some(pos) = BLOB_ALPHABET.iter().position(|&a| a == c) {
        return Ok(pos as u32);
    }
    let lower = c.to_ascii_lowercase();
    let suggestion = if BLOB_ALPHABET.contains(&lower) {
        Some(format!("blob symbols are lowercase: use `{}`", lower as char))
    } else {
        None
    };
    Err(NumberError::new(
        format!("`{}` is not a blob symbol", c as char),
        suggestion,
    ))
}

fn unpack(symbols: &[u8], expected: usize) -> Result<Vec<u8>, NumberError> {
    let mut acc: u32 = 0;
    let mut bits = 0u32;
    let mut out = Vec::with_capacity(expected);
    for &s in symbols {
        acc = (acc << 5) | symbol_value(s)?;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
            acc &= (1 << bits) - 1;
        }
    }
    if acc != 0 {
        return Err(NumberError::new(
            "blob tail has non-zero padding bits",
            Some("re-encode the original bytes; padding bits must be zero".to_string()),
        ));
    }
    if out.len() != expected {
        return Err(NumberError::new(
            format!("blob group decodes to {} bytes, expected {}", out.len(), expected),
            None,
        ));
    }
    Ok(out)
}

/// Decode a blob token body (without the `#b` prefix) to the exact bytes.
pub fn decode_blob(body: &str) -> Result<Vec<u8>, NumberError> {
    let (groups, tail) = match body.split_once(BLOB_ESCAPE) {
        Some((g, t)) => (g, Some(t)),
        None => (body, None),
    };
    if groups.len() % 8 != 0 {
        return Err(NumberError::new(
            format!(
                "blob body has {} symbols before the tail; full groups are 8 symbols",
                groups.len()
            ),
            Some(format!(
                "a partial final group must follow the `{}` escape",
                BLOB_ESCAPE
            )),
        ));
    }
    let mut out = Vec::with_capacity(groups.len() / 8 * 5 + 4);
    for group in groups.as_bytes().chunks(8) {
        out.extend(unpack(group, 5)?);
    }
    if let Some(tail) = tail {
        let tail = tail.as_bytes();
        let Some((&count_symbol, rest)) = tail.split_first() else {
            return Err(NumberError::new(
                "blob escape `~` is not followed by a byte count",
                None,
            ));
        };
        let count = symbol_value(count_symbol)? as usize;
        if !(1..=4).contains(&count) {
            return Err(NumberError::new(
                format!("blob tail byte count must be 1-4, found {}", count),
                Some("a tail of 0 or 5 bytes is written without the escape".to_string()),
            ));
        }
        if rest.len() != symbols_for(count) {
            return Err(NumberError::new(
                format!(
                    "blob tail of {} bytes needs {} symbols, found {}",
                    count,
                    symbols_for(count),
                    rest.len()
                ),
                None,
            ));
        }
        out.extend(unpack(rest, count)?);
    }
    Ok(out)
}
