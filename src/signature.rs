//! HMAC signatures embedded in canonical frames.
//!
//! Signing is a wrapper over canonical bytes: the unsigned frame is
//! canonicalized, a MAC is computed, and a trailer frame is appended as the
//! last payload token. The result is still an ordinary frame, so it passes
//! through the codec unchanged.
//!
//! ```text
//! body    = canonical(unsigned frame)
//! digest  = SHA-256(body)
//! mac     = HMAC-SHA256(key, body ‖ timestamp_be ‖ signer_id)
//! trailer = [digest=#b.. kind=signature mac=#b.. signer=<id> timestamp=#i.. |]
//! ```
//!
//! Verification strips the trailer, recomputes both values and compares
//! the MAC in constant time. Any mismatch yields `verified = false`.

use std::collections::BTreeMap;

use context_vault_core::codec::{Frame, Token};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::audit::Hash32;
use crate::config::SigningConfig;
use crate::error::{Result, VaultError};

type HmacSha256 = Hmac<Sha256>;

const TRAILER_KIND: &str = "signature";

/// Result of [`verify_frame`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verification {
    pub verified: bool,
    pub signer_id: String,
    pub timestamp: i64,
}

/// Parsed signature trailer.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureTrailer {
    pub signer_id: String,
    pub timestamp: i64,
    pub digest: Hash32,
    pub mac: Vec<u8>,
}

impl SignatureTrailer {
    fn to_frame(&self) -> Frame {
        Frame::new()
            .with("digest", Token::blob(self.digest.to_vec()))
            .with("kind", TRAILER_KIND)
            .with("mac", Token::blob(self.mac.clone()))
            .with("signer", self.signer_id.as_str())
            .with("timestamp", self.timestamp)
    }

    fn from_frame(frame: &Frame) -> Result<Self> {
        let bad = |what: &str| VaultError::Signature(format!("malformed signature trailer: {}", what));
        if frame.header().count() != 5 || !frame.payload().is_empty() {
            return Err(bad("unexpected fields"));
        }
        Ok(Self {
            signer_id: frame
                .get("signer")
                .and_then(Token::as_word)
                .ok_or_else(|| bad("signer"))?
                .to_string(),
            timestamp: frame
                .get("timestamp")
                .and_then(Token::as_i64)
                .ok_or_else(|| bad("timestamp"))?,
            digest: frame
                .get("digest")
                .and_then(Token::as_blob)
                .and_then(|b| Hash32::try_from(b).ok())
                .ok_or_else(|| bad("digest"))?,
            mac: frame
                .get("mac")
                .and_then(Token::as_blob)
                .ok_or_else(|| bad("mac"))?
                .to_vec(),
        })
    }
}

/// Symmetric keys, one per signer id.
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    keys: BTreeMap<String, Vec<u8>>,
}

impl Keyring {
    pub fn from_config(config: &SigningConfig) -> Result<Self> {
        let mut ring = Self::default();
        for (signer, key) in &config.keys {
            let bytes = hex::decode(key).map_err(|e| {
                VaultError::Validation(format!("signing key for {} is not hex: {}", signer, e))
            })?;
            ring.insert(signer, bytes);
        }
        Ok(ring)
    }

    pub fn insert(&mut self, signer_id: &str, key: Vec<u8>) {
        self.keys.insert(signer_id.to_string(), key);
    }

    /// Key for `signer_id`, or a `Signature` error naming the configured
    /// signers.
    pub fn key(&self, signer_id: &str) -> Result<&[u8]> {
        self.keys.get(signer_id).map(Vec::as_slice).ok_or_else(|| {
            let known: Vec<&str> = self.signers().collect();
            VaultError::Signature(format!(
                "unknown signer: {} (configured: {})",
                signer_id,
                if known.is_empty() { "none".to_string() } else { known.join(", ") }
            ))
        })
    }

    pub fn signers(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }
}

fn mac_over(key: &[u8], body: &[u8], timestamp: i64, signer_id: &str) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| VaultError::Signature(format!("unusable signing key: {}", e)))?;
    mac.update(body);
    mac.update(&timestamp.to_be_bytes());
    mac.update(signer_id.as_bytes());
    Ok(mac)
}

/// Whether the last payload token is a signature trailer.
pub fn is_signed(frame: &Frame) -> bool {
    frame
        .payload()
        .last()
        .and_then(Token::as_frame)
        .is_some_and(|f| f.kind() == Some(TRAILER_KIND))
}

/// Separate a signed frame into its unsigned body and trailer.
pub fn split_signed(frame: &Frame) -> Result<(Frame, SignatureTrailer)> {
    if !is_signed(frame) {
        return Err(VaultError::Signature("frame has no signature trailer".into()));
    }
    let mut body = frame.clone();
    let trailer = match body.pop_payload() {
        Some(Token::Frame(t)) => SignatureTrailer::from_frame(&t)?,
        _ => return Err(VaultError::Signature("frame has no signature trailer".into())),
    };
    Ok((body, trailer))
}

/// Append a signature trailer for `signer_id` to `frame`.
pub fn sign_frame(frame: &Frame, signer_id: &str, key: &[u8], timestamp: i64) -> Result<Frame> {
    if is_signed(frame) {
        return Err(VaultError::Validation("frame is already signed".into()));
    }
    if signer_id.trim().is_empty() {
        return Err(VaultError::Validation("signer id must not be empty".into()));
    }
    let body = frame.to_canonical_bytes();
    let trailer = SignatureTrailer {
        signer_id: signer_id.to_string(),
        timestamp,
        digest: Sha256::digest(&body).into(),
        mac: mac_over(key, &body, timestamp, signer_id)?
            .finalize()
            .into_bytes()
            .to_vec(),
    };
    Ok(frame.clone().with_payload(trailer.to_frame()))
}

/// Check a signed frame against `key`.
pub fn verify_frame(signed: &Frame, key: &[u8]) -> Result<Verification> {
    let (body, trailer) = split_signed(signed)?;
    let body = body.to_canonical_bytes();
    let digest: Hash32 = Sha256::digest(&body).into();
    let mac_ok = mac_over(key, &body, trailer.timestamp, &trailer.signer_id)?
        .verify_slice(&trailer.mac)
        .is_ok();
    Ok(Verification {
        verified: mac_ok && digest == trailer.digest,
        signer_id: trailer.signer_id,
        timestamp: trailer.timestamp,
    })
}
