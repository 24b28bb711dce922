//! HMAC-SHA256 webhook signature verification
//!
//! Gateways sign `{timestamp}.{raw_body}` and send the result in a
//! header shaped like `t=1700000000,v1=<hex digest>`. Verification runs
//! over the raw request bytes, before any parsing, and the digest
//! comparison is constant-time.

use crate::error::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verifies gateway signature headers against a shared secret
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
}

impl SignatureVerifier {
    /// New verifier over the provider's signing secret
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Verify a `t=...,v1=...` header against the raw body
    pub fn verify(&self, header: &str, body: &[u8]) -> Result<()> {
        let (timestamp, signature_hex) = parse_header(header)?;

        let signature = hex::decode(signature_hex)
            .map_err(|_| Error::InvalidSignature("v1 is not hex".to_string()))?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| Error::InvalidSignature(e.to_string()))?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);

        mac.verify_slice(&signature)
            .map_err(|_| Error::InvalidSignature("Digest mismatch".to_string()))
    }

    /// Produce a valid header for a body (test traffic, fixtures)
    pub fn sign(&self, timestamp: i64, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        let digest = hex::encode(mac.finalize().into_bytes());
        format!("t={timestamp},v1={digest}")
    }
}

fn parse_header(header: &str) -> Result<(&str, &str)> {
    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signature = Some(value),
            _ => {}
        }
    }

    match (timestamp, signature) {
        (Some(t), Some(v1)) => Ok((t, v1)),
        _ => Err(Error::InvalidSignature(
            "Header missing t= or v1=".to_string(),
        )),
    }
}
