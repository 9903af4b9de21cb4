//! Payment confirmation signatures.
//!
//! The provider signs each confirmation with HMAC-SHA256 over
//! `"{timestamp}.{raw_body}"` and sends the result in a header of the form
//! `t=<unix seconds>,v1=<hex>[,v1=<hex>...]`. Several `v1` entries appear
//! while the provider rotates secrets; any one of them may match.

use crate::config::WebhookSecret;
use crate::error::GateError;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the confirmation signature.
pub const SIGNATURE_HEADER: &str = "Payment-Signature";

const SCHEME_V1: &str = "v1";

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_header(header: &str) -> Result<ParsedHeader, GateError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                let parsed = value.parse::<i64>().map_err(|_| {
                    GateError::InvalidSignature("timestamp is not an integer".to_string())
                })?;
                timestamp = Some(parsed);
            }
            SCHEME_V1 => {
                // Undecodable entries are skipped; another entry may still match.
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| GateError::InvalidSignature("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(GateError::InvalidSignature(
            "no v1 signature present".to_string(),
        ));
    }
    Ok(ParsedHeader {
        timestamp,
        signatures,
    })
}

/// Verifies confirmation signatures against the shared secret.
#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    secret: WebhookSecret,
    tolerance: Duration,
}

impl WebhookVerifier {
    pub fn new(secret: WebhookSecret, tolerance: Duration) -> Self {
        Self { secret, tolerance }
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    pub fn verify(&self, payload: &[u8], header: &str) -> Result<(), GateError> {
        self.verify_at(payload, header, Utc::now())
    }

    /// Verify against an explicit clock reading.
    pub fn verify_at(
        &self,
        payload: &[u8],
        header: &str,
        now: DateTime<Utc>,
    ) -> Result<(), GateError> {
        let parsed = parse_header(header).inspect_err(|err| {
            warn!(error = %err, "payment signature header rejected");
        })?;

        let skew = now.timestamp().abs_diff(parsed.timestamp);
        if skew > self.tolerance.as_secs() {
            warn!(
                skew_secs = skew,
                tolerance_secs = self.tolerance.as_secs(),
                "payment signature outside tolerance window"
            );
            return Err(GateError::InvalidSignature(
                "timestamp outside tolerance window".to_string(),
            ));
        }

        let expected = self.compute(parsed.timestamp, payload)?;
        let matched = parsed
            .signatures
            .iter()
            .any(|candidate| bool::from(expected.as_slice().ct_eq(candidate.as_slice())));
        if !matched {
            warn!("payment signature verification failed");
            return Err(GateError::InvalidSignature(
                "signature mismatch".to_string(),
            ));
        }
        Ok(())
    }

    /// Produce a header value for `payload` at `timestamp`.
    ///
    /// Used by local tooling and tests to emit confirmations the verifier accepts.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, GateError> {
        let mac = self.compute(timestamp, payload)?;
        Ok(format!("t={timestamp},{SCHEME_V1}={}", hex::encode(mac)))
    }

    fn compute(&self, timestamp: i64, payload: &[u8]) -> Result<Vec<u8>, GateError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose().as_bytes())
            .map_err(|e| GateError::InvalidSignature(format!("hmac key rejected: {e}")))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
