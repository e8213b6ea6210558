use axum::http::HeaderMap;
use base64::Engine;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::payments::PaymentError;

type HmacSha256 = Hmac<Sha256>;

/// How a provider encodes the HMAC digest it puts in its signature header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestEncoding {
    Hex,
    Base64,
}

/// Per-provider verification settings.
///
/// The secret is held as a [`SecretString`] so it never shows up in `Debug`
/// output or logs.
#[derive(Debug)]
pub struct VerifierConfig {
    pub signature_header: String,
    pub secret: SecretString,
    pub digest_encoding: DigestEncoding,
}

impl VerifierConfig {
    pub fn new(
        signature_header: impl Into<String>,
        secret: impl Into<String>,
        digest_encoding: DigestEncoding,
    ) -> Self {
        Self {
            signature_header: signature_header.into(),
            secret: SecretString::from(secret.into()),
            digest_encoding,
        }
    }
}

/// Verifies an inbound webhook before any business logic sees it.
///
/// Implementations must work on the exact bytes received over the wire.
pub trait WebhookVerifier: Send + Sync {
    /// Name of the header carrying the signature.
    fn signature_header(&self) -> &str;

    /// `true` when `signature` authenticates `payload`.
    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool;

    /// Pull the signature out of `headers` and verify `raw_body` against it.
    fn verify_request(&self, provider: &str, headers: &HeaderMap, raw_body: &[u8]) -> Result<(), PaymentError> {
        let signature = headers
            .get(self.signature_header())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| PaymentError::Authentication {
                provider: provider.to_string(),
                reason: format!("missing {} header", self.signature_header()),
            })?;

        if self.verify_signature(raw_body, signature) {
            Ok(())
        } else {
            Err(PaymentError::Authentication {
                provider: provider.to_string(),
                reason: "signature mismatch".to_string(),
            })
        }
    }
}

/// HMAC-SHA256 verifier with constant-time comparison.
///
/// # Example
///
/// ```rust
/// use ossy_payments::webhooks::{DigestEncoding, HmacSha256Verifier, VerifierConfig, WebhookVerifier};
///
/// let verifier = HmacSha256Verifier::new(VerifierConfig::new(
///     "x-callback-signature",
///     "callback-secret",
///     DigestEncoding::Hex,
/// ));
/// assert!(!verifier.verify_signature(b"{}", "00"));
/// ```
#[derive(Debug)]
pub struct HmacSha256Verifier {
    config: VerifierConfig,
}

impl HmacSha256Verifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    /// Fiat gateway A convention: `x-callback-signature`, hex digest.
    pub fn xendit(secret: impl Into<String>) -> Self {
        Self::new(VerifierConfig::new("x-callback-signature", secret, DigestEncoding::Hex))
    }

    /// Fiat gateway B convention: `paymongo-signature`, base64 digest.
    pub fn paymongo(secret: impl Into<String>) -> Self {
        Self::new(VerifierConfig::new("paymongo-signature", secret, DigestEncoding::Base64))
    }
}

impl WebhookVerifier for HmacSha256Verifier {
    fn signature_header(&self) -> &str {
        &self.config.signature_header
    }

    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
        let ok = verify(
            payload,
            signature,
            self.config.secret.expose_secret().as_bytes(),
            self.config.digest_encoding,
        );
        if !ok {
            tracing::debug!(
                target: "ossy::webhooks",
                header = %self.config.signature_header,
                "Webhook signature verification failed"
            );
        }
        ok
    }
}

/// Verify `supplied_signature` as the HMAC-SHA256 of `raw_body` under `shared_secret`.
///
/// Undecodable signatures are simply invalid, never an error.
pub fn verify(raw_body: &[u8], supplied_signature: &str, shared_secret: &[u8], encoding: DigestEncoding) -> bool {
    let Some(provided) = decode_signature(supplied_signature.trim(), encoding) else {
        return false;
    };
    let expected = compute_signature(shared_secret, raw_body);
    constant_time_compare(&expected, &provided)
}

/// Encode the HMAC-SHA256 of `payload` the way a provider would send it.
pub fn sign(payload: &[u8], shared_secret: &[u8], encoding: DigestEncoding) -> String {
    let digest = compute_signature(shared_secret, payload);
    match encoding {
        DigestEncoding::Hex => hex::encode(digest),
        DigestEncoding::Base64 => base64::engine::general_purpose::STANDARD.encode(digest),
    }
}

fn compute_signature(secret: &[u8], payload: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so this never takes the fallback branch.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return Vec::new();
    };
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

fn decode_signature(signature: &str, encoding: DigestEncoding) -> Option<Vec<u8>> {
    match encoding {
        DigestEncoding::Hex => hex::decode(signature).ok(),
        DigestEncoding::Base64 => base64::engine::general_purpose::STANDARD.decode(signature).ok(),
    }
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.is_empty() || a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
