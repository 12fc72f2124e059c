//! Webhook signature verification.
//!
//! The sender signs the raw request body with HMAC-SHA256 using the shared
//! secret and sends `sha256=<lowercase hex digest>` in the
//! `X-Hub-Signature-256` header. Verification runs on the raw bytes, before
//! any JSON decoding.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Prefix of the signature header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Compute the signature header value for `body`.
///
/// Returns `None` only if the HMAC cannot be keyed, which HMAC-SHA256 never
/// refuses in practice.
pub fn sign(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Verify a webhook signature against the raw body.
///
/// # Arguments
///
/// * `secret` - Shared webhook secret
/// * `provided` - Value of the signature header, `sha256=<hex>`
/// * `body` - Raw request body, exactly as received
///
/// # Returns
///
/// `true` only if `provided` equals the expected signature. An empty secret
/// or an empty signature never verifies.
pub fn verify_signature(secret: &str, provided: &str, body: &[u8]) -> bool {
    if secret.is_empty() {
        warn!("webhook_secret_empty");
        return false;
    }
    if provided.is_empty() {
        warn!("webhook_signature_missing");
        return false;
    }

    let Some(expected) = sign(secret, body) else {
        warn!("webhook_signature_invalid_key");
        return false;
    };

    // ct_eq compares the whole slice; differing lengths yield false
    // without inspecting content.
    let valid: bool = expected.as_bytes().ct_eq(provided.as_bytes()).into();

    if !valid {
        warn!(
            expected_length = expected.len(),
            actual_length = provided.len(),
            "webhook_signature_mismatch"
        );
    }

    valid
}
