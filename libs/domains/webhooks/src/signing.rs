//! Payload signing.
//!
//! Deliveries carry `X-Signature: sha256=<hex(hmac-sha256(secret, body))>`
//! computed over the exact body bytes sent. Receivers must recompute over
//! the raw bytes received, before any parsing or re-serialization.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signature header name.
pub const SIGNATURE_HEADER: &str = "X-Signature";
pub const EVENT_HEADER: &str = "X-Webhook-Event";
pub const WEBHOOK_ID_HEADER: &str = "X-Webhook-Id";
pub const EVENT_ID_HEADER: &str = "X-Event-Id";

/// Compute the signature header value for a body.
pub fn signature_header(secret: &str, body: &[u8]) -> String {
    format!("sha256={}", hex::encode(sign(secret, body)))
}

fn sign(secret: &str, body: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length; new_from_slice cannot fail.
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

/// Verify a received header value against the received body bytes.
/// Comparison is constant-time via the HMAC verify path.
pub fn verify_signature(secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(hex_digest) = header_value.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
