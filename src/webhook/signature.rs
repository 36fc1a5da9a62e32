//! Webhook signature checks.
//!
//! Trello signs `body || callbackURL` with HMAC-SHA1 (base64); GitHub signs
//! the body with HMAC-SHA256 (`sha256=<hex>`). An empty secret disables
//! verification.

use base64::{Engine as _, engine::general_purpose};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

const GITHUB_PREFIX: &str = "sha256=";

fn trello_mac(body: &[u8], secret: &str, callback_url: &str) -> Option<HmacSha1> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    mac.update(callback_url.as_bytes());
    Some(mac)
}

fn github_mac(body: &[u8], secret: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(mac)
}

/// Trello's signature: base64 HMAC-SHA1 of the body followed by the callback URL.
pub fn trello_signature(body: &[u8], secret: &str, callback_url: &str) -> String {
    trello_mac(body, secret, callback_url)
        .map(|mac| general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
        .unwrap_or_default()
}

/// GitHub's `X-Hub-Signature-256` value for `body`.
pub fn github_signature(body: &[u8], secret: &str) -> String {
    github_mac(body, secret)
        .map(|mac| format!("{GITHUB_PREFIX}{}", hex::encode(mac.finalize().into_bytes())))
        .unwrap_or_default()
}

/// Verify a Trello `X-Trello-Webhook` header value.
pub fn verify_trello(body: &[u8], signature: &str, secret: &str, callback_url: &str) -> bool {
    if secret.is_empty() {
        return true;
    }
    let Ok(expected) = general_purpose::STANDARD.decode(signature.trim()) else {
        return false;
    };
    trello_mac(body, secret, callback_url).is_some_and(|mac| mac.verify_slice(&expected).is_ok())
}

/// Verify a GitHub `X-Hub-Signature-256` header value.
pub fn verify_github(body: &[u8], signature: &str, secret: &str) -> bool {
    if secret.is_empty() {
        return true;
    }
    let Some(hex_digest) = signature.trim().strip_prefix(GITHUB_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    github_mac(body, secret).is_some_and(|mac| mac.verify_slice(&expected).is_ok())
}
