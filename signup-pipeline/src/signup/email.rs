//! Email normalization, shape validation and idempotency key derivation.

use sha2::{Digest, Sha256};

/// Trim surrounding whitespace and lower-case the whole address.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Basic syntactic check: one `@`, a non-empty local part and a dotted domain
/// with no empty labels. No whitespace anywhere.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    if local.is_empty() || domain.contains('@') {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|l| !l.is_empty())
}

/// Derive the idempotency key for an already-normalized address.
///
/// Hex-encoded SHA-256, so the same logical signup always maps to the same key.
pub fn idempotency_key(normalized_email: &str) -> String {
    hex::encode(Sha256::digest(normalized_email.as_bytes()))
}
