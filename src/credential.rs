//! Password digests.
//!
//! Passwords are normalized before hashing so the same relaxed comparison
//! used for login (whitespace and case are ignored) survives hashing.
//! Stored values without the digest prefix are legacy plaintext cells and are
//! compared with normalized matching.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::normalize::{canonical, keys_match, KeyKind};

const SCHEME: &str = "sha256";

pub fn is_digest(stored: &str) -> bool {
    stored.starts_with("sha256$")
}

fn hash_with_salt(salt: &str, canonical_password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"$");
    hasher.update(canonical_password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Digest a password with a fresh random salt. Returns `None` for passwords
/// that normalize to nothing.
pub fn digest_password(plain: &str) -> Option<String> {
    let canon = canonical(plain);
    if canon.is_empty() {
        return None;
    }
    let salt = Uuid::new_v4().simple().to_string();
    let hex = hash_with_salt(&salt, &canon);
    Some(format!("{SCHEME}${salt}${hex}"))
}

pub fn verify_password(stored: &str, supplied: &str) -> bool {
    if !is_digest(stored) {
        return keys_match(KeyKind::Secret, stored, supplied);
    }
    let canon = canonical(supplied);
    if canon.is_empty() {
        return false;
    }
    let mut parts = stored.splitn(3, '$');
    let (Some(_), Some(salt), Some(hex)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    hash_with_salt(salt, &canon) == hex
}
