//! PIN hashing.
//!
//! Stored form is `salt || HMAC-SHA256(key = salt, pin)`: 16 random salt
//! bytes followed by the 32-byte tag.

use hmac_sha256::HMAC;
use uuid::Uuid;

const SALT_LEN: usize = 16;
const TAG_LEN: usize = 32;

/// Hash a PIN with a fresh random salt.
pub fn hash_pin(pin: &str) -> Vec<u8> {
    let salt = *Uuid::new_v4().as_bytes();
    let tag = HMAC::mac(pin.as_bytes(), salt);

    let mut out = Vec::with_capacity(SALT_LEN + TAG_LEN);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&tag);
    out
}

/// Check a PIN against a stored hash. Malformed hashes never verify.
pub fn verify_pin(stored: &[u8], pin: &str) -> bool {
    if stored.len() != SALT_LEN + TAG_LEN {
        return false;
    }
    let (salt, expected) = stored.split_at(SALT_LEN);
    let tag = HMAC::mac(pin.as_bytes(), salt);

    // Constant time over the tag.
    expected
        .iter()
        .zip(tag.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
