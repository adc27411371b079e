//! Salted password hash.
//!
//! A record is `salt (8 bytes) || SHA256(salt || utf8(password))`, 40 bytes
//! in total. The smartcard layout reserves exactly [`MAX_HASH`] bytes for it.

use sha2::{Digest, Sha256};

use super::{DIGEST_LEN, MAX_HASH, SALT_LEN, codec, secure_random};
use crate::error::Result;

fn digest(salt: &[u8], password: &str) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());

    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Hashes `password` under a fresh random salt.
pub fn generate(password: &str) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    secure_random(&mut salt)?;
    Ok(record_with_salt(salt, password))
}

fn record_with_salt(salt: [u8; SALT_LEN], password: &str) -> Vec<u8> {
    let mut record = Vec::with_capacity(MAX_HASH);
    record.extend_from_slice(&salt);
    record.extend_from_slice(&digest(&salt, password));
    debug_assert!(record.len() <= MAX_HASH);
    record
}

/// Checks `password` against a stored record.
///
/// A record that is too short never matches.
pub fn verify(password: &str, record: &[u8]) -> bool {
    if record.len() < SALT_LEN + DIGEST_LEN {
        return false;
    }
    let (salt, stored) = record.split_at(SALT_LEN);
    let candidate = digest(salt, password);

    stored[..DIGEST_LEN]
        .iter()
        .zip(candidate.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Base64 form of [`generate`], for embedding in the document.
pub fn generate_text(password: &str) -> Result<String> {
    Ok(codec::encode(&generate(password)?))
}

/// Base64 form of [`verify`]. Undecodable text never matches.
pub fn verify_text(password: &str, text: &str) -> bool {
    match codec::decode(text) {
        Ok(record) => verify(password, &record),
        Err(_) => false,
    }
}
