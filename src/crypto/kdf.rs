//! Passphrase to key/IV derivation.
//!
//! A single-round bytes-to-key construction over SHA-256:
//!
//! ```text
//! D_1 = SHA256(passphrase)
//! D_i = SHA256(D_{i-1} || passphrase)
//! key || iv = D_1 || D_2 || ...
//! ```
//!
//! No salt and one iteration. This is weak against offline guessing, but
//! every stored document depends on it, so the hash and the round count are
//! fixed for all ciphers.

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Number of hash rounds per output block.
pub const ROUNDS: usize = 1;

/// Key and IV material derived from a passphrase.
pub struct KeyMaterial {
    pub key: Zeroizing<Vec<u8>>,
    pub iv: Zeroizing<Vec<u8>>,
}

pub fn derive_key(passphrase: &str, key_len: usize, iv_len: usize) -> KeyMaterial {
    let needed = key_len + iv_len;
    let mut out = Zeroizing::new(Vec::with_capacity(needed + Sha256::output_size()));
    let mut prev: Option<Zeroizing<Vec<u8>>> = None;

    while out.len() < needed {
        let mut block = Zeroizing::new(Vec::new());
        for round in 0..ROUNDS {
            let mut hasher = Sha256::new();
            if round == 0 {
                if let Some(prev) = &prev {
                    hasher.update(prev.as_slice());
                }
                hasher.update(passphrase.as_bytes());
            } else {
                hasher.update(block.as_slice());
            }
            *block = hasher.finalize().to_vec();
        }
        out.extend_from_slice(&block);
        prev = Some(block);
    }

    KeyMaterial {
        key: Zeroizing::new(out[..key_len].to_vec()),
        iv: Zeroizing::new(out[key_len..needed].to_vec()),
    }
}
