//! Cryptographic primitives for the store.
//!
//! Provides the Base64 codec, the password-keyed block cipher engine, the
//! smartcard collecting adapter and the salted password hash.

pub mod cipher;
pub mod codec;
pub mod collector;
pub mod hash;
pub mod kdf;

pub use cipher::{Algorithm, CipherEngine, available_algorithms, default_algorithm};
pub use collector::{CardCollector, CardReference};

use crate::error::{Error, Result};
use getrandom::fill;

/// Length of the salt in a password hash record (8 bytes).
pub const SALT_LEN: usize = 8;
/// Length of the SHA-256 digest in a password hash record (32 bytes).
pub const DIGEST_LEN: usize = 32;
/// Upper bound of a password hash record. The smartcard layout reserves
/// exactly this many bytes.
pub const MAX_HASH: usize = 40;
/// Window size used when streaming data through a cipher (512 bytes).
pub const CHUNK_SIZE: usize = 512;

const _: () = assert!(SALT_LEN + DIGEST_LEN <= MAX_HASH);

/// Text-level encryption used by the document walker.
///
/// Implemented by [`CipherEngine`] (Base64 ciphertext) and by
/// [`CardCollector`] (positional references into a card buffer).
pub trait TextEncryptor {
    fn encrypt_text(&mut self, plaintext: &str) -> Result<String>;
    fn decrypt_text(&mut self, ciphertext: &str) -> Result<String>;
}

/// Fill buffer with cryptographically secure random bytes
pub(crate) fn secure_random(buf: &mut [u8]) -> Result<()> {
    fill(buf).map_err(|e| {
        Error::Io(std::io::Error::other(format!(
            "OS random generator unavailable: {e}"
        )))
    })
}

/// Draw a single random byte, used as the card identifier.
pub fn random_card_id() -> Result<u8> {
    let mut id = [0u8; 1];
    secure_random(&mut id)?;
    Ok(id[0])
}
