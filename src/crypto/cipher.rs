//! Password-keyed block cipher engine.
//!
//! Every algorithm runs in CBC mode with PKCS#7 padding. Key and IV come
//! from [`kdf::derive_key`](super::kdf::derive_key). Data is streamed
//! through the cipher in [`CHUNK_SIZE`] windows.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use cbc::cipher::{
    BlockCipher, BlockDecryptMut, BlockEncryptMut, BlockSizeUser, KeyInit, KeyIvInit,
    block_padding::Pkcs7, generic_array::GenericArray, typenum::Unsigned,
};
use zeroize::Zeroizing;

use super::{CHUNK_SIZE, TextEncryptor, codec, kdf};
use crate::error::{DataError, Error, Result};

/// Block ciphers the engine knows how to drive.
///
/// The declaration order is the preference order used to suggest a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Algorithm {
    Blowfish,
    Aes,
    Cast5,
    Idea,
    TripleDes,
}

impl Algorithm {
    pub const PREFERENCE: [Algorithm; 5] = [
        Algorithm::Blowfish,
        Algorithm::Aes,
        Algorithm::Cast5,
        Algorithm::Idea,
        Algorithm::TripleDes,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Blowfish => "BLOWFISH",
            Algorithm::Aes => "AES",
            Algorithm::Cast5 => "CAST5",
            Algorithm::Idea => "IDEA",
            Algorithm::TripleDes => "3DES",
        }
    }

    pub fn key_len(self) -> usize {
        match self {
            Algorithm::Blowfish => 16,
            Algorithm::Aes => 32,
            Algorithm::Cast5 => 16,
            Algorithm::Idea => 16,
            Algorithm::TripleDes => 24,
        }
    }

    pub fn block_len(self) -> usize {
        match self {
            Algorithm::Aes => 16,
            _ => 8,
        }
    }

    fn is_linked(self) -> bool {
        match self {
            Algorithm::Blowfish => cfg!(feature = "blowfish"),
            Algorithm::Aes => cfg!(feature = "aes"),
            Algorithm::Cast5 => cfg!(feature = "cast5"),
            Algorithm::Idea => cfg!(feature = "idea"),
            Algorithm::TripleDes => cfg!(feature = "des"),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Algorithm::PREFERENCE
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::NoAlgorithm(s.to_string()))
    }
}

/// Algorithms linked into this build.
pub fn available_algorithms() -> &'static BTreeSet<Algorithm> {
    static AVAILABLE: OnceLock<BTreeSet<Algorithm>> = OnceLock::new();
    AVAILABLE.get_or_init(|| {
        Algorithm::PREFERENCE
            .into_iter()
            .filter(|a| a.is_linked())
            .collect()
    })
}

/// The most preferred available algorithm, if any is linked.
pub fn default_algorithm() -> Option<Algorithm> {
    Algorithm::PREFERENCE
        .into_iter()
        .find(|a| available_algorithms().contains(a))
}

/// Symmetric encryption under a passphrase-derived key.
pub struct CipherEngine {
    algorithm: Algorithm,
    key: Zeroizing<Vec<u8>>,
    iv: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for CipherEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherEngine")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl CipherEngine {
    /// Builds an engine for the named algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoAlgorithm`] if the name is unknown or the cipher is
    /// not linked into this build.
    pub fn new(algorithm: &str, passphrase: &str) -> Result<Self> {
        let algorithm: Algorithm = algorithm.parse()?;
        Self::with_algorithm(algorithm, passphrase)
    }

    pub fn with_algorithm(algorithm: Algorithm, passphrase: &str) -> Result<Self> {
        if !available_algorithms().contains(&algorithm) {
            return Err(Error::NoAlgorithm(algorithm.name().to_string()));
        }

        let material = kdf::derive_key(passphrase, algorithm.key_len(), algorithm.block_len());
        Ok(Self {
            algorithm,
            key: material.key,
            iv: material.iv,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Re-derives key and IV, overwriting the previous material in place.
    pub fn set_password(&mut self, passphrase: &str) {
        let material = kdf::derive_key(
            passphrase,
            self.algorithm.key_len(),
            self.algorithm.block_len(),
        );
        self.key.copy_from_slice(&material.key);
        self.iv.copy_from_slice(&material.iv);
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let (key, iv) = (self.key.as_slice(), self.iv.as_slice());
        match self.algorithm {
            #[cfg(feature = "blowfish")]
            Algorithm::Blowfish => cbc_encrypt::<blowfish::Blowfish>(key, iv, plaintext),
            #[cfg(feature = "aes")]
            Algorithm::Aes => cbc_encrypt::<aes::Aes256>(key, iv, plaintext),
            #[cfg(feature = "cast5")]
            Algorithm::Cast5 => cbc_encrypt::<cast5::Cast5>(key, iv, plaintext),
            #[cfg(feature = "idea")]
            Algorithm::Idea => cbc_encrypt::<idea::Idea>(key, iv, plaintext),
            #[cfg(feature = "des")]
            Algorithm::TripleDes => cbc_encrypt::<des::TdesEde3>(key, iv, plaintext),
            #[allow(unreachable_patterns)]
            other => Err(Error::NoAlgorithm(other.name().to_string())),
        }
    }

    /// Decrypts data produced by [`encrypt`](Self::encrypt).
    ///
    /// Ciphertext from another key or algorithm yields
    /// [`DataError::Padding`] or garbage bytes, never a panic.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let (key, iv) = (self.key.as_slice(), self.iv.as_slice());
        match self.algorithm {
            #[cfg(feature = "blowfish")]
            Algorithm::Blowfish => cbc_decrypt::<blowfish::Blowfish>(key, iv, ciphertext),
            #[cfg(feature = "aes")]
            Algorithm::Aes => cbc_decrypt::<aes::Aes256>(key, iv, ciphertext),
            #[cfg(feature = "cast5")]
            Algorithm::Cast5 => cbc_decrypt::<cast5::Cast5>(key, iv, ciphertext),
            #[cfg(feature = "idea")]
            Algorithm::Idea => cbc_decrypt::<idea::Idea>(key, iv, ciphertext),
            #[cfg(feature = "des")]
            Algorithm::TripleDes => cbc_decrypt::<des::TdesEde3>(key, iv, ciphertext),
            #[allow(unreachable_patterns)]
            other => Err(Error::NoAlgorithm(other.name().to_string())),
        }
    }
}

impl TextEncryptor for CipherEngine {
    fn encrypt_text(&mut self, plaintext: &str) -> Result<String> {
        let ciphertext = self.encrypt(plaintext.as_bytes())?;
        Ok(codec::encode(&ciphertext))
    }

    fn decrypt_text(&mut self, ciphertext: &str) -> Result<String> {
        let bytes = codec::decode(ciphertext)?;
        utf8(self.decrypt(&bytes)?)
    }
}

pub(crate) fn utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|_| DataError::MalformedInput("decrypted text is not utf-8".into()).into())
}

fn key_error(_: cbc::cipher::InvalidLength) -> Error {
    Error::InvalidData(DataError::Structure("invalid key or iv length".into()))
}

fn cbc_encrypt<C>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>
where
    C: BlockCipher + BlockEncryptMut + KeyInit,
{
    let mut encryptor = cbc::Encryptor::<C>::new_from_slices(key, iv).map_err(key_error)?;
    let block = <C as BlockSizeUser>::BlockSize::USIZE;
    let whole = plaintext.len() / block * block;
    let mut out = Vec::with_capacity(whole + block);

    for window in plaintext[..whole].chunks(CHUNK_SIZE) {
        let start = out.len();
        out.extend_from_slice(window);
        for chunk in out[start..].chunks_exact_mut(block) {
            encryptor.encrypt_block_mut(GenericArray::from_mut_slice(chunk));
        }
    }

    out.extend(encryptor.encrypt_padded_vec_mut::<Pkcs7>(&plaintext[whole..]));
    Ok(out)
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>
where
    C: BlockCipher + BlockDecryptMut + KeyInit,
{
    let mut decryptor = cbc::Decryptor::<C>::new_from_slices(key, iv).map_err(key_error)?;
    let block = <C as BlockSizeUser>::BlockSize::USIZE;
    if ciphertext.is_empty() || ciphertext.len() % block != 0 {
        return Err(DataError::MalformedInput(format!(
            "ciphertext length {} is not a positive multiple of {block}",
            ciphertext.len()
        ))
        .into());
    }

    let last = ciphertext.len() - block;
    let mut out = Vec::with_capacity(ciphertext.len());

    for window in ciphertext[..last].chunks(CHUNK_SIZE) {
        let start = out.len();
        out.extend_from_slice(window);
        for chunk in out[start..].chunks_exact_mut(block) {
            decryptor.decrypt_block_mut(GenericArray::from_mut_slice(chunk));
        }
    }

    let tail = decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext[last..])
        .map_err(|_| DataError::Padding)?;
    out.extend(tail);
    Ok(out)
}
