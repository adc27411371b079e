//! Smartcard collecting adapter.
//!
//! Instead of returning ciphertext inline, every encrypted value is appended
//! to one contiguous buffer that is later written to the card. The document
//! keeps a positional reference of the form `SMARTCARD:<offset>:<length>`.

use std::fmt;
use std::str::FromStr;

use super::cipher::{CipherEngine, utf8};
use super::TextEncryptor;
use crate::error::{DataError, Result};

/// Tag that starts every reference string.
pub const REFERENCE_TAG: &str = "SMARTCARD";

/// Location of one ciphertext inside the collected buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardReference {
    pub offset: usize,
    pub length: usize,
}

impl CardReference {
    /// Returns the referenced bytes, or [`DataError::BufferTooSmall`] when
    /// the reference reaches past the end of `buffer`.
    pub fn slice<'b>(&self, buffer: &'b [u8]) -> std::result::Result<&'b [u8], DataError> {
        let too_small = || DataError::BufferTooSmall {
            offset: self.offset,
            length: self.length,
            available: buffer.len(),
        };
        let end = self.offset.checked_add(self.length).ok_or_else(too_small)?;
        buffer.get(self.offset..end).ok_or_else(too_small)
    }
}

impl fmt::Display for CardReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{REFERENCE_TAG}:{}:{}", self.offset, self.length)
    }
}

impl FromStr for CardReference {
    type Err = DataError;

    fn from_str(s: &str) -> std::result::Result<Self, DataError> {
        let malformed = || DataError::MalformedReference(s.to_string());
        let mut parts = s.split(':');

        let (Some(tag), Some(offset), Some(length), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };

        if tag != REFERENCE_TAG {
            return Err(malformed());
        }

        Ok(Self {
            offset: offset.parse().map_err(|_| malformed())?,
            length: length.parse().map_err(|_| malformed())?,
        })
    }
}

/// Wraps a [`CipherEngine`] and redirects ciphertext into a shared buffer.
pub struct CardCollector<'a> {
    engine: &'a CipherEngine,
    buffer: Vec<u8>,
}

impl<'a> CardCollector<'a> {
    pub fn new(engine: &'a CipherEngine) -> Self {
        Self {
            engine,
            buffer: Vec::new(),
        }
    }

    /// The ciphertext collected so far.
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Loads a buffer read back from the card before decrypting references.
    pub fn set_bytes(&mut self, bytes: Vec<u8>) {
        self.buffer = bytes;
    }
}

impl TextEncryptor for CardCollector<'_> {
    fn encrypt_text(&mut self, plaintext: &str) -> Result<String> {
        let ciphertext = self.engine.encrypt(plaintext.as_bytes())?;
        let reference = CardReference {
            offset: self.buffer.len(),
            length: ciphertext.len(),
        };
        self.buffer.extend_from_slice(&ciphertext);
        Ok(reference.to_string())
    }

    fn decrypt_text(&mut self, ciphertext: &str) -> Result<String> {
        let reference: CardReference = ciphertext.parse()?;
        let bytes = reference.slice(&self.buffer)?;
        utf8(self.engine.decrypt(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn reference_format_and_parse() {
        let reference = CardReference {
            offset: 16,
            length: 24,
        };
        assert_eq!(reference.to_string(), "SMARTCARD:16:24");
        assert_eq!("SMARTCARD:16:24".parse::<CardReference>().unwrap(), reference);
        assert_eq!(
            "SMARTCARD:007:8".parse::<CardReference>().unwrap(),
            CardReference {
                offset: 7,
                length: 8
            }
        );
    }

    #[test]
    fn malformed_references_are_rejected() {
        for bad in [
            "",
            "SMARTCARD",
            "SMARTCARD:1",
            "SMARTCARD:1:2:3",
            "CARD:1:2",
            "smartcard:1:2",
            "SMARTCARD:x:2",
            "SMARTCARD:1:-2",
        ] {
            assert!(
                matches!(
                    bad.parse::<CardReference>(),
                    Err(DataError::MalformedReference(_))
                ),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn collected_references_decrypt_back() {
        let engine = CipherEngine::new("BLOWFISH", "pw").unwrap();
        let plaintexts = ["alpha", "", "a somewhat longer secret value", "ü"];

        let mut collector = CardCollector::new(&engine);
        let references: Vec<String> = plaintexts
            .iter()
            .map(|p| collector.encrypt_text(p).unwrap())
            .collect();

        let expected_len: usize = plaintexts
            .iter()
            .map(|p| engine.encrypt(p.as_bytes()).unwrap().len())
            .sum();
        let buffer = collector.into_bytes();
        assert_eq!(buffer.len(), expected_len);

        let mut offset = 0;
        for reference in &references {
            let parsed: CardReference = reference.parse().unwrap();
            assert_eq!(parsed.offset, offset);
            offset += parsed.length;
        }

        let mut reader = CardCollector::new(&engine);
        reader.set_bytes(buffer);
        for (reference, plaintext) in references.iter().zip(plaintexts) {
            assert_eq!(reader.decrypt_text(reference).unwrap(), plaintext);
        }
    }

    #[test]
    fn reference_past_end_is_buffer_too_small() {
        let engine = CipherEngine::new("AES", "pw").unwrap();
        let mut collector = CardCollector::new(&engine);
        collector.set_bytes(vec![0u8; 16]);

        match collector.decrypt_text("SMARTCARD:8:16") {
            Err(Error::InvalidData(DataError::BufferTooSmall {
                offset,
                length,
                available,
            })) => {
                assert_eq!((offset, length, available), (8, 16, 16));
            }
            other => panic!("expected BufferTooSmall, got {other:?}"),
        }
    }

    #[test]
    fn overflowing_reference_is_buffer_too_small() {
        let reference = CardReference {
            offset: usize::MAX,
            length: 2,
        };
        assert!(matches!(
            reference.slice(&[1, 2, 3]),
            Err(DataError::BufferTooSmall { .. })
        ));
    }
}
