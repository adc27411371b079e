//! Fixed on-card memory layout.
//!
//! ```text
//! 0               card id (1)
//! 1               hash length L (1)
//! 2 .. 2+L        password hash record (up to MAX_HASH)
//! MAX_HASH+2      payload length, big endian (2) | fill (1)
//! MAX_HASH+5 ..   ciphertext payload
//! ```

use super::{CardError, Smartcard};
use crate::crypto::MAX_HASH;

pub const ID_OFFSET: usize = 0;
pub const HASH_LEN_OFFSET: usize = 1;
pub const HASH_OFFSET: usize = 2;
pub const PAYLOAD_LEN_OFFSET: usize = MAX_HASH + 2;
pub const PAYLOAD_OFFSET: usize = MAX_HASH + 5;
/// Largest payload the two byte length field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

const FILL: u8 = 0x00;

/// Everything the store keeps on the card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardImage {
    pub card_id: u8,
    pub hash: Vec<u8>,
    pub payload: Vec<u8>,
}

impl CardImage {
    /// Bytes of card memory the image occupies.
    pub fn size(&self) -> usize {
        PAYLOAD_OFFSET + self.payload.len()
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![FILL; self.size()];
        bytes[ID_OFFSET] = self.card_id;
        bytes[HASH_LEN_OFFSET] = self.hash.len() as u8;
        bytes[HASH_OFFSET..HASH_OFFSET + self.hash.len()].copy_from_slice(&self.hash);
        bytes[PAYLOAD_LEN_OFFSET..PAYLOAD_LEN_OFFSET + 2]
            .copy_from_slice(&(self.payload.len() as u16).to_be_bytes());
        bytes[PAYLOAD_OFFSET..].copy_from_slice(&self.payload);
        bytes
    }

    /// Writes the image to a selected card.
    ///
    /// `capacity` is the card size reported by the answer-to-reset, if any.
    pub fn write_to(&self, card: &mut Smartcard, capacity: Option<usize>) -> Result<(), CardError> {
        if self.hash.len() > MAX_HASH {
            return Err(CardError::Layout(format!(
                "hash record of {} bytes exceeds {MAX_HASH}",
                self.hash.len()
            )));
        }
        if self.payload.len() > MAX_PAYLOAD {
            return Err(CardError::CapacityExceeded {
                needed: self.size(),
                capacity: PAYLOAD_OFFSET + MAX_PAYLOAD,
            });
        }
        if let Some(capacity) = capacity {
            if self.size() > capacity {
                return Err(CardError::CapacityExceeded {
                    needed: self.size(),
                    capacity,
                });
            }
        }

        card.write(ID_OFFSET, &self.to_bytes())
    }

    /// Reads the image back from a selected card.
    pub fn read_from(card: &mut Smartcard) -> Result<Self, CardError> {
        let header = card.read(ID_OFFSET, 2)?;
        let card_id = header[0];
        let hash_len = usize::from(header[1]);
        if hash_len > MAX_HASH {
            return Err(CardError::Layout(format!(
                "hash length {hash_len} exceeds {MAX_HASH}"
            )));
        }

        let hash = card.read(HASH_OFFSET, hash_len)?;
        let length = card.read(PAYLOAD_LEN_OFFSET, 3)?;
        let payload_len = usize::from(u16::from_be_bytes([length[0], length[1]]));
        let payload = card.read(PAYLOAD_OFFSET, payload_len)?;

        Ok(Self {
            card_id,
            hash,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash;
    use crate::smartcard::MemoryCardTerminal;

    fn selected_card(terminal: &MemoryCardTerminal) -> Smartcard {
        let mut card = Smartcard::open(Box::new(terminal.clone()), 1).unwrap();
        assert!(card.select_file().unwrap());
        card
    }

    #[test]
    fn fields_land_at_documented_offsets() {
        let terminal = MemoryCardTerminal::new(1024);
        let mut card = selected_card(&terminal);

        let record = hash::generate("pw").unwrap();
        let payload: Vec<u8> = (0..100u8).collect();
        let image = CardImage {
            card_id: 0xAB,
            hash: record.clone(),
            payload: payload.clone(),
        };
        image.write_to(&mut card, Some(1024)).unwrap();

        assert_eq!(card.read(ID_OFFSET, 1).unwrap(), [0xAB]);
        assert_eq!(card.read(HASH_LEN_OFFSET, 1).unwrap(), [record.len() as u8]);
        assert_eq!(card.read(HASH_OFFSET, record.len()).unwrap(), record);
        assert_eq!(card.read(PAYLOAD_LEN_OFFSET, 2).unwrap(), [0, 100]);
        assert_eq!(card.read(PAYLOAD_OFFSET, 100).unwrap(), payload);

        assert!(matches!(
            card.read(PAYLOAD_OFFSET, 101),
            Err(CardError::EndOfData { .. })
        ));

        assert_eq!(CardImage::read_from(&mut card).unwrap(), image);
    }

    #[test]
    fn short_hash_and_empty_payload() {
        let terminal = MemoryCardTerminal::new(256);
        let mut card = selected_card(&terminal);

        let image = CardImage {
            card_id: 7,
            hash: vec![1, 2, 3],
            payload: Vec::new(),
        };
        image.write_to(&mut card, None).unwrap();
        assert_eq!(terminal.memory().len(), PAYLOAD_OFFSET);
        assert_eq!(CardImage::read_from(&mut card).unwrap(), image);
    }

    #[test]
    fn payload_larger_than_card_is_rejected_before_writing() {
        let terminal = MemoryCardTerminal::new(128);
        let mut card = selected_card(&terminal);

        let image = CardImage {
            card_id: 1,
            hash: vec![0; MAX_HASH],
            payload: vec![0; 100],
        };
        assert!(matches!(
            image.write_to(&mut card, Some(128)),
            Err(CardError::CapacityExceeded {
                needed: 145,
                capacity: 128
            })
        ));
        assert!(terminal.memory().is_empty());
    }

    #[test]
    fn oversized_hash_length_on_card_is_a_layout_error() {
        let terminal = MemoryCardTerminal::new(256);
        terminal.poke(0, &[1, (MAX_HASH + 1) as u8]);
        let mut card = selected_card(&terminal);

        assert!(matches!(
            CardImage::read_from(&mut card),
            Err(CardError::Layout(_))
        ));
    }

    #[test]
    fn oversized_hash_record_is_refused() {
        let terminal = MemoryCardTerminal::new(256);
        let mut card = selected_card(&terminal);
        let image = CardImage {
            card_id: 1,
            hash: vec![0; MAX_HASH + 1],
            payload: Vec::new(),
        };
        assert!(matches!(
            image.write_to(&mut card, None),
            Err(CardError::Layout(_))
        ));
    }
}
