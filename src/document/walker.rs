//! Encrypts or decrypts the secret values of a document tree in place.

use super::Node;
use crate::crypto::TextEncryptor;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Visits the forest depth first in document order and transforms every
/// secret property that has a value. Everything else is left untouched.
pub fn walk<E>(nodes: &mut [Node], encryptor: &mut E, direction: Direction) -> Result<()>
where
    E: TextEncryptor + ?Sized,
{
    for node in nodes {
        match node {
            Node::Group(group) => walk(&mut group.children, &mut *encryptor, direction)?,
            Node::Property(property) if property.is_secret() => {
                if let Some(value) = property.value_mut() {
                    *value = match direction {
                        Direction::Encrypt => encryptor.encrypt_text(value.as_str())?,
                        Direction::Decrypt => encryptor.decrypt_text(value.as_str())?,
                    };
                }
            }
            Node::Property(_) => {}
        }
    }
    Ok(())
}
