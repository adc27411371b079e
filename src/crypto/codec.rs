//! Base64 text encoding (RFC 2045 alphabet, `=` padding).

use base64::{Engine, engine::general_purpose::STANDARD};

use crate::error::DataError;

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes padded Base64. Rejects input whose length is not a multiple of
/// four or that contains characters outside the alphabet.
pub fn decode(text: &str) -> Result<Vec<u8>, DataError> {
    if text.len() % 4 != 0 {
        return Err(DataError::MalformedInput(format!(
            "base64 length {} is not a multiple of 4",
            text.len()
        )));
    }

    STANDARD
        .decode(text)
        .map_err(|e| DataError::MalformedInput(format!("base64: {e}")))
}
