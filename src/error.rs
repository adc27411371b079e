//! Error taxonomy shared by every layer of the store.

use std::fmt;

use thiserror::Error;

use crate::smartcard::CardError;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced to callers of the store.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid password")]
    WrongPassword,

    #[error("invalid data: {0}")]
    InvalidData(#[from] DataError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("smartcard error: {0}")]
    Smartcard(#[from] CardError),

    #[error("cipher algorithm '{0}' is not available")]
    NoAlgorithm(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("operation aborted by user")]
    Abort,
}

/// Decode-time faults. Callers always see them as [`Error::InvalidData`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DataError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("malformed smartcard reference '{0}'")]
    MalformedReference(String),

    #[error("reference {offset}+{length} exceeds buffer of {available} bytes")]
    BufferTooSmall {
        offset: usize,
        length: usize,
        available: usize,
    },

    #[error("bad padding or wrong key")]
    Padding,

    #[error("xml: {0}")]
    Xml(String),

    #[error("{0}")]
    Structure(String),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    WrongPassword,
    InvalidData,
    Io,
    Smartcard,
    NoAlgorithm,
    Configuration,
    Abort,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::WrongPassword => "wrong password",
            ErrorKind::InvalidData => "invalid data",
            ErrorKind::Io => "i/o",
            ErrorKind::Smartcard => "smartcard",
            ErrorKind::NoAlgorithm => "no algorithm",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Abort => "abort",
        };
        f.write_str(name)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::WrongPassword => ErrorKind::WrongPassword,
            Error::InvalidData(_) => ErrorKind::InvalidData,
            Error::Io(_) => ErrorKind::Io,
            Error::Smartcard(_) => ErrorKind::Smartcard,
            Error::NoAlgorithm(_) => ErrorKind::NoAlgorithm,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Abort => ErrorKind::Abort,
        }
    }

    /// Whether an interactive caller should re-prompt and try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::WrongPassword => true,
            Error::Smartcard(e) => e.is_retryable(),
            _ => false,
        }
    }
}
