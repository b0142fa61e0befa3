use std::fmt::{self, Display};

/// Errors produced by model constructors and validation routines.
#[derive(Debug)]
pub enum ModelError {
    InvalidLabel(String),
    InvalidSilence(String),
    InvalidFingerprint(String),
    InvalidTimestamp(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidLabel(msg) => write!(f, "invalid label: {msg}"),
            ModelError::InvalidSilence(msg) => {
                write!(f, "invalid silence: {msg}")
            }
            ModelError::InvalidFingerprint(msg) => {
                write!(f, "invalid fingerprint: {msg}")
            }
            ModelError::InvalidTimestamp(msg) => {
                write!(f, "invalid timestamp: {msg}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
