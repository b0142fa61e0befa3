use std::fmt::{self, Display};

/// Errors raised while validating or normalizing boundary payloads.
#[derive(Debug)]
pub enum ContractError {
    /// Structurally valid JSON carrying semantically bad content.
    Payload(String),
    /// Payload dialect/version this core does not speak.
    UnsupportedVersion(String),
    /// Rendered notification exceeds a sink ceiling.
    Oversize { target_type: String, limit: usize, actual: usize },
}

impl Display for ContractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractError::Payload(msg) => write!(f, "invalid payload: {msg}"),
            ContractError::UnsupportedVersion(version) => {
                write!(f, "unsupported payload version {version:?}")
            }
            ContractError::Oversize {
                target_type,
                limit,
                actual,
            } => write!(
                f,
                "rendered notification for {target_type} is {actual} bytes, ceiling is {limit}"
            ),
        }
    }
}

impl std::error::Error for ContractError {}

pub type Result<T> = std::result::Result<T, ContractError>;
