//! Error types for the cfbest pipeline
//!
//! Only [`Error::Fetch`] and [`Error::NoData`] abort a run. Every other
//! variant is recovered at the granularity it was raised at (row, pair or
//! action) and surfaces in the run report instead.

use std::fmt;

use thiserror::Error;

use crate::measurement::{AddressFamily, CarrierKey};

/// Result type alias for cfbest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the cfbest pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// The feed collaborator could not deliver rows
    #[error("Feed fetch failed: {0}")]
    Fetch(String),

    /// The feed answered but no usable rows were found
    #[error("No measurement data: {0}")]
    NoData(String),

    /// A single raw row could not be normalized
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// No destination record is configured for a (carrier, family) pair
    #[error("No record configured for {carrier}/{family}")]
    ConfigMissing {
        carrier: CarrierKey,
        family: AddressFamily,
    },

    /// The DNS writer rejected or failed a single upsert
    #[error("Remote error ({writer}): {message}")]
    Remote {
        /// Writer name
        writer: String,
        /// Error message
        message: String,
    },

    /// Applied-state cache errors
    #[error("State store error: {0}")]
    StateStore(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Report sink errors
    #[error("Report error: {0}")]
    Report(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a fetch error
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    /// Create a "no data" error
    pub fn no_data(msg: impl Into<String>) -> Self {
        Self::NoData(msg.into())
    }

    /// Create a remote (per-action) error
    pub fn remote(writer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            writer: writer.into(),
            message: message.into(),
        }
    }

    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a report error
    pub fn report(msg: impl Into<String>) -> Self {
        Self::Report(msg.into())
    }

    /// Whether this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fetch(_) | Self::NoData(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

/// Why a raw row was rejected by the normalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    /// A required column is absent or empty
    MissingField,
    /// A required numeric column could not be read
    MalformedNumber,
    /// The address is neither an IPv4 nor an IPv6 literal
    InvalidAddress,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MissingField => "missing field",
            Self::MalformedNumber => "malformed number",
            Self::InvalidAddress => "invalid address",
        };
        f.write_str(s)
    }
}

/// A per-row normalization failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} in column '{field}'{}", value_suffix(.value))]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub field: &'static str,
    pub value: Option<String>,
}

fn value_suffix(value: &Option<String>) -> String {
    match value {
        Some(value) => format!(" (value: \"{}\")", value),
        None => String::new(),
    }
}

impl ParseError {
    pub fn missing(field: &'static str) -> Self {
        Self {
            kind: ParseErrorKind::MissingField,
            field,
            value: None,
        }
    }

    pub fn malformed(field: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind: ParseErrorKind::MalformedNumber,
            field,
            value: Some(value.into()),
        }
    }

    pub fn invalid_address(value: impl Into<String>) -> Self {
        Self {
            kind: ParseErrorKind::InvalidAddress,
            field: "address",
            value: Some(value.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_fetch_and_no_data_are_fatal() {
        assert!(Error::fetch("timeout").is_fatal());
        assert!(Error::no_data("empty table").is_fatal());
        assert!(!Error::remote("huawei", "503").is_fatal());
        assert!(!Error::from(ParseError::missing("address")).is_fatal());
        assert!(
            !Error::ConfigMissing {
                carrier: CarrierKey::Mobile,
                family: AddressFamily::V6,
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::malformed("loss", "n/a");
        assert_eq!(
            err.to_string(),
            "malformed number in column 'loss' (value: \"n/a\")"
        );
    }
}
