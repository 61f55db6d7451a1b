//! Error types for the jitportal crate
//!
//! Only recoverable conditions live here: bad configuration, unreadable
//! config files, malformed field declarations and heap lookups that name
//! something that does not exist. Contract violations by the tracer
//! (malformed specialization keys, bridges onto unknown loops, illegal
//! lifecycle transitions) are programming errors and panic instead.

use std::fmt;
use thiserror::Error;

/// Main error type for jitportal
#[derive(Error, Debug)]
pub enum Error {
    /// A JIT parameter had an unknown name or an unusable value
    #[error("InvalidJitParam: {name}: {message}")]
    InvalidParam { name: String, message: String },

    /// Configuration failed validation
    #[error("ConfigError: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IOError: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    /// JSON (de)serialization error
    #[error("JsonError: {source}")]
    JsonError {
        #[from]
        source: serde_json::Error,
    },

    /// An immutable-field declaration could not be parsed
    #[error("FieldSpecError: {spec:?}: {message}")]
    FieldSpecError { spec: String, message: String },

    /// A field that the object's class does not declare
    #[error("UnknownField: {class}.{field}")]
    UnknownField { class: String, field: String },

    /// An object id that was never allocated
    #[error("UnknownObject: {0}")]
    UnknownObject(u64),
}

impl Error {
    /// Create an invalid-parameter error
    pub fn invalid_param(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidParam {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a field declaration error
    pub fn field_spec(spec: impl Into<String>, message: impl Into<String>) -> Self {
        Error::FieldSpecError {
            spec: spec.into(),
            message: message.into(),
        }
    }

    /// Create an unknown-field error
    pub fn unknown_field(class: impl fmt::Display, field: impl fmt::Display) -> Self {
        Error::UnknownField {
            class: class.to_string(),
            field: field.to_string(),
        }
    }

    /// The broad category of this error, used by the CLI for exit codes
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidParam { .. } | Error::ConfigError(_) => ErrorKind::Config,
            Error::IoError { .. } | Error::JsonError { .. } => ErrorKind::Io,
            Error::FieldSpecError { .. }
            | Error::UnknownField { .. }
            | Error::UnknownObject(_) => ErrorKind::Heap,
        }
    }
}

/// Error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Configuration and parameter errors
    Config,
    /// File and serialization errors
    Io,
    /// Object model errors raised by the harness heap
    Heap,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Config => write!(f, "ConfigError"),
            ErrorKind::Io => write!(f, "IOError"),
            ErrorKind::Heap => write!(f, "HeapError"),
        }
    }
}

/// Result type alias for jitportal operations
pub type Result<T> = std::result::Result<T, Error>;
