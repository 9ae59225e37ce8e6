//! Error types for the Comanda engine.

use thiserror::Error;

/// Errors raised by local checks, before anything reaches the network.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// A request payload failed a local precondition.
    #[error("{message} ({field}: {code})")]
    Validation {
        field: &'static str,
        code: &'static str,
        message: String,
    },

    /// A domain rule forbids the operation in the order's current state.
    #[error("{message} [{rule}]")]
    BusinessRule { rule: &'static str, message: String },
}

impl Error {
    pub(crate) fn validation(
        field: &'static str,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Error::Validation {
            field,
            code,
            message: message.into(),
        }
    }

    pub(crate) fn business(rule: &'static str, message: impl Into<String>) -> Self {
        Error::BusinessRule {
            rule,
            message: message.into(),
        }
    }

    /// The rule identifier for business rule errors.
    pub fn rule(&self) -> Option<&'static str> {
        match self {
            Error::BusinessRule { rule, .. } => Some(rule),
            Error::Validation { .. } => None,
        }
    }

    /// Human readable message without the diagnostic suffix.
    pub fn message(&self) -> &str {
        match self {
            Error::Validation { message, .. } | Error::BusinessRule { message, .. } => message,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
