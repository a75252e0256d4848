//! Shared error classification for consistent handling across crates.

use std::fmt::Debug;
use thiserror::Error;

/// Category of error for consistent handling and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// User input or configuration error - can be fixed by the user
    User,
    /// System resource or environmental error - may be temporary
    System,
    /// Internal logic error - indicates a bug
    Internal,
    /// Network or external service error - may be retriable
    External,
}

/// Trait for all errors in the completer workspace.
///
/// Gives every error a category, a stable code, and a user-facing message
/// so notification surfaces do not have to match on concrete enums.
pub trait CompleterError: std::error::Error + Send + Sync + Debug {
    fn category(&self) -> ErrorCategory;

    fn error_code(&self) -> &'static str;

    fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }

    fn is_retriable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::System | ErrorCategory::External
        )
    }

    fn user_friendly_message(&self) -> String {
        format!("{}", self)
    }
}

/// Errors raised while decoding the message protocol.
///
/// Unknown discriminants are a distinct error kind rather than being
/// silently ignored.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown client action: {0}")]
    UnknownAction(String),

    #[error("Unknown worker status: {0}")]
    UnknownStatus(String),

    #[error("Malformed message: {0}")]
    Malformed(String),
}

impl CompleterError for ProtocolError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Internal
    }

    fn error_code(&self) -> &'static str {
        match self {
            ProtocolError::UnknownAction(_) => "PROTOCOL_UNKNOWN_ACTION",
            ProtocolError::UnknownStatus(_) => "PROTOCOL_UNKNOWN_STATUS",
            ProtocolError::Malformed(_) => "PROTOCOL_MALFORMED",
        }
    }
}
