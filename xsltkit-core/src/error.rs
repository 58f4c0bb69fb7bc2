//! Error types shared by every operation
//!
//! Errors carry strings only: an execution error is produced on a worker
//! thread and delivered to a callback on the calling thread.

use thiserror::Error;

/// Input format of a failed parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Format {
    #[strum(serialize = "XML")]
    Xml,
    #[strum(serialize = "HTML")]
    Html,
}

/// Errors that can occur while mapping arguments or executing an operation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("{0}")]
    Argument(String),
    #[error("Failed to parse {format}: {detail}")]
    Parse { format: Format, detail: String },
    #[error("Failed to parse XSLT stylesheet: {0}")]
    Compile(String),
    #[error("Failed to apply stylesheet: {0}")]
    Transform(String),
    #[error("Failed to allocate memory")]
    Allocation,
    #[error("{operation} panicked: {message}")]
    Panicked { operation: &'static str, message: String },
}

/// Coarse classification of [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum ErrorKind {
    Argument,
    Parse,
    Compile,
    Transform,
    Allocation,
    Internal,
}

impl Error {
    pub fn argument(message: impl Into<String>) -> Self {
        Error::Argument(message.into())
    }

    pub fn parse(format: Format, detail: impl ToString) -> Self {
        Error::Parse { format, detail: detail.to_string() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Argument(_) => ErrorKind::Argument,
            Error::Parse { .. } => ErrorKind::Parse,
            Error::Compile(_) => ErrorKind::Compile,
            Error::Transform(_) => ErrorKind::Transform,
            Error::Allocation => ErrorKind::Allocation,
            Error::Panicked { .. } => ErrorKind::Internal,
        }
    }
}

/// A completion callback failed on the calling thread
///
/// These are never retried. They go to the runtime's fatal handler, or are
/// returned from the event loop when no handler is installed.
#[derive(Error, Debug)]
pub enum FatalError {
    #[error("uncaught error in {operation} callback: {error}")]
    Callback {
        operation: &'static str,
        error: anyhow::Error,
    },
    #[error("{operation} callback panicked: {message}")]
    CallbackPanicked { operation: &'static str, message: String },
}

impl FatalError {
    pub fn operation(&self) -> &'static str {
        match self {
            FatalError::Callback { operation, .. } => operation,
            FatalError::CallbackPanicked { operation, .. } => operation,
        }
    }
}

/// Render a caught panic payload as text
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_match_operation_failures() {
        assert_eq!(
            Error::parse(Format::Xml, "unexpected end").to_string(),
            "Failed to parse XML: unexpected end"
        );
        assert_eq!(
            Error::parse(Format::Html, "empty input").to_string(),
            "Failed to parse HTML: empty input"
        );
        assert!(Error::Compile("no templates".into())
            .to_string()
            .starts_with("Failed to parse XSLT"));
        assert_eq!(Error::Allocation.to_string(), "Failed to allocate memory");
    }

    #[test]
    fn test_kind() {
        assert_eq!(Error::argument("x").kind(), ErrorKind::Argument);
        assert_eq!(Error::Transform("x".into()).kind(), ErrorKind::Transform);
    }
}
