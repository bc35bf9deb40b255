//! Error handling for the teleoperation recorder
//!
//! This module defines the crate error type and a Result alias for use
//! throughout the library.

use thiserror::Error;

/// Main error type for recording and replay operations
#[derive(Error, Debug)]
pub enum TeleopError {
    /// Invalid configuration (ranges, fps, camera shapes)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation not allowed in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Image buffer does not match its declared shape
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Errors related to the episode store
    #[error("Episode store error: {0}")]
    Store(String),

    /// Corrupt, missing or unsupported replay file
    #[error("Replay error: {0}")]
    Replay(String),

    /// Replay was halted by an emergency stop
    #[error("Replay halted by emergency stop")]
    Halted,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<TeleopError>,
    },
}

impl TeleopError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        TeleopError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip context wrappers and return the underlying error
    pub fn root(&self) -> &TeleopError {
        match self {
            TeleopError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for TeleopError {
    fn from(err: serde_json::Error) -> Self {
        TeleopError::Serialization(err.to_string())
    }
}

/// Result type alias for recorder operations
pub type Result<T> = std::result::Result<T, TeleopError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| TeleopError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| TeleopError::Io(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TeleopError::Config("fps must be positive".to_string());
        assert_eq!(err.to_string(), "Configuration error: fps must be positive");
    }

    #[test]
    fn test_error_with_context() {
        let err = TeleopError::Store("disk full".to_string());
        let with_ctx = err.with_context("Failed to save episode");
        assert!(with_ctx.to_string().contains("Failed to save episode"));
        assert!(matches!(with_ctx.root(), TeleopError::Store(_)));
    }

    #[test]
    fn test_io_context() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        let err = res.context("Reading log").unwrap_err();
        assert!(err.to_string().starts_with("Reading log"));
        assert!(matches!(err.root(), TeleopError::Io(_)));
    }
}
