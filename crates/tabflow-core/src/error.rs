//! Common error type definitions.

use std::path::Path;

use strum::{AsRefStr, Display, IntoStaticStr};
use thiserror::Error;

/// Type alias for boxed dynamic errors that can be sent across threads.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Type alias for Results with our custom Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of errors that can occur in tabflow operations.
///
/// The categories decide how a failure propagates: schema and sequencing
/// errors are raised before any data is read, I/O errors abort the current
/// pass, and resource errors are only raised while initializing the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(AsRefStr, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// A referenced column is absent or has the wrong type.
    Schema,
    /// An operation was requested out of order (e.g. transform before fit).
    Sequencing,
    /// A partition file could not be read, parsed or written.
    Io,
    /// Device memory could not be reserved as configured.
    Resource,
    /// Configuration is invalid.
    Configuration,
    /// Serialization/deserialization error.
    Serialization,
    /// Internal error.
    Internal,
}

/// A structured error type for tabflow-core operations.
#[derive(Debug, Error)]
#[error("{kind}{}", message.as_ref().map(|m| format!(": {}", m)).unwrap_or_default())]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional error message.
    pub message: Option<String>,
    /// Optional source error.
    #[source]
    pub source: Option<BoxedError>,
}

impl Error {
    /// Creates a new error with the given kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Adds a message to this error.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Adds a source error to this error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Creates a new schema error.
    pub fn schema() -> Self {
        Self::new(ErrorKind::Schema)
    }

    /// Creates a new sequencing error.
    pub fn sequencing() -> Self {
        Self::new(ErrorKind::Sequencing)
    }

    /// Creates a new I/O error.
    pub fn io() -> Self {
        Self::new(ErrorKind::Io)
    }

    /// Creates a new resource error.
    pub fn resource() -> Self {
        Self::new(ErrorKind::Resource)
    }

    /// Creates a new configuration error.
    pub fn configuration() -> Self {
        Self::new(ErrorKind::Configuration)
    }

    /// Creates a new serialization error.
    pub fn serialization() -> Self {
        Self::new(ErrorKind::Serialization)
    }

    /// Creates a new internal error.
    pub fn internal() -> Self {
        Self::new(ErrorKind::Internal)
    }

    /// Creates an I/O error that names the file it happened on.
    pub fn io_at(path: &Path, source: std::io::Error) -> Self {
        Self::io()
            .with_message(format!("{}: {}", path.display(), source))
            .with_source(source)
    }

    /// Creates an error for a partition file that exists but cannot be parsed.
    pub fn malformed(path: &Path, reason: impl std::fmt::Display) -> Self {
        Self::io().with_message(format!(
            "malformed partition file {}: {}",
            path.display(),
            reason
        ))
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error kind as a string.
    pub fn kind_str(&self) -> &'static str {
        self.kind.into()
    }

    /// Returns true if this error was raised for a missing or mistyped column.
    pub fn is_schema(&self) -> bool {
        self.kind == ErrorKind::Schema
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io().with_message(source.to_string()).with_source(source)
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Self::serialization()
            .with_message(source.to_string())
            .with_source(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_with_message() {
        let error = Error::schema().with_message("column `Age` not found");
        assert_eq!(error.to_string(), "schema: column `Age` not found");
    }

    #[test]
    fn test_error_display_without_message() {
        assert_eq!(Error::resource().to_string(), "resource");
    }

    #[test]
    fn test_error_kind_str() {
        assert_eq!(Error::sequencing().kind_str(), "sequencing");
        assert!(Error::schema().is_schema());
        assert!(!Error::io().is_schema());
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error = Error::from(io);
        assert_eq!(error.kind(), ErrorKind::Io);
        assert!(std::error::Error::source(&error).is_some());
    }
}
