//! Error types for Sonance.

use thiserror::Error;

use crate::types::FormatDescriptor;

/// Result type alias using Sonance's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Sonance.
#[derive(Error, Debug)]
pub enum Error {
    // Source resolution errors
    #[error("Audio source not found: {0}")]
    SourceNotFound(String),

    #[error("Unsupported container: {0}")]
    UnsupportedContainer(String),

    #[error("Network error: {0}")]
    Network(String),

    // Format errors
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Conversion unsupported: {from} -> {to}")]
    ConversionUnsupported {
        from: FormatDescriptor,
        to: FormatDescriptor,
    },

    // Device errors
    #[error("Line unavailable: {0}")]
    LineUnavailable(String),

    #[error("Invalid line state: {0}")]
    LineState(String),

    // IO errors
    #[error("Stream IO error: {0}")]
    StreamIo(#[from] std::io::Error),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    // Generic errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if this error was raised while acquiring a source or device,
    /// before any playback state changed.
    pub const fn is_acquisition_failure(&self) -> bool {
        matches!(
            self,
            Self::SourceNotFound(_)
                | Self::UnsupportedContainer(_)
                | Self::Network(_)
                | Self::LineUnavailable(_)
        )
    }

    /// Returns true if this is a format negotiation error.
    pub const fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat(_) | Self::ConversionUnsupported { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquisition_failures() {
        assert!(Error::LineUnavailable("no output".into()).is_acquisition_failure());
        assert!(Error::SourceNotFound("a.wav".into()).is_acquisition_failure());
        assert!(!Error::InvalidArgument("test".into()).is_acquisition_failure());
    }

    #[test]
    fn test_format_errors() {
        let canonical = FormatDescriptor::default();
        let err = Error::ConversionUnsupported {
            from: canonical,
            to: canonical,
        };
        assert!(err.is_format_error());
        assert!(!Error::Internal("x".into()).is_format_error());
    }

    #[test]
    fn test_error_display() {
        let err = Error::LineUnavailable("no clip lines".into());
        assert_eq!(err.to_string(), "Line unavailable: no clip lines");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::StreamIo(_)));
    }
}
