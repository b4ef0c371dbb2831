//! Unified error handling for pbm-core
//!
//! Topology classification never fails, so every error here comes from
//! reading documents, loading configuration or decoding restore streams.

use crate::compression::CompressionType;
use std::fmt;
use std::io;
use thiserror::Error;

/// Main error type for pbm-core operations
#[derive(Debug, Error)]
pub enum PbmError {
    /// I/O errors outside of a codec stream
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Restore stream codec errors
    #[error("Compression error: {0}")]
    Compression(#[from] CompressionError),

    /// Topology document decoding errors
    #[error("Document error: {0}")]
    Document(#[from] serde_json::Error),

    /// Errors restoring a single unit
    #[error("Restore error: {0}")]
    Restore(#[from] RestoreError),

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Errors opening or reading a decompressing stream
#[derive(Debug, Error)]
pub enum CompressionError {
    /// The stream does not start with a valid header for its codec
    #[error("invalid {codec} header: {reason}")]
    InvalidHeader {
        codec: CompressionType,
        reason: String,
    },

    /// The underlying source failed while the header was being read
    #[error("{codec} reader: {source}")]
    Read {
        codec: CompressionType,
        #[source]
        source: io::Error,
    },
}

/// Failure restoring one unit. Each variant names the unit so operators can
/// tell which file failed.
#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("unit {unit}: cannot open {path}: {source}")]
    Open {
        unit: String,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("unit {unit}: {source}")]
    Codec {
        unit: String,
        #[source]
        source: CompressionError,
    },

    #[error("unit {unit}: {codec} stream is corrupt: {source}")]
    Decode {
        unit: String,
        codec: CompressionType,
        #[source]
        source: io::Error,
    },

    #[error("unit {unit}: write failed: {source}")]
    Write {
        unit: String,
        #[source]
        source: io::Error,
    },

    #[error("unit {unit}: worker failed: {message}")]
    Worker { unit: String, message: String },

    /// The output path resolves to the unit's own source file
    #[error("unit {unit}: output {path} is the source file")]
    SameFile { unit: String, path: String },

    /// Another unit in the same batch already writes this output path
    #[error("unit {unit}: output {path} is already written by unit {other}")]
    Collision {
        unit: String,
        path: String,
        other: String,
    },
}

/// Result type alias for pbm-core operations
pub type PbmResult<T> = Result<T, PbmError>;

impl PbmError {
    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        PbmError::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (the operation may be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            PbmError::Io(_) => true,
            PbmError::Compression(CompressionError::Read { .. }) => true,
            PbmError::Restore(RestoreError::Open { .. }) => true,
            PbmError::Restore(RestoreError::Write { .. }) => true,
            _ => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PbmError::Config(_) => ErrorSeverity::Critical,
            PbmError::Internal { .. } => ErrorSeverity::Critical,
            PbmError::Io(_) => ErrorSeverity::Warning,
            PbmError::Document(_) => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that affect functionality but don't crash the system
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational messages about recoverable issues
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}

impl CompressionError {
    pub fn invalid_header<S: Into<String>>(codec: CompressionType, reason: S) -> Self {
        CompressionError::InvalidHeader {
            codec,
            reason: reason.into(),
        }
    }

    pub fn read(codec: CompressionType, source: io::Error) -> Self {
        CompressionError::Read { codec, source }
    }

    pub fn codec(&self) -> CompressionType {
        match self {
            CompressionError::InvalidHeader { codec, .. } | CompressionError::Read { codec, .. } => *codec,
        }
    }
}

impl RestoreError {
    /// Name of the unit that failed
    pub fn unit(&self) -> &str {
        match self {
            RestoreError::Open { unit, .. }
            | RestoreError::Codec { unit, .. }
            | RestoreError::Decode { unit, .. }
            | RestoreError::Write { unit, .. }
            | RestoreError::Worker { unit, .. }
            | RestoreError::SameFile { unit, .. }
            | RestoreError::Collision { unit, .. } => unit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = PbmError::internal("unreachable state");
        assert!(matches!(error, PbmError::Internal { .. }));
        assert_eq!(error.to_string(), "Internal error: unreachable state");
    }

    #[test]
    fn test_error_severity() {
        let config_error = PbmError::Config(ConfigError::ValidationError("test".to_string()));
        assert_eq!(config_error.severity(), ErrorSeverity::Critical);

        let io_error = PbmError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "test"));
        assert_eq!(io_error.severity(), ErrorSeverity::Warning);

        let codec_error = PbmError::from(CompressionError::invalid_header(CompressionType::Gzip, "bad magic"));
        assert_eq!(codec_error.severity(), ErrorSeverity::Error);
    }

    #[test]
    fn test_error_recoverability() {
        let io_error = PbmError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "test"));
        assert!(io_error.is_recoverable());

        let header_error = PbmError::from(CompressionError::invalid_header(CompressionType::Pgzip, "bad magic"));
        assert!(!header_error.is_recoverable());
    }

    #[test]
    fn test_compression_error_display() {
        let error = CompressionError::invalid_header(CompressionType::Gzip, "bad magic 0x4142");
        assert_eq!(error.to_string(), "invalid gzip header: bad magic 0x4142");
        assert_eq!(error.codec(), CompressionType::Gzip);
    }

    #[test]
    fn test_restore_error_names_unit() {
        let error = RestoreError::Decode {
            unit: "rs0/admin.users".to_string(),
            codec: CompressionType::S2,
            source: io::Error::new(io::ErrorKind::InvalidData, "checksum mismatch"),
        };
        assert_eq!(error.unit(), "rs0/admin.users");
        assert_eq!(
            error.to_string(),
            "unit rs0/admin.users: s2 stream is corrupt: checksum mismatch"
        );

        let error = RestoreError::Collision {
            unit: "rs1/users".to_string(),
            path: "out/users.bson".to_string(),
            other: "rs0/users".to_string(),
        };
        assert_eq!(error.unit(), "rs1/users");
        assert!(!PbmError::from(error).is_recoverable());
    }
}
