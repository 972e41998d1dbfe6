//! Error types for beaconrec.
//!
//! This module defines the errors returned by the library and the host
//! platform. The persisted fault taxonomy lives in [`crate::nvlog::FaultKind`];
//! these errors describe why an operation itself could not complete.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for beaconrec operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Persistent Memory Errors ===
    /// An access fell outside the persistent memory.
    #[error("persistent memory access of {len} bytes at {address} exceeds capacity {capacity}")]
    MemoryOutOfBounds {
        /// First byte of the access.
        address: usize,
        /// Number of bytes accessed.
        len: usize,
        /// Capacity of the memory in bytes.
        capacity: usize,
    },

    /// A log region is not usable.
    #[error("invalid log region {begin}..{end}: {message}")]
    InvalidRegion {
        /// First byte of the region.
        begin: usize,
        /// One past the last byte of the region.
        end: usize,
        /// Why the region was rejected.
        message: String,
    },

    /// Failed to open or create the memory image backing persistent memory.
    #[error("failed to open memory image at {path}: {source}")]
    MemoryImage {
        /// Path to the image file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Beacon Source Errors ===
    /// A row of the beacon source could not be parsed.
    #[error("malformed beacon source at line {line}: {message}")]
    BeaconSource {
        /// One-based line number.
        line: usize,
        /// Description of what went wrong.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for beaconrec operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create an invalid region error.
    #[must_use]
    pub fn invalid_region(begin: usize, end: usize, message: impl Into<String>) -> Self {
        Self::InvalidRegion {
            begin,
            end,
            message: message.into(),
        }
    }

    /// Create a beacon source error for the given one-based line.
    #[must_use]
    pub fn beacon_source(line: usize, message: impl Into<String>) -> Self {
        Self::BeaconSource {
            line,
            message: message.into(),
        }
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Check if this error is an out-of-bounds memory access.
    #[must_use]
    pub fn is_out_of_bounds(&self) -> bool {
        matches!(self, Self::MemoryOutOfBounds { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_bounds_display() {
        let err = Error::MemoryOutOfBounds {
            address: 1022,
            len: 4,
            capacity: 1024,
        };
        let msg = err.to_string();
        assert!(msg.contains("1022"));
        assert!(msg.contains("1024"));
        assert!(err.is_out_of_bounds());
    }

    #[test]
    fn test_invalid_region_display() {
        let err = Error::invalid_region(4, 7, "not a multiple of the record size");
        assert_eq!(
            err.to_string(),
            "invalid log region 4..7: not a multiple of the record size"
        );
        assert!(!err.is_out_of_bounds());
    }

    #[test]
    fn test_beacon_source_display() {
        let err = Error::beacon_source(3, "expected 5 columns");
        let msg = err.to_string();
        assert!(msg.contains("line 3"));
        assert!(msg.contains("expected 5 columns"));
    }

    #[test]
    fn test_internal_error() {
        let err = Error::internal("something went wrong");
        assert_eq!(err.to_string(), "internal error: something went wrong");
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::config_validation("period_ms must be greater than 0");
        assert!(err.to_string().contains("period_ms"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }

    #[test]
    fn test_memory_image_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = Error::MemoryImage {
            path: PathBuf::from("/var/lib/beaconrec/eeprom.bin"),
            source: io_err,
        };
        let msg = err.to_string();
        assert!(msg.contains("eeprom.bin"));
        assert!(msg.contains("read-only"));
    }
}
