//! ewfkit error types

use std::path::PathBuf;
use thiserror::Error;

/// The I/O operation that failed, kept for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Open,
    Read,
    Write,
    Seek,
    Close,
}

impl std::fmt::Display for IoOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoOp::Open => write!(f, "open"),
            IoOp::Read => write!(f, "read"),
            IoOp::Write => write!(f, "write"),
            IoOp::Seek => write!(f, "seek"),
            IoOp::Close => write!(f, "close"),
        }
    }
}

/// Why an I/O operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoErrorKind {
    NotFound,
    Permission,
    /// Operation on a handle or descriptor that is not open
    Closed,
    SeekFailed,
    ShortRead,
    ShortWrite,
}

impl IoErrorKind {
    /// Classify an OS error at the pool boundary
    pub fn classify(op: IoOp, error: &std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::PermissionDenied => Self::Permission,
            std::io::ErrorKind::UnexpectedEof => Self::ShortRead,
            std::io::ErrorKind::WriteZero => Self::ShortWrite,
            _ => match op {
                IoOp::Seek => Self::SeekFailed,
                IoOp::Read => Self::ShortRead,
                IoOp::Write => Self::ShortWrite,
                IoOp::Open | IoOp::Close => Self::Closed,
            },
        }
    }
}

impl std::fmt::Display for IoErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoErrorKind::NotFound => write!(f, "not found"),
            IoErrorKind::Permission => write!(f, "permission denied"),
            IoErrorKind::Closed => write!(f, "closed"),
            IoErrorKind::SeekFailed => write!(f, "seek failed"),
            IoErrorKind::ShortRead => write!(f, "short read"),
            IoErrorKind::ShortWrite => write!(f, "short write"),
        }
    }
}

/// The main error type for ewfkit operations
#[derive(Error, Debug)]
pub enum Error {
    /// Caller passed an invalid argument
    #[error("Invalid argument: {what}")]
    InvalidArgument { what: String },

    /// I/O error on a segment file
    #[error("I/O error during {op} of {path}: {kind}")]
    Io {
        op: IoOp,
        path: PathBuf,
        kind: IoErrorKind,
    },

    /// Signature mismatch, unknown section type, declared size exceeds file
    #[error("Invalid format in {location}: {reason}")]
    InvalidFormat { location: String, reason: String },

    /// Chunk checksum or DEFLATE failure
    #[error("Checksum or decompression failure in chunk {chunk_index}: {reason}")]
    ChecksumOrDecompress { chunk_index: u64, reason: String },

    /// Two volume/data sections disagree
    #[error("Inconsistent volume definition: {field}")]
    InconsistentVolume { field: &'static str },

    /// Chunk data flags carry reserved bits
    #[error("Unsupported chunk data flags: 0x{bits:08x}")]
    UnsupportedFlags { bits: u32 },

    /// Chunk bound twice without a delta flag
    #[error("Chunk {chunk_index} already bound")]
    DuplicateBinding { chunk_index: u64 },

    /// A value exceeds a format limit
    #[error("{field} value {value} out of range (limit {limit})")]
    OutOfRange {
        field: &'static str,
        value: u64,
        limit: u64,
    },
}

/// Result type alias for ewfkit operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(what: impl Into<String>) -> Self {
        Error::InvalidArgument { what: what.into() }
    }

    /// Create an I/O error, classifying the OS error into the flat kind set
    pub fn io(op: IoOp, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            op,
            path: path.into(),
            kind: IoErrorKind::classify(op, &source),
        }
    }

    /// I/O error for an operation against a closed or never-opened target
    pub fn io_closed(op: IoOp, path: impl Into<PathBuf>) -> Self {
        Error::Io {
            op,
            path: path.into(),
            kind: IoErrorKind::Closed,
        }
    }

    /// Create an invalid format error
    pub fn invalid_format(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidFormat {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Create a chunk checksum/decompression error
    pub fn chunk(chunk_index: u64, reason: impl Into<String>) -> Self {
        Error::ChecksumOrDecompress {
            chunk_index,
            reason: reason.into(),
        }
    }

    /// True for errors that are fatal to the handle rather than recordable
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Io { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let err = Error::io(
            IoOp::Read,
            "/evidence/disk.E01",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let text = err.to_string();
        assert!(text.contains("read"));
        assert!(text.contains("disk.E01"));
        assert!(text.contains("not found"));
    }

    #[test]
    fn test_io_kind_classification() {
        let kind = |op, io_kind| {
            IoErrorKind::classify(op, &std::io::Error::new(io_kind, "x"))
        };
        assert_eq!(
            kind(IoOp::Open, std::io::ErrorKind::NotFound),
            IoErrorKind::NotFound
        );
        assert_eq!(
            kind(IoOp::Write, std::io::ErrorKind::PermissionDenied),
            IoErrorKind::Permission
        );
        assert_eq!(
            kind(IoOp::Read, std::io::ErrorKind::UnexpectedEof),
            IoErrorKind::ShortRead
        );
        assert_eq!(
            kind(IoOp::Seek, std::io::ErrorKind::InvalidInput),
            IoErrorKind::SeekFailed
        );
        assert_eq!(
            kind(IoOp::Write, std::io::ErrorKind::Other),
            IoErrorKind::ShortWrite
        );
        assert!(matches!(
            Error::io_closed(IoOp::Read, "disk.E01"),
            Error::Io {
                kind: IoErrorKind::Closed,
                ..
            }
        ));
    }

    #[test]
    fn test_fatal_classification() {
        let io = Error::io(
            IoOp::Open,
            "x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no"),
        );
        assert!(io.is_fatal());
        assert!(!Error::chunk(42, "crc mismatch").is_fatal());
    }

    #[test]
    fn test_out_of_range_display() {
        let err = Error::OutOfRange {
            field: "segment_number",
            value: 20000,
            limit: 14295,
        };
        assert_eq!(
            err.to_string(),
            "segment_number value 20000 out of range (limit 14295)"
        );
    }
}
