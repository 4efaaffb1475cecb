//! Error types for the integrity checker

use std::path::PathBuf;
use thiserror::Error;

/// Exit status for a successful (or no-op) run
pub const EXIT_CODE_OK: u8 = 0;

/// Exit status for a fatal runtime error (scan, ledger, verifier launch)
pub const EXIT_CODE_ERR_RUNTIME: u8 = 1;

/// Exit status for option/usage errors (`-1` as an exit byte)
pub const EXIT_CODE_ERR_OPTION: u8 = 255;

/// Exit status for a file that failed verification (`-2` as an exit byte)
pub const EXIT_CODE_ERR_VALIDATION: u8 = 254;

/// Error kinds that can occur during a check run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityErrorKind {
    /// Permission denied when accessing a file or directory
    PermissionDenied,
    /// File or directory not found
    NotFound,
    /// I/O error during file operations
    IoError,
    /// The ledger file exists but cannot be parsed
    LedgerCorrupt,
    /// Conflicting or invalid command line options
    Usage,
    /// The external verifier reported a damaged file
    VerificationFailed,
    /// The external verifier could not be launched
    VerifierUnavailable,
    /// File name that cannot be recorded in the ledger (not UTF-8)
    InvalidPath,
}

/// Represents an error that occurred during a check run
#[derive(Debug, Error)]
#[error("{kind:?}: {message} (path: {path:?})")]
pub struct IntegrityError {
    /// The kind of error
    pub kind: IntegrityErrorKind,
    /// The path where the error occurred
    pub path: Option<PathBuf>,
    /// Human-readable error message
    pub message: String,
}

impl IntegrityError {
    /// Create a new error
    pub fn new(
        kind: IntegrityErrorKind,
        path: Option<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            path,
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(path: PathBuf) -> Self {
        Self::new(
            IntegrityErrorKind::NotFound,
            Some(path.clone()),
            format!("Not found: {:?}", path),
        )
    }

    /// Create an I/O error
    pub fn io_error(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(IntegrityErrorKind::IoError, path, message)
    }

    /// Create a ledger corruption error pointing at the offending line
    pub fn ledger_corrupt(path: PathBuf, line: u64, message: impl Into<String>) -> Self {
        Self::new(
            IntegrityErrorKind::LedgerCorrupt,
            Some(path),
            format!("line {}: {}", line, message.into()),
        )
    }

    /// Create an error for a path with an invalid encoding
    pub fn invalid_path(path: PathBuf) -> Self {
        Self::new(
            IntegrityErrorKind::InvalidPath,
            Some(path.clone()),
            format!("Path is not valid UTF-8: {:?}", path),
        )
    }

    /// Create a usage error
    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(IntegrityErrorKind::Usage, None, message)
    }

    /// Create a verification failure for a damaged file
    pub fn verification_failed(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(IntegrityErrorKind::VerificationFailed, Some(path), message)
    }

    /// Create an error for a verifier that could not be run
    pub fn verifier_unavailable(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(IntegrityErrorKind::VerifierUnavailable, Some(path), message)
    }

    /// Attach a path if none was recorded yet
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> u8 {
        match self.kind {
            IntegrityErrorKind::Usage => EXIT_CODE_ERR_OPTION,
            IntegrityErrorKind::VerificationFailed => EXIT_CODE_ERR_VALIDATION,
            _ => EXIT_CODE_ERR_RUNTIME,
        }
    }
}

impl From<std::io::Error> for IntegrityError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => IntegrityErrorKind::PermissionDenied,
            std::io::ErrorKind::NotFound => IntegrityErrorKind::NotFound,
            _ => IntegrityErrorKind::IoError,
        };
        Self::new(kind, None, err.to_string())
    }
}

impl From<walkdir::Error> for IntegrityError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(|p| p.to_path_buf());
        let kind = if err.io_error().map(|e| e.kind()) == Some(std::io::ErrorKind::PermissionDenied)
        {
            IntegrityErrorKind::PermissionDenied
        } else {
            IntegrityErrorKind::IoError
        };
        Self::new(kind, path, err.to_string())
    }
}

impl From<csv::Error> for IntegrityError {
    fn from(err: csv::Error) -> Self {
        let line = err.position().map(|p| p.line()).unwrap_or(0);
        match err.kind() {
            csv::ErrorKind::Io(_) => Self::io_error(None, err.to_string()),
            _ => Self::new(
                IntegrityErrorKind::LedgerCorrupt,
                None,
                format!("line {}: {}", line, err),
            ),
        }
    }
}
