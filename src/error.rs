//! Error types for writable-dirs
//!
//! This module defines the error hierarchy for:
//! - Privilege transitions (fatal, never retried)
//! - Configuration and CLI resolution
//! - Per-path scan errors (mostly recoverable)
//! - Role/worker failures, including the checker process
//!
//! Per-path errors are contained inside the roles; everything else bubbles
//! up to `main` and ends the run with a non-zero exit status.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for an audit run
#[derive(Error, Debug)]
pub enum AuditError {
    /// Privilege precondition or transition failed
    #[error("Privilege error: {0}")]
    Privilege(#[from] PrivilegeError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Unrecoverable scan errors
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// I/O errors outside of directory scanning
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while checking or changing the process identity
#[derive(Error, Debug)]
pub enum PrivilegeError {
    /// Not running as the superuser
    #[error("Must be run as root (effective uid is {euid})")]
    NotSuperuser { euid: u32 },

    /// One of the setgroups/setgid/setuid/umask steps failed
    #[error("Failed to {step}: {source}")]
    DropFailed {
        step: &'static str,
        #[source]
        source: nix::Error,
    },

    /// Identity after the transition is not the requested one
    #[error("Privileges were not fully dropped: {0}")]
    NotDropped(String),

    /// Reading the current credentials failed
    #[error("Failed to query process credentials: {0}")]
    Query(#[source] nix::Error),
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// User name or uid does not resolve
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    /// Group name or gid does not resolve
    #[error("Unknown group: {0}")]
    UnknownGroup(String),

    /// The passwd/group database lookup itself failed
    #[error("Failed to look up '{name}': {source}")]
    Lookup {
        name: String,
        #[source]
        source: nix::Error,
    },

    /// The audited identity is the superuser itself
    #[error("Refusing to audit as uid 0: '{0}' is the superuser")]
    RootTarget(String),

    /// Required option missing
    #[error("Missing required option: {0}")]
    MissingOption(&'static str),

    /// Root directory is missing or not a directory
    #[error("Invalid root directory '{path}': {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    /// Invalid exclude pattern
    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidExcludePattern { pattern: String, reason: String },
}

/// Errors tied to a single path during traversal
#[derive(Error, Debug)]
pub enum ScanError {
    /// Permission denied while listing or probing
    #[error("Permission denied: '{}'", path.display())]
    PermissionDenied { path: PathBuf },

    /// Path vanished
    #[error("Path not found: '{}'", path.display())]
    NotFound { path: PathBuf },

    /// Inode flags cannot be queried on this file (ENOTTY)
    #[error("Inappropriate ioctl for device: '{}'", path.display())]
    InappropriateIoctl { path: PathBuf },

    /// Any other OS error
    #[error("Failed to read '{}': {source}", path.display())]
    Os {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    /// Map an I/O error on `path` into the taxonomy
    pub fn from_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => ScanError::PermissionDenied { path },
            std::io::ErrorKind::NotFound => ScanError::NotFound { path },
            _ if err.raw_os_error() == Some(nix::libc::ENOTTY) => {
                ScanError::InappropriateIoctl { path }
            }
            _ => ScanError::Os { path, source: err },
        }
    }

    /// Check if this error only excludes the path (skip with a warning)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ScanError::PermissionDenied { .. }
                | ScanError::NotFound { .. }
                | ScanError::InappropriateIoctl { .. }
        )
    }
}

/// Role and channel errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Role thread panicked
    #[error("{role} panicked: {message}")]
    Panicked { role: &'static str, message: String },

    /// Failed to start a role
    #[error("Failed to start {role}: {reason}")]
    SpawnFailed { role: &'static str, reason: String },

    /// Downstream queue is gone
    #[error("Queue closed unexpectedly while sending to {0}")]
    QueueClosed(&'static str),

    /// Frame could not be written to or decoded from a pipe
    #[error("Malformed frame: {0}")]
    Frame(String),

    /// The checker process exited with a failure status
    #[error("Checker process exited with {0}")]
    CheckerExit(std::process::ExitStatus),

    /// I/O on the pipes
    #[error("Pipe I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for AuditError
pub type Result<T> = std::result::Result<T, AuditError>;

/// Result type alias for ScanError
pub type ScanResult<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_scan_error_recoverable() {
        let denied = ScanError::from_io("/x", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(denied, ScanError::PermissionDenied { .. }));
        assert!(denied.is_recoverable());

        let missing = ScanError::from_io("/x", io::Error::from(io::ErrorKind::NotFound));
        assert!(missing.is_recoverable());

        let enotty = ScanError::from_io("/x", io::Error::from_raw_os_error(nix::libc::ENOTTY));
        assert!(matches!(enotty, ScanError::InappropriateIoctl { .. }));
        assert!(enotty.is_recoverable());

        let eio = ScanError::from_io("/x", io::Error::from_raw_os_error(nix::libc::EIO));
        assert!(!eio.is_recoverable());
    }

    #[test]
    fn test_error_conversion() {
        let err: AuditError = PrivilegeError::NotSuperuser { euid: 1000 }.into();
        assert!(matches!(err, AuditError::Privilege(_)));
        assert!(err.to_string().contains("Must be run as root"));
    }
}
