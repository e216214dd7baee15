//! writable-dirs - Find directories a user can write to
//!
//! Audits a directory tree for directories that a given (non-root) user and
//! group can write to, without ever running the audited code paths as root.
//!
//! # Features
//!
//! - **Privilege Separation**: Directories are listed by a root process and
//!   tested by a child process that has irreversibly dropped to the target
//!   identity, so `access(2)` answers exactly as it would for that user.
//!
//! - **Pruned Breadth-First Walk**: A writable directory is reported and not
//!   descended; everything below it is reachable by the user anyway.
//!
//! - **Single Log Stream**: Both processes log through one queue and one
//!   listener, so output lines never interleave.
//!
//! - **Inode Flag Audit**: The `bad-attrs` subcommand reports immutable and
//!   append-only files.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   writable-dirs (root)                          │
//! │                                                                 │
//! │   ┌──────────────┐   scanner queue   ┌──────────────────────┐   │
//! │   │   Scanner    │◀──────────────────│  relay (stdout)      │   │
//! │   │  read_dir    │                   └──────────▲───────────┘   │
//! │   └──────┬───────┘                              │               │
//! │          │ checker queue             ┌──────────┴───────────┐   │
//! │          └──────────────────────────▶│  feeder (stdin)      │   │
//! │                                      └──────────┬───────────┘   │
//! │   ┌──────────────┐   log queue                  │               │
//! │   │ LogListener  │◀──── scanner events          │               │
//! │   │   stderr     │◀──── relay (child stderr)    │               │
//! │   └──────────────┘                              │               │
//! └─────────────────────────────────────────────────┼───────────────┘
//!                                                   ▼
//!                              ┌───────────────────────────────────┐
//!                              │  writable-dirs checker (target)   │
//!                              │  setgroups/setgid/setuid, umask   │
//!                              │  access(W_OK | X_OK)              │
//!                              └───────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Audit the whole system for alice
//! sudo writable-dirs -u alice
//!
//! # Audit /srv for www-data, staying on one filesystem
//! sudo writable-dirs /srv -u www-data -x
//!
//! # Look for immutable/append-only files
//! sudo writable-dirs bad-attrs /etc
//! ```

pub mod attrs;
pub mod config;
pub mod error;
pub mod logging;
pub mod privilege;
pub mod walker;

pub use config::{AuditConfig, CliArgs, Command};
pub use error::{AuditError, Result};
pub use walker::{AuditCoordinator, AuditResult};
