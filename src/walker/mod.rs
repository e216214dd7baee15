//! Privilege-separated breadth-first walk
//!
//! Two roles cooperate over two queues, one level of the tree at a time:
//!
//! ```text
//!                  ┌──────────────────────────────┐
//!                  │       AuditCoordinator       │
//!                  │  seeds the root, joins roles │
//!                  └──────────────┬───────────────┘
//!                                 │
//!        checker queue            │            scanner queue
//!  ┌──────────────────────┐       │       ┌──────────────────────┐
//!  │       Checker        │──denied dirs─▶│       Scanner        │
//!  │  target uid/gid      │               │  root                │
//!  │  access(W_OK|X_OK)   │◀─subdirs──────│  read_dir, dirs only │
//!  └──────────────────────┘               └──────────────────────┘
//! ```
//!
//! A writable directory is reported and never expanded: everything below it
//! is reachable by the target anyway. The walk ends when either role has
//! nothing to hand over; the role that stops sends `Shutdown` and the other
//! one follows.

pub mod checker;
pub mod coordinator;
pub mod launcher;
pub mod process;
pub mod queue;
pub mod scanner;
pub mod types;

/// Role name of the elevated lister
pub const SCANNER: &str = "scanner";

/// Role name of the unprivileged access tester
pub const CHECKER: &str = "checker";

pub use checker::{AccessProbe, Checker, CheckerStats, EffectiveAccess, ExpansionPolicy};
pub use coordinator::{AuditCoordinator, AuditResult};
pub use launcher::{CheckerLauncher, InProcessLauncher, RoleHandle};
pub use process::{run_checker_process, ProcessLauncher};
pub use queue::{BatchQueue, BatchReceiver, BatchSender, ShutdownGuard};
pub use scanner::{list_directory, ScanOptions, Scanner, ScannerStats};
pub use types::{Batch, DirEntry, DirPath, EntryKind, Message};
