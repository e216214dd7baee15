//! `bad-attrs`: find files and directories with sticky inode flags
//!
//! An immutable or append-only file cannot be fixed up by a plain `chmod`
//! or `rm`, even by root, so such entries are worth reporting next to the
//! writable directories. The walk stays on one filesystem and never follows
//! symlinks.

use crate::error::{AuditError, ScanError, ScanResult};
use crate::logging::{self, LogListener, LogQueue, LogSink};
use crate::walker::scanner::{is_mount_point, list_directory};
use crate::walker::types::{DirPath, EntryKind};
use nix::libc::{self, c_long};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;
use tracing::{debug, info, warn};

/// Role name used in log records
pub const BAD_ATTRS: &str = "bad-attrs";

/// `FS_IMMUTABLE_FL`
pub const IMMUTABLE_FLAG: u32 = 0x0000_0010;

/// `FS_APPEND_FL`
pub const APPEND_ONLY_FLAG: u32 = 0x0000_0020;

const BAD_FLAGS: u32 = IMMUTABLE_FLAG | APPEND_ONLY_FLAG;

// FS_IOC_GETFLAGS is declared as _IOR('f', 1, long)
nix::ioctl_read!(fs_ioc_getflags, b'f', 1, c_long);

/// Counters for one inspection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttrStats {
    /// Directories listed
    pub dirs: u64,

    /// Files and directories whose flags were read
    pub inspected: u64,

    /// Entries with the immutable or append-only flag
    pub bad: u64,

    /// Directories that could not be listed
    pub skipped: u64,
}

pub fn flags_are_bad(flags: u32) -> bool {
    flags & BAD_FLAGS != 0
}

/// Read the inode flags of `path`
pub fn path_get_flags(path: &Path) -> io::Result<u32> {
    let file = File::open(path)?;
    let mut flags: c_long = 0;
    // SAFETY: the fd stays open for the duration of the call and `flags`
    // is as large as the ioctl argument
    unsafe { fs_ioc_getflags(file.as_raw_fd(), &mut flags) }.map_err(io::Error::from)?;
    Ok(flags as u32)
}

/// Whether `path` carries a bad flag
///
/// Filesystems without inode flags (ENOTTY) and refused queries (EPERM) are
/// reported and treated as clean; anything else is an error.
pub fn path_has_bad_flags(path: &Path) -> ScanResult<bool> {
    match path_get_flags(path) {
        Ok(flags) => Ok(flags_are_bad(flags)),
        Err(e) if matches!(e.raw_os_error(), Some(libc::ENOTTY) | Some(libc::EPERM)) => {
            warn!("{}: {}", path.display(), e);
            Ok(false)
        }
        Err(e) => Err(ScanError::Os {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Breadth-first walk from `root`, warning about every bad entry
///
/// `root` itself is only listed, not inspected. Mount points and symlinks
/// are neither inspected nor descended into.
pub fn inspect_tree(root: &DirPath) -> Result<AttrStats, AuditError> {
    info!("Directory: {}", root);
    let mut stats = AttrStats::default();
    let mut queue = VecDeque::from([root.clone()]);

    while let Some(dir) = queue.pop_front() {
        let entries = match list_directory(&dir) {
            Ok(entries) => entries,
            Err(e) if e.is_recoverable() => {
                warn!("{}", e);
                stats.skipped += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let dir_meta = match fs::symlink_metadata(&dir) {
            Ok(meta) => meta,
            Err(e) => {
                warn!("{}", ScanError::from_io(dir.as_path(), e));
                stats.skipped += 1;
                continue;
            }
        };
        stats.dirs += 1;

        for entry in entries {
            match entry.kind {
                EntryKind::Directory => {
                    if is_mount_point(&dir_meta, &entry.path) {
                        debug!(path = %entry.path, "Mount point, skipping");
                        continue;
                    }
                    queue.push_back(entry.path.clone());
                }
                EntryKind::File => {}
                EntryKind::Symlink | EntryKind::Other => continue,
            }

            stats.inspected += 1;
            if path_has_bad_flags(entry.path.as_path())? {
                warn!("Bad flags: {}", entry.path);
                stats.bad += 1;
            }
        }
    }

    info!(
        dirs = stats.dirs,
        inspected = stats.inspected,
        bad = stats.bad,
        skipped = stats.skipped,
        "Inspection finished"
    );
    Ok(stats)
}

/// Run [`inspect_tree`] with its own log listener writing to `sink`
pub fn run_bad_attrs(
    root: &Path,
    verbose: bool,
    sink: Box<dyn LogSink>,
) -> Result<AttrStats, AuditError> {
    let log_queue = LogQueue::new();
    let listener = LogListener::start(&log_queue, sink)?;

    let subscriber = logging::subscriber(BAD_ATTRS, log_queue.sender(), verbose);
    let result = tracing::subscriber::with_default(subscriber, || {
        let result = inspect_tree(&DirPath::new(root));
        if let Err(e) = &result {
            tracing::error!("{}", e);
        }
        result
    });

    listener.stop();
    result
}
