//! Scanner role: lists directories with the elevated identity
//!
//! The scanner never tests access. It takes the directories the checker
//! could not write to, lists their immediate subdirectories and hands the
//! union back as the next frontier. Symlinks are never followed.

use crate::error::{AuditError, ScanError, ScanResult};
use crate::walker::queue::{BatchSink, BatchSource, ShutdownGuard};
use crate::walker::types::{Batch, DirEntry, DirPath, EntryKind, Message};
use crate::walker::SCANNER;
use regex::Regex;
use std::fs;
use std::os::unix::fs::MetadataExt;
use tracing::{debug, info, warn};

/// List the immediate entries of `path`, without following symlinks
pub fn list_directory(path: &DirPath) -> ScanResult<Vec<DirEntry>> {
    let iter = fs::read_dir(path).map_err(|e| ScanError::from_io(path.as_path(), e))?;

    let mut entries = Vec::new();
    for entry in iter {
        let entry = entry.map_err(|e| ScanError::from_io(path.as_path(), e))?;
        let child = path.join(&entry.file_name());

        // file_type() comes from d_type when available, otherwise lstat
        let kind = match entry.file_type() {
            Ok(file_type) => EntryKind::from(file_type),
            Err(e) => {
                let err = ScanError::from_io(child.as_path(), e);
                if is_skippable(&err) {
                    warn!("{}", err);
                    continue;
                }
                return Err(err);
            }
        };

        entries.push(DirEntry { path: child, kind });
    }

    Ok(entries)
}

/// Listing errors that only exclude the path; anything else ends the walk
fn is_skippable(err: &ScanError) -> bool {
    matches!(
        err,
        ScanError::PermissionDenied { .. } | ScanError::NotFound { .. }
    )
}

/// Optional pruning applied to listed subdirectories
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Do not descend into other mounted filesystems
    pub one_file_system: bool,

    /// Subdirectories matching any of these are not forwarded
    pub exclude_patterns: Vec<Regex>,
}

impl ScanOptions {
    /// Check if a path should be excluded
    pub fn is_excluded(&self, path: &DirPath) -> bool {
        if self.exclude_patterns.is_empty() {
            return false;
        }
        let path = path.as_path().to_string_lossy();
        self.exclude_patterns.iter().any(|re| re.is_match(&path))
    }
}

/// Counters kept by the scanner over one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannerStats {
    /// Batches expanded
    pub rounds: u64,

    /// Directories listed successfully
    pub dirs_listed: u64,

    /// Subdirectories forwarded for checking
    pub children: u64,

    /// Directories that could not be listed
    pub skipped: u64,

    /// Subdirectories pruned by options
    pub pruned: u64,
}

/// The elevated half of the pipeline
#[derive(Debug, Default)]
pub struct Scanner {
    options: ScanOptions,
    stats: ScannerStats,
}

impl Scanner {
    pub fn new(options: ScanOptions) -> Self {
        Self {
            options,
            stats: ScannerStats::default(),
        }
    }

    pub fn stats(&self) -> &ScannerStats {
        &self.stats
    }

    /// List the subdirectories of every parent in `batch`
    ///
    /// Parents that vanished or cannot be listed are skipped with a warning;
    /// any other OS error is fatal.
    pub fn expand_batch(&mut self, batch: &Batch) -> ScanResult<Batch> {
        self.stats.rounds += 1;
        let mut children = Vec::new();

        for parent in &batch.paths {
            let entries = match list_directory(parent) {
                Ok(entries) => entries,
                Err(e) if is_skippable(&e) => {
                    warn!("{}", e);
                    self.stats.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.stats.dirs_listed += 1;

            let parent_meta = if self.options.one_file_system {
                match fs::symlink_metadata(parent) {
                    Ok(meta) => Some(meta),
                    Err(e) => {
                        warn!("{}", ScanError::from_io(parent.as_path(), e));
                        self.stats.skipped += 1;
                        continue;
                    }
                }
            } else {
                None
            };

            for entry in entries.into_iter().filter(|e| e.kind.is_dir()) {
                if self.options.is_excluded(&entry.path) {
                    debug!(path = %entry.path, "Excluded");
                    self.stats.pruned += 1;
                    continue;
                }
                if let Some(parent_meta) = &parent_meta {
                    if is_mount_point(parent_meta, &entry.path) {
                        debug!(path = %entry.path, "Mount point, not descending");
                        self.stats.pruned += 1;
                        continue;
                    }
                }
                children.push(entry.path);
            }
        }

        self.stats.children += children.len() as u64;
        Ok(Batch::new(batch.depth + 1, children))
    }

    /// Expand batches from `input` until shutdown or until a round has no
    /// subdirectories left, then signal shutdown on `output`
    pub fn run<S, K>(mut self, input: &mut S, output: &mut K) -> Result<ScannerStats, AuditError>
    where
        S: BatchSource,
        K: BatchSink,
    {
        let mut output = ShutdownGuard::new(SCANNER, output);

        loop {
            let batch = match input.recv() {
                Message::Work(batch) => batch,
                Message::Shutdown => {
                    debug!("Shutdown received");
                    break;
                }
            };

            debug!(depth = batch.depth, dirs = batch.len(), "Expanding frontier");
            let children = self.expand_batch(&batch)?;

            if children.is_empty() {
                debug!(depth = batch.depth, "No subdirectories left");
                break;
            }
            output.sink().send(Message::Work(children))?;
        }

        info!(
            rounds = self.stats.rounds,
            listed = self.stats.dirs_listed,
            skipped = self.stats.skipped,
            "Scanner finished"
        );
        Ok(self.stats)
    }
}

/// A subdirectory is a mount point if it lives on another device than its
/// parent, or is the parent's own inode
pub(crate) fn is_mount_point(parent_meta: &fs::Metadata, child: &DirPath) -> bool {
    match fs::symlink_metadata(child) {
        Ok(meta) => meta.dev() != parent_meta.dev() || meta.ino() == parent_meta.ino(),
        // Vanished; the checker will report it
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walker::queue::BatchQueue;
    use std::io;
    use std::os::unix::fs::symlink;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn sorted(batch: &Batch) -> Vec<DirPath> {
        let mut paths = batch.paths.clone();
        paths.sort();
        paths
    }

    #[test]
    fn test_expand_lists_only_directories() {
        let dir = tempdir().unwrap();
        let root = DirPath::new(dir.path());
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("file.txt"), b"data").unwrap();
        symlink(dir.path().join("a"), dir.path().join("link")).unwrap();

        let mut scanner = Scanner::default();
        let children = scanner.expand_batch(&Batch::root(root.clone())).unwrap();

        assert_eq!(children.depth, 1);
        assert_eq!(
            sorted(&children),
            vec![root.join("a".as_ref()), root.join("b".as_ref())]
        );
        assert_eq!(scanner.stats().dirs_listed, 1);
    }

    #[test]
    fn test_missing_parent_is_skipped() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("keep")).unwrap();
        fs::create_dir(dir.path().join("keep/child")).unwrap();

        let batch = Batch::new(
            1,
            vec![
                DirPath::new(dir.path().join("gone")),
                DirPath::new(dir.path().join("keep")),
            ],
        );
        let mut scanner = Scanner::default();
        let children = scanner.expand_batch(&batch).unwrap();

        assert_eq!(children.paths, vec![DirPath::new(dir.path().join("keep/child"))]);
        assert_eq!(scanner.stats().skipped, 1);
    }

    #[test]
    fn test_only_denied_and_missing_are_skippable() {
        let path = PathBuf::from("/srv/x");
        assert!(is_skippable(&ScanError::PermissionDenied { path: path.clone() }));
        assert!(is_skippable(&ScanError::NotFound { path: path.clone() }));
        assert!(!is_skippable(&ScanError::InappropriateIoctl { path: path.clone() }));
        let eio = ScanError::from_io(path.clone(), io::Error::from_raw_os_error(nix::libc::EIO));
        assert!(!is_skippable(&eio));
    }

    #[test]
    fn test_listing_a_file_is_fatal() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        fs::write(&file, b"x").unwrap();

        // ENOTDIR is neither denied nor missing
        let batch = Batch::new(1, vec![DirPath::new(&file)]);
        let mut scanner = Scanner::default();
        let err = scanner.expand_batch(&batch).unwrap_err();
        assert!(matches!(err, ScanError::Os { .. }));
        assert_eq!(scanner.stats().skipped, 0);
    }

    #[test]
    fn test_exclude_patterns() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("proc")).unwrap();
        fs::create_dir(dir.path().join("home")).unwrap();

        let options = ScanOptions {
            one_file_system: false,
            exclude_patterns: vec![Regex::new(r"/proc$").unwrap()],
        };
        let mut scanner = Scanner::new(options);
        let children = scanner
            .expand_batch(&Batch::root(DirPath::new(dir.path())))
            .unwrap();

        assert_eq!(children.paths, vec![DirPath::new(dir.path().join("home"))]);
        assert_eq!(scanner.stats().pruned, 1);
    }

    #[test]
    fn test_one_file_system_keeps_same_device() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let options = ScanOptions {
            one_file_system: true,
            exclude_patterns: Vec::new(),
        };
        let mut scanner = Scanner::new(options);
        let children = scanner
            .expand_batch(&Batch::root(DirPath::new(dir.path())))
            .unwrap();
        assert_eq!(children.len(), 1);
    }

    #[test]
    fn test_run_stops_at_leaves_and_signals_shutdown() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("leaf")).unwrap();

        let input = BatchQueue::new(SCANNER);
        let output = BatchQueue::new("checker");
        input.seed(Batch::root(DirPath::new(dir.path()))).unwrap();
        input
            .sender()
            .send(Message::Work(Batch::new(1, vec![DirPath::new(dir.path().join("leaf"))])))
            .unwrap();

        let stats = Scanner::default()
            .run(&mut input.receiver(), &mut output.sender())
            .unwrap();

        assert_eq!(stats.rounds, 2);
        let rx = output.receiver();
        match rx.recv() {
            Message::Work(batch) => assert_eq!(batch.len(), 1),
            Message::Shutdown => panic!("expected children of the root"),
        }
        assert!(rx.recv().is_shutdown());
    }
}
