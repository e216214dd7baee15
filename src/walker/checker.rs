//! Checker role: tests write access as the target identity
//!
//! The checker never lists directories. It runs in its own process after
//! the privilege drop, so every [`AccessProbe`] answer reflects what the
//! audited user can actually do.

use crate::error::{AuditError, ScanError};
use crate::walker::queue::{BatchSink, BatchSource, ShutdownGuard};
use crate::walker::types::{Batch, DirPath, Message};
use crate::walker::CHECKER;
use nix::errno::Errno;
use nix::unistd::{access, AccessFlags};
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

/// Which checked directories are handed back for expansion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpansionPolicy {
    /// Only directories the target cannot write to
    #[default]
    DeniedOnly,
    /// Every directory, so each level is tested independently
    Exhaustive,
}

/// Write+traverse test under the calling identity
pub trait AccessProbe {
    /// `Ok(false)` means access is denied; `Err` means the path could not
    /// be tested at all (e.g. it vanished)
    fn can_write(&self, path: &Path) -> io::Result<bool>;
}

/// `access(2)` with `W_OK | X_OK`
///
/// access(2) checks the real ids. After [`crate::privilege::drop_privileges`]
/// real, effective and saved ids are all the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct EffectiveAccess;

impl AccessProbe for EffectiveAccess {
    fn can_write(&self, path: &Path) -> io::Result<bool> {
        match access(path, AccessFlags::W_OK | AccessFlags::X_OK) {
            Ok(()) => Ok(true),
            Err(Errno::EACCES) | Err(Errno::EPERM) | Err(Errno::EROFS) | Err(Errno::ETXTBSY) => {
                Ok(false)
            }
            Err(errno) => Err(io::Error::from(errno)),
        }
    }
}

/// Outcome of checking one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub writable: Vec<DirPath>,
    pub denied: Vec<DirPath>,
    /// Paths that could not be tested
    pub skipped: usize,
}

/// Counters kept by the checker over one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckerStats {
    pub rounds: u64,
    pub checked: u64,
    pub writable: u64,
    pub skipped: u64,
}

/// The unprivileged half of the pipeline
pub struct Checker<P: AccessProbe> {
    probe: P,
    policy: ExpansionPolicy,
    stats: CheckerStats,
}

impl<P: AccessProbe> Checker<P> {
    pub fn new(probe: P, policy: ExpansionPolicy) -> Self {
        Self {
            probe,
            policy,
            stats: CheckerStats::default(),
        }
    }

    pub fn stats(&self) -> &CheckerStats {
        &self.stats
    }

    /// Split `batch` into writable and denied directories
    ///
    /// Writable directories are logged; denied ones are not.
    pub fn check_batch(&mut self, batch: &Batch) -> Classification {
        self.stats.rounds += 1;
        let mut result = Classification::default();

        for path in &batch.paths {
            self.stats.checked += 1;
            match self.probe.can_write(path.as_path()) {
                Ok(true) => {
                    info!("Writable: {}", path);
                    self.stats.writable += 1;
                    result.writable.push(path.clone());
                }
                Ok(false) => result.denied.push(path.clone()),
                Err(e) => {
                    warn!("{}", ScanError::from_io(path.as_path(), e));
                    self.stats.skipped += 1;
                    result.skipped += 1;
                }
            }
        }

        result
    }

    /// Check batches from `input` until shutdown or until nothing is left
    /// to expand, then signal shutdown on `output`
    pub fn run<S, K>(mut self, input: &mut S, output: &mut K) -> Result<CheckerStats, AuditError>
    where
        S: BatchSource,
        K: BatchSink,
    {
        let mut output = ShutdownGuard::new(CHECKER, output);

        loop {
            let batch = match input.recv() {
                Message::Work(batch) => batch,
                Message::Shutdown => {
                    debug!("Shutdown received");
                    break;
                }
            };

            debug!(depth = batch.depth, dirs = batch.len(), "Checking frontier");
            let result = self.check_batch(&batch);

            let next = match self.policy {
                ExpansionPolicy::DeniedOnly => result.denied,
                ExpansionPolicy::Exhaustive => {
                    result.writable.into_iter().chain(result.denied).collect()
                }
            };

            if next.is_empty() {
                debug!(depth = batch.depth, "Nothing left to expand");
                break;
            }
            output.sink().send(Message::Work(Batch::new(batch.depth, next)))?;
        }

        info!(
            rounds = self.stats.rounds,
            checked = self.stats.checked,
            writable = self.stats.writable,
            skipped = self.stats.skipped,
            "Checker finished"
        );
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walker::queue::BatchQueue;
    use std::collections::HashSet;
    use std::path::PathBuf;

    /// Writable iff listed; errors for paths under `/gone`
    struct FakeProbe {
        writable: HashSet<PathBuf>,
    }

    impl FakeProbe {
        fn new(paths: &[&str]) -> Self {
            Self {
                writable: paths.iter().map(PathBuf::from).collect(),
            }
        }
    }

    impl AccessProbe for FakeProbe {
        fn can_write(&self, path: &Path) -> io::Result<bool> {
            if path.starts_with("/gone") {
                return Err(io::Error::from(io::ErrorKind::NotFound));
            }
            Ok(self.writable.contains(path))
        }
    }

    fn batch(depth: u32, paths: &[&str]) -> Batch {
        Batch::new(depth, paths.iter().map(|p| DirPath::from(*p)).collect())
    }

    #[test]
    fn test_check_batch_classifies() {
        let mut checker = Checker::new(FakeProbe::new(&["/a"]), ExpansionPolicy::DeniedOnly);
        let result = checker.check_batch(&batch(1, &["/a", "/b", "/gone/c"]));

        assert_eq!(result.writable, vec![DirPath::from("/a")]);
        assert_eq!(result.denied, vec![DirPath::from("/b")]);
        assert_eq!(result.skipped, 1);
        assert_eq!(checker.stats().checked, 3);
    }

    #[test]
    fn test_run_forwards_denied_only() {
        let input = BatchQueue::new(CHECKER);
        let output = BatchQueue::new("scanner");
        input.seed(batch(1, &["/a", "/b"])).unwrap();
        input.sender().send(Message::Shutdown).unwrap();

        let checker = Checker::new(FakeProbe::new(&["/a"]), ExpansionPolicy::DeniedOnly);
        let stats = checker
            .run(&mut input.receiver(), &mut output.sender())
            .unwrap();
        assert_eq!(stats.writable, 1);

        let rx = output.receiver();
        assert_eq!(rx.recv(), Message::Work(batch(1, &["/b"])));
        assert!(rx.recv().is_shutdown());
    }

    #[test]
    fn test_all_writable_ends_the_walk() {
        let input = BatchQueue::new(CHECKER);
        let output = BatchQueue::new("scanner");
        input.seed(batch(0, &["/a"])).unwrap();

        let checker = Checker::new(FakeProbe::new(&["/a"]), ExpansionPolicy::DeniedOnly);
        checker
            .run(&mut input.receiver(), &mut output.sender())
            .unwrap();

        // No work forwarded, only the shutdown
        assert!(output.receiver().recv().is_shutdown());
    }

    #[test]
    fn test_exhaustive_forwards_writable_too() {
        let input = BatchQueue::new(CHECKER);
        let output = BatchQueue::new("scanner");
        input.seed(batch(0, &["/a", "/gone/x"])).unwrap();
        input.sender().send(Message::Shutdown).unwrap();

        let checker = Checker::new(FakeProbe::new(&["/a"]), ExpansionPolicy::Exhaustive);
        checker
            .run(&mut input.receiver(), &mut output.sender())
            .unwrap();

        assert_eq!(output.receiver().recv(), Message::Work(batch(0, &["/a"])));
    }

    #[test]
    fn test_effective_access_on_missing_path() {
        let err = EffectiveAccess
            .can_write(Path::new("/definitely/not/here"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_effective_access_on_own_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EffectiveAccess.can_write(dir.path()).unwrap());
    }
}
