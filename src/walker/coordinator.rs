//! Audit coordinator - lifecycle glue for one run
//!
//! The coordinator is responsible for:
//! - Starting the log listener before anything else can log
//! - Creating the two batch queues and seeding the walk
//! - Starting the checker and running the scanner on the calling thread
//! - Joining the checker, then stopping the log listener
//!
//! It never lists a directory and never tests access itself.

use crate::config::AuditConfig;
use crate::error::Result;
use crate::logging::{self, LogListener, LogQueue, LogSink};
use crate::privilege;
use crate::walker::launcher::CheckerLauncher;
use crate::walker::queue::BatchQueue;
use crate::walker::scanner::{Scanner, ScannerStats};
use crate::walker::types::Batch;
use crate::walker::{CHECKER, SCANNER};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Result of a completed audit
#[derive(Debug, Clone)]
pub struct AuditResult {
    /// Scanner counters (rounds, directories listed, skipped)
    pub scanner: ScannerStats,

    /// Batches handed to the checker, including the seed
    pub batches_checked: u64,

    /// Time taken for the audit
    pub duration: Duration,
}

/// Coordinates the scanner and the checker for one audit
pub struct AuditCoordinator<L: CheckerLauncher> {
    config: AuditConfig,
    launcher: L,
    sink: Box<dyn LogSink>,
}

impl<L: CheckerLauncher> AuditCoordinator<L> {
    /// Create a coordinator; every log line of the run ends up in `sink`
    pub fn new(config: AuditConfig, launcher: L, sink: Box<dyn LogSink>) -> Self {
        Self {
            config,
            launcher,
            sink,
        }
    }

    /// Run the audit to completion
    pub fn run(self) -> Result<AuditResult> {
        let Self {
            config,
            launcher,
            sink,
        } = self;

        let log_queue = LogQueue::new();
        let listener = LogListener::start(&log_queue, sink)?;

        let subscriber = logging::subscriber(SCANNER, log_queue.sender(), config.verbose);
        let result = tracing::subscriber::with_default(subscriber, || {
            let result = walk(&config, &launcher, &log_queue);
            if let Err(e) = &result {
                tracing::error!("{}", e);
            }
            result
        });

        // Both roles are done; nothing else can log for this run
        listener.stop();
        result
    }
}

fn walk<L: CheckerLauncher>(
    config: &AuditConfig,
    launcher: &L,
    log_queue: &LogQueue,
) -> Result<AuditResult> {
    let start_time = Instant::now();

    info!(
        root = %config.root,
        target = %config.target_display(),
        "Starting audit"
    );
    privilege::log_identity()?;

    let checker_queue = BatchQueue::new(CHECKER);
    let scanner_queue = BatchQueue::new(SCANNER);

    checker_queue.seed(Batch::root(config.root.clone()))?;

    let checker = launcher.launch(
        checker_queue.receiver(),
        scanner_queue.sender(),
        log_queue.sender(),
    )?;

    let scanned = Scanner::new(config.scan_options.clone())
        .run(&mut scanner_queue.receiver(), &mut checker_queue.sender());

    // Always join, even if the scanner failed: it already told the checker
    // to shut down
    let role = checker.role();
    let joined = checker.join();
    if let (Err(_), Err(e)) = (&scanned, &joined) {
        warn!(role, error = %e, "Also failed");
    }
    let scanner = scanned?;
    joined?;

    let duration = start_time.elapsed();
    let batches_checked = checker_queue.stats().throughput();

    info!(
        rounds = scanner.rounds,
        listed = scanner.dirs_listed,
        skipped = scanner.skipped,
        duration_ms = duration.as_millis() as u64,
        "Audit completed"
    );

    Ok(AuditResult {
        scanner,
        batches_checked,
        duration,
    })
}
