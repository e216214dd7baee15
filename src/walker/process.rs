//! The checker as a separate OS process
//!
//! Credentials are per process, so the checker cannot be a thread of the
//! scanner. The binary re-executes itself with the hidden `checker`
//! subcommand and talks to the child over its standard streams:
//!
//! ```text
//!  parent (root)                                child (target identity)
//!  checker queue ──feeder──▶ stdin   (JSON frames) ──▶ Checker::run
//!  scanner queue ◀──relay─── stdout  (JSON frames) ◀──┘
//!  log queue     ◀──relay─── stderr  (JSON LogRecords)
//! ```
//!
//! Each frame is one `Message<Batch>` serialized as a single JSON line.

use crate::error::{AuditError, WorkerError};
use crate::logging::{self, JsonLinesSink, LogListener, LogQueue, LogRecord, LogSender, Severity};
use crate::privilege::{self, TargetIdentity};
use crate::walker::checker::{Checker, CheckerStats, EffectiveAccess, ExpansionPolicy};
use crate::walker::launcher::{spawn_thread, CheckerLauncher, RoleHandle};
use crate::walker::queue::{BatchReceiver, BatchSender, BatchSink, BatchSource};
use crate::walker::types::{Batch, Message};
use crate::walker::CHECKER;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use tracing::{debug, error, warn};

/// Reads `Message<Batch>` frames, one JSON document per line
pub struct FrameReader<R: BufRead> {
    reader: R,
    line: String,
}

impl<R: BufRead> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
        }
    }
}

impl<R: BufRead> BatchSource for FrameReader<R> {
    fn recv(&mut self) -> Message<Batch> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => {
                    debug!("Pipe closed");
                    return Message::Shutdown;
                }
                Ok(_) if self.line.trim().is_empty() => continue,
                Ok(_) => {
                    return serde_json::from_str(&self.line).unwrap_or_else(|e| {
                        warn!(error = %e, "Malformed frame, treating as shutdown");
                        Message::Shutdown
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Pipe read failed, treating as shutdown");
                    return Message::Shutdown;
                }
            }
        }
    }
}

/// Writes `Message<Batch>` frames, flushing after each one
pub struct FrameWriter<W: Write> {
    writer: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> BatchSink for FrameWriter<W> {
    fn send(&mut self, msg: Message<Batch>) -> Result<(), WorkerError> {
        serde_json::to_writer(&mut self.writer, &msg)
            .map_err(|e| WorkerError::Frame(e.to_string()))?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Spawns this executable as the checker process
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    target: TargetIdentity,
    policy: ExpansionPolicy,
    verbose: bool,
}

impl ProcessLauncher {
    /// `program` must understand the hidden `checker` subcommand
    pub fn new(
        program: PathBuf,
        target: TargetIdentity,
        policy: ExpansionPolicy,
        verbose: bool,
    ) -> Self {
        Self {
            program,
            target,
            policy,
            verbose,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("checker")
            .arg("--uid")
            .arg(self.target.uid.to_string())
            .arg("--gid")
            .arg(self.target.gid.to_string());
        if self.policy == ExpansionPolicy::Exhaustive {
            cmd.arg("--exhaustive");
        }
        if self.verbose {
            cmd.arg("--verbose");
        }
        cmd.env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl CheckerLauncher for ProcessLauncher {
    fn launch(
        &self,
        input: BatchReceiver,
        output: BatchSender,
        logs: LogSender,
    ) -> Result<RoleHandle, WorkerError> {
        let mut child = self.command().spawn().map_err(|e| WorkerError::SpawnFailed {
            role: CHECKER,
            reason: format!("{}: {}", self.program.display(), e),
        })?;
        debug!(pid = child.id(), "Checker process started");

        match start_bridges(&mut child, input, output, logs) {
            Ok(bridges) => RoleHandle::spawn(CHECKER, move || supervise(child, bridges)),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }
}

type Bridges = Vec<std::thread::JoinHandle<()>>;

/// Threads that move frames between the in-process queues and the pipes
fn start_bridges(
    child: &mut Child,
    input: BatchReceiver,
    output: BatchSender,
    logs: LogSender,
) -> Result<Bridges, WorkerError> {
    let missing = |stream: &str| WorkerError::SpawnFailed {
        role: CHECKER,
        reason: format!("{} not captured", stream),
    };
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

    let feeder = spawn_thread("checker-feeder", move || {
        let mut writer = FrameWriter::new(stdin);
        loop {
            let msg = input.recv();
            let last = msg.is_shutdown();
            if let Err(e) = writer.send(msg) {
                // Child already exited after an early stop
                debug!(error = %e, "Checker input closed");
                break;
            }
            if last {
                break;
            }
        }
    })?;

    let relay = spawn_thread("checker-relay", move || {
        let mut reader = FrameReader::new(BufReader::new(stdout));
        loop {
            let msg = reader.recv();
            let last = msg.is_shutdown();
            if let Err(e) = output.send(msg) {
                warn!(error = %e, "Scanner queue closed");
                break;
            }
            if last {
                break;
            }
        }
    })?;

    let log_relay = spawn_thread("checker-logs", move || relay_logs(BufReader::new(stderr), &logs))?;

    Ok(vec![feeder, relay, log_relay])
}

/// Forward the child's log records; anything that is not a record (a panic
/// message, say) is forwarded as a warning
fn relay_logs<R: BufRead>(mut reader: R, logs: &LogSender) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                let record = serde_json::from_str::<LogRecord>(line)
                    .unwrap_or_else(|_| LogRecord::new(CHECKER, Severity::Warn, line));
                if logs.send(Message::Work(record)).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Checker log pipe failed");
                break;
            }
        }
    }
}

fn supervise(mut child: Child, bridges: Bridges) -> Result<(), AuditError> {
    let status = child.wait().map_err(WorkerError::from)?;
    for bridge in bridges {
        if bridge.join().is_err() {
            warn!("Checker bridge thread panicked");
        }
    }

    if !status.success() {
        return Err(WorkerError::CheckerExit(status).into());
    }
    debug!("Checker process exited");
    Ok(())
}

/// Entry point of the checker process
///
/// Ships log records as JSON lines on stderr, drops to `target` and then
/// checks batches from stdin, writing denied batches to stdout. Shutdown is
/// always sent on stdout before returning, even if the drop fails.
pub fn run_checker_process(
    target: TargetIdentity,
    policy: ExpansionPolicy,
    verbose: bool,
) -> Result<CheckerStats, AuditError> {
    let log_queue = LogQueue::new();
    let listener = LogListener::start(&log_queue, Box::new(JsonLinesSink::new(io::stderr())))?;

    let subscriber = logging::subscriber(CHECKER, log_queue.sender(), verbose);
    let result = tracing::subscriber::with_default(subscriber, || {
        let mut input = FrameReader::new(io::stdin().lock());
        let mut output = FrameWriter::new(io::stdout().lock());

        let dropped = privilege::drop_privileges(target).and_then(|ctx| {
            privilege::log_identity()?;
            Ok(ctx)
        });
        let ctx = match dropped {
            Ok(ctx) => ctx,
            Err(e) => {
                error!("{}", e);
                let _ = output.send(Message::Shutdown);
                return Err(AuditError::from(e));
            }
        };
        debug!(
            groups = ?ctx.groups,
            umask = ?ctx.umask.map(|m| format!("{:03o}", m.bits())),
            "Checker credentials"
        );

        Checker::new(EffectiveAccess, policy).run(&mut input, &mut output)
    });

    listener.stop();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walker::types::DirPath;
    use crossbeam_channel::unbounded;
    use std::io::Cursor;

    #[test]
    fn test_frames_over_a_pipe() {
        let mut buf = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buf);
            writer
                .send(Message::Work(Batch::new(3, vec![DirPath::from("/srv/a")])))
                .unwrap();
            writer.send(Message::Shutdown).unwrap();
        }

        let mut reader = FrameReader::new(Cursor::new(buf));
        assert_eq!(
            reader.recv(),
            Message::Work(Batch::new(3, vec![DirPath::from("/srv/a")]))
        );
        assert!(reader.recv().is_shutdown());
        // EOF also reads as shutdown
        assert!(reader.recv().is_shutdown());
    }

    #[test]
    fn test_garbage_frame_reads_as_shutdown() {
        let mut reader = FrameReader::new(Cursor::new(b"\nnot json\n".to_vec()));
        assert!(reader.recv().is_shutdown());
    }

    #[test]
    fn test_relay_logs_wraps_raw_lines() {
        let record = LogRecord::new(CHECKER, Severity::Info, "Writable: /tmp/x");
        let mut input = serde_json::to_vec(&record).unwrap();
        input.extend_from_slice(b"\nthread 'main' panicked at src/main.rs\n");

        let (tx, rx) = unbounded();
        relay_logs(Cursor::new(input), &tx);

        let first = rx.try_recv().unwrap();
        assert_eq!(first, Message::Work(record));
        match rx.try_recv().unwrap() {
            Message::Work(raw) => {
                assert_eq!(raw.severity, Severity::Warn);
                assert_eq!(raw.role, CHECKER);
                assert!(raw.message.contains("panicked"));
            }
            Message::Shutdown => panic!("expected a record"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_command_line() {
        let launcher = ProcessLauncher::new(
            PathBuf::from("/usr/bin/writable-dirs"),
            TargetIdentity::new(1000, 1000),
            ExpansionPolicy::Exhaustive,
            true,
        );
        let cmd = launcher.command();
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec!["checker", "--uid", "1000", "--gid", "1000", "--exhaustive", "--verbose"]
        );
    }
}
