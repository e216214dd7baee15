//! Starting the checker role
//!
//! The coordinator does not care where the checker runs, only that it
//! consumes one queue, feeds the other and can be joined. The binary always
//! uses [`crate::walker::process::ProcessLauncher`]; [`InProcessLauncher`]
//! runs the role on a thread of the current process and is meant for
//! callers that already hold the target identity, and for tests.

use crate::error::{AuditError, WorkerError};
use crate::logging::{self, LogSender};
use crate::walker::checker::{AccessProbe, Checker, ExpansionPolicy};
use crate::walker::queue::{BatchReceiver, BatchSender};
use crate::walker::CHECKER;
use std::thread::{self, JoinHandle};

/// Starts the checker role wired to the given queues
pub trait CheckerLauncher {
    fn launch(
        &self,
        input: BatchReceiver,
        output: BatchSender,
        logs: LogSender,
    ) -> Result<RoleHandle, WorkerError>;
}

/// Spawn a named thread that logs through the caller's subscriber
pub(crate) fn spawn_thread<F, T>(name: &'static str, f: F) -> Result<JoinHandle<T>, WorkerError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|d| d.clone());
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
        .map_err(|e| WorkerError::SpawnFailed {
            role: name,
            reason: e.to_string(),
        })
}

/// A running role that can be awaited
pub struct RoleHandle {
    role: &'static str,
    handle: Option<JoinHandle<Result<(), AuditError>>>,
}

impl RoleHandle {
    pub fn spawn<F>(role: &'static str, f: F) -> Result<Self, WorkerError>
    where
        F: FnOnce() -> Result<(), AuditError> + Send + 'static,
    {
        let handle = spawn_thread(role, f)?;
        Ok(Self {
            role,
            handle: Some(handle),
        })
    }

    pub fn role(&self) -> &'static str {
        self.role
    }

    /// Wait for the role to finish
    pub fn join(mut self) -> Result<(), AuditError> {
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                Err(WorkerError::Panicked {
                    role: self.role,
                    message: "role thread panicked".into(),
                }
                .into())
            }),
            None => Ok(()),
        }
    }
}

/// Runs the checker on a thread of this process
///
/// No privilege drop happens here: the probe answers for whatever identity
/// this process has.
#[derive(Debug, Clone)]
pub struct InProcessLauncher<P> {
    probe: P,
    policy: ExpansionPolicy,
    verbose: bool,
}

impl<P> InProcessLauncher<P>
where
    P: AccessProbe + Clone + Send + 'static,
{
    pub fn new(probe: P, policy: ExpansionPolicy, verbose: bool) -> Self {
        Self {
            probe,
            policy,
            verbose,
        }
    }
}

impl<P> CheckerLauncher for InProcessLauncher<P>
where
    P: AccessProbe + Clone + Send + 'static,
{
    fn launch(
        &self,
        mut input: BatchReceiver,
        mut output: BatchSender,
        logs: LogSender,
    ) -> Result<RoleHandle, WorkerError> {
        let checker = Checker::new(self.probe.clone(), self.policy);
        let verbose = self.verbose;

        RoleHandle::spawn(CHECKER, move || {
            let subscriber = logging::subscriber(CHECKER, logs, verbose);
            tracing::subscriber::with_default(subscriber, || {
                checker.run(&mut input, &mut output).map(|_| ())
            })
        })
    }
}
