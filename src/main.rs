//! writable-dirs - Find directories a user can write to
//!
//! Entry point for the CLI application. The same binary also serves as the
//! checker process (hidden `checker` subcommand).

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use writable_dirs::attrs::run_bad_attrs;
use writable_dirs::config::{AuditConfig, CliArgs, Command};
use writable_dirs::logging::StderrSink;
use writable_dirs::privilege::{self, TargetIdentity};
use writable_dirs::walker::{run_checker_process, AuditCoordinator, ExpansionPolicy, ProcessLauncher};

fn main() -> ExitCode {
    let args = CliArgs::parse();

    // The checker already shipped its errors upstream as log records
    if let Some(Command::Checker {
        uid,
        gid,
        exhaustive,
        verbose,
    }) = args.command
    {
        let policy = if exhaustive {
            ExpansionPolicy::Exhaustive
        } else {
            ExpansionPolicy::DeniedOnly
        };
        return match run_checker_process(TargetIdentity::new(uid, gid), policy, verbose) {
            Ok(_) => ExitCode::SUCCESS,
            Err(_) => ExitCode::FAILURE,
        };
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: CliArgs) -> Result<()> {
    if let Some(Command::BadAttrs { dir, verbose }) = &args.command {
        run_bad_attrs(dir, *verbose, Box::new(StderrSink)).context("Inspection failed")?;
        return Ok(());
    }

    // Validate and create config
    let config = AuditConfig::from_args(args).context("Invalid configuration")?;

    privilege::require_superuser()?;

    let program = std::env::current_exe().context("Failed to locate own executable")?;
    let launcher = ProcessLauncher::new(program, config.target, config.policy, config.verbose);

    AuditCoordinator::new(config, launcher, Box::new(StderrSink))
        .run()
        .context("Audit failed")?;

    Ok(())
}
