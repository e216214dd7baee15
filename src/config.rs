//! Configuration types for writable-dirs
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - User and group resolution against the system databases

use crate::error::ConfigError;
use crate::privilege::TargetIdentity;
use crate::walker::{DirPath, ExpansionPolicy, ScanOptions};
use clap::Parser;
use nix::unistd::{Gid, Group, Uid, User};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// Default directory to audit
const DEFAULT_ROOT: &str = "/";

/// Find directories a user can write to
#[derive(Parser, Debug, Clone)]
#[command(
    name = "writable-dirs",
    version,
    about = "Find directories a user or group can write to",
    long_about = "Walks a directory tree as root and reports every directory the given \
                  user/group can write to.\n\n\
                  Listing runs with full privileges; access is tested by a separate process \
                  that has dropped to the audited identity, so results reflect what that \
                  user can really do. Subtrees below a writable directory are not descended.",
    after_help = "EXAMPLES:\n    \
        writable-dirs -u alice\n    \
        writable-dirs /srv -u www-data -g www-data\n    \
        writable-dirs / -u alice -x --exclude '^/proc' --exclude '^/sys'\n    \
        writable-dirs /home -u 1001 --exhaustive -v\n    \
        writable-dirs bad-attrs /var/log",
    args_conflicts_with_subcommands = true,
    subcommand_negates_reqs = true
)]
pub struct CliArgs {
    /// Directory to audit
    #[arg(value_name = "DIR")]
    pub root_dir: Option<PathBuf>,

    /// Subcommand (bad-attrs)
    #[command(subcommand)]
    pub command: Option<Command>,

    /// User to audit (name or numeric uid)
    #[arg(short = 'u', long, required = true, value_name = "USER")]
    pub user: Option<String>,

    /// Group to audit (name or numeric gid; defaults to the user's primary group)
    #[arg(short = 'g', long, value_name = "GROUP")]
    pub group: Option<String>,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Expand every directory, not only those the user cannot write to
    #[arg(long)]
    pub exhaustive: bool,

    /// Do not descend into other filesystems
    #[arg(short = 'x', long)]
    pub one_file_system: bool,

    /// Exclude paths matching pattern (can be repeated)
    #[arg(long = "exclude", value_name = "PATTERN", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,
}

/// Subcommands
#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Report files and directories with the immutable or append-only flag
    BadAttrs {
        /// Directory to inspect
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Verbose output
        #[arg(short = 'v', long)]
        verbose: bool,
    },

    /// Internal: the unprivileged access checker process
    #[command(hide = true)]
    Checker {
        #[arg(long)]
        uid: u32,

        #[arg(long)]
        gid: u32,

        #[arg(long)]
        exhaustive: bool,

        #[arg(short = 'v', long)]
        verbose: bool,
    },
}

/// Validated runtime configuration for an audit
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Absolute path of the directory to audit
    pub root: DirPath,

    /// Identity the checker drops to
    pub target: TargetIdentity,

    /// Resolved user name, for display
    pub user_name: String,

    /// Resolved group name, for display
    pub group_name: String,

    /// Which checked directories get expanded
    pub policy: ExpansionPolicy,

    /// Pruning applied by the scanner
    pub scan_options: ScanOptions,

    /// Verbose logging
    pub verbose: bool,
}

impl AuditConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        let user_arg = args.user.as_deref().ok_or(ConfigError::MissingOption("--user"))?;
        let (uid, user_name, primary_gid) = resolve_user(user_arg)?;
        if uid.is_root() {
            return Err(ConfigError::RootTarget(user_name));
        }

        let (gid, group_name) = match args.group.as_deref() {
            Some(group) => resolve_group(group)?,
            None => (primary_gid, group_display_name(primary_gid)),
        };

        let root = args.root_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT));
        let root = validate_root(&root)?;

        // Compile exclude patterns
        let exclude_patterns = args
            .exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidExcludePattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let policy = if args.exhaustive {
            ExpansionPolicy::Exhaustive
        } else {
            ExpansionPolicy::DeniedOnly
        };

        Ok(Self {
            root: DirPath::new(root),
            target: TargetIdentity { uid, gid },
            user_name,
            group_name,
            policy,
            scan_options: ScanOptions {
                one_file_system: args.one_file_system,
                exclude_patterns,
            },
            verbose: args.verbose,
        })
    }

    /// `user:group (uid=.. gid=..)`
    pub fn target_display(&self) -> String {
        format!("{}:{} ({})", self.user_name, self.group_name, self.target)
    }
}

/// Resolve a user name or numeric uid
///
/// Returns the uid, the user name and the primary gid. Numeric ids must
/// have a passwd entry too.
pub fn resolve_user(user: &str) -> Result<(Uid, String, Gid), ConfigError> {
    let lookup_err = |source| ConfigError::Lookup {
        name: user.to_string(),
        source,
    };

    let entry = match user.parse::<u32>() {
        Ok(raw) => User::from_uid(Uid::from_raw(raw)).map_err(lookup_err)?,
        Err(_) => User::from_name(user).map_err(lookup_err)?,
    };
    let entry = entry.ok_or_else(|| ConfigError::UnknownUser(user.to_string()))?;
    Ok((entry.uid, entry.name, entry.gid))
}

/// Resolve a group name or numeric gid
///
/// Numeric ids must have a group entry too.
pub fn resolve_group(group: &str) -> Result<(Gid, String), ConfigError> {
    let lookup_err = |source| ConfigError::Lookup {
        name: group.to_string(),
        source,
    };

    let entry = match group.parse::<u32>() {
        Ok(raw) => Group::from_gid(Gid::from_raw(raw)).map_err(lookup_err)?,
        Err(_) => Group::from_name(group).map_err(lookup_err)?,
    };
    let entry = entry.ok_or_else(|| ConfigError::UnknownGroup(group.to_string()))?;
    Ok((entry.gid, entry.name))
}

fn group_display_name(gid: Gid) -> String {
    match Group::from_gid(gid) {
        Ok(Some(entry)) => entry.name,
        _ => gid.to_string(),
    }
}

/// Make `root` absolute and check it is a directory
fn validate_root(root: &Path) -> Result<PathBuf, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidRoot {
        path: root.to_path_buf(),
        reason,
    };

    let absolute = std::path::absolute(root).map_err(|e| invalid(e.to_string()))?;
    match fs::metadata(&absolute) {
        Ok(meta) if meta.is_dir() => Ok(absolute),
        Ok(_) => Err(invalid("not a directory".into())),
        Err(e) => Err(invalid(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["writable-dirs"];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_cli_defaults() {
        let args = args(&["-u", "alice"]);
        assert_eq!(args.user.as_deref(), Some("alice"));
        assert!(args.root_dir.is_none());
        assert!(args.group.is_none());
        assert!(!args.exhaustive);
        assert!(args.command.is_none());
    }

    #[test]
    fn test_cli_requires_user() {
        assert!(CliArgs::try_parse_from(["writable-dirs", "/srv"]).is_err());
    }

    #[test]
    fn test_cli_subcommands_do_not_need_user() {
        let args = CliArgs::try_parse_from(["writable-dirs", "bad-attrs", "/var"]).unwrap();
        assert!(matches!(args.command, Some(Command::BadAttrs { .. })));

        let args = CliArgs::try_parse_from([
            "writable-dirs",
            "checker",
            "--uid",
            "1000",
            "--gid",
            "100",
            "--exhaustive",
        ])
        .unwrap();
        match args.command {
            Some(Command::Checker {
                uid,
                gid,
                exhaustive,
                verbose,
            }) => {
                assert_eq!((uid, gid), (1000, 100));
                assert!(exhaustive);
                assert!(!verbose);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    /// A non-root account whose primary group has an entry, as (uid, gid)
    fn system_account() -> Option<(String, String)> {
        ["nobody", "daemon", "bin"].iter().find_map(|name| {
            let user = User::from_name(name).ok()??;
            Group::from_gid(user.gid).ok()??;
            Some((user.uid.to_string(), user.gid.to_string()))
        })
    }

    #[test]
    fn test_from_args_numeric_ids() {
        let Some((uid, gid)) = system_account() else {
            return;
        };
        let dir = tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let config = AuditConfig::from_args(args(&[
            root,
            "-u",
            &uid,
            "-g",
            &gid,
            "--exhaustive",
            "-x",
            "--exclude",
            "^/proc",
        ]))
        .unwrap();

        assert_eq!(config.target.uid.to_string(), uid);
        assert_eq!(config.target.gid.to_string(), gid);
        assert_eq!(config.root.as_path(), dir.path());
        assert_eq!(config.policy, ExpansionPolicy::Exhaustive);
        assert!(config.scan_options.one_file_system);
        assert_eq!(config.scan_options.exclude_patterns.len(), 1);
    }

    #[test]
    fn test_group_defaults_to_primary() {
        let Some((uid, gid)) = system_account() else {
            return;
        };
        let dir = tempdir().unwrap();
        let config =
            AuditConfig::from_args(args(&[dir.path().to_str().unwrap(), "-u", &uid])).unwrap();
        assert_eq!(config.target.gid.to_string(), gid);
    }

    #[test]
    fn test_numeric_user_without_entry_rejected() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        // Assumes no passwd entry for this uid
        let err = AuditConfig::from_args(args(&[root, "-u", "54321", "-g", "0"])).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownUser(ref u) if u == "54321"));
    }

    #[test]
    fn test_numeric_group_without_entry_rejected() {
        // Assumes no group entry for this gid
        let err = resolve_group("54321").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownGroup(ref g) if g == "54321"));

        let Some((uid, _)) = system_account() else {
            return;
        };
        let dir = tempdir().unwrap();
        let err = AuditConfig::from_args(args(&[
            dir.path().to_str().unwrap(),
            "-u",
            &uid,
            "-g",
            "54321",
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownGroup(_)));
    }

    #[test]
    fn test_superuser_target_rejected() {
        let err = AuditConfig::from_args(args(&["/", "-u", "0", "-g", "0"])).unwrap_err();
        assert!(matches!(err, ConfigError::RootTarget(_)));
    }

    #[test]
    fn test_unknown_user_name() {
        let err = resolve_user("no-such-user-here").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownUser(_)));
    }

    #[test]
    fn test_invalid_root() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();

        let err = validate_root(&file).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
        assert!(validate_root(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_relative_root_made_absolute() {
        let root = validate_root(Path::new(".")).unwrap();
        assert!(root.is_absolute());
    }

    #[test]
    fn test_invalid_exclude_pattern() {
        let Some((uid, gid)) = system_account() else {
            return;
        };
        let dir = tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let err = AuditConfig::from_args(args(&[
            root, "-u", &uid, "-g", &gid, "--exclude", "(",
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidExcludePattern { .. }));
    }
}
