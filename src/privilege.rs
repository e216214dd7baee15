//! Process identity and the one-way privilege drop
//!
//! The scanner keeps the identity the process started with (must be root).
//! The checker process calls [`drop_privileges`] exactly once before it
//! touches the filesystem; there is no way back.

use crate::error::PrivilegeError;
use nix::sys::stat::{umask, Mode};
use nix::unistd::{getgroups, getresgid, getresuid, setgid, setgroups, setuid, Gid, Uid};
use std::fmt;
use tracing::info;

/// umask applied after the drop
pub const RESTRICTIVE_UMASK: u32 = 0o077;

/// The user/group being audited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetIdentity {
    pub uid: Uid,
    pub gid: Gid,
}

impl TargetIdentity {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid: Uid::from_raw(uid),
            gid: Gid::from_raw(gid),
        }
    }
}

impl fmt::Display for TargetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uid={} gid={}", self.uid, self.gid)
    }
}

/// Credentials a process runs under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeContext {
    pub uid: Uid,
    pub gid: Gid,
    pub groups: Vec<Gid>,
    /// `None` when the kernel does not expose it
    pub umask: Option<Mode>,
}

impl PrivilegeContext {
    /// Effective credentials of the calling process
    pub fn current() -> Result<Self, PrivilegeError> {
        Ok(Self {
            uid: Uid::effective(),
            gid: Gid::effective(),
            groups: getgroups().map_err(PrivilegeError::Query)?,
            umask: read_umask(),
        })
    }

    pub fn is_superuser(&self) -> bool {
        self.uid.is_root()
    }
}

/// Check whether the process is running as root
pub fn is_superuser() -> bool {
    Uid::effective().is_root()
}

/// Refuse to continue unless running as root
pub fn require_superuser() -> Result<(), PrivilegeError> {
    if is_superuser() {
        return Ok(());
    }
    Err(PrivilegeError::NotSuperuser {
        euid: Uid::effective().as_raw(),
    })
}

/// Irreversibly switch the whole process to `target`
///
/// Order is fixed: supplementary groups, gid, uid, umask. Once the uid is
/// gone the process can no longer change its groups.
pub fn drop_privileges(target: TargetIdentity) -> Result<PrivilegeContext, PrivilegeError> {
    require_superuser()?;

    setgroups(&[]).map_err(|source| PrivilegeError::DropFailed {
        step: "clear supplementary groups",
        source,
    })?;
    setgid(target.gid).map_err(|source| PrivilegeError::DropFailed {
        step: "set group id",
        source,
    })?;
    setuid(target.uid).map_err(|source| PrivilegeError::DropFailed {
        step: "set user id",
        source,
    })?;
    umask(Mode::from_bits_truncate(RESTRICTIVE_UMASK));

    verify_dropped(target)?;
    info!(target_identity = %target, "Privileges dropped");
    PrivilegeContext::current()
}

/// Real, effective and saved ids must all be the target, and root must be
/// unreachable
fn verify_dropped(target: TargetIdentity) -> Result<(), PrivilegeError> {
    let uids = getresuid().map_err(PrivilegeError::Query)?;
    if uids.real != target.uid || uids.effective != target.uid || uids.saved != target.uid {
        return Err(PrivilegeError::NotDropped(format!(
            "uids are {}/{}/{}, expected {}",
            uids.real, uids.effective, uids.saved, target.uid
        )));
    }

    let gids = getresgid().map_err(PrivilegeError::Query)?;
    if gids.real != target.gid || gids.effective != target.gid || gids.saved != target.gid {
        return Err(PrivilegeError::NotDropped(format!(
            "gids are {}/{}/{}, expected {}",
            gids.real, gids.effective, gids.saved, target.gid
        )));
    }

    if !target.uid.is_root() && setuid(Uid::from_raw(0)).is_ok() {
        return Err(PrivilegeError::NotDropped("root could be regained".into()));
    }

    Ok(())
}

/// Log real/effective/saved ids of the calling process
pub fn log_identity() -> Result<(), PrivilegeError> {
    let uids = getresuid().map_err(PrivilegeError::Query)?;
    info!(
        real = %uids.real,
        effective = %uids.effective,
        saved = %uids.saved,
        "User IDs"
    );

    let gids = getresgid().map_err(PrivilegeError::Query)?;
    info!(
        real = %gids.real,
        effective = %gids.effective,
        saved = %gids.saved,
        "Group IDs"
    );
    Ok(())
}

/// Reading the umask through umask(2) would briefly change it for every
/// thread, so take it from procfs instead
fn read_umask() -> Option<Mode> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_umask(&status)
}

fn parse_umask(status: &str) -> Option<Mode> {
    let value = status
        .lines()
        .find_map(|line| line.strip_prefix("Umask:"))?
        .trim();
    let bits = u32::from_str_radix(value, 8).ok()?;
    Some(Mode::from_bits_truncate(bits as nix::libc::mode_t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_superuser_matches_euid() {
        assert_eq!(require_superuser().is_ok(), Uid::effective().is_root());
    }

    #[test]
    fn test_drop_refused_without_root() {
        if is_superuser() {
            // Dropping here would drop the whole test process
            return;
        }
        let err = drop_privileges(TargetIdentity::new(65534, 65534)).unwrap_err();
        assert!(matches!(err, PrivilegeError::NotSuperuser { .. }));
    }

    #[test]
    fn test_current_context() {
        let ctx = PrivilegeContext::current().unwrap();
        assert_eq!(ctx.uid, Uid::effective());
        assert_eq!(ctx.is_superuser(), is_superuser());
    }

    #[test]
    fn test_parse_umask() {
        let status = "Name:\tcat\nUmask:\t0022\nState:\tR (running)\n";
        assert_eq!(parse_umask(status), Some(Mode::from_bits_truncate(0o022)));
        assert_eq!(parse_umask("Name:\tcat\n"), None);
    }

    #[test]
    fn test_target_display() {
        assert_eq!(TargetIdentity::new(1000, 100).to_string(), "uid=1000 gid=100");
    }
}
