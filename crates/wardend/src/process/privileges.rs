//! Resolves the service identity and drops root privileges.

use nix::errno::Errno;
use nix::unistd::{Gid, Group, Uid, User, geteuid, setgid, setgroups, setuid};
use thiserror::Error;
use tracing::{debug, info};

use super::PROCESS_TARGET;

/// Errors raised while resolving or assuming an identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The configured user does not exist.
    #[error("unknown user '{user}'")]
    UnknownUser {
        /// Configured user name.
        user: String,
    },
    /// The user database lookup itself failed.
    #[error("failed to look up user '{user}': {source}")]
    Lookup {
        /// Configured user name.
        user: String,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Resetting supplementary groups failed.
    #[error("failed to reset supplementary groups to {gid}: {source}")]
    SetGroups {
        /// Target group.
        gid: u32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Switching the group failed.
    #[error("failed to switch to group {gid}: {source}")]
    SetGid {
        /// Target group.
        gid: u32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Switching the user failed.
    #[error("failed to switch to user {uid}: {source}")]
    SetUid {
        /// Target user.
        uid: u32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
}

/// A resolved user and group pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    user: String,
    uid: Uid,
    gid: Gid,
}

impl ProcessIdentity {
    /// User name the identity was resolved from.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Numeric user ID.
    #[must_use]
    pub const fn uid(&self) -> Uid {
        self.uid
    }

    /// Numeric group ID.
    #[must_use]
    pub const fn gid(&self) -> Gid {
        self.gid
    }
}

/// Outcome of [`PrivilegeManager::drop_privileges`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivilegeDrop {
    /// The process was not running as root, so nothing changed.
    Unprivileged,
    /// The process now runs as the contained identity.
    Dropped(ProcessIdentity),
}

/// Decides whether and how the process gives up root.
#[derive(Debug, Clone, Copy)]
pub struct PrivilegeManager {
    euid: Uid,
}

impl PrivilegeManager {
    /// Captures the effective UID of the current process.
    #[must_use]
    pub fn current() -> Self {
        Self { euid: geteuid() }
    }

    /// Builds a manager that behaves as if the effective UID were `euid`.
    #[must_use]
    pub const fn with_euid(euid: Uid) -> Self {
        Self { euid }
    }

    /// Whether the process runs as root.
    #[must_use]
    pub const fn is_elevated(&self) -> bool {
        self.euid.is_root()
    }

    /// Looks up `user` and, when given, `group`.
    ///
    /// An unknown group falls back to the user's primary group.
    pub fn resolve_identity(
        &self,
        user: &str,
        group: Option<&str>,
    ) -> Result<ProcessIdentity, IdentityError> {
        let account = User::from_name(user)
            .map_err(|source| IdentityError::Lookup {
                user: user.to_owned(),
                source,
            })?
            .ok_or_else(|| IdentityError::UnknownUser {
                user: user.to_owned(),
            })?;

        let gid = group.map_or(account.gid, |name| match Group::from_name(name) {
            Ok(Some(found)) => found.gid,
            Ok(None) | Err(_) => {
                debug!(
                    target: PROCESS_TARGET,
                    group = name,
                    user,
                    "group not found; using the user's primary group"
                );
                account.gid
            }
        });

        Ok(ProcessIdentity {
            user: account.name,
            uid: account.uid,
            gid,
        })
    }

    /// Switches to `user`/`group` when running as root.
    ///
    /// Non-root callers get [`PrivilegeDrop::Unprivileged`] without any lookup
    /// or system call.
    pub fn drop_privileges(
        &self,
        user: &str,
        group: Option<&str>,
    ) -> Result<PrivilegeDrop, IdentityError> {
        if !self.is_elevated() {
            debug!(
                target: PROCESS_TARGET,
                euid = self.euid.as_raw(),
                "not running as root; keeping current identity"
            );
            return Ok(PrivilegeDrop::Unprivileged);
        }

        let identity = self.resolve_identity(user, group)?;
        self.assume(identity)
    }

    /// Switches to an already resolved `identity` when running as root.
    ///
    /// Supplementary groups are reset and the group is changed before the
    /// user; once the user changes the group can no longer be switched.
    pub fn assume(&self, identity: ProcessIdentity) -> Result<PrivilegeDrop, IdentityError> {
        if !self.is_elevated() {
            return Ok(PrivilegeDrop::Unprivileged);
        }
        let gid = identity.gid;
        let uid = identity.uid;
        setgroups(&[gid]).map_err(|source| IdentityError::SetGroups {
            gid: gid.as_raw(),
            source,
        })?;
        setgid(gid).map_err(|source| IdentityError::SetGid {
            gid: gid.as_raw(),
            source,
        })?;
        setuid(uid).map_err(|source| IdentityError::SetUid {
            uid: uid.as_raw(),
            source,
        })?;
        info!(
            target: PROCESS_TARGET,
            user = identity.user(),
            uid = uid.as_raw(),
            gid = gid.as_raw(),
            "dropped root privileges"
        );
        Ok(PrivilegeDrop::Dropped(identity))
    }
}
