//! Implements the detach sequence for the `wardend` process.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;

use camino::{Utf8Path, Utf8PathBuf};
use nix::errno::Errno;
use nix::libc::{self, STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO, mode_t};
use nix::sys::stat::{Mode, umask};
use nix::unistd::{ForkResult, chdir, dup2, fork, getpid, setsid};
use strum::Display;
use thiserror::Error;
use tracing::{debug, info};

use warden_config::EffectiveConfig;

use super::PROCESS_TARGET;

const DEV_NULL: &str = "/dev/null";

/// Abstraction over daemonisation strategies.
pub trait Daemonizer: Send + Sync {
    /// Detaches the process into the background.
    ///
    /// Only the final descendant returns; intermediate processes exit.
    fn daemonize(&self, config: &EffectiveConfig) -> Result<(), DaemonizeError>;
}

/// Which of the two forks failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ForkStage {
    /// The fork that leaves the invoking shell.
    First,
    /// The fork that gives up session leadership.
    Second,
}

/// Errors surfaced by the daemonisation backend.
#[derive(Debug, Error)]
pub enum DaemonizeError {
    /// A fork failed.
    #[error("{stage} fork failed: {source}")]
    Fork {
        /// Fork that failed.
        stage: ForkStage,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Creating a new session failed.
    #[error("failed to create a new session: {source}")]
    Setsid {
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Changing into the run directory failed.
    #[error("failed to change directory to '{path}': {source}")]
    Chdir {
        /// Run directory.
        path: Utf8PathBuf,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Opening a redirection target failed.
    #[error("failed to open '{path}' for standard streams: {source}")]
    Redirect {
        /// File that could not be opened.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Duplicating a descriptor onto a standard stream failed.
    #[error("failed to redirect standard streams: {source}")]
    Dup {
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
}

/// Daemoniser performing the classic double fork.
///
/// Must run while the process is single threaded: only the calling thread
/// survives a fork.
#[derive(Debug, Default)]
pub struct ForkingDaemonizer;

impl ForkingDaemonizer {
    /// Builds a new forking daemoniser.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Daemonizer for ForkingDaemonizer {
    fn daemonize(&self, config: &EffectiveConfig) -> Result<(), DaemonizeError> {
        info!(
            target: PROCESS_TARGET,
            run_dir = %config.run_dir(),
            "daemonising into background"
        );
        fork_and_exit_parent(ForkStage::First)?;
        setsid().map_err(|source| DaemonizeError::Setsid { source })?;
        chdir(config.run_dir().as_std_path()).map_err(|source| DaemonizeError::Chdir {
            path: config.run_dir().to_path_buf(),
            source,
        })?;
        umask(Mode::from_bits_truncate(config.umask() as mode_t));
        fork_and_exit_parent(ForkStage::Second)?;
        redirect_standard_streams(config.log_file())?;
        info!(
            target: PROCESS_TARGET,
            pid = getpid().as_raw(),
            "daemon process detached; continuing in grandchild"
        );
        Ok(())
    }
}

/// Daemoniser that leaves the process attached to its terminal.
#[derive(Debug, Default)]
pub struct ForegroundDaemonizer;

impl Daemonizer for ForegroundDaemonizer {
    fn daemonize(&self, _config: &EffectiveConfig) -> Result<(), DaemonizeError> {
        debug!(target: PROCESS_TARGET, "staying in the foreground");
        Ok(())
    }
}

fn fork_and_exit_parent(stage: ForkStage) -> Result<(), DaemonizeError> {
    // SAFETY: the supervisor forks before starting any thread, so the child
    // inherits a consistent address space.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            debug!(
                target: PROCESS_TARGET,
                %stage,
                child = child.as_raw(),
                "fork parent exiting"
            );
            // SAFETY: `_exit` ends the process without running destructors or
            // flushing buffers shared with the child.
            unsafe { libc::_exit(0) }
        }
        Ok(ForkResult::Child) => Ok(()),
        Err(source) => Err(DaemonizeError::Fork { stage, source }),
    }
}

fn redirect_standard_streams(log_file: &Utf8Path) -> Result<(), DaemonizeError> {
    let null = File::open(DEV_NULL).map_err(|source| DaemonizeError::Redirect {
        path: Utf8PathBuf::from(DEV_NULL),
        source,
    })?;
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(|source| DaemonizeError::Redirect {
            path: log_file.to_path_buf(),
            source,
        })?;

    for (from, onto) in [
        (null.as_raw_fd(), STDIN_FILENO),
        (log.as_raw_fd(), STDOUT_FILENO),
        (log.as_raw_fd(), STDERR_FILENO),
    ] {
        dup2(from, onto).map_err(|source| DaemonizeError::Dup { source })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_config::{ConfigLayer, default_layer, resolve};

    #[test]
    fn foreground_daemonizer_returns_immediately() {
        let overrides = ConfigLayer::new().with("app", "warden.listener");
        let config = resolve(&default_layer(), &ConfigLayer::new(), &overrides)
            .expect("config should resolve");
        ForegroundDaemonizer
            .daemonize(&config)
            .expect("foreground detach is a no-op");
    }

    #[test]
    fn fork_errors_name_the_stage() {
        let error = DaemonizeError::Fork {
            stage: ForkStage::Second,
            source: Errno::EAGAIN,
        };
        assert!(error.to_string().starts_with("second fork failed"));
    }
}
