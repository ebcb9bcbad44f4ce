//! PID file ownership.
//!
//! The PID file is the only cross-process record that a supervised service is
//! running. It holds the decimal PID of the daemon and nothing else. A start
//! claims the file exclusively, so an existing file always blocks a second
//! instance; only `restart --force` removes a file it did not create.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;

use camino::{Utf8Path, Utf8PathBuf};
use nix::errno::Errno;
use nix::unistd::{Pid, chown};
use thiserror::Error;
use tracing::{debug, info};

use super::PROCESS_TARGET;
use super::files::{PID_FILE_MODE, atomic_write, remove_if_present};
use super::privileges::ProcessIdentity;

/// Errors raised while manipulating the PID file.
#[derive(Debug, Error)]
pub enum PidFileError {
    /// A PID file already exists, so another instance is assumed to be live.
    #[error("daemon already running with pid {pid} (pid file '{path}')")]
    AlreadyRunning {
        /// Existing PID file.
        path: Utf8PathBuf,
        /// PID recorded in the file, or `unknown` when unreadable.
        pid: String,
    },
    /// Creating or writing the PID file failed.
    #[error("failed to write pid file '{path}': {source}")]
    Write {
        /// PID file path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Reading the PID file failed.
    #[error("failed to read pid file '{path}': {source}")]
    Read {
        /// PID file path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The PID file did not contain a positive process ID.
    #[error("pid file '{path}' does not contain a valid pid: '{content}'")]
    Invalid {
        /// PID file path.
        path: Utf8PathBuf,
        /// Trimmed file content.
        content: String,
    },
    /// Removing the PID file failed.
    #[error("failed to remove pid file '{path}': {source}")]
    Remove {
        /// PID file path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Handing the PID file to the service identity failed.
    #[error("failed to change owner of pid file '{path}': {source}")]
    Chown {
        /// PID file path.
        path: Utf8PathBuf,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
}

/// Reads and writes the PID file at a fixed path.
#[derive(Debug, Clone)]
pub struct PidFileStore {
    path: Utf8PathBuf,
}

impl PidFileStore {
    /// Creates a store for `path`. Nothing touches the filesystem yet.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the PID file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Whether a PID file is present.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Fails with [`PidFileError::AlreadyRunning`] when a PID file exists.
    pub fn ensure_vacant(&self) -> Result<(), PidFileError> {
        if self.exists() {
            Err(self.already_running())
        } else {
            Ok(())
        }
    }

    /// Creates the PID file exclusively and records `pid`.
    ///
    /// An existing file is never overwritten; the caller receives
    /// [`PidFileError::AlreadyRunning`] with whatever PID it holds.
    pub fn claim(&self, pid: Pid) -> Result<(), PidFileError> {
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(PID_FILE_MODE)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                return Err(self.already_running());
            }
            Err(source) => return Err(self.write_error(source)),
        };
        file.write_all(pid.to_string().as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|source| self.write_error(source))?;
        info!(
            target: PROCESS_TARGET,
            pid = pid.as_raw(),
            file = %self.path,
            "pid file claimed"
        );
        Ok(())
    }

    /// Replaces the PID file with `pid`.
    pub fn write(&self, pid: Pid) -> Result<(), PidFileError> {
        atomic_write(&self.path, pid.to_string().as_bytes())
            .map_err(|source| self.write_error(source))?;
        debug!(
            target: PROCESS_TARGET,
            pid = pid.as_raw(),
            file = %self.path,
            "pid file written"
        );
        Ok(())
    }

    /// Reads the recorded PID, returning `None` when no file exists.
    pub fn read(&self) -> Result<Option<Pid>, PidFileError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PidFileError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        parse_pid(content.trim())
            .map(Some)
            .ok_or_else(|| PidFileError::Invalid {
                path: self.path.clone(),
                content: content.trim().to_owned(),
            })
    }

    /// Deletes the PID file. Returns whether a file was actually removed.
    pub fn remove(&self) -> Result<bool, PidFileError> {
        let removed = remove_if_present(&self.path).map_err(|source| PidFileError::Remove {
            path: self.path.clone(),
            source,
        })?;
        if removed {
            info!(target: PROCESS_TARGET, file = %self.path, "pid file removed");
        }
        Ok(removed)
    }

    /// Transfers ownership of the PID file to `identity`.
    pub fn chown(&self, identity: &ProcessIdentity) -> Result<(), PidFileError> {
        chown(
            self.path.as_std_path(),
            Some(identity.uid()),
            Some(identity.gid()),
        )
        .map_err(|source| PidFileError::Chown {
            path: self.path.clone(),
            source,
        })
    }

    fn already_running(&self) -> PidFileError {
        let pid = fs::read_to_string(&self.path)
            .ok()
            .and_then(|content| parse_pid(content.trim()))
            .map_or_else(|| "unknown".to_owned(), |pid| pid.to_string());
        PidFileError::AlreadyRunning {
            path: self.path.clone(),
            pid,
        }
    }

    fn write_error(&self, source: io::Error) -> PidFileError {
        PidFileError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

fn parse_pid(text: &str) -> Option<Pid> {
    text.parse::<i32>()
        .ok()
        .filter(|raw| *raw > 0)
        .map(Pid::from_raw)
}
