//! Defines the unified error surface for daemon supervision.

use std::time::Duration;

use camino::Utf8PathBuf;
use nix::errno::Errno;
use thiserror::Error;

use warden_config::ConfigError;

use crate::service::ServiceError;
use crate::telemetry::TelemetryError;

use super::daemonizer::DaemonizeError;
use super::pidfile::PidFileError;
use super::privileges::IdentityError;
use super::signals::SignalError;

/// Errors surfaced while starting, stopping, or restarting the service.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Configuration failed to load or validate.
    #[error("invalid configuration: {source}")]
    Config {
        /// Underlying configuration error.
        #[source]
        source: ConfigError,
    },
    /// Telemetry could not be installed.
    #[error("failed to initialise logging: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// PID file handling failed, including the already-running case.
    #[error(transparent)]
    PidFile(#[from] PidFileError),
    /// The service identity could not be resolved or assumed.
    #[error("failed to switch identity: {source}")]
    Identity {
        /// Underlying identity error.
        #[source]
        source: IdentityError,
    },
    /// Detaching from the terminal failed.
    #[error("failed to daemonise: {source}")]
    Daemonize {
        /// Underlying daemonisation error.
        #[source]
        source: DaemonizeError,
    },
    /// Signal routing could not be installed.
    #[error("failed to install signal routing: {source}")]
    Signals {
        /// Underlying signal error.
        #[source]
        source: SignalError,
    },
    /// The service failed to build, configure, or serve.
    #[error("service '{app}' failed: {source}")]
    Service {
        /// Configured application.
        app: String,
        /// Underlying service error.
        #[source]
        source: ServiceError,
    },
    /// No PID file exists, so there is nothing to stop.
    #[error("no pid file at '{path}'; is the daemon running?")]
    NotRunning {
        /// Expected PID file path.
        path: Utf8PathBuf,
    },
    /// Sending a signal to the recorded PID failed.
    #[error("failed to signal pid {pid}: {source}")]
    SignalDelivery {
        /// Target process.
        pid: i32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// The previous instance kept its PID file past the stop timeout.
    #[error("daemon did not release '{path}' within {timeout:?}; use --force to override")]
    ShutdownTimeout {
        /// PID file that is still present.
        path: Utf8PathBuf,
        /// How long the supervisor waited.
        timeout: Duration,
    },
    /// An operation was requested from a state that does not allow it.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Requested operation.
        operation: &'static str,
        /// Current supervisor state.
        state: String,
    },
}

impl SupervisorError {
    /// Whether the error describes a benign outcome that should not fail the
    /// invoking command.
    #[must_use]
    pub const fn is_benign(&self) -> bool {
        matches!(self, Self::NotRunning { .. })
    }
}

impl From<ConfigError> for SupervisorError {
    fn from(source: ConfigError) -> Self {
        Self::Config { source }
    }
}

impl From<TelemetryError> for SupervisorError {
    fn from(source: TelemetryError) -> Self {
        Self::Telemetry { source }
    }
}

impl From<IdentityError> for SupervisorError {
    fn from(source: IdentityError) -> Self {
        Self::Identity { source }
    }
}

impl From<DaemonizeError> for SupervisorError {
    fn from(source: DaemonizeError) -> Self {
        Self::Daemonize { source }
    }
}

impl From<SignalError> for SupervisorError {
    fn from(source: SignalError) -> Self {
        Self::Signals { source }
    }
}
