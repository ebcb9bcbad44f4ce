//! Start/stop/restart state machine around a single supervised service.

use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use nix::sys::signal::{Signal, kill};
use nix::unistd::getpid;
use strum::{Display, EnumString};
use tracing::{error, info, warn};

use warden_config::EffectiveConfig;

use crate::service::{Service, ServiceError, ServiceRegistry, ServiceSettings};

use super::control::{ControlHandle, PendingAction};
use super::daemonizer::Daemonizer;
use super::errors::SupervisorError;
use super::pidfile::{PidFileError, PidFileStore};
use super::privileges::{PrivilegeDrop, PrivilegeManager};
use super::signals::SignalListener;
use super::{FOREGROUND_ENV_VAR, POLL_INTERVAL, PROCESS_TARGET};

/// Lifecycle command requested by the operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Command {
    /// Start the service, detaching unless running in the foreground.
    #[default]
    Start,
    /// Signal a running instance to stop.
    Stop,
    /// Stop a running instance, wait for it to exit, and start again.
    Restart,
}

/// In-memory lifecycle state of this supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SupervisorState {
    /// Nothing is running.
    Stopped,
    /// Detaching, claiming the PID file, or building the service.
    Starting,
    /// Blocked in `serve`.
    Running,
    /// Tearing the service down.
    Stopping,
}

/// Launch mode for the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Fork into the background and detach from the controlling terminal.
    Background,
    /// Remain attached to the terminal; primarily used for debugging and tests.
    Foreground,
}

impl LaunchMode {
    /// Picks the mode from configuration, letting the environment force the
    /// foreground.
    #[must_use]
    pub fn detect(config: &EffectiveConfig) -> Self {
        if env::var_os(FOREGROUND_ENV_VAR).is_some() || !config.daemonize() {
            Self::Foreground
        } else {
            Self::Background
        }
    }
}

/// Process-level collaborators needed to control the daemon lifecycle.
pub struct ProcessControl<D, S> {
    /// Whether `start` detaches.
    pub mode: LaunchMode,
    /// Detach strategy.
    pub daemonizer: D,
    /// Signal source feeding the control handle.
    pub signals: S,
    /// Identity switching policy.
    pub privileges: PrivilegeManager,
}

/// Drives one service through start, stop, and restart.
pub struct Supervisor<D, S> {
    config: EffectiveConfig,
    registry: ServiceRegistry,
    process: ProcessControl<D, S>,
    pid_file: PidFileStore,
    control: ControlHandle,
    state: SupervisorState,
    claimed: bool,
    detached: bool,
}

impl<D, S> Supervisor<D, S>
where
    D: Daemonizer,
    S: SignalListener,
{
    /// Builds a stopped supervisor.
    #[must_use]
    pub fn new(
        config: EffectiveConfig,
        registry: ServiceRegistry,
        process: ProcessControl<D, S>,
    ) -> Self {
        let pid_file = PidFileStore::new(config.pid_file());
        Self {
            config,
            registry,
            process,
            pid_file,
            control: ControlHandle::new(),
            state: SupervisorState::Stopped,
            claimed: false,
            detached: false,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SupervisorState {
        self.state
    }

    /// Handle for requesting a stop or restart from another thread.
    #[must_use]
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    /// The PID file this supervisor manages.
    #[must_use]
    pub const fn pid_file(&self) -> &PidFileStore {
        &self.pid_file
    }

    /// Executes `command`.
    pub fn run(&mut self, command: Command) -> Result<(), SupervisorError> {
        info!(
            target: PROCESS_TARGET,
            %command,
            mode = ?self.process.mode,
            app = self.config.app(),
            "supervisor command"
        );
        match command {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::Restart => self.restart(),
        }
    }

    /// Starts the service and blocks until it stops.
    ///
    /// A restart request received while running stops the service and starts
    /// it again in this process without detaching a second time. The PID file
    /// claimed by the first cycle is kept across restarts. Returns once a stop
    /// request is handled or the service returns on its own; the PID file is
    /// removed in every case.
    pub fn start(&mut self) -> Result<(), SupervisorError> {
        self.require_stopped("start")?;
        self.pid_file.ensure_vacant()?;
        loop {
            match self.start_cycle() {
                Ok(Some(PendingAction::Restart)) => {
                    info!(target: PROCESS_TARGET, "restarting service in place");
                    self.state = SupervisorState::Stopping;
                }
                Ok(_) => {
                    self.shut_down();
                    info!(target: PROCESS_TARGET, "service stopped");
                    return Ok(());
                }
                Err(failure) => {
                    error!(target: PROCESS_TARGET, error = %failure, "service start failed");
                    self.shut_down();
                    return Err(failure);
                }
            }
        }
    }

    /// Asks the instance recorded in the PID file to stop with `SIGTERM`.
    pub fn stop(&mut self) -> Result<(), SupervisorError> {
        self.require_stopped("stop")?;
        let Some(pid) = self.pid_file.read()? else {
            warn!(
                target: PROCESS_TARGET,
                file = %self.pid_file.path(),
                "no pid file; daemon not running?"
            );
            return Err(SupervisorError::NotRunning {
                path: self.pid_file.path().to_path_buf(),
            });
        };
        kill(pid, Signal::SIGTERM).map_err(|source| SupervisorError::SignalDelivery {
            pid: pid.as_raw(),
            source,
        })?;
        info!(target: PROCESS_TARGET, pid = pid.as_raw(), "sent SIGTERM");
        Ok(())
    }

    /// Stops any running instance, waits for its PID file to disappear, and
    /// starts a new one.
    pub fn restart(&mut self) -> Result<(), SupervisorError> {
        match self.stop() {
            Ok(()) => self.wait_for_release()?,
            Err(SupervisorError::NotRunning { .. }) => {
                info!(target: PROCESS_TARGET, "no running instance; starting fresh");
            }
            Err(
                stale @ (SupervisorError::SignalDelivery { .. }
                | SupervisorError::PidFile(PidFileError::Invalid { .. })),
            ) if self.config.force() => {
                warn!(
                    target: PROCESS_TARGET,
                    error = %stale,
                    "discarding stale pid file (--force)"
                );
                self.pid_file.remove()?;
            }
            Err(failure) => return Err(failure),
        }
        self.start()
    }

    fn start_cycle(&mut self) -> Result<Option<PendingAction>, SupervisorError> {
        self.state = SupervisorState::Starting;
        if self.process.mode == LaunchMode::Background && !self.detached {
            self.process.daemonizer.daemonize(&self.config)?;
            self.detached = true;
        }
        self.apply_environment();
        if !self.claimed {
            self.pid_file.claim(getpid())?;
            self.claimed = true;
            if self.detached {
                self.assume_identity()?;
            }
        }

        let service = self.build_service()?;
        let _registration = self.process.signals.listen(self.control.clone())?;
        self.state = SupervisorState::Running;
        let served = if self.control.attach(Arc::clone(&service)) {
            info!(target: PROCESS_TARGET, "lifecycle request arrived before serving");
            Ok(())
        } else {
            info!(
                target: PROCESS_TARGET,
                app = self.config.app(),
                bind = %self.config.bind(),
                pid = getpid().as_raw(),
                "service running"
            );
            service.serve()
        };
        let pending = self.control.take_pending();
        served.map_err(|source| self.service_error(source))?;
        Ok(pending)
    }

    fn build_service(&self) -> Result<Arc<dyn Service>, SupervisorError> {
        let mut service = self
            .registry
            .build(self.config.app())
            .map_err(|source| self.service_error(source))?;
        service
            .configure(&ServiceSettings::from_config(&self.config))
            .map_err(|source| self.service_error(source))?;
        Ok(Arc::from(service))
    }

    fn apply_environment(&self) {
        let settings = self
            .config
            .settings_module()
            .map(|module| (self.config.settings_module_var(), module));
        let entries = self
            .config
            .environ()
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .chain(settings);
        for (key, value) in entries {
            // SAFETY: runs on the main path while no other thread of this
            // supervisor exists; the signal and worker threads of a previous
            // cycle have been joined.
            unsafe { env::set_var(key, value) };
        }
    }

    fn assume_identity(&mut self) -> Result<(), SupervisorError> {
        let privileges = self.process.privileges;
        let identity = privileges.resolve_identity(self.config.user(), self.config.group())?;
        if privileges.is_elevated() {
            self.pid_file.chown(&identity)?;
        }
        if let PrivilegeDrop::Dropped(assumed) = privileges.assume(identity)? {
            self.process.privileges = PrivilegeManager::with_euid(assumed.uid());
        }
        Ok(())
    }

    fn wait_for_release(&self) -> Result<(), SupervisorError> {
        let timeout = self.config.stop_timeout();
        let deadline = Instant::now().checked_add(timeout);
        while self.pid_file.exists() {
            if deadline.is_some_and(|limit| Instant::now() >= limit) {
                if self.config.force() {
                    warn!(
                        target: PROCESS_TARGET,
                        file = %self.pid_file.path(),
                        "previous instance did not exit; removing pid file (--force)"
                    );
                    self.pid_file.remove()?;
                    return Ok(());
                }
                return Err(SupervisorError::ShutdownTimeout {
                    path: self.pid_file.path().to_path_buf(),
                    timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
        Ok(())
    }

    fn shut_down(&mut self) {
        self.state = SupervisorState::Stopping;
        self.clean();
        self.state = SupervisorState::Stopped;
    }

    fn require_stopped(&self, operation: &'static str) -> Result<(), SupervisorError> {
        if self.state == SupervisorState::Stopped {
            Ok(())
        } else {
            Err(SupervisorError::InvalidState {
                operation,
                state: self.state.to_string(),
            })
        }
    }

    fn service_error(&self, source: ServiceError) -> SupervisorError {
        SupervisorError::Service {
            app: self.config.app().to_owned(),
            source,
        }
    }
}

impl<D, S> Supervisor<D, S> {
    /// Removes the PID file if this supervisor claimed it. Safe to repeat.
    pub fn clean(&mut self) {
        if !self.claimed {
            return;
        }
        if let Err(failure) = self.pid_file.remove() {
            warn!(
                target: PROCESS_TARGET,
                error = %failure,
                "failed to remove pid file during cleanup"
            );
        }
        self.claimed = false;
    }
}

impl<D, S> Drop for Supervisor<D, S> {
    fn drop(&mut self) {
        self.clean();
    }
}
