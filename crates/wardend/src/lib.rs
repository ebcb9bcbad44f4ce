//! Process supervisor for a single long-running network service.
//!
//! `wardend` reads a YAML configuration, optionally detaches from the
//! terminal with a double fork, records the daemon in a PID file, drops root
//! privileges, and runs the configured service until a signal asks it to stop
//! or restart. A second invocation with `stop` or `restart` finds the running
//! instance through the same PID file.
//!
//! Signals are routed on a dedicated thread that only records the requested
//! action and asks the service to return from `serve`; the supervisor acts on
//! the recorded action from its main path.

mod cli;
mod process;
mod service;
mod telemetry;

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use warden_config::{ConfigLayer, default_layer, resolve};

pub use process::{
    Command, ControlHandle, DaemonizeError, Daemonizer, ForegroundDaemonizer, ForkStage,
    ForkingDaemonizer, IdentityError, LaunchMode, PendingAction, PidFileError, PidFileStore,
    PrivilegeDrop, PrivilegeManager, ProcessControl, ProcessIdentity, SignalAction, SignalError,
    SignalListener, SignalRegistration, Supervisor, SupervisorError, SupervisorState,
    SystemSignals, route,
};
pub use service::{
    LISTENER_APP, ListenerService, Service, ServiceError, ServiceFactory, ServiceRegistry,
    ServiceSettings,
};
pub use telemetry::{TelemetryError, TelemetryHandle};

use cli::Cli;
use process::PROCESS_TARGET;

/// Runs `wardend` with `args`, reporting to the given streams.
///
/// Returns success when the command completes or when `stop` finds nothing
/// to stop. Fatal errors are logged, written to `stderr`, and yield a failure
/// exit code.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let stream: &mut dyn Write = if error.use_stderr() { stderr } else { stdout };
            let _ = write!(stream, "{error}");
            return ExitCode::from(u8::try_from(error.exit_code()).unwrap_or(1));
        }
    };

    match execute(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) if failure.is_benign() => {
            let _ = writeln!(stderr, "wardend: {failure}");
            ExitCode::SUCCESS
        }
        Err(failure) => {
            error!(target: PROCESS_TARGET, error = %failure, "fatal error");
            let _ = writeln!(stderr, "wardend: {failure}");
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: &Cli) -> Result<(), SupervisorError> {
    let file = ConfigLayer::load(&cli.conf)?;
    let config = resolve(&default_layer(), &file, &cli.overrides())?;
    telemetry::initialise(&config)?;

    let process = ProcessControl {
        mode: LaunchMode::detect(&config),
        daemonizer: ForkingDaemonizer::new(),
        signals: SystemSignals,
        privileges: PrivilegeManager::current(),
    };
    let mut supervisor = Supervisor::new(config, ServiceRegistry::builtin(), process);
    supervisor.run(cli.command)
}

#[cfg(test)]
mod tests;
