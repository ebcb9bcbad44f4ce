//! Daemon process supervision: detaching, PID file ownership, privilege
//! handling, and signal-driven control.

use std::time::Duration;

pub(crate) mod control;
pub(crate) mod daemonizer;
mod errors;
mod files;
pub(crate) mod pidfile;
pub(crate) mod privileges;
pub(crate) mod signals;
pub(crate) mod supervisor;

pub use control::{ControlHandle, PendingAction};
pub use daemonizer::{
    DaemonizeError, Daemonizer, ForegroundDaemonizer, ForkStage, ForkingDaemonizer,
};
pub use errors::SupervisorError;
pub use pidfile::{PidFileError, PidFileStore};
pub use privileges::{IdentityError, PrivilegeDrop, PrivilegeManager, ProcessIdentity};
pub use signals::{
    SignalAction, SignalError, SignalListener, SignalRegistration, SystemSignals, route,
};
pub use supervisor::{Command, LaunchMode, ProcessControl, Supervisor, SupervisorState};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
pub(crate) const FOREGROUND_ENV_VAR: &str = "WARDEN_FOREGROUND";
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(100);
