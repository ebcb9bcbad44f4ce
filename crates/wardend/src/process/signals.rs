//! Maps OS signals onto supervisor actions.
//!
//! Signal handlers installed by `signal-hook` only write to a self-pipe. A
//! dedicated thread drains the pipe and turns each signal into a request on
//! the [`ControlHandle`], so no supervisor logic ever runs in handler context.

use std::io;
use std::thread::{self, JoinHandle};

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook::iterator::{Handle, Signals};
use thiserror::Error;
use tracing::{info, warn};

use super::PROCESS_TARGET;
use super::control::{ControlHandle, PendingAction};

const HANDLED_SIGNALS: [i32; 5] = [SIGHUP, SIGTERM, SIGINT, SIGUSR1, SIGUSR2];

/// What the supervisor does in response to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// Stop and start the service in place.
    Restart,
    /// Stop the service and exit.
    Stop,
    /// Accepted but deliberately unused.
    Reserved,
    /// Logged and otherwise ignored.
    Ignore,
}

/// Classifies `signal`.
#[must_use]
pub const fn route(signal: i32) -> SignalAction {
    match signal {
        SIGHUP => SignalAction::Restart,
        SIGTERM | SIGINT => SignalAction::Stop,
        SIGUSR1 => SignalAction::Reserved,
        _ => SignalAction::Ignore,
    }
}

/// Applies the routed action for `signal` to `control`.
pub(crate) fn dispatch(signal: i32, control: &ControlHandle) {
    match route(signal) {
        SignalAction::Restart => {
            info!(target: PROCESS_TARGET, signal, "restart requested by signal");
            control.request(PendingAction::Restart);
        }
        SignalAction::Stop => {
            info!(target: PROCESS_TARGET, signal, "stop requested by signal");
            control.request(PendingAction::Stop);
        }
        SignalAction::Reserved => {
            info!(target: PROCESS_TARGET, signal, "reserved signal received; no action");
        }
        SignalAction::Ignore => {
            warn!(target: PROCESS_TARGET, signal, "ignoring unexpected signal");
        }
    }
}

/// Errors reported by signal listeners.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Spawning the routing thread failed.
    #[error("failed to spawn signal routing thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Abstraction over signal delivery.
pub trait SignalListener: Send + Sync {
    /// Starts routing signals to `control` until the registration is dropped.
    fn listen(&self, control: ControlHandle) -> Result<SignalRegistration, SignalError>;
}

/// Keeps signal routing alive; dropping it stops the routing thread.
#[derive(Debug, Default)]
pub struct SignalRegistration {
    handle: Option<Handle>,
    thread: Option<JoinHandle<()>>,
}

impl SignalRegistration {
    /// A registration with nothing to tear down.
    #[must_use]
    pub fn inert() -> Self {
        Self::default()
    }
}

impl Drop for SignalRegistration {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close();
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!(target: PROCESS_TARGET, "signal routing thread panicked");
        }
    }
}

/// Listener backed by `signal-hook`'s self-pipe iterator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSignals;

impl SignalListener for SystemSignals {
    fn listen(&self, control: ControlHandle) -> Result<SignalRegistration, SignalError> {
        let mut signals =
            Signals::new(HANDLED_SIGNALS).map_err(|source| SignalError::Install { source })?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("warden-signals".to_owned())
            .spawn(move || {
                for signal in signals.forever() {
                    dispatch(signal, &control);
                }
            })
            .map_err(|source| SignalError::Spawn { source })?;
        Ok(SignalRegistration {
            handle: Some(handle),
            thread: Some(thread),
        })
    }
}
