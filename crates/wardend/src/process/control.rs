//! State shared between the supervisor's main path and the signal thread.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::service::Service;

use super::PROCESS_TARGET;

/// Lifecycle request recorded by the signal thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    /// Stop the service and start it again in this process.
    Restart,
    /// Stop the service and exit.
    Stop,
}

#[derive(Default)]
struct ControlState {
    service: Option<Arc<dyn Service>>,
    pending: Option<PendingAction>,
}

/// Cloneable handle used to ask the running service to wind down.
///
/// The signal thread only records what it wants and calls
/// [`Service::stop`]; the supervisor acts on the recorded action once
/// [`Service::serve`] returns. A `Stop` is never downgraded to a `Restart`.
#[derive(Clone, Default)]
pub struct ControlHandle {
    inner: Arc<Mutex<ControlState>>,
}

impl ControlHandle {
    /// Creates an empty handle with no attached service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `action` and asks the attached service, if any, to stop.
    pub fn request(&self, action: PendingAction) {
        let attached = {
            let mut state = self.lock();
            state.pending = match (state.pending, action) {
                (Some(PendingAction::Stop), _) => Some(PendingAction::Stop),
                _ => Some(action),
            };
            state.service.clone()
        };
        debug!(
            target: PROCESS_TARGET,
            ?action,
            attached = attached.is_some(),
            "lifecycle action requested"
        );
        if let Some(service) = attached {
            service.stop();
        }
    }

    /// Attaches the service that `request` should stop.
    ///
    /// Returns `true` when an action was already pending, in which case the
    /// caller should not enter `serve`.
    #[must_use]
    pub(crate) fn attach(&self, service: Arc<dyn Service>) -> bool {
        let mut state = self.lock();
        state.service = Some(service);
        state.pending.is_some()
    }

    /// Detaches the service and returns the pending action, clearing it.
    #[must_use]
    pub(crate) fn take_pending(&self) -> Option<PendingAction> {
        let mut state = self.lock();
        state.service = None;
        state.pending.take()
    }

    /// The action waiting to be handled, if any.
    #[must_use]
    pub fn pending(&self) -> Option<PendingAction> {
        self.lock().pending
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
