//! Doubles shared by the supervisor test suites.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use mockall::mock;
use nix::unistd::{Uid, User, geteuid};
use tempfile::TempDir;

use warden_config::{ConfigLayer, EffectiveConfig, default_layer, resolve};

use crate::process::signals::dispatch;
use crate::process::{
    ControlHandle, DaemonizeError, Daemonizer, LaunchMode, PrivilegeManager, ProcessControl,
    SignalError, SignalListener, SignalRegistration, Supervisor,
};
use crate::service::{Service, ServiceError, ServiceRegistry, ServiceSettings};

/// Application name the scripted registry answers to.
pub(crate) const SCRIPTED_APP: &str = "test.scripted";

mock! {
    pub Backend {}

    impl Service for Backend {
        fn configure(&mut self, settings: &ServiceSettings) -> Result<(), ServiceError>;
        fn serve(&self) -> Result<(), ServiceError>;
        fn stop(&self);
    }
}

/// Daemonizer that only counts invocations.
#[derive(Clone, Default)]
pub(crate) struct TestDaemonizer {
    calls: Arc<AtomicUsize>,
}

impl TestDaemonizer {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Daemonizer for TestDaemonizer {
    fn daemonize(&self, _config: &EffectiveConfig) -> Result<(), DaemonizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Signal source driven by the test instead of the kernel.
#[derive(Clone, Default)]
pub(crate) struct ManualSignals {
    control: Arc<Mutex<Option<ControlHandle>>>,
    listens: Arc<AtomicUsize>,
}

impl ManualSignals {
    /// Delivers `signal` to the most recently registered control handle.
    pub(crate) fn raise(&self, signal: i32) {
        let registered = self.control.lock().expect("signal lock").clone();
        if let Some(control) = registered {
            dispatch(signal, &control);
        }
    }

    pub(crate) fn listens(&self) -> usize {
        self.listens.load(Ordering::SeqCst)
    }
}

impl SignalListener for ManualSignals {
    fn listen(&self, control: ControlHandle) -> Result<SignalRegistration, SignalError> {
        *self.control.lock().expect("signal lock") = Some(control);
        self.listens.fetch_add(1, Ordering::SeqCst);
        Ok(SignalRegistration::inert())
    }
}

/// What one built service instance does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Script {
    /// Serve returns on its own.
    Return,
    /// A signal arrives while serving; serve then returns.
    Raise(i32),
    /// The run directory turns read-only, then a signal arrives while serving.
    SealRunDir(i32),
    /// `configure` rejects the settings.
    FailConfigure,
    /// `serve` fails.
    FailServe,
}

/// Observable service events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Configured,
    Served { pid_file_present: bool },
    StopRequested,
}

/// Shared record of service events across rebuilt instances.
#[derive(Clone, Default)]
pub(crate) struct Journal(Arc<Mutex<Vec<Event>>>);

impl Journal {
    fn record(&self, event: Event) {
        self.0.lock().expect("journal lock").push(event);
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.0.lock().expect("journal lock").clone()
    }

    pub(crate) fn served(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, Event::Served { .. }))
            .count()
    }
}

/// Registry whose single application plays back one [`Script`] per build.
///
/// Builds beyond the scripted ones fall back to [`Script::Return`].
pub(crate) fn scripted_registry(
    scripts: impl IntoIterator<Item = Script>,
    signals: ManualSignals,
    journal: Journal,
    pid_path: Utf8PathBuf,
) -> ServiceRegistry {
    let queue = Arc::new(Mutex::new(scripts.into_iter().collect::<VecDeque<_>>()));
    let mut registry = ServiceRegistry::new();
    registry.register(
        SCRIPTED_APP,
        Box::new(move || {
            let script = queue
                .lock()
                .expect("script lock")
                .pop_front()
                .unwrap_or(Script::Return);
            Box::new(scripted_backend(
                script,
                signals.clone(),
                journal.clone(),
                pid_path.clone(),
            ))
        }),
    );
    registry
}

fn scripted_backend(
    script: Script,
    signals: ManualSignals,
    journal: Journal,
    pid_path: Utf8PathBuf,
) -> MockBackend {
    let mut backend = MockBackend::new();

    let configured = journal.clone();
    backend.expect_configure().returning(move |_| {
        if script == Script::FailConfigure {
            return Err(ServiceError::NotConfigured {
                app: SCRIPTED_APP.to_owned(),
            });
        }
        configured.record(Event::Configured);
        Ok(())
    });

    let served = journal.clone();
    backend.expect_serve().returning(move || {
        served.record(Event::Served {
            pid_file_present: pid_path.exists(),
        });
        match script {
            Script::Raise(signal) => signals.raise(signal),
            Script::SealRunDir(signal) => {
                if let Some(parent) = pid_path.parent() {
                    set_mode(parent, 0o555);
                }
                signals.raise(signal);
            }
            Script::FailServe => {
                return Err(ServiceError::Io {
                    source: io::Error::other("listener crashed"),
                });
            }
            Script::Return | Script::FailConfigure => {}
        }
        Ok(())
    });

    backend
        .expect_stop()
        .returning(move || journal.record(Event::StopRequested));
    backend
}

/// Sets the permission bits of `path`.
pub(crate) fn set_mode(path: &Utf8Path, mode: u32) {
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).expect("set permissions");
}

/// Name of the account running the tests.
pub(crate) fn current_user() -> String {
    User::from_uid(geteuid())
        .expect("user lookup")
        .expect("test user should have a passwd entry")
        .name
}

/// Resolves a foreground configuration rooted in `run_dir`.
pub(crate) fn config_in(run_dir: &Utf8Path, overrides: ConfigLayer) -> EffectiveConfig {
    let mut layer = ConfigLayer::new()
        .with("app", SCRIPTED_APP)
        .with("server_user", current_user())
        .with("server_run_dir", run_dir.as_str())
        .with("server_daemonize", false)
        .with("stop_timeout", 1);
    layer.merge(&overrides);
    resolve(&default_layer(), &ConfigLayer::new(), &layer).expect("test config should resolve")
}

/// Temporary run directory with a UTF-8 path.
pub(crate) fn run_dir() -> (TempDir, Utf8PathBuf) {
    let dir = TempDir::new().expect("temp dir");
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp path");
    (dir, path)
}

/// Unprivileged identity so identity switching never touches the test process.
pub(crate) fn unprivileged() -> PrivilegeManager {
    PrivilegeManager::with_euid(Uid::from_raw(65_534))
}

/// Supervisor wired to the scripted doubles.
pub(crate) fn scripted_supervisor(
    config: EffectiveConfig,
    mode: LaunchMode,
    scripts: impl IntoIterator<Item = Script>,
    signals: ManualSignals,
    daemonizer: TestDaemonizer,
    journal: Journal,
) -> Supervisor<TestDaemonizer, ManualSignals> {
    let registry = scripted_registry(
        scripts,
        signals.clone(),
        journal,
        config.pid_file().to_path_buf(),
    );
    let process = ProcessControl {
        mode,
        daemonizer,
        signals,
        privileges: unprivileged(),
    };
    Supervisor::new(config, registry, process)
}
