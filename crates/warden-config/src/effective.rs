use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};

use crate::logging::LogTemplate;

/// Host and port the service binds to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindAddress {
    host: String,
    port: u16,
}

impl BindAddress {
    /// Creates a bind address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host name or IP literal.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for BindAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Certificate and private key handed to the service when TLS is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    certificate: Utf8PathBuf,
    private_key: Utf8PathBuf,
}

impl TlsMaterial {
    /// Pairs a certificate with its private key.
    #[must_use]
    pub fn new(certificate: Utf8PathBuf, private_key: Utf8PathBuf) -> Self {
        Self {
            certificate,
            private_key,
        }
    }

    /// Certificate chain path.
    #[must_use]
    pub fn certificate(&self) -> &Utf8Path {
        &self.certificate
    }

    /// Private key path.
    #[must_use]
    pub fn private_key(&self) -> &Utf8Path {
        &self.private_key
    }
}

/// Fully merged and validated configuration.
///
/// Built once by [`crate::resolve`] and read-only afterwards. Relative PID
/// and log paths have already been anchored under the run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub(crate) app: String,
    pub(crate) server_name: String,
    pub(crate) bind: BindAddress,
    pub(crate) threads: NonZeroUsize,
    pub(crate) queue_depth: NonZeroUsize,
    pub(crate) timeout: Duration,
    pub(crate) run_dir: Utf8PathBuf,
    pub(crate) daemonize: bool,
    pub(crate) user: String,
    pub(crate) group: Option<String>,
    pub(crate) pid_file: Utf8PathBuf,
    pub(crate) log_file: Utf8PathBuf,
    pub(crate) log_format: LogTemplate,
    pub(crate) log_filter: String,
    pub(crate) tls: Option<TlsMaterial>,
    pub(crate) environ: BTreeMap<String, String>,
    pub(crate) settings_module: Option<String>,
    pub(crate) settings_module_var: String,
    pub(crate) umask: u32,
    pub(crate) stop_timeout: Duration,
    pub(crate) force: bool,
}

impl EffectiveConfig {
    /// Name of the service factory to run.
    #[must_use]
    pub fn app(&self) -> &str {
        &self.app
    }

    /// Server name announced to the service.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Address the service binds to.
    #[must_use]
    pub const fn bind(&self) -> &BindAddress {
        &self.bind
    }

    /// Worker pool size.
    #[must_use]
    pub const fn threads(&self) -> NonZeroUsize {
        self.threads
    }

    /// Pending request queue depth.
    #[must_use]
    pub const fn queue_depth(&self) -> NonZeroUsize {
        self.queue_depth
    }

    /// Service I/O timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Directory the daemon changes into.
    #[must_use]
    pub fn run_dir(&self) -> &Utf8Path {
        &self.run_dir
    }

    /// Whether `start` detaches from the terminal.
    #[must_use]
    pub const fn daemonize(&self) -> bool {
        self.daemonize
    }

    /// Account the daemon switches to.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Group the daemon switches to; `None` selects the user's primary group.
    #[must_use]
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Absolute or run-directory-anchored PID file path.
    #[must_use]
    pub fn pid_file(&self) -> &Utf8Path {
        &self.pid_file
    }

    /// Absolute or run-directory-anchored log file path.
    #[must_use]
    pub fn log_file(&self) -> &Utf8Path {
        &self.log_file
    }

    /// Template applied to each log line.
    #[must_use]
    pub const fn log_format(&self) -> &LogTemplate {
        &self.log_format
    }

    /// Tracing filter directive.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// TLS material, present only when both halves are configured.
    #[must_use]
    pub const fn tls(&self) -> Option<&TlsMaterial> {
        self.tls.as_ref()
    }

    /// Extra environment variables exported before the service is built.
    #[must_use]
    pub const fn environ(&self) -> &BTreeMap<String, String> {
        &self.environ
    }

    /// Settings module pointer exported to the service, if any.
    #[must_use]
    pub fn settings_module(&self) -> Option<&str> {
        self.settings_module.as_deref()
    }

    /// Variable that receives [`Self::settings_module`].
    #[must_use]
    pub fn settings_module_var(&self) -> &str {
        &self.settings_module_var
    }

    /// File mode creation mask applied after detaching.
    #[must_use]
    pub const fn umask(&self) -> u32 {
        self.umask
    }

    /// How long `restart` waits for the previous instance to exit.
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    /// Whether `restart` may remove a PID file that outlives the wait.
    #[must_use]
    pub const fn force(&self) -> bool {
        self.force
    }
}
