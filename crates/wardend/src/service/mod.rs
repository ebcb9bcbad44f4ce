//! Boundary between the supervisor and the service it keeps alive.
//!
//! The supervisor knows nothing about request handling. It looks the
//! configured application up in a [`ServiceRegistry`], hands it the
//! [`ServiceSettings`] derived from configuration, and then blocks in
//! [`Service::serve`] until the service returns.

use std::io;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::time::Duration;

use thiserror::Error;
use warden_config::{BindAddress, EffectiveConfig, TlsMaterial};

mod listener;
mod registry;

pub use listener::{LISTENER_APP, ListenerService};
pub use registry::{ServiceFactory, ServiceRegistry};

pub(crate) const SERVICE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::service");

/// A long-running service driven by the supervisor.
pub trait Service: Send + Sync {
    /// Applies settings before the service starts.
    fn configure(&mut self, settings: &ServiceSettings) -> Result<(), ServiceError>;

    /// Serves until [`Service::stop`] is called or a fatal error occurs.
    fn serve(&self) -> Result<(), ServiceError>;

    /// Asks a running `serve` call to return. May be called from any thread,
    /// and before `serve` starts.
    fn stop(&self);
}

/// Settings handed to [`Service::configure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Address to listen on.
    pub bind: BindAddress,
    /// Name the service announces.
    pub server_name: String,
    /// Worker pool size.
    pub threads: NonZeroUsize,
    /// Pending connection queue depth.
    pub queue_depth: NonZeroUsize,
    /// Per-connection I/O timeout.
    pub timeout: Duration,
    /// TLS material, when configured.
    pub tls: Option<TlsMaterial>,
}

impl ServiceSettings {
    /// Extracts the service-facing subset of `config`.
    #[must_use]
    pub fn from_config(config: &EffectiveConfig) -> Self {
        Self {
            bind: config.bind().clone(),
            server_name: config.server_name().to_owned(),
            threads: config.threads(),
            queue_depth: config.queue_depth(),
            timeout: config.timeout(),
            tls: config.tls().cloned(),
        }
    }
}

/// Errors raised at the service boundary.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No factory is registered under the configured name.
    #[error("unknown application '{app}' (registered: {registered})")]
    UnknownApplication {
        /// Configured application name.
        app: String,
        /// Comma-separated list of registered names.
        registered: String,
    },
    /// `serve` was called before `configure`.
    #[error("service '{app}' was not configured before serving")]
    NotConfigured {
        /// Application name.
        app: String,
    },
    /// The bind address did not resolve.
    #[error("failed to resolve bind address {address}: {source}")]
    Resolve {
        /// Configured address.
        address: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Binding the listening socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Resolved address.
        addr: SocketAddr,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Any other I/O failure while serving.
    #[error("service I/O failed: {source}")]
    Io {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
