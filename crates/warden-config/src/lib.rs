//! Configuration resolution for the Warden supervisor.
//!
//! Configuration is assembled from three layers: built-in defaults, a YAML
//! document supplied by the operator, and runtime overrides collected from
//! the command line. Later layers win key by key. Keys are case-insensitive
//! so `SERVER_PORT`, `server_port`, and `Server_Port` all address the same
//! setting.
//!
//! The merged layers are validated once and frozen into an
//! [`EffectiveConfig`]. The supervisor owns that value for the lifetime of the
//! process and never mutates it.

mod defaults;
mod effective;
mod error;
mod layer;
mod logging;
mod resolve;

pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_LOG_FORMAT, DEFAULT_SETTINGS_MODULE_VAR, default_layer,
};
pub use effective::{BindAddress, EffectiveConfig, TlsMaterial};
pub use error::ConfigError;
pub use layer::ConfigLayer;
pub use logging::{LogField, LogTemplate, TemplateSegment};
pub use resolve::resolve;
