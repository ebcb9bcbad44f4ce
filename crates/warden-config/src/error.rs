use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration '{path}': {source}")]
    Read {
        /// Path that was requested.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The configuration file is not a YAML mapping.
    #[error("failed to parse configuration '{path}': {message}")]
    Parse {
        /// Path of the offending document.
        path: Utf8PathBuf,
        /// Parser diagnostic.
        message: String,
    },
    /// No application locator survived the merge.
    #[error("configuration does not name an application (set 'app')")]
    MissingApplication,
    /// A value has the wrong shape for its key.
    #[error("invalid configuration value: {source}")]
    Invalid {
        /// Deserialisation failure describing the mismatch.
        #[source]
        source: serde_json::Error,
    },
    /// A count that must be positive was zero.
    #[error("configuration key '{key}' must be a positive integer")]
    ZeroValue {
        /// Offending key.
        key: &'static str,
    },
    /// The umask was neither a number nor an octal string.
    #[error("invalid umask '{value}': expected an octal value")]
    InvalidUmask {
        /// Raw value as written.
        value: String,
    },
    /// Only one half of the TLS certificate/key pair was configured.
    #[error("TLS requires both 'ssl_certificate' and 'ssl_private_key'; only '{present}' is set")]
    PartialTls {
        /// Key that was provided.
        present: &'static str,
    },
    /// The log template could not be parsed.
    #[error("invalid log format '{template}': {reason}")]
    InvalidLogTemplate {
        /// Template as written.
        template: String,
        /// What was wrong with it.
        reason: String,
    },
}
