//! Merges configuration layers and validates the result.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use serde_json::{Number, Value};

use crate::effective::{BindAddress, EffectiveConfig, TlsMaterial};
use crate::error::ConfigError;
use crate::layer::ConfigLayer;
use crate::logging::LogTemplate;

const UMASK_BITS: u32 = 0o777;

#[derive(Debug, Deserialize)]
struct RawSettings {
    app: String,
    server_name: String,
    server_ip: String,
    server_port: u16,
    server_threads: u64,
    server_request_queue_size: u64,
    server_timeout: u64,
    server_run_dir: Utf8PathBuf,
    server_daemonize: bool,
    server_user: String,
    server_group: String,
    pid_file: Utf8PathBuf,
    log: Utf8PathBuf,
    log_format: String,
    log_filter: String,
    ssl_certificate: String,
    ssl_private_key: String,
    environ: BTreeMap<String, EnvValue>,
    settings_module: String,
    settings_module_var: String,
    umask: UmaskValue,
    stop_timeout: u64,
    force: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EnvValue {
    Text(String),
    Number(Number),
    Flag(bool),
}

impl EnvValue {
    fn into_string(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Number(number) => number.to_string(),
            Self::Flag(flag) => flag.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UmaskValue {
    Number(u32),
    Text(String),
}

impl UmaskValue {
    fn bits(&self) -> Result<u32, ConfigError> {
        match self {
            Self::Number(bits) => Ok(bits & UMASK_BITS),
            Self::Text(text) => {
                let trimmed = text.trim();
                let digits = trimmed
                    .strip_prefix("0o")
                    .or_else(|| trimmed.strip_prefix("0O"))
                    .unwrap_or(trimmed);
                u32::from_str_radix(digits, 8)
                    .map(|bits| bits & UMASK_BITS)
                    .map_err(|_| ConfigError::InvalidUmask {
                        value: text.clone(),
                    })
            }
        }
    }
}

/// Merges `defaults`, `file`, and `overrides` (in increasing precedence) and
/// validates the result.
///
/// Keys are compared case-insensitively and unknown keys are ignored. Paths
/// for the PID file and the log are anchored under `server_run_dir` when
/// relative.
pub fn resolve(
    defaults: &ConfigLayer,
    file: &ConfigLayer,
    overrides: &ConfigLayer,
) -> Result<EffectiveConfig, ConfigError> {
    let mut merged = defaults.clone();
    merged.merge(file);
    merged.merge(overrides);

    let raw: RawSettings = serde_json::from_value(Value::Object(merged.into_object()))
        .map_err(|source| ConfigError::Invalid { source })?;
    validate(raw)
}

fn validate(raw: RawSettings) -> Result<EffectiveConfig, ConfigError> {
    let app = raw.app.trim().to_owned();
    if app.is_empty() {
        return Err(ConfigError::MissingApplication);
    }

    let threads = positive(raw.server_threads, "server_threads")?;
    let queue_depth = positive(raw.server_request_queue_size, "server_request_queue_size")?;
    let umask = raw.umask.bits()?;
    let tls = tls_pair(&raw.ssl_certificate, &raw.ssl_private_key)?;
    let log_format = LogTemplate::parse(&raw.log_format)?;

    let run_dir = raw.server_run_dir;
    let pid_file = anchor(&run_dir, raw.pid_file);
    let log_file = anchor(&run_dir, raw.log);

    Ok(EffectiveConfig {
        app,
        server_name: raw.server_name,
        bind: BindAddress::new(raw.server_ip, raw.server_port),
        threads,
        queue_depth,
        timeout: Duration::from_secs(raw.server_timeout),
        run_dir,
        daemonize: raw.server_daemonize,
        user: raw.server_user,
        group: non_empty(raw.server_group),
        pid_file,
        log_file,
        log_format,
        log_filter: raw.log_filter,
        tls,
        environ: raw
            .environ
            .into_iter()
            .map(|(key, value)| (key, value.into_string()))
            .collect(),
        settings_module: non_empty(raw.settings_module),
        settings_module_var: raw.settings_module_var,
        umask,
        stop_timeout: Duration::from_secs(raw.stop_timeout),
        force: raw.force,
    })
}

fn positive(value: u64, key: &'static str) -> Result<NonZeroUsize, ConfigError> {
    usize::try_from(value)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or(ConfigError::ZeroValue { key })
}

fn tls_pair(certificate: &str, private_key: &str) -> Result<Option<TlsMaterial>, ConfigError> {
    match (certificate.trim(), private_key.trim()) {
        ("", "") => Ok(None),
        (_, "") => Err(ConfigError::PartialTls {
            present: "ssl_certificate",
        }),
        ("", _) => Err(ConfigError::PartialTls {
            present: "ssl_private_key",
        }),
        (certificate, private_key) => Ok(Some(TlsMaterial::new(
            Utf8PathBuf::from(certificate),
            Utf8PathBuf::from(private_key),
        ))),
    }
}

fn anchor(run_dir: &Utf8Path, path: Utf8PathBuf) -> Utf8PathBuf {
    if path.is_absolute() {
        path
    } else {
        run_dir.join(path)
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}
