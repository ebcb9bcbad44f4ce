//! Log file telemetry for the supervisor.
//!
//! Every event is rendered through the configured [`LogTemplate`] and appended
//! to the log file. Writes are synchronous, so nothing is lost across the
//! forks performed while detaching.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::OnceCell;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::{Event, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use warden_config::{EffectiveConfig, LogField, LogTemplate, TemplateSegment};

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to open the log file for appending.
    #[error("failed to open log file '{path}': {source}")]
    OpenLog {
        /// Log file path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Configures the global tracing subscriber when invoked for the first time.
///
/// Repeated calls are idempotent: only the first successful invocation
/// installs the subscriber.
pub fn initialise(config: &EffectiveConfig) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config))
        .map(|_| TelemetryHandle)
}

fn install_subscriber(config: &EffectiveConfig) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;
    let file = open_log(config.log_file())?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .event_format(TemplateFormatter::new(config.log_format().clone()))
        .finish();

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

fn open_log(path: &Utf8Path) -> Result<File, TelemetryError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| TelemetryError::OpenLog {
            path: path.to_path_buf(),
            source,
        })
}

/// Renders events through a [`LogTemplate`], one line per event.
#[derive(Debug, Clone)]
pub(crate) struct TemplateFormatter {
    template: LogTemplate,
}

impl TemplateFormatter {
    #[must_use]
    pub(crate) const fn new(template: LogTemplate) -> Self {
        Self { template }
    }
}

impl<S, N> FormatEvent<S, N> for TemplateFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        for segment in self.template.segments() {
            match segment {
                TemplateSegment::Literal(text) => writer.write_str(text)?,
                TemplateSegment::Field(LogField::Timestamp) => {
                    let now = OffsetDateTime::now_utc()
                        .format(&Rfc3339)
                        .map_err(|_| fmt::Error)?;
                    writer.write_str(&now)?;
                }
                TemplateSegment::Field(LogField::Level) => write!(writer, "{}", metadata.level())?,
                TemplateSegment::Field(LogField::Target) => writer.write_str(metadata.target())?,
                TemplateSegment::Field(LogField::Message) => {
                    ctx.format_fields(writer.by_ref(), event)?;
                }
            }
        }
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    use warden_config::{ConfigLayer, default_layer, resolve};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            let bytes = self.0.lock().expect("buffer lock").clone();
            String::from_utf8(bytes).expect("utf-8 log output")
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("buffer lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(template: &str, emit: impl FnOnce()) -> String {
        let buffer = SharedBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .event_format(TemplateFormatter::new(
                LogTemplate::parse(template).expect("template should parse"),
            ))
            .finish();
        tracing::subscriber::with_default(subscriber, emit);
        buffer.contents()
    }

    #[test]
    fn renders_level_target_and_message() {
        let output = capture("[{level}] {target}: {message}", || {
            tracing::info!(target: "wardend::process", pid = 42, "pid file claimed");
        });
        assert_eq!(output, "[INFO] wardend::process: pid file claimed pid=42\n");
    }

    #[test]
    fn printf_style_templates_render_the_same_fields() {
        let output = capture("%(levelname)s %(name)s %(message)s", || {
            tracing::warn!(target: "wardend::service", "queue full");
        });
        assert_eq!(output, "WARN wardend::service queue full\n");
    }

    #[test]
    fn timestamps_are_rfc3339() {
        let output = capture("{timestamp}|{message}", || tracing::info!("tick"));
        let (stamp, rest) = output.split_once('|').expect("separator");
        assert!(stamp.contains('T') && stamp.ends_with('Z'), "bad stamp {stamp}");
        assert_eq!(rest, "tick\n");
    }

    #[test]
    fn invalid_filter_is_rejected() {
        let overrides = ConfigLayer::new()
            .with("app", "warden.listener")
            .with("log_filter", "wardend=loud");
        let config = resolve(&default_layer(), &ConfigLayer::new(), &overrides)
            .expect("config should resolve");
        let error = initialise(&config).expect_err("filter should be rejected");
        assert!(matches!(error, TelemetryError::Filter(_)));
    }

    #[test]
    fn unwritable_log_path_is_reported() {
        let overrides = ConfigLayer::new()
            .with("app", "warden.listener")
            .with("log", "/nonexistent-warden-dir/server.log");
        let config = resolve(&default_layer(), &ConfigLayer::new(), &overrides)
            .expect("config should resolve");
        let error = initialise(&config).expect_err("log path should be rejected");
        assert!(matches!(error, TelemetryError::OpenLog { .. }));
    }
}
