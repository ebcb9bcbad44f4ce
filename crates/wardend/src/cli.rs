//! Command-line arguments for `wardend`.

use std::str::FromStr;

use camino::Utf8PathBuf;
use clap::Parser;

use warden_config::ConfigLayer;

use crate::process::Command;

/// Supervises a long-running service: daemonises it, tracks it through a PID
/// file, and stops or restarts it on request.
#[derive(Parser, Debug)]
#[command(name = "wardend", version)]
pub(crate) struct Cli {
    /// YAML configuration file.
    #[arg(short = 'c', long = "conf", value_name = "PATH")]
    pub(crate) conf: Utf8PathBuf,
    /// On restart, remove a PID file the previous instance failed to release.
    #[arg(short, long)]
    pub(crate) force: bool,
    /// Lifecycle command: start, stop, or restart (case-insensitive).
    #[arg(
        value_name = "COMMAND",
        default_value_t = Command::Start,
        value_parser = parse_command
    )]
    pub(crate) command: Command,
}

impl Cli {
    /// Runtime overrides layered above the configuration file.
    #[must_use]
    pub(crate) fn overrides(&self) -> ConfigLayer {
        ConfigLayer::new().with("force", self.force)
    }
}

fn parse_command(raw: &str) -> Result<Command, String> {
    Command::from_str(raw)
        .map_err(|_| format!("unknown command '{raw}' (expected start, stop, or restart)"))
}
