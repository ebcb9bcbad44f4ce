use serde_json::{Map, Value};

use crate::layer::ConfigLayer;

/// Application locator used when none is configured. Always rejected.
pub const DEFAULT_APP: &str = "";

/// Server name announced to the service.
pub const DEFAULT_SERVER_NAME: &str = "localhost";

/// Address the service binds to.
pub const DEFAULT_SERVER_IP: &str = "127.0.0.1";

/// Port the service binds to.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Worker pool size handed to the service.
pub const DEFAULT_SERVER_THREADS: u64 = 10;

/// Pending connection queue depth handed to the service.
pub const DEFAULT_REQUEST_QUEUE_SIZE: u64 = 5;

/// Service I/O timeout in seconds.
pub const DEFAULT_SERVER_TIMEOUT_SECS: u64 = 60;

/// Working directory adopted by the daemon.
pub const DEFAULT_RUN_DIR: &str = "/tmp";

/// Unprivileged account the daemon switches to.
pub const DEFAULT_USER: &str = "nobody";

/// Unprivileged group the daemon switches to.
pub const DEFAULT_GROUP: &str = "nobody";

/// PID file location, relative to the run directory.
pub const DEFAULT_PID_FILE: &str = "server.pid";

/// Log file location, relative to the run directory.
pub const DEFAULT_LOG_FILE: &str = "server.log";

/// Log line template.
pub const DEFAULT_LOG_FORMAT: &str = "{timestamp} {level} {message}";

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Environment variable that receives `settings_module`.
pub const DEFAULT_SETTINGS_MODULE_VAR: &str = "SETTINGS_MODULE";

/// Seconds `restart` waits for the previous instance to release its PID file.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// Builds the lowest-precedence configuration layer.
#[must_use]
pub fn default_layer() -> ConfigLayer {
    ConfigLayer::new()
        .with("app", DEFAULT_APP)
        .with("server_name", DEFAULT_SERVER_NAME)
        .with("server_ip", DEFAULT_SERVER_IP)
        .with("server_port", DEFAULT_SERVER_PORT)
        .with("server_threads", DEFAULT_SERVER_THREADS)
        .with("server_request_queue_size", DEFAULT_REQUEST_QUEUE_SIZE)
        .with("server_timeout", DEFAULT_SERVER_TIMEOUT_SECS)
        .with("server_run_dir", DEFAULT_RUN_DIR)
        .with("server_daemonize", true)
        .with("server_user", DEFAULT_USER)
        .with("server_group", DEFAULT_GROUP)
        .with("pid_file", DEFAULT_PID_FILE)
        .with("log", DEFAULT_LOG_FILE)
        .with("log_format", DEFAULT_LOG_FORMAT)
        .with("log_filter", DEFAULT_LOG_FILTER)
        .with("ssl_certificate", "")
        .with("ssl_private_key", "")
        .with("environ", Value::Object(Map::new()))
        .with("settings_module", "")
        .with("settings_module_var", DEFAULT_SETTINGS_MODULE_VAR)
        .with("umask", 0)
        .with("stop_timeout", DEFAULT_STOP_TIMEOUT_SECS)
        .with("force", false)
}
