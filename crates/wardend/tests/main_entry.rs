//! Integration tests for the `wardend` binary entry point.
//!
//! Covers exit codes and operator-facing messages, plus real signal delivery
//! to foreground and detached daemons.

use std::fs;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::cargo::cargo_bin_cmd;
use camino::{Utf8Path, Utf8PathBuf};
use nix::sys::signal::{Signal, kill};
use nix::unistd::{Pid, User, geteuid};
use predicates::str::contains;
use tempfile::TempDir;

const SETTLE: Duration = Duration::from_secs(10);
const READY: &str = "service running";

struct Sandbox {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Sandbox {
    fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 path");
        Self { _dir: dir, root }
    }

    fn write_config(&self, app: &str) -> Utf8PathBuf {
        self.write_yaml(&format!(
            "app: {app}\nserver_run_dir: {root}\nserver_daemonize: false\nserver_port: 0\n",
            root = self.root
        ))
    }

    fn write_daemon_config(&self, app: &str) -> Utf8PathBuf {
        let user = User::from_uid(geteuid())
            .expect("user lookup")
            .expect("test user should have a passwd entry")
            .name;
        self.write_yaml(&format!(
            "app: {app}\nserver_run_dir: {root}\nserver_daemonize: true\nserver_port: 0\n\
             server_user: {user}\n",
            root = self.root
        ))
    }

    fn write_yaml(&self, yaml: &str) -> Utf8PathBuf {
        let path = self.root.join("warden.yaml");
        fs::write(&path, yaml).expect("write config");
        path
    }

    fn pid_path(&self) -> Utf8PathBuf {
        self.root.join("server.pid")
    }

    fn recorded_pid(&self) -> Option<Pid> {
        let content = fs::read_to_string(self.pid_path()).ok()?;
        content.trim().parse().ok().map(Pid::from_raw)
    }

    fn readiness_count(&self) -> usize {
        fs::read_to_string(self.root.join("server.log"))
            .map(|log| log.matches(READY).count())
            .unwrap_or(0)
    }
}

/// Sends `SIGKILL` to a daemon a failed assertion left behind.
struct Leftover(Option<Pid>);

impl Leftover {
    const fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for Leftover {
    fn drop(&mut self) {
        if let Some(pid) = self.0 {
            let _ = kill(pid, Signal::SIGKILL);
        }
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + SETTLE;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    condition()
}

fn spawn_wardend(config: &Utf8Path, command: &str) -> Child {
    Command::new(assert_cmd::cargo::cargo_bin!("wardend"))
        .args(["-c", config.as_str(), command])
        .env_remove("WARDEN_FOREGROUND")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn wardend")
}

fn pid_of(child: &Child) -> Pid {
    Pid::from_raw(i32::try_from(child.id()).expect("pid fits in i32"))
}

#[test]
fn missing_configuration_fails_without_pid_file() {
    let sandbox = Sandbox::new();
    let mut command = cargo_bin_cmd!("wardend");
    command.args(["-c", sandbox.root.join("absent.yaml").as_str(), "start"]);
    command
        .assert()
        .failure()
        .stderr(contains("failed to read configuration"));
    assert!(!sandbox.pid_path().exists());
}

#[test]
fn configuration_without_application_is_rejected() {
    let sandbox = Sandbox::new();
    let config = sandbox.write_config("''");
    let mut command = cargo_bin_cmd!("wardend");
    command.args(["-c", config.as_str()]);
    command
        .assert()
        .failure()
        .stderr(contains("does not name an application"));
}

#[test]
fn stop_without_pid_file_succeeds() {
    let sandbox = Sandbox::new();
    let config = sandbox.write_config("warden.listener");
    let mut command = cargo_bin_cmd!("wardend");
    command.args(["-c", config.as_str(), "stop"]);
    command
        .assert()
        .success()
        .stderr(contains("is the daemon running?"));
}

#[test]
fn start_refuses_existing_pid_file() {
    let sandbox = Sandbox::new();
    let config = sandbox.write_config("warden.listener");
    fs::write(sandbox.pid_path(), "4242").expect("seed pid file");

    let mut command = cargo_bin_cmd!("wardend");
    command.env("WARDEN_FOREGROUND", "1");
    command.args(["-c", config.as_str(), "START"]);
    command
        .assert()
        .failure()
        .stderr(contains("already running with pid 4242"));

    let content = fs::read_to_string(sandbox.pid_path()).expect("pid file");
    assert_eq!(content, "4242");
}

#[test]
fn unknown_command_is_a_usage_error() {
    let mut command = cargo_bin_cmd!("wardend");
    command.args(["-c", "warden.yaml", "reload"]);
    command
        .assert()
        .code(2)
        .stderr(contains("unknown command 'reload'"));
}

#[test]
fn foreground_listener_exits_cleanly_on_sigterm() {
    let sandbox = Sandbox::new();
    let config = sandbox.write_config("warden.listener");
    let mut child = spawn_wardend(&config, "start");
    let pid = pid_of(&child);
    let mut leftover = Leftover(Some(pid));

    assert!(
        wait_until(|| sandbox.readiness_count() >= 1),
        "listener never reported readiness"
    );
    assert_eq!(sandbox.recorded_pid(), Some(pid));

    kill(pid, Signal::SIGTERM).expect("deliver SIGTERM");
    let status = child.wait().expect("wait for wardend");
    leftover.disarm();

    assert!(status.success(), "unexpected exit status: {status}");
    assert!(!sandbox.pid_path().exists());
}

#[test]
fn daemonized_start_detaches_restarts_and_stops() {
    let sandbox = Sandbox::new();
    let config = sandbox.write_daemon_config("warden.listener");
    let mut launcher = spawn_wardend(&config, "start");
    let launcher_pid = pid_of(&launcher);

    let status = launcher.wait().expect("wait for launcher");
    assert!(status.success(), "launcher failed: {status}");
    assert!(
        wait_until(|| sandbox.readiness_count() >= 1),
        "daemon never reported readiness"
    );
    let daemon = sandbox.recorded_pid().expect("daemon pid recorded");
    let mut leftover = Leftover(Some(daemon));
    assert_ne!(daemon, launcher_pid);

    kill(daemon, Signal::SIGHUP).expect("deliver SIGHUP");
    assert!(
        wait_until(|| sandbox.readiness_count() >= 2),
        "daemon never restarted in place"
    );
    assert_eq!(sandbox.recorded_pid(), Some(daemon));

    let mut stop = cargo_bin_cmd!("wardend");
    stop.args(["-c", config.as_str(), "stop"]);
    stop.assert().success();
    assert!(
        wait_until(|| !sandbox.pid_path().exists()),
        "daemon never released its pid file"
    );
    leftover.disarm();
}
