use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use reqwest::Url;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::BackendConfig;

const PROBE_TIMEOUT: Duration = Duration::from_millis(1500);
const POLL_INTERVAL: Duration = Duration::from_millis(300);
const LOG_TAIL_LINES: usize = 25;
const LOG_TAIL_CHARS: usize = 4000;

/// Outcome of [`BackendSupervisor::start`], sent back to the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchReport {
    Disabled,
    AlreadyRunning,
    Started,
    Failed(String),
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("invalid backend URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("auto-start only supports local backend URLs (current: {0})")]
    NotLocal(String),
    #[error("backend directory not found: {}", .0.display())]
    MissingDir(PathBuf),
    #[error("failed to start backend server: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("backend did not become ready within {timeout_secs}s (exit code: {exit}){tail}")]
    NotReady {
        timeout_secs: u64,
        exit: String,
        tail: String,
    },
}

/// Owns the companion backend process when this client started it.
#[derive(Debug, Clone)]
pub struct BackendSupervisor {
    config: BackendConfig,
    probe: reqwest::Client,
    child: Arc<Mutex<Option<Child>>>,
}

impl BackendSupervisor {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let probe = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;
        Ok(BackendSupervisor {
            config,
            probe,
            child: Arc::new(Mutex::new(None)),
        })
    }

    /// Anything below 500 on `GET /` counts as alive.
    pub async fn is_alive(&self) -> bool {
        let url = format!("{}/", self.config.url.trim_end_matches('/'));
        match self.probe.get(&url).send().await {
            Ok(response) => response.status().as_u16() < 500,
            Err(e) => {
                tracing::trace!("probe {} failed: {}", url, e);
                false
            }
        }
    }

    /// Launches the backend unless it is disabled, already up, or remote,
    /// then waits for it to answer the probe. Never panics on failure; the
    /// report carries the reason.
    pub async fn start(&self) -> LaunchReport {
        if !self.config.auto_start {
            tracing::info!("backend auto-start disabled");
            return LaunchReport::Disabled;
        }

        if self.is_alive().await {
            tracing::info!("backend already answering at {}", self.config.url);
            return LaunchReport::AlreadyRunning;
        }

        match self.launch().await {
            Ok(()) => {
                tracing::info!("backend started at {}", self.config.url);
                LaunchReport::Started
            }
            Err(e) => {
                tracing::error!("backend launch failed: {}", e);
                LaunchReport::Failed(e.to_string())
            }
        }
    }

    async fn launch(&self) -> Result<(), LaunchError> {
        let (host, port) = local_endpoint(&self.config.url)?;

        let dir = &self.config.working_dir;
        if !dir.is_dir() {
            return Err(LaunchError::MissingDir(dir.clone()));
        }

        let command_line = render_command(&self.config.command, &host, port);
        let mut command = shell_command(&command_line);
        command
            .current_dir(dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match &self.config.log_file {
            Some(path) => {
                let log = open_log(path, &command_line, dir)?;
                command.stdout(Stdio::from(log.try_clone()?));
                command.stderr(Stdio::from(log));
            }
            None => {
                command.stdout(Stdio::null());
                command.stderr(Stdio::null());
            }
        }

        tracing::debug!("spawning backend: {} (cwd {})", command_line, dir.display());
        let mut child = command.spawn()?;

        let timeout = Duration::from_secs(self.config.ready_timeout_secs);
        if self.wait_until_ready(&mut child, timeout).await {
            *self.child.lock().await = Some(child);
            return Ok(());
        }

        let exit = match child.try_wait() {
            Ok(Some(status)) => status
                .code()
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            _ => {
                force_kill(&mut child).await;
                "still running".to_string()
            }
        };

        let tail = self
            .config
            .log_file
            .as_deref()
            .and_then(read_log_tail)
            .map(|tail| format!("\nBackend log tail:\n{}", tail))
            .unwrap_or_default();

        Err(LaunchError::NotReady {
            timeout_secs: self.config.ready_timeout_secs,
            exit,
            tail,
        })
    }

    /// Polls the probe until it answers, `timeout` passes, or `child` exits.
    pub(crate) async fn wait_until_ready(&self, child: &mut Child, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.is_alive().await {
                return true;
            }
            if let Ok(Some(status)) = child.try_wait() {
                tracing::warn!("backend exited before becoming ready: {}", status);
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        false
    }

    /// Asks the backend to exit if this client started it, and kills it
    /// when it is still running after `stop_timeout_secs`.
    pub async fn stop(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }

        tracing::info!("stopping backend");
        if let Err(e) = terminate(&child).await {
            tracing::warn!("failed to signal backend: {}", e);
        }

        let grace = Duration::from_secs(self.config.stop_timeout_secs);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!("backend exited: {}", status);
                return;
            }
            Ok(Err(e)) => tracing::warn!("failed to wait for backend: {}", e),
            Err(_) => tracing::warn!(
                "backend still running after {}s, killing it",
                self.config.stop_timeout_secs
            ),
        }
        force_kill(&mut child).await;
    }
}

fn local_endpoint(url: &str) -> Result<(String, u16), LaunchError> {
    let parsed = Url::parse(url).map_err(|e| LaunchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    let host = parsed
        .host_str()
        .unwrap_or("127.0.0.1")
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    if !is_local_host(&host) {
        return Err(LaunchError::NotLocal(url.to_string()));
    }

    let port = parsed.port_or_known_default().unwrap_or(8000);
    Ok((host, port))
}

fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "0.0.0.0" | "::1")
}

fn render_command(template: &str, host: &str, port: u16) -> String {
    template
        .replace("{host}", host)
        .replace("{port}", &port.to_string())
}

#[cfg(windows)]
fn shell_command(command_line: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(command_line);
    command
}

/// The shell leads its own process group so signals reach the server too.
#[cfg(not(windows))]
fn shell_command(command_line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(command_line).process_group(0);
    command
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: libc::c_int) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    // SAFETY: plain kill(2) on the group led by our own child.
    if unsafe { libc::kill(-(pid as libc::pid_t), signal) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(unix)]
async fn terminate(child: &Child) -> std::io::Result<()> {
    signal_group(child, libc::SIGTERM)
}

#[cfg(unix)]
async fn force_kill(child: &mut Child) {
    if let Err(e) = signal_group(child, libc::SIGKILL) {
        tracing::debug!("failed to kill backend process group: {}", e);
    }
    if let Err(e) = child.kill().await {
        tracing::warn!("failed to stop backend: {}", e);
    }
}

/// `cmd` does not forward anything to the server, so the whole tree goes.
#[cfg(windows)]
async fn taskkill(child: &Child, force: bool) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let mut command = Command::new("taskkill");
    command.arg("/PID").arg(pid.to_string()).arg("/T");
    if force {
        command.arg("/F");
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    Ok(())
}

#[cfg(windows)]
async fn terminate(child: &Child) -> std::io::Result<()> {
    taskkill(child, false).await
}

#[cfg(windows)]
async fn force_kill(child: &mut Child) {
    if let Err(e) = taskkill(child, true).await {
        tracing::debug!("taskkill failed: {}", e);
    }
    if let Err(e) = child.kill().await {
        tracing::warn!("failed to stop backend: {}", e);
    }
}

fn open_log(path: &Path, command_line: &str, dir: &Path) -> std::io::Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut log = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(
        log,
        "\n=== backend auto-start at {} | cmd={} | cwd={} ===",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        command_line,
        dir.display()
    )?;
    log.flush()?;
    Ok(log)
}

fn read_log_tail(path: &Path) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    let contents = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = contents.lines().collect();
    let start = lines.len().saturating_sub(LOG_TAIL_LINES);
    let tail = lines[start..].join("\n").trim().to_string();
    if tail.is_empty() {
        return None;
    }

    let count = tail.chars().count();
    if count > LOG_TAIL_CHARS {
        Some(tail.chars().skip(count - LOG_TAIL_CHARS).collect())
    } else {
        Some(tail)
    }
}
