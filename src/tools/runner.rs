//! Tool execution: shell, HTTP fetch, remote shell and serial I/O.
//!
//! Every call produces a [`ToolResult`]; failures are data, never errors.
//! `returncode == -1` means the tool could not run to completion (spawn
//! failure, transport error, timeout, cancellation, refused risky tool).
//!
//! # Background tasks
//!
//! ```text
//! submit_background(call) ─▶ id (immediately)
//!        │
//!        └─ tokio task ─ execute ─▶ [lock registry: remove id, push result]
//!                                              │
//! next_result(timeout) ◀──── FIFO completion queue
//! ```
//!
//! A background id yields exactly one result: either its completion or the
//! cancelled result pushed by [`ToolRunner::cancel`].

use std::collections::HashMap;
use std::io::{Read, Write};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ToolConfig;

// ---------------------------------------------------------------------------
// ToolCall / ToolResult
// ---------------------------------------------------------------------------

/// One executable tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    Shell {
        command: String,
    },
    Web {
        url: String,
        method: String,
    },
    Ssh {
        host: String,
        command: String,
        user: Option<String>,
        port: u16,
    },
    Serial {
        port: String,
        payload: String,
    },
}

impl ToolCall {
    pub fn shell(command: impl Into<String>) -> Self {
        ToolCall::Shell {
            command: command.into(),
        }
    }

    /// Shell, ssh and serial can change the world; web fetches cannot.
    pub fn is_risky(&self) -> bool {
        !matches!(self, ToolCall::Web { .. })
    }

    /// Human-readable command line recorded in the result.
    pub fn label(&self) -> String {
        match self {
            ToolCall::Shell { command } => command.clone(),
            ToolCall::Web { url, method } => format!("web {method} {url}"),
            ToolCall::Ssh {
                host,
                command,
                port,
                ..
            } => format!("ssh {host}:{port} {command}"),
            ToolCall::Serial { port, .. } => format!("serial {port}"),
        }
    }

    /// Task id used for foreground runs.
    pub fn foreground_id(&self) -> &'static str {
        match self {
            ToolCall::Shell { .. } => "foreground",
            ToolCall::Web { .. } => "web",
            ToolCall::Ssh { .. } => "ssh",
            ToolCall::Serial { .. } => "serial",
        }
    }
}

/// Outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    /// `"foreground"`, `"web"`, `"ssh"`, `"serial"` or a background id.
    pub task_id: String,
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    /// Exit status, HTTP status, or `-1` on failure.
    pub returncode: i32,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ToolResult {
    fn failure(call: &ToolCall, stderr: impl Into<String>, started: Instant) -> Self {
        Self {
            task_id: call.foreground_id().to_string(),
            command: call.label(),
            stdout: String::new(),
            stderr: stderr.into(),
            returncode: -1,
            duration: started.elapsed(),
            timed_out: false,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.returncode == 0 || (200..300).contains(&self.returncode)
    }
}

/// Failed request or body read; a deadline hit in either is a timeout.
fn http_failure(call: &ToolCall, e: reqwest::Error, started: Instant) -> ToolResult {
    if e.is_timeout() {
        log::warn!("tools: {} timed out", call.label());
    }
    ToolResult {
        timed_out: e.is_timeout(),
        ..ToolResult::failure(call, e.to_string(), started)
    }
}

/// First `max` characters of `s`.
fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// ---------------------------------------------------------------------------
// ToolRunner
// ---------------------------------------------------------------------------

struct Executor {
    config: ToolConfig,
    http: reqwest::Client,
}

/// A live background task and the label its cancelled result reports.
struct Pending {
    label: String,
    handle: JoinHandle<()>,
}

type Registry = Arc<Mutex<HashMap<String, Pending>>>;

/// Runs tools in the foreground or as tracked background tasks.
///
/// ```rust,no_run
/// use std::time::Duration;
/// use voice_agent::config::ToolConfig;
/// use voice_agent::tools::{ToolCall, ToolRunner};
///
/// # async fn demo() {
/// let runner = ToolRunner::new(ToolConfig::default());
/// let id = runner.submit_background(ToolCall::shell("uptime"), None);
/// if let Some(result) = runner.next_result(Duration::from_secs(5)).await {
///     assert_eq!(result.task_id, id);
/// }
/// # }
/// ```
pub struct ToolRunner {
    exec: Arc<Executor>,
    tasks: Registry,
    results_tx: mpsc::UnboundedSender<ToolResult>,
    results_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ToolResult>>,
}

impl ToolRunner {
    pub fn new(config: ToolConfig) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("voice-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            exec: Arc::new(Executor { config, http }),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            results_tx,
            results_rx: tokio::sync::Mutex::new(results_rx),
        }
    }

    pub fn config(&self) -> &ToolConfig {
        &self.exec.config
    }

    // -----------------------------------------------------------------------
    // Foreground
    // -----------------------------------------------------------------------

    /// Run `call` and wait for it, with the configured default timeout.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        self.exec.execute(call, None).await
    }

    /// Run `call` with an explicit timeout (`None` = configured default).
    pub async fn execute_with_timeout(
        &self,
        call: &ToolCall,
        timeout: Option<Duration>,
    ) -> ToolResult {
        self.exec.execute(call, timeout).await
    }

    /// Run a shell command through `sh -c`.
    pub async fn run_command(&self, command: &str, timeout: Option<Duration>) -> ToolResult {
        self.exec.execute(&ToolCall::shell(command), timeout).await
    }

    /// Fetch `url`; the HTTP status becomes the return code.
    pub async fn fetch_url(&self, url: &str, method: &str) -> ToolResult {
        let call = ToolCall::Web {
            url: url.to_string(),
            method: method.to_uppercase(),
        };
        self.exec.execute(&call, None).await
    }

    /// Run `command` on `host` through the system `ssh` client.
    pub async fn run_ssh(
        &self,
        host: &str,
        command: &str,
        user: Option<&str>,
        port: u16,
    ) -> ToolResult {
        let call = ToolCall::Ssh {
            host: host.to_string(),
            command: command.to_string(),
            user: user.map(str::to_string),
            port,
        };
        self.exec.execute(&call, None).await
    }

    /// Write `payload` to a serial port and read back what arrives.
    pub async fn run_serial(&self, port: &str, payload: &str) -> ToolResult {
        let call = ToolCall::Serial {
            port: port.to_string(),
            payload: payload.to_string(),
        };
        self.exec.execute(&call, None).await
    }

    // -----------------------------------------------------------------------
    // Background
    // -----------------------------------------------------------------------

    /// Start `call` in the background and return its id at once.
    pub fn submit_background(&self, call: ToolCall, timeout: Option<Duration>) -> String {
        let task_id = uuid::Uuid::new_v4().to_string();
        let exec = Arc::clone(&self.exec);
        let tasks = Arc::clone(&self.tasks);
        let tx = self.results_tx.clone();

        // Hold the registry while spawning so a fast task cannot finish
        // before its entry exists.
        let mut registry = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let label = call.label();
        let id = task_id.clone();
        let handle = tokio::spawn(async move {
            let mut result = exec.execute(&call, timeout).await;
            result.task_id = id.clone();
            let mut registry = tasks.lock().unwrap_or_else(PoisonError::into_inner);
            if registry.remove(&id).is_some() {
                log::debug!("tools: background {id} finished with {}", result.returncode);
                let _ = tx.send(result);
            }
        });
        registry.insert(task_id.clone(), Pending { label, handle });
        log::info!("tools: started background task {task_id}");
        task_id
    }

    /// Wait up to `timeout` for the next background completion.
    ///
    /// A zero timeout only drains what is already queued.
    pub async fn next_result(&self, timeout: Duration) -> Option<ToolResult> {
        let mut rx = self.results_rx.lock().await;
        if timeout.is_zero() {
            return rx.try_recv().ok();
        }
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    /// Cancel a background task, killing its process.
    ///
    /// Pushes a cancelled result and returns `true` when the task was still
    /// live; returns `false` for unknown or already finished ids.
    pub fn cancel(&self, task_id: &str) -> bool {
        let mut registry = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(task) = registry.remove(task_id) else {
            return false;
        };
        task.handle.abort();
        let _ = self.results_tx.send(ToolResult {
            task_id: task_id.to_string(),
            command: task.label,
            stdout: String::new(),
            stderr: "cancelled".into(),
            returncode: -1,
            duration: Duration::ZERO,
            timed_out: false,
        });
        log::info!("tools: cancelled background task {task_id}");
        true
    }

    /// Cancel every live background task; returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        self.pending()
            .iter()
            .filter(|id| self.cancel(id))
            .count()
    }

    /// Ids of background tasks that have not finished yet.
    pub fn pending(&self) -> Vec<String> {
        let registry = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        registry.keys().cloned().collect()
    }
}

impl Drop for ToolRunner {
    fn drop(&mut self) {
        let registry = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for task in registry.values() {
            task.handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

impl Executor {
    async fn execute(&self, call: &ToolCall, timeout: Option<Duration>) -> ToolResult {
        let started = Instant::now();
        if call.is_risky() && !self.config.allow_risky {
            log::warn!("tools: refused {} (risky tools disabled)", call.label());
            return ToolResult::failure(call, "risky tools are disabled", started);
        }
        let timeout =
            timeout.unwrap_or_else(|| Duration::from_secs(self.config.default_timeout_secs));

        log::debug!("tools: running {}", call.label());
        match call {
            ToolCall::Shell { command } => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(command);
                self.run_process(call, cmd, timeout, started).await
            }
            ToolCall::Ssh {
                host,
                command,
                user,
                port,
            } => {
                let target = match user {
                    Some(user) => format!("{user}@{host}"),
                    None => host.clone(),
                };
                let mut cmd = Command::new("ssh");
                cmd.args(["-o", "BatchMode=yes", "-p"])
                    .arg(port.to_string())
                    .arg(target)
                    .arg(command);
                self.run_process(call, cmd, timeout, started).await
            }
            ToolCall::Web { url, method } => self.fetch(call, url, method, timeout, started).await,
            ToolCall::Serial { port, payload } => {
                self.serial(call, port, payload, timeout, started).await
            }
        }
    }

    async fn run_process(
        &self,
        call: &ToolCall,
        mut cmd: Command,
        timeout: Duration,
        started: Instant,
    ) -> ToolResult {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ToolResult::failure(call, format!("failed to start: {e}"), started),
        };

        // Dropping the child on timeout (or task abort) kills the process.
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let max = self.config.max_output_chars;
                ToolResult {
                    task_id: call.foreground_id().to_string(),
                    command: call.label(),
                    stdout: truncate_chars(&String::from_utf8_lossy(&output.stdout), max),
                    stderr: truncate_chars(&String::from_utf8_lossy(&output.stderr), max),
                    returncode: output.status.code().unwrap_or(-1),
                    duration: started.elapsed(),
                    timed_out: false,
                }
            }
            Ok(Err(e)) => ToolResult::failure(call, e.to_string(), started),
            Err(_) => {
                log::warn!("tools: {} timed out after {timeout:?}", call.label());
                ToolResult {
                    timed_out: true,
                    ..ToolResult::failure(call, "", started)
                }
            }
        }
    }

    async fn fetch(
        &self,
        call: &ToolCall,
        url: &str,
        method: &str,
        timeout: Duration,
        started: Instant,
    ) -> ToolResult {
        let method = match reqwest::Method::from_bytes(method.as_bytes()) {
            Ok(m) => m,
            Err(e) => return ToolResult::failure(call, e.to_string(), started),
        };
        let response = match self
            .http
            .request(method, url)
            .timeout(timeout)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return http_failure(call, e, started),
        };
        let status = response.status().as_u16() as i32;
        match response.text().await {
            Ok(body) => ToolResult {
                task_id: call.foreground_id().to_string(),
                command: call.label(),
                stdout: truncate_chars(&body, self.config.max_output_chars),
                stderr: String::new(),
                returncode: status,
                duration: started.elapsed(),
                timed_out: false,
            },
            Err(e) => http_failure(call, e, started),
        }
    }

    async fn serial(
        &self,
        call: &ToolCall,
        port: &str,
        payload: &str,
        timeout: Duration,
        started: Instant,
    ) -> ToolResult {
        let path = port.to_string();
        let payload = payload.to_string();
        let baud = self.config.serial_baud_rate;
        let settle = Duration::from_secs(self.config.serial_read_secs);

        let job = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, String> {
            let mut dev = serialport::new(&path, baud)
                .timeout(Duration::from_secs(1))
                .open()
                .map_err(|e| format!("{path}: {e}"))?;
            dev.write_all(payload.as_bytes())
                .map_err(|e| format!("write failed: {e}"))?;
            dev.flush().map_err(|e| format!("write failed: {e}"))?;
            std::thread::sleep(settle);

            let waiting = dev.bytes_to_read().map_err(|e| e.to_string())? as usize;
            let mut buf = vec![0u8; waiting.max(1)];
            let read = match dev.read(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
                Err(e) => return Err(format!("read failed: {e}")),
            };
            buf.truncate(read);
            Ok(buf)
        });

        match tokio::time::timeout(timeout, job).await {
            Ok(Ok(Ok(bytes))) => ToolResult {
                task_id: call.foreground_id().to_string(),
                command: call.label(),
                stdout: truncate_chars(
                    &String::from_utf8_lossy(&bytes),
                    self.config.max_output_chars,
                ),
                stderr: String::new(),
                returncode: 0,
                duration: started.elapsed(),
                timed_out: false,
            },
            Ok(Ok(Err(e))) => ToolResult::failure(call, e, started),
            Ok(Err(join)) => ToolResult::failure(call, join.to_string(), started),
            Err(_) => ToolResult {
                timed_out: true,
                ..ToolResult::failure(call, "", started)
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> ToolRunner {
        ToolRunner::new(ToolConfig::default())
    }

    // -----------------------------------------------------------------------
    // Foreground
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn shell_command_captures_output() {
        let r = runner().run_command("echo hello; echo oops 1>&2; exit 3", None).await;
        assert_eq!(r.task_id, "foreground");
        assert_eq!(r.stdout.trim(), "hello");
        assert_eq!(r.stderr.trim(), "oops");
        assert_eq!(r.returncode, 3);
        assert!(!r.timed_out);
    }

    #[tokio::test]
    async fn timeout_kills_and_reports_sentinel() {
        let r = runner()
            .run_command("echo early; sleep 5", Some(Duration::from_millis(200)))
            .await;
        assert!(r.timed_out);
        assert_eq!(r.returncode, -1);
        assert!(r.stdout.is_empty());
        assert!(r.stderr.is_empty());
        assert!(r.duration < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn output_is_truncated_by_chars() {
        let config = ToolConfig {
            max_output_chars: 5,
            ..ToolConfig::default()
        };
        let r = ToolRunner::new(config)
            .run_command("printf 'abcdefghij'", None)
            .await;
        assert_eq!(r.stdout, "abcde");
    }

    #[tokio::test]
    async fn risky_tools_can_be_disabled() {
        let config = ToolConfig {
            allow_risky: false,
            ..ToolConfig::default()
        };
        let runner = ToolRunner::new(config);
        let r = runner.run_command("echo nope", None).await;
        assert_eq!(r.returncode, -1);
        assert!(r.stdout.is_empty());
        assert!(r.stderr.contains("disabled"));

        let r = runner.run_serial("/dev/null", "x").await;
        assert_eq!(r.task_id, "serial");
        assert_eq!(r.returncode, -1);
    }

    #[tokio::test]
    async fn bad_url_is_a_failed_result() {
        let r = runner().fetch_url("not a url", "GET").await;
        assert_eq!(r.task_id, "web");
        assert_eq!(r.returncode, -1);
        assert!(!r.stderr.is_empty());
        assert_eq!(r.command, "web GET not a url");
    }

    #[tokio::test]
    async fn stalled_body_is_reported_as_timeout() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Headers promise a body that never fully arrives.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = sock.read(&mut buf).await;
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\npartial")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let call = ToolCall::Web {
            url: format!("http://{addr}/slow"),
            method: "GET".into(),
        };
        let r = runner()
            .execute_with_timeout(&call, Some(Duration::from_millis(300)))
            .await;
        assert!(r.timed_out);
        assert_eq!(r.returncode, -1);
        assert_eq!(r.command, format!("web GET http://{addr}/slow"));
        server.abort();
    }

    #[tokio::test]
    async fn missing_serial_port_is_a_failed_result() {
        let r = runner()
            .run_serial("/definitely/not/a/port", "PING")
            .await;
        assert_eq!(r.returncode, -1);
        assert_eq!(r.command, "serial /definitely/not/a/port");
    }

    #[test]
    fn labels_and_ids() {
        let ssh = ToolCall::Ssh {
            host: "h".into(),
            command: "uptime".into(),
            user: None,
            port: 22,
        };
        assert_eq!(ssh.label(), "ssh h:22 uptime");
        assert_eq!(ssh.foreground_id(), "ssh");
        assert!(ssh.is_risky());
        assert!(!ToolCall::Web {
            url: "u".into(),
            method: "GET".into()
        }
        .is_risky());
    }

    // -----------------------------------------------------------------------
    // Background
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn background_result_appears_exactly_once() {
        let runner = runner();
        let id = runner.submit_background(ToolCall::shell("echo bg"), None);
        assert!(!id.is_empty());

        let r = runner
            .next_result(Duration::from_secs(5))
            .await
            .expect("result");
        assert_eq!(r.task_id, id);
        assert_eq!(r.stdout.trim(), "bg");
        assert!(runner.pending().is_empty());

        assert!(runner.next_result(Duration::from_millis(100)).await.is_none());
        assert!(runner.next_result(Duration::ZERO).await.is_none());
    }

    #[tokio::test]
    async fn results_arrive_in_completion_order() {
        let runner = runner();
        let slow = runner.submit_background(ToolCall::shell("sleep 0.4; echo slow"), None);
        let fast = runner.submit_background(ToolCall::shell("echo fast"), None);

        let first = runner.next_result(Duration::from_secs(5)).await.unwrap();
        let second = runner.next_result(Duration::from_secs(5)).await.unwrap();
        assert_eq!(first.task_id, fast);
        assert_eq!(second.task_id, slow);
    }

    #[tokio::test]
    async fn cancel_yields_single_cancelled_result() {
        let runner = runner();
        let id = runner.submit_background(ToolCall::shell("sleep 5"), None);
        assert_eq!(runner.pending(), vec![id.clone()]);

        assert!(runner.cancel(&id));
        assert!(!runner.cancel(&id));

        let r = runner.next_result(Duration::from_secs(1)).await.unwrap();
        assert_eq!(r.task_id, id);
        assert_eq!(r.command, "sleep 5");
        assert_eq!(r.returncode, -1);
        assert_eq!(r.stderr, "cancelled");
        assert!(runner.next_result(Duration::from_millis(200)).await.is_none());
    }

    #[tokio::test]
    async fn cancel_all_counts_live_tasks() {
        let runner = runner();
        runner.submit_background(ToolCall::shell("sleep 5"), None);
        runner.submit_background(ToolCall::shell("sleep 5"), None);
        assert_eq!(runner.cancel_all(), 2);
        assert!(runner.pending().is_empty());
        assert_eq!(runner.cancel_all(), 0);
    }

    #[tokio::test]
    async fn zero_timeout_drains_ready_results() {
        let runner = runner();
        let id = runner.submit_background(ToolCall::shell("true"), None);
        // Give the task time to complete.
        for _ in 0..50 {
            if runner.pending().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let r = runner.next_result(Duration::ZERO).await.unwrap();
        assert_eq!(r.task_id, id);
        assert_eq!(r.returncode, 0);
    }
}
