//! Supervised execution of protocol-binary invocations.
//!
//! Each invocation is an independent child process with its own timeout.
//! Live invocations are tracked in a table keyed by a generated id so they can
//! be stopped individually (`stop_process`) or all at once (`cleanup`).
//! Entries leave the table on every terminal outcome.
//!
//! Outcomes are always returned as a `CommandResult`; nothing here returns an
//! error to the caller.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::CommandErrorKind;
use crate::fastboot::commands::FastbootCommand;
use crate::fastboot::locator::BinaryLocator;

/// Default per-invocation timeout (2 minutes)
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(120_000);

/// Shell exit codes meaning the target could not be started at all
const SHELL_NOT_FOUND: i32 = 127;
const SHELL_NOT_EXECUTABLE: i32 = 126;

/// Upper bound on collecting output after the child exited; descendants that
/// inherited the pipes can hold them open indefinitely
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Identifier of a tracked invocation; unique for the lifetime of an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvocationId(u64);

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fastboot-{}", self.0)
    }
}

/// A live invocation as recorded in the active table.
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    pub id: InvocationId,
    pub binary_path: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub started_at: DateTime<Local>,
}

/// Outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub success: bool,
    /// stdout if non-empty, otherwise stderr; trimmed
    pub output: String,
    pub error_kind: Option<CommandErrorKind>,
    pub exit_code: Option<i32>,
    /// Human-readable failure description
    pub error: Option<String>,
    /// Killed through `stop_process`/`cleanup` rather than failing on its own
    pub stopped: bool,
}

impl CommandResult {
    pub fn ok(output: impl Into<String>) -> Self {
        CommandResult {
            success: true,
            output: output.into(),
            error_kind: None,
            exit_code: Some(0),
            error: None,
            stopped: false,
        }
    }

    pub fn failure(
        kind: CommandErrorKind,
        output: impl Into<String>,
        exit_code: Option<i32>,
        error: impl Into<String>,
    ) -> Self {
        CommandResult {
            success: false,
            output: output.into(),
            error_kind: Some(kind),
            exit_code,
            error: Some(error.into()),
            stopped: false,
        }
    }

    /// Reported by an invocation killed via `stop_process` or `cleanup`. The
    /// kind stays `NonZeroExit` with no exit code; `stopped` tells it apart
    /// from a command that failed by itself.
    pub fn stopped() -> Self {
        CommandResult {
            stopped: true,
            ..CommandResult::failure(
                CommandErrorKind::NonZeroExit,
                "",
                None,
                "Command was stopped before completion",
            )
        }
    }

    pub fn timed_out(timeout: Duration) -> Self {
        CommandResult::failure(
            CommandErrorKind::Timeout,
            "",
            Some(-1),
            format!("Command execution timeout ({} ms)", timeout.as_millis()),
        )
    }

    /// Best description of a failure: the error text plus any captured output.
    pub fn failure_message(&self) -> String {
        match (&self.error, self.output.is_empty()) {
            (Some(err), true) => err.clone(),
            (Some(err), false) => format!("{}: {}", err, self.output),
            (None, _) => self.output.clone(),
        }
    }
}

/// Seam between the protocol layer and anything that issues commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the protocol binary with `args`, bounded by `timeout`.
    async fn run(&self, args: &[String], timeout: Duration) -> CommandResult;

    /// Timeout used by callers that do not pick their own.
    fn default_timeout(&self) -> Duration {
        DEFAULT_COMMAND_TIMEOUT
    }

    async fn run_command(&self, command: &FastbootCommand) -> CommandResult {
        self.run(&command.to_args(), self.default_timeout()).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutorOptions {
    /// Route invocations through the platform shell
    pub use_shell: bool,
    pub default_timeout: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        ExecutorOptions {
            use_shell: true,
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

struct LiveInvocation {
    invocation: CommandInvocation,
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
}

struct ExecutorInner {
    binary: PathBuf,
    options: ExecutorOptions,
    next_id: AtomicU64,
    active: Mutex<HashMap<InvocationId, LiveInvocation>>,
}

/// Spawns and supervises protocol-binary invocations.
///
/// Cheap to clone; clones share the active-invocation table.
#[derive(Clone)]
pub struct CommandExecutor {
    inner: Arc<ExecutorInner>,
}

/// Handle to an invocation started with `CommandExecutor::spawn`.
pub struct InvocationHandle {
    pub id: InvocationId,
    handle: JoinHandle<CommandResult>,
}

impl InvocationHandle {
    pub async fn wait(self) -> CommandResult {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => CommandResult::failure(
                CommandErrorKind::ProcessSpawnError,
                "",
                Some(-1),
                format!("Invocation {} task failed: {}", self.id, e),
            ),
        }
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Stopped,
}

impl CommandExecutor {
    pub fn new(binary: impl Into<PathBuf>, options: ExecutorOptions) -> Self {
        let binary = binary.into();
        log::info!(
            "[Fastboot] Executor initialized, binary: {} (shell: {})",
            binary.display(),
            options.use_shell
        );
        CommandExecutor {
            inner: Arc::new(ExecutorInner {
                binary,
                options,
                next_id: AtomicU64::new(1),
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Build an executor around whatever binary the locator resolves.
    pub fn from_locator(locator: &BinaryLocator, options: ExecutorOptions) -> Self {
        CommandExecutor::new(locator.resolve(), options)
    }

    pub fn binary_path(&self) -> &Path {
        &self.inner.binary
    }

    /// Run one invocation to completion.
    pub async fn execute(&self, args: &[String], timeout: Duration) -> CommandResult {
        self.spawn(args, timeout).wait().await
    }

    /// Start an invocation and return its id immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self, args: &[String], timeout: Duration) -> InvocationHandle {
        let id = InvocationId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (kill_tx, kill_rx) = oneshot::channel();

        let invocation = CommandInvocation {
            id,
            binary_path: self.inner.binary.clone(),
            args: args.to_vec(),
            timeout,
            started_at: Local::now(),
        };

        // Registered before the task starts so stop_process sees it at once
        self.lock_active().insert(
            id,
            LiveInvocation {
                invocation,
                pid: None,
                kill_tx: Some(kill_tx),
            },
        );

        let executor = self.clone();
        let args = args.to_vec();
        let handle =
            tokio::spawn(async move { executor.run_invocation(id, args, timeout, kill_rx).await });

        InvocationHandle { id, handle }
    }

    /// Forcibly kill a tracked invocation. Returns false if it is already gone.
    /// The invocation resolves to [`CommandResult::stopped`].
    pub fn stop_process(&self, id: InvocationId) -> bool {
        let entry = self.lock_active().remove(&id);
        match entry {
            Some(live) => {
                log::warn!("[Fastboot] Stopping invocation {}", id);
                kill_live(live);
                true
            }
            None => false,
        }
    }

    /// Kill every still-tracked invocation (shutdown path).
    pub fn cleanup(&self) {
        let drained: Vec<LiveInvocation> = self.lock_active().drain().map(|(_, v)| v).collect();
        if !drained.is_empty() {
            log::warn!("[Fastboot] Cleanup: killing {} live invocation(s)", drained.len());
        }
        for live in drained {
            kill_live(live);
        }
    }

    pub fn active_count(&self) -> usize {
        self.lock_active().len()
    }

    pub fn is_active(&self, id: InvocationId) -> bool {
        self.lock_active().contains_key(&id)
    }

    /// Snapshot of live invocations, oldest first.
    pub fn active_invocations(&self) -> Vec<CommandInvocation> {
        let mut list: Vec<CommandInvocation> = self
            .lock_active()
            .values()
            .map(|live| live.invocation.clone())
            .collect();
        list.sort_by_key(|inv| inv.id);
        list
    }

    /// Check the binary answers `--version`.
    pub async fn validate(&self) -> bool {
        let result = self.run_command(&FastbootCommand::Version).await;
        result.success && result.output.to_lowercase().contains("version")
    }

    pub async fn devices(&self) -> CommandResult {
        self.run_command(&FastbootCommand::Devices).await
    }

    pub async fn getvar(&self, name: &str) -> CommandResult {
        self.run_command(&FastbootCommand::GetVar(name.to_string())).await
    }

    pub async fn erase(&self, partition: &str) -> CommandResult {
        self.run_command(&FastbootCommand::Erase(partition.to_string())).await
    }

    pub async fn flash(&self, partition: &str, image: &Path) -> CommandResult {
        self.run_command(&FastbootCommand::Flash {
            partition: partition.to_string(),
            image: image.to_path_buf(),
        })
        .await
    }

    pub async fn reboot(&self) -> CommandResult {
        self.run_command(&FastbootCommand::Reboot).await
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<InvocationId, LiveInvocation>> {
        // A poisoned table still holds valid entries
        self.inner
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn forget(&self, id: InvocationId) -> bool {
        self.lock_active().remove(&id).is_some()
    }

    fn build_command(&self, args: &[String]) -> Command {
        if self.inner.options.use_shell {
            let line = shell_command_line(&self.inner.binary, args);
            #[cfg(windows)]
            let mut command = {
                let mut c = Command::new("cmd");
                c.arg("/C").arg(line);
                c
            };
            #[cfg(not(windows))]
            let mut command = {
                let mut c = Command::new("sh");
                c.arg("-c").arg(line);
                c
            };
            if let Ok(cwd) = std::env::current_dir() {
                command.current_dir(cwd);
            }
            command
        } else {
            let mut command = Command::new(&self.inner.binary);
            command.args(args);
            command
        }
    }

    async fn run_invocation(
        &self,
        id: InvocationId,
        args: Vec<String>,
        timeout: Duration,
        mut kill_rx: oneshot::Receiver<()>,
    ) -> CommandResult {
        log::info!(
            "[Fastboot] [{}] {} {}",
            id,
            self.inner.binary.display(),
            args.join(" ")
        );

        let mut command = self.build_command(&args);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.forget(id);
                log::error!("[Fastboot] [{}] Spawn failed: {}", id, e);
                return CommandResult::failure(
                    CommandErrorKind::ProcessSpawnError,
                    "",
                    Some(-1),
                    format!("Failed to start {}: {}", self.inner.binary.display(), e),
                );
            }
        };

        let pid = child.id();
        let registered = match self.lock_active().get_mut(&id) {
            Some(live) => {
                live.pid = pid;
                true
            }
            None => false,
        };
        if !registered {
            // stop_process raced the spawn; the entry is gone already
            terminate_group(pid);
            let _ = child.start_kill();
        }

        let deadline = Instant::now() + timeout;
        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let mut stdout_task = tokio::spawn(read_stream(child.stdout.take(), stdout_buf.clone()));
        let mut stderr_task = tokio::spawn(read_stream(child.stderr.take(), stderr_buf.clone()));

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep(timeout) => Outcome::TimedOut,
            _ = &mut kill_rx => Outcome::Stopped,
        };

        match outcome {
            Outcome::Exited(status) => {
                self.forget(id);
                let grace = deadline
                    .saturating_duration_since(Instant::now())
                    .min(OUTPUT_DRAIN_GRACE);
                let drained = tokio::time::timeout(grace, async {
                    let _ = (&mut stdout_task).await;
                    let _ = (&mut stderr_task).await;
                })
                .await;
                if drained.is_err() {
                    log::warn!(
                        "[Fastboot] [{}] Output pipes still open after exit, keeping partial output",
                        id
                    );
                    stdout_task.abort();
                    stderr_task.abort();
                }
                let output = decode_output(&take_buffer(&stdout_buf), &take_buffer(&stderr_buf));

                match status {
                    Ok(status) => self.classify_exit(id, status.code(), output),
                    Err(e) => CommandResult::failure(
                        CommandErrorKind::ProcessSpawnError,
                        output,
                        Some(-1),
                        format!("Failed to wait for process: {}", e),
                    ),
                }
            }
            Outcome::TimedOut => {
                self.forget(id);
                log::warn!(
                    "[Fastboot] [{}] Timed out after {} ms, killing process",
                    id,
                    timeout.as_millis()
                );
                terminate_group(pid);
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                CommandResult::timed_out(timeout)
            }
            Outcome::Stopped => {
                // stop_process/cleanup removed the entry and signalled the group
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                CommandResult::stopped()
            }
        }
    }

    fn classify_exit(&self, id: InvocationId, code: Option<i32>, output: String) -> CommandResult {
        match code {
            Some(0) => {
                log::debug!("[Fastboot] [{}] Completed successfully", id);
                CommandResult::ok(output)
            }
            Some(code)
                if self.inner.options.use_shell
                    && (code == SHELL_NOT_FOUND || code == SHELL_NOT_EXECUTABLE) =>
            {
                log::error!(
                    "[Fastboot] [{}] Shell could not start {} (exit {})",
                    id,
                    self.inner.binary.display(),
                    code
                );
                CommandResult::failure(
                    CommandErrorKind::ProcessSpawnError,
                    output,
                    Some(code),
                    format!(
                        "Failed to start {} (shell exit code {})",
                        self.inner.binary.display(),
                        code
                    ),
                )
            }
            Some(code) => {
                log::warn!("[Fastboot] [{}] Command failed with exit code: {}", id, code);
                CommandResult::failure(
                    CommandErrorKind::NonZeroExit,
                    output,
                    Some(code),
                    format!("Command failed with exit code: {}", code),
                )
            }
            None => {
                log::warn!("[Fastboot] [{}] Command terminated by signal", id);
                CommandResult::failure(
                    CommandErrorKind::NonZeroExit,
                    output,
                    None,
                    "Command terminated by signal",
                )
            }
        }
    }
}

#[async_trait]
impl CommandRunner for CommandExecutor {
    async fn run(&self, args: &[String], timeout: Duration) -> CommandResult {
        self.execute(args, timeout).await
    }

    fn default_timeout(&self) -> Duration {
        self.inner.options.default_timeout
    }
}

fn kill_live(mut live: LiveInvocation) {
    if let Some(tx) = live.kill_tx.take() {
        let _ = tx.send(());
    }
    terminate_group(live.pid);
}

/// SIGKILL the invocation's process group so the binary behind the shell dies too.
fn terminate_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            log::debug!("[Fastboot] killpg({}) failed: {}", pid, e);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Copy a child pipe into `sink` chunk by chunk, so an aborted reader still
/// leaves what it read so far.
async fn read_stream<R>(stream: Option<R>, sink: Arc<Mutex<Vec<u8>>>)
where
    R: AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return;
    };
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .extend_from_slice(&chunk[..n]),
        }
    }
}

fn take_buffer(buf: &Mutex<Vec<u8>>) -> Vec<u8> {
    std::mem::take(&mut *buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
}

/// stdout wins when non-empty; the binary writes most of its text to stderr.
pub(crate) fn decode_output(stdout: &[u8], stderr: &[u8]) -> String {
    let raw = if !stdout.is_empty() { stdout } else { stderr };
    String::from_utf8_lossy(raw).trim().to_string()
}

fn shell_command_line(binary: &Path, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(quote_arg(&binary.to_string_lossy()));
    parts.extend(args.iter().map(|a| quote_arg(a)));
    parts.join(" ")
}

#[cfg(not(windows))]
fn quote_arg(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', "'\\''"))
}

#[cfg(windows)]
fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"', '&', '|', '<', '>', '^']) {
        return arg.to_string();
    }
    format!("\"{}\"", arg.replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_prefers_stdout() {
        assert_eq!(decode_output(b"  out \n", b"err"), "out");
    }

    #[test]
    fn test_decode_falls_back_to_stderr() {
        assert_eq!(decode_output(b"", b"\nproduct: raphael\n"), "product: raphael");
    }

    #[test]
    fn test_decode_lossy_utf8() {
        assert_eq!(decode_output(&[0x66, 0xff, 0x6f], b""), "f\u{fffd}o");
    }

    #[cfg(not(windows))]
    #[test]
    fn test_quote_arg_plain_and_spaced() {
        assert_eq!(quote_arg("boot"), "boot");
        assert_eq!(quote_arg("/tmp/boot.img"), "/tmp/boot.img");
        assert_eq!(quote_arg("my image.img"), "'my image.img'");
        assert_eq!(quote_arg("it's"), "'it'\\''s'");
        assert_eq!(quote_arg(""), "''");
    }

    #[test]
    fn test_invocation_id_display() {
        assert_eq!(InvocationId(7).to_string(), "fastboot-7");
    }

    #[test]
    fn test_failure_message_combines_output() {
        let result = CommandResult::failure(
            CommandErrorKind::NonZeroExit,
            "FAILED (remote: 'partition not found')",
            Some(1),
            "Command failed with exit code: 1",
        );
        assert_eq!(
            result.failure_message(),
            "Command failed with exit code: 1: FAILED (remote: 'partition not found')"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_success_captures_stdout() {
        let executor = CommandExecutor::new("echo", ExecutorOptions::default());
        let result = executor
            .execute(&["hello".to_string()], Duration::from_secs(5))
            .await;
        assert!(result.success);
        assert_eq!(result.output, "hello");
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(executor.active_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_nonzero_exit_uses_stderr() {
        let executor = CommandExecutor::new("sh", ExecutorOptions::default());
        let args = vec!["-c".to_string(), "echo oops >&2; exit 3".to_string()];
        let result = executor.execute(&args, Duration::from_secs(5)).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(CommandErrorKind::NonZeroExit));
        assert_eq!(result.exit_code, Some(3));
        assert!(!result.stopped);
        assert_eq!(result.output, "oops");
        assert!(result.error.unwrap().contains('3'));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_timeout_kills_and_forgets() {
        let executor = CommandExecutor::new("sleep", ExecutorOptions::default());
        let started = std::time::Instant::now();
        let handle = executor.spawn(&["10".to_string()], Duration::from_millis(200));
        let id = handle.id;
        assert!(executor.is_active(id));

        let result = handle.wait().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(CommandErrorKind::Timeout));
        assert_eq!(result.exit_code, Some(-1));
        assert!(result.output.is_empty());
        assert!(!executor.is_active(id));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_binary_direct_spawn() {
        let options = ExecutorOptions {
            use_shell: false,
            ..ExecutorOptions::default()
        };
        let executor = CommandExecutor::new("/nonexistent/dir/fastboot", options);
        let result = executor.execute(&[], Duration::from_secs(5)).await;
        assert_eq!(result.error_kind, Some(CommandErrorKind::ProcessSpawnError));
        assert_eq!(executor.active_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_binary_through_shell() {
        let executor =
            CommandExecutor::new("/nonexistent/dir/fastboot", ExecutorOptions::default());
        let result = executor.execute(&["devices".to_string()], Duration::from_secs(5)).await;
        assert_eq!(result.error_kind, Some(CommandErrorKind::ProcessSpawnError));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_process_is_idempotent() {
        let executor = CommandExecutor::new("sleep", ExecutorOptions::default());
        let handle = executor.spawn(&["10".to_string()], Duration::from_secs(30));
        let id = handle.id;

        assert!(executor.stop_process(id));
        assert!(!executor.stop_process(id));

        let result = handle.wait().await;
        assert!(!result.success);
        assert!(result.stopped);
        assert_eq!(result.error_kind, Some(CommandErrorKind::NonZeroExit));
        assert_eq!(result.exit_code, None);
        assert_eq!(executor.active_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_with_inherited_pipes_does_not_hang() {
        let executor = CommandExecutor::new("sh", ExecutorOptions::default());
        let args = vec!["-c".to_string(), "echo ready; sleep 10 &".to_string()];
        let started = std::time::Instant::now();
        let result = executor.execute(&args, Duration::from_secs(30)).await;

        assert!(started.elapsed() < Duration::from_secs(6));
        assert!(result.success);
        assert_eq!(result.output, "ready");
        assert_eq!(executor.active_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cleanup_kills_everything() {
        let executor = CommandExecutor::new("sleep", ExecutorOptions::default());
        let a = executor.spawn(&["10".to_string()], Duration::from_secs(30));
        let b = executor.spawn(&["10".to_string()], Duration::from_secs(30));
        assert_eq!(executor.active_count(), 2);

        executor.cleanup();
        assert_eq!(executor.active_count(), 0);

        let (ra, rb) = tokio::join!(a.wait(), b.wait());
        assert!(!ra.success);
        assert!(!rb.success);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invocation_ids_are_unique() {
        let executor = CommandExecutor::new("true", ExecutorOptions::default());
        let a = executor.spawn(&[], Duration::from_secs(5));
        let b = executor.spawn(&[], Duration::from_secs(5));
        assert_ne!(a.id, b.id);
        a.wait().await;
        b.wait().await;
    }
}
