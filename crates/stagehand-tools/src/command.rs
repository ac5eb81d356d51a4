//! Process runner
//!
//! Spawns an external program with piped stdout/stderr, drains both pipes in
//! their own tasks while waiting for exit, and returns a [`CommandResult`].
//! Mirrored lines are handed to the sink from a separate blocking task, so a
//! slow sink delays the result but never shortens what is captured.
//! Nothing here returns an error: spawn failures, I/O failures, timeouts and
//! cancellation are all described by the result.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::sink::{LineSink, OutputStream, TracingSink};

/// Exit code reported when the process produced none: it failed to start,
/// reading its output failed, it timed out, or a signal terminated it.
pub const EXIT_UNAVAILABLE: i32 = -1;

/// Exit code reported for a canceled process
pub const EXIT_CANCELED: i32 = 130;

/// How long to keep draining pipes after the process is gone. A grandchild
/// that inherited the pipes can keep them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Outcome of one process invocation
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    /// Program as it was passed to the OS
    pub program: String,
    /// Exit code, or one of the sentinel codes
    pub code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Why the process could not run to completion, if it could not
    pub error: Option<String>,
    /// Whether `code` is one of the expected success codes
    pub success: bool,
    /// Whether the run was canceled by the caller
    pub canceled: bool,
    /// Whether the run hit its timeout
    pub timed_out: bool,
    /// Whether output may be incomplete because a pipe stayed open after exit
    pub truncated: bool,
    /// OS process id, when the process started
    pub pid: Option<u32>,
    /// Wall-clock time in milliseconds
    pub duration_ms: u64,
}

impl CommandResult {
    fn not_started(program: &str, message: String, elapsed: Duration) -> Self {
        Self {
            program: program.to_string(),
            code: EXIT_UNAVAILABLE,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(message),
            success: false,
            canceled: false,
            timed_out: false,
            truncated: false,
            pid: None,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    /// Best available description of a failed run
    pub fn failure_message(&self) -> String {
        if let Some(err) = &self.error {
            return err.clone();
        }
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("'{}' exited with code {}", self.program, self.code)
        } else {
            format!("'{}' exited with code {}: {}", self.program, self.code, stderr)
        }
    }
}

/// Builder for one process invocation
#[derive(Clone)]
pub struct Command {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    mirror: bool,
    success_codes: Vec<i32>,
    timeout: Option<Duration>,
    sink: Arc<dyn LineSink>,
}

impl Command {
    /// Run `program` directly (no shell)
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            mirror: false,
            success_codes: vec![0],
            timeout: None,
            sink: Arc::new(TracingSink),
        }
    }

    /// Run a command line through the platform shell
    pub fn shell(line: impl AsRef<str>) -> Self {
        if cfg!(windows) {
            Self::new("cmd").arg("/C").arg(line.as_ref())
        } else {
            Self::new("sh").arg("-c").arg(line.as_ref())
        }
    }

    /// Add an argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set several environment variables
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Mirror output lines to the sink as they arrive
    pub fn mirror_output(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    /// Exit codes treated as success (default: `0`)
    pub fn success_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.success_codes = codes.into_iter().collect();
        self
    }

    /// Kill the process if it runs longer than `timeout`
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Destination for mirrored lines (default: [`TracingSink`])
    pub fn sink(mut self, sink: Arc<dyn LineSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Run to completion without a way to cancel
    pub async fn output(&self) -> CommandResult {
        self.run(&CancellationToken::new()).await
    }

    /// Run until the process exits or `cancel` fires.
    ///
    /// On cancellation or timeout the process is killed (on Unix, together
    /// with its process group) and reaped before this returns.
    pub async fn run(&self, cancel: &CancellationToken) -> CommandResult {
        let start = Instant::now();

        if cancel.is_cancelled() {
            let mut result =
                CommandResult::not_started(&self.program, "canceled before start".to_string(), start.elapsed());
            result.code = EXIT_CANCELED;
            result.canceled = true;
            return result;
        }

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(program = %self.program, args = ?self.args, cwd = ?self.cwd, "spawning process");

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!("failed to start '{}': {}", self.program, e);
                warn!(program = %self.program, error = %e, "process spawn failed");
                return CommandResult::not_started(&self.program, message, start.elapsed());
            }
        };
        let pid = child.id();

        let (mirror_tx, mirror) = if self.mirror {
            let (tx, handle) = spawn_mirror(self.sink.clone(), Arc::from(program_label(&self.program)));
            (Some(tx), Some(handle))
        } else {
            (None, None)
        };
        let stdout = child
            .stdout
            .take()
            .map(|out| Drain::spawn(out, OutputStream::Stdout, mirror_tx.clone()));
        let stderr = child
            .stderr
            .take()
            .map(|err| Drain::spawn(err, OutputStream::Stderr, mirror_tx.clone()));
        // The drains hold the only senders; the mirror ends once both finish
        drop(mirror_tx);

        let deadline = async {
            match self.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = cancel.cancelled() => Outcome::Canceled,
            _ = deadline => Outcome::TimedOut,
        };

        let (mut code, mut error, canceled, timed_out) = match outcome {
            Outcome::Exited(Ok(status)) => (status.code().unwrap_or(EXIT_UNAVAILABLE), None, false, false),
            Outcome::Exited(Err(e)) => (
                EXIT_UNAVAILABLE,
                Some(format!("failed waiting for '{}': {}", self.program, e)),
                false,
                false,
            ),
            Outcome::Canceled => {
                info!(program = %self.program, pid, "cancellation requested; killing process");
                terminate(&mut child, &self.program).await;
                (EXIT_CANCELED, None, true, false)
            }
            Outcome::TimedOut => {
                let limit = self.timeout.unwrap_or_default();
                warn!(program = %self.program, pid, timeout_secs = limit.as_secs_f64(), "process timed out; killing");
                terminate(&mut child, &self.program).await;
                (
                    EXIT_UNAVAILABLE,
                    Some(format!("'{}' timed out after {:.1}s", self.program, limit.as_secs_f64())),
                    false,
                    true,
                )
            }
        };

        let stdout = Drain::finish(stdout).await;
        let stderr = Drain::finish(stderr).await;
        let truncated = stdout.abandoned || stderr.abandoned;
        if truncated {
            warn!(program = %self.program, pid, "output pipe still open after process exit; captured output may be incomplete");
        }
        if let Some(handle) = mirror {
            if let Err(e) = handle.await {
                warn!(program = %self.program, error = %e, "output mirror failed");
            }
        }
        if let Some(e) = stdout.error.or(stderr.error) {
            if error.is_none() && !canceled {
                code = EXIT_UNAVAILABLE;
                error = Some(format!("failed reading output of '{}': {}", self.program, e));
            }
        }

        let success = error.is_none() && !canceled && self.success_codes.contains(&code);
        let elapsed = start.elapsed();

        if self.mirror && !canceled {
            if success {
                info!(program = %self.program, "finish {} with code: {}", self.program, code);
            } else {
                error!(program = %self.program, "finish {} with code: {}", self.program, code);
            }
        }
        debug!(
            program = %self.program,
            exit_code = code,
            success,
            canceled,
            duration_ms = elapsed.as_millis() as u64,
            "process finished"
        );

        CommandResult {
            program: self.program.clone(),
            code,
            stdout: stdout.text,
            stderr: stderr.text,
            error,
            success,
            canceled,
            timed_out,
            truncated,
            pid,
            duration_ms: elapsed.as_millis() as u64,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .field("mirror", &self.mirror)
            .field("success_codes", &self.success_codes)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Run `bin` with `args` in `working_dir`.
///
/// Shorthand for [`Command`] without cancellation.
pub async fn run<I, S>(bin: &str, working_dir: Option<&Path>, args: I, mirror_output: bool) -> CommandResult
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut cmd = Command::new(bin).args(args).mirror_output(mirror_output);
    if let Some(dir) = working_dir {
        cmd = cmd.current_dir(dir);
    }
    cmd.output().await
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    Canceled,
    TimedOut,
}

/// Kill the child and reap it
async fn terminate(child: &mut Child, program: &str) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // The child leads its own process group (see `process_group(0)`).
            // SAFETY: killpg has no memory-safety preconditions.
            unsafe {
                libc::killpg(pid as libc::pid_t, libc::SIGKILL);
            }
        }
    }
    if let Err(e) = child.kill().await {
        warn!(program, error = %e, "failed to kill child process");
    }
}

fn program_label(program: &str) -> String {
    Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}

type MirrorSender = mpsc::UnboundedSender<(OutputStream, String)>;

/// Feed mirrored lines to `sink` off the capture path
fn spawn_mirror(sink: Arc<dyn LineSink>, label: Arc<str>) -> (MirrorSender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<(OutputStream, String)>();
    let handle = tokio::task::spawn_blocking(move || {
        while let Some((stream, line)) = rx.blocking_recv() {
            sink.line(&label, stream, &line);
        }
    });
    (tx, handle)
}

/// What a finished drain captured
struct Drained {
    text: String,
    error: Option<std::io::Error>,
    abandoned: bool,
}

/// A pipe being read in the background into a shared buffer
struct Drain {
    buffer: Arc<Mutex<String>>,
    handle: JoinHandle<std::io::Result<()>>,
}

impl Drain {
    fn spawn<R>(reader: R, stream: OutputStream, mirror: Option<MirrorSender>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(String::new()));
        let shared = buffer.clone();
        let handle = tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut line = Vec::new();
            loop {
                line.clear();
                if reader.read_until(b'\n', &mut line).await? == 0 {
                    return Ok(());
                }
                let text = String::from_utf8_lossy(&line);
                if let Some(mirror) = &mirror {
                    // A closed mirror only stops mirroring, never capture
                    let _ = mirror.send((stream, text.trim_end_matches(['\r', '\n']).to_string()));
                }
                shared
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push_str(&text);
            }
        });
        Self { buffer, handle }
    }

    /// Wait briefly for the reader to hit EOF, then take what was captured
    async fn finish(drain: Option<Self>) -> Drained {
        let Some(mut drain) = drain else {
            return Drained {
                text: String::new(),
                error: None,
                abandoned: false,
            };
        };

        let (error, abandoned) = match tokio::time::timeout(DRAIN_GRACE, &mut drain.handle).await {
            Ok(Ok(Ok(()))) => (None, false),
            Ok(Ok(Err(e))) => (Some(e), false),
            Ok(Err(join)) => (Some(std::io::Error::new(std::io::ErrorKind::Other, join.to_string())), false),
            Err(_) => {
                drain.handle.abort();
                (None, true)
            }
        };

        let text = std::mem::take(&mut *drain.buffer.lock().unwrap_or_else(PoisonError::into_inner));
        Drained { text, error, abandoned }
    }
}
