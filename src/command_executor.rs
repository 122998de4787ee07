//! command_executor.rs - Runs external tools with captured output and a hard timeout.
//!
//! Every privileged tool goes through `CommandExecutor::run_tool`. The child:
//!
//! - runs in its own process group (see `process_guard`)
//! - has stdout and stderr captured into one buffer, never echoed to our terminal
//! - is registered with the global child registry while it runs
//! - is torn down as a whole group when its timeout elapses
//!
//! Both reader threads are joined before a result is returned, so a result
//! always carries everything the child wrote.

use crate::process_guard::{ChildRegistration, CommandProcessGroup, terminate_groups};
use crate::tool_traits::ToolInvocation;
use crate::types::ExecutionMode;
use log::{debug, info, warn};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

/// Upper bound on bytes kept from a single child; older output is dropped first.
pub const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// Grace between SIGTERM and SIGKILL for a timed-out group.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// How long the pipes may stay open once the child itself is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// A fully resolved command: argv, environment and optional stdin.
#[derive(Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
    /// Loggable form of the command. Never contains `stdin`.
    pub display: String,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        let program = program.into();
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let display = std::iter::once(program.clone())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            program,
            args,
            env: Vec::new(),
            stdin: None,
            display,
        }
    }

    pub fn from_tool<T: ToolInvocation + ?Sized>(tool: &T) -> Self {
        Self {
            program: tool.program().to_string(),
            args: tool.to_cli_args(),
            env: tool.get_env_vars(),
            stdin: tool.stdin_payload(),
            display: tool.display(),
        }
    }

    pub fn with_stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin = Some(payload.into());
        self
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("display", &self.display)
            .field("stdin", &self.stdin.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Outcome of one external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// `exit_code == Some(0)`.
    pub success: bool,
    /// Combined stdout and stderr.
    pub output: String,
    /// Why the command failed; `None` on success.
    pub error: Option<String>,
    /// `None` when the child was killed (timeout or signal) or never spawned.
    pub exit_code: Option<i32>,
    /// The command was skipped because the executor runs in simulated mode.
    pub simulated: bool,
}

impl CommandResult {
    /// Synthetic success returned instead of running a tool.
    pub fn simulated() -> Self {
        Self {
            success: true,
            output: String::new(),
            error: None,
            exit_code: Some(0),
            simulated: true,
        }
    }

    fn failed(error: String, exit_code: Option<i32>, output: String) -> Self {
        Self {
            success: false,
            output,
            error: Some(error),
            exit_code,
            simulated: false,
        }
    }

    /// Error message, or a generic one for a result that carries none.
    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

/// Runs tools according to the execution mode it was built with.
#[derive(Debug, Clone, Copy)]
pub struct CommandExecutor {
    mode: ExecutionMode,
}

impl CommandExecutor {
    pub fn new(mode: ExecutionMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Run a typed tool, or report synthetic success in simulated mode.
    pub fn run_tool<T: ToolInvocation + ?Sized>(&self, tool: &T, timeout: Duration) -> CommandResult {
        let spec = CommandSpec::from_tool(tool);
        if self.mode.is_simulated() {
            info!("[SIMULATED] {}", spec.display);
            return CommandResult::simulated();
        }
        run_with_capture(&spec, timeout)
    }
}

/// Spawn `spec`, capture its output and wait at most `timeout`.
///
/// The child is always reaped before this returns. Output is drained for at
/// most `DRAIN_GRACE` after that, so a descendant that left the process group
/// and still holds the pipes cannot stall the caller; whatever was captured
/// by then is returned.
pub fn run_with_capture(spec: &CommandSpec, timeout: Duration) -> CommandResult {
    info!("Executing: {}", spec.display);

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .in_new_process_group();
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!("Failed to spawn {}: {}", spec.program, e);
            return CommandResult::failed(e.to_string(), None, String::new());
        }
    };
    let pid = child.id();
    let _registration = ChildRegistration::new(pid);

    let buffer = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = mpsc::channel();
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, Arc::clone(&buffer), done_tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, Arc::clone(&buffer), done_tx.clone()));
    }
    drop(done_tx);

    if let (Some(mut stdin), Some(payload)) = (child.stdin.take(), spec.stdin.as_ref()) {
        // A child that exits without reading leaves us a broken pipe.
        if let Err(e) = stdin.write_all(payload.as_bytes()) {
            if e.kind() != ErrorKind::BrokenPipe {
                warn!("Failed to write stdin for {}: {}", spec.program, e);
            }
        }
    }

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => Ok(status),
        Ok(None) => {
            warn!(
                "{} exceeded {}s, terminating process group {}",
                spec.program,
                timeout.as_secs_f64(),
                pid
            );
            terminate_groups(&[pid], KILL_GRACE);
            let _ = child.kill();
            let _ = child.wait();
            Err(format!("Command timed out after {}s", timeout.as_secs_f64()))
        }
        Err(e) => {
            terminate_groups(&[pid], KILL_GRACE);
            let _ = child.kill();
            let _ = child.wait();
            Err(e.to_string())
        }
    };

    drain_readers(spec, readers, &done_rx, DRAIN_GRACE);
    let output = take_output(&buffer);

    match status {
        Ok(status) => finish(spec, status, output),
        Err(message) => CommandResult::failed(message, None, output),
    }
}

fn finish(spec: &CommandSpec, status: ExitStatus, output: String) -> CommandResult {
    match status.code() {
        Some(0) => {
            debug!("{} exited successfully", spec.program);
            CommandResult {
                success: true,
                output,
                error: None,
                exit_code: Some(0),
                simulated: false,
            }
        }
        Some(code) => {
            info!("{} failed with exit code {}", spec.program, code);
            CommandResult::failed(format!("exit code: {}", code), Some(code), output)
        }
        None => {
            let signal = status.signal().unwrap_or_default();
            info!("{} terminated by signal {}", spec.program, signal);
            CommandResult::failed(format!("terminated by signal {}", signal), None, output)
        }
    }
}

/// Join readers that reach EOF within `grace`; detach the rest.
fn drain_readers(spec: &CommandSpec, readers: Vec<JoinHandle<()>>, done: &Receiver<()>, grace: Duration) {
    let deadline = Instant::now() + grace;
    let mut finished = 0;
    while finished < readers.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match done.recv_timeout(remaining) {
            Ok(()) => finished += 1,
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Output of {} still open {}s after exit, a descendant holds the pipes",
                    spec.program,
                    grace.as_secs_f64()
                );
                return;
            }
        }
    }
    for reader in readers {
        let _ = reader.join();
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    mut source: R,
    sink: Arc<Mutex<Vec<u8>>>,
    done: Sender<()>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match source.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    let mut buf = sink.lock().unwrap_or_else(|p| p.into_inner());
                    buf.extend_from_slice(&chunk[..n]);
                    if buf.len() > MAX_CAPTURE_BYTES {
                        let excess = buf.len() - MAX_CAPTURE_BYTES;
                        buf.drain(..excess);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let _ = done.send(());
    })
}

fn take_output(buffer: &Mutex<Vec<u8>>) -> String {
    let bytes = std::mem::take(&mut *buffer.lock().unwrap_or_else(|p| p.into_inner()));
    String::from_utf8_lossy(&bytes).into_owned()
}
