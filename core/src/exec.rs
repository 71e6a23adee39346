//! Foreground process runner: pipe-stdio spawn with timeout, cancellation,
//! and capped output capture.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use std::time::Instant;

use async_channel::Sender;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::Command;

use crate::cancel::CancellationSignal;
use crate::error::LoafErr;
use crate::error::Result;
use crate::truncate::truncate_front;

pub const STREAM_CAP_CHARS: usize = 300_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;
pub const MAX_TIMEOUT_MS: u64 = 1_200_000;

/// Byte headroom for the capture rings: worst case four bytes per char.
const STREAM_CAP_BYTES: usize = STREAM_CAP_CHARS * 4;
const READ_CHUNK_SIZE: usize = 8192;

/// After the child exits, readers get this long to observe pipe close.
/// A grandchild that inherited the pipe can keep it open indefinitely;
/// without the grace cutoff the runner would hang until it died too.
const EXIT_CLOSE_GRACE: Duration = Duration::from_millis(250);

/// SIGTERM is sent on timeout/abort; SIGKILL follows after this delay.
const KILL_ESCALATION_DELAY: Duration = Duration::from_millis(1_500);

const EXIT_CODE_SIGNAL_BASE: i32 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdinPolicy {
    /// Foreground runs: the child gets no stdin.
    Ignore,
    /// Pipe-transport background sessions keep stdin writable.
    Pipe,
}

#[derive(Debug, Clone)]
pub struct ExecParams {
    pub command: Vec<String>,
    pub cwd: PathBuf,
    pub timeout_ms: Option<u64>,
    pub env: HashMap<String, String>,
    pub stdin: StdinPolicy,
}

impl ExecParams {
    pub fn timeout_duration(&self) -> Duration {
        let ms = self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS).min(MAX_TIMEOUT_MS);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOutput {
    pub text: String,
    pub truncated: bool,
}

#[derive(Debug)]
pub struct ExecToolCallOutput {
    pub exit_code: i32,
    pub signal: Option<i32>,
    pub stdout: StreamOutput,
    pub stderr: StreamOutput,
    pub aggregated_output: StreamOutput,
    pub duration: Duration,
    pub timed_out: bool,
    pub aborted: bool,
}

/// Ring of raw output chunks, trimmed from the front once over the cap.
#[derive(Debug, Default)]
struct CapturedStream {
    chunks: VecDeque<Vec<u8>>,
    total_bytes: usize,
    dropped: bool,
}

impl CapturedStream {
    fn push_chunk(&mut self, chunk: Vec<u8>) {
        self.total_bytes = self.total_bytes.saturating_add(chunk.len());
        self.chunks.push_back(chunk);

        let mut excess = self.total_bytes.saturating_sub(STREAM_CAP_BYTES);
        while excess > 0 {
            match self.chunks.front_mut() {
                Some(front) if excess >= front.len() => {
                    excess -= front.len();
                    self.total_bytes -= front.len();
                    self.chunks.pop_front();
                    self.dropped = true;
                }
                Some(front) => {
                    front.drain(..excess);
                    self.total_bytes -= excess;
                    self.dropped = true;
                    break;
                }
                None => break,
            }
        }
    }

    fn push_note(&mut self, note: &str) {
        self.push_chunk(note.as_bytes().to_vec());
    }

    fn into_stream_output(self) -> StreamOutput {
        let mut bytes = Vec::with_capacity(self.total_bytes);
        for chunk in &self.chunks {
            bytes.extend_from_slice(chunk);
        }
        let decoded = String::from_utf8_lossy(&bytes);
        let (text, clipped) = truncate_front(&decoded, STREAM_CAP_CHARS);
        StreamOutput {
            text,
            truncated: self.dropped || clipped.is_some(),
        }
    }
}

type SharedCapture = Arc<StdMutex<CapturedStream>>;

/// Runs a command to completion, enforcing the timeout and reacting to the
/// optional cancellation signal. Reader I/O failures are folded into the
/// captured stderr rather than failing the run.
pub async fn run_exec(
    params: ExecParams,
    cancel: Option<CancellationSignal>,
) -> Result<ExecToolCallOutput> {
    let timeout = params.timeout_duration();
    let ExecParams {
        command,
        cwd,
        env,
        stdin,
        ..
    } = params;

    let (program, args) = command
        .split_first()
        .ok_or_else(|| LoafErr::invalid_input("command args are empty"))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .env_clear()
        .envs(env)
        .stdin(match stdin {
            StdinPolicy::Ignore => Stdio::null(),
            StdinPolicy::Pipe => Stdio::piped(),
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let pid = child.id();
    let start = Instant::now();

    let stdout_reader = child
        .stdout
        .take()
        .ok_or_else(|| LoafErr::Io(std::io::Error::other("stdout pipe unavailable")))?;
    let stderr_reader = child
        .stderr
        .take()
        .ok_or_else(|| LoafErr::Io(std::io::Error::other("stderr pipe unavailable")))?;

    let stdout_cap: SharedCapture = Arc::new(StdMutex::new(CapturedStream::default()));
    let stderr_cap: SharedCapture = Arc::new(StdMutex::new(CapturedStream::default()));
    let (agg_tx, agg_rx) = async_channel::unbounded::<Vec<u8>>();

    let stdout_task = tokio::spawn(read_into(
        BufReader::new(stdout_reader),
        Arc::clone(&stdout_cap),
        Arc::clone(&stderr_cap),
        Some(agg_tx.clone()),
    ));
    let stderr_task = tokio::spawn(read_into(
        BufReader::new(stderr_reader),
        Arc::clone(&stderr_cap),
        Arc::clone(&stderr_cap),
        Some(agg_tx.clone()),
    ));

    let mut timed_out = false;
    let mut aborted = false;

    let exit_status = {
        let cancel_fired = async {
            match &cancel {
                Some(signal) => signal.cancelled().await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            result = tokio::time::timeout(timeout, child.wait()) => {
                match result {
                    Ok(status) => Some(status?),
                    Err(_) => {
                        timed_out = true;
                        terminate_child(&mut child, pid).await
                    }
                }
            }
            _ = cancel_fired => {
                aborted = true;
                terminate_child(&mut child, pid).await
            }
        }
    };

    // Exit has settled; give the readers a short window to observe pipe
    // close. A grandchild can inherit the pipe and keep it open, so after
    // the grace window the reader is abandoned and the shared capture
    // keeps whatever was read up to that point.
    for task in [stdout_task, stderr_task] {
        let _ = tokio::time::timeout(EXIT_CLOSE_GRACE, task).await;
    }
    drop(agg_tx);

    let mut aggregated = CapturedStream::default();
    while let Ok(chunk) = agg_rx.try_recv() {
        aggregated.push_chunk(chunk);
    }

    let (exit_code, signal) = settle_status(exit_status, timed_out, aborted);

    let stdout = take_capture(&stdout_cap).into_stream_output();
    let stderr = take_capture(&stderr_cap).into_stream_output();

    Ok(ExecToolCallOutput {
        exit_code,
        signal,
        stdout,
        stderr,
        aggregated_output: aggregated.into_stream_output(),
        duration: start.elapsed(),
        timed_out,
        aborted,
    })
}

fn take_capture(cap: &SharedCapture) -> CapturedStream {
    match cap.lock() {
        Ok(mut guard) => std::mem::take(&mut *guard),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    }
}

fn settle_status(
    exit_status: Option<std::process::ExitStatus>,
    timed_out: bool,
    aborted: bool,
) -> (i32, Option<i32>) {
    let signal = exit_status.and_then(|status| {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        }
        #[cfg(not(unix))]
        {
            let _ = status;
            None
        }
    });
    let exit_code = match exit_status {
        Some(status) => status
            .code()
            .or(signal.map(|sig| EXIT_CODE_SIGNAL_BASE + sig))
            .unwrap_or(-1),
        None => {
            if timed_out || aborted {
                EXIT_CODE_SIGNAL_BASE + sigterm_code()
            } else {
                -1
            }
        }
    };
    (exit_code, signal)
}

const fn sigterm_code() -> i32 {
    15
}

/// SIGTERM immediately, SIGKILL after the escalation delay. Returns the
/// observed exit status when the child went down in time.
async fn terminate_child(child: &mut Child, pid: Option<u32>) -> Option<std::process::ExitStatus> {
    send_sigterm(pid);
    match tokio::time::timeout(KILL_ESCALATION_DELAY, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(_)) => None,
        Err(_) => {
            let _ = child.start_kill();
            child.wait().await.ok()
        }
    }
}

#[cfg(unix)]
fn send_sigterm(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: Option<u32>) {}

async fn read_into<R: AsyncRead + Unpin + Send + 'static>(
    mut reader: R,
    capture: SharedCapture,
    error_sink: SharedCapture,
    aggregate_tx: Option<Sender<Vec<u8>>>,
) {
    let mut tmp = [0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut tmp).await {
            Ok(0) => break,
            Ok(n) => {
                if let Some(tx) = &aggregate_tx {
                    let _ = tx.try_send(tmp[..n].to_vec());
                }
                if let Ok(mut guard) = capture.lock() {
                    guard.push_chunk(tmp[..n].to_vec());
                }
            }
            Err(err) => {
                if let Ok(mut guard) = error_sink.lock() {
                    guard.push_note(&format!("\n[stream read error: {err}]\n"));
                }
                break;
            }
        }
    }
}
