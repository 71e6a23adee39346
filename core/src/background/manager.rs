//! Registry of long-lived background shell sessions.
//!
//! Sessions outlive individual tool calls: a start request spawns a child
//! under a PTY (default) or plain pipes, reader tasks append output to the
//! session's capped streams, and later read/write/resize/stop requests are
//! routed by session id. Exited sessions stay in the registry so their
//! buffers remain readable until explicitly pruned.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use portable_pty::ChildKiller;
use portable_pty::CommandBuilder;
use portable_pty::MasterPty;
use portable_pty::PtySize;
use portable_pty::native_pty_system;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::warn;

use crate::background::params::MAX_READ_CHARS;
use crate::background::params::ReadSessionParams;
use crate::background::params::ResizeSessionParams;
use crate::background::params::StartSessionParams;
use crate::background::params::StopSessionParams;
use crate::background::params::StreamSelector;
use crate::background::params::WriteSessionParams;
use crate::background::sanitize::OutputSanitizer;
use crate::background::sanitize::decode_utf8_stream;
use crate::background::session::SessionId;
use crate::background::session::SessionState;
use crate::background::session::SessionStatus;
use crate::background::session::StreamReadSlice;
use crate::background::session::StreamState;
use crate::background::session::TransportKind;
use crate::background::session::special_key_bytes;
use crate::error::LoafErr;
use crate::error::Result;
use crate::shell::resolve_shell;
use crate::truncate::truncate_middle;

pub const MIN_TERMINAL_COLS: u16 = 40;
pub const MAX_TERMINAL_COLS: u16 = 400;
pub const MIN_TERMINAL_ROWS: u16 = 10;
pub const MAX_TERMINAL_ROWS: u16 = 200;

const STOP_GRACE: Duration = Duration::from_millis(120);
const FORCE_STOP_GRACE: Duration = Duration::from_millis(50);
const PTY_READ_CHUNK: usize = 8192;
const COMMAND_PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, Copy)]
enum KillKind {
    Term,
    Kill,
}

enum SessionControl {
    Pty {
        master: StdMutex<Box<dyn MasterPty + Send>>,
        killer: StdMutex<Box<dyn ChildKiller + Send + Sync>>,
    },
    Pipe {
        kill_tx: mpsc::Sender<KillKind>,
    },
}

pub(crate) struct ManagedSession {
    id: SessionId,
    state: Mutex<SessionState>,
    writer_tx: mpsc::Sender<Vec<u8>>,
    control: SessionControl,
}

impl ManagedSession {
    async fn terminate(&self, force: bool) {
        match &self.control {
            SessionControl::Pty { killer, .. } => {
                if force {
                    kill_via(killer);
                } else {
                    let pid = self.state.lock().await.pid;
                    if !send_sigterm(pid) {
                        kill_via(killer);
                    }
                }
            }
            SessionControl::Pipe { kill_tx } => {
                let kind = if force { KillKind::Kill } else { KillKind::Term };
                let _ = kill_tx.send(kind).await;
            }
        }
    }
}

fn kill_via(killer: &StdMutex<Box<dyn ChildKiller + Send + Sync>>) {
    if let Ok(mut guard) = killer.lock() {
        let _ = guard.kill();
    }
}

#[cfg(unix)]
fn send_sigterm(pid: Option<u32>) -> bool {
    match pid {
        Some(pid) => unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 },
        None => false,
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: Option<u32>) -> bool {
    false
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StartSessionResponse {
    pub session_id: SessionId,
    pub reused: bool,
    pub name: Option<String>,
    pub transport: TransportKind,
    pub shell: String,
    pub pid: Option<u32>,
    pub cwd: String,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReadSessionResponse {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<StreamReadSlice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<StreamReadSlice>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WriteSessionResponse {
    pub session_id: SessionId,
    pub wrote_bytes: usize,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResizeSessionResponse {
    pub session_id: SessionId,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StopSessionResponse {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionDescriptor {
    pub session_id: SessionId,
    pub name: Option<String>,
    pub command_preview: String,
    pub status: SessionStatus,
    pub transport: TransportKind,
    pub full_terminal: bool,
    pub pid: Option<u32>,
    pub cwd: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout_unread: u64,
    pub stderr_unread: u64,
    pub cols: u16,
    pub rows: u16,
}

struct Registry {
    next_id: AtomicU32,
    sessions: Mutex<HashMap<SessionId, Arc<ManagedSession>>>,
}

#[derive(Clone)]
pub struct BackgroundSessionManager {
    inner: Arc<Registry>,
}

impl Default for BackgroundSessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundSessionManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Registry {
                next_id: AtomicU32::new(0),
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub async fn start(&self, params: StartSessionParams) -> Result<StartSessionResponse> {
        if params.command.trim().is_empty() {
            return Err(LoafErr::invalid_input("command must not be empty"));
        }

        let cols = params
            .terminal_cols
            .clamp(MIN_TERMINAL_COLS, MAX_TERMINAL_COLS);
        let rows = params
            .terminal_rows
            .clamp(MIN_TERMINAL_ROWS, MAX_TERMINAL_ROWS);
        let cwd = match &params.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir()?,
        };

        if params.reuse_session {
            if let Some(name) = &params.session_name {
                if let Some(response) = self
                    .find_reusable(name, &cwd, params.full_terminal)
                    .await
                {
                    return Ok(response);
                }
            }
        }

        let shell = resolve_shell().ok_or(LoafErr::EnvUnavailable)?;
        let argv = shell.command_argv(&params.command);

        let mut env: HashMap<String, String> = std::env::vars().collect();
        if let Some(extra) = &params.env {
            env.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        #[cfg(windows)]
        if params.full_terminal {
            let parent: HashMap<String, String> = std::env::vars().collect();
            rehydrate_system_env(&mut env, &parent);
        }

        let id = SessionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let session = if params.full_terminal {
            self.spawn_pty_session(id, &params, &argv, shell.kind.tag(), cwd.clone(), env, cols, rows)?
        } else {
            self.spawn_pipe_session(id, &params, &argv, shell.kind.tag(), cwd.clone(), env)
                .await?
        };

        let response = {
            let state = session.state.lock().await;
            StartSessionResponse {
                session_id: id,
                reused: false,
                name: state.name.clone(),
                transport: state.transport,
                shell: state.shell_tag.clone(),
                pid: state.pid,
                cwd: state.cwd.display().to_string(),
                cols: state.cols,
                rows: state.rows,
            }
        };

        self.inner.sessions.lock().await.insert(id, session);
        debug!(session_id = id.0, "background session started");
        Ok(response)
    }

    async fn find_reusable(
        &self,
        name: &str,
        cwd: &PathBuf,
        full_terminal: bool,
    ) -> Option<StartSessionResponse> {
        let sessions = self.inner.sessions.lock().await;
        for (id, session) in sessions.iter() {
            let state = session.state.lock().await;
            if state.status == SessionStatus::Running
                && state.name.as_deref() == Some(name)
                && state.cwd == *cwd
                && state.full_terminal == full_terminal
            {
                return Some(StartSessionResponse {
                    session_id: *id,
                    reused: true,
                    name: state.name.clone(),
                    transport: state.transport,
                    shell: state.shell_tag.clone(),
                    pid: state.pid,
                    cwd: state.cwd.display().to_string(),
                    cols: state.cols,
                    rows: state.rows,
                });
            }
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_pty_session(
        &self,
        id: SessionId,
        params: &StartSessionParams,
        argv: &[String],
        shell_tag: &str,
        cwd: PathBuf,
        env: HashMap<String, String>,
        cols: u16,
        rows: u16,
    ) -> Result<Arc<ManagedSession>> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| LoafErr::Io(std::io::Error::other(err.to_string())))?;

        let mut builder = CommandBuilder::new(argv[0].clone());
        for arg in &argv[1..] {
            builder.arg(arg);
        }
        builder.cwd(&cwd);
        builder.env_clear();
        for (key, value) in &env {
            builder.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(builder)
            .map_err(|err| LoafErr::Io(std::io::Error::other(err.to_string())))?;
        drop(pair.slave);
        let pid = child.process_id();
        let killer = child.clone_killer();

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| LoafErr::Io(std::io::Error::other(err.to_string())))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|err| LoafErr::Io(std::io::Error::other(err.to_string())))?;

        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(128);
        let now = Utc::now();
        let session = Arc::new(ManagedSession {
            id,
            state: Mutex::new(SessionState {
                name: params.session_name.clone(),
                created_at: now,
                last_activity: now,
                cwd,
                shell_tag: shell_tag.to_string(),
                shell_program: argv[0].clone(),
                shell_argv: argv.to_vec(),
                command: params.command.clone(),
                pid,
                status: SessionStatus::Running,
                exit_code: None,
                signal: None,
                transport: TransportKind::Pty,
                full_terminal: true,
                cols,
                rows,
                stdout: StreamState::default(),
                // A PTY multiplexes both streams onto stdout; stderr stays
                // empty but remains part of the session state.
                stderr: StreamState::default(),
            }),
            writer_tx,
            control: SessionControl::Pty {
                master: StdMutex::new(pair.master),
                killer: StdMutex::new(killer),
            },
        });

        // Raw PTY bytes flow from a blocking reader thread into an async
        // appender that sanitizes before touching the stream state.
        let (bytes_tx, mut bytes_rx) = mpsc::channel::<Vec<u8>>(256);
        tokio::task::spawn_blocking(move || {
            use std::io::Read;
            let mut buf = [0u8; PTY_READ_CHUNK];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if bytes_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(ref err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });

        let appender_session = Arc::clone(&session);
        tokio::spawn(async move {
            let mut sanitizer = OutputSanitizer::new();
            while let Some(chunk) = bytes_rx.recv().await {
                let clean = sanitizer.push(&chunk);
                if !clean.is_empty() {
                    let mut state = appender_session.state.lock().await;
                    state.stdout.append(&clean);
                    state.touch();
                }
            }
            let rest = sanitizer.finish();
            if !rest.is_empty() {
                let mut state = appender_session.state.lock().await;
                state.stdout.append(&rest);
            }
        });

        let writer = Arc::new(StdMutex::new(writer));
        tokio::spawn(async move {
            while let Some(bytes) = writer_rx.recv().await {
                let writer = Arc::clone(&writer);
                let _ = tokio::task::spawn_blocking(move || {
                    if let Ok(mut guard) = writer.lock() {
                        use std::io::Write;
                        let _ = guard.write_all(&bytes);
                        let _ = guard.flush();
                    }
                })
                .await;
            }
        });

        let wait_session = Arc::clone(&session);
        tokio::spawn(async move {
            let status = tokio::task::spawn_blocking(move || child.wait()).await;
            let exit_code = match status {
                Ok(Ok(status)) => Some(status.exit_code() as i32),
                _ => None,
            };
            let mut state = wait_session.state.lock().await;
            state.mark_exited(exit_code, None);
            debug!(session_id = wait_session.id.0, exit_code, "pty session exited");
        });

        Ok(session)
    }

    async fn spawn_pipe_session(
        &self,
        id: SessionId,
        params: &StartSessionParams,
        argv: &[String],
        shell_tag: &str,
        cwd: PathBuf,
        env: HashMap<String, String>,
    ) -> Result<Arc<ManagedSession>> {
        let mut cmd = tokio::process::Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(&cwd)
            .env_clear()
            .envs(&env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn()?;
        let pid = child.id();

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| LoafErr::Io(std::io::Error::other("stdin pipe unavailable")))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| LoafErr::Io(std::io::Error::other("stdout pipe unavailable")))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| LoafErr::Io(std::io::Error::other("stderr pipe unavailable")))?;

        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(128);
        let (kill_tx, mut kill_rx) = mpsc::channel::<KillKind>(4);
        let now = Utc::now();
        let session = Arc::new(ManagedSession {
            id,
            state: Mutex::new(SessionState {
                name: params.session_name.clone(),
                created_at: now,
                last_activity: now,
                cwd,
                shell_tag: shell_tag.to_string(),
                shell_program: argv[0].clone(),
                shell_argv: argv.to_vec(),
                command: params.command.clone(),
                pid,
                status: SessionStatus::Running,
                exit_code: None,
                signal: None,
                transport: TransportKind::Pipe,
                full_terminal: false,
                cols: 0,
                rows: 0,
                stdout: StreamState::default(),
                stderr: StreamState::default(),
            }),
            writer_tx,
            control: SessionControl::Pipe { kill_tx },
        });

        tokio::spawn(async move {
            while let Some(bytes) = writer_rx.recv().await {
                if stdin.write_all(&bytes).await.is_err() {
                    break;
                }
                let _ = stdin.flush().await;
            }
        });

        let stdout_session = Arc::clone(&session);
        tokio::spawn(async move {
            let mut carry = Vec::new();
            let mut buf = [0u8; PTY_READ_CHUNK];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let text = decode_utf8_stream(&mut carry, &buf[..n]);
                        if !text.is_empty() {
                            let mut state = stdout_session.state.lock().await;
                            state.stdout.append(&text);
                            state.touch();
                        }
                    }
                }
            }
        });

        let stderr_session = Arc::clone(&session);
        tokio::spawn(async move {
            let mut carry = Vec::new();
            let mut buf = [0u8; PTY_READ_CHUNK];
            loop {
                match stderr.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let text = decode_utf8_stream(&mut carry, &buf[..n]);
                        if !text.is_empty() {
                            let mut state = stderr_session.state.lock().await;
                            state.stderr.append(&text);
                            state.touch();
                        }
                    }
                }
            }
        });

        let wait_session = Arc::clone(&session);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    status = child.wait() => {
                        let (exit_code, signal) = match status {
                            Ok(status) => decompose_exit_status(status),
                            Err(_) => (None, None),
                        };
                        let mut state = wait_session.state.lock().await;
                        state.mark_exited(exit_code, signal);
                        debug!(session_id = wait_session.id.0, exit_code, "pipe session exited");
                        break;
                    }
                    Some(kind) = kill_rx.recv() => {
                        match kind {
                            KillKind::Term => {
                                if !send_sigterm(child.id()) {
                                    let _ = child.start_kill();
                                }
                            }
                            KillKind::Kill => {
                                let _ = child.start_kill();
                            }
                        }
                    }
                }
            }
        });

        Ok(session)
    }

    async fn lookup(&self, id: SessionId) -> Result<Arc<ManagedSession>> {
        let sessions = self.inner.sessions.lock().await;
        sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| LoafErr::not_found(format!("unknown session id {id}")))
    }

    pub async fn read(&self, params: ReadSessionParams) -> Result<ReadSessionResponse> {
        let session = self.lookup(params.session_id).await?;
        let max_chars = params.max_chars.clamp(1, MAX_READ_CHARS);

        let mut state = session.state.lock().await;
        let stdout = match params.stream {
            StreamSelector::Both | StreamSelector::Stdout => {
                Some(state.stdout.read(max_chars, params.peek))
            }
            StreamSelector::Stderr => None,
        };
        let stderr = match params.stream {
            StreamSelector::Both | StreamSelector::Stderr => {
                Some(state.stderr.read(max_chars, params.peek))
            }
            StreamSelector::Stdout => None,
        };

        Ok(ReadSessionResponse {
            session_id: params.session_id,
            status: state.status,
            exit_code: state.exit_code,
            signal: state.signal,
            stdout,
            stderr,
        })
    }

    pub async fn write(&self, params: WriteSessionParams) -> Result<WriteSessionResponse> {
        let session = self.lookup(params.session_id).await?;
        if !(1..=100).contains(&params.repeat) {
            return Err(LoafErr::invalid_input("repeat must be within 1..=100"));
        }

        let bytes: Vec<u8> = match (&params.input, &params.key) {
            (Some(_), Some(_)) => {
                return Err(LoafErr::invalid_input(
                    "provide either input text or a key, not both",
                ));
            }
            (None, None) => {
                return Err(LoafErr::invalid_input("input or key is required"));
            }
            (Some(input), None) => {
                let mut bytes = input.clone().into_bytes();
                if params.append_newline {
                    bytes.push(b'\n');
                }
                bytes
            }
            (None, Some(key)) => {
                let seq = special_key_bytes(key)
                    .ok_or_else(|| LoafErr::unsupported(format!("unknown special key '{key}'")))?;
                seq.repeat(params.repeat as usize)
            }
        };

        {
            let state = session.state.lock().await;
            if state.status == SessionStatus::Exited {
                return Err(LoafErr::invalid_input(format!(
                    "session {} has exited",
                    params.session_id
                )));
            }
        }

        let wrote_bytes = bytes.len();
        session
            .writer_tx
            .send(bytes)
            .await
            .map_err(|_| LoafErr::Io(std::io::Error::other("failed to write to session stdin")))?;

        let mut state = session.state.lock().await;
        state.touch();
        Ok(WriteSessionResponse {
            session_id: params.session_id,
            wrote_bytes,
            status: state.status,
        })
    }

    pub async fn resize(&self, params: ResizeSessionParams) -> Result<ResizeSessionResponse> {
        let session = self.lookup(params.session_id).await?;
        let SessionControl::Pty { master, .. } = &session.control else {
            return Err(LoafErr::unsupported(
                "resize is only supported for pty sessions",
            ));
        };

        let cols = params.cols.clamp(MIN_TERMINAL_COLS, MAX_TERMINAL_COLS);
        let rows = params.rows.clamp(MIN_TERMINAL_ROWS, MAX_TERMINAL_ROWS);
        {
            let guard = master
                .lock()
                .map_err(|_| LoafErr::Io(std::io::Error::other("pty master poisoned")))?;
            guard
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(|err| LoafErr::Io(std::io::Error::other(err.to_string())))?;
        }

        let mut state = session.state.lock().await;
        state.cols = cols;
        state.rows = rows;
        state.touch();
        Ok(ResizeSessionResponse {
            session_id: params.session_id,
            cols,
            rows,
        })
    }

    pub async fn stop(&self, params: StopSessionParams) -> Result<StopSessionResponse> {
        let session = self.lookup(params.session_id).await?;
        let already_exited = {
            let state = session.state.lock().await;
            state.status == SessionStatus::Exited
        };

        if !already_exited {
            session.terminate(params.force).await;
            let grace = if params.force {
                FORCE_STOP_GRACE
            } else {
                STOP_GRACE
            };
            tokio::time::sleep(grace).await;
        }

        let state = session.state.lock().await;
        Ok(StopSessionResponse {
            session_id: params.session_id,
            status: state.status,
            exit_code: state.exit_code,
            signal: state.signal,
        })
    }

    pub async fn list(&self) -> Vec<SessionDescriptor> {
        let sessions = {
            let guard = self.inner.sessions.lock().await;
            guard
                .iter()
                .map(|(id, session)| (*id, Arc::clone(session)))
                .collect::<Vec<_>>()
        };

        let mut descriptors = Vec::with_capacity(sessions.len());
        for (id, session) in sessions {
            let state = session.state.lock().await;
            descriptors.push(SessionDescriptor {
                session_id: id,
                name: state.name.clone(),
                command_preview: command_preview(&state.command),
                status: state.status,
                transport: state.transport,
                full_terminal: state.full_terminal,
                pid: state.pid,
                cwd: state.cwd.display().to_string(),
                created_at: state.created_at,
                last_activity: state.last_activity,
                exit_code: state.exit_code,
                signal: state.signal,
                stdout_unread: state.stdout.unread(),
                stderr_unread: state.stderr.unread(),
                cols: state.cols,
                rows: state.rows,
            });
        }
        descriptors.sort_by_key(|descriptor| descriptor.session_id.0);
        descriptors
    }

    /// Removes an exited session from the registry, releasing its buffers.
    pub async fn prune(&self, id: SessionId) -> Result<bool> {
        let mut sessions = self.inner.sessions.lock().await;
        let Some(session) = sessions.get(&id) else {
            return Ok(false);
        };
        let exited = {
            let state = session.state.lock().await;
            state.status == SessionStatus::Exited
        };
        if !exited {
            return Err(LoafErr::invalid_input(format!(
                "session {id} is still running; stop it before pruning"
            )));
        }
        sessions.remove(&id);
        Ok(true)
    }

    /// Best-effort terminate of every running session, used at process exit.
    pub async fn shutdown_all(&self) {
        let sessions = {
            let guard = self.inner.sessions.lock().await;
            guard.values().cloned().collect::<Vec<_>>()
        };
        for session in sessions {
            let running = {
                let state = session.state.lock().await;
                state.status == SessionStatus::Running
            };
            if running {
                session.terminate(false).await;
                warn!(session_id = session.id.0, "terminated session at shutdown");
            }
        }
    }
}

fn decompose_exit_status(status: std::process::ExitStatus) -> (Option<i32>, Option<i32>) {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        (status.code(), status.signal())
    }
    #[cfg(not(unix))]
    {
        (status.code(), None)
    }
}

/// Short preview of the originating command for session listings: the tail
/// of the last `&&`/`;` segment, shell wrappers stripped.
fn command_preview(command: &str) -> String {
    let tokens: Vec<String> = shlex::Shlex::new(command).collect();
    let body = if tokens.len() >= 3
        && matches!(tokens[1].as_str(), "-c" | "-lc")
        && is_shell_name(&tokens[0])
    {
        tokens[2..].join(" ")
    } else {
        command.to_string()
    };
    let (preview, _) = truncate_middle(tail_after_last_separator(&body), COMMAND_PREVIEW_CHARS);
    preview
}

fn tail_after_last_separator(command: &str) -> &str {
    let mut cut: Option<usize> = None;
    for sep in ["&&", ";"] {
        if let Some(pos) = command.rfind(sep) {
            let end = pos + sep.len();
            if cut.is_none_or(|existing| end > existing) {
                cut = Some(end);
            }
        }
    }
    if let Some(end) = cut {
        let rest = command[end..].trim();
        if !rest.is_empty() {
            return rest;
        }
    }
    command.trim()
}

fn is_shell_name(token: &str) -> bool {
    std::path::Path::new(token)
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| matches!(name, "bash" | "sh" | "zsh"))
        .unwrap_or(false)
}

/// Windows PTY spawns fail on anything that needs system binaries when the
/// caller's env overrides strip `Path`, `SystemRoot`, or `ComSpec`; restore
/// them from the parent process (either capitalization).
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn rehydrate_system_env(
    env: &mut HashMap<String, String>,
    parent: &HashMap<String, String>,
) {
    for key in ["Path", "SystemRoot", "ComSpec"] {
        let present = env.keys().any(|existing| existing.eq_ignore_ascii_case(key));
        if present {
            continue;
        }
        if let Some((parent_key, value)) = parent
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
        {
            env.insert(parent_key.clone(), value.clone());
        }
    }
}
