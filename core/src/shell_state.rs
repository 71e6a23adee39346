//! Stateful foreground shell: cwd and environment changes made inside a
//! command persist across invocations in the same logical session.
//!
//! The wrapper appends a marker-bracketed `pwd`/`env` dump to the user's
//! command and parses it back out of stdout. When the markers are missing
//! (shell crash, `exec`, early `exit` without running the epilogue) the
//! environment delta is rolled back while an explicit cwd override is kept.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use rand::Rng;
use serde::Deserialize;
use serde::Serialize;

use crate::cancel::CancellationSignal;
use crate::error::LoafErr;
use crate::error::Result;
use crate::exec::ExecParams;
use crate::exec::StdinPolicy;
use crate::exec::run_exec;
use crate::shell::ShellKind;
use crate::shell::resolve_shell;

pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const MAX_TIMEOUT_SECS: u64 = 1_200;

const MARKER_NAMESPACE: &str = "__LOAF_BASH_";

/// One-shot marker set bracketing the cwd/env dump. The literal format is a
/// wire contract: `__LOAF_BASH_<ms>_<hex>__{CWD_START|CWD_END|ENV_START|ENV_END}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMarker {
    prefix: String,
}

impl StateMarker {
    pub fn fresh() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis();
        let nonce: u32 = rand::rng().random();
        Self {
            prefix: format!("{MARKER_NAMESPACE}{ms}_{nonce:08x}__"),
        }
    }

    #[cfg(test)]
    pub fn fixed(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    fn cwd_start(&self) -> String {
        format!("{}CWD_START", self.prefix)
    }

    fn cwd_end(&self) -> String {
        format!("{}CWD_END", self.prefix)
    }

    fn env_start(&self) -> String {
        format!("{}ENV_START", self.prefix)
    }

    fn env_end(&self) -> String {
        format!("{}ENV_END", self.prefix)
    }
}

/// Baseline cwd/env applied to the next foreground command. One baseline
/// per logical bash session; the runtime owns it.
#[derive(Debug, Clone)]
pub struct ShellBaseline {
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
}

impl ShellBaseline {
    /// OS defaults: the process cwd and environment.
    pub fn os_defaults() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
            env: std::env::vars().collect(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::os_defaults();
    }
}

impl Default for ShellBaseline {
    fn default() -> Self {
        Self::os_defaults()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShellRequest {
    pub command: String,

    /// Seconds; default 120, capped at 1200.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Run in this directory instead of the baseline cwd. The override is
    /// retained in the baseline even when state capture fails.
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Extra environment entries layered over the baseline for this call.
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,

    /// Restore the baseline to OS defaults before running.
    #[serde(default)]
    pub reset_session: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ShellOutcome {
    pub exit_code: i32,
    pub signal: Option<i32>,
    pub duration_ms: u64,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub timed_out: bool,
    pub aborted: bool,
    pub cwd_before: String,
    pub cwd_after: String,
    pub state_captured: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedState {
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

/// Wraps `command` so the shell prints the marker-bracketed state dump and
/// still exits with the command's own status.
pub fn wrap_command(kind: ShellKind, command: &str, marker: &StateMarker) -> String {
    let cwd_start = marker.cwd_start();
    let cwd_end = marker.cwd_end();
    let env_start = marker.env_start();
    let env_end = marker.env_end();
    match kind {
        ShellKind::Zsh | ShellKind::Bash | ShellKind::Sh => format!(
            "set +e\n{command}\n__loaf_status=$?\n\
             printf '%s\\n' '{cwd_start}'\npwd\nprintf '%s\\n' '{cwd_end}'\n\
             printf '%s\\n' '{env_start}'\nenv\nprintf '%s\\n' '{env_end}'\n\
             exit $__loaf_status"
        ),
        ShellKind::PowerShell => format!(
            "$ErrorActionPreference = 'Continue'\n{command}\n\
             $__loafStatus = $LASTEXITCODE\nif ($null -eq $__loafStatus) {{ $__loafStatus = 0 }}\n\
             Write-Output '{cwd_start}'\n(Get-Location).Path\nWrite-Output '{cwd_end}'\n\
             Write-Output '{env_start}'\n\
             Get-ChildItem Env: | ForEach-Object {{ \"$($_.Name)=$($_.Value)\" }}\n\
             Write-Output '{env_end}'\nexit $__loafStatus"
        ),
        ShellKind::Cmd => [
            command.to_string(),
            "@set __LOAF_STATUS=%ERRORLEVEL%".to_string(),
            format!("@echo {cwd_start}"),
            "@cd".to_string(),
            format!("@echo {cwd_end}"),
            format!("@echo {env_start}"),
            "@set".to_string(),
            format!("@echo {env_end}"),
            "@exit /b %__LOAF_STATUS%".to_string(),
        ]
        .join(" & "),
    }
}

/// Extracts the marker block from `stdout`. Returns stdout with the block
/// removed and, when all four markers were found in order, the captured
/// cwd/env state.
pub fn parse_captured_state(stdout: &str, marker: &StateMarker) -> (String, Option<CapturedState>) {
    let lines: Vec<&str> = stdout.split('\n').collect();
    let find = |needle: &str| {
        lines
            .iter()
            .position(|line| line.trim_end_matches('\r') == needle)
    };

    let (Some(cwd_start), Some(cwd_end), Some(env_start), Some(env_end)) = (
        find(&marker.cwd_start()),
        find(&marker.cwd_end()),
        find(&marker.env_start()),
        find(&marker.env_end()),
    ) else {
        return (stdout.to_string(), None);
    };
    if !(cwd_start < cwd_end && cwd_end < env_start && env_start < env_end) {
        return (stdout.to_string(), None);
    }

    let cwd = lines[cwd_start + 1..cwd_end]
        .iter()
        .map(|line| line.trim_end_matches('\r'))
        .find(|line| !line.is_empty())
        .map(PathBuf::from);

    let mut env = HashMap::new();
    for line in &lines[env_start + 1..env_end] {
        let line = line.trim_end_matches('\r');
        if let Some((key, value)) = line.split_once('=') {
            if !key.is_empty() {
                env.insert(key.to_string(), value.to_string());
            }
        }
    }

    let mut kept: Vec<&str> = Vec::with_capacity(lines.len());
    kept.extend_from_slice(&lines[..cwd_start]);
    kept.extend_from_slice(&lines[env_end + 1..]);
    let mut cleaned = kept.join("\n");
    // Normalize a trailing CRLF left by shells that emit \r\n.
    if cleaned.ends_with('\n') {
        cleaned.pop();
        if cleaned.ends_with('\r') {
            cleaned.pop();
        }
        cleaned.push('\n');
    }

    (cleaned, Some(CapturedState { cwd, env }))
}

/// Runs one foreground command against `baseline`, advancing it according
/// to the captured state.
pub async fn run_shell_command(
    baseline: &mut ShellBaseline,
    request: ShellRequest,
    cancel: Option<CancellationSignal>,
) -> Result<ShellOutcome> {
    if request.command.trim().is_empty() {
        return Err(LoafErr::invalid_input("command must not be empty"));
    }

    if request.reset_session {
        baseline.reset();
    }

    let cwd_before = baseline.cwd.clone();
    let effective_cwd = request.cwd.clone().unwrap_or_else(|| baseline.cwd.clone());

    let mut env = baseline.env.clone();
    if let Some(delta) = &request.env {
        env.extend(delta.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    let shell = resolve_shell().ok_or(LoafErr::EnvUnavailable)?;
    let marker = StateMarker::fresh();
    let wrapped = wrap_command(shell.kind, &request.command, &marker);

    let timeout_secs = request
        .timeout_secs
        .unwrap_or(DEFAULT_TIMEOUT_SECS)
        .min(MAX_TIMEOUT_SECS);

    let params = ExecParams {
        command: shell.command_argv(&wrapped),
        cwd: effective_cwd.clone(),
        timeout_ms: Some(timeout_secs * 1_000),
        env,
        stdin: StdinPolicy::Ignore,
    };
    let output = run_exec(params, cancel).await?;

    let (cleaned_stdout, captured) = parse_captured_state(&output.stdout.text, &marker);
    let state_captured = captured.is_some();

    match captured {
        Some(state) => {
            if let Some(cwd) = state.cwd {
                baseline.cwd = cwd;
            } else {
                baseline.cwd = effective_cwd;
            }
            if !state.env.is_empty() {
                baseline.env = state.env;
            }
        }
        None => {
            // No markers: keep the env snapshot from before the call and
            // retain only the cwd override.
            baseline.cwd = effective_cwd;
        }
    }

    Ok(ShellOutcome {
        exit_code: output.exit_code,
        signal: output.signal,
        duration_ms: output.duration.as_millis() as u64,
        stdout: cleaned_stdout,
        stderr: output.stderr.text,
        stdout_truncated: output.stdout.truncated,
        stderr_truncated: output.stderr.truncated,
        timed_out: output.timed_out,
        aborted: output.aborted,
        cwd_before: cwd_before.display().to_string(),
        cwd_after: baseline.cwd.display().to_string(),
        state_captured,
    })
}
