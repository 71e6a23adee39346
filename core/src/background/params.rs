use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::background::session::SessionId;

pub const DEFAULT_TERMINAL_COLS: u16 = 120;
pub const DEFAULT_TERMINAL_ROWS: u16 = 36;
pub const DEFAULT_READ_CHARS: usize = 8_000;
pub const MAX_READ_CHARS: usize = 120_000;

#[derive(Debug, Clone, Deserialize)]
pub struct StartSessionParams {
    pub command: String,

    /// Friendly name, required for reuse matching.
    #[serde(default)]
    pub session_name: Option<String>,

    #[serde(default)]
    pub cwd: Option<PathBuf>,

    #[serde(default)]
    pub env: Option<HashMap<String, String>>,

    /// Allocate a pseudo-terminal (the default for background sessions).
    #[serde(default = "default_full_terminal")]
    pub full_terminal: bool,

    #[serde(default = "default_terminal_cols")]
    pub terminal_cols: u16,

    #[serde(default = "default_terminal_rows")]
    pub terminal_rows: u16,

    /// Return an existing running session matching name, cwd, and the
    /// full-terminal flag instead of spawning a new one.
    #[serde(default)]
    pub reuse_session: bool,
}

fn default_full_terminal() -> bool {
    true
}

fn default_terminal_cols() -> u16 {
    DEFAULT_TERMINAL_COLS
}

fn default_terminal_rows() -> u16 {
    DEFAULT_TERMINAL_ROWS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamSelector {
    #[default]
    Both,
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadSessionParams {
    pub session_id: SessionId,

    #[serde(default)]
    pub stream: StreamSelector,

    /// Characters per stream; default 8000, capped at 120000.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    /// Return the slice without advancing the cursor.
    #[serde(default)]
    pub peek: bool,
}

fn default_max_chars() -> usize {
    DEFAULT_READ_CHARS
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteSessionParams {
    pub session_id: SessionId,

    /// Raw text to write.
    #[serde(default)]
    pub input: Option<String>,

    /// Append a newline to `input` (ignored for `key`).
    #[serde(default = "default_append_newline")]
    pub append_newline: bool,

    /// Named special key (enter, tab, esc, arrows, ctrl+c, ...).
    #[serde(default)]
    pub key: Option<String>,

    /// Repeat count for a key sequence, 1..=100.
    #[serde(default = "default_repeat")]
    pub repeat: u32,
}

fn default_append_newline() -> bool {
    true
}

fn default_repeat() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResizeSessionParams {
    pub session_id: SessionId,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StopSessionParams {
    pub session_id: SessionId,

    /// SIGKILL instead of SIGTERM.
    #[serde(default)]
    pub force: bool,
}
