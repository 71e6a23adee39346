//! Per-session state for background shells: identity, lifecycle, and the
//! bounded output streams with their read cursors.

use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Maximum characters retained per stream; older output is dropped off the
/// front and accounted for in `dropped_chars`.
pub const STREAM_RING_CAP_CHARS: usize = 300_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Exited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Pipe,
    Pty,
}

/// One capped output stream plus its monotonically advancing read cursor.
///
/// The buffer always holds the character range
/// `[total_chars - buffer_chars, total_chars)`; `buffer_chars` never
/// exceeds [`STREAM_RING_CAP_CHARS`].
#[derive(Debug, Clone, Default)]
pub struct StreamState {
    buffer: String,
    buffer_chars: usize,
    total_chars: u64,
    dropped_chars: u64,
    cursor: u64,
}

/// Result of one incremental read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamReadSlice {
    pub text: String,
    /// Characters before the cursor were dropped from the ring; the slice
    /// starts past the gap and the gap cannot be replayed.
    pub dropped: bool,
    /// More data remains beyond the returned slice.
    pub has_more: bool,
    /// Unread characters remaining after this read.
    pub unread: u64,
}

impl StreamState {
    pub fn append(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let added = text.chars().count();
        self.buffer.push_str(text);
        self.buffer_chars += added;
        self.total_chars += added as u64;

        if self.buffer_chars > STREAM_RING_CAP_CHARS {
            let excess = self.buffer_chars - STREAM_RING_CAP_CHARS;
            let cut = self
                .buffer
                .char_indices()
                .nth(excess)
                .map(|(idx, _)| idx)
                .unwrap_or(self.buffer.len());
            self.buffer.drain(..cut);
            self.buffer_chars -= excess;
            self.dropped_chars += excess as u64;
        }
    }

    pub fn total_chars(&self) -> u64 {
        self.total_chars
    }

    pub fn dropped_chars(&self) -> u64 {
        self.dropped_chars
    }

    pub fn unread(&self) -> u64 {
        self.total_chars
            .saturating_sub(self.cursor.max(self.dropped_chars))
    }

    /// Reads up to `max_chars` starting at `max(cursor, dropped_chars)`.
    /// Unless peeking, the cursor advances to the end of the slice.
    pub fn read(&mut self, max_chars: usize, peek: bool) -> StreamReadSlice {
        let start = self.cursor.max(self.dropped_chars);
        let dropped = self.cursor < self.dropped_chars;

        let offset = (start - self.dropped_chars) as usize;
        let available = self.buffer_chars.saturating_sub(offset);
        let take = max_chars.min(available);

        let begin = char_boundary(&self.buffer, offset);
        let end = char_boundary(&self.buffer, offset + take);
        let text = self.buffer[begin..end].to_string();

        let slice_end = start + take as u64;
        let has_more = slice_end < self.total_chars;
        if !peek {
            self.cursor = slice_end;
        }

        StreamReadSlice {
            text,
            dropped,
            has_more,
            unread: self.total_chars.saturating_sub(slice_end.max(self.dropped_chars)),
        }
    }
}

fn char_boundary(buffer: &str, char_offset: usize) -> usize {
    buffer
        .char_indices()
        .nth(char_offset)
        .map(|(idx, _)| idx)
        .unwrap_or(buffer.len())
}

/// Mutable session record owned by the manager.
#[derive(Debug)]
pub struct SessionState {
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub cwd: PathBuf,
    pub shell_tag: String,
    pub shell_program: String,
    pub shell_argv: Vec<String>,
    pub command: String,
    pub pid: Option<u32>,
    pub status: SessionStatus,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub transport: TransportKind,
    pub full_terminal: bool,
    pub cols: u16,
    pub rows: u16,
    pub stdout: StreamState,
    pub stderr: StreamState,
}

impl SessionState {
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn mark_exited(&mut self, exit_code: Option<i32>, signal: Option<i32>) {
        // The transition happens exactly once; late exit notifications from
        // racing wait tasks must not clobber the recorded status.
        if self.status == SessionStatus::Exited {
            return;
        }
        self.status = SessionStatus::Exited;
        self.exit_code = exit_code;
        self.signal = signal;
        self.touch();
    }
}

/// Named special keys accepted by session writes, resolved to the byte
/// sequences a terminal would send.
pub fn special_key_bytes(name: &str) -> Option<&'static [u8]> {
    let bytes: &'static [u8] = match name.to_ascii_lowercase().as_str() {
        "enter" => b"\r",
        "tab" => b"\t",
        "esc" => b"\x1b",
        "up" => b"\x1b[A",
        "down" => b"\x1b[B",
        "right" => b"\x1b[C",
        "left" => b"\x1b[D",
        "home" => b"\x1b[H",
        "end" => b"\x1b[F",
        "pgup" => b"\x1b[5~",
        "pgdown" => b"\x1b[6~",
        "backspace" => b"\x7f",
        "delete" => b"\x1b[3~",
        "ctrl+c" => b"\x03",
        "ctrl+d" => b"\x04",
        "ctrl+z" => b"\x1a",
        _ => return None,
    };
    Some(bytes)
}
