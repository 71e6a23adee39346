mod manager;
mod params;
mod sanitize;
mod session;

pub use manager::BackgroundSessionManager;
pub use manager::MAX_TERMINAL_COLS;
pub use manager::MAX_TERMINAL_ROWS;
pub use manager::MIN_TERMINAL_COLS;
pub use manager::MIN_TERMINAL_ROWS;
pub use manager::ReadSessionResponse;
pub use manager::ResizeSessionResponse;
pub use manager::SessionDescriptor;
pub use manager::StartSessionResponse;
pub use manager::StopSessionResponse;
pub use manager::WriteSessionResponse;
pub use params::DEFAULT_READ_CHARS;
pub use params::DEFAULT_TERMINAL_COLS;
pub use params::DEFAULT_TERMINAL_ROWS;
pub use params::MAX_READ_CHARS;
pub use params::ReadSessionParams;
pub use params::ResizeSessionParams;
pub use params::StartSessionParams;
pub use params::StopSessionParams;
pub use params::StreamSelector;
pub use params::WriteSessionParams;
pub use sanitize::sanitize_text;
pub use session::STREAM_RING_CAP_CHARS;
pub use session::SessionId;
pub use session::SessionStatus;
pub use session::StreamReadSlice;
pub use session::StreamState;
pub use session::TransportKind;
pub use session::special_key_bytes;
