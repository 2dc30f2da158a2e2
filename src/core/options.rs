//! Resolved server options consumed by the session engine.

use crate::protocol::FrameLimits;

/// Engine knobs, resolved from [`crate::config::Config`] or built directly
/// in tests.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Server heart-beat advertisement `(sx, sy)` in milliseconds.
    pub heartbeat: (u64, u64),
    /// Versions offered during negotiation, ascending.
    pub supported_versions: Vec<String>,
    /// Append an EOL after each serialized frame.
    pub trailing_line: bool,
    pub max_body_length: usize,
    pub max_header_length: usize,
    pub max_headers: usize,
    /// Per-transaction frame cap; `<= 0` disables the check.
    pub max_frames_in_transaction: i64,
    /// COMMIT replay chunk size; `0` replays in one piece.
    pub transaction_chunk_size: usize,
    /// Remove destinations once their last subscription is gone.
    pub destination_auto_gc: bool,
    /// Require CONNECT frames to pass the authentication provider.
    pub secured: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            heartbeat: (1000, 1000),
            supported_versions: vec!["1.0".to_string(), "1.1".to_string(), "1.2".to_string()],
            trailing_line: false,
            max_body_length: 10 * 1024 * 1024,
            max_header_length: 10 * 1024,
            max_headers: 1000,
            max_frames_in_transaction: 1000,
            transaction_chunk_size: 0,
            destination_auto_gc: true,
            secured: false,
        }
    }
}

impl ServerOptions {
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_body_length: self.max_body_length,
            max_header_length: self.max_header_length,
            max_headers: self.max_headers,
        }
    }

    /// Highest version offered by both sides, comparing lexically; STOMP
    /// version strings (`1.0`, `1.1`, `1.2`) order correctly that way.
    pub fn negotiate_version(&self, accept_version: Option<&str>) -> Option<String> {
        // STOMP 1.0 clients do not send accept-version.
        let accepted = accept_version.unwrap_or("1.0");
        accepted
            .split(',')
            .map(str::trim)
            .filter(|v| self.supported_versions.iter().any(|s| s == v))
            .max()
            .map(str::to_string)
    }
}
