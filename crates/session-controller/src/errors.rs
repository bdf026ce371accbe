//! Session controller error types.
//!
//! The taxonomy mirrors how failures surface to the application:
//! validation errors reject `join` synchronously, capability errors are
//! local to one media track, transport and discovery errors surface
//! through status signals and the diagnostic log. Nothing inside a
//! participant pipeline propagates across the session boundary.

use thiserror::Error;

/// Session controller error type.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Rejected synchronously at `join` (empty relay/room, malformed
    /// address). The session remains left.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Camera/microphone acquisition failure. Local to the affected
    /// track; the rest of the session continues.
    #[error("Capability error: {0}")]
    Capability(String),

    /// Transport-level failure (connect refused, connection dropped).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Discovery-loop failure (malformed feed event, unexpected close).
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Internal error (channel send/receive failure).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Diagnostic-log tag under which this error is reported.
    #[must_use]
    pub fn diag_tag(&self) -> &'static str {
        match self {
            SessionError::Validation(_) | SessionError::Transport(_) => "conn",
            SessionError::Capability(_) => "track",
            SessionError::Discovery(_) => "announced",
            SessionError::Internal(_) => "session",
        }
    }

    /// Whether the session can keep running after this error.
    ///
    /// Only validation errors are pre-join rejections; everything else
    /// is reported and isolated.
    #[must_use]
    pub fn is_fatal_to_join(&self) -> bool {
        matches!(self, SessionError::Validation(_))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_diag_tag_mapping() {
        assert_eq!(
            SessionError::Validation("empty room".to_string()).diag_tag(),
            "conn"
        );
        assert_eq!(
            SessionError::Transport("refused".to_string()).diag_tag(),
            "conn"
        );
        assert_eq!(
            SessionError::Capability("no mic".to_string()).diag_tag(),
            "track"
        );
        assert_eq!(
            SessionError::Discovery("feed closed".to_string()).diag_tag(),
            "announced"
        );
        assert_eq!(
            SessionError::Internal("channel closed".to_string()).diag_tag(),
            "session"
        );
    }

    #[test]
    fn test_only_validation_rejects_join() {
        assert!(SessionError::Validation("empty relay".to_string()).is_fatal_to_join());
        assert!(!SessionError::Capability("no camera".to_string()).is_fatal_to_join());
        assert!(!SessionError::Transport("dropped".to_string()).is_fatal_to_join());
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", SessionError::Validation("room is required".to_string())),
            "Validation error: room is required"
        );
        assert_eq!(
            format!("{}", SessionError::Capability("microphone busy".to_string())),
            "Capability error: microphone busy"
        );
    }
}
