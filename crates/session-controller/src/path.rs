//! Broadcast path handling.
//!
//! Paths are opaque, case-sensitive byte strings of the form
//! `{namespace}/{room}/{participant-id}`. The controller never parses
//! them back apart; it only constructs them and compares them for
//! equality.

use std::fmt;

/// Namespace prefix under which all room broadcasts are announced.
pub const ANNOUNCE_NAMESPACE: &str = "anon";

/// An opaque broadcast path.
///
/// Compared bytewise; insertion into the participant set and
/// self-filtering both rely on exact string equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BroadcastPath(String);

impl BroadcastPath {
    /// Wrap an announce-feed path string.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The room prefix all participants of `room` announce under:
    /// `anon/{room}`.
    #[must_use]
    pub fn room_prefix(room: &str) -> Self {
        Self(format!("{ANNOUNCE_NAMESPACE}/{room}"))
    }

    /// Append one segment: `{self}/{segment}`.
    #[must_use]
    pub fn join(&self, segment: &str) -> Self {
        Self(format!("{}/{segment}", self.0))
    }

    /// The raw path string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Trailing slice of the path for compact log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        let start = self.0.len().saturating_sub(20);
        self.0.get(start..).unwrap_or(&self.0)
    }
}

impl fmt::Display for BroadcastPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BroadcastPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_room_prefix_format() {
        let prefix = BroadcastPath::room_prefix("room1");
        assert_eq!(prefix.as_str(), "anon/room1");
    }

    #[test]
    fn test_join_appends_segment() {
        let path = BroadcastPath::room_prefix("room1").join("abc123");
        assert_eq!(path.as_str(), "anon/room1/abc123");
    }

    #[test]
    fn test_comparison_is_case_sensitive() {
        assert_ne!(
            BroadcastPath::new("anon/Room/x"),
            BroadcastPath::new("anon/room/x")
        );
    }

    #[test]
    fn test_short_returns_tail() {
        let path = BroadcastPath::new("anon/a-very-long-room-name/participant");
        assert_eq!(path.short().len(), 20);
        assert!(path.as_str().ends_with(path.short()));

        // Short paths come back whole
        let path = BroadcastPath::new("anon/r/p");
        assert_eq!(path.short(), "anon/r/p");
    }
}
