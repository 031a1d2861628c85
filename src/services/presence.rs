//! Presence manager — per-connection lifecycle.
//!
//! `Connecting → Active → Closed`, with no way out of `Closed`. A rejoin for
//! the same user arrives on a fresh connection and replaces the prior room
//! entry via the registry; this state machine only governs one connection.

/// Lifecycle of a single websocket connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Connection {
    /// Upgraded and authenticated, no room joined yet.
    #[default]
    Connecting,
    /// Joined one room as one participant.
    Active { doc_id: String, user_id: String },
    /// Explicit close or transport disconnect. Terminal.
    Closed,
}

impl Connection {
    /// `Connecting → Active`. Returns `false` (and leaves the state alone)
    /// for a join on an already-active or closed connection.
    pub fn activate(&mut self, doc_id: impl Into<String>, user_id: impl Into<String>) -> bool {
        if *self != Self::Connecting {
            return false;
        }
        *self = Self::Active { doc_id: doc_id.into(), user_id: user_id.into() };
        true
    }

    /// Move to `Closed`. Returns the session to clean up if one was active.
    pub fn close(&mut self) -> Option<(String, String)> {
        match std::mem::replace(self, Self::Closed) {
            Self::Active { doc_id, user_id } => Some((doc_id, user_id)),
            Self::Connecting | Self::Closed => None,
        }
    }

    /// Doc id this connection participates in, if active for that room.
    #[must_use]
    pub fn active_doc(&self) -> Option<&str> {
        match self {
            Self::Active { doc_id, .. } => Some(doc_id),
            Self::Connecting | Self::Closed => None,
        }
    }
}
