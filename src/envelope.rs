//! Envelope — the universal message type for `CollabDoc` sessions.
//!
//! ARCHITECTURE
//! ============
//! Every communication in a `CollabDoc` session is an Envelope. Clients send
//! typed envelopes over WebSocket, the server dispatches on `type`, mutates
//! the owning room under its serialization point, and fans derived envelopes
//! out to the right subset of participants.
//!
//! DESIGN
//! ======
//! - One flat struct for every message kind; fields not used by a kind are
//!   `None` and omitted from the JSON (camelCase on the wire).
//! - The WS handler routes on `type` and enforces per-kind required fields;
//!   a missing required field makes the envelope malformed and it is dropped.
//! - Structured errors (`ErrorCode`) become `type: "error"` envelopes with a
//!   grepable code, delivered to the sender only.

use serde::{Deserialize, Serialize};

use crate::state::{ChatMessage, ParticipantInfo};

// =============================================================================
// KIND CONSTANTS
// =============================================================================

/// Wire values for `Envelope::kind`. Inbound kinds come from clients; outbound
/// kinds are produced by the server.
pub mod kind {
    // Inbound.
    pub const JOIN: &str = "join";
    pub const CLOSE: &str = "close";
    pub const UPDATE_DATA: &str = "update-data";
    pub const LOCK: &str = "lock";
    pub const RELEASE_LOCK: &str = "release-lock";
    pub const UPDATE_VERSION: &str = "update-version";
    pub const DELETE_VERSION: &str = "delete-version";
    pub const SAVED_DATA: &str = "saved-data";
    pub const UPDATE_UNSAVED: &str = "update-unsaved";
    pub const ROLLED_BACK: &str = "rolledback";
    pub const CHAT_MESSAGE: &str = "chatMessage";

    // Outbound.
    pub const SNAPSHOT: &str = "snapshot";
    pub const CURRENT_USERS: &str = "current-users";
    pub const PARTICIPANT_JOINED: &str = "participant-joined";
    pub const PARTICIPANT_LEFT: &str = "participant-left";
    pub const LOCK_ACQUIRED: &str = "lock-acquired";
    pub const LOCK_RELEASED: &str = "lock-released";
    pub const VERSION_CREATED: &str = "version-created";
    pub const VERSION_DELETED: &str = "version-deleted";
    pub const SAVED: &str = "saved";
    pub const UNSAVED: &str = "unsaved";
    pub const ROLLBACK: &str = "rollback";
    pub const CHAT: &str = "chat";
    pub const ERROR: &str = "error";
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code for structured error envelopes.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;
}

// =============================================================================
// TYPES
// =============================================================================

/// The universal message type. `doc_id` and `user_id` are required on every
/// envelope; everything else depends on `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub doc_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock: Option<bool>,
    /// Current lock holder, carried on snapshots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Participant list, carried on snapshots and `current-users`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<ParticipantInfo>>,
    /// Chat backlog, carried on snapshots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unsaved: Option<bool>,
    /// Set on chat fanout: `true` on the copy echoed back to the sender.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub own: Option<bool>,
    /// Grepable code, carried on error envelopes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

impl Envelope {
    /// Create an envelope with only the required fields set.
    pub fn event(kind: impl Into<String>, doc_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            doc_id: doc_id.into(),
            user_id: user_id.into(),
            name: None,
            data: None,
            lock: None,
            holder: None,
            version: None,
            version_id: None,
            message: None,
            time: None,
            users: None,
            messages: None,
            unsaved: None,
            own: None,
            code: None,
        }
    }

    /// Create a structured error envelope for the sender.
    pub fn error(doc_id: impl Into<String>, user_id: impl Into<String>, err: &(impl ErrorCode + ?Sized)) -> Self {
        let mut env = Self::event(kind::ERROR, doc_id, user_id);
        env.code = Some(err.error_code().to_string());
        env.message = Some(err.to_string());
        env
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

impl Envelope {
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_lock(mut self, lock: bool) -> Self {
        self.lock = Some(lock);
        self
    }

    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = Some(holder.into());
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: serde_json::Value) -> Self {
        self.version = Some(version);
        self
    }

    #[must_use]
    pub fn with_version_id(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_time(mut self, time: impl Into<String>) -> Self {
        self.time = Some(time.into());
        self
    }

    #[must_use]
    pub fn with_users(mut self, users: Vec<ParticipantInfo>) -> Self {
        self.users = Some(users);
        self
    }

    #[must_use]
    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = Some(messages);
        self
    }

    #[must_use]
    pub fn with_unsaved(mut self, unsaved: bool) -> Self {
        self.unsaved = Some(unsaved);
        self
    }

    #[must_use]
    pub fn with_own(mut self, own: bool) -> Self {
        self.own = Some(own);
        self
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_sets_required_fields_only() {
        let env = Envelope::event(kind::JOIN, "doc-1", "u1");
        assert_eq!(env.kind, "join");
        assert_eq!(env.doc_id, "doc-1");
        assert_eq!(env.user_id, "u1");
        assert!(env.name.is_none());
        assert!(env.data.is_none());
        assert!(env.lock.is_none());
    }

    #[test]
    fn wire_fields_are_camel_case_and_sparse() {
        let env = Envelope::event(kind::VERSION_DELETED, "doc-1", "u1")
            .with_version_id("v42")
            .with_name("Ada");
        let json = serde_json::to_value(&env).expect("serialize");

        assert_eq!(json["type"], "version-deleted");
        assert_eq!(json["docId"], "doc-1");
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["versionId"], "v42");
        // Unset optionals must not appear on the wire.
        assert!(json.get("data").is_none());
        assert!(json.get("lock").is_none());
        assert!(json.get("messages").is_none());
    }

    #[test]
    fn inbound_json_round_trip() {
        let text = r#"{"type":"chatMessage","docId":"d","userId":"u","name":"Ada","message":"hi","time":"12:01"}"#;
        let env: Envelope = serde_json::from_str(text).expect("deserialize");
        assert_eq!(env.kind, kind::CHAT_MESSAGE);
        assert_eq!(env.message.as_deref(), Some("hi"));
        assert_eq!(env.time.as_deref(), Some("12:01"));

        let back = serde_json::to_string(&env).expect("serialize");
        let again: Envelope = serde_json::from_str(&back).expect("round trip");
        assert_eq!(again.name.as_deref(), Some("Ada"));
    }

    #[test]
    fn missing_required_field_is_an_error() {
        // No userId: must fail to parse rather than default.
        let text = r#"{"type":"join","docId":"d","name":"Ada"}"#;
        assert!(serde_json::from_str::<Envelope>(text).is_err());
    }

    #[test]
    fn error_envelope_carries_code_and_message() {
        #[derive(Debug, thiserror::Error)]
        #[error("lock held by someone else")]
        struct Held;

        impl ErrorCode for Held {
            fn error_code(&self) -> &'static str {
                "E_LOCK_CONFLICT"
            }
        }

        let env = Envelope::error("d", "u", &Held);
        assert_eq!(env.kind, kind::ERROR);
        assert_eq!(env.code.as_deref(), Some("E_LOCK_CONFLICT"));
        assert_eq!(env.message.as_deref(), Some("lock held by someone else"));
    }
}
