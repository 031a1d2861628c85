//! Shared application state and the room data model.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the identity collaborator and the room table. The outer `RwLock`
//! protects only insert/remove of room entries; each room's `Mutex` is that
//! room's serialization point, so operations on different rooms run in
//! parallel. The table is only mutated through the session registry.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, mpsc};
use uuid::Uuid;

use crate::envelope::Envelope;
use crate::services::identity::IdentityVerifier;

/// Capacity of each participant's outbound envelope channel. Fanout uses
/// `try_send`, so a participant that falls this far behind starts losing
/// broadcasts instead of stalling the room.
pub const OUTBOUND_BUFFER: usize = 256;

// =============================================================================
// CHAT
// =============================================================================

/// One chat message. Immutable once appended to a room's log; the whole log
/// is discarded with the room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub user_id: String,
    pub name: String,
    pub message: String,
    /// Client-supplied display time, passed through opaquely.
    pub time: String,
}

// =============================================================================
// PARTICIPANTS
// =============================================================================

/// Wire representation of a participant, without the outbound channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub user_id: String,
    pub name: String,
}

/// One connected user's presence within a room. The outbound channel sender
/// is owned here; dropping the entry closes the connection's receive side
/// once the buffer drains, which is how a replaced connection learns it is
/// stale.
pub struct Participant {
    pub user_id: String,
    pub name: String,
    /// Identifies the connection that created this entry. A disconnect only
    /// cleans up the entry if it still belongs to that connection.
    pub conn_id: Uuid,
    pub tx: mpsc::Sender<Envelope>,
}

impl Participant {
    #[must_use]
    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo { user_id: self.user_id.clone(), name: self.name.clone() }
    }
}

// =============================================================================
// LOCK
// =============================================================================

/// The single-writer advisory lock for a room. `Locked` implies the holder
/// is a live participant of that room.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LockState {
    #[default]
    Unlocked,
    Locked {
        holder: String,
    },
}

impl LockState {
    #[must_use]
    pub fn holder(&self) -> Option<&str> {
        match self {
            Self::Locked { holder } => Some(holder),
            Self::Unlocked => None,
        }
    }

    #[must_use]
    pub fn is_held_by(&self, user_id: &str) -> bool {
        self.holder() == Some(user_id)
    }
}

// =============================================================================
// ROOM
// =============================================================================

/// Coordination state for one document's live session. Exists iff at least
/// one participant is present.
pub struct Room {
    pub doc_id: String,
    /// At most one entry per user; a rejoin replaces the prior entry.
    pub participants: HashMap<String, Participant>,
    pub lock: LockState,
    /// Ordered by arrival at this room's serialization point.
    pub chat: Vec<ChatMessage>,
}

impl Room {
    #[must_use]
    pub fn new(doc_id: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            participants: HashMap::new(),
            lock: LockState::Unlocked,
            chat: Vec::new(),
        }
    }

    /// Participant list in a stable order for wire payloads.
    #[must_use]
    pub fn participant_list(&self) -> Vec<ParticipantInfo> {
        let mut list: Vec<ParticipantInfo> = self.participants.values().map(Participant::info).collect();
        list.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        list
    }
}

/// A room entry as stored in the registry table.
pub type SharedRoom = Arc<Mutex<Room>>;

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state. Clone is required by Axum — inner fields are
/// Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RwLock<HashMap<String, SharedRoom>>>,
    pub identity: Arc<dyn IdentityVerifier>,
}

impl AppState {
    #[must_use]
    pub fn new(identity: Arc<dyn IdentityVerifier>) -> Self {
        Self { rooms: Arc::new(RwLock::new(HashMap::new())), identity }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_room_is_empty_and_unlocked() {
        let room = Room::new("doc-1");
        assert_eq!(room.doc_id, "doc-1");
        assert!(room.participants.is_empty());
        assert_eq!(room.lock, LockState::Unlocked);
        assert!(room.chat.is_empty());
    }

    #[test]
    fn lock_state_holder_accessors() {
        let unlocked = LockState::Unlocked;
        assert_eq!(unlocked.holder(), None);
        assert!(!unlocked.is_held_by("u1"));

        let locked = LockState::Locked { holder: "u1".into() };
        assert_eq!(locked.holder(), Some("u1"));
        assert!(locked.is_held_by("u1"));
        assert!(!locked.is_held_by("u2"));
    }

    #[tokio::test]
    async fn participant_list_is_sorted_by_user_id() {
        let state = test_helpers::test_app_state();
        let shared = test_helpers::seed_room(&state, "doc-1").await;
        test_helpers::seed_participant(&shared, "zoe", "Zoe").await;
        test_helpers::seed_participant(&shared, "ada", "Ada").await;

        let room = shared.lock().await;
        let list = room.participant_list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].user_id, "ada");
        assert_eq!(list[1].user_id, "zoe");
    }

    #[test]
    fn chat_message_wire_shape() {
        let msg = ChatMessage {
            user_id: "u1".into(),
            name: "Ada".into(),
            message: "hi".into(),
            time: "12:01".into(),
        };
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["message"], "hi");
        assert_eq!(json["time"], "12:01");
    }
}
