//! Session registry — the room table and its lifecycle.
//!
//! ARCHITECTURE
//! ============
//! The registry is the only component that mutates the room table. Join and
//! leave take the table write lock and then the room lock, which makes the
//! 0→1 create and 1→0 destroy transitions atomic with the membership change
//! itself. Content operations (locking, chat, relays) never touch the table
//! beyond a read-side `Arc` clone, so rooms stay independent.
//!
//! LIFECYCLE
//! =========
//! A room exists iff its participant set is non-empty. Joining an absent
//! docId creates the room; the last leave destroys it along with its lock
//! state and chat log. A join for an already-present user replaces the prior
//! entry (reconnect semantics); the replaced connection notices its channel
//! close and tears itself down without touching the new entry.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::envelope::{Envelope, kind};
use crate::services::{fanout, fanout::RecipientPolicy, lock};
use crate::state::{AppState, ChatMessage, LockState, Participant, ParticipantInfo, Room, SharedRoom};

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Current room state handed to a newly joined connection only. Deltas
/// broadcast while a participant was absent are not replayed.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub participants: Vec<ParticipantInfo>,
    pub lock: LockState,
    pub chat: Vec<ChatMessage>,
}

impl RoomSnapshot {
    /// Render the snapshot as the envelope sent to the joining connection.
    #[must_use]
    pub fn into_envelope(self, doc_id: &str, user_id: &str) -> Envelope {
        let mut env = Envelope::event(kind::SNAPSHOT, doc_id, user_id)
            .with_lock(self.lock.holder().is_some())
            .with_users(self.participants)
            .with_messages(self.chat);
        if let Some(holder) = self.lock.holder() {
            env = env.with_holder(holder);
        }
        env
    }
}

// =============================================================================
// LOOKUP
// =============================================================================

/// Fetch a room entry for a content operation. `None` after teardown, which
/// callers treat as a silent drop.
pub async fn room(state: &AppState, doc_id: &str) -> Option<SharedRoom> {
    state.rooms.read().await.get(doc_id).cloned()
}

/// Relay an envelope to a room's participants under the given policy. A
/// missing room is a silent drop.
pub async fn relay(state: &AppState, doc_id: &str, envelope: &Envelope, policy: RecipientPolicy<'_>) {
    let Some(shared) = room(state, doc_id).await else {
        debug!(%doc_id, kind = %envelope.kind, "relay for unknown room dropped");
        return;
    };
    let room = shared.lock().await;
    fanout::deliver(&room, envelope, policy);
}

// =============================================================================
// JOIN / LEAVE
// =============================================================================

/// Join a session: create the room on first join, upsert the participant,
/// and notify everyone else. Returns the snapshot for the joining connection.
pub async fn join(
    state: &AppState,
    doc_id: &str,
    user_id: &str,
    name: &str,
    conn_id: Uuid,
    tx: mpsc::Sender<Envelope>,
) -> RoomSnapshot {
    let mut rooms = state.rooms.write().await;
    let shared = rooms
        .entry(doc_id.to_owned())
        .or_insert_with(|| {
            info!(%doc_id, "room created");
            Arc::new(Mutex::new(Room::new(doc_id)))
        })
        .clone();
    let mut room = shared.lock().await;

    // Upsert: the replaced entry's sender drops here, closing the stale
    // connection's channel once its buffer drains.
    let replaced = room
        .participants
        .insert(
            user_id.to_owned(),
            Participant { user_id: user_id.to_owned(), name: name.to_owned(), conn_id, tx },
        )
        .is_some();

    info!(%doc_id, %user_id, %conn_id, replaced, participants = room.participants.len(), "participant joined");

    let snapshot = RoomSnapshot {
        participants: room.participant_list(),
        lock: room.lock.clone(),
        chat: room.chat.clone(),
    };

    let list = Envelope::event(kind::CURRENT_USERS, doc_id, user_id).with_users(room.participant_list());
    fanout::deliver(&room, &list, RecipientPolicy::AllExceptSubject(user_id));

    let joined = Envelope::event(kind::PARTICIPANT_JOINED, doc_id, user_id).with_name(name);
    fanout::deliver(&room, &joined, RecipientPolicy::AllExceptSubject(user_id));

    snapshot
}

/// Leave a session. Removes the participant, forces a lock release if they
/// held it, notifies the remaining participants, and destroys the room when
/// it empties. Idempotent: an unknown room, an absent user, or a stale
/// connection id (the entry was already replaced by a rejoin) is a no-op.
pub async fn leave(state: &AppState, doc_id: &str, user_id: &str, conn_id: Uuid) {
    let mut rooms = state.rooms.write().await;
    let Some(shared) = rooms.get(doc_id).cloned() else {
        debug!(%doc_id, %user_id, "leave for unknown room dropped");
        return;
    };
    let mut room = shared.lock().await;

    let current = room.participants.get(user_id);
    if current.is_none_or(|p| p.conn_id != conn_id) {
        debug!(%doc_id, %user_id, %conn_id, "leave from stale connection dropped");
        return;
    }
    let departed = room.participants.remove(user_id);
    let name = departed.map(|p| p.name).unwrap_or_default();
    let was_holder = lock::release_on_exit(&mut room, user_id);

    if room.participants.is_empty() {
        rooms.remove(doc_id);
        info!(%doc_id, %user_id, "last participant left, room destroyed");
        return;
    }

    info!(%doc_id, %user_id, was_holder, remaining = room.participants.len(), "participant left");

    if was_holder {
        let released = Envelope::event(kind::LOCK_RELEASED, doc_id, user_id).with_lock(false);
        fanout::deliver(&room, &released, RecipientPolicy::All);
    }

    let list = Envelope::event(kind::CURRENT_USERS, doc_id, user_id).with_users(room.participant_list());
    fanout::deliver(&room, &list, RecipientPolicy::All);

    let left = Envelope::event(kind::PARTICIPANT_LEFT, doc_id, user_id).with_name(name);
    fanout::deliver(&room, &left, RecipientPolicy::All);
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
