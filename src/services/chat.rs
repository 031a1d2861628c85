//! Ephemeral channel buffer — per-room transient chat log.
//!
//! Messages append in arrival order at the room's serialization point and
//! fan out to every participant, tagged so senders recognize their own echo.
//! The log is unbounded and replayed to new joiners via the snapshot; it is
//! never persisted and dies with the room.

use tracing::debug;

use crate::envelope::{Envelope, kind};
use crate::services::{fanout, registry};
use crate::state::{AppState, ChatMessage};

/// Append a chat message to the room log and deliver it to all participants.
/// A missing room is a silent drop (expected after teardown).
pub async fn append(state: &AppState, doc_id: &str, msg: ChatMessage) {
    let Some(shared) = registry::room(state, doc_id).await else {
        debug!(%doc_id, user_id = %msg.user_id, "chat for unknown room dropped");
        return;
    };
    let mut room = shared.lock().await;
    room.chat.push(msg.clone());

    let env = Envelope::event(kind::CHAT, doc_id, &msg.user_id)
        .with_name(&msg.name)
        .with_message(&msg.message)
        .with_time(&msg.time);
    fanout::deliver_chat(&room, &env, &msg.user_id);
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
