//! Fanout engine — recipient selection and best-effort delivery.
//!
//! DESIGN
//! ======
//! Fanout operates on an already-locked room: the caller holds the room's
//! serialization point, computes the envelope, and hands it here. Delivery is
//! `try_send` per participant — at-most-once, no acknowledgement, no replay.
//! A full or closed channel is skipped; the disconnect event cleans up the
//! participant entry.

use tracing::debug;

use crate::envelope::Envelope;
use crate::state::Room;

// =============================================================================
// POLICIES
// =============================================================================

/// Who receives an envelope. Sender and subject exclusions both key on the
/// user id; they are distinct policies because they exclude for different
/// reasons (the sender already knows, the subject gets a dedicated snapshot).
#[derive(Debug, Clone, Copy)]
pub enum RecipientPolicy<'a> {
    /// Every current participant.
    All,
    /// Everyone except the participant that originated the event.
    AllExceptSender(&'a str),
    /// Everyone except the participant the event is about.
    AllExceptSubject(&'a str),
}

impl RecipientPolicy<'_> {
    fn includes(self, user_id: &str) -> bool {
        match self {
            Self::All => true,
            Self::AllExceptSender(excluded) | Self::AllExceptSubject(excluded) => excluded != user_id,
        }
    }
}

// =============================================================================
// DELIVERY
// =============================================================================

/// Deliver one envelope to the participants selected by `policy`.
pub fn deliver(room: &Room, envelope: &Envelope, policy: RecipientPolicy<'_>) {
    for participant in room.participants.values() {
        if !policy.includes(&participant.user_id) {
            continue;
        }
        if participant.tx.try_send(envelope.clone()).is_err() {
            debug!(
                doc_id = %room.doc_id,
                user_id = %participant.user_id,
                kind = %envelope.kind,
                "fanout: dropped envelope for unreachable participant"
            );
        }
    }
}

/// Deliver a chat envelope to every participant, tagging each copy so the
/// sender can recognize its own echoed message.
pub fn deliver_chat(room: &Room, envelope: &Envelope, sender_id: &str) {
    for participant in room.participants.values() {
        let tagged = envelope.clone().with_own(participant.user_id == sender_id);
        if participant.tx.try_send(tagged).is_err() {
            debug!(
                doc_id = %room.doc_id,
                user_id = %participant.user_id,
                "fanout: dropped chat envelope for unreachable participant"
            );
        }
    }
}

#[cfg(test)]
#[path = "fanout_test.rs"]
mod tests;
