//! Lock coordinator — the single-writer advisory lock per room.
//!
//! DESIGN
//! ======
//! Transitions are pure functions over [`LockState`] so they unit-test
//! without any channel plumbing; the async entry points wrap them with room
//! lookup and fanout. Acquire is strict: a request while a *different*
//! participant holds the lock is rejected with `E_LOCK_CONFLICT` rather than
//! silently stealing the lock. Release only clears when the requester is the
//! holder; anything else is an idempotent no-op.
//!
//! There is no server-side lock timeout. Idle release is the editing
//! client's responsibility; the server reacts only to explicit release and
//! to disconnect or leave of the holder.

use tracing::{debug, info};

use crate::envelope::{Envelope, ErrorCode, kind};
use crate::services::{fanout, fanout::RecipientPolicy, registry};
use crate::state::{AppState, LockState, Room};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock held by {holder}")]
    Conflict { holder: String },
}

impl ErrorCode for LockError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Conflict { .. } => "E_LOCK_CONFLICT",
        }
    }
}

// =============================================================================
// TRANSITIONS
// =============================================================================

/// Attempt `UNLOCKED -> LOCKED(user)`. Re-acquire by the current holder is a
/// no-op success.
///
/// # Errors
///
/// Returns [`LockError::Conflict`] if a different participant holds the lock.
pub fn try_acquire(lock: &mut LockState, user_id: &str) -> Result<(), LockError> {
    match lock {
        LockState::Unlocked => {
            *lock = LockState::Locked { holder: user_id.to_owned() };
            Ok(())
        }
        LockState::Locked { holder } if holder == user_id => Ok(()),
        LockState::Locked { holder } => Err(LockError::Conflict { holder: holder.clone() }),
    }
}

/// Clear the lock if `user_id` is the holder. Returns whether it was held.
pub fn try_release(lock: &mut LockState, user_id: &str) -> bool {
    if lock.is_held_by(user_id) {
        *lock = LockState::Unlocked;
        return true;
    }
    false
}

/// Implicit release on leave/disconnect of the holder. Called by the
/// registry inside the same room transaction that removes the participant.
pub fn release_on_exit(room: &mut Room, user_id: &str) -> bool {
    try_release(&mut room.lock, user_id)
}

// =============================================================================
// ENTRY POINTS
// =============================================================================

/// Acquire the lock for `user_id` and notify the other participants.
/// A missing room is a silent drop (expected after teardown).
///
/// # Errors
///
/// Returns [`LockError::Conflict`] if a different participant holds the lock;
/// the dispatcher reports it to the sender only.
pub async fn acquire(state: &AppState, doc_id: &str, user_id: &str) -> Result<(), LockError> {
    let Some(shared) = registry::room(state, doc_id).await else {
        debug!(%doc_id, %user_id, "lock acquire for unknown room dropped");
        return Ok(());
    };
    let mut room = shared.lock().await;
    try_acquire(&mut room.lock, user_id)?;
    info!(%doc_id, %user_id, "lock acquired");

    let env = Envelope::event(kind::LOCK_ACQUIRED, doc_id, user_id).with_lock(true);
    fanout::deliver(&room, &env, RecipientPolicy::AllExceptSender(user_id));
    Ok(())
}

/// Release the lock if `user_id` holds it and notify the other participants.
/// Non-holder release and missing rooms are silent no-ops.
pub async fn release(state: &AppState, doc_id: &str, user_id: &str) {
    let Some(shared) = registry::room(state, doc_id).await else {
        debug!(%doc_id, %user_id, "lock release for unknown room dropped");
        return;
    };
    let mut room = shared.lock().await;
    if !try_release(&mut room.lock, user_id) {
        return;
    }
    info!(%doc_id, %user_id, "lock released");

    let env = Envelope::event(kind::LOCK_RELEASED, doc_id, user_id).with_lock(false);
    fanout::deliver(&room, &env, RecipientPolicy::AllExceptSender(user_id));
}

#[cfg(test)]
#[path = "lock_test.rs"]
mod tests;
