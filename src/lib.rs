//! `CollabDoc` session server — real-time coordination for collaborative
//! document editing.
//!
//! Tracks which participants are viewing a document, arbitrates a
//! single-writer advisory lock per document, and fans state-change events
//! (content updates, lock transitions, presence, version notices, chat) out
//! to the right subset of connected participants. Document persistence and
//! authentication live in external collaborators; this crate only trusts
//! identities the identity service has already verified.

pub mod envelope;
pub mod routes;
pub mod services;
pub mod state;
