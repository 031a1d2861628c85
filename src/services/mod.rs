//! Domain services for session coordination.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the room-state mutations and fanout so the websocket
//! route can stay focused on transport and envelope dispatch. The registry
//! is the sole owner of the room table; every other service reaches rooms
//! through its serialized entry points.

pub mod chat;
pub mod fanout;
pub mod identity;
pub mod lock;
pub mod presence;
pub mod registry;
