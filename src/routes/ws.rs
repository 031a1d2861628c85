//! WebSocket handler — connection lifecycle and envelope dispatch.
//!
//! DESIGN
//! ======
//! The bearer credential is verified against the identity service before the
//! upgrade. After upgrade the connection enters a `select!` loop:
//! - Inbound client envelopes → parse + dispatch by `type`
//! - Fanout envelopes from room peers → forward to the client
//!
//! The verified identity is stamped onto every inbound envelope, so a client
//! cannot speak as another user. Dispatch returns the envelopes owed to the
//! sender (snapshot, lock conflict); everything else reaches peers through
//! the fanout engine.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → `Connecting`
//! 2. `join` hands the outbound sender to the registry → `Active`
//! 3. Explicit `close`, transport disconnect, or a closed outbound channel
//!    (this connection was replaced by a rejoin) → `Closed` + registry leave

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::envelope::{Envelope, kind};
use crate::services::fanout::RecipientPolicy;
use crate::services::identity::{IdentityError, VerifiedUser};
use crate::services::presence::Connection;
use crate::services::{chat, lock, registry};
use crate::state::{AppState, ChatMessage, OUTBOUND_BUFFER};

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = params.get("token") else {
        return (StatusCode::UNAUTHORIZED, "token required").into_response();
    };

    let user = match state.identity.verify(token).await {
        Ok(user) => user,
        Err(IdentityError::Rejected) => {
            return (StatusCode::UNAUTHORIZED, "invalid credential").into_response();
        }
        Err(e) => {
            tracing::error!(error = %e, "identity verification failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "identity verification error").into_response();
        }
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, user))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, user: VerifiedUser) {
    let conn_id = Uuid::new_v4();

    // Outbound channel for this connection. The sender moves into the room
    // entry at join time; until then it sits here.
    let (tx, mut rx) = mpsc::channel::<Envelope>(OUTBOUND_BUFFER);
    let mut outbound = Some(tx);
    let mut conn = Connection::default();

    info!(%conn_id, user_id = %user.user_id, "ws: connected");

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                let Some(Ok(msg)) = inbound else { break };
                match msg {
                    Message::Text(text) => {
                        let replies =
                            process_envelope(&state, &mut conn, conn_id, &user, &mut outbound, &text).await;
                        let mut failed = false;
                        for env in replies {
                            if send_envelope(&mut socket, &env).await.is_err() {
                                failed = true;
                                break;
                            }
                        }
                        if failed || conn == Connection::Closed {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            fanned = rx.recv() => {
                match fanned {
                    Some(env) => {
                        if send_envelope(&mut socket, &env).await.is_err() {
                            break;
                        }
                    }
                    // Every sender is gone: our room entry was replaced by a
                    // rejoin from a fresh connection. Nothing left to serve.
                    None => break,
                }
            }
        }
    }

    if let Some((doc_id, user_id)) = conn.close() {
        registry::leave(&state, &doc_id, &user_id, conn_id).await;
    }
    info!(%conn_id, "ws: disconnected");
}

async fn send_envelope(socket: &mut WebSocket, env: &Envelope) -> Result<(), ()> {
    let json = match serde_json::to_string(env) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, kind = %env.kind, "ws: failed to serialize envelope");
            return Err(());
        }
    };
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Parse one inbound text message, apply it, and return envelopes owed to
/// the sender. Malformed input is logged and dropped with no reply.
///
/// Kept free of socket types so tests can drive dispatch directly.
pub async fn process_envelope(
    state: &AppState,
    conn: &mut Connection,
    conn_id: Uuid,
    user: &VerifiedUser,
    outbound: &mut Option<mpsc::Sender<Envelope>>,
    text: &str,
) -> Vec<Envelope> {
    let mut env: Envelope = match serde_json::from_str(text) {
        Ok(env) => env,
        Err(e) => {
            warn!(%conn_id, error = %e, "ws: malformed envelope dropped");
            return vec![];
        }
    };

    // Identity is trusted once verified; never the client's claim.
    env.user_id = user.user_id.clone();

    match env.kind.as_str() {
        kind::JOIN => {
            if !conn.activate(env.doc_id.clone(), user.user_id.clone()) {
                warn!(%conn_id, "ws: join on non-connecting connection dropped");
                return vec![];
            }
            let Some(tx) = outbound.take() else {
                // Activate only succeeds from Connecting, where the sender is
                // still held locally.
                warn!(%conn_id, "ws: outbound sender missing at join");
                return vec![];
            };
            let snapshot = registry::join(state, &env.doc_id, &user.user_id, &user.name, conn_id, tx).await;
            vec![snapshot.into_envelope(&env.doc_id, &user.user_id)]
        }
        kind::CLOSE => {
            if let Some((doc_id, user_id)) = conn.close() {
                registry::leave(state, &doc_id, &user_id, conn_id).await;
            }
            vec![]
        }
        other => {
            // Everything below requires an active session for this room.
            if conn.active_doc() != Some(env.doc_id.as_str()) {
                debug!(%conn_id, kind = %other, doc_id = %env.doc_id, "ws: envelope outside active session dropped");
                return vec![];
            }
            dispatch_room_op(state, &env, user).await
        }
    }
}

/// Room-scoped operations from an active participant.
async fn dispatch_room_op(state: &AppState, env: &Envelope, user: &VerifiedUser) -> Vec<Envelope> {
    let doc_id = env.doc_id.as_str();
    let user_id = user.user_id.as_str();

    match env.kind.as_str() {
        kind::UPDATE_DATA => {
            let Some(data) = env.data.clone() else {
                return malformed(env, "data");
            };
            let out = Envelope::event(kind::UPDATE_DATA, doc_id, user_id)
                .with_name(&user.name)
                .with_data(data);
            registry::relay(state, doc_id, &out, RecipientPolicy::AllExceptSender(user_id)).await;
            vec![]
        }
        kind::LOCK => {
            if env.lock != Some(true) {
                return malformed(env, "lock");
            }
            match lock::acquire(state, doc_id, user_id).await {
                Ok(()) => vec![],
                Err(e) => vec![Envelope::error(doc_id, user_id, &e)],
            }
        }
        kind::RELEASE_LOCK => {
            lock::release(state, doc_id, user_id).await;
            vec![]
        }
        kind::UPDATE_VERSION => {
            let Some(version) = env.version.clone() else {
                return malformed(env, "version");
            };
            let out = Envelope::event(kind::VERSION_CREATED, doc_id, user_id)
                .with_name(&user.name)
                .with_version(version);
            registry::relay(state, doc_id, &out, RecipientPolicy::AllExceptSender(user_id)).await;
            vec![]
        }
        kind::DELETE_VERSION => {
            let Some(version_id) = env.version_id.clone() else {
                return malformed(env, "versionId");
            };
            let out = Envelope::event(kind::VERSION_DELETED, doc_id, user_id)
                .with_name(&user.name)
                .with_version_id(version_id);
            registry::relay(state, doc_id, &out, RecipientPolicy::AllExceptSender(user_id)).await;
            vec![]
        }
        kind::SAVED_DATA => {
            let out = Envelope::event(kind::SAVED, doc_id, user_id).with_name(&user.name);
            registry::relay(state, doc_id, &out, RecipientPolicy::AllExceptSender(user_id)).await;
            vec![]
        }
        kind::UPDATE_UNSAVED => {
            let out = Envelope::event(kind::UNSAVED, doc_id, user_id).with_unsaved(true);
            registry::relay(state, doc_id, &out, RecipientPolicy::All).await;
            vec![]
        }
        kind::ROLLED_BACK => {
            let (Some(data), Some(version_id)) = (env.data.clone(), env.version_id.clone()) else {
                return malformed(env, "data/versionId");
            };
            let out = Envelope::event(kind::ROLLBACK, doc_id, user_id)
                .with_name(&user.name)
                .with_data(data)
                .with_version_id(version_id);
            registry::relay(state, doc_id, &out, RecipientPolicy::AllExceptSender(user_id)).await;
            vec![]
        }
        kind::CHAT_MESSAGE => {
            let (Some(message), Some(time)) = (env.message.clone(), env.time.clone()) else {
                return malformed(env, "message/time");
            };
            let msg = ChatMessage { user_id: user_id.to_owned(), name: user.name.clone(), message, time };
            chat::append(state, doc_id, msg).await;
            vec![]
        }
        unknown => {
            warn!(kind = %unknown, "ws: unknown envelope kind dropped");
            vec![]
        }
    }
}

fn malformed(env: &Envelope, field: &str) -> Vec<Envelope> {
    warn!(kind = %env.kind, field, "ws: envelope missing required field dropped");
    vec![]
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
