//! End-to-end session test: real websocket clients against a server bound to
//! an ephemeral port, with a stub identity collaborator.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use collabdoc::routes;
use collabdoc::services::identity::{IdentityError, IdentityVerifier, VerifiedUser};
use collabdoc::state::AppState;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Identity stub: a fixed token → user table.
struct TokenMap(HashMap<String, VerifiedUser>);

#[async_trait::async_trait]
impl IdentityVerifier for TokenMap {
    async fn verify(&self, token: &str) -> Result<VerifiedUser, IdentityError> {
        self.0.get(token).cloned().ok_or(IdentityError::Rejected)
    }
}

fn user(user_id: &str, name: &str) -> VerifiedUser {
    VerifiedUser {
        user_id: user_id.into(),
        email: format!("{user_id}@example.com"),
        name: name.into(),
    }
}

async fn start_server() -> SocketAddr {
    let mut tokens = HashMap::new();
    tokens.insert("alice-token".to_owned(), user("alice", "Alice"));
    tokens.insert("bob-token".to_owned(), user("bob", "Bob"));
    let state = AppState::new(Arc::new(TokenMap(tokens)));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, routes::app(state)).await.expect("server failed");
    });
    addr
}

async fn connect(addr: SocketAddr, token: &str) -> WsStream {
    let (stream, _) = connect_async(format!("ws://{addr}/ws?token={token}"))
        .await
        .expect("websocket connect");
    stream
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("websocket send");
}

async fn recv_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(1), ws.next())
            .await
            .expect("receive timed out")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("json envelope");
        }
    }
}

#[tokio::test]
async fn two_client_session_lifecycle() {
    let addr = start_server().await;

    let mut alice = connect(addr, "alice-token").await;
    send_json(&mut alice, json!({"type": "join", "docId": "doc-1", "userId": "alice", "name": "Alice"})).await;
    let snapshot = recv_json(&mut alice).await;
    assert_eq!(snapshot["type"], "snapshot");
    assert_eq!(snapshot["users"].as_array().expect("users").len(), 1);
    assert_eq!(snapshot["lock"], false);

    let mut bob = connect(addr, "bob-token").await;
    send_json(&mut bob, json!({"type": "join", "docId": "doc-1", "userId": "bob", "name": "Bob"})).await;
    let snapshot = recv_json(&mut bob).await;
    assert_eq!(snapshot["type"], "snapshot");
    assert_eq!(snapshot["users"].as_array().expect("users").len(), 2);

    // Alice sees Bob arrive; Bob's copy was the snapshot, not fanout.
    let list = recv_json(&mut alice).await;
    assert_eq!(list["type"], "current-users");
    let joined = recv_json(&mut alice).await;
    assert_eq!(joined["type"], "participant-joined");
    assert_eq!(joined["userId"], "bob");

    // Chat fans out to everyone, tagged.
    send_json(
        &mut alice,
        json!({"type": "chatMessage", "docId": "doc-1", "userId": "alice", "name": "Alice", "message": "hi", "time": "12:01"}),
    )
    .await;
    let own = recv_json(&mut alice).await;
    assert_eq!(own["type"], "chat");
    assert_eq!(own["own"], true);
    let echo = recv_json(&mut bob).await;
    assert_eq!(echo["type"], "chat");
    assert_eq!(echo["own"], false);
    assert_eq!(echo["message"], "hi");

    // Bob takes the lock; Alice's acquire conflicts until Bob is gone.
    send_json(&mut bob, json!({"type": "lock", "docId": "doc-1", "userId": "bob", "lock": true})).await;
    let acquired = recv_json(&mut alice).await;
    assert_eq!(acquired["type"], "lock-acquired");
    assert_eq!(acquired["userId"], "bob");

    send_json(&mut alice, json!({"type": "lock", "docId": "doc-1", "userId": "alice", "lock": true})).await;
    let conflict = recv_json(&mut alice).await;
    assert_eq!(conflict["type"], "error");
    assert_eq!(conflict["code"], "E_LOCK_CONFLICT");

    // Transport disconnect of the holder forces the release.
    drop(bob);
    let released = recv_json(&mut alice).await;
    assert_eq!(released["type"], "lock-released");
    let list = recv_json(&mut alice).await;
    assert_eq!(list["type"], "current-users");
    assert_eq!(list["users"].as_array().expect("users").len(), 1);
    let left = recv_json(&mut alice).await;
    assert_eq!(left["type"], "participant-left");
    assert_eq!(left["userId"], "bob");

    // The room is fresh once everyone has gone. Wait for the server to end
    // Alice's connection so the leave has definitely been applied.
    send_json(&mut alice, json!({"type": "close", "docId": "doc-1", "userId": "alice"})).await;
    timeout(Duration::from_secs(1), async {
        loop {
            match alice.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .expect("closed connection should terminate");

    let mut again = connect(addr, "alice-token").await;
    send_json(&mut again, json!({"type": "join", "docId": "doc-1", "userId": "alice", "name": "Alice"})).await;
    let snapshot = recv_json(&mut again).await;
    assert_eq!(snapshot["users"].as_array().expect("users").len(), 1);
    assert_eq!(snapshot["messages"].as_array().expect("messages").len(), 0);
}

#[tokio::test]
async fn invalid_credential_is_refused_at_upgrade() {
    let addr = start_server().await;
    let err = connect_async(format!("ws://{addr}/ws?token=wrong")).await;
    assert!(err.is_err(), "handshake must be rejected");
}

#[tokio::test]
async fn rejoin_from_a_new_connection_replaces_the_old_one() {
    let addr = start_server().await;

    let mut first = connect(addr, "alice-token").await;
    send_json(&mut first, json!({"type": "join", "docId": "doc-1", "userId": "alice", "name": "Alice"})).await;
    recv_json(&mut first).await; // snapshot

    let mut second = connect(addr, "alice-token").await;
    send_json(&mut second, json!({"type": "join", "docId": "doc-1", "userId": "alice", "name": "Alice"})).await;
    let snapshot = recv_json(&mut second).await;
    // Still one participant: the entry was replaced, not duplicated.
    assert_eq!(snapshot["users"].as_array().expect("users").len(), 1);

    // The first connection is drained and closed by the server.
    let end = timeout(Duration::from_secs(1), async {
        loop {
            match first.next().await {
                None | Some(Err(_)) => break,
                Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(end.is_ok(), "replaced connection should be closed by the server");
}
