//! End-to-end tests using real WebSocket clients.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use haggle_core::{ChatMessage, GatewayError, MessageId, PersistenceGateway, UserId};
use haggle_server::{HaggleServer, ServerConfig};
use haggle_store::{SqliteStore, StaticResourceGateway};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    base: String,
    server: HaggleServer,
    store: SqliteStore,
}

impl TestServer {
    fn ws_url(&self, user: &str) -> String {
        format!("ws://{}/api/im/ws?userID={user}", self.base)
    }
}

/// Boot a server over an in-memory store on an ephemeral port.
async fn boot_server() -> TestServer {
    let store = SqliteStore::in_memory().unwrap();
    let server = HaggleServer::new(
        ServerConfig::default(),
        Arc::new(store.clone()),
        Arc::new(StaticResourceGateway::new("https://media.test")),
    );
    let (addr, _handle) = server.listen().await.unwrap();
    TestServer {
        base: addr.to_string(),
        server,
        store,
    }
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

/// Connect and wait until the registry shows `count` users.
async fn connect_as(server: &TestServer, user: &str, count: usize) -> WsStream {
    let ws = connect(&server.ws_url(user)).await;
    wait_for_connections(&server.server, count).await;
    ws
}

async fn wait_for_connections(server: &HaggleServer, count: usize) {
    timeout(TIMEOUT, async {
        while server.registry().count() != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry never reached expected size");
}

/// Read the next text message as JSON.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Assert nothing but control frames arrive within `window`.
async fn expect_silence(ws: &mut WsStream, window: Duration) {
    if let Ok(Some(Ok(Message::Text(text)))) = timeout(window, ws.next()).await {
        panic!("unexpected message: {text}");
    }
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

fn send_frame(temp_id: &str, from: &str, to: &str, content: &str) -> Value {
    json!({
        "tempID": temp_id,
        "id": "",
        "from": from,
        "to": to,
        "content": content,
        "mediaType": "text",
        "type": 1,
    })
}

#[tokio::test]
async fn alice_to_online_bob_delivers_and_ack_clears_pending() {
    let server = boot_server().await;
    let mut alice = connect_as(&server, "alice", 1).await;
    let mut bob = connect_as(&server, "bob", 2).await;

    send_json(&mut alice, send_frame("t1", "alice", "bob", "is this still for sale?")).await;

    let delivered = read_json(&mut bob).await;
    assert_eq!(delivered["type"], 1);
    assert_eq!(delivered["from"], "alice");
    assert_eq!(delivered["content"], "is this still for sale?");
    let id = delivered["id"].as_str().unwrap().to_owned();
    assert!(!id.is_empty());

    let receipt = read_json(&mut alice).await;
    assert_eq!(receipt["type"], 2);
    assert_eq!(receipt["id"], id.as_str());
    assert_eq!(receipt["tempID"], "t1");

    let bob_conn = server.server.registry().lookup(&UserId::from("bob")).unwrap();
    assert!(bob_conn.pending().contains(&MessageId::from_raw(id.clone())));

    send_json(&mut bob, json!({"id": id, "from": "bob", "to": "alice", "type": 2})).await;
    timeout(TIMEOUT, async {
        while !bob_conn.pending().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("ack never cleared the pending entry");

    // no resend after the ack
    expect_silence(&mut bob, Duration::from_millis(1_500)).await;
}

#[tokio::test]
async fn unacknowledged_message_is_resent() {
    let server = boot_server().await;
    let mut alice = connect_as(&server, "alice", 1).await;
    let mut bob = connect_as(&server, "bob", 2).await;

    send_json(&mut alice, send_frame("t1", "alice", "bob", "hello")).await;
    let first = read_json(&mut bob).await;
    let resent = read_json(&mut bob).await;
    assert_eq!(first["id"], resent["id"]);
    assert_eq!(resent["content"], "hello");
}

#[tokio::test]
async fn offline_bob_keeps_every_missed_message_unread() {
    let server = boot_server().await;
    let mut alice = connect_as(&server, "alice", 1).await;

    send_json(&mut alice, send_frame("t1", "alice", "bob", "first")).await;
    let first = read_json(&mut alice).await;
    send_json(&mut alice, send_frame("t2", "alice", "bob", "second")).await;
    let second = read_json(&mut alice).await;
    assert_eq!(second["tempID"], "t2");

    // the offline record is written after the receipt goes out
    let first_missed = MessageId::from_raw(first["id"].as_str().unwrap());
    let conversations = server.store.conversations();
    let row = timeout(TIMEOUT, async {
        loop {
            let row = conversations
                .get(&UserId::from("bob"), &UserId::from("alice"))
                .unwrap();
            if let Some(row) =
                row.filter(|r| r.first_unread_message_id.as_ref() == Some(&first_missed))
            {
                return row;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first missed message was never recorded");
    assert_eq!(row.last_message_content, "second");
    assert!(!row.mark_deleted);

    // bob saw neither message, so both stay unread
    assert!(row.last_read_message_id.is_none());
    let unread = server
        .store
        .messages()
        .count_after("alice:bob", row.last_read_message_id.as_ref())
        .unwrap();
    assert_eq!(unread, 2);
}

#[tokio::test]
async fn malformed_frames_keep_the_connection_open() {
    let server = boot_server().await;
    let mut alice = connect_as(&server, "alice", 1).await;

    alice.send(Message::Text("not json".into())).await.unwrap();
    send_json(&mut alice, json!({"type": 9})).await;
    send_json(&mut alice, send_frame("t1", "alice", "bob", "still here")).await;

    let receipt = read_json(&mut alice).await;
    assert_eq!(receipt["tempID"], "t1");
}

#[tokio::test]
async fn missing_user_id_returns_400() {
    let server = boot_server().await;
    let resp = reqwest::get(format!("http://{}/api/im/ws", server.base))
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(resp.text().await.unwrap(), "missing user id");

    assert!(connect_async(format!("ws://{}/api/im/ws?userID=", server.base))
        .await
        .is_err());
    assert_eq!(server.server.registry().count(), 0);
}

#[tokio::test]
async fn reconnect_replaces_and_closes_previous_socket() {
    let server = boot_server().await;
    let mut first = connect_as(&server, "alice", 1).await;
    let second = connect(&server.ws_url("alice")).await;

    let closed = timeout(TIMEOUT, async {
        loop {
            match first.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "superseded socket was not closed");

    // the replacement stays registered after the old session cleans up
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.server.registry().count(), 1);
    drop(second);
}

#[tokio::test]
async fn disconnect_unregisters_user() {
    let server = boot_server().await;
    let mut alice = connect_as(&server, "alice", 1).await;
    alice.close(None).await.unwrap();
    wait_for_connections(&server.server, 0).await;
}

struct FailingStore;

#[async_trait]
impl PersistenceGateway for FailingStore {
    async fn save_message(&self, _message: &ChatMessage) -> Result<MessageId, GatewayError> {
        Err(GatewayError::Storage("database is locked".into()))
    }

    async fn record_last_read_message(
        &self,
        _from: &UserId,
        _to: &UserId,
        _last_message_id: &MessageId,
    ) -> Result<(), GatewayError> {
        Ok(())
    }
}

#[tokio::test]
async fn persistence_failure_returns_fail_to_sender_only() {
    let server = HaggleServer::new(
        ServerConfig::default(),
        Arc::new(FailingStore),
        Arc::new(StaticResourceGateway::new("https://media.test")),
    );
    let (addr, _handle) = server.listen().await.unwrap();
    let mut alice = connect(&format!("ws://{addr}/api/im/ws?userID=alice")).await;
    wait_for_connections(&server, 1).await;
    let mut bob = connect(&format!("ws://{addr}/api/im/ws?userID=bob")).await;
    wait_for_connections(&server, 2).await;

    send_json(&mut alice, send_frame("t1", "alice", "bob", "hi")).await;

    let fail = read_json(&mut alice).await;
    assert_eq!(fail["type"], 3);
    assert_eq!(fail["id"], "t1");
    assert_eq!(fail["tempID"], "t1");
    expect_silence(&mut bob, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn graceful_shutdown_closes_client_sockets() {
    let server = boot_server().await;
    let mut alice = connect_as(&server, "alice", 1).await;
    server
        .server
        .graceful_shutdown(Vec::new(), Some(Duration::from_secs(2)))
        .await;

    let closed = timeout(TIMEOUT, async {
        loop {
            match alice.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}
