#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chat_api::auth::identity::{issue_token, JwtVerifier};
use chat_api::config::{Config, GatewayConfig};
use chat_api::gateway::hub::Hub;
use chat_api::store::{MemoryStore, StoreGateway};
use chat_api::AppState;

pub const TEST_SECRET: &str = "chat-api-test-secret";

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build an `AppState` over an in-memory store. The store handle is returned
/// so tests can seed users, rooms and memberships.
pub fn test_state() -> (AppState, Arc<MemoryStore>) {
    test_state_with(GatewayConfig::default())
}

pub fn test_state_with(gateway: GatewayConfig) -> (AppState, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let config = Config {
        database_url: "postgres://unused".to_string(),
        port: 0,
        jwt_secret: TEST_SECRET.to_string(),
        gateway: gateway.clone(),
    };
    let state = AppState {
        hub: Arc::new(Hub::new(store.clone() as Arc<dyn StoreGateway>, gateway)),
        identity: Arc::new(JwtVerifier::new(TEST_SECRET)),
        config: Arc::new(config),
    };
    (state, store)
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background for the rest of the test.
pub async fn start_server(state: AppState) -> SocketAddr {
    let app = chat_api::routes::router().with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn token_for(user_id: &str, username: &str) -> String {
    issue_token(TEST_SECRET, user_id, username, 3600).expect("issue token")
}

/// Open a socket for `user_id` and wait until the hub has registered it.
pub async fn connect(addr: SocketAddr, state: &AppState, user_id: &str) -> WsClient {
    let token = token_for(user_id, user_id);
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?token={token}"))
        .await
        .expect("ws connect");
    wait_until(|| state.hub.is_user_online(user_id)).await;
    ws
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    time::timeout(Duration::from_secs(5), async {
        while !condition() {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Next text frame parsed as JSON, skipping control frames.
pub async fn next_json(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream ended")
            .expect("ws read error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).expect("json frame"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// Next text frame whose `type` is `category`, discarding others.
pub async fn next_of(ws: &mut WsClient, category: &str) -> serde_json::Value {
    loop {
        let frame = next_json(ws).await;
        if frame["type"] == category {
            return frame;
        }
    }
}
