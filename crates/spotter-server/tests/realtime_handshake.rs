//! Realtime upgrade and handshake over a real socket

use chrono::Duration;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use spotter_server::core::auth::SessionVerifier;
use spotter_server::core::models::Identity;
use spotter_server::core::store::Store;
use spotter_server::core::{router, AppState, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct LiveServer {
    _dir: TempDir,
    addr: SocketAddr,
    state: AppState,
    token: String,
}

async fn serve(handshake_timeout: std::time::Duration) -> LiveServer {
    let dir = tempdir().unwrap();
    let mut config = ServerConfig::with_base_dir(dir.path());
    config.handshake_timeout = handshake_timeout;
    config.ensure_dirs().unwrap();
    let store = Arc::new(Store::open(&config.database_path()).await.unwrap());
    store
        .upsert_identity(&Identity::new("a", "Alice"))
        .await
        .unwrap();
    let token = SessionVerifier::new(store.clone())
        .issue_session("a", Duration::hours(1))
        .await
        .unwrap();

    let state = AppState::new(config, store);
    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });

    LiveServer {
        _dir: dir,
        addr,
        state,
        token,
    }
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        match client.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            other => panic!("expected a text frame, got {:?}", other),
        }
    }
}

fn rejected_status(result: Result<(Client, impl std::fmt::Debug), WsError>) -> StatusCode {
    match result {
        Err(WsError::Http(response)) => response.status(),
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("upgrade should have been refused"),
    }
}

#[tokio::test]
async fn bogus_query_token_is_refused_before_upgrade() {
    let server = serve(std::time::Duration::from_secs(5)).await;
    let url = format!("ws://{}/ws?token=bogus", server.addr);

    let status = rejected_status(connect_async(url).await);
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(!server.state.broker.is_connected("a"));
}

#[tokio::test]
async fn bogus_bearer_header_is_refused_before_upgrade() {
    let server = serve(std::time::Duration::from_secs(5)).await;
    let mut request = format!("ws://{}/ws", server.addr)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, "Bearer bogus".parse().unwrap());

    let status = rejected_status(connect_async(request).await);
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn query_token_connects_and_registers() {
    let server = serve(std::time::Duration::from_secs(5)).await;
    let url = format!("ws://{}/ws?token={}", server.addr, server.token);

    let (mut client, _) = connect_async(url).await.unwrap();
    let frame = next_json(&mut client).await;
    assert_eq!(frame["type"], "authenticated");
    assert_eq!(frame["user_id"], "a");
    assert_eq!(server.state.broker.connection_count("a"), 1);
}

#[tokio::test]
async fn authenticate_frame_completes_the_handshake() {
    let server = serve(std::time::Duration::from_secs(5)).await;
    let (mut client, _) = connect_async(format!("ws://{}/ws", server.addr))
        .await
        .unwrap();

    let hello = json!({ "type": "authenticate", "token": server.token });
    client
        .send(Message::text(hello.to_string()))
        .await
        .unwrap();

    let frame = next_json(&mut client).await;
    assert_eq!(frame["type"], "authenticated");
    assert_eq!(frame["display_name"], "Alice");
    assert!(server.state.broker.is_connected("a"));
}

#[tokio::test]
async fn other_first_frame_gets_an_error_and_close() {
    let server = serve(std::time::Duration::from_secs(5)).await;
    let (mut client, _) = connect_async(format!("ws://{}/ws", server.addr))
        .await
        .unwrap();

    let typing = json!({ "type": "typing", "recipient_id": "b" });
    client
        .send(Message::text(typing.to_string()))
        .await
        .unwrap();

    let frame = next_json(&mut client).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["code"], "authentication_failed");
    assert!(matches!(
        client.next().await,
        Some(Ok(Message::Close(_))) | None | Some(Err(_))
    ));
    assert!(!server.state.broker.is_connected("a"));
}

#[tokio::test]
async fn silent_client_is_dropped_after_the_handshake_timeout() {
    let server = serve(std::time::Duration::from_millis(100)).await;
    let (mut client, _) = connect_async(format!("ws://{}/ws", server.addr))
        .await
        .unwrap();

    let frame = tokio::time::timeout(std::time::Duration::from_secs(5), next_json(&mut client))
        .await
        .unwrap();
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["code"], "authentication_failed");
    assert!(!server.state.broker.is_connected("a"));
}
