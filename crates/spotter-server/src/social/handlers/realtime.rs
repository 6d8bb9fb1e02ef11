//! Realtime channel
//!
//! `GET /ws` upgrades to a WebSocket. The credential comes from `?token=`,
//! an `Authorization` header, or a first `authenticate` frame sent within
//! the handshake timeout. Once verified the connection is registered with
//! the broker and receives every event published to its identity.

use crate::core::auth::bearer_token;
use crate::core::config::AppState;
use crate::core::error::{Error, Result};
use crate::core::models::IdentityClaim;
use crate::social::broker::ServerEvent;
use axum::{
    body::Bytes,
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, info, warn};

/// Frames a client may send
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Authenticate {
        token: String,
    },
    SendMessage {
        recipient_id: String,
        content: String,
    },
    Typing {
        recipient_id: String,
        #[serde(default = "default_typing")]
        is_typing: bool,
    },
}

fn default_typing() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// GET /ws
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsAuthQuery>,
    headers: HeaderMap,
) -> Response {
    let token = query.token.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .map(str::to_string)
    });

    // A credential offered on the upgrade is checked before upgrading
    let claim = match token {
        Some(token) => match state.verifier.verify(&token).await {
            Ok(claim) => Some(claim),
            Err(e) => {
                warn!("[Broker] Rejected upgrade: {}", e);
                return e.into_response();
            }
        },
        None => None,
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, claim))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, claim: Option<IdentityClaim>) {
    let claim = match claim {
        Some(claim) => claim,
        None => match authenticate(&mut socket, &state).await {
            Ok(claim) => claim,
            Err(e) => {
                info!("[Broker] Handshake failed: {}", e);
                let _ = send_event(&mut socket, &error_frame(&e)).await;
                let _ = socket.send(WsMessage::Close(None)).await;
                return;
            }
        },
    };

    let mut subscription = state.broker.register(&claim);
    let authenticated = ServerEvent::Authenticated {
        user_id: claim.id.clone(),
        display_name: claim.display_name.clone(),
    };
    if send_event(&mut socket, &authenticated).await.is_err() {
        return;
    }

    let (mut sender, mut receiver) = socket.split();
    let period = state.config.heartbeat_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let Some(text) = encode(&event) else { continue };
                if sender.send(WsMessage::Text(text.into())).await.is_err() {
                    break; // client disconnected
                }
            }
            _ = heartbeat.tick() => {
                if sender.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
            frame = receiver.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(reply) = handle_frame(&state, &claim, text.as_str()).await {
                            let Some(text) = encode(&reply) else { continue };
                            if sender.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    debug!(
        "[Broker] Connection #{} for {} closed",
        subscription.connection_id(),
        subscription.identity_id()
    );
}

/// Wait for an `authenticate` frame within the handshake timeout
async fn authenticate<S>(frames: &mut S, state: &AppState) -> Result<IdentityClaim>
where
    S: Stream<Item = std::result::Result<WsMessage, axum::Error>> + Unpin,
{
    let wait_for_token = async {
        loop {
            match frames.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    return match serde_json::from_str::<ClientEvent>(text.as_str()) {
                        Ok(ClientEvent::Authenticate { token }) => Ok(token),
                        _ => Err(Error::AuthenticationFailed("authenticate first")),
                    };
                }
                Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => continue,
                _ => return Err(Error::AuthenticationFailed("connection closed")),
            }
        }
    };

    let token = timeout(state.config.handshake_timeout, wait_for_token)
        .await
        .map_err(|_| Error::AuthenticationFailed("handshake timed out"))??;

    state.verifier.verify(&token).await
}

/// Apply one inbound frame. Returns a frame to send back, if any.
pub async fn handle_frame(
    state: &AppState,
    claim: &IdentityClaim,
    text: &str,
) -> Option<ServerEvent> {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            return Some(error_frame(&Error::BadRequest(format!(
                "unrecognised frame: {}",
                e
            ))))
        }
    };

    match event {
        ClientEvent::Authenticate { .. } => None,
        ClientEvent::SendMessage {
            recipient_id,
            content,
        } => match state
            .conversations
            .send(claim, &recipient_id, &content)
            .await
        {
            Ok(_) => None,
            Err(e) => Some(error_frame(&e)),
        },
        ClientEvent::Typing {
            recipient_id,
            is_typing,
        } => {
            state.conversations.typing(claim, &recipient_id, is_typing);
            None
        }
    }
}

fn error_frame(err: &Error) -> ServerEvent {
    ServerEvent::Error {
        code: err.code().to_string(),
        message: err.client_message(),
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("[Broker] Failed to encode {}: {}", event.name(), e);
            None
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<()> {
    let text = serde_json::to_string(event)?;
    socket
        .send(WsMessage::Text(text.into()))
        .await
        .map_err(|e| Error::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ServerConfig;
    use crate::core::models::Identity;
    use crate::core::auth::SessionVerifier;
    use crate::core::store::test_support::{seed, temp_store};
    use futures::stream;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn client_frames_parse() {
        let frame: ClientEvent =
            serde_json::from_str(r#"{"type":"typing","recipient_id":"b"}"#).unwrap();
        assert_eq!(
            frame,
            ClientEvent::Typing {
                recipient_id: "b".into(),
                is_typing: true
            }
        );
        let frame: ClientEvent =
            serde_json::from_str(r#"{"type":"authenticate","token":"t"}"#).unwrap();
        assert_eq!(frame, ClientEvent::Authenticate { token: "t".into() });
    }

    async fn handshake_state(wait: Duration) -> (TempDir, AppState, String) {
        let (dir, store) = temp_store().await;
        seed(&store, &[Identity::new("a", "Alice")]).await;
        let store = Arc::new(store);
        let token = SessionVerifier::new(store.clone())
            .issue_session("a", chrono::Duration::hours(1))
            .await
            .unwrap();
        let mut config = ServerConfig::with_base_dir(dir.path());
        config.handshake_timeout = wait;
        (dir, AppState::new(config, store), token)
    }

    fn text(frame: &str) -> std::result::Result<WsMessage, axum::Error> {
        Ok(WsMessage::Text(frame.into()))
    }

    #[tokio::test]
    async fn handshake_accepts_a_valid_authenticate_frame() {
        let (_dir, state, token) = handshake_state(Duration::from_secs(5)).await;
        let frame = format!(r#"{{"type":"authenticate","token":"{}"}}"#, token);
        let mut frames = stream::iter(vec![Ok(WsMessage::Ping(Bytes::new())), text(&frame)]);

        let claim = authenticate(&mut frames, &state).await.unwrap();
        assert_eq!(claim.id, "a");
        assert_eq!(claim.display_name, "Alice");
    }

    #[tokio::test]
    async fn handshake_requires_authenticate_first() {
        let (_dir, state, _token) = handshake_state(Duration::from_secs(5)).await;
        let mut frames = stream::iter(vec![text(r#"{"type":"typing","recipient_id":"b"}"#)]);

        let err = authenticate(&mut frames, &state).await.unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed("authenticate first")));
        match error_frame(&err) {
            ServerEvent::Error { code, .. } => assert_eq!(code, "authentication_failed"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn handshake_rejects_an_unknown_token() {
        let (_dir, state, _token) = handshake_state(Duration::from_secs(5)).await;
        let mut frames = stream::iter(vec![text(r#"{"type":"authenticate","token":"nope"}"#)]);

        let err = authenticate(&mut frames, &state).await.unwrap_err();
        assert_eq!(err.code(), "authentication_failed");
    }

    #[tokio::test]
    async fn handshake_times_out_without_a_frame() {
        let (_dir, state, _token) = handshake_state(Duration::from_millis(50)).await;
        let mut frames = stream::pending::<std::result::Result<WsMessage, axum::Error>>();

        let started = std::time::Instant::now();
        let err = authenticate(&mut frames, &state).await.unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed("handshake timed out")));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn handshake_fails_when_the_client_hangs_up() {
        let (_dir, state, _token) = handshake_state(Duration::from_secs(5)).await;
        let mut frames = stream::iter(vec![Ok(WsMessage::Close(None))]);

        let err = authenticate(&mut frames, &state).await.unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed("connection closed")));
    }

    #[tokio::test]
    async fn inbound_send_uses_the_conversation_store() {
        let (dir, store) = temp_store().await;
        seed(&store, &[Identity::new("a", "Alice"), Identity::new("b", "Bob")]).await;
        let state = AppState::new(ServerConfig::with_base_dir(dir.path()), Arc::new(store));

        let bob = IdentityClaim {
            id: "b".into(),
            display_name: "Bob".into(),
        };
        let mut inbox = state.broker.register(&bob);
        let alice = IdentityClaim {
            id: "a".into(),
            display_name: "Alice".into(),
        };

        let reply = handle_frame(
            &state,
            &alice,
            r#"{"type":"send_message","recipient_id":"b","content":"hi"}"#,
        )
        .await;
        assert!(reply.is_none());
        assert_eq!(inbox.recv().await.map(|e| e.name()), Some("receive_message"));
        assert_eq!(inbox.recv().await.map(|e| e.name()), Some("new_unread_message"));
        assert_eq!(state.store.unread_count("b").await.unwrap(), 1);

        let reply = handle_frame(
            &state,
            &alice,
            r#"{"type":"send_message","recipient_id":"b","content":"  "}"#,
        )
        .await;
        match reply {
            Some(ServerEvent::Error { code, .. }) => assert_eq!(code, "empty_content"),
            other => panic!("unexpected {:?}", other),
        }

        let reply = handle_frame(&state, &alice, "not json").await;
        assert!(matches!(reply, Some(ServerEvent::Error { .. })));
    }
}
