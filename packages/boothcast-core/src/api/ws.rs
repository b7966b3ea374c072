//! WebSocket handlers: the commentary subscriber socket and the
//! observability event socket.
//!
//! The commentary socket implements the push protocol: a subscriber sends
//! one `subscribe` op (optionally with a resume-from game time) and then
//! receives JSON text frames in strict game-time order. Subscribers are
//! never allowed to backpressure the pipeline: a connection that falls
//! more than the per-subscriber queue bound behind the head observes
//! `Lagged` on its receiver and is disconnected; everyone else is
//! unaffected.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use crate::api::AppState;
use crate::events::{EventEmitter, HubEvent};
use crate::game::snapshot::GameId;
use crate::game::time::GameTime;
use crate::utils::now_millis;

/// How long a fresh connection may idle before sending its subscribe op.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Incoming subscriber operations.
#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum WsIncoming {
    Subscribe {
        game_id: String,
        #[serde(default)]
        since: Option<GameTime>,
    },
}

/// Error frame sent before closing a misbehaving connection.
#[derive(Serialize)]
struct WsError<'a> {
    r#type: &'static str,
    error: &'a str,
}

/// GET /ws - commentary subscriber socket.
pub async fn commentary_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_commentary_socket(socket, state))
}

async fn handle_commentary_socket(socket: WebSocket, state: AppState) {
    let guard = state.ws_manager.register();
    let (mut sender, mut receiver) = socket.split();

    // First message must be the subscribe op.
    let subscribe = tokio::time::timeout(SUBSCRIBE_TIMEOUT, async {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Text(text) = message {
                return serde_json::from_str::<WsIncoming>(&text).ok();
            }
        }
        None
    })
    .await;

    let Ok(Some(WsIncoming::Subscribe { game_id, since })) = subscribe else {
        let _ = send_error(&mut sender, "expected a subscribe op").await;
        return;
    };
    let game_id = GameId::new(game_id);

    let Some(feed) = state.hub.get(&game_id) else {
        let _ = send_error(&mut sender, "unknown game").await;
        return;
    };
    state.ws_manager.attach_game(guard.id(), &game_id);

    // Prefill and live receiver are captured atomically, so resumed
    // subscribers see no gap and no duplicates.
    let (prefill, mut rx) = feed.subscribe(since);
    log::info!(
        "[WS] {} subscribed to {} (since: {:?}, prefill: {})",
        guard.id(),
        game_id,
        since,
        prefill.len()
    );
    for frame in prefill {
        if send_frame(&mut sender, &frame).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            _ = guard.cancel_token().cancelled() => {
                log::info!("[WS] {}: force-closed", guard.id());
                let _ = sender.close().await;
                return;
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("[WS] {}: client disconnected", guard.id());
                        return;
                    }
                    Some(Ok(_)) => {
                        // Pings are answered by axum; other input is ignored.
                    }
                    Some(Err(e)) => {
                        log::debug!("[WS] {}: receive error: {}", guard.id(), e);
                        return;
                    }
                }
            }
            frame = rx.recv() => {
                match frame {
                    Ok(frame) => {
                        if send_frame(&mut sender, &frame).await.is_err() {
                            return;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        // Outbound queue overflowed: this subscriber is cut
                        // loose so the fast ones stay in order.
                        log::warn!(
                            "[WS] {}: lagged by {} frames, disconnecting",
                            guard.id(),
                            missed
                        );
                        state.event_bridge.emit_hub(HubEvent::SubscriberDropped {
                            connection_id: guard.id().to_string(),
                            game_id: game_id.to_string(),
                            reason: format!("lagged by {} frames", missed),
                            timestamp: now_millis(),
                        });
                        let _ = send_error(&mut sender, "disconnected: subscriber too slow").await;
                        let _ = sender.close().await;
                        return;
                    }
                    Err(RecvError::Closed) => {
                        // Feed finished; the End frame was already delivered.
                        let _ = sender.close().await;
                        return;
                    }
                }
            }
        }
    }
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &crate::services::hub::WireFrame,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).unwrap_or_default();
    sender.send(Message::Text(text.into())).await
}

async fn send_error(
    sender: &mut SplitSink<WebSocket, Message>,
    error: &str,
) -> Result<(), axum::Error> {
    let body = serde_json::to_string(&WsError {
        r#type: "error",
        error,
    })
    .unwrap_or_default();
    sender.send(Message::Text(body.into())).await
}

/// GET /ws/events - observability event socket.
pub async fn events_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_events_socket(socket, state))
}

async fn handle_events_socket(socket: WebSocket, state: AppState) {
    let guard = state.ws_manager.register();
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.event_bridge.subscribe();

    loop {
        tokio::select! {
            _ = guard.cancel_token().cancelled() => {
                let _ = sender.close().await;
                return;
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => return,
                }
            }
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        let text = serde_json::to_string(&event).unwrap_or_default();
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            return;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        log::debug!(
                            "[WS] {}: events socket lagged by {}, continuing",
                            guard.id(),
                            missed
                        );
                    }
                    Err(RecvError::Closed) => return,
                }
            }
        }
    }
}
