use std::time::Duration;

use axum::{
    debug_handler,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message as WsMessage, WebSocket, close_code},
    },
    http::{HeaderMap, header},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    AppState,
    auth::Principal,
    chat::{ChatService, Connection, ConnectionRegistry, MessageService},
    error::{ApiError, ApiResult},
};

/// Connections that go quiet longer than this are reclaimed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);
/// Upper bound on one inbound frame.
const MAX_FRAME_BYTES: usize = 64 * 1024;

#[derive(Deserialize)]
pub(crate) struct WsParams {
    token: Option<String>,
}

#[derive(Deserialize)]
struct InboundMessage {
    content: Option<String>,
    image_url: Option<String>,
}

#[debug_handler(state = crate::AppState)]
pub async fn chat_ws(
    Path(chat_id): Path<Uuid>,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params.token.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_owned)
    });

    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| run_gateway(socket, chat_id, token, state))
}

/// Walks a fresh connection through the gateway states: authenticate the
/// token, authorize conversation membership, then relay until the peer
/// goes away. The connection only ever enters the registry after both
/// checks pass, and always leaves it before the transport is released.
async fn run_gateway(mut socket: WebSocket, chat_id: Uuid, token: Option<String>, state: AppState) {
    // AUTHENTICATING
    let principal = match authenticate(&state, token.as_deref()).await {
        Ok(principal) => principal,
        Err(err) => {
            tracing::warn!(%chat_id, error = %err, "ws authentication rejected");
            reject(&mut socket, "authentication failed".to_owned()).await;
            return;
        }
    };

    // AUTHORIZING
    let room = chat_id.to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let outbound = tx.clone();
    let chats = ChatService::new(state.db_pool.clone());
    let connection_id = match authorize_and_admit(
        &chats,
        &state.registry,
        chat_id,
        principal.id,
        Connection::new(tx),
    )
    .await
    {
        Ok(connection_id) => connection_id,
        Err(err) => {
            tracing::warn!(%chat_id, principal = %principal.id, error = %err, "ws admission rejected");
            reject(&mut socket, err.to_string()).await;
            return;
        }
    };

    // ACTIVE
    tracing::info!(%chat_id, principal = %principal.id, "ws connection admitted");

    let (mut sink, mut stream) = socket.split();
    let forward = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let is_close = matches!(frame, WsMessage::Close(_));
            if sink.send(frame).await.is_err() || is_close {
                break;
            }
        }
    });

    let messages = MessageService::new(state.db_pool.clone());
    let mut closing: Option<(u16, String)> = None;
    loop {
        let frame = match tokio::time::timeout(IDLE_TIMEOUT, stream.next()).await {
            Err(_) => {
                closing = Some((close_code::NORMAL, "idle timeout".to_owned()));
                break;
            }
            Ok(None) | Ok(Some(Err(_))) => break, // peer went away
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            WsMessage::Text(text) => {
                if let Err(err) =
                    handle_inbound(&state, &messages, &room, chat_id, principal.id, text.as_str()).await
                {
                    tracing::warn!(%chat_id, principal = %principal.id, error = %err, "ws message rejected");
                    let code = match err {
                        ApiError::ProtocolViolation(_) | ApiError::Validation(_) => close_code::POLICY,
                        _ => close_code::ERROR,
                    };
                    closing = Some((code, err.to_string()));
                    break;
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    // CLOSING
    state.registry.leave(&room, connection_id);
    if let Some((code, reason)) = closing {
        let _ = outbound.send(WsMessage::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })));
    }
    drop(outbound);
    let _ = forward.await;
    tracing::info!(%chat_id, principal = %principal.id, "ws connection closed");
}

async fn authenticate(state: &AppState, token: Option<&str>) -> ApiResult<Principal> {
    let token = token.ok_or_else(|| ApiError::Authentication("missing bearer token".to_owned()))?;
    state.identity.verify(token).await
}

/// The admission gate: the conversation must exist and the resolved
/// principal must be one of its two participants, or the connection never
/// touches the registry. Returns the admitted connection's id for the
/// matching `leave`.
pub async fn authorize_and_admit(
    chats: &ChatService,
    registry: &ConnectionRegistry,
    chat_id: Uuid,
    principal_id: Uuid,
    connection: Connection,
) -> ApiResult<Uuid> {
    let chat = chats.get_chat_by_id(chat_id).await?;
    if !chat.has_participant(principal_id) {
        return Err(ApiError::Authorization("not a participant".to_owned()));
    }
    let connection_id = connection.id();
    registry.join(&chat_id.to_string(), connection);
    Ok(connection_id)
}

/// One inbound payload: parse, persist with the route's conversation id
/// and the resolved sender (never trusted from the payload), then fan the
/// canonical persisted record out to the room.
async fn handle_inbound(
    state: &AppState,
    messages: &MessageService,
    room: &str,
    chat_id: Uuid,
    sender_id: Uuid,
    raw: &str,
) -> ApiResult<()> {
    let inbound: InboundMessage = serde_json::from_str(raw)
        .map_err(|_| ApiError::ProtocolViolation("malformed message payload".to_owned()))?;

    let message = messages
        .send_message(chat_id, sender_id, inbound.content, inbound.image_url)
        .await?;

    let payload = serde_json::to_string(&message)
        .map_err(|e| ApiError::Persistence(format!("failed to encode message: {e}")))?;
    state.registry.broadcast(room, &payload);
    Ok(())
}

async fn reject(socket: &mut WebSocket, reason: String) {
    let _ = socket
        .send(WsMessage::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: reason.into(),
        })))
        .await;
}
