pub mod registry;
pub mod service;
mod ws;

pub use registry::{Connection, ConnectionRegistry};
pub use service::{ChatService, MessageService};
pub use ws::authorize_and_admit;

use axum::{
    Json, Router, debug_handler,
    extract::{Path, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    AppState,
    auth::{Principal, Role},
    crud::{Entity, FilterField},
    error::ApiResult,
};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Chat {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub merchant_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Chat {
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        user_id == self.customer_id || user_id == self.merchant_id
    }
}

#[derive(Clone, Copy)]
pub enum ChatField {
    CustomerId,
    MerchantId,
}

impl FilterField for ChatField {
    fn column(self) -> &'static str {
        match self {
            ChatField::CustomerId => "customer_id",
            ChatField::MerchantId => "merchant_id",
        }
    }
}

impl Entity for Chat {
    const TABLE: &'static str = "chat";
    type Filter = ChatField;
}

/// The wire shape of a message omits `conversation_id`; the room a client
/// is connected to already identifies it.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub image_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Copy)]
pub enum MessageField {
    ConversationId,
    SenderId,
}

impl FilterField for MessageField {
    fn column(self) -> &'static str {
        match self {
            MessageField::ConversationId => "conversation_id",
            MessageField::SenderId => "sender_id",
        }
    }
}

impl Entity for Message {
    const TABLE: &'static str = "messages";
    // created_at is RFC3339 text with trailing zeros trimmed, so raw text
    // comparison misorders values inside one second; compare as datetimes
    const ORDER_BY: Option<&'static str> = Some("datetime(created_at, 'subsec'), id");
    type Filter = MessageField;
}

#[derive(Debug, Deserialize)]
pub struct CreateChat {
    pub merchant_id: Uuid,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create-chat", post(create_chat))
        .route("/get/{chat_id}", get(read_chat))
        .route("/get/{chat_id}/messages", get(read_messages))
        .route("/ws/{chat_id}", get(ws::chat_ws))
}

#[debug_handler(state = crate::AppState)]
async fn create_chat(
    State(db_pool): State<SqlitePool>,
    principal: Principal,
    Json(payload): Json<CreateChat>,
) -> ApiResult<Json<Chat>> {
    principal.require(&[Role::Customer])?;
    let chat = ChatService::new(db_pool)
        .create_chat(principal.id, payload.merchant_id)
        .await?;
    Ok(Json(chat))
}

#[debug_handler(state = crate::AppState)]
async fn read_chat(
    State(db_pool): State<SqlitePool>,
    principal: Principal,
    Path(chat_id): Path<Uuid>,
) -> ApiResult<Json<Chat>> {
    principal.require(&[Role::Customer, Role::Merchant])?;
    Ok(Json(ChatService::new(db_pool).get_chat_by_id(chat_id).await?))
}

#[debug_handler(state = crate::AppState)]
async fn read_messages(
    State(db_pool): State<SqlitePool>,
    principal: Principal,
    Path(chat_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Message>>> {
    principal.require(&[Role::Customer, Role::Merchant])?;
    Ok(Json(
        MessageService::new(db_pool).get_messages_for_chat(chat_id).await,
    ))
}
