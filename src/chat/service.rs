use sqlx::{Sqlite, SqlitePool, query::Query, sqlite::SqliteArguments};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::Role,
    chat::{Chat, ChatField, Message, MessageField},
    crud::{Insert, Repo},
    error::{ApiError, ApiResult},
    users::{User, UserService},
};

struct NewChat {
    id: Uuid,
    customer_id: Uuid,
    merchant_id: Uuid,
    created_at: OffsetDateTime,
}

impl Insert<Chat> for NewChat {
    const SQL: &'static str =
        "INSERT INTO chat (id, customer_id, merchant_id, created_at) VALUES (?, ?, ?, ?)";

    fn id(&self) -> Uuid {
        self.id
    }

    fn bind<'q>(
        &'q self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        query
            .bind(self.id)
            .bind(self.customer_id)
            .bind(self.merchant_id)
            .bind(self.created_at)
    }
}

struct NewMessage {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: Option<String>,
    image_url: Option<String>,
    created_at: OffsetDateTime,
}

impl Insert<Message> for NewMessage {
    const SQL: &'static str = "INSERT INTO messages \
        (id, conversation_id, sender_id, content, image_url, created_at) \
        VALUES (?, ?, ?, ?, ?, ?)";

    fn id(&self) -> Uuid {
        self.id
    }

    fn bind<'q>(
        &'q self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        query
            .bind(self.id)
            .bind(self.conversation_id)
            .bind(self.sender_id)
            .bind(&self.content)
            .bind(&self.image_url)
            .bind(self.created_at)
    }
}

pub struct ChatService {
    chats: Repo<Chat>,
    users: UserService,
}

impl ChatService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            chats: Repo::new(pool.clone()),
            users: UserService::new(pool),
        }
    }

    /// Starts a conversation between a customer and a merchant. Both sides
    /// must exist, be distinct, and carry the expected role. Nothing stops
    /// the same pair from opening a second conversation.
    pub async fn create_chat(&self, customer_id: Uuid, merchant_id: Uuid) -> ApiResult<Chat> {
        if customer_id == merchant_id {
            return Err(ApiError::Validation(
                "customer and merchant must be distinct".to_owned(),
            ));
        }
        self.expect_role(customer_id, Role::Customer, "customer").await?;
        self.expect_role(merchant_id, Role::Merchant, "merchant").await?;

        let record = NewChat {
            id: Uuid::now_v7(),
            customer_id,
            merchant_id,
            created_at: OffsetDateTime::now_utc(),
        };
        self.chats
            .create(&record)
            .await
            .ok_or_else(|| ApiError::Persistence("failed to create chat".to_owned()))
    }

    pub async fn get_chat_by_id(&self, chat_id: Uuid) -> ApiResult<Chat> {
        self.chats
            .get_by_id(chat_id)
            .await
            .ok_or_else(|| ApiError::NotFound(format!("chat {chat_id} not found")))
    }

    pub async fn get_chats_for_customer(&self, customer_id: Uuid) -> Vec<Chat> {
        self.chats.get_all_by_field(ChatField::CustomerId, customer_id).await
    }

    pub async fn get_chats_for_merchant(&self, merchant_id: Uuid) -> Vec<Chat> {
        self.chats.get_all_by_field(ChatField::MerchantId, merchant_id).await
    }

    /// Deletes a conversation; its messages go with it.
    pub async fn delete_chat(&self, chat_id: Uuid) -> ApiResult<()> {
        let chat = self.get_chat_by_id(chat_id).await?;
        if self.chats.delete(chat.id).await {
            Ok(())
        } else {
            Err(ApiError::Persistence("failed to delete chat".to_owned()))
        }
    }

    async fn expect_role(&self, user_id: Uuid, role: Role, side: &str) -> ApiResult<User> {
        let user = self
            .users
            .get_user_by_id(user_id)
            .await
            .map_err(|_| ApiError::Validation(format!("unknown {side} {user_id}")))?;
        if user.role != role {
            return Err(ApiError::Validation(format!("user {user_id} is not a {side}")));
        }
        Ok(user)
    }
}

pub struct MessageService {
    messages: Repo<Message>,
}

impl MessageService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            messages: Repo::new(pool),
        }
    }

    /// Persists one message. Empty strings count as absent; a message with
    /// neither content nor an image is rejected.
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: Option<String>,
        image_url: Option<String>,
    ) -> ApiResult<Message> {
        let content = content.filter(|s| !s.is_empty());
        let image_url = image_url.filter(|s| !s.is_empty());
        if content.is_none() && image_url.is_none() {
            return Err(ApiError::Validation(
                "message needs content or an image".to_owned(),
            ));
        }

        let record = NewMessage {
            id: Uuid::now_v7(),
            conversation_id,
            sender_id,
            content,
            image_url,
            created_at: OffsetDateTime::now_utc(),
        };
        self.messages
            .create(&record)
            .await
            .ok_or_else(|| ApiError::Persistence("failed to send message".to_owned()))
    }

    /// All messages in a conversation, oldest first. An unknown or empty
    /// conversation yields an empty list, not an error.
    pub async fn get_messages_for_chat(&self, conversation_id: Uuid) -> Vec<Message> {
        let mut history = self
            .messages
            .get_all_by_field(MessageField::ConversationId, conversation_id)
            .await;
        // the store compares at millisecond precision; settle sub-millisecond
        // neighbors on the decoded timestamps (stable, so ties keep store order)
        history.sort_by_key(|m| m.created_at);
        history
    }

    pub async fn get_message_by_id(&self, message_id: Uuid) -> ApiResult<Message> {
        self.messages
            .get_by_id(message_id)
            .await
            .ok_or_else(|| ApiError::NotFound(format!("message {message_id} not found")))
    }

    pub async fn delete_message(&self, message_id: Uuid) -> ApiResult<()> {
        let message = self.get_message_by_id(message_id).await?;
        if self.messages.delete(message.id).await {
            Ok(())
        } else {
            Err(ApiError::Persistence("failed to delete message".to_owned()))
        }
    }
}
