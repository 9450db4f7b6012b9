use std::str::FromStr;

use gemlink::{
    ApiError, db,
    auth::Role,
    chat::{ChatService, Connection, ConnectionRegistry, MessageService, authorize_and_admit},
    users::{CreateUser, User, UserService},
};
use tokio::sync::mpsc;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

async fn setup() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    db::init_schema(&pool).await.unwrap();
    pool
}

async fn seed_user(pool: &SqlitePool, email: &str, role: Role) -> User {
    UserService::new(pool.clone())
        .create_user(CreateUser {
            email: email.to_owned(),
            name: email.to_owned(),
            role,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn create_then_fetch_conversation() {
    let pool = setup().await;
    let customer = seed_user(&pool, "c@example.com", Role::Customer).await;
    let merchant = seed_user(&pool, "m@example.com", Role::Merchant).await;
    let chats = ChatService::new(pool.clone());

    let before = OffsetDateTime::now_utc() - Duration::seconds(1);
    let chat = chats.create_chat(customer.id, merchant.id).await.unwrap();
    let fetched = chats.get_chat_by_id(chat.id).await.unwrap();

    assert_eq!(fetched.id, chat.id);
    assert_eq!(fetched.customer_id, customer.id);
    assert_eq!(fetched.merchant_id, merchant.id);
    assert!(fetched.created_at >= before);
}

#[tokio::test]
async fn create_chat_checks_participants() {
    let pool = setup().await;
    let customer = seed_user(&pool, "c@example.com", Role::Customer).await;
    let merchant = seed_user(&pool, "m@example.com", Role::Merchant).await;
    let chats = ChatService::new(pool.clone());

    // same user on both sides
    assert!(matches!(
        chats.create_chat(customer.id, customer.id).await,
        Err(ApiError::Validation(_))
    ));
    // sides swapped: roles do not match
    assert!(matches!(
        chats.create_chat(merchant.id, customer.id).await,
        Err(ApiError::Validation(_))
    ));
    // unknown merchant
    assert!(matches!(
        chats.create_chat(customer.id, Uuid::now_v7()).await,
        Err(ApiError::Validation(_))
    ));
}

#[tokio::test]
async fn duplicate_conversations_are_allowed() {
    let pool = setup().await;
    let customer = seed_user(&pool, "c@example.com", Role::Customer).await;
    let merchant = seed_user(&pool, "m@example.com", Role::Merchant).await;
    let chats = ChatService::new(pool.clone());

    let first = chats.create_chat(customer.id, merchant.id).await.unwrap();
    let second = chats.create_chat(customer.id, merchant.id).await.unwrap();
    assert_ne!(first.id, second.id);

    let for_customer = chats.get_chats_for_customer(customer.id).await;
    assert_eq!(for_customer.len(), 2);
    let for_merchant = chats.get_chats_for_merchant(merchant.id).await;
    assert_eq!(for_merchant.len(), 2);
}

#[tokio::test]
async fn message_history_is_ordered() {
    let pool = setup().await;
    let customer = seed_user(&pool, "c@example.com", Role::Customer).await;
    let merchant = seed_user(&pool, "m@example.com", Role::Merchant).await;
    let chat = ChatService::new(pool.clone())
        .create_chat(customer.id, merchant.id)
        .await
        .unwrap();
    let messages = MessageService::new(pool.clone());

    for i in 0..5 {
        messages
            .send_message(chat.id, customer.id, Some(format!("msg {i}")), None)
            .await
            .unwrap();
    }

    let history = messages.get_messages_for_chat(chat.id).await;
    assert_eq!(history.len(), 5);
    for pair in history.windows(2) {
        assert!(pair[0].created_at <= pair[1].created_at);
    }
    assert_eq!(history[0].content.as_deref(), Some("msg 0"));
    assert_eq!(history[4].content.as_deref(), Some("msg 4"));

    // unknown conversation: empty, not an error
    assert!(messages.get_messages_for_chat(Uuid::now_v7()).await.is_empty());
}

#[tokio::test]
async fn history_order_survives_trimmed_timestamps() {
    let pool = setup().await;
    let customer = seed_user(&pool, "c@example.com", Role::Customer).await;
    let merchant = seed_user(&pool, "m@example.com", Role::Merchant).await;
    let chat = ChatService::new(pool.clone())
        .create_chat(customer.id, merchant.id)
        .await
        .unwrap();

    // stored as text these render "..20Z", "..20.5Z" and "..20.51Z", which
    // sort backwards lexicographically
    let base = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
    let stamps = [
        (base + Duration::milliseconds(510), "third"),
        (base + Duration::milliseconds(500), "second"),
        (base, "first"),
    ];
    for (created_at, content) in stamps {
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, content, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::now_v7())
        .bind(chat.id)
        .bind(customer.id)
        .bind(content)
        .bind(created_at)
        .execute(&pool)
        .await
        .unwrap();
    }

    let history = MessageService::new(pool.clone()).get_messages_for_chat(chat.id).await;
    let contents: Vec<&str> = history.iter().filter_map(|m| m.content.as_deref()).collect();
    assert_eq!(contents, ["first", "second", "third"]);
    for pair in history.windows(2) {
        assert!(pair[0].created_at <= pair[1].created_at);
    }
}

#[tokio::test]
async fn non_participants_are_never_admitted() {
    let pool = setup().await;
    let customer = seed_user(&pool, "c@example.com", Role::Customer).await;
    let merchant = seed_user(&pool, "m@example.com", Role::Merchant).await;
    let stranger = seed_user(&pool, "x@example.com", Role::Customer).await;
    let chats = ChatService::new(pool.clone());
    let chat = chats.create_chat(customer.id, merchant.id).await.unwrap();
    let registry = ConnectionRegistry::new();
    let room = chat.id.to_string();

    // valid role, but not a participant of this conversation
    let (tx, _rx) = mpsc::unbounded_channel();
    assert!(matches!(
        authorize_and_admit(&chats, &registry, chat.id, stranger.id, Connection::new(tx)).await,
        Err(ApiError::Authorization(_))
    ));
    assert_eq!(registry.room_size(&room), 0);

    // unknown conversation never admits either
    let unknown = Uuid::now_v7();
    let (tx, _rx) = mpsc::unbounded_channel();
    assert!(matches!(
        authorize_and_admit(&chats, &registry, unknown, customer.id, Connection::new(tx)).await,
        Err(ApiError::NotFound(_))
    ));
    assert_eq!(registry.room_size(&unknown.to_string()), 0);

    // both real participants pass the same gate
    let (tx, _rx_customer) = mpsc::unbounded_channel();
    let admitted = authorize_and_admit(&chats, &registry, chat.id, customer.id, Connection::new(tx))
        .await
        .unwrap();
    let (tx, _rx_merchant) = mpsc::unbounded_channel();
    authorize_and_admit(&chats, &registry, chat.id, merchant.id, Connection::new(tx))
        .await
        .unwrap();
    assert_eq!(registry.room_size(&room), 2);

    registry.leave(&room, admitted);
    assert_eq!(registry.room_size(&room), 1);
}

#[tokio::test]
async fn message_needs_content_or_image() {
    let pool = setup().await;
    let customer = seed_user(&pool, "c@example.com", Role::Customer).await;
    let merchant = seed_user(&pool, "m@example.com", Role::Merchant).await;
    let chat = ChatService::new(pool.clone())
        .create_chat(customer.id, merchant.id)
        .await
        .unwrap();
    let messages = MessageService::new(pool.clone());

    assert!(matches!(
        messages.send_message(chat.id, customer.id, None, None).await,
        Err(ApiError::Validation(_))
    ));
    // empty strings count as absent
    assert!(matches!(
        messages
            .send_message(chat.id, customer.id, Some(String::new()), Some(String::new()))
            .await,
        Err(ApiError::Validation(_))
    ));

    let image_only = messages
        .send_message(chat.id, customer.id, None, Some("https://cdn/x.png".to_owned()))
        .await
        .unwrap();
    assert_eq!(image_only.content, None);
    assert_eq!(image_only.image_url.as_deref(), Some("https://cdn/x.png"));
}

#[tokio::test]
async fn message_to_unknown_conversation_fails() {
    let pool = setup().await;
    let customer = seed_user(&pool, "c@example.com", Role::Customer).await;
    let messages = MessageService::new(pool.clone());

    // foreign key refusal is absorbed by the store layer and surfaces
    // as a persistence error from the service
    assert!(matches!(
        messages
            .send_message(Uuid::now_v7(), customer.id, Some("hi".to_owned()), None)
            .await,
        Err(ApiError::Persistence(_))
    ));
}

#[tokio::test]
async fn deleting_a_conversation_deletes_its_messages() {
    let pool = setup().await;
    let customer = seed_user(&pool, "c@example.com", Role::Customer).await;
    let merchant = seed_user(&pool, "m@example.com", Role::Merchant).await;
    let chats = ChatService::new(pool.clone());
    let messages = MessageService::new(pool.clone());

    let chat = chats.create_chat(customer.id, merchant.id).await.unwrap();
    let sent = messages
        .send_message(chat.id, customer.id, Some("hi".to_owned()), None)
        .await
        .unwrap();

    chats.delete_chat(chat.id).await.unwrap();
    assert!(matches!(
        chats.get_chat_by_id(chat.id).await,
        Err(ApiError::NotFound(_))
    ));
    assert!(messages.get_messages_for_chat(chat.id).await.is_empty());
    assert!(matches!(
        messages.get_message_by_id(sent.id).await,
        Err(ApiError::NotFound(_))
    ));
    // second delete: the conversation is already gone
    assert!(matches!(
        chats.delete_chat(chat.id).await,
        Err(ApiError::NotFound(_))
    ));
}

#[tokio::test]
async fn persisted_record_matches_the_broadcast_shape() {
    let pool = setup().await;
    let customer = seed_user(&pool, "c@example.com", Role::Customer).await;
    let merchant = seed_user(&pool, "m@example.com", Role::Merchant).await;
    let chat = ChatService::new(pool.clone())
        .create_chat(customer.id, merchant.id)
        .await
        .unwrap();
    let messages = MessageService::new(pool.clone());

    let sent = messages
        .send_message(chat.id, customer.id, Some("hi".to_owned()), None)
        .await
        .unwrap();
    let wire = serde_json::to_value(&sent).unwrap();
    assert_eq!(wire["content"], "hi");
    assert!(wire["image_url"].is_null());
    assert_eq!(wire["sender_id"], serde_json::to_value(customer.id).unwrap());
    assert!(wire.get("conversation_id").is_none());

    // history returns the same record the room saw
    let history = messages.get_messages_for_chat(chat.id).await;
    assert_eq!(history.len(), 1);
    assert_eq!(serde_json::to_value(&history[0]).unwrap(), wire);
}
