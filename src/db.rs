use std::str::FromStr;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Creates the tables on first run. Messages hang off their conversation
/// with a cascading delete; user references are plain (deleting a user who
/// still owns conversations or messages is refused by the store).
pub async fn init_schema(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            id BLOB PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            role TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS chat (
            id BLOB PRIMARY KEY,
            customer_id BLOB NOT NULL REFERENCES users(id),
            merchant_id BLOB NOT NULL REFERENCES users(id),
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS messages (
            id BLOB PRIMARY KEY,
            conversation_id BLOB NOT NULL REFERENCES chat(id) ON DELETE CASCADE,
            sender_id BLOB NOT NULL REFERENCES users(id),
            content TEXT,
            image_url TEXT,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS scan_results (
            id BLOB PRIMARY KEY,
            user_id BLOB REFERENCES users(id),
            image_url TEXT NOT NULL,
            prediction TEXT,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}
