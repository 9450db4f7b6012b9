pub mod auth;
pub mod chat;
pub mod config;
pub mod crud;
pub mod db;
pub mod error;
pub mod scan;
pub mod users;

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::SqlitePool;

pub use error::{ApiError, ApiResult};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub identity: auth::IdentityProvider,
    pub registry: Arc<chat::ConnectionRegistry>,
    pub settings: config::Settings,
}
