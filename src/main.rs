use std::sync::Arc;

use axum::{Json, Router, debug_handler, routing::get};
use gemlink::{AppState, auth, chat, config::Settings, db, scan, users};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env()?;
    let db_pool = db::connect(&settings.database_url).await?;
    db::init_schema(&db_pool).await?;

    let identity = auth::IdentityProvider::new(
        settings.identity_url.clone(),
        settings.identity_service_key.clone(),
    );
    let bind_addr = settings.bind_addr.clone();
    let app_state = AppState {
        db_pool,
        identity,
        registry: Arc::new(chat::ConnectionRegistry::new()),
        settings,
    };

    let app = Router::new()
        .route("/health/check", get(health))
        .nest("/users", users::router())
        .nest("/chat", chat::router())
        .nest("/scan", scan::router())
        .with_state(app_state)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[debug_handler]
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": 200 }))
}
