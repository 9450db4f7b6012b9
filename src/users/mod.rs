pub mod service;

pub use service::{CreateUser, UpdateUser, User, UserField, UserService};

use axum::{
    Json, Router, debug_handler,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{AppState, auth::Principal, error::ApiResult};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(create_user))
        .route("/me", get(read_current_user))
        .route("/getAll", get(list_users))
        .route("/get/{user_id}", get(read_user))
        .route("/update/{user_id}", put(update_user))
        .route("/delete/{user_id}", delete(delete_user))
}

#[derive(Deserialize)]
struct Pagination {
    #[serde(default)]
    skip: i64,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[debug_handler]
async fn create_user(
    State(db_pool): State<SqlitePool>,
    Json(payload): Json<CreateUser>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let user = UserService::new(db_pool).create_user(payload).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[debug_handler(state = crate::AppState)]
async fn read_current_user(principal: Principal) -> Json<Principal> {
    Json(principal)
}

#[debug_handler]
async fn list_users(
    State(db_pool): State<SqlitePool>,
    Query(Pagination { skip, limit }): Query<Pagination>,
) -> Json<Vec<User>> {
    Json(UserService::new(db_pool).get_all_users(skip, limit).await)
}

#[debug_handler]
async fn read_user(
    State(db_pool): State<SqlitePool>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<User>> {
    Ok(Json(UserService::new(db_pool).get_user_by_id(user_id).await?))
}

#[debug_handler(state = crate::AppState)]
async fn update_user(
    State(db_pool): State<SqlitePool>,
    principal: Principal,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpdateUser>,
) -> ApiResult<Json<User>> {
    let user = UserService::new(db_pool)
        .update_user(user_id, payload, &principal)
        .await?;
    Ok(Json(user))
}

#[debug_handler(state = crate::AppState)]
async fn delete_user(
    State(db_pool): State<SqlitePool>,
    principal: Principal,
    Path(user_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    UserService::new(db_pool).delete_user(user_id, &principal).await?;
    Ok(StatusCode::NO_CONTENT)
}
