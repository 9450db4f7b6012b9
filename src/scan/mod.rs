use std::path::Path as FsPath;

use axum::{
    Json, Router, debug_handler,
    extract::{Multipart, State},
    routing::post,
};
use serde::Serialize;
use sqlx::{Sqlite, SqlitePool, query::Query, sqlite::SqliteArguments};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    AppState,
    auth::Principal,
    config::Settings,
    crud::{Entity, FilterField, Insert, Repo},
    error::{ApiError, ApiResult},
    users::UserService,
};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ScanResult {
    pub id: Uuid,
    pub user_id: Uuid,
    pub image_url: String,
    /// Populated once an inference backend exists.
    pub prediction: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Copy)]
pub enum ScanField {
    UserId,
}

impl FilterField for ScanField {
    fn column(self) -> &'static str {
        match self {
            ScanField::UserId => "user_id",
        }
    }
}

impl Entity for ScanResult {
    const TABLE: &'static str = "scan_results";
    type Filter = ScanField;
}

struct NewScan {
    id: Uuid,
    user_id: Uuid,
    image_url: String,
    created_at: OffsetDateTime,
}

impl Insert<ScanResult> for NewScan {
    const SQL: &'static str =
        "INSERT INTO scan_results (id, user_id, image_url, created_at) VALUES (?, ?, ?, ?)";

    fn id(&self) -> Uuid {
        self.id
    }

    fn bind<'q>(
        &'q self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        query
            .bind(self.id)
            .bind(self.user_id)
            .bind(&self.image_url)
            .bind(self.created_at)
    }
}

pub struct ScanService {
    scans: Repo<ScanResult>,
    users: UserService,
}

impl ScanService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            scans: Repo::new(pool.clone()),
            users: UserService::new(pool),
        }
    }

    pub async fn create_scan_result(&self, user_id: Uuid, image_url: String) -> ApiResult<ScanResult> {
        self.users.get_user_by_id(user_id).await?;
        let record = NewScan {
            id: Uuid::now_v7(),
            user_id,
            image_url,
            created_at: OffsetDateTime::now_utc(),
        };
        self.scans
            .create(&record)
            .await
            .ok_or_else(|| ApiError::Persistence("failed to create scan result".to_owned()))
    }

    pub async fn get_scan_by_id(&self, scan_id: Uuid) -> ApiResult<ScanResult> {
        self.scans
            .get_by_id(scan_id)
            .await
            .ok_or_else(|| ApiError::NotFound(format!("scan result {scan_id} not found")))
    }

    pub async fn get_scans_for_user(&self, user_id: Uuid) -> Vec<ScanResult> {
        self.scans.get_all_by_field(ScanField::UserId, user_id).await
    }

    pub async fn delete_scan(&self, scan_id: Uuid) -> ApiResult<()> {
        let scan = self.get_scan_by_id(scan_id).await?;
        if self.scans.delete(scan.id).await {
            Ok(())
        } else {
            Err(ApiError::Persistence("failed to delete scan result".to_owned()))
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/scanning", post(upload_and_scan))
}

#[debug_handler(state = crate::AppState)]
async fn upload_and_scan(
    State(db_pool): State<SqlitePool>,
    State(settings): State<Settings>,
    principal: Principal,
    mut multipart: Multipart,
) -> ApiResult<Json<ScanResult>> {
    let mut saved: Option<String> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed upload: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_owned();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(format!("malformed upload: {e}")))?;
        saved = Some(save_upload(&settings.upload_dir, &filename, &bytes).await?);
        break;
    }

    let image_url =
        saved.ok_or_else(|| ApiError::Validation("missing file field in upload".to_owned()))?;

    // prediction stays unset until an inference backend is wired in
    let scan = ScanService::new(db_pool)
        .create_scan_result(principal.id, image_url)
        .await?;
    Ok(Json(scan))
}

async fn save_upload(upload_dir: &str, filename: &str, bytes: &[u8]) -> ApiResult<String> {
    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| persistence_io(e, upload_dir))?;

    // keep only the final path component of the client-supplied name
    let safe_name = FsPath::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");
    let stored = format!("{upload_dir}/{}_{safe_name}", Uuid::now_v7().simple());
    tokio::fs::write(&stored, bytes)
        .await
        .map_err(|e| persistence_io(e, &stored))?;
    Ok(stored)
}

fn persistence_io(e: std::io::Error, path: &str) -> ApiError {
    tracing::error!(path, error = %e, "could not save uploaded file");
    ApiError::Persistence("could not save uploaded file".to_owned())
}
