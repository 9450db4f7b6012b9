use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqlitePool, query::Query, sqlite::SqliteArguments};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{Principal, Role},
    crud::{Entity, FilterField, Insert, Patch, Repo, SqlValue},
    error::{ApiError, ApiResult},
};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(skip_serializing)]
    pub updated_at: Option<OffsetDateTime>,
}

#[derive(Clone, Copy)]
pub enum UserField {
    Email,
    Role,
}

impl FilterField for UserField {
    fn column(self) -> &'static str {
        match self {
            UserField::Email => "email",
            UserField::Role => "role",
        }
    }
}

impl Entity for User {
    const TABLE: &'static str = "users";
    const HAS_UPDATED_AT: bool = true;
    type Filter = UserField;
}

#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub email: String,
    pub name: String,
    pub role: Role,
}

struct NewUser<'a> {
    id: Uuid,
    payload: &'a CreateUser,
    created_at: OffsetDateTime,
}

impl Insert<User> for NewUser<'_> {
    const SQL: &'static str =
        "INSERT INTO users (id, email, name, role, created_at) VALUES (?, ?, ?, ?, ?)";

    fn id(&self) -> Uuid {
        self.id
    }

    fn bind<'q>(
        &'q self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        query
            .bind(self.id)
            .bind(&self.payload.email)
            .bind(&self.payload.name)
            .bind(self.payload.role)
            .bind(self.created_at)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUser {
    pub name: Option<String>,
}

impl Patch<User> for UpdateUser {
    fn assignments(&self) -> Vec<(&'static str, SqlValue)> {
        let mut out = Vec::new();
        if let Some(name) = &self.name {
            out.push(("name", SqlValue::Text(name.clone())));
        }
        out
    }
}

pub struct UserService {
    users: Repo<User>,
}

impl UserService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            users: Repo::new(pool),
        }
    }

    pub async fn create_user(&self, payload: CreateUser) -> ApiResult<User> {
        let record = NewUser {
            id: Uuid::now_v7(),
            payload: &payload,
            created_at: OffsetDateTime::now_utc(),
        };
        self.users
            .create(&record)
            .await
            .ok_or_else(|| ApiError::Validation("failed to create user".to_owned()))
    }

    pub async fn get_user_by_id(&self, user_id: Uuid) -> ApiResult<User> {
        self.users
            .get_by_id(user_id)
            .await
            .ok_or_else(|| ApiError::NotFound(format!("user {user_id} not found")))
    }

    pub async fn get_user_by_email(&self, email: &str) -> ApiResult<User> {
        self.users
            .get_by_field(UserField::Email, email)
            .await
            .ok_or_else(|| ApiError::NotFound(format!("email {email} not found")))
    }

    pub async fn get_all_users(&self, skip: i64, limit: i64) -> Vec<User> {
        self.users.get_all(skip, limit, &[]).await
    }

    pub async fn update_user(
        &self,
        user_id: Uuid,
        payload: UpdateUser,
        current_user: &Principal,
    ) -> ApiResult<User> {
        let existing = self.get_user_by_id(user_id).await?;
        if existing.role == Role::Superadmin && current_user.role != Role::Superadmin {
            return Err(ApiError::Authorization("cannot modify superadmin".to_owned()));
        }
        self.users
            .update(user_id, &payload)
            .await
            .ok_or_else(|| ApiError::Persistence("failed to update user".to_owned()))
    }

    pub async fn delete_user(&self, user_id: Uuid, current_user: &Principal) -> ApiResult<()> {
        let existing = self.get_user_by_id(user_id).await?;
        if existing.role == Role::Superadmin && current_user.role != Role::Superadmin {
            return Err(ApiError::Authorization("cannot delete superadmin".to_owned()));
        }
        if self.users.delete(user_id).await {
            Ok(())
        } else {
            // referenced rows keep the user alive, the store refuses the delete
            Err(ApiError::Persistence("failed to delete user".to_owned()))
        }
    }
}
