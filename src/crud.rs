use std::marker::PhantomData;

use sqlx::{
    Sqlite, SqlitePool,
    query::Query,
    sqlite::{SqliteArguments, SqliteRow},
};
use time::OffsetDateTime;
use uuid::Uuid;

/// Closed set of columns an entity may be looked up by. Keeping this an
/// enum per entity means a typo in a filter column is a compile error,
/// not a silent empty result.
pub trait FilterField: Copy + Send + Sync {
    fn column(self) -> &'static str;
}

/// Descriptor for a stored entity: where it lives, what it can be filtered
/// by, and whether the store stamps `updated_at` on writes.
pub trait Entity: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin {
    const TABLE: &'static str;
    const HAS_UPDATED_AT: bool = false;
    /// Column appended as `ORDER BY .. ASC` to multi-row reads, if any.
    const ORDER_BY: Option<&'static str> = None;
    type Filter: FilterField;
}

/// Typed insert for an entity. `id` is the primary key chosen by the
/// caller; `create` re-reads the row by it after a successful insert.
pub trait Insert<E: Entity>: Send + Sync {
    const SQL: &'static str;
    fn id(&self) -> Uuid;
    fn bind<'q>(
        &'q self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>>;
}

/// Partial update for an entity, expressed as column assignments. The
/// layer strips any attempt to assign `id` and stamps `updated_at` itself.
pub trait Patch<E: Entity>: Send + Sync {
    fn assignments(&self) -> Vec<(&'static str, SqlValue)>;
}

#[derive(Debug, Clone)]
pub enum SqlValue {
    Text(String),
    Uuid(Uuid),
    Timestamp(OffsetDateTime),
}

impl SqlValue {
    fn bind<'q>(
        &'q self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        match self {
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::Uuid(v) => query.bind(*v),
            SqlValue::Timestamp(v) => query.bind(*v),
        }
    }
}

impl From<Uuid> for SqlValue {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_owned())
    }
}

/// Generic store access for one entity type.
///
/// Every operation absorbs storage faults: a failed read comes back as
/// `None`/empty and a failed write as `None`/`false`, with the fault
/// logged here. Callers translate absence into their own error types.
pub struct Repo<E: Entity> {
    pool: SqlitePool,
    _entity: PhantomData<E>,
}

impl<E: Entity> Repo<E> {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            _entity: PhantomData,
        }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Option<E> {
        let sql = format!("SELECT * FROM {} WHERE id = ?", E::TABLE);
        match sqlx::query_as::<_, E>(&sql).bind(id).fetch_optional(&self.pool).await {
            Ok(row) => row,
            Err(e) => {
                tracing::error!(table = E::TABLE, %id, error = %e, "get_by_id failed");
                None
            }
        }
    }

    pub async fn get_by_field(&self, field: E::Filter, value: impl Into<SqlValue>) -> Option<E> {
        let value = value.into();
        let sql = format!("SELECT * FROM {} WHERE {} = ?", E::TABLE, field.column());
        match value.bind(sqlx::query(&sql)).fetch_optional(&self.pool).await {
            Ok(row) => row.and_then(|r| Self::decode(&r)),
            Err(e) => {
                tracing::error!(table = E::TABLE, field = field.column(), error = %e, "get_by_field failed");
                None
            }
        }
    }

    pub async fn get_all_by_field(&self, field: E::Filter, value: impl Into<SqlValue>) -> Vec<E> {
        let value = value.into();
        let mut sql = format!("SELECT * FROM {} WHERE {} = ?", E::TABLE, field.column());
        if let Some(order) = E::ORDER_BY {
            sql.push_str(&format!(" ORDER BY {order} ASC"));
        }
        match value.bind(sqlx::query(&sql)).fetch_all(&self.pool).await {
            Ok(rows) => rows.iter().filter_map(Self::decode).collect(),
            Err(e) => {
                tracing::error!(table = E::TABLE, field = field.column(), error = %e, "get_all_by_field failed");
                Vec::new()
            }
        }
    }

    pub async fn get_all(&self, skip: i64, limit: i64, filters: &[(E::Filter, SqlValue)]) -> Vec<E> {
        let mut sql = format!("SELECT * FROM {}", E::TABLE);
        for (i, (field, _)) in filters.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(field.column());
            sql.push_str(" = ?");
        }
        if let Some(order) = E::ORDER_BY {
            sql.push_str(&format!(" ORDER BY {order} ASC"));
        }
        sql.push_str(" LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        for (_, value) in filters {
            query = value.bind(query);
        }
        match query.bind(limit).bind(skip).fetch_all(&self.pool).await {
            Ok(rows) => rows.iter().filter_map(Self::decode).collect(),
            Err(e) => {
                tracing::error!(table = E::TABLE, skip, limit, error = %e, "get_all failed");
                Vec::new()
            }
        }
    }

    pub async fn create<I: Insert<E>>(&self, record: &I) -> Option<E> {
        match record.bind(sqlx::query(I::SQL)).execute(&self.pool).await {
            Ok(_) => self.get_by_id(record.id()).await,
            Err(e) => {
                tracing::error!(table = E::TABLE, error = %e, "create failed");
                None
            }
        }
    }

    pub async fn update<P: Patch<E>>(&self, id: Uuid, patch: &P) -> Option<E> {
        let mut assignments: Vec<(&'static str, SqlValue)> = patch
            .assignments()
            .into_iter()
            .filter(|(column, _)| *column != "id")
            .collect();
        if assignments.is_empty() {
            return self.get_by_id(id).await;
        }
        if E::HAS_UPDATED_AT {
            assignments.push(("updated_at", SqlValue::Timestamp(OffsetDateTime::now_utc())));
        }

        let set_clause = assignments
            .iter()
            .map(|(column, _)| format!("{column} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE {} SET {set_clause} WHERE id = ?", E::TABLE);

        let mut query = sqlx::query(&sql);
        for (_, value) in &assignments {
            query = value.bind(query);
        }
        match query.bind(id).execute(&self.pool).await {
            Ok(done) if done.rows_affected() == 0 => None,
            Ok(_) => self.get_by_id(id).await,
            Err(e) => {
                tracing::error!(table = E::TABLE, %id, error = %e, "update failed");
                None
            }
        }
    }

    pub async fn delete(&self, id: Uuid) -> bool {
        let sql = format!("DELETE FROM {} WHERE id = ?", E::TABLE);
        match sqlx::query(&sql).bind(id).execute(&self.pool).await {
            Ok(done) => done.rows_affected() > 0,
            Err(e) => {
                tracing::error!(table = E::TABLE, %id, error = %e, "delete failed");
                false
            }
        }
    }

    fn decode(row: &SqliteRow) -> Option<E> {
        match E::from_row(row) {
            Ok(entity) => Some(entity),
            Err(e) => {
                tracing::error!(table = E::TABLE, error = %e, "row decode failed");
                None
            }
        }
    }
}
