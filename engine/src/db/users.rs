/// Durable user record persistence
///
/// Users are found through named views: `by_id` matches the record id and
/// `by_<attribute>` matches a persisted context attribute. A lookup miss
/// creates an empty record. Saves are guarded by the revision handed out at
/// load time.
use async_trait::async_trait;
use regex::Regex;
use sdk::errors::RouterError;
use sdk::types::{UserContext, UserRecord};
use sqlx::{Row, SqlitePool};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

/// Durable store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Stale revision for user {0}")]
    Conflict(String),

    #[error("Invalid filter '{0}'")]
    InvalidFilter(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt user document: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for RouterError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(id) => RouterError::StoreConflict(id),
            StoreError::InvalidFilter(f) => RouterError::BadRequest(format!("invalid filter '{}'", f)),
            other => RouterError::Store(other.to_string()),
        }
    }
}

/// Durable store seam used by the pipeline
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find the user matching `value` through the named view, creating an
    /// empty record when nothing matches.
    async fn load(&self, filter: &str, value: &str) -> Result<UserRecord, StoreError>;

    /// Persist a record loaded earlier. Returns the new revision.
    ///
    /// Fails with [`StoreError::Conflict`] when the stored revision moved on.
    async fn save(&self, record: &UserRecord) -> Result<String, StoreError>;
}

/// Lookup view parsed from a filter name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserView {
    ById,
    ByAttribute(String),
}

impl UserView {
    pub fn parse(filter: &str) -> Result<Self, StoreError> {
        static ATTRIBUTE: OnceLock<Regex> = OnceLock::new();
        let attribute = ATTRIBUTE.get_or_init(|| {
            Regex::new(r"^by_([A-Za-z_][A-Za-z0-9_]*)$").expect("Invalid view pattern")
        });

        if filter == "by_id" {
            return Ok(Self::ById);
        }

        attribute
            .captures(filter)
            .and_then(|caps| caps.get(1))
            .map(|m| Self::ByAttribute(m.as_str().to_string()))
            .ok_or_else(|| StoreError::InvalidFilter(filter.to_string()))
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn revision_for(generation: i64) -> String {
    format!("{}-{}", generation, uuid::Uuid::new_v4().simple())
}

/// SQLite-backed user store
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch a record by id without creating it
    pub async fn get(&self, id: &str) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, revision, persisted_context, conversation_ids, last_conversation_id
             FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_record(&r)).transpose()
    }

    /// Number of stored users
    pub async fn count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn create(&self) -> Result<UserRecord, StoreError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let revision = revision_for(1);
        let now = now_secs();

        sqlx::query(
            "INSERT INTO users (id, generation, revision, persisted_context, conversation_ids,
                                created_at, updated_at)
             VALUES (?, 1, ?, '{}', '[]', ?, ?)",
        )
        .bind(&id)
        .bind(&revision)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!(user_id = %id, "Created user record");

        Ok(UserRecord {
            id,
            revision,
            persisted_context: UserContext::new(),
            conversation_ids: Vec::new(),
            last_conversation_id: None,
        })
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<UserRecord, StoreError> {
        let context_json: String = row.get("persisted_context");
        let convs_json: String = row.get("conversation_ids");

        Ok(UserRecord {
            id: row.get("id"),
            revision: row.get("revision"),
            persisted_context: serde_json::from_str(&context_json)?,
            conversation_ids: serde_json::from_str(&convs_json)?,
            last_conversation_id: row.get("last_conversation_id"),
        })
    }
}

#[async_trait]
impl UserStore for UserRepository {
    async fn load(&self, filter: &str, value: &str) -> Result<UserRecord, StoreError> {
        let view = UserView::parse(filter)?;
        debug!(filter, "Looking up user record");

        let row = match &view {
            UserView::ById => {
                sqlx::query(
                    "SELECT id, revision, persisted_context, conversation_ids, last_conversation_id
                     FROM users WHERE id = ?",
                )
                .bind(value)
                .fetch_optional(&self.pool)
                .await?
            }
            UserView::ByAttribute(attr) => {
                // attr is restricted to identifier characters by UserView::parse
                sqlx::query(
                    "SELECT id, revision, persisted_context, conversation_ids, last_conversation_id
                     FROM users WHERE json_extract(persisted_context, ?) = ?
                     ORDER BY created_at, id LIMIT 1",
                )
                .bind(format!("$.{}", attr))
                .bind(value)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        match row {
            Some(row) => Self::row_to_record(&row),
            None => self.create().await,
        }
    }

    async fn save(&self, record: &UserRecord) -> Result<String, StoreError> {
        let generation: i64 = record
            .revision
            .split_once('-')
            .and_then(|(g, _)| g.parse().ok())
            .unwrap_or(0);
        let next_revision = revision_for(generation + 1);

        let result = sqlx::query(
            "UPDATE users
             SET generation = generation + 1, revision = ?, persisted_context = ?,
                 conversation_ids = ?, last_conversation_id = ?, updated_at = ?
             WHERE id = ? AND revision = ?",
        )
        .bind(&next_revision)
        .bind(serde_json::to_string(&record.persisted_context)?)
        .bind(serde_json::to_string(&record.conversation_ids)?)
        .bind(&record.last_conversation_id)
        .bind(now_secs())
        .bind(&record.id)
        .bind(&record.revision)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(record.id.clone()));
        }

        debug!(user_id = %record.id, revision = %next_revision, "Saved user record");
        Ok(next_revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_parsing() {
        assert_eq!(UserView::parse("by_id").unwrap(), UserView::ById);
        assert_eq!(
            UserView::parse("by_skype_id").unwrap(),
            UserView::ByAttribute("skype_id".to_string())
        );
        assert!(UserView::parse("id").is_err());
        assert!(UserView::parse("by_").is_err());
        assert!(UserView::parse("by_x') OR 1=1 --").is_err());
    }

    #[test]
    fn test_invalid_filter_maps_to_bad_request() {
        let err: RouterError = StoreError::InvalidFilter("nope".to_string()).into();
        assert!(matches!(err, RouterError::BadRequest(_)));

        let err: RouterError = StoreError::Conflict("u1".to_string()).into();
        assert!(matches!(err, RouterError::StoreConflict(_)));
    }

    #[test]
    fn test_revision_format() {
        let rev = revision_for(3);
        let (generation, tag) = rev.split_once('-').unwrap();
        assert_eq!(generation, "3");
        assert_eq!(tag.len(), 32);
    }
}
