/// Integration tests for the user store
///
/// Tests the durable record lifecycle including:
/// - Database creation, WAL mode and migrations
/// - Creation on lookup miss
/// - Optimistic concurrency on save
/// - Lookup through persisted attribute views
use sdk::types::UserContext;
use serde_json::json;
use switchboard_engine::db::{Database, StoreError, UserStore};
use tempfile::TempDir;

#[tokio::test]
async fn test_database_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("switchboard.db");

    let db = Database::new(&db_path).await.unwrap();
    assert!(db_path.exists());

    let wal_path = temp_dir.path().join("switchboard.db-wal");
    assert!(wal_path.exists());

    let result = sqlx::query("SELECT COUNT(*) as count FROM users")
        .fetch_one(db.pool())
        .await;
    assert!(result.is_ok());

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("switchboard.db");

    let id = {
        let db = Database::new(&db_path).await.unwrap();
        let users = db.users();
        let mut record = users.load("by_id", "").await.unwrap();
        record.persisted_context = UserContext::new().with("name", json!("Ada"));
        users.save(&record).await.unwrap();
        db.close().await.unwrap();
        record.id
    };

    let db = Database::new(&db_path).await.unwrap();
    let record = db.users().get(&id).await.unwrap().unwrap();
    assert_eq!(record.persisted_context.get_str("name"), Some("Ada"));
}

#[tokio::test]
async fn test_miss_creates_record() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("switchboard.db"))
        .await
        .unwrap();
    let users = db.users();

    let record = users.load("by_id", "does-not-exist").await.unwrap();
    assert_ne!(record.id, "does-not-exist");
    assert!(record.revision.starts_with("1-"));
    assert!(record.persisted_context.is_empty());
    assert!(record.conversation_ids.is_empty());
    assert!(record.last_conversation_id.is_none());
    assert_eq!(users.count().await.unwrap(), 1);

    let again = users.load("by_id", &record.id).await.unwrap();
    assert_eq!(again, record);
    assert_eq!(users.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_save_unchanged_record_keeps_content() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("switchboard.db"))
        .await
        .unwrap();
    let users = db.users();

    let mut record = users.load("by_id", "").await.unwrap();
    record.persisted_context = UserContext::new().with("city", json!("Oslo"));
    record.conversation_ids = vec!["conv-1".to_string()];
    record.last_conversation_id = Some("conv-1".to_string());
    users.save(&record).await.unwrap();

    let loaded = users.load("by_id", &record.id).await.unwrap();
    let revision = users.save(&loaded).await.unwrap();
    let reloaded = users.load("by_id", &record.id).await.unwrap();

    assert_eq!(reloaded.revision, revision);
    assert_ne!(reloaded.revision, loaded.revision);
    assert_eq!(reloaded.persisted_context, loaded.persisted_context);
    assert_eq!(reloaded.conversation_ids, loaded.conversation_ids);
    assert_eq!(reloaded.last_conversation_id, loaded.last_conversation_id);
}

#[tokio::test]
async fn test_stale_revision_conflicts() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("switchboard.db"))
        .await
        .unwrap();
    let users = db.users();

    let first = users.load("by_id", "").await.unwrap();
    let mut second = first.clone();

    let mut winner = first.clone();
    winner.persisted_context = UserContext::new().with("name", json!("first"));
    users.save(&winner).await.unwrap();

    second.persisted_context = UserContext::new().with("name", json!("second"));
    let err = users.save(&second).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(id) if id == first.id));

    let stored = users.get(&first.id).await.unwrap().unwrap();
    assert_eq!(stored.persisted_context.get_str("name"), Some("first"));
}

#[tokio::test]
async fn test_attribute_view_lookup() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("switchboard.db"))
        .await
        .unwrap();
    let users = db.users();

    let mut record = users.load("by_id", "").await.unwrap();
    record.persisted_context = UserContext::new().with("channel_user_id", json!("29:abc"));
    users.save(&record).await.unwrap();

    let found = users.load("by_channel_user_id", "29:abc").await.unwrap();
    assert_eq!(found.id, record.id);

    let created = users.load("by_channel_user_id", "29:other").await.unwrap();
    assert_ne!(created.id, record.id);
    assert_eq!(users.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_invalid_view_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("switchboard.db"))
        .await
        .unwrap();
    let users = db.users();

    let err = users.load("by_name; DROP TABLE users", "x").await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidFilter(_)));
    assert_eq!(users.count().await.unwrap(), 0);
}
