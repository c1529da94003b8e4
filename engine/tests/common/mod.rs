//! Shared fixtures for engine integration tests
#![allow(dead_code)]

use sdk::types::{ConverseRequest, WorkspaceDescriptor};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use switchboard_engine::action::ActionTrigger;
use switchboard_engine::arbiter::Arbiter;
use switchboard_engine::backend::HttpDialogueBackend;
use switchboard_engine::db::{Database, UserRepository, UserStore};
use switchboard_engine::pipeline::{Pipeline, PipelineSettings};
use switchboard_engine::secrets::{CredentialCache, CredentialStore, SecretString};
use switchboard_engine::session::{MemorySessionCache, SessionCache};
use tempfile::TempDir;
use wiremock::MockServer;

pub const TOKEN: &str = "shared-secret";

pub struct Harness {
    pub pipeline: Arc<Pipeline>,
    pub cache: MemorySessionCache,
    pub users: UserRepository,
    pub database: Database,
    _dir: TempDir,
}

pub struct HarnessOptions {
    pub workspaces: Vec<WorkspaceDescriptor>,
    pub persisted: Vec<String>,
    pub fallback: Vec<String>,
    pub action_base_url: Option<String>,
    /// Wrap the repository before handing it to the pipeline
    pub wrap_store: Option<fn(UserRepository) -> Arc<dyn UserStore>>,
    /// Wrap the session cache before handing it to the pipeline
    pub wrap_cache: Option<fn(MemorySessionCache) -> Arc<dyn SessionCache>>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            workspaces: vec![workspace("a", false)],
            persisted: Vec::new(),
            fallback: Vec::new(),
            action_base_url: None,
            wrap_store: None,
            wrap_cache: None,
        }
    }
}

pub fn workspace(name: &str, recursive: bool) -> WorkspaceDescriptor {
    WorkspaceDescriptor {
        name: name.to_string(),
        workspace_id: format!("{}-ws", name),
        credential_ref: "main".to_string(),
        recursive,
    }
}

pub fn message_path(name: &str) -> String {
    format!("/workspaces/{}-ws/message", name)
}

/// Backend wire reply
pub fn reply(text: &[&str], intent_confidence: f64, context: Value) -> Value {
    json!({
        "output": { "text": text },
        "intents": [{ "intent": "any", "confidence": intent_confidence }],
        "entities": [],
        "context": context,
    })
}

pub fn request(text: &str) -> ConverseRequest {
    ConverseRequest {
        token: Some(TOKEN.to_string()),
        filter: None,
        value: None,
        context: None,
        text: Some(text.to_string()),
    }
}

pub fn request_for(user_id: &str, text: &str) -> ConverseRequest {
    ConverseRequest {
        value: Some(user_id.to_string()),
        ..request(text)
    }
}

pub async fn harness(server: &MockServer, options: HarnessOptions) -> Harness {
    let dir = TempDir::new().unwrap();
    let database = Database::new(&dir.path().join("switchboard.db"))
        .await
        .unwrap();
    let users = database.users();

    let credentials = Arc::new(CredentialCache::new(Arc::new(CredentialStore::new(
        "switchboard-test",
    ))));
    credentials.insert("main", "apikey:pw");

    let backend = Arc::new(
        HttpDialogueBackend::new(server.uri(), Duration::from_secs(5), credentials).unwrap(),
    );
    let cache = MemorySessionCache::new();
    let shared_cache: Arc<dyn SessionCache> = match options.wrap_cache {
        Some(wrap) => wrap(cache.clone()),
        None => Arc::new(cache.clone()),
    };

    let store: Arc<dyn UserStore> = match options.wrap_store {
        Some(wrap) => wrap(users.clone()),
        None => Arc::new(users.clone()),
    };

    let token = Some(SecretString::new(TOKEN));
    let action = ActionTrigger::new(
        options.action_base_url,
        token.clone(),
        Duration::from_secs(5),
    )
    .unwrap();

    let settings = PipelineSettings {
        token,
        workspaces: options.workspaces,
        persisted_attributes: options.persisted,
        fallback_reply: options.fallback,
        session_ttl: Duration::from_secs(120),
    };

    let pipeline = Arc::new(Pipeline::new(
        settings,
        store,
        shared_cache,
        backend,
        Arbiter::default(),
        action,
    ));

    Harness {
        pipeline,
        cache,
        users,
        database,
        _dir: dir,
    }
}
