//! Dialogue backend abstraction
//!
//! A dialogue backend takes an utterance plus the target's working context and
//! answers with reply lines, recognised intents and entities, and an updated
//! context. The dispatch coordinator only talks to backends through
//! [`DialogueBackend`], so tests can swap the HTTP client for a stub.

use async_trait::async_trait;
use sdk::errors::RouterError;
use sdk::types::{is_truthy, Entity, Intent, UserContext};
use serde::{Deserialize, Serialize};

use crate::context::keys;

pub mod http;

pub use http::HttpDialogueBackend;

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors that can occur while talking to a backend
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Credential error: {0}")]
    Credential(String),
}

impl BackendError {
    /// Wrap into the router taxonomy, attributing the failure to a target
    pub fn for_target(self, target: &str) -> RouterError {
        RouterError::BackendUnavailable {
            target: target.to_string(),
            reason: self.to_string(),
        }
    }
}

/// Backend answer to a single utterance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendReply {
    /// Reply lines, in order
    #[serde(default)]
    pub text: Vec<String>,

    #[serde(default)]
    pub intents: Vec<Intent>,

    #[serde(default)]
    pub entities: Vec<Entity>,

    /// Context as updated by the backend
    #[serde(default)]
    pub context: UserContext,
}

impl BackendReply {
    /// Confidence of the first reported intent, 0 when none
    pub fn top_intent_confidence(&self) -> f64 {
        self.intents.first().map(|i| i.confidence).unwrap_or(0.0)
    }

    /// Confidence of the first reported entity, 0 when none
    pub fn top_entity_confidence(&self) -> f64 {
        self.entities.first().map(|e| e.confidence).unwrap_or(0.0)
    }

    /// Sub-conversation id announced in the returned context
    pub fn spawned_conversation_id(&self) -> Option<String> {
        let value = self.context.get(keys::CONVERSATION_ID)?;
        if !is_truthy(value) {
            return None;
        }
        match value {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Dialogue backend trait
#[async_trait]
pub trait DialogueBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Returns true if the backend can be reached with the given credential
    async fn check_health(&self, credential_ref: &str) -> bool;

    /// Send one utterance to a workspace
    ///
    /// # Arguments
    ///
    /// * `credential_ref` - Key of the credential used to authenticate
    /// * `workspace_id` - Backend workspace to address
    /// * `context` - Working context for this target
    /// * `text` - User utterance
    async fn send(
        &self,
        credential_ref: &str,
        workspace_id: &str,
        context: &UserContext,
        text: &str,
    ) -> Result<BackendReply>;
}
