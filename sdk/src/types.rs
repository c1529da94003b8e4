//! Shared data model
//!
//! Request-scoped values exchanged between the router components: user
//! context, the durable user record, dispatch targets, backend outputs and the
//! inbound/outbound request shapes.

use crate::errors::{RouterError, RouterErrorExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Attribute bag carried through a conversation turn.
///
/// Keys are kept in order so that serialized snapshots (cache entries,
/// persisted documents, responses) are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserContext(BTreeMap<String, Value>);

impl UserContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Get an attribute value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get an attribute as a string slice
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Set an attribute, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.insert(key, value);
        self
    }

    /// Remove an attribute
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// True when the attribute exists and is truthy (see [`is_truthy`])
    pub fn is_set(&self, key: &str) -> bool {
        self.0.get(key).map(is_truthy).unwrap_or(false)
    }

    /// Copy every attribute of `other` into `self`, overwriting collisions
    pub fn overlay(&mut self, other: &UserContext) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }
}

impl FromIterator<(String, Value)> for UserContext {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<BTreeMap<String, Value>> for UserContext {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

/// Directive truthiness: null, false, 0 and "" are falsy, everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Durable per-user document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Assigned by the store at creation, never changes
    pub id: String,

    /// Optimistic-concurrency token captured at load time
    pub revision: String,

    /// Allow-listed long-term attributes
    pub persisted_context: UserContext,

    /// Tracked dynamic conversations, in the order they were spawned
    pub conversation_ids: Vec<String>,

    /// Origin of the last winning output
    pub last_conversation_id: Option<String>,
}

impl UserRecord {
    /// Remove the first occurrence of a tracked conversation.
    ///
    /// Returns `false` when the id was not tracked.
    pub fn prune_conversation(&mut self, conversation_id: &str) -> bool {
        match self
            .conversation_ids
            .iter()
            .position(|c| c == conversation_id)
        {
            Some(pos) => {
                self.conversation_ids.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Start tracking a spawned conversation.
    ///
    /// Duplicates are kept: the list only shrinks through cache-miss pruning.
    pub fn track_conversation(&mut self, conversation_id: impl Into<String>) {
        self.conversation_ids.push(conversation_id.into());
    }
}

/// Static description of a backend workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceDescriptor {
    /// Configured workspace name
    pub name: String,

    /// Backend workspace identifier
    pub workspace_id: String,

    /// Key of the credential used to reach the backend
    pub credential_ref: String,

    /// Whether replies may spawn tracked sub-conversations
    #[serde(default)]
    pub recursive: bool,
}

/// A dialogue endpoint eligible for the current turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchTarget {
    /// Session cache key and origin id of outputs from this target
    pub id: String,

    pub name: String,
    pub workspace_id: String,
    pub credential_ref: String,
    pub recursive: bool,

    /// Spawned sub-conversation rather than a configured workspace
    pub is_dynamic: bool,
}

impl DispatchTarget {
    /// Target for a configured workspace, keyed per user
    pub fn for_workspace(user_id: &str, workspace: &WorkspaceDescriptor) -> Self {
        Self {
            id: format!("{}:{}", user_id, workspace.name),
            name: workspace.name.clone(),
            workspace_id: workspace.workspace_id.clone(),
            credential_ref: workspace.credential_ref.clone(),
            recursive: workspace.recursive,
            is_dynamic: false,
        }
    }

    /// Target for a tracked conversation, addressed through the workspace in its session entry
    pub fn for_conversation(conversation_id: &str, workspace: &WorkspaceDescriptor) -> Self {
        Self {
            id: conversation_id.to_string(),
            name: workspace.name.clone(),
            workspace_id: workspace.workspace_id.clone(),
            credential_ref: workspace.credential_ref.clone(),
            recursive: workspace.recursive,
            is_dynamic: true,
        }
    }

    pub fn descriptor(&self) -> WorkspaceDescriptor {
        WorkspaceDescriptor {
            name: self.name.clone(),
            workspace_id: self.workspace_id.clone(),
            credential_ref: self.credential_ref.clone(),
            recursive: self.recursive,
        }
    }
}

/// Recognised intent reported by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub intent: String,
    pub confidence: f64,
}

/// Recognised entity reported by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity: String,
    #[serde(default)]
    pub value: String,
    pub confidence: f64,
}

/// One backend's answer to the current utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueOutput {
    /// Reply lines, in order
    pub text: Vec<String>,

    pub intents: Vec<Intent>,
    pub entities: Vec<Entity>,

    /// Confidence of the top intent, 0 when none
    pub intent_confidence: f64,

    /// Confidence of the top entity, 0 when none
    pub entity_confidence: f64,

    /// Context returned by the backend
    pub updated_context: UserContext,

    /// Target (or spawned conversation) this output is attributed to
    pub origin_target_id: String,

    /// Workspace that produced the output
    pub origin: WorkspaceDescriptor,

    /// Sub-conversation started by a recursive target
    pub spawned_conversation_id: Option<String>,
}

/// Ephemeral per-target snapshot kept in the session cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCacheEntry {
    pub workspace: WorkspaceDescriptor,
    #[serde(default)]
    pub context: UserContext,
}

/// Inbound conversation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConverseRequest {
    /// Shared token authenticating the caller
    #[serde(default)]
    pub token: Option<String>,

    /// Durable store view used to find the user (default `by_id`)
    #[serde(default)]
    pub filter: Option<String>,

    /// Lookup key for the view
    #[serde(default)]
    pub value: Option<String>,

    /// Request-supplied context attributes
    #[serde(default)]
    pub context: Option<UserContext>,

    /// User utterance
    #[serde(default)]
    pub text: Option<String>,
}

/// Outbound conversation response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConverseResponse {
    pub status_code: u16,
    pub version: String,
    pub context: UserContext,
    pub user_id: String,
    pub user_rev: String,
    pub response: Vec<String>,
}

/// Response body format version
pub const RESPONSE_VERSION: &str = "1.0";

impl ConverseResponse {
    /// Empty response carrying only a status code
    pub fn with_status(status_code: u16) -> Self {
        Self {
            status_code,
            version: RESPONSE_VERSION.to_string(),
            context: UserContext::new(),
            user_id: String::new(),
            user_rev: String::new(),
            response: Vec::new(),
        }
    }

    /// Empty response carrying the status `err` maps to
    pub fn rejected(err: &RouterError) -> Self {
        Self::with_status(err.status_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(1.5)));
        assert!(is_truthy(&json!("send_mail")));
        assert!(is_truthy(&json!([])));
    }

    #[test]
    fn test_context_overlay_overwrites() {
        let mut base = UserContext::new()
            .with("city", json!("Paris"))
            .with("lang", json!("fr"));
        let top = UserContext::new().with("city", json!("Lyon"));

        base.overlay(&top);

        assert_eq!(base.get_str("city"), Some("Lyon"));
        assert_eq!(base.get_str("lang"), Some("fr"));
    }

    #[test]
    fn test_prune_removes_first_occurrence_only() {
        let mut record = UserRecord {
            id: "u1".to_string(),
            revision: "1-a".to_string(),
            persisted_context: UserContext::new(),
            conversation_ids: vec!["c1".to_string(), "c2".to_string(), "c1".to_string()],
            last_conversation_id: None,
        };

        assert!(record.prune_conversation("c1"));
        assert_eq!(record.conversation_ids, vec!["c2", "c1"]);
        assert!(!record.prune_conversation("missing"));
        assert_eq!(record.conversation_ids.len(), 2);
    }

    #[test]
    fn test_workspace_target_id_is_per_user() {
        let ws = WorkspaceDescriptor {
            name: "weather".to_string(),
            workspace_id: "ws-123".to_string(),
            credential_ref: "main".to_string(),
            recursive: true,
        };
        let target = DispatchTarget::for_workspace("u42", &ws);
        assert_eq!(target.id, "u42:weather");
        assert!(!target.is_dynamic);
        assert_eq!(target.descriptor(), ws);

        let tracked = DispatchTarget::for_conversation("conv-7", &ws);
        assert_eq!(tracked.id, "conv-7");
        assert!(tracked.is_dynamic);
        assert_eq!(tracked.descriptor(), ws);
    }

    #[test]
    fn test_rejected_response_uses_error_status() {
        let response = ConverseResponse::rejected(&RouterError::Unauthorized);
        assert_eq!(response.status_code, 401);
        assert!(response.response.is_empty());

        let response = ConverseResponse::rejected(&RouterError::BadRequest("text".to_string()));
        assert_eq!(response.status_code, 400);
    }

    #[test]
    fn test_request_tolerates_missing_fields() {
        let req: ConverseRequest = serde_json::from_str(r#"{"text": "hi"}"#).unwrap();
        assert_eq!(req.text.as_deref(), Some("hi"));
        assert!(req.token.is_none());
        assert!(req.context.is_none());
    }
}
