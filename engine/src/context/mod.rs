//! Context assembly
//!
//! Builds the working context for a turn out of three layers, lowest
//! precedence first:
//!
//! 1. allow-listed attributes of the durable user record
//! 2. attributes supplied with the request
//! 3. the per-target snapshot held in the session cache
//!
//! The third layer is applied per dispatch target with [`overlay_cached`];
//! [`assemble`] only merges the first two.

use sdk::types::{is_truthy, UserContext, UserRecord};

/// Context keys with router-level meaning
pub mod keys {
    /// Stay with the last used target for exactly one turn
    pub const KEEP_CONV: &str = "KEEP_CONV";

    /// One-shot action directive, appended to the action base URL
    pub const ACTION: &str = "action";

    /// Backend signal that the conversation is over
    pub const SHOULD_END_SESSION: &str = "shouldEndSession";

    /// Sub-conversation id reported by a recursive backend
    pub const CONVERSATION_ID: &str = "conversation_id";
}

/// Merge persisted and request context into a fresh working context.
///
/// Persisted attributes are filtered through `allow_list` and must be truthy
/// to be carried into the turn. Request attributes are taken as-is and win on
/// collision. Inputs are not modified.
pub fn assemble(
    record: &UserRecord,
    request_context: Option<&UserContext>,
    allow_list: &[String],
) -> UserContext {
    let mut working: UserContext = allow_list
        .iter()
        .filter_map(|key| {
            record
                .persisted_context
                .get(key)
                .filter(|v| is_truthy(v))
                .map(|v| (key.clone(), v.clone()))
        })
        .collect();

    if let Some(request) = request_context {
        working.overlay(request);
    }

    working
}

/// Apply a cached per-target snapshot on top of the working context.
///
/// The stay directive is always left cleared in the result so it cannot
/// outlive the turn that consumed it.
pub fn overlay_cached(working: &UserContext, cached: Option<&UserContext>) -> UserContext {
    let mut merged = working.clone();
    if let Some(cached) = cached {
        merged.overlay(cached);
    }
    if merged.contains_key(keys::KEEP_CONV) {
        merged.insert(keys::KEEP_CONV, serde_json::Value::Bool(false));
    }
    merged
}

/// Project a context onto the persisted allow-list.
///
/// Keys outside the allow-list and null values are dropped.
pub fn project_persisted(context: &UserContext, allow_list: &[String]) -> UserContext {
    allow_list
        .iter()
        .filter_map(|key| {
            context
                .get(key)
                .filter(|v| !v.is_null())
                .map(|v| (key.clone(), v.clone()))
        })
        .collect()
}
