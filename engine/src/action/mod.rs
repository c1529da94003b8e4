//! One-shot actions
//!
//! A backend can ask for a side effect by putting an `action` directive in
//! the context it returns. The directive names an endpoint under the
//! configured action base URL. The call is best effort: its reply lines are
//! appended to the answer on success, and a failure only costs those lines.
//! The directive is removed from the context whatever happens, so it never
//! reaches the session cache or the durable store.

use crate::context::keys;
use crate::secrets::{scrub, SecretString};
use sdk::errors::RouterError;
use sdk::types::{is_truthy, DialogueOutput, UserContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

/// Body posted to the action capability
#[derive(Debug, Serialize)]
struct ActionRequest<'a> {
    token: &'a str,
    context: &'a UserContext,
    intents: &'a [sdk::types::Intent],
    entities: &'a [sdk::types::Entity],
    user_id: &'a str,
    user_rev: &'a str,
}

/// Reply of the action capability
#[derive(Debug, Default, Deserialize)]
struct ActionReply {
    #[serde(default)]
    response: Option<Vec<String>>,
}

/// Outcome of the action step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutcome {
    /// Directive found in the context, if any
    pub directive: Option<String>,

    /// Extra reply lines returned by the action
    pub supplemental: Vec<String>,
}

/// Calls the action capability for directives found in the context
pub struct ActionTrigger {
    base_url: Option<String>,
    token: Option<SecretString>,
    client: reqwest::Client,
}

/// Directive named by the context, when truthy
pub fn directive_of(context: &UserContext) -> Option<String> {
    let value = context.get(keys::ACTION).filter(|v| is_truthy(v))?;
    Some(match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

impl ActionTrigger {
    pub fn new(
        base_url: Option<String>,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, RouterError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RouterError::Network(e.to_string()))?;

        Ok(Self {
            base_url,
            token,
            client,
        })
    }

    /// Run the directive in `context`, if any, and strip it.
    pub async fn resolve(
        &self,
        context: &mut UserContext,
        winner: &DialogueOutput,
        user_id: &str,
        user_rev: &str,
    ) -> ActionOutcome {
        let directive = directive_of(context);

        let supplemental = match (&directive, &self.base_url) {
            (None, _) => Vec::new(),
            (Some(directive), None) => {
                warn!(directive = %directive, "No action base URL configured, skipping action");
                Vec::new()
            }
            (Some(directive), Some(base_url)) => {
                match self
                    .call(base_url, directive, context, winner, user_id, user_rev)
                    .await
                {
                    Ok(lines) => {
                        info!(directive = %directive, lines = lines.len(), "Action succeeded");
                        lines
                    }
                    Err(e) => {
                        warn!(directive = %directive, "{}", scrub(&e.to_string()));
                        Vec::new()
                    }
                }
            }
        };

        context.remove(keys::ACTION);

        ActionOutcome {
            directive,
            supplemental,
        }
    }

    async fn call(
        &self,
        base_url: &str,
        directive: &str,
        context: &UserContext,
        winner: &DialogueOutput,
        user_id: &str,
        user_rev: &str,
    ) -> Result<Vec<String>, RouterError> {
        let url = format!("{}{}", base_url, directive);
        let body = ActionRequest {
            token: self.token.as_ref().map(|t| t.unsecure()).unwrap_or_default(),
            context,
            intents: &winner.intents,
            entities: &winner.entities,
            user_id,
            user_rev,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RouterError::ActionCall(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RouterError::ActionCall(format!(
                "{} returned {}",
                directive, status
            )));
        }

        // A 2xx without a parsable body still counts as success
        let reply: ActionReply = response.json().await.unwrap_or_default();
        Ok(reply.response.unwrap_or_default())
    }
}
