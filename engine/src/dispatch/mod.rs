//! Dispatch coordination
//!
//! Sends the utterance to every eligible target at once and collects the
//! answers. Targets are the configured workspaces (keyed per user) plus every
//! tracked sub-conversation of the user, unless the working context asks to
//! stay with the last used target, in which case only that one is asked.
//!
//! Per target the coordinator reads the session cache, merges the cached
//! snapshot into the working context and calls the backend. A target that
//! fails either step is left out of the result. A tracked sub-conversation
//! without a cache entry has ended; it is pruned from the user record.

use crate::backend::DialogueBackend;
use crate::context::{keys, overlay_cached};
use crate::pipeline::Turn;
use crate::secrets::scrub;
use crate::session::SessionCache;
use futures::future::join_all;
use sdk::errors::RouterError;
use sdk::types::{DialogueOutput, DispatchTarget, UserContext, WorkspaceDescriptor};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Target as planned before its cache entry is read
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedTarget {
    /// Configured workspace, keyed per user
    Configured(DispatchTarget),
    /// Tracked sub-conversation; its workspace comes from the session entry
    Tracked(String),
}

impl PlannedTarget {
    /// Session cache key and origin id
    pub fn key(&self) -> &str {
        match self {
            PlannedTarget::Configured(target) => &target.id,
            PlannedTarget::Tracked(id) => id,
        }
    }
}

/// What happened to one target
#[derive(Debug)]
enum TargetOutcome {
    Answered(DialogueOutput),
    Ended(String),
    Failed,
}

/// Fans an utterance out to all targets and fans the answers back in
pub struct DispatchCoordinator {
    backend: Arc<dyn DialogueBackend>,
    cache: Arc<dyn SessionCache>,
}

/// Resolve the targets for this turn.
///
/// Consumes the stay directive: when it is set and the user has a last used
/// target, the directive is cleared in `context` and only that target is
/// returned.
pub fn plan_targets(
    user_id: &str,
    context: &mut UserContext,
    conversation_ids: &[String],
    last_used: Option<&str>,
    workspaces: &[WorkspaceDescriptor],
) -> Vec<PlannedTarget> {
    let configured = workspaces
        .iter()
        .map(|ws| DispatchTarget::for_workspace(user_id, ws));

    if context.is_set(keys::KEEP_CONV) {
        if let Some(last) = last_used {
            context.insert(keys::KEEP_CONV, Value::Bool(false));
            let planned = configured
                .clone()
                .find(|target| target.id == last)
                .map(PlannedTarget::Configured)
                .unwrap_or_else(|| PlannedTarget::Tracked(last.to_string()));
            return vec![planned];
        }
    }

    configured
        .map(PlannedTarget::Configured)
        .chain(conversation_ids.iter().cloned().map(PlannedTarget::Tracked))
        .collect()
}

impl DispatchCoordinator {
    pub fn new(backend: Arc<dyn DialogueBackend>, cache: Arc<dyn SessionCache>) -> Self {
        Self { backend, cache }
    }

    /// Ask every eligible target and return their outputs in dispatch order.
    ///
    /// Updates the turn: the stay directive is consumed, ended conversations
    /// are pruned and spawned conversations are tracked.
    ///
    /// # Errors
    /// `RouterError::NoViableOutput` when no target produced an output.
    pub async fn dispatch(
        &self,
        turn: &mut Turn,
        workspaces: &[WorkspaceDescriptor],
    ) -> Result<Vec<DialogueOutput>, RouterError> {
        let planned = plan_targets(
            &turn.record.id,
            &mut turn.context,
            &turn.record.conversation_ids,
            turn.record.last_conversation_id.as_deref(),
            workspaces,
        );

        info!(
            user_id = %turn.record.id,
            targets = planned.len(),
            "Dispatching utterance"
        );

        let context = &turn.context;
        let text = turn.text.as_str();
        let outcomes = join_all(
            planned
                .iter()
                .map(|target| self.ask_target(target, context, text)),
        )
        .await;

        let mut outputs = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                TargetOutcome::Answered(output) => {
                    if let Some(conv) = &output.spawned_conversation_id {
                        info!(conversation_id = %conv, "Tracking spawned conversation");
                        turn.record.track_conversation(conv.clone());
                    }
                    outputs.push(output);
                }
                TargetOutcome::Ended(key) => {
                    if turn.record.prune_conversation(&key) {
                        info!(conversation_id = %key, "Pruned inactive conversation");
                    }
                    if turn.record.last_conversation_id.as_deref() == Some(key.as_str()) {
                        turn.record.last_conversation_id = None;
                    }
                }
                TargetOutcome::Failed => {}
            }
        }

        if outputs.is_empty() {
            return Err(RouterError::NoViableOutput);
        }

        Ok(outputs)
    }

    async fn ask_target(
        &self,
        planned: &PlannedTarget,
        working: &UserContext,
        text: &str,
    ) -> TargetOutcome {
        let key = planned.key();
        let cached = match self.cache.read(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(target_id = %key, "Session cache read failed: {}", e);
                return TargetOutcome::Failed;
            }
        };

        let (target, cached_context) = match (planned, cached) {
            (PlannedTarget::Configured(target), entry) => {
                (target.clone(), entry.map(|e| e.context))
            }
            (PlannedTarget::Tracked(id), Some(entry)) => (
                DispatchTarget::for_conversation(id, &entry.workspace),
                Some(entry.context),
            ),
            (PlannedTarget::Tracked(id), None) => {
                debug!(target_id = %id, "No session entry for tracked conversation");
                return TargetOutcome::Ended(id.clone());
            }
        };

        let context = overlay_cached(working, cached_context.as_ref());

        let reply = match self
            .backend
            .send(&target.credential_ref, &target.workspace_id, &context, text)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                let err = e.for_target(&target.id);
                warn!(dynamic = target.is_dynamic, "{}", scrub(&err.to_string()));
                return TargetOutcome::Failed;
            }
        };

        debug!(
            target_id = %target.id,
            dynamic = target.is_dynamic,
            lines = reply.text.len(),
            "Backend answered"
        );

        let spawned = if target.recursive {
            reply.spawned_conversation_id()
        } else {
            None
        };

        TargetOutcome::Answered(DialogueOutput {
            intent_confidence: reply.top_intent_confidence(),
            entity_confidence: reply.top_entity_confidence(),
            origin_target_id: spawned.clone().unwrap_or_else(|| target.id.clone()),
            text: reply.text,
            intents: reply.intents,
            entities: reply.entities,
            updated_context: reply.context,
            origin: target.descriptor(),
            spawned_conversation_id: spawned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ws(name: &str) -> WorkspaceDescriptor {
        WorkspaceDescriptor {
            name: name.to_string(),
            workspace_id: format!("{}-id", name),
            credential_ref: "main".to_string(),
            recursive: false,
        }
    }

    #[test]
    fn test_plan_includes_workspaces_then_conversations() {
        let mut ctx = UserContext::new();
        let convs = vec!["conv-1".to_string(), "conv-1".to_string()];

        let plan = plan_targets("u1", &mut ctx, &convs, None, &[ws("a"), ws("b")]);

        let keys: Vec<&str> = plan.iter().map(|t| t.key()).collect();
        assert_eq!(keys, vec!["u1:a", "u1:b", "conv-1", "conv-1"]);
        assert!(matches!(&plan[0], PlannedTarget::Configured(t) if !t.is_dynamic));
        assert_eq!(plan[2], PlannedTarget::Tracked("conv-1".to_string()));
    }

    #[test]
    fn test_keep_conv_restricts_to_last_target_once() {
        let mut ctx = UserContext::new().with(keys::KEEP_CONV, json!(true));
        let convs = vec!["conv-1".to_string()];

        let plan = plan_targets("u1", &mut ctx, &convs, Some("u1:b"), &[ws("a"), ws("b")]);

        assert_eq!(plan.len(), 1);
        assert_eq!(
            plan[0],
            PlannedTarget::Configured(DispatchTarget::for_workspace("u1", &ws("b")))
        );
        assert_eq!(ctx.get(keys::KEEP_CONV), Some(&json!(false)));
    }

    #[test]
    fn test_keep_conv_without_last_target_is_ignored() {
        let mut ctx = UserContext::new().with(keys::KEEP_CONV, json!(true));

        let plan = plan_targets("u1", &mut ctx, &[], None, &[ws("a")]);

        assert_eq!(plan.len(), 1);
        assert_eq!(ctx.get(keys::KEEP_CONV), Some(&json!(true)));
    }

    #[test]
    fn test_keep_conv_on_conversation_has_no_workspace() {
        let mut ctx = UserContext::new().with(keys::KEEP_CONV, json!("yes"));

        let plan = plan_targets("u1", &mut ctx, &[], Some("conv-9"), &[ws("a")]);

        assert_eq!(plan[0], PlannedTarget::Tracked("conv-9".to_string()));
    }
}
