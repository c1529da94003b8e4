//! Conversation turn pipeline
//!
//! One inbound request is one turn:
//!
//! ```text
//! Unauthenticated -> ContextLoaded -> Dispatched -> Arbitrated
//!     -> ActionResolved -> Responded -> Persisted -> Done
//! ```
//!
//! Authentication and validation failures end the turn with 401 and 400.
//! Anything that goes wrong later ends in `Error`, which still produces a
//! 200 response carrying whatever the turn could salvage.
//!
//! The durable record is written once, at the very end, so a caller that
//! drops the request midway leaves the store untouched. A degraded turn still
//! writes it so pruned conversations and a consumed stay directive stick.

use crate::action::ActionTrigger;
use crate::arbiter::Arbiter;
use crate::backend::DialogueBackend;
use crate::config::Config;
use crate::context::{assemble, keys, project_persisted};
use crate::db::{StoreError, UserStore};
use crate::dispatch::DispatchCoordinator;
use crate::secrets::SecretString;
use crate::session::SessionCache;
use sdk::errors::{RouterError, RouterErrorExt};
use sdk::types::{
    ConverseRequest, ConverseResponse, DialogueOutput, SessionCacheEntry, UserContext, UserRecord,
    WorkspaceDescriptor,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};

/// Lookup view used when the request names none
pub const DEFAULT_FILTER: &str = "by_id";

/// Stages a turn goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Unauthenticated,
    ContextLoaded,
    Dispatched,
    Arbitrated,
    ActionResolved,
    Responded,
    Persisted,
    Done,
    Unauthorized,
    BadRequest,
    Error,
}

/// Response plus the stages visited to produce it
#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    pub response: ConverseResponse,
    pub states: Vec<TurnState>,
}

impl TurnReport {
    pub fn final_state(&self) -> Option<TurnState> {
        self.states.last().copied()
    }
}

/// Request-scoped state of one turn
#[derive(Debug, Clone)]
pub struct Turn {
    /// User record as loaded, mutated in place until the final save
    pub record: UserRecord,

    /// Revision captured at load, reported back to the caller
    pub loaded_revision: String,

    /// Working context
    pub context: UserContext,

    /// Utterance
    pub text: String,
}

/// Static inputs of the pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Shared token; every request is rejected when unset
    pub token: Option<SecretString>,
    pub workspaces: Vec<WorkspaceDescriptor>,
    pub persisted_attributes: Vec<String>,
    pub fallback_reply: Vec<String>,
    pub session_ttl: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &Config, token: Option<SecretString>) -> Self {
        Self {
            token,
            workspaces: config.workspace_descriptors(),
            persisted_attributes: config.context.persisted_attributes.clone(),
            fallback_reply: config.context.fallback_reply.clone(),
            session_ttl: Duration::from_secs(config.session.ttl_secs),
        }
    }
}

/// Turn orchestrator
pub struct Pipeline {
    settings: PipelineSettings,
    store: Arc<dyn UserStore>,
    cache: Arc<dyn SessionCache>,
    coordinator: DispatchCoordinator,
    arbiter: Arbiter,
    action: ActionTrigger,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        store: Arc<dyn UserStore>,
        cache: Arc<dyn SessionCache>,
        backend: Arc<dyn DialogueBackend>,
        arbiter: Arbiter,
        action: ActionTrigger,
    ) -> Self {
        Self {
            coordinator: DispatchCoordinator::new(backend, cache.clone()),
            settings,
            store,
            cache,
            arbiter,
            action,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run one turn and return only the response
    pub async fn handle(&self, request: ConverseRequest) -> ConverseResponse {
        self.run_turn(request).await.response
    }

    /// Run one turn
    pub async fn run_turn(&self, request: ConverseRequest) -> TurnReport {
        let span = info_span!("turn", user_id = tracing::field::Empty);
        self.run_turn_inner(request).instrument(span).await
    }

    fn authorized(&self, presented: Option<&str>) -> bool {
        match (&self.settings.token, presented) {
            (Some(expected), Some(presented)) => expected.unsecure() == presented,
            _ => false,
        }
    }

    async fn run_turn_inner(&self, request: ConverseRequest) -> TurnReport {
        let mut states = vec![TurnState::Unauthenticated];

        if !self.authorized(request.token.as_deref()) {
            return Self::reject(states, RouterError::Unauthorized);
        }

        // Whitespace is a valid utterance, only absent or empty text is rejected
        let text = match request.text {
            Some(text) if !text.is_empty() => text,
            _ => return Self::reject(states, RouterError::BadRequest("text is required".into())),
        };
        if self.settings.workspaces.is_empty() {
            return Self::reject(
                states,
                RouterError::BadRequest("no workspace configured".into()),
            );
        }

        let filter = request.filter.as_deref().unwrap_or(DEFAULT_FILTER);
        let value = request.value.as_deref().unwrap_or_default();

        let record = match self.store.load(filter, value).await {
            Ok(record) => record,
            Err(StoreError::InvalidFilter(f)) => {
                return Self::reject(
                    states,
                    RouterError::BadRequest(format!("invalid filter '{}'", f)),
                )
            }
            Err(e) => {
                let err = RouterError::from(e);
                error!("Failed to load user: {} ({})", err, err.user_hint());
                states.push(TurnState::Error);
                return TurnReport {
                    response: self.fallback_response(request.context.unwrap_or_default(), "", ""),
                    states,
                };
            }
        };
        tracing::Span::current().record("user_id", record.id.as_str());
        states.push(TurnState::ContextLoaded);

        let context = assemble(
            &record,
            request.context.as_ref(),
            &self.settings.persisted_attributes,
        );
        let mut turn = Turn {
            loaded_revision: record.revision.clone(),
            record,
            context,
            text,
        };

        let outputs = match self
            .coordinator
            .dispatch(&mut turn, &self.settings.workspaces)
            .await
        {
            Ok(outputs) => outputs,
            Err(e) => return self.degrade(turn, states, e).await,
        };
        states.push(TurnState::Dispatched);

        let winner = match self
            .arbiter
            .arbitrate(outputs, turn.record.last_conversation_id.as_deref())
        {
            Ok(winner) => winner,
            Err(e) => return self.degrade(turn, states, e).await,
        };
        info!(origin = %winner.origin_target_id, "Selected output");
        turn.record.last_conversation_id = Some(winner.origin_target_id.clone());
        if !winner.updated_context.is_empty() {
            turn.context = winner.updated_context.clone();
        }
        states.push(TurnState::Arbitrated);

        let mut reply = winner.text.clone();
        let outcome = self
            .action
            .resolve(
                &mut turn.context,
                &winner,
                &turn.record.id,
                &turn.loaded_revision,
            )
            .await;
        reply.extend(outcome.supplemental);
        self.update_session(&turn, &winner).await;
        states.push(TurnState::ActionResolved);

        let response = ConverseResponse {
            status_code: 200,
            version: sdk::types::RESPONSE_VERSION.to_string(),
            context: turn.context.clone(),
            user_id: turn.record.id.clone(),
            user_rev: turn.loaded_revision.clone(),
            response: reply,
        };
        states.push(TurnState::Responded);

        turn.record.persisted_context =
            project_persisted(&turn.context, &self.settings.persisted_attributes);
        match self.store.save(&turn.record).await {
            Ok(revision) => {
                info!(revision = %revision, "Persisted user context");
                states.push(TurnState::Persisted);
            }
            Err(e) => {
                let err = RouterError::from(e);
                warn!("User context not persisted: {} ({})", err, err.user_hint());
            }
        }

        states.push(TurnState::Done);
        TurnReport { response, states }
    }

    /// Write (or drop) the winner's session entry
    async fn update_session(&self, turn: &Turn, winner: &DialogueOutput) {
        let key = winner.origin_target_id.as_str();

        if turn.context.is_set(keys::SHOULD_END_SESSION) {
            info!(target_id = %key, "Backend ended the session");
            if let Err(e) = self.cache.delete(key).await {
                warn!("Failed to clear session entry: {}", e);
            }
            return;
        }

        let mut workspace = winner.origin.clone();
        workspace.recursive = false;
        let mut context = turn.context.clone();
        context.remove(keys::ACTION);

        let entry = SessionCacheEntry { workspace, context };
        if let Err(e) = self
            .cache
            .write(key, &entry, self.settings.session_ttl)
            .await
        {
            warn!("Failed to write session entry: {}", e);
        }
    }

    /// End the turn before any state is touched
    fn reject(mut states: Vec<TurnState>, err: RouterError) -> TurnReport {
        warn!("Rejected request: {}", err);
        states.push(match err {
            RouterError::Unauthorized => TurnState::Unauthorized,
            _ => TurnState::BadRequest,
        });
        TurnReport {
            response: ConverseResponse::rejected(&err),
            states,
        }
    }

    fn fallback_response(
        &self,
        context: UserContext,
        user_id: &str,
        user_rev: &str,
    ) -> ConverseResponse {
        ConverseResponse {
            status_code: 200,
            version: sdk::types::RESPONSE_VERSION.to_string(),
            context,
            user_id: user_id.to_string(),
            user_rev: user_rev.to_string(),
            response: self.settings.fallback_reply.clone(),
        }
    }

    /// Best-effort answer for a turn that failed after loading the user.
    ///
    /// Conversation bookkeeping done during dispatch (pruned conversations,
    /// a consumed stay directive) is still saved.
    async fn degrade(
        &self,
        mut turn: Turn,
        mut states: Vec<TurnState>,
        err: RouterError,
    ) -> TurnReport {
        if err.is_recoverable() {
            warn!("Turn degraded: {} ({})", err, err.user_hint());
        } else {
            error!("Turn degraded: {} ({})", err, err.user_hint());
        }

        turn.record.persisted_context =
            project_persisted(&turn.context, &self.settings.persisted_attributes);
        match self.store.save(&turn.record).await {
            Ok(revision) => info!(revision = %revision, "Persisted conversation bookkeeping"),
            Err(e) => {
                let err = RouterError::from(e);
                warn!("User context not persisted: {} ({})", err, err.user_hint());
            }
        }

        states.push(TurnState::Error);
        TurnReport {
            response: self.fallback_response(turn.context, &turn.record.id, &turn.loaded_revision),
            states,
        }
    }
}
