use super::{BackendError, BackendReply, DialogueBackend};
use crate::secrets::{scrub, BackendCredential, CredentialCache};
use async_trait::async_trait;
use sdk::types::{Entity, Intent, UserContext};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// HTTP dialogue backend.
///
/// `POST {url}/workspaces/{workspace_id}/message` with basic auth, where `url`
/// comes from the credential when it carries one and from the configured
/// base URL otherwise.
pub struct HttpDialogueBackend {
    base_url: String,
    credentials: Arc<CredentialCache>,
    client: reqwest::Client,
}

#[derive(Debug, Default, Deserialize)]
struct WireOutput {
    #[serde(default)]
    text: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireReply {
    #[serde(default)]
    output: WireOutput,
    #[serde(default)]
    intents: Vec<Intent>,
    #[serde(default)]
    entities: Vec<Entity>,
    #[serde(default)]
    context: UserContext,
}

impl HttpDialogueBackend {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        credentials: Arc<CredentialCache>,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::NetworkError(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into(),
            credentials,
            client,
        })
    }

    fn credential(&self, credential_ref: &str) -> super::Result<BackendCredential> {
        let raw = self
            .credentials
            .get_secret(credential_ref)
            .map_err(|e| BackendError::Credential(e.to_string()))?;
        BackendCredential::parse(&raw).map_err(|e| BackendError::Credential(e.to_string()))
    }
}

#[async_trait]
impl DialogueBackend for HttpDialogueBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn check_health(&self, credential_ref: &str) -> bool {
        self.credential(credential_ref).is_ok()
    }

    async fn send(
        &self,
        credential_ref: &str,
        workspace_id: &str,
        context: &UserContext,
        text: &str,
    ) -> super::Result<BackendReply> {
        let credential = self.credential(credential_ref)?;
        let base = credential.url.as_deref().unwrap_or(&self.base_url);
        let url = format!(
            "{}/workspaces/{}/message",
            base.trim_end_matches('/'),
            workspace_id
        );

        let payload = json!({
            "input": { "text": text },
            "context": context,
        });

        let response = self
            .client
            .post(&url)
            .basic_auth(&credential.username, Some(credential.password.unsecure()))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout
                } else {
                    BackendError::NetworkError(scrub(&e.to_string()))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = scrub(&response.text().await.unwrap_or_default());

            return Err(match status.as_u16() {
                401 | 403 => BackendError::AuthenticationFailed(body),
                400..=499 => BackendError::InvalidRequest(format!("{}: {}", status, body)),
                _ => BackendError::Unavailable(format!("{}: {}", status, body)),
            });
        }

        let wire: WireReply = response
            .json()
            .await
            .map_err(|e| BackendError::ParseError(e.to_string()))?;

        Ok(BackendReply {
            text: wire.output.text,
            intents: wire.intents,
            entities: wire.entities,
            context: wire.context,
        })
    }
}
