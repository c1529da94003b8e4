//! Channel adaptor
//!
//! Bridges a messaging platform to the turn pipeline. The platform posts an
//! event per user message; the adaptor turns it into a converse request, runs
//! the turn and posts every reply line back to the conversation, one at a
//! time and in order. Lines that look like image URLs are sent as image
//! attachments.
//!
//! Events must carry the configured verification secret in
//! [`CHANNEL_SECRET_HEADER`]. Replies only ever go to the configured service
//! URL; nothing in the event decides where the bearer credential is sent.

use crate::config::ChannelConfig;
use crate::pipeline::Pipeline;
use crate::secrets::{scrub, SecretString};
use async_trait::async_trait;
use regex::Regex;
use sdk::types::{ConverseRequest, UserContext};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Header carrying the channel verification secret
pub const CHANNEL_SECRET_HEADER: &str = "x-switchboard-channel-secret";

/// Channel adaptor errors
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Invalid channel event: {0}")]
    InvalidEvent(String),

    #[error("Failed to obtain bearer credential: {0}")]
    Token(String),

    #[error("Failed to deliver reply: {0}")]
    Delivery(String),

    #[error("Invalid service URL: {0}")]
    ServiceUrl(String),
}

/// Platform account reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Platform conversation reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConversation {
    pub id: String,
}

/// Event posted by the platform
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub from: Option<ChannelAccount>,
    #[serde(default)]
    pub recipient: Option<ChannelAccount>,
    #[serde(default)]
    pub conversation: Option<ChannelConversation>,
}

/// Validated message event
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub text: String,
    pub from: ChannelAccount,
    pub recipient: Option<ChannelAccount>,
    pub conversation: ChannelConversation,
}

/// What the adaptor does with an event
#[derive(Debug, Clone)]
pub enum EventDisposition {
    /// Bot was added to a conversation
    Acknowledge,
    Message(InboundMessage),
}

impl ChannelEvent {
    pub fn classify(self) -> Result<EventDisposition, ChannelError> {
        match self.kind.as_str() {
            "add" => return Ok(EventDisposition::Acknowledge),
            "message" => {}
            other => {
                return Err(ChannelError::InvalidEvent(format!(
                    "unsupported event type '{}'",
                    other
                )))
            }
        }

        let missing = |field: &str| ChannelError::InvalidEvent(format!("missing {}", field));

        Ok(EventDisposition::Message(InboundMessage {
            text: self
                .text
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| missing("text"))?,
            from: self.from.ok_or_else(|| missing("from"))?,
            recipient: self.recipient,
            conversation: self.conversation.ok_or_else(|| missing("conversation"))?,
        }))
    }
}

/// One reply line, rendered for the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyItem {
    Text(String),
    Image { url: String, content_type: String },
}

impl ReplyItem {
    /// Image URLs become attachments, everything else is sent as text.
    pub fn classify(line: &str) -> Self {
        static IMAGE_URL: OnceLock<Regex> = OnceLock::new();
        let image_url = IMAGE_URL.get_or_init(|| {
            Regex::new(r"(?i)^https?://\S+\.(png|jpe?g|gif|webp)$").expect("Invalid image pattern")
        });

        match image_url.captures(line.trim()) {
            Some(caps) => ReplyItem::Image {
                url: line.trim().to_string(),
                content_type: format!("image/{}", caps[1].to_ascii_lowercase()),
            },
            None => ReplyItem::Text(line.to_string()),
        }
    }
}

/// Destination of reply items
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send(&self, item: &ReplyItem) -> Result<(), ChannelError>;
}

/// Result of a delivery run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeliveryReport {
    pub delivered: usize,

    /// Indexes of items that could not be sent
    pub failed: Vec<usize>,
}

/// Send items one after the other, carrying on past failures.
pub async fn deliver(sink: &dyn ReplySink, items: &[ReplyItem]) -> DeliveryReport {
    let mut report = DeliveryReport::default();

    for (index, item) in items.iter().enumerate() {
        match sink.send(item).await {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!(index, "{}", scrub(&e.to_string()));
                report.failed.push(index);
            }
        }
    }

    report
}

/// Activities endpoint of a conversation under the platform service URL.
///
/// The conversation id is appended as a single encoded path segment.
pub fn reply_url(service_url: &str, conversation_id: &str) -> Result<reqwest::Url, ChannelError> {
    let mut url = reqwest::Url::parse(service_url)
        .map_err(|e| ChannelError::ServiceUrl(format!("{}: {}", service_url, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ChannelError::ServiceUrl(format!(
            "{}: unsupported scheme",
            service_url
        )));
    }

    url.path_segments_mut()
        .map_err(|_| ChannelError::ServiceUrl(format!("{}: cannot be a base", service_url)))?
        .pop_if_empty()
        .extend(["v3", "conversations", conversation_id, "activities"]);
    Ok(url)
}

/// Posts replies to the platform conversation
pub struct HttpReplySink {
    client: reqwest::Client,
    reply_url: reqwest::Url,
    bearer: Option<SecretString>,
    from: Option<ChannelAccount>,
    recipient: ChannelAccount,
    conversation: ChannelConversation,
}

impl HttpReplySink {
    pub fn new(
        client: reqwest::Client,
        reply_url: reqwest::Url,
        message: &InboundMessage,
        bearer: Option<SecretString>,
    ) -> Self {
        Self {
            client,
            reply_url,
            bearer,
            // Replies travel the other way
            from: message.recipient.clone(),
            recipient: message.from.clone(),
            conversation: message.conversation.clone(),
        }
    }

    fn payload(&self, item: &ReplyItem) -> serde_json::Value {
        let mut body = json!({
            "type": "message",
            "recipient": self.recipient,
            "conversation": self.conversation,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let Some(from) = &self.from {
            body["from"] = json!(from);
        }
        match item {
            ReplyItem::Text(text) => body["text"] = json!(text),
            ReplyItem::Image { url, content_type } => {
                body["attachments"] = json!([{
                    "contentType": content_type,
                    "contentUrl": url,
                }])
            }
        }
        body
    }
}

#[async_trait]
impl ReplySink for HttpReplySink {
    async fn send(&self, item: &ReplyItem) -> Result<(), ChannelError> {
        let mut request = self.client.post(self.reply_url.clone()).json(&self.payload(item));
        if let Some(bearer) = &self.bearer {
            request = request.bearer_auth(bearer.unsecure());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChannelError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChannelError::Delivery(format!(
                "reply endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TokenReply {
    access_token: Option<String>,
}

/// OAuth client-credentials token source for reply calls.
///
/// With a zero lifetime every call fetches a fresh token.
pub struct BearerTokenCache {
    client: reqwest::Client,
    token_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<SecretString>,
    scope: Option<String>,
    lifetime: Duration,
    cached: Mutex<Option<(SecretString, Instant)>>,
}

impl BearerTokenCache {
    pub fn new(
        client: reqwest::Client,
        config: &ChannelConfig,
        client_secret: Option<SecretString>,
    ) -> Self {
        Self {
            client,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret,
            scope: config.scope.clone(),
            lifetime: Duration::from_secs(config.credential_cache_secs),
            cached: Mutex::new(None),
        }
    }

    /// Current bearer credential, `None` when no token endpoint is configured
    pub async fn bearer(&self) -> Result<Option<SecretString>, ChannelError> {
        let Some(token_url) = &self.token_url else {
            return Ok(None);
        };

        let mut cached = self.cached.lock().await;
        if let Some((token, fetched_at)) = cached.as_ref() {
            if fetched_at.elapsed() < self.lifetime {
                return Ok(Some(token.clone()));
            }
        }

        let mut form = vec![("grant_type", "client_credentials".to_string())];
        if let Some(id) = &self.client_id {
            form.push(("client_id", id.clone()));
        }
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.unsecure().to_string()));
        }
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.clone()));
        }

        let response = self
            .client
            .post(token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ChannelError::Token(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChannelError::Token(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let reply: TokenReply = response
            .json()
            .await
            .map_err(|e| ChannelError::Token(e.to_string()))?;
        let token = SecretString::new(
            reply
                .access_token
                .ok_or_else(|| ChannelError::Token("no access_token in reply".to_string()))?,
        );
        debug!("Fetched bearer credential");

        if !self.lifetime.is_zero() {
            *cached = Some((token.clone(), Instant::now()));
        }
        Ok(Some(token))
    }
}

/// Answer to a channel event
#[derive(Debug, Clone, Serialize)]
pub struct ChannelAck {
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryReport>,
}

impl ChannelAck {
    fn status(status_code: u16) -> Self {
        Self {
            status_code,
            delivery: None,
        }
    }

    /// Turn ran but none of its `lines` could be sent
    fn undelivered(lines: usize) -> Self {
        Self {
            status_code: 200,
            delivery: Some(DeliveryReport {
                delivered: 0,
                failed: (0..lines).collect(),
            }),
        }
    }
}

/// Runs channel events through the pipeline
pub struct ChannelAdaptor {
    pipeline: Arc<Pipeline>,
    tokens: BearerTokenCache,
    client: reqwest::Client,
    service_url: String,
    lookup_attribute: String,
    /// Every event is rejected when unset
    verification_secret: Option<SecretString>,
}

impl ChannelAdaptor {
    pub fn new(
        pipeline: Arc<Pipeline>,
        tokens: BearerTokenCache,
        client: reqwest::Client,
        config: &ChannelConfig,
        verification_secret: Option<SecretString>,
    ) -> Result<Self, ChannelError> {
        let service_url = config
            .service_url
            .clone()
            .ok_or_else(|| ChannelError::ServiceUrl("channel.service_url is not set".to_string()))?;
        // Fail at startup rather than on the first reply
        reply_url(&service_url, "startup")?;

        Ok(Self {
            pipeline,
            tokens,
            client,
            service_url,
            lookup_attribute: config.lookup_attribute.clone(),
            verification_secret,
        })
    }

    /// Whether `presented` matches the configured verification secret
    pub fn verify(&self, presented: Option<&str>) -> bool {
        match (&self.verification_secret, presented) {
            (Some(expected), Some(presented)) => expected.unsecure() == presented,
            _ => false,
        }
    }

    /// Converse request for an inbound message
    pub fn to_request(&self, message: &InboundMessage) -> ConverseRequest {
        let mut context = UserContext::new()
            .with(self.lookup_attribute.as_str(), json!(message.from.id))
            .with("channel_conversation", json!(message.conversation.id));
        if let Some(name) = &message.from.name {
            context.insert("username", json!(name));
        }

        ConverseRequest {
            token: self
                .pipeline
                .settings()
                .token
                .as_ref()
                .map(|t| t.unsecure().to_string()),
            filter: Some(format!("by_{}", self.lookup_attribute)),
            value: Some(message.from.id.clone()),
            context: Some(context),
            text: Some(message.text.clone()),
        }
    }

    /// Handle one platform event; `presented_secret` comes from [`CHANNEL_SECRET_HEADER`].
    pub async fn handle_event(
        &self,
        presented_secret: Option<&str>,
        event: ChannelEvent,
    ) -> ChannelAck {
        if !self.verify(presented_secret) {
            warn!("Rejected channel event with missing or invalid verification secret");
            return ChannelAck::status(401);
        }

        let message = match event.classify() {
            Ok(EventDisposition::Acknowledge) => return ChannelAck::status(200),
            Ok(EventDisposition::Message(message)) => message,
            Err(e) => {
                warn!("{}", e);
                return ChannelAck::status(400);
            }
        };

        let response = self.pipeline.handle(self.to_request(&message)).await;
        if response.status_code != 200 {
            return ChannelAck::status(response.status_code);
        }

        let items: Vec<ReplyItem> = response
            .response
            .iter()
            .map(|line| ReplyItem::classify(line))
            .collect();

        let bearer = match self.tokens.bearer().await {
            Ok(bearer) => bearer,
            Err(e) => {
                warn!("{}", scrub(&e.to_string()));
                return ChannelAck::undelivered(items.len());
            }
        };

        let url = match reply_url(&self.service_url, &message.conversation.id) {
            Ok(url) => url,
            Err(e) => {
                warn!("{}", e);
                return ChannelAck::undelivered(items.len());
            }
        };

        let sink = HttpReplySink::new(self.client.clone(), url, &message, bearer);
        let report = deliver(&sink, &items).await;
        info!(
            delivered = report.delivered,
            failed = report.failed.len(),
            "Delivered channel replies"
        );

        ChannelAck {
            status_code: 200,
            delivery: Some(report),
        }
    }
}
