//! Command handlers
//!
//! Wires configuration into the runtime services and implements the
//! `serve`, `ask` and `check` commands.

use crate::action::ActionTrigger;
use crate::arbiter::Arbiter;
use crate::backend::{DialogueBackend, HttpDialogueBackend};
use crate::channel::{BearerTokenCache, ChannelAdaptor};
use crate::config::{Config, SessionBackend};
use crate::db::{Database, UserStore};
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::secrets::{CredentialCache, CredentialStore, SecretString};
use crate::server::{self, AppState};
use crate::session::{MemorySessionCache, RedisSessionCache, SessionCache};
use anyhow::{Context, Result};
use sdk::types::{ConverseRequest, UserContext};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Keychain service name for credentials
pub const CREDENTIAL_SERVICE: &str = "switchboard";

/// Prefix of session cache keys in Redis
const REDIS_KEY_PREFIX: &str = "switchboard";

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Runtime services built from configuration
pub struct Services {
    pub pipeline: Arc<Pipeline>,
    pub channel: Option<Arc<ChannelAdaptor>>,
    pub backend: Arc<HttpDialogueBackend>,
    pub cache: Arc<dyn SessionCache>,
    pub database: Database,
}

fn resolve_token(config: &Config, credentials: &CredentialCache) -> Option<SecretString> {
    if let Some(token) = &config.server.token {
        return Some(SecretString::new(token.clone()));
    }
    match credentials.get_secret(&config.server.token_ref) {
        Ok(token) => Some(token),
        Err(e) => {
            tracing::warn!("No shared token available, every request will be rejected: {}", e);
            None
        }
    }
}

/// Build every service the router needs
pub async fn build_services(config: &Config) -> Result<Services> {
    let credentials = Arc::new(CredentialCache::new(Arc::new(CredentialStore::new(
        CREDENTIAL_SERVICE,
    ))));
    let token = resolve_token(config, &credentials);

    let refs: Vec<&str> = config
        .workspaces
        .iter()
        .map(|ws| ws.credential_ref.as_str())
        .collect();
    if let Err(e) = credentials.preload(&refs) {
        tracing::warn!("Workspace credentials incomplete, affected targets will be skipped: {}", e);
    }

    let database = Database::new(&config.db_path())
        .await
        .context("Failed to open user store")?;
    let store: Arc<dyn UserStore> = Arc::new(database.users());

    let cache: Arc<dyn SessionCache> = match config.session.backend {
        SessionBackend::Memory => Arc::new(MemorySessionCache::new()),
        SessionBackend::Redis => Arc::new(
            RedisSessionCache::new(&config.session.redis_url, REDIS_KEY_PREFIX)
                .context("Invalid redis_url")?,
        ),
    };

    let backend = Arc::new(HttpDialogueBackend::new(
        config.backend.base_url.clone(),
        Duration::from_secs(config.backend.timeout_secs),
        credentials.clone(),
    )?);

    let action = ActionTrigger::new(
        config.action.base_url.clone(),
        token.clone(),
        Duration::from_secs(config.action.timeout_secs),
    )?;

    let pipeline = Arc::new(Pipeline::new(
        PipelineSettings::from_config(config, token),
        store,
        cache.clone(),
        backend.clone(),
        Arbiter::from(&config.arbiter),
        action,
    ));

    let channel = match &config.channel.service_url {
        Some(_) => {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(config.backend.timeout_secs))
                .build()
                .context("Failed to build channel HTTP client")?;
            let secret = credentials
                .get_secret(&config.channel.client_secret_ref)
                .map_err(|e| tracing::warn!("Channel client secret unavailable: {}", e))
                .ok();
            let verification = credentials
                .get_secret(&config.channel.verification_secret_ref)
                .map_err(|e| {
                    tracing::warn!(
                        "Channel verification secret unavailable, every event will be rejected: {}",
                        e
                    )
                })
                .ok();
            let tokens = BearerTokenCache::new(client.clone(), &config.channel, secret);
            Some(Arc::new(
                ChannelAdaptor::new(pipeline.clone(), tokens, client, &config.channel, verification)
                    .context("Invalid channel configuration")?,
            ))
        }
        None => None,
    };

    Ok(Services {
        pipeline,
        channel,
        backend,
        cache,
        database,
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Serve the HTTP API until interrupted
pub async fn handle_serve(config: &Config, bind: Option<String>) -> Result<()> {
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid listen address '{}'", bind))?;

    let services = build_services(config).await?;
    let state = AppState {
        pipeline: services.pipeline.clone(),
        channel: services.channel.clone(),
    };

    server::serve(addr, state, shutdown_signal()).await?;

    services.database.close().await?;
    Ok(())
}

/// Run a single turn through the pipeline
pub async fn handle_ask(
    config: &Config,
    text: String,
    filter: Option<String>,
    value: Option<String>,
    context: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let context: Option<UserContext> = context
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .context("--context must be a JSON object")?;

    let services = build_services(config).await?;
    let token = services
        .pipeline
        .settings()
        .token
        .as_ref()
        .map(|t| t.unsecure().to_string());

    let report = services
        .pipeline
        .run_turn(ConverseRequest {
            token,
            filter,
            value,
            context,
            text: Some(text),
        })
        .await;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            for line in &report.response.response {
                println!("{}", line);
            }
            println!();
            println!(
                "status {} | user {} | revision {}",
                report.response.status_code, report.response.user_id, report.response.user_rev
            );
        }
    }

    services.database.close().await?;
    Ok(())
}

/// Validate configuration and check every dependency
pub async fn handle_check(config: &Config, format: OutputFormat) -> Result<()> {
    let mut checks: Vec<(String, String)> = Vec::new();
    let mut issues: Vec<String> = Vec::new();

    // Config is already validated when loaded
    checks.push(("Configuration".to_string(), "Valid".to_string()));

    if config.workspaces.is_empty() {
        issues.push("No [[workspaces]] configured, every request will be rejected".to_string());
    }

    let services = build_services(config).await?;

    if services.pipeline.settings().token.is_some() {
        checks.push(("Shared token".to_string(), "Available".to_string()));
    } else {
        checks.push(("Shared token".to_string(), "Missing".to_string()));
        issues.push(format!(
            "Set server.token or store '{}' in the keychain",
            config.server.token_ref
        ));
    }

    for ws in &config.workspaces {
        let label = format!("Workspace {}", ws.name);
        if services.backend.check_health(&ws.credential_ref).await {
            checks.push((label, "Credential OK".to_string()));
        } else {
            checks.push((label, "Credential missing".to_string()));
            issues.push(format!(
                "Credential '{}' for workspace '{}' cannot be resolved (set {})",
                ws.credential_ref,
                ws.name,
                CredentialStore::env_var_name(&ws.credential_ref)
            ));
        }
    }

    match services.cache.read("switchboard:check").await {
        Ok(_) => checks.push(("Session cache".to_string(), "Reachable".to_string())),
        Err(e) => {
            checks.push(("Session cache".to_string(), "Unreachable".to_string()));
            issues.push(format!("Session cache error: {}", e));
        }
    }

    checks.push(("User store".to_string(), config.db_path().display().to_string()));
    checks.push((
        "Action capability".to_string(),
        config
            .action
            .base_url
            .clone()
            .unwrap_or_else(|| "Not configured".to_string()),
    ));
    checks.push((
        "Channel adaptor".to_string(),
        if services.channel.is_some() {
            "Enabled".to_string()
        } else {
            "Disabled".to_string()
        },
    ));

    match format {
        OutputFormat::Json => {
            let output = json!({
                "version": env!("CARGO_PKG_VERSION"),
                "commit": env!("GIT_COMMIT_HASH"),
                "checks": checks
                    .iter()
                    .map(|(name, status)| json!({ "name": name, "status": status }))
                    .collect::<Vec<_>>(),
                "issues": issues,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!(
                "Switchboard v{} ({})",
                env!("CARGO_PKG_VERSION"),
                env!("GIT_COMMIT_HASH")
            );
            println!();
            for (name, status) in &checks {
                println!("  {:<24} {}", name, status);
            }
            if issues.is_empty() {
                println!("\nNo issues found.");
            } else {
                println!("\nIssues:");
                for issue in &issues {
                    println!("  - {}", issue);
                }
            }
        }
    }

    services.database.close().await?;
    Ok(())
}
