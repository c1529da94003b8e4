//! Error types and handling
//!
//! This module provides the error taxonomy shared by every Switchboard
//! component. All errors implement the `RouterErrorExt` trait which provides
//! user-friendly hints, recoverability and the HTTP status a caller sees.
//!
//! # Security
//!
//! Error messages never carry credential values. Backend and action failures
//! are scrubbed by the engine before they are wrapped here.

use thiserror::Error;

/// Trait for Switchboard error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All router errors implement this trait.
pub trait RouterErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain:
    /// - Secrets (shared tokens, backend passwords)
    /// - Internal implementation details
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors only cost the current turn (or a part of it).
    /// Non-recoverable errors need an operator to fix configuration.
    fn is_recoverable(&self) -> bool;

    /// HTTP status code the caller observes for this error
    ///
    /// Only authentication and validation failures surface as non-200 codes;
    /// every other failure degrades into a best-effort 200 response.
    fn status_code(&self) -> u16;
}

/// Main router error type
///
/// # Error Categories
///
/// - **Request**: authentication and validation of the inbound request
/// - **Dispatch**: backend failures and an empty result set
/// - **Context stores**: session cache failures and durable store conflicts
/// - **Action**: failures of the one-shot action capability
/// - **Configuration**: invalid or missing configuration and credentials
///
/// # Examples
///
/// ```
/// use sdk::errors::{RouterError, RouterErrorExt};
///
/// let error = RouterError::Unauthorized;
/// assert_eq!(error.status_code(), 401);
///
/// let conflict = RouterError::StoreConflict("user-1".to_string());
/// assert_eq!(conflict.status_code(), 200);
/// assert!(conflict.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum RouterError {
    // Request errors
    #[error("Missing or invalid token")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    // Dispatch errors
    #[error("Backend unavailable for target {target}: {reason}")]
    BackendUnavailable { target: String, reason: String },

    #[error("No viable output from any dispatch target")]
    NoViableOutput,

    // Context store errors
    #[error("Session cache error: {0}")]
    Cache(String),

    #[error("Revision conflict while saving user {0}")]
    StoreConflict(String),

    #[error("Durable store error: {0}")]
    Store(String),

    // Action errors
    #[error("Action call failed: {0}")]
    ActionCall(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credential error: {0}")]
    Credential(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RouterErrorExt for RouterError {
    fn user_hint(&self) -> &str {
        match self {
            // Request errors
            Self::Unauthorized => "Provide the shared token configured for this router",
            Self::BadRequest(_) => "The request is missing a required field",

            // Dispatch errors
            Self::BackendUnavailable { .. } => "A dialogue backend did not answer this turn",
            Self::NoViableOutput => "No dialogue backend produced a reply. Try again",

            // Context store errors
            Self::Cache(_) => "Session cache unavailable. Conversation continuity may be lost",
            Self::StoreConflict(_) => "User context changed concurrently. This turn was not saved",
            Self::Store(_) => "User context storage failed",

            // Action errors
            Self::ActionCall(_) => "A follow-up action failed. The reply may be incomplete",

            // Configuration errors
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Credential(_) => "Backend credentials are missing. Check the keychain or environment",

            // Network errors
            Self::Network(_) => "Network operation failed. Check your connection",

            // Generic IO error
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::Config(_) | Self::Credential(_) => false,

            // All other errors only cost the current turn
            _ => true,
        }
    }

    fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::BadRequest(_) => 400,
            _ => 200,
        }
    }
}
