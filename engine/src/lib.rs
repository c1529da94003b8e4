//! Switchboard Engine Library
//!
//! Core of the Switchboard dialogue router. Used by the `switchboard` binary
//! and by integration tests.

/// Configuration management module
pub mod config;

/// Credential resolution module
pub mod secrets;

/// Durable user store module
pub mod db;

/// Session cache module
pub mod session;

/// Working context assembly
pub mod context;

/// Dialogue backend abstraction layer
pub mod backend;

/// Concurrent dispatch to dialogue targets
pub mod dispatch;

/// Output arbitration
pub mod arbiter;

/// One-shot action directives
pub mod action;

/// Turn orchestration
pub mod pipeline;

/// HTTP surface
pub mod server;

/// Messaging channel adaptor
pub mod channel;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
