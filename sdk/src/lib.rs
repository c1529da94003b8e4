//! Switchboard SDK
//!
//! Shared data model and error taxonomy for Switchboard components.
//! This crate is used by the engine and by channel adaptors that speak the
//! converse request/response contract.

/// Error types and handling
pub mod errors;

/// Context, record, target and request types
pub mod types;

// Re-export commonly used types
pub use errors::{RouterError, RouterErrorExt};
pub use types::{
    is_truthy, ConverseRequest, ConverseResponse, DialogueOutput, DispatchTarget, Entity, Intent,
    SessionCacheEntry, UserContext, UserRecord, WorkspaceDescriptor,
};
