//! Dossier Protocol
//!
//! Shared types for communication between the Dossier research client and
//! its backend agent. Stream frames are serialized as JSON over WebSocket;
//! resource payloads as JSON over HTTP.

use uuid::Uuid;

// Re-exports
pub mod client;
pub mod plan;
pub mod server;
pub mod types;

pub use client::ClientFrame;
pub use plan::{Plan, ScalarValue, SectionKey, SectionParseError, SectionValue};
pub use server::ServerEvent;
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
