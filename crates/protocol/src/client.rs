//! Client → Server stream frames

use serde::{Deserialize, Serialize};

/// Frames sent from client to backend over the session stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Start a generation for a user message
    Message { content: String },

    /// Rewrite one plan section following natural-language instructions
    EditSection {
        section: String,
        instructions: String,
    },

    /// Ask the backend to push the current plan as a `plan` event
    GetPlan,
}
