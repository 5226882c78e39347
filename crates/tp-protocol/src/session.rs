use serde::{Deserialize, Serialize};

use crate::conversation::ConversationTurn;
use crate::usage::TokenUsage;

/// Persisted conversation state. Importing replaces the live state wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
    #[serde(default)]
    pub token_usage: TokenUsage,
    #[serde(default)]
    pub cached_context: Option<String>,
}
