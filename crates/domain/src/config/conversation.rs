use serde::{Deserialize, Serialize};

/// Default number of conversations kept in memory.
pub const DEFAULT_CONVERSATION_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Maximum number of distinct conversations held at once.
    #[serde(default = "d_capacity")]
    pub capacity: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CONVERSATION_CAPACITY,
        }
    }
}

fn d_capacity() -> usize {
    DEFAULT_CONVERSATION_CAPACITY
}
