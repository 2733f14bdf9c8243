//! Bounded in-memory cache of conversation turns.
//!
//! Maps a conversation id to its ordered list of turns so follow-up calls
//! can send the prior exchange as history. Conversations are kept in
//! insertion order; when a new conversation would exceed the capacity, the
//! oldest one is evicted. There is no time-based expiry.

use std::collections::{HashMap, VecDeque};

use br_domain::config::ConversationConfig;
use br_domain::trace::TraceEvent;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Role markers used in the follow-up history payload.
const QUERY_ROLE: u8 = 1;
const ANSWER_ROLE: u8 = 2;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One question/answer exchange within a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub query: String,
    pub answer: String,
    pub turn_number: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Inner {
    /// Conversation ids, oldest first.
    order: VecDeque<String>,
    turns: HashMap<String, Vec<ConversationTurn>>,
}

/// Thread-safe, insertion-ordered conversation cache.
///
/// Uses `parking_lot::RwLock`; every mutation happens under the write lock.
pub struct ConversationCache {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl ConversationCache {
    /// Create a cache holding at most `capacity` conversations (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn from_config(cfg: &ConversationConfig) -> Self {
        Self::new(cfg.capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a turn. A new conversation id at capacity evicts the oldest
    /// conversation first; appending to an existing one never evicts.
    pub fn record_turn(
        &self,
        conversation_id: &str,
        query: impl Into<String>,
        answer: impl Into<String>,
        turn_number: u32,
    ) {
        let mut inner = self.inner.write();

        if !inner.turns.contains_key(conversation_id) {
            if inner.turns.len() >= self.capacity {
                if let Some(oldest) = inner.order.pop_front() {
                    let evicted = inner.turns.remove(&oldest).map(|t| t.len()).unwrap_or(0);
                    tracing::debug!(
                        conversation_id = %oldest,
                        turns = evicted,
                        "conversation evicted at capacity"
                    );
                    TraceEvent::ConversationEvicted {
                        conversation_id: oldest,
                        turns: evicted,
                    }
                    .emit();
                }
            }
            inner.order.push_back(conversation_id.to_owned());
            inner.turns.insert(conversation_id.to_owned(), Vec::new());
        }

        if let Some(turns) = inner.turns.get_mut(conversation_id) {
            turns.push(ConversationTurn {
                query: query.into(),
                answer: answer.into(),
                turn_number,
            });
        }
    }

    /// Turns of a conversation in recording order; empty if unknown.
    pub fn get_turns(&self, conversation_id: &str) -> Vec<ConversationTurn> {
        self.inner
            .read()
            .turns
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Clear one conversation (returns whether it existed) or, with `None`,
    /// every conversation (always returns `true`).
    pub fn clear(&self, conversation_id: Option<&str>) -> bool {
        let mut inner = self.inner.write();
        match conversation_id {
            Some(id) => {
                let existed = inner.turns.remove(id).is_some();
                if existed {
                    inner.order.retain(|k| k != id);
                }
                existed
            }
            None => {
                inner.turns.clear();
                inner.order.clear();
                true
            }
        }
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.inner.read().turns.contains_key(conversation_id)
    }

    /// Number of conversations held.
    pub fn len(&self) -> usize {
        self.inner.read().turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Turn number for the next exchange in a conversation (1-based).
    pub fn next_turn_number(&self, conversation_id: &str) -> u32 {
        self.inner
            .read()
            .turns
            .get(conversation_id)
            .and_then(|turns| turns.last())
            .map(|t| t.turn_number.saturating_add(1))
            .unwrap_or(1)
    }

    /// History payload for a follow-up call:
    /// `[[query, null, 1], [answer, null, 2], ...]`, oldest turn first.
    ///
    /// Returns `None` when the conversation has no turns.
    pub fn build_history(&self, conversation_id: &str) -> Option<Value> {
        let inner = self.inner.read();
        let turns = inner.turns.get(conversation_id)?;
        if turns.is_empty() {
            return None;
        }
        let entries: Vec<Value> = turns
            .iter()
            .flat_map(|t| {
                [
                    json!([t.query, Value::Null, QUERY_ROLE]),
                    json!([t.answer, Value::Null, ANSWER_ROLE]),
                ]
            })
            .collect();
        Some(Value::Array(entries))
    }
}

impl Default for ConversationCache {
    fn default() -> Self {
        Self::from_config(&ConversationConfig::default())
    }
}

impl std::fmt::Debug for ConversationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationCache")
            .field("conversations", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
