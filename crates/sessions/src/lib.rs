//! Conversation state for the batch-RPC client.
//!
//! Holds the per-conversation turn history that follow-up queries send
//! back to the server. State is in-memory only and bounded by capacity.

pub mod conversation;

pub use conversation::{ConversationCache, ConversationTurn};
