//! Conversation memory
//!
//! Bounded per-thread history that gives the selection oracle continuity
//! across turns without resending the whole conversation.

pub mod store;
pub mod threads;

pub use store::ConversationThread;
pub use threads::{ConversationMemory, MemoryConfig};
