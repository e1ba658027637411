//! Selection oracle
//!
//! The oracle decides which capabilities a message needs and writes the final
//! answer. The loop calls it in passes: each pass either asks for more
//! capability calls or answers.

use crate::models::{CapabilityCall, CapabilityOutcome, ConversationTurn};
use crate::tools::CapabilityDescriptor;
use crate::Result;
use async_trait::async_trait;

pub mod gemini;
pub mod keyword;
pub mod policy;

pub use gemini::GeminiOracle;
pub use keyword::KeywordOracle;
pub use policy::{IntentPolicy, IntentRule, Presentation};

/// Capability calls resolved in one pass, in the order they were proposed.
#[derive(Debug, Clone, Default)]
pub struct ToolExchange {
    pub outcomes: Vec<CapabilityOutcome>,
}

/// Everything the oracle sees for one pass.
#[derive(Debug, Clone, Copy)]
pub struct OracleRequest<'a> {
    pub thread_id: &'a str,
    pub policy: &'a IntentPolicy,
    /// `policy.render_prompt()`, rendered once per orchestrator.
    pub system_prompt: &'a str,
    pub capabilities: &'a [&'a CapabilityDescriptor],
    /// Conversation window, oldest first, excluding the current message.
    pub history: &'a [ConversationTurn],
    pub user_message: &'a str,
    pub exchanges: &'a [ToolExchange],
}

impl OracleRequest<'_> {
    pub fn outcomes(&self) -> impl Iterator<Item = &CapabilityOutcome> {
        self.exchanges.iter().flat_map(|e| e.outcomes.iter())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OracleReply {
    Invoke(Vec<CapabilityCall>),
    Answer(String),
}

#[async_trait]
pub trait SelectionOracle: Send + Sync {
    fn name(&self) -> &'static str;

    async fn consult(&self, request: &OracleRequest<'_>) -> Result<OracleReply>;
}
