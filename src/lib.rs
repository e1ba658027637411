//! Stock Assistant Orchestrator
//!
//! Answers natural-language questions about listed equities:
//! - Routes each message to data capabilities (price, history, balance sheet, news)
//! - Validates and normalizes tickers and date ranges before any fetch
//! - Keeps a bounded memory per conversation thread
//! - Remembers the last price table per thread for "show last history"
//! - Leaves capability selection and wording to a pluggable oracle
//!
//! TURN LOOP:
//! IDLE → VALIDATING → SELECTING ⇄ EXECUTING → RESPONDING → IDLE

pub mod agent;
pub mod api;
pub mod bootstrap;
pub mod classifier;
pub mod config;
pub mod error;
pub mod execution;
pub mod gemini;
pub mod market_data;
pub mod memory;
pub mod models;
pub mod oracle;
pub mod state;
pub mod tools;
pub mod validation;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use agent::{Orchestrator, TurnLimits};
pub use classifier::MessageClassifier;
