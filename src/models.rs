//! Core data models for the stock assistant

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One message in a conversation thread. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub turn_id: Uuid,
    pub role: TurnRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }
}

//
// ================= Market Data =================
//

/// One daily OHLCV row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Tabular price series for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    pub ticker: String,
    pub bars: Vec<PriceBar>,
}

impl fmt::Display for PriceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Price history for {}", self.ticker)?;
        write!(
            f,
            "{:<10}  {:>10}  {:>10}  {:>10}  {:>10}  {:>12}",
            "Date", "Open", "High", "Low", "Close", "Volume"
        )?;
        for bar in &self.bars {
            write!(
                f,
                "\n{:<10}  {:>10.2}  {:>10.2}  {:>10.2}  {:>10.2}  {:>12}",
                bar.date.format("%Y-%m-%d"),
                bar.open,
                bar.high,
                bar.low,
                bar.close,
                bar.volume
            )?;
        }
        Ok(())
    }
}

/// Latest reported balance-sheet figures. Any figure may be missing upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub as_of: Option<NaiveDate>,
    pub total_debt: Option<f64>,
    pub net_debt: Option<f64>,
    pub cash: Option<f64>,
    pub total_assets: Option<f64>,
    pub equity: Option<f64>,
}

impl BalanceSheet {
    pub fn is_empty(&self) -> bool {
        self.total_debt.is_none()
            && self.net_debt.is_none()
            && self.cash.is_none()
            && self.total_assets.is_none()
            && self.equity.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub link: Option<String>,
    pub publisher: Option<String>,
}

//
// ================= Capability I/O =================
//

/// A capability invocation proposed by the selection oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl CapabilityCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Successful capability output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Table(PriceTable),
    /// The source answered but had nothing for the ticker/range.
    NoData(String),
}

impl Payload {
    pub fn render(&self) -> String {
        match self {
            Payload::Text(text) | Payload::NoData(text) => text.clone(),
            Payload::Table(table) => table.to_string(),
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, Payload::NoData(_))
    }
}

/// Tagged outcome of one capability execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CapabilityResult {
    Success { payload: Payload },
    Failure { reason: String },
}

impl CapabilityResult {
    pub fn success(payload: Payload) -> Self {
        Self::Success { payload }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Self::Success { payload } => Some(payload),
            Self::Failure { .. } => None,
        }
    }
}

/// A resolved call: what was asked, for which ticker, and what came back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOutcome {
    pub call: CapabilityCall,
    /// Normalized ticker when validation got that far, raw input otherwise.
    pub ticker: Option<String>,
    pub result: CapabilityResult,
    pub execution_time_ms: u64,
}

impl CapabilityOutcome {
    /// Text handed to the oracle and, ultimately, the user.
    pub fn render(&self) -> String {
        match &self.result {
            CapabilityResult::Success { payload } => payload.render(),
            CapabilityResult::Failure { reason } => match self.ticker.as_deref() {
                Some(ticker) if !ticker.trim().is_empty() => format!(
                    "Error fetching {} for {}: {}",
                    self.call.name, ticker, reason
                ),
                _ => format!("Error fetching {}: {}", self.call.name, reason),
            },
        }
    }

    pub fn is_no_data(&self) -> bool {
        self.result.payload().is_some_and(Payload::is_no_data)
    }
}

//
// ================= Turn Result =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    OracleFailed,
}

/// What the orchestration loop hands back for one inbound turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnReply {
    pub thread_id: String,
    pub response: String,
    pub status: TurnStatus,
    /// Capability names in invocation order.
    pub invoked: Vec<String>,
    pub policy_version: String,
    pub reasoning_trace: Vec<String>,
    pub execution_time_ms: u64,
}
