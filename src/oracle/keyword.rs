//! Offline selection oracle
//!
//! Applies the intent policy deterministically, without a language model.
//! First pass: classify the message and propose the rule's capabilities.
//! Second pass: compose the answer from the outcomes per the rule's
//! presentation mode.

use crate::classifier::MessageClassifier;
use crate::models::{CapabilityCall, CapabilityOutcome};
use crate::oracle::{IntentPolicy, IntentRule, OracleReply, OracleRequest, Presentation, SelectionOracle};
use crate::tools::{ArgumentKind, CapabilityDescriptor};
use crate::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

pub const HELP_REPLY: &str = "I can look up current prices, price history, balance sheets and news. Try \"tell me about AAPL\", \"news about TSLA\" or \"MSFT history from 2024-01-01 to 2024-01-05\".";
pub const MISSING_TICKER_REPLY: &str = "Which stock do you mean? Please include a ticker symbol such as AAPL or RELIANCE.NS.";
pub const MISSING_RANGE_REPLY: &str = "Please give a start and end date for the price history, for example 2024-01-01 to 2024-01-31.";

#[derive(Debug, Default)]
pub struct KeywordOracle;

impl KeywordOracle {
    pub fn new() -> Self {
        Self
    }

    fn select<'p>(policy: &'p IntentPolicy, request: &OracleRequest<'_>) -> Option<&'p IntentRule> {
        policy.match_intent(request.user_message).or_else(|| {
            MessageClassifier::extract_ticker(request.user_message).and_then(|_| policy.fallback())
        })
    }

    fn propose(rule: &IntentRule, request: &OracleRequest<'_>) -> OracleReply {
        let ticker = MessageClassifier::extract_ticker(request.user_message)
            .or_else(|| MessageClassifier::ticker_from_history(request.history));
        let range = MessageClassifier::extract_date_range(request.user_message)
            .or_else(|| MessageClassifier::date_range_from_history(request.history));

        let mut calls = Vec::with_capacity(rule.capabilities.len());
        for name in &rule.capabilities {
            let Some(descriptor) = find(request.capabilities, name) else {
                continue;
            };

            let mut args = Map::new();
            if descriptor.takes(ArgumentKind::Ticker) {
                match &ticker {
                    Some(t) => {
                        args.insert("ticker".into(), Value::String(t.clone()));
                    }
                    None => return OracleReply::Answer(MISSING_TICKER_REPLY.to_string()),
                }
            }
            if descriptor.takes(ArgumentKind::DateRange) {
                match &range {
                    Some((start, end)) => {
                        args.insert("start_date".into(), Value::String(start.clone()));
                        args.insert("end_date".into(), Value::String(end.clone()));
                    }
                    None => return OracleReply::Answer(MISSING_RANGE_REPLY.to_string()),
                }
            }
            calls.push(CapabilityCall::new(name.clone(), Value::Object(args)));
        }

        if calls.is_empty() {
            return OracleReply::Answer(HELP_REPLY.to_string());
        }
        OracleReply::Invoke(calls)
    }
}

fn find<'a>(capabilities: &[&'a CapabilityDescriptor], name: &str) -> Option<&'a CapabilityDescriptor> {
    capabilities.iter().copied().find(|d| d.name == name)
}

/// Answer text for the resolved outcomes.
pub fn compose(policy: &IntentPolicy, presentation: Presentation, outcomes: &[&CapabilityOutcome]) -> String {
    let mut sections: Vec<String> = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        let section = if outcome.is_no_data() {
            policy.empty_data_for(outcome.ticker.as_deref().unwrap_or("that ticker"))
        } else {
            outcome.render()
        };
        if !sections.contains(&section) {
            sections.push(section);
        }
    }

    let body = sections.join("\n\n");
    let has_data = outcomes.iter().any(|o| o.result.is_success() && !o.is_no_data());
    if !has_data {
        return body;
    }

    let ticker = outcomes
        .iter()
        .find_map(|o| o.ticker.as_deref())
        .unwrap_or_default();

    match presentation {
        Presentation::HeadlinesOnly | Presentation::TableVerbatim | Presentation::RecallVerbatim => body,
        Presentation::Summary if outcomes.len() == 1 => body,
        Presentation::Summary => format!("Here is an overview of {}:\n\n{}", ticker, body),
        Presentation::DetailedNarrative => format!(
            "Detailed analysis of {} based on the latest price, balance sheet and news:\n\n{}",
            ticker, body
        ),
    }
}

#[async_trait]
impl SelectionOracle for KeywordOracle {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn consult(&self, request: &OracleRequest<'_>) -> Result<OracleReply> {
        let policy = request.policy;
        let Some(rule) = Self::select(policy, request) else {
            debug!(thread_id = request.thread_id, "No intent rule matched");
            return Ok(OracleReply::Answer(HELP_REPLY.to_string()));
        };

        if request.exchanges.is_empty() {
            debug!(thread_id = request.thread_id, rule = %rule.name, "Intent rule matched");
            return Ok(Self::propose(rule, request));
        }

        let outcomes: Vec<&CapabilityOutcome> = request.outcomes().collect();
        Ok(OracleReply::Answer(compose(policy, rule.presentation, &outcomes)))
    }
}
