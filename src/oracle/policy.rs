//! Intent policy
//!
//! The business rules handed to the selection oracle, kept as data: which
//! phrases map to which capabilities and how the answer must be presented.
//! The rendered prompt is derived from it and its fingerprint is logged with
//! every turn, so a reply can always be traced to the exact rules in force.

use crate::error::OrchestrationError;
use crate::tools::{CapabilityRegistry, BALANCE_SHEET, CURRENT_PRICE, HISTORICAL_PRICE, LAST_HISTORY, STOCK_NEWS};
use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presentation {
    /// Only the headlines from the news capability.
    HeadlinesOnly,
    /// Short summary built from the fetched figures.
    Summary,
    /// The table exactly as returned.
    TableVerbatim,
    /// Longer explanation using every fetched result.
    DetailedNarrative,
    /// The recalled result exactly as stored.
    RecallVerbatim,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRule {
    pub name: String,
    /// Lowercase phrases; the first rule with a phrase contained in the
    /// message wins.
    pub triggers: Vec<String>,
    pub capabilities: Vec<String>,
    pub presentation: Presentation,
    pub instruction: String,
}

impl IntentRule {
    fn matches(&self, lowered: &str) -> bool {
        self.triggers.iter().any(|t| lowered.contains(t.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentPolicy {
    pub version: String,
    pub persona: String,
    pub rules: Vec<IntentRule>,
    /// Rule applied when no trigger matches but the message names a ticker.
    #[serde(default)]
    pub fallback_rule: Option<String>,
    /// Sentence required when a capability returns no data.
    pub empty_data_reply: String,
    pub guardrails: Vec<String>,
}

fn rule(
    name: &str,
    triggers: &[&str],
    capabilities: &[&str],
    presentation: Presentation,
    instruction: &str,
) -> IntentRule {
    IntentRule {
        name: name.to_string(),
        triggers: triggers.iter().map(|t| t.to_string()).collect(),
        capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        presentation,
        instruction: instruction.to_string(),
    }
}

impl IntentPolicy {
    /// The built-in rule set.
    pub fn standard() -> Self {
        Self {
            version: "2024.1".to_string(),
            persona: "You are a stock analysis assistant with real-time tool access. You must use tool results in your final answer.".to_string(),
            rules: vec![
                rule(
                    "recall",
                    &["last history", "previous history", "show last", "last result"],
                    &[LAST_HISTORY],
                    Presentation::RecallVerbatim,
                    "Return the recalled output exactly as the tool gives it.",
                ),
                rule(
                    "news",
                    &["news", "headline"],
                    &[STOCK_NEWS],
                    Presentation::HeadlinesOnly,
                    "Return only the news headlines from the tool output.",
                ),
                rule(
                    "analysis",
                    &["detail", "analysis", "analyze", "analyse"],
                    &[CURRENT_PRICE, BALANCE_SHEET, STOCK_NEWS],
                    Presentation::DetailedNarrative,
                    "Return a detailed explanation using the tool data.",
                ),
                rule(
                    "history",
                    &["history", "historical"],
                    &[HISTORICAL_PRICE],
                    Presentation::TableVerbatim,
                    "Show the table exactly as the tool returns it.",
                ),
                rule(
                    "overview",
                    &["tell me about"],
                    &[CURRENT_PRICE, BALANCE_SHEET],
                    Presentation::Summary,
                    "Return a summary using the tool data.",
                ),
                rule(
                    "quote",
                    &["price", "quote", "trading at"],
                    &[CURRENT_PRICE],
                    Presentation::Summary,
                    "State the current price from the tool output.",
                ),
            ],
            fallback_rule: Some("quote".to_string()),
            empty_data_reply: "No data available for <ticker>".to_string(),
            guardrails: vec![
                "You DO have access to real-time data.".to_string(),
                "Never say you cannot access real-time information.".to_string(),
                "Never give generic answers when a ticker is present.".to_string(),
                "Always use tool output to generate the answer.".to_string(),
                "If a tool returns headlines, show the headlines. If it returns a table, show the table.".to_string(),
                "Never suggest Google or other websites.".to_string(),
                "Never refuse.".to_string(),
                "Never hallucinate figures.".to_string(),
            ],
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let policy: IntentPolicy = serde_json::from_str(&raw)?;
        Ok(policy)
    }

    /// Every rule must be non-empty and name only registered capabilities.
    pub fn validate(&self, registry: &CapabilityRegistry) -> Result<()> {
        if self.rules.is_empty() {
            return Err(OrchestrationError::Config(format!(
                "intent policy {} has no rules",
                self.version
            )));
        }
        for rule in &self.rules {
            if rule.triggers.is_empty() || rule.capabilities.is_empty() {
                return Err(OrchestrationError::Config(format!(
                    "intent rule '{}' needs at least one trigger and one capability",
                    rule.name
                )));
            }
            for name in &rule.capabilities {
                registry.descriptor(name).map_err(|_| {
                    OrchestrationError::Config(format!(
                        "intent rule '{}' names unknown capability '{}'",
                        rule.name, name
                    ))
                })?;
            }
        }
        if let Some(fallback) = &self.fallback_rule {
            if self.rule(fallback).is_none() {
                return Err(OrchestrationError::Config(format!(
                    "fallback rule '{}' is not defined",
                    fallback
                )));
            }
        }
        Ok(())
    }

    pub fn rule(&self, name: &str) -> Option<&IntentRule> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// First rule whose trigger appears in the message (case-insensitive).
    pub fn match_intent(&self, message: &str) -> Option<&IntentRule> {
        let lowered = message.to_lowercase();
        self.rules.iter().find(|r| r.matches(&lowered))
    }

    pub fn fallback(&self) -> Option<&IntentRule> {
        self.fallback_rule.as_deref().and_then(|name| self.rule(name))
    }

    /// The empty-data sentence for one ticker.
    pub fn empty_data_for(&self, ticker: &str) -> String {
        self.empty_data_reply.replace("<ticker>", ticker)
    }

    /// System prompt text for model-backed oracles.
    pub fn render_prompt(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.persona);
        let _ = writeln!(out, "Policy version: {}", self.version);

        out.push_str("\nSTRICT RULES:\n");
        for line in &self.guardrails {
            let _ = writeln!(out, "- {}", line);
        }

        out.push_str("\nINTENT RULES (first match wins):\n");
        for (i, rule) in self.rules.iter().enumerate() {
            let triggers = rule
                .triggers
                .iter()
                .map(|t| format!("\"{}\"", t))
                .collect::<Vec<_>>()
                .join(" / ");
            let _ = writeln!(out, "{}. {} <ticker>", i + 1, triggers);
            let _ = writeln!(out, "   -> CALL {}", rule.capabilities.join(" + "));
            let _ = writeln!(out, "   -> {}", rule.instruction);
        }

        out.push_str("\nIf a tool output is empty or reports that no data was found:\n");
        let _ = writeln!(out, "-> Say \"{}\"", self.empty_data_reply);
        out.push_str(
            "\nIf a tool output starts with \"Error fetching\", tell the user that part could not be fetched and use the rest.\n",
        );
        out
    }

    /// SHA-256 over the canonical JSON form, hex encoded.
    pub fn fingerprint(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

impl Default for IntentPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::InMemoryMarketData;
    use crate::state::LastResultCache;
    use crate::tools::create_default_registry;
    use std::sync::Arc;

    fn matched(message: &str) -> Option<String> {
        IntentPolicy::standard()
            .match_intent(message)
            .map(|r| r.name.clone())
    }

    #[test]
    fn test_rule_order() {
        assert_eq!(matched("news about TSLA").as_deref(), Some("news"));
        assert_eq!(matched("Tell me about AAPL").as_deref(), Some("overview"));
        assert_eq!(matched("MSFT history from 2024-01-01 to 2024-01-05").as_deref(), Some("history"));
        assert_eq!(matched("show last history").as_deref(), Some("recall"));
        assert_eq!(matched("detailed analysis of NVDA news").as_deref(), Some("news"));
        assert_eq!(matched("give me a detail view of NVDA").as_deref(), Some("analysis"));
        assert_eq!(matched("what's the price of AAPL").as_deref(), Some("quote"));
        assert_eq!(matched("hello there"), None);
    }

    #[test]
    fn test_standard_policy_is_valid() {
        let registry = create_default_registry(
            Arc::new(InMemoryMarketData::new()),
            Arc::new(LastResultCache::new()),
        )
        .unwrap();
        tokio_test::assert_ok!(IntentPolicy::standard().validate(&registry));

        let mut broken = IntentPolicy::standard();
        broken.rules[0].capabilities.push("price_target".to_string());
        assert!(matches!(
            broken.validate(&registry),
            Err(OrchestrationError::Config(msg)) if msg.contains("price_target")
        ));
    }

    #[test]
    fn test_prompt_carries_rules_and_guardrails() {
        let prompt = IntentPolicy::standard().render_prompt();
        assert!(prompt.contains("Policy version: 2024.1"));
        assert!(prompt.contains("\"news\" / \"headline\" <ticker>"));
        assert!(prompt.contains("-> CALL current_price + balance_sheet + stock_news"));
        assert!(prompt.contains("Never suggest Google or other websites."));
        assert!(prompt.contains("Say \"No data available for <ticker>\""));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let policy = IntentPolicy::standard();
        let first = policy.fingerprint().unwrap();
        assert_eq!(first.len(), 64);
        assert_eq!(first, IntentPolicy::standard().fingerprint().unwrap());

        let mut edited = policy.clone();
        edited.guardrails.push("Be brief.".to_string());
        assert_ne!(first, edited.fingerprint().unwrap());
    }

    #[test]
    fn test_json_round_trip_through_file() {
        let path = std::env::temp_dir().join(format!("intent-policy-{}.json", uuid::Uuid::new_v4()));
        let policy = IntentPolicy::standard();
        std::fs::write(&path, serde_json::to_string_pretty(&policy).unwrap()).unwrap();

        let loaded = IntentPolicy::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, policy);
        assert_eq!(loaded.empty_data_for("ZZZZ"), "No data available for ZZZZ");
    }
}
