//! Capability execution
//!
//! Turns one proposed call into a [`CapabilityOutcome`]. Nothing escapes as
//! an error: unknown names, bad arguments, remote failures and timeouts all
//! become `Failure` results the loop can render for the user.

use crate::error::OrchestrationError;
use crate::models::{CapabilityCall, CapabilityOutcome, CapabilityResult, Payload};
use crate::state::LastResultCache;
use crate::tools::{ArgumentKind, CapabilityArgs, CapabilityRegistry, InvocationScope};
use crate::validation::{normalize_date_range, normalize_ticker};
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_CAPABILITY_TIMEOUT: Duration = Duration::from_secs(15);

/// Executes capability calls against the registry.
pub struct CapabilityExecutor {
    registry: Arc<CapabilityRegistry>,
    history: Arc<LastResultCache>,
    timeout: Duration,
}

impl CapabilityExecutor {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        history: Arc<LastResultCache>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            history,
            timeout,
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn history(&self) -> &LastResultCache {
        &self.history
    }

    /// Run one call for `thread_id`. One attempt, no retries.
    pub async fn execute(&self, thread_id: &str, call: &CapabilityCall) -> CapabilityOutcome {
        let start = Instant::now();
        let ticker = display_ticker(&call.arguments);

        let result = match self.run(thread_id, call).await {
            Ok(payload) => CapabilityResult::success(payload),
            Err(e) => {
                warn!(
                    thread_id,
                    capability = %call.name,
                    error = %e,
                    "Capability failed"
                );
                CapabilityResult::failure(failure_reason(&e))
            }
        };

        let execution_time_ms = start.elapsed().as_millis() as u64;
        debug!(
            thread_id,
            capability = %call.name,
            ticker = ?ticker,
            elapsed_ms = execution_time_ms,
            success = result.is_success(),
            "Capability executed"
        );

        CapabilityOutcome {
            call: call.clone(),
            ticker,
            result,
            execution_time_ms,
        }
    }

    async fn run(&self, thread_id: &str, call: &CapabilityCall) -> Result<Payload> {
        let capability = self.registry.get(&call.name)?;
        let args = parse_args(capability.descriptor().arguments.as_slice(), &call.arguments)?;

        let scope = InvocationScope { thread_id };
        let payload = tokio::time::timeout(self.timeout, capability.invoke(&scope, &args))
            .await
            .map_err(|_| OrchestrationError::Timeout(self.timeout))??;

        if let Payload::Table(table) = &payload {
            self.history.set(thread_id, table.to_string());
            debug!(thread_id, ticker = %table.ticker, rows = table.bars.len(), "Cached history table");
        }

        Ok(payload)
    }
}

/// Ticker to report on the outcome: normalized when it validates, as sent
/// otherwise.
fn display_ticker(raw: &Value) -> Option<String> {
    let sent = string_arg(raw, "ticker").ok().flatten()?;
    Some(match normalize_ticker(&sent) {
        Ok(ticker) => ticker.to_string(),
        Err(_) => sent,
    })
}

fn failure_reason(error: &OrchestrationError) -> String {
    match error {
        OrchestrationError::CapabilityNotFound(_) => "unknown capability".to_string(),
        other => other.to_string(),
    }
}

/// Validate raw oracle arguments against what the capability declares.
/// Arguments it does not declare are ignored.
fn parse_args(kinds: &[ArgumentKind], raw: &Value) -> Result<CapabilityArgs> {
    let mut args = CapabilityArgs::default();

    for kind in kinds {
        match kind {
            ArgumentKind::Ticker => {
                let ticker = string_arg(raw, "ticker")?.unwrap_or_default();
                args.ticker = Some(normalize_ticker(&ticker)?);
            }
            ArgumentKind::DateRange => {
                let start = string_arg(raw, "start_date")?
                    .ok_or_else(|| OrchestrationError::validation("missing start_date"))?;
                let end = string_arg(raw, "end_date")?
                    .ok_or_else(|| OrchestrationError::validation("missing end_date"))?;
                args.range = Some(normalize_date_range(&start, &end)?);
            }
        }
    }

    Ok(args)
}

fn string_arg(raw: &Value, key: &str) -> Result<Option<String>> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(OrchestrationError::validation(format!(
            "{} must be a string, got {}",
            key, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{InMemoryMarketData, MarketDataSource, Query};
    use crate::state::NO_PREVIOUS_HISTORY;
    use crate::tools::{create_default_registry, BALANCE_SHEET, CURRENT_PRICE, HISTORICAL_PRICE, LAST_HISTORY};
    use serde_json::json;

    fn executor_with(source: InMemoryMarketData, timeout: Duration) -> CapabilityExecutor {
        let source: Arc<dyn MarketDataSource> = Arc::new(source);
        let history = Arc::new(LastResultCache::new());
        let registry = create_default_registry(source, history.clone()).unwrap();
        CapabilityExecutor::new(Arc::new(registry), history, timeout)
    }

    fn executor() -> CapabilityExecutor {
        executor_with(InMemoryMarketData::sample(), DEFAULT_CAPABILITY_TIMEOUT)
    }

    #[tokio::test]
    async fn test_unknown_ticker_is_success_with_no_data() {
        let outcome = executor()
            .execute("t-1", &CapabilityCall::new(CURRENT_PRICE, json!({"ticker": "ZZZZ"})))
            .await;

        assert_eq!(
            outcome.result,
            CapabilityResult::success(Payload::NoData("No price data available for ZZZZ".into()))
        );
        assert!(outcome.is_no_data());
    }

    #[tokio::test]
    async fn test_ticker_is_normalized() {
        let outcome = executor()
            .execute("t-1", &CapabilityCall::new(CURRENT_PRICE, json!({"ticker": "  aapl "})))
            .await;

        assert_eq!(outcome.ticker.as_deref(), Some("AAPL"));
        assert_eq!(outcome.render(), "The current stock price of AAPL is 185.92");
    }

    #[tokio::test]
    async fn test_last_history_returns_exact_table() {
        let executor = executor();

        let before = executor
            .execute("t-1", &CapabilityCall::new(LAST_HISTORY, json!({})))
            .await;
        assert_eq!(before.render(), NO_PREVIOUS_HISTORY);

        let history = executor
            .execute(
                "t-1",
                &CapabilityCall::new(
                    HISTORICAL_PRICE,
                    json!({"ticker": "MSFT", "start_date": "2024-01-01", "end_date": "2024-01-05"}),
                ),
            )
            .await;
        let table = match history.result.payload() {
            Some(Payload::Table(table)) => table.to_string(),
            other => panic!("expected table, got {:?}", other),
        };

        let recalled = executor
            .execute("t-1", &CapabilityCall::new(LAST_HISTORY, json!({})))
            .await;
        assert_eq!(recalled.render(), table);

        let elsewhere = executor
            .execute("t-2", &CapabilityCall::new(LAST_HISTORY, json!({})))
            .await;
        assert_eq!(elsewhere.render(), NO_PREVIOUS_HISTORY);
    }

    #[tokio::test]
    async fn test_empty_history_does_not_overwrite_cache() {
        let executor = executor();
        let range = json!({"ticker": "MSFT", "start_date": "2024-01-02", "end_date": "2024-01-03"});
        executor.execute("t-1", &CapabilityCall::new(HISTORICAL_PRICE, range)).await;

        let empty = json!({"ticker": "ZZZZ", "start_date": "2024-01-02", "end_date": "2024-01-03"});
        let outcome = executor.execute("t-1", &CapabilityCall::new(HISTORICAL_PRICE, empty)).await;
        assert!(outcome.is_no_data());

        let recalled = executor.execute("t-1", &CapabilityCall::new(LAST_HISTORY, json!({}))).await;
        assert!(recalled.render().starts_with("Price history for MSFT"));
    }

    #[tokio::test]
    async fn test_remote_failure_names_ticker_and_reason() {
        let source = InMemoryMarketData::sample().failing(Query::BalanceSheet, "AAPL", "upstream 503");
        let outcome = executor_with(source, DEFAULT_CAPABILITY_TIMEOUT)
            .execute("t-1", &CapabilityCall::new(BALANCE_SHEET, json!({"ticker": "aapl"})))
            .await;

        assert!(!outcome.result.is_success());
        assert_eq!(outcome.ticker.as_deref(), Some("AAPL"));
        assert_eq!(outcome.render(), "Error fetching balance_sheet for AAPL: upstream 503");
    }

    #[tokio::test]
    async fn test_validation_failures_are_rendered() {
        let executor = executor();

        let reversed = executor
            .execute(
                "t-1",
                &CapabilityCall::new(
                    HISTORICAL_PRICE,
                    json!({"ticker": "MSFT", "start_date": "2024-02-10", "end_date": "2024-01-01"}),
                ),
            )
            .await;
        assert_eq!(reversed.render(), "Error fetching historical_price for MSFT: start after end");

        let blank = executor
            .execute("t-1", &CapabilityCall::new(CURRENT_PRICE, json!({"ticker": "   "})))
            .await;
        assert_eq!(blank.render(), "Error fetching current_price: empty ticker");

        let lowercase = executor
            .execute(
                "t-1",
                &CapabilityCall::new(
                    HISTORICAL_PRICE,
                    json!({"ticker": " msft", "start_date": "2024-01-05", "end_date": "2024-01-01"}),
                ),
            )
            .await;
        assert_eq!(lowercase.ticker.as_deref(), Some("MSFT"));
        assert_eq!(lowercase.render(), "Error fetching historical_price for MSFT: start after end");

        let numeric = executor
            .execute("t-1", &CapabilityCall::new(CURRENT_PRICE, json!({"ticker": 42})))
            .await;
        assert!(numeric.render().contains("ticker must be a string"));
    }

    #[tokio::test]
    async fn test_unknown_capability() {
        let outcome = executor()
            .execute("t-1", &CapabilityCall::new("price_target", json!({"ticker": "AAPL"})))
            .await;

        assert_eq!(outcome.result, CapabilityResult::failure("unknown capability"));
        assert_eq!(outcome.render(), "Error fetching price_target for AAPL: unknown capability");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_times_out() {
        let source = InMemoryMarketData::sample().with_delay(Duration::from_secs(30));
        let outcome = executor_with(source, Duration::from_secs(2))
            .execute("t-1", &CapabilityCall::new(CURRENT_PRICE, json!({"ticker": "AAPL"})))
            .await;

        assert_eq!(outcome.render(), "Error fetching current_price for AAPL: timed out after 2s");
    }
}
