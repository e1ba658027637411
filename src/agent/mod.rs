//! Main orchestrator - implements the turn loop
//!
//! IDLE → VALIDATING → SELECTING ⇄ EXECUTING → RESPONDING → IDLE
//!
//! Validation is deferred to capability execution. The oracle is consulted
//! in passes until it answers; every capability it asks for runs, and
//! failures come back to it as text. Only an oracle failure ends the turn
//! early, and even then the caller gets a reply and the turn is recorded.

use crate::error::OrchestrationError;
use crate::execution::CapabilityExecutor;
use crate::memory::ConversationMemory;
use crate::models::{CapabilityOutcome, CapabilityResult, ConversationTurn, TurnReply, TurnStatus};
use crate::oracle::{IntentPolicy, OracleReply, OracleRequest, SelectionOracle, ToolExchange};
use crate::state::LastResultCache;
use crate::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const ORACLE_FALLBACK_REPLY: &str =
    "I fetched the data but could not generate a response. Please try again.";

pub const DEFAULT_MAX_PASSES: usize = 4;
pub const DEFAULT_MAX_CALLS_PER_PASS: usize = 8;
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Bounds on a single turn.
#[derive(Debug, Clone, Copy)]
pub struct TurnLimits {
    pub max_passes: usize,
    pub max_calls_per_pass: usize,
    pub oracle_timeout: Duration,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
            max_calls_per_pass: DEFAULT_MAX_CALLS_PER_PASS,
            oracle_timeout: DEFAULT_ORACLE_TIMEOUT,
        }
    }
}

/// Coordinates memory, the selection oracle and capability execution.
pub struct Orchestrator {
    oracle: Arc<dyn SelectionOracle>,
    executor: CapabilityExecutor,
    memory: Arc<ConversationMemory>,
    policy: IntentPolicy,
    system_prompt: String,
    policy_fingerprint: String,
    limits: TurnLimits,
}

impl Orchestrator {
    /// Fails if the policy names capabilities the executor does not have.
    pub fn new(
        oracle: Arc<dyn SelectionOracle>,
        executor: CapabilityExecutor,
        memory: Arc<ConversationMemory>,
        policy: IntentPolicy,
        limits: TurnLimits,
    ) -> Result<Self> {
        policy.validate(executor.registry())?;
        let policy_fingerprint = policy.fingerprint()?;
        let system_prompt = policy.render_prompt();

        info!(
            oracle = oracle.name(),
            policy_version = %policy.version,
            policy_fingerprint = %policy_fingerprint,
            capabilities = executor.registry().len(),
            "Orchestrator ready"
        );

        Ok(Self {
            oracle,
            executor,
            memory,
            policy,
            system_prompt,
            policy_fingerprint,
            limits,
        })
    }

    pub fn policy(&self) -> &IntentPolicy {
        &self.policy
    }

    pub fn policy_fingerprint(&self) -> &str {
        &self.policy_fingerprint
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn history_cache(&self) -> &LastResultCache {
        self.executor.history()
    }

    /// Run one inbound turn. Never fails: errors become reply text.
    pub async fn handle_turn(&self, thread_id: &str, content: &str) -> TurnReply {
        let start_time = Instant::now();
        let mut reasoning_trace = Vec::new();

        // Held until the turn is recorded; same-thread turns queue here.
        let _turn = self.memory.begin_turn(thread_id).await;
        self.release_capped_threads();

        info!(
            thread_id,
            policy_version = %self.policy.version,
            "Orchestrator: turn received"
        );
        reasoning_trace.push("IDLE: turn received".to_string());
        reasoning_trace.push("VALIDATING: deferred to capability execution".to_string());

        let history = self.memory.window(thread_id).await;
        let descriptors = self.executor.registry().list();
        let mut exchanges: Vec<ToolExchange> = Vec::new();
        let mut invoked: Vec<String> = Vec::new();

        let mut answer: Option<String> = None;
        let mut failure: Option<OrchestrationError> = None;

        for pass in 1..=self.limits.max_passes {
            reasoning_trace.push(format!(
                "SELECTING: pass {} with {} turn(s) of history",
                pass,
                history.len()
            ));

            let request = OracleRequest {
                thread_id,
                policy: &self.policy,
                system_prompt: &self.system_prompt,
                capabilities: &descriptors,
                history: &history,
                user_message: content,
                exchanges: &exchanges,
            };

            let reply = match tokio::time::timeout(
                self.limits.oracle_timeout,
                self.oracle.consult(&request),
            )
            .await
            {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) => {
                    failure = Some(e);
                    break;
                }
                Err(_) => {
                    failure = Some(OrchestrationError::Timeout(self.limits.oracle_timeout));
                    break;
                }
            };

            match reply {
                OracleReply::Answer(text) if text.trim().is_empty() => {
                    failure = Some(OrchestrationError::oracle("empty answer"));
                    break;
                }
                OracleReply::Answer(text) => {
                    answer = Some(text);
                    break;
                }
                OracleReply::Invoke(calls) if calls.is_empty() => {
                    failure = Some(OrchestrationError::oracle(
                        "neither an answer nor capability calls",
                    ));
                    break;
                }
                OracleReply::Invoke(mut calls) => {
                    if calls.len() > self.limits.max_calls_per_pass {
                        warn!(
                            thread_id,
                            requested = calls.len(),
                            allowed = self.limits.max_calls_per_pass,
                            "Dropping capability calls over the per-pass limit"
                        );
                        calls.truncate(self.limits.max_calls_per_pass);
                    }

                    let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
                    reasoning_trace.push(format!("EXECUTING: {}", names.join(", ")));

                    let mut outcomes = Vec::with_capacity(calls.len());
                    for call in &calls {
                        let outcome = self.executor.execute(thread_id, call).await;
                        reasoning_trace.push(format!(
                            "EXECUTING: {} -> {} ({} ms)",
                            call.name,
                            outcome_label(&outcome),
                            outcome.execution_time_ms
                        ));
                        invoked.push(call.name.clone());
                        outcomes.push(outcome);
                    }
                    exchanges.push(ToolExchange { outcomes });
                }
            }
        }

        if answer.is_none() && failure.is_none() {
            failure = Some(OrchestrationError::oracle(format!(
                "no answer after {} passes",
                self.limits.max_passes
            )));
        }

        let (response, status) = match (answer, failure) {
            (Some(text), None) => (text, TurnStatus::Completed),
            (_, failure) => {
                let reason = failure.map(|e| e.to_string()).unwrap_or_default();
                warn!(thread_id, oracle = self.oracle.name(), reason = %reason, "Oracle failed");
                reasoning_trace.push(format!("RESPONDING: oracle failed ({})", reason));
                (ORACLE_FALLBACK_REPLY.to_string(), TurnStatus::OracleFailed)
            }
        };

        self.memory
            .append(thread_id, ConversationTurn::user(content))
            .await;
        self.memory
            .append(thread_id, ConversationTurn::assistant(response.clone()))
            .await;
        reasoning_trace.push("RESPONDING: turn recorded".to_string());
        reasoning_trace.push("IDLE".to_string());

        let execution_time_ms = start_time.elapsed().as_millis() as u64;
        info!(
            thread_id,
            policy_version = %self.policy.version,
            policy_fingerprint = %self.policy_fingerprint,
            invoked = ?invoked,
            status = ?status,
            elapsed_ms = execution_time_ms,
            "Orchestrator: turn complete"
        );

        TurnReply {
            thread_id: thread_id.to_string(),
            response,
            status,
            invoked,
            policy_version: self.policy.version.clone(),
            reasoning_trace,
            execution_time_ms,
        }
    }

    /// Forget a conversation: its memory window and cached history. A turn
    /// in flight on the thread finishes first.
    pub async fn end_thread(&self, thread_id: &str) -> bool {
        let had_memory = self.memory.end_thread(thread_id).await;
        let had_history = self.executor.history().forget(thread_id);
        debug!(thread_id, had_memory, had_history, "Thread ended");
        had_memory || had_history
    }

    /// Drop idle threads along with their cached history.
    pub fn evict_idle(&self) -> Vec<String> {
        let evicted = self.memory.evict_idle();
        for thread_id in &evicted {
            self.executor.history().forget(thread_id);
        }
        if !evicted.is_empty() {
            info!(count = evicted.len(), "Evicted idle threads");
        }
        self.release_capped_threads();
        evicted
    }

    /// Drop cached history for threads pushed out by the memory's thread cap.
    fn release_capped_threads(&self) {
        for thread_id in self.memory.take_evicted() {
            // Already back in memory under a new turn; its cache is current.
            if self.memory.contains(&thread_id) {
                continue;
            }
            self.executor.history().forget(&thread_id);
            debug!(thread_id = %thread_id, "Released history of capped thread");
        }
    }
}

fn outcome_label(outcome: &CapabilityOutcome) -> &'static str {
    match &outcome.result {
        CapabilityResult::Failure { .. } => "failed",
        CapabilityResult::Success { .. } if outcome.is_no_data() => "no data",
        CapabilityResult::Success { .. } => "ok",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::DEFAULT_CAPABILITY_TIMEOUT;
    use crate::market_data::{InMemoryMarketData, MarketDataSource, Query};
    use crate::memory::MemoryConfig;
    use crate::models::{CapabilityCall, TurnRole};
    use crate::oracle::KeywordOracle;
    use crate::state::NO_PREVIOUS_HISTORY;
    use crate::tools::create_default_registry;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Plays back canned replies, then fails.
    struct ScriptedOracle {
        replies: Mutex<VecDeque<Result<OracleReply>>>,
        delay: Option<Duration>,
    }

    impl ScriptedOracle {
        fn new(replies: Vec<Result<OracleReply>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl SelectionOracle for ScriptedOracle {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn consult(&self, _request: &OracleRequest<'_>) -> Result<OracleReply> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(OrchestrationError::oracle("script exhausted")))
        }
    }

    fn build(
        oracle: Arc<dyn SelectionOracle>,
        source: InMemoryMarketData,
        window_turns: usize,
        limits: TurnLimits,
    ) -> Orchestrator {
        let source: Arc<dyn MarketDataSource> = Arc::new(source);
        let history = Arc::new(LastResultCache::new());
        let registry = create_default_registry(source, history.clone()).unwrap();
        let executor =
            CapabilityExecutor::new(Arc::new(registry), history, DEFAULT_CAPABILITY_TIMEOUT);
        let memory = Arc::new(ConversationMemory::new(MemoryConfig {
            window_turns,
            ..MemoryConfig::default()
        }));
        Orchestrator::new(oracle, executor, memory, IntentPolicy::standard(), limits).unwrap()
    }

    fn offline() -> Orchestrator {
        build(
            Arc::new(KeywordOracle::new()),
            InMemoryMarketData::sample(),
            8,
            TurnLimits::default(),
        )
    }

    #[tokio::test]
    async fn test_news_turn_invokes_only_stock_news() {
        let orchestrator = offline();
        let reply = orchestrator.handle_turn("t-1", "news about TSLA").await;

        assert_eq!(reply.status, TurnStatus::Completed);
        assert_eq!(reply.invoked, vec!["stock_news"]);
        assert!(reply.response.contains("Tesla deliveries beat estimates"));
        assert!(!reply.response.contains("current stock price"));
        assert!(!reply.response.contains("Balance sheet"));
        assert_eq!(reply.policy_version, "2024.1");

        let window = orchestrator.memory().window("t-1").await;
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].content, "news about TSLA");
        assert_eq!(window[1].role, TurnRole::Assistant);
    }

    #[tokio::test]
    async fn test_failed_capability_does_not_abort_turn() {
        let source = InMemoryMarketData::sample().failing(Query::BalanceSheet, "AAPL", "upstream 503");
        let orchestrator = build(Arc::new(KeywordOracle::new()), source, 8, TurnLimits::default());

        let reply = orchestrator.handle_turn("t-1", "tell me about AAPL").await;

        assert_eq!(reply.status, TurnStatus::Completed);
        assert_eq!(reply.invoked, vec!["current_price", "balance_sheet"]);
        assert!(reply.response.contains("The current stock price of AAPL is 185.92"));
        assert!(reply.response.contains("Error fetching balance_sheet for AAPL: upstream 503"));
        assert!(reply
            .reasoning_trace
            .iter()
            .any(|line| line.starts_with("EXECUTING: balance_sheet -> failed")));
    }

    #[tokio::test]
    async fn test_unknown_ticker_reports_no_data() {
        let reply = offline().handle_turn("t-1", "tell me about ZZZZ").await;
        assert_eq!(reply.response, "No data available for ZZZZ");
        assert_eq!(reply.status, TurnStatus::Completed);
    }

    #[tokio::test]
    async fn test_history_then_recall_is_per_thread() {
        let orchestrator = offline();

        let history = orchestrator
            .handle_turn("t-1", "MSFT history from 2024-01-01 to 2024-01-05")
            .await;
        assert!(history.response.starts_with("Price history for MSFT"));

        let recalled = orchestrator.handle_turn("t-1", "show last history").await;
        assert_eq!(recalled.invoked, vec!["last_history"]);
        assert_eq!(recalled.response, history.response);

        let other = orchestrator.handle_turn("t-2", "show last history").await;
        assert_eq!(other.response, NO_PREVIOUS_HISTORY);
    }

    #[tokio::test]
    async fn test_follow_up_resolves_ticker_from_memory() {
        let orchestrator = offline();
        orchestrator.handle_turn("t-1", "tell me about AAPL").await;

        let reply = orchestrator.handle_turn("t-1", "any news?").await;
        assert_eq!(reply.invoked, vec!["stock_news"]);
        assert!(reply.response.contains("Apple opens Vision Pro pre-orders"));
    }

    #[tokio::test]
    async fn test_oracle_error_returns_fallback_and_records_turn() {
        let oracle = ScriptedOracle::new(vec![Err(OrchestrationError::oracle("503 from model"))]);
        let orchestrator = build(
            Arc::new(oracle),
            InMemoryMarketData::sample(),
            8,
            TurnLimits::default(),
        );

        let reply = orchestrator.handle_turn("t-1", "tell me about AAPL").await;
        assert_eq!(reply.response, ORACLE_FALLBACK_REPLY);
        assert_eq!(reply.status, TurnStatus::OracleFailed);
        assert!(reply.invoked.is_empty());

        let window = orchestrator.memory().window("t-1").await;
        assert_eq!(window.len(), 2);
        assert_eq!(window[1].content, ORACLE_FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_oracle_that_never_answers_is_bounded() {
        let call = || -> Result<OracleReply> {
            Ok(OracleReply::Invoke(vec![CapabilityCall::new(
                "current_price",
                json!({"ticker": "AAPL"}),
            )]))
        };
        let oracle = ScriptedOracle::new(vec![call(), call(), call(), call()]);
        let limits = TurnLimits {
            max_passes: 2,
            ..TurnLimits::default()
        };
        let orchestrator = build(Arc::new(oracle), InMemoryMarketData::sample(), 8, limits);

        let reply = orchestrator.handle_turn("t-1", "price of AAPL").await;
        assert_eq!(reply.status, TurnStatus::OracleFailed);
        assert_eq!(reply.invoked.len(), 2);
        assert_eq!(reply.response, ORACLE_FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_calls_over_limit_are_dropped() {
        let calls = (0..5)
            .map(|_| CapabilityCall::new("current_price", json!({"ticker": "MSFT"})))
            .collect();
        let oracle = ScriptedOracle::new(vec![
            Ok(OracleReply::Invoke(calls)),
            Ok(OracleReply::Answer("MSFT is at 388.47".to_string())),
        ]);
        let limits = TurnLimits {
            max_calls_per_pass: 3,
            ..TurnLimits::default()
        };
        let orchestrator = build(Arc::new(oracle), InMemoryMarketData::sample(), 8, limits);

        let reply = orchestrator.handle_turn("t-1", "price of MSFT").await;
        assert_eq!(reply.invoked.len(), 3);
        assert_eq!(reply.response, "MSFT is at 388.47");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_oracle_times_out() {
        let mut oracle = ScriptedOracle::new(vec![Ok(OracleReply::Answer("late".to_string()))]);
        oracle.delay = Some(Duration::from_secs(120));
        let limits = TurnLimits {
            oracle_timeout: Duration::from_secs(5),
            ..TurnLimits::default()
        };
        let orchestrator = build(Arc::new(oracle), InMemoryMarketData::sample(), 8, limits);

        let reply = orchestrator.handle_turn("t-1", "price of AAPL").await;
        assert_eq!(reply.status, TurnStatus::OracleFailed);
        assert!(reply
            .reasoning_trace
            .iter()
            .any(|line| line.contains("timed out after 5s")));
    }

    #[tokio::test]
    async fn test_window_keeps_latest_turns() {
        let orchestrator = build(
            Arc::new(KeywordOracle::new()),
            InMemoryMarketData::sample(),
            4,
            TurnLimits::default(),
        );

        orchestrator.handle_turn("t-1", "price of AAPL").await;
        orchestrator.handle_turn("t-1", "price of MSFT").await;
        orchestrator.handle_turn("t-1", "price of TSLA").await;

        let window = orchestrator.memory().window("t-1").await;
        assert_eq!(window.len(), 4);
        assert_eq!(window[0].content, "price of MSFT");
        assert_eq!(window[2].content, "price of TSLA");
    }

    #[tokio::test]
    async fn test_concurrent_turns_on_one_thread_do_not_interleave() {
        let orchestrator = Arc::new(offline());

        let a = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.handle_turn("t-1", "price of AAPL").await }
        });
        let b = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.handle_turn("t-1", "price of MSFT").await }
        });
        a.await.unwrap();
        b.await.unwrap();

        let roles: Vec<TurnRole> = orchestrator
            .memory()
            .window("t-1")
            .await
            .iter()
            .map(|t| t.role)
            .collect();
        assert_eq!(
            roles,
            vec![TurnRole::User, TurnRole::Assistant, TurnRole::User, TurnRole::Assistant]
        );
    }

    #[tokio::test]
    async fn test_end_thread_clears_memory_and_history() {
        let orchestrator = offline();
        orchestrator
            .handle_turn("t-1", "MSFT history from 2024-01-01 to 2024-01-05")
            .await;

        assert!(orchestrator.end_thread("t-1").await);
        assert!(!orchestrator.memory().contains("t-1"));
        assert_eq!(orchestrator.history_cache().get("t-1"), NO_PREVIOUS_HISTORY);
        assert!(!orchestrator.end_thread("t-1").await);
    }

    #[tokio::test]
    async fn test_thread_cap_releases_cached_history() {
        let source: Arc<dyn MarketDataSource> = Arc::new(InMemoryMarketData::sample());
        let history = Arc::new(LastResultCache::new());
        let registry = create_default_registry(source, history.clone()).unwrap();
        let executor =
            CapabilityExecutor::new(Arc::new(registry), history, DEFAULT_CAPABILITY_TIMEOUT);
        let memory = Arc::new(ConversationMemory::new(MemoryConfig {
            max_threads: 1,
            ..MemoryConfig::default()
        }));
        let orchestrator = Orchestrator::new(
            Arc::new(KeywordOracle::new()),
            executor,
            memory,
            IntentPolicy::standard(),
            TurnLimits::default(),
        )
        .unwrap();

        orchestrator
            .handle_turn("t-1", "MSFT history from 2024-01-01 to 2024-01-05")
            .await;
        assert_eq!(orchestrator.history_cache().len(), 1);

        orchestrator.handle_turn("t-2", "price of AAPL").await;
        assert!(!orchestrator.memory().contains("t-1"));
        assert!(orchestrator.history_cache().is_empty());

        let recalled = orchestrator.handle_turn("t-1", "show last history").await;
        assert_eq!(recalled.response, NO_PREVIOUS_HISTORY);
    }

    #[test]
    fn test_policy_must_match_registry() {
        let source: Arc<dyn MarketDataSource> = Arc::new(InMemoryMarketData::new());
        let history = Arc::new(LastResultCache::new());
        let registry = create_default_registry(source, history.clone()).unwrap();
        let executor = CapabilityExecutor::new(Arc::new(registry), history, DEFAULT_CAPABILITY_TIMEOUT);

        let mut policy = IntentPolicy::standard();
        policy.rules[1].capabilities = vec!["price_target".to_string()];

        let result = Orchestrator::new(
            Arc::new(KeywordOracle::new()),
            executor,
            Arc::new(ConversationMemory::default()),
            policy,
            TurnLimits::default(),
        );
        assert!(matches!(result, Err(OrchestrationError::Config(_))));
    }
}
