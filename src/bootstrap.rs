//! Component wiring shared by the binaries

use crate::agent::Orchestrator;
use crate::config::{Config, MarketDataProvider};
use crate::execution::CapabilityExecutor;
use crate::gemini::GeminiClient;
use crate::market_data::{InMemoryMarketData, MarketDataSource, YahooFinanceClient};
use crate::memory::ConversationMemory;
use crate::oracle::{GeminiOracle, IntentPolicy, KeywordOracle, SelectionOracle};
use crate::state::LastResultCache;
use crate::tools::create_default_registry;
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};

pub fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let source: Arc<dyn MarketDataSource> = match config.market_data_provider {
        MarketDataProvider::Yahoo => Arc::new(YahooFinanceClient::new(&config.market_data_base_url)?),
        MarketDataProvider::Fixture => Arc::new(InMemoryMarketData::sample()),
    };
    info!(source = source.name(), "Market data source selected");

    let oracle: Arc<dyn SelectionOracle> = match &config.gemini_api_key {
        Some(key) => Arc::new(GeminiOracle::new(GeminiClient::new(
            key.clone(),
            &config.gemini_model,
        )?)),
        None => {
            warn!("GEMINI_API_KEY not set; answering with the offline keyword oracle");
            Arc::new(KeywordOracle::new())
        }
    };

    let policy = match &config.intent_policy_path {
        Some(path) => {
            info!(path = %path.display(), "Loading intent policy");
            IntentPolicy::from_file(path)?
        }
        None => IntentPolicy::standard(),
    };

    let history = Arc::new(LastResultCache::new());
    let registry = create_default_registry(source, Arc::clone(&history))?;
    let executor = CapabilityExecutor::new(Arc::new(registry), history, config.capability_timeout);
    let memory = Arc::new(ConversationMemory::new(config.memory.clone()));

    Orchestrator::new(oracle, executor, memory, policy, config.limits)
}
