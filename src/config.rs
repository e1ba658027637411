//! Process configuration from environment variables

use crate::agent::{TurnLimits, DEFAULT_MAX_CALLS_PER_PASS, DEFAULT_MAX_PASSES, DEFAULT_ORACLE_TIMEOUT};
use crate::error::OrchestrationError;
use crate::execution::DEFAULT_CAPABILITY_TIMEOUT;
use crate::gemini::DEFAULT_MODEL;
use crate::market_data::yahoo::DEFAULT_BASE_URL;
use crate::memory::threads::{DEFAULT_IDLE_TTL, DEFAULT_MAX_THREADS, DEFAULT_WINDOW_TURNS};
use crate::memory::MemoryConfig;
use crate::Result;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketDataProvider {
    Yahoo,
    /// Built-in sample data, no network.
    Fixture,
}

impl FromStr for MarketDataProvider {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "yahoo" => Ok(Self::Yahoo),
            "fixture" | "sample" => Ok(Self::Fixture),
            other => Err(OrchestrationError::Config(format!(
                "MARKET_DATA_PROVIDER must be yahoo or fixture, got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub market_data_provider: MarketDataProvider,
    pub market_data_base_url: String,
    pub memory: MemoryConfig,
    pub sweep_interval: Duration,
    pub capability_timeout: Duration,
    pub limits: TurnLimits,
    pub intent_policy_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset and blank values take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT").or_else(|| get("API_PORT")) {
            Some(raw) => parse_value("PORT", &raw)?,
            None => DEFAULT_PORT,
        };

        let memory = MemoryConfig {
            window_turns: parse_or(&get, "MEMORY_WINDOW_TURNS", DEFAULT_WINDOW_TURNS)?,
            max_threads: parse_or(&get, "MEMORY_MAX_THREADS", DEFAULT_MAX_THREADS)?,
            idle_ttl: secs_or(&get, "THREAD_IDLE_TTL_SECS", DEFAULT_IDLE_TTL)?,
        };
        if memory.window_turns == 0 || memory.max_threads == 0 {
            return Err(OrchestrationError::Config(
                "MEMORY_WINDOW_TURNS and MEMORY_MAX_THREADS must be positive".to_string(),
            ));
        }

        let limits = TurnLimits {
            max_passes: parse_or(&get, "ORACLE_MAX_PASSES", DEFAULT_MAX_PASSES)?,
            max_calls_per_pass: parse_or(&get, "ORACLE_MAX_CALLS_PER_PASS", DEFAULT_MAX_CALLS_PER_PASS)?,
            oracle_timeout: secs_or(&get, "ORACLE_TIMEOUT_SECS", DEFAULT_ORACLE_TIMEOUT)?,
        };
        if limits.max_passes < 2 {
            // One pass to select, one to answer.
            return Err(OrchestrationError::Config(
                "ORACLE_MAX_PASSES must be at least 2".to_string(),
            ));
        }

        Ok(Self {
            port,
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            market_data_provider: match get("MARKET_DATA_PROVIDER") {
                Some(raw) => raw.parse()?,
                None => MarketDataProvider::Yahoo,
            },
            market_data_base_url: get("MARKET_DATA_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            memory,
            sweep_interval: secs_or(&get, "THREAD_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL)?,
            capability_timeout: secs_or(&get, "CAPABILITY_TIMEOUT_SECS", DEFAULT_CAPABILITY_TIMEOUT)?,
            limits,
            intent_policy_path: get("INTENT_POLICY_PATH").map(PathBuf::from),
        })
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| OrchestrationError::Config(format!("{} has invalid value '{}'", key, raw)))
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn secs_or<G>(get: &G, key: &str, default: Duration) -> Result<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => {
            let secs: u64 = parse_value(key, &raw)?;
            if secs == 0 {
                return Err(OrchestrationError::Config(format!("{} must be positive", key)));
            }
            Ok(Duration::from_secs(secs))
        }
        None => Ok(default),
    }
}
