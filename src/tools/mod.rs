//! Capability trait and registry
//!
//! A capability is one named, schema-described data fetch. The registry
//! keeps them in registration order, which is the order the selection
//! oracle sees them in. Order carries no priority.

use crate::error::OrchestrationError;
use crate::market_data::MarketDataSource;
use crate::models::Payload;
use crate::state::LastResultCache;
use crate::validation::{DateRange, Ticker};
use crate::Result;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub mod stock;
pub use stock::{BalanceSheetTool, CurrentPriceTool, HistoricalPriceTool, LastHistoryTool, StockNewsTool};

pub const CURRENT_PRICE: &str = "current_price";
pub const HISTORICAL_PRICE: &str = "historical_price";
pub const BALANCE_SHEET: &str = "balance_sheet";
pub const STOCK_NEWS: &str = "stock_news";
pub const LAST_HISTORY: &str = "last_history";

/// Arguments a capability can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentKind {
    /// `ticker`
    Ticker,
    /// `start_date` and `end_date`
    DateRange,
}

/// Name, argument schema and description exposed to the selection oracle.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "parameters")]
    pub argument_schema: Value,
    #[serde(skip)]
    pub arguments: Vec<ArgumentKind>,
}

impl CapabilityDescriptor {
    pub fn new(name: &str, description: &str, arguments: &[ArgumentKind]) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            argument_schema: argument_schema(arguments),
            arguments: arguments.to_vec(),
        }
    }

    pub fn takes(&self, kind: ArgumentKind) -> bool {
        self.arguments.contains(&kind)
    }

    pub fn takes_arguments(&self) -> bool {
        !self.arguments.is_empty()
    }
}

fn argument_schema(arguments: &[ArgumentKind]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for kind in arguments {
        match kind {
            ArgumentKind::Ticker => {
                properties.insert(
                    "ticker".into(),
                    json!({"type": "string", "description": "Stock ticker symbol, e.g. AAPL or RELIANCE.NS"}),
                );
                required.push("ticker");
            }
            ArgumentKind::DateRange => {
                let date = json!({
                    "type": "string",
                    "description": "Date as YYYY-MM-DD (also accepted: DD-MM-YYYY, DD/MM/YYYY, MM/DD/YYYY)"
                });
                properties.insert("start_date".into(), date.clone());
                properties.insert("end_date".into(), date);
                required.extend(["start_date", "end_date"]);
            }
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Validated arguments handed to [`Capability::invoke`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityArgs {
    pub ticker: Option<Ticker>,
    pub range: Option<DateRange>,
}

impl CapabilityArgs {
    pub fn ticker(&self) -> Result<&Ticker> {
        self.ticker
            .as_ref()
            .ok_or_else(|| OrchestrationError::validation("empty ticker"))
    }

    pub fn range(&self) -> Result<&DateRange> {
        self.range
            .as_ref()
            .ok_or_else(|| OrchestrationError::validation("missing date range"))
    }
}

/// Who a capability is running for.
#[derive(Debug, Clone, Copy)]
pub struct InvocationScope<'a> {
    pub thread_id: &'a str,
}

/// A single data-fetching capability
#[async_trait::async_trait]
pub trait Capability: Send + Sync {
    fn descriptor(&self) -> &CapabilityDescriptor;

    /// Fetch and format. `Ok(Payload::NoData)` when the source has nothing;
    /// `Err` only for failures.
    async fn invoke(&self, scope: &InvocationScope<'_>, args: &CapabilityArgs) -> Result<Payload>;
}

/// Capabilities in registration order
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: Vec<Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Result<()> {
        let name = &capability.descriptor().name;
        if self.capabilities.iter().any(|c| &c.descriptor().name == name) {
            return Err(OrchestrationError::DuplicateCapability(name.clone()));
        }
        self.capabilities.push(capability);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Capability>> {
        self.capabilities
            .iter()
            .find(|c| c.descriptor().name == name)
            .cloned()
            .ok_or_else(|| OrchestrationError::CapabilityNotFound(name.to_string()))
    }

    pub fn descriptor(&self, name: &str) -> Result<&CapabilityDescriptor> {
        self.capabilities
            .iter()
            .map(|c| c.descriptor())
            .find(|d| d.name == name)
            .ok_or_else(|| OrchestrationError::CapabilityNotFound(name.to_string()))
    }

    pub fn list(&self) -> Vec<&CapabilityDescriptor> {
        self.capabilities.iter().map(|c| c.descriptor()).collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

/// The five stock capabilities over one data source.
pub fn create_default_registry(
    source: Arc<dyn MarketDataSource>,
    history: Arc<LastResultCache>,
) -> Result<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();

    registry.register(Arc::new(CurrentPriceTool::new(source.clone())))?;
    registry.register(Arc::new(HistoricalPriceTool::new(source.clone())))?;
    registry.register(Arc::new(BalanceSheetTool::new(source.clone())))?;
    registry.register(Arc::new(StockNewsTool::new(source)))?;
    registry.register(Arc::new(LastHistoryTool::new(history)))?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::InMemoryMarketData;

    fn registry() -> CapabilityRegistry {
        create_default_registry(
            Arc::new(InMemoryMarketData::sample()),
            Arc::new(LastResultCache::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_registration_order_is_preserved() {
        let registry = registry();
        let names: Vec<&str> = registry.list().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec![CURRENT_PRICE, HISTORICAL_PRICE, BALANCE_SHEET, STOCK_NEWS, LAST_HISTORY]
        );
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = registry();
        let err = registry
            .register(Arc::new(LastHistoryTool::new(Arc::new(LastResultCache::new()))))
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::DuplicateCapability(name) if name == LAST_HISTORY));
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn test_unknown_name_is_not_found() {
        let registry = registry();
        assert!(matches!(
            registry.descriptor("price_target"),
            Err(OrchestrationError::CapabilityNotFound(_))
        ));
        assert!(registry.get("price_target").is_err());
    }

    #[test]
    fn test_schema_lists_required_arguments() {
        let registry = registry();

        let history = registry.descriptor(HISTORICAL_PRICE).unwrap();
        assert_eq!(
            history.argument_schema["required"],
            json!(["ticker", "start_date", "end_date"])
        );

        let last = registry.descriptor(LAST_HISTORY).unwrap();
        assert!(!last.takes_arguments());
        assert_eq!(last.argument_schema["properties"], json!({}));
    }

    #[test]
    fn test_descriptor_serializes_for_oracle() {
        let registry = registry();
        let value = serde_json::to_value(registry.descriptor(STOCK_NEWS).unwrap()).unwrap();
        assert_eq!(value["name"], STOCK_NEWS);
        assert!(value.get("parameters").is_some());
        assert!(value.get("arguments").is_none());
    }
}
