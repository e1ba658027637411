//! The stock capabilities
//!
//! Each one fetches from the market data source and formats the answer as
//! text (or a table) the oracle can quote directly.

use crate::market_data::MarketDataSource;
use crate::models::{BalanceSheet, NewsItem, Payload, PriceTable};
use crate::state::LastResultCache;
use crate::tools::{
    ArgumentKind, Capability, CapabilityArgs, CapabilityDescriptor, InvocationScope, BALANCE_SHEET,
    CURRENT_PRICE, HISTORICAL_PRICE, LAST_HISTORY, STOCK_NEWS,
};
use crate::validation::Ticker;
use crate::Result;
use std::fmt::Write;
use std::sync::Arc;

/// Headlines returned by `stock_news`.
pub const NEWS_LIMIT: usize = 5;

pub struct CurrentPriceTool {
    source: Arc<dyn MarketDataSource>,
    descriptor: CapabilityDescriptor,
}

impl CurrentPriceTool {
    pub fn new(source: Arc<dyn MarketDataSource>) -> Self {
        Self {
            source,
            descriptor: CapabilityDescriptor::new(
                CURRENT_PRICE,
                "Returns the current (latest close) stock price for a ticker symbol.",
                &[ArgumentKind::Ticker],
            ),
        }
    }
}

#[async_trait::async_trait]
impl Capability for CurrentPriceTool {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, _scope: &InvocationScope<'_>, args: &CapabilityArgs) -> Result<Payload> {
        let ticker = args.ticker()?;
        let closes = self.source.recent_closes(ticker).await?;

        Ok(match closes.last() {
            Some(price) => Payload::Text(format!(
                "The current stock price of {} is {:.2}",
                ticker, price
            )),
            None => Payload::NoData(format!("No price data available for {}", ticker)),
        })
    }
}

pub struct HistoricalPriceTool {
    source: Arc<dyn MarketDataSource>,
    descriptor: CapabilityDescriptor,
}

impl HistoricalPriceTool {
    pub fn new(source: Arc<dyn MarketDataSource>) -> Self {
        Self {
            source,
            descriptor: CapabilityDescriptor::new(
                HISTORICAL_PRICE,
                "Returns the daily price history (date, open, high, low, close, volume) for a ticker symbol between a start and end date, both inclusive.",
                &[ArgumentKind::Ticker, ArgumentKind::DateRange],
            ),
        }
    }
}

#[async_trait::async_trait]
impl Capability for HistoricalPriceTool {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, _scope: &InvocationScope<'_>, args: &CapabilityArgs) -> Result<Payload> {
        let ticker = args.ticker()?;
        let range = args.range()?;
        let bars = self.source.price_history(ticker, range).await?;

        if bars.is_empty() {
            return Ok(Payload::NoData(format!(
                "No historical data found for {}",
                ticker
            )));
        }

        Ok(Payload::Table(PriceTable {
            ticker: ticker.to_string(),
            bars,
        }))
    }
}

pub struct BalanceSheetTool {
    source: Arc<dyn MarketDataSource>,
    descriptor: CapabilityDescriptor,
}

impl BalanceSheetTool {
    pub fn new(source: Arc<dyn MarketDataSource>) -> Self {
        Self {
            source,
            descriptor: CapabilityDescriptor::new(
                BALANCE_SHEET,
                "Returns key balance sheet figures (total debt, net debt, cash, total assets, equity) for a ticker symbol.",
                &[ArgumentKind::Ticker],
            ),
        }
    }
}

#[async_trait::async_trait]
impl Capability for BalanceSheetTool {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, _scope: &InvocationScope<'_>, args: &CapabilityArgs) -> Result<Payload> {
        let ticker = args.ticker()?;

        Ok(match self.source.balance_sheet(ticker).await? {
            Some(sheet) if !sheet.is_empty() => Payload::Text(format_balance_sheet(ticker, &sheet)),
            _ => Payload::NoData(format!("No balance sheet found for {}", ticker)),
        })
    }
}

pub struct StockNewsTool {
    source: Arc<dyn MarketDataSource>,
    descriptor: CapabilityDescriptor,
}

impl StockNewsTool {
    pub fn new(source: Arc<dyn MarketDataSource>) -> Self {
        Self {
            source,
            descriptor: CapabilityDescriptor::new(
                STOCK_NEWS,
                "Returns up to five recent news headlines for a ticker symbol.",
                &[ArgumentKind::Ticker],
            ),
        }
    }
}

#[async_trait::async_trait]
impl Capability for StockNewsTool {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, _scope: &InvocationScope<'_>, args: &CapabilityArgs) -> Result<Payload> {
        let ticker = args.ticker()?;
        let items = self.source.news(ticker, NEWS_LIMIT).await?;

        if items.is_empty() {
            return Ok(Payload::NoData(format!("No news found for {}", ticker)));
        }
        Ok(Payload::Text(format_headlines(ticker, &items)))
    }
}

pub struct LastHistoryTool {
    cache: Arc<LastResultCache>,
    descriptor: CapabilityDescriptor,
}

impl LastHistoryTool {
    pub fn new(cache: Arc<LastResultCache>) -> Self {
        Self {
            cache,
            descriptor: CapabilityDescriptor::new(
                LAST_HISTORY,
                "Returns the most recent historical price table fetched in this conversation. Takes no arguments.",
                &[],
            ),
        }
    }
}

#[async_trait::async_trait]
impl Capability for LastHistoryTool {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, scope: &InvocationScope<'_>, _args: &CapabilityArgs) -> Result<Payload> {
        Ok(Payload::Text(self.cache.get(scope.thread_id)))
    }
}

fn format_balance_sheet(ticker: &Ticker, sheet: &BalanceSheet) -> String {
    let mut out = match sheet.as_of {
        Some(date) => format!("Balance sheet for {} (as of {}):", ticker, date.format("%Y-%m-%d")),
        None => format!("Balance sheet for {}:", ticker),
    };

    let rows = [
        ("Total Debt", sheet.total_debt),
        ("Net Debt", sheet.net_debt),
        ("Cash", sheet.cash),
        ("Total Assets", sheet.total_assets),
        ("Equity", sheet.equity),
    ];
    for (label, value) in rows {
        let _ = write!(
            out,
            "\n{}: {}",
            label,
            value.map(format_amount).unwrap_or_else(|| "n/a".to_string())
        );
    }
    out
}

fn format_headlines(ticker: &Ticker, items: &[NewsItem]) -> String {
    let mut out = format!("Latest headlines for {}:", ticker);
    for (i, item) in items.iter().enumerate() {
        let _ = write!(out, "\n{}. {}", i + 1, item.title);
        if let Some(publisher) = &item.publisher {
            let _ = write!(out, " ({})", publisher);
        }
        if let Some(link) = &item.link {
            let _ = write!(out, "\n   {}", link);
        }
    }
    out
}

/// Compact figure: 111088000000 → "111.09B".
fn format_amount(value: f64) -> String {
    let magnitude = value.abs();
    if magnitude >= 1e12 {
        format!("{:.2}T", value / 1e12)
    } else if magnitude >= 1e9 {
        format!("{:.2}B", value / 1e9)
    } else if magnitude >= 1e6 {
        format!("{:.2}M", value / 1e6)
    } else {
        format!("{:.2}", value)
    }
}
