//! Remote market data source
//!
//! Four queries keyed by ticker. Implementations must keep two outcomes
//! apart: "the source has nothing for this ticker" is an empty `Ok`, while
//! transport or format trouble is an `Err`.

use crate::error::OrchestrationError;
use crate::models::{BalanceSheet, NewsItem, PriceBar};
use crate::validation::{DateRange, Ticker};
use crate::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub mod yahoo;
pub use yahoo::YahooFinanceClient;

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Daily closes over the last few sessions, oldest first.
    async fn recent_closes(&self, ticker: &Ticker) -> Result<Vec<f64>>;

    /// Daily bars with `range.start() <= date <= range.end()`.
    async fn price_history(&self, ticker: &Ticker, range: &DateRange) -> Result<Vec<PriceBar>>;

    async fn balance_sheet(&self, ticker: &Ticker) -> Result<Option<BalanceSheet>>;

    async fn news(&self, ticker: &Ticker, limit: usize) -> Result<Vec<NewsItem>>;
}

/// Which query an [`InMemoryMarketData`] failure or call record refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Query {
    RecentCloses,
    PriceHistory,
    BalanceSheet,
    News,
}

/// Fixture-backed source for offline runs and tests.
#[derive(Default)]
pub struct InMemoryMarketData {
    closes: HashMap<String, Vec<f64>>,
    history: HashMap<String, Vec<PriceBar>>,
    balance_sheets: HashMap<String, BalanceSheet>,
    news: HashMap<String, Vec<NewsItem>>,
    failures: HashMap<(Query, String), String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(Query, String)>>,
}

impl InMemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_closes(mut self, ticker: &str, closes: Vec<f64>) -> Self {
        self.closes.insert(ticker.to_string(), closes);
        self
    }

    pub fn with_history(mut self, ticker: &str, bars: Vec<PriceBar>) -> Self {
        self.history.insert(ticker.to_string(), bars);
        self
    }

    pub fn with_balance_sheet(mut self, ticker: &str, sheet: BalanceSheet) -> Self {
        self.balance_sheets.insert(ticker.to_string(), sheet);
        self
    }

    pub fn with_news(mut self, ticker: &str, items: Vec<NewsItem>) -> Self {
        self.news.insert(ticker.to_string(), items);
        self
    }

    /// Make `query` for `ticker` fail with a remote-source error.
    pub fn failing(mut self, query: Query, ticker: &str, reason: &str) -> Self {
        self.failures
            .insert((query, ticker.to_string()), reason.to_string());
        self
    }

    /// Delay every answer, for exercising timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queries served so far, in order.
    pub fn calls(&self) -> Vec<(Query, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// A handful of large caps with plausible figures.
    pub fn sample() -> Self {
        let day = |d: u32| NaiveDate::from_ymd_opt(2024, 1, d).unwrap_or_default();
        let bar = |d: u32, open: f64, close: f64, volume: u64| PriceBar {
            date: day(d),
            open,
            high: open.max(close) + 1.25,
            low: open.min(close) - 1.25,
            close,
            volume,
        };

        Self::new()
            .with_closes("AAPL", vec![181.18, 181.91, 184.25, 185.59, 185.92])
            .with_closes("MSFT", vec![367.75, 368.37, 374.69, 375.79, 388.47])
            .with_closes("TSLA", vec![215.55, 218.89, 219.91, 220.82, 214.65])
            .with_history(
                "MSFT",
                vec![
                    bar(2, 373.86, 370.87, 25_258_600),
                    bar(3, 369.01, 370.60, 23_083_500),
                    bar(4, 370.67, 367.94, 20_901_500),
                    bar(5, 368.97, 367.75, 20_987_000),
                ],
            )
            .with_history(
                "AAPL",
                vec![
                    bar(2, 187.15, 185.64, 82_488_700),
                    bar(3, 184.22, 184.25, 58_414_500),
                    bar(4, 182.15, 181.91, 71_983_600),
                    bar(5, 181.99, 181.18, 62_303_300),
                ],
            )
            .with_balance_sheet(
                "AAPL",
                BalanceSheet {
                    as_of: NaiveDate::from_ymd_opt(2023, 9, 30),
                    total_debt: Some(111_088_000_000.0),
                    net_debt: Some(81_123_000_000.0),
                    cash: Some(29_965_000_000.0),
                    total_assets: Some(352_583_000_000.0),
                    equity: Some(62_146_000_000.0),
                },
            )
            .with_balance_sheet(
                "MSFT",
                BalanceSheet {
                    as_of: NaiveDate::from_ymd_opt(2023, 6, 30),
                    total_debt: Some(79_441_000_000.0),
                    net_debt: Some(12_533_000_000.0),
                    cash: Some(34_704_000_000.0),
                    total_assets: Some(411_976_000_000.0),
                    equity: Some(206_223_000_000.0),
                },
            )
            .with_news(
                "TSLA",
                vec![
                    NewsItem {
                        title: "Tesla deliveries beat estimates in fourth quarter".to_string(),
                        link: Some("https://finance.yahoo.com/news/tesla-deliveries".to_string()),
                        publisher: Some("Reuters".to_string()),
                    },
                    NewsItem {
                        title: "BYD overtakes Tesla in quarterly EV sales".to_string(),
                        link: None,
                        publisher: Some("Bloomberg".to_string()),
                    },
                ],
            )
            .with_news(
                "AAPL",
                vec![NewsItem {
                    title: "Apple opens Vision Pro pre-orders".to_string(),
                    link: None,
                    publisher: Some("CNBC".to_string()),
                }],
            )
    }

    async fn serve(&self, query: Query, ticker: &Ticker) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((query, ticker.to_string()));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.failures.get(&(query, ticker.to_string())) {
            Some(reason) => Err(OrchestrationError::remote(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MarketDataSource for InMemoryMarketData {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn recent_closes(&self, ticker: &Ticker) -> Result<Vec<f64>> {
        self.serve(Query::RecentCloses, ticker).await?;
        Ok(self.closes.get(ticker.as_str()).cloned().unwrap_or_default())
    }

    async fn price_history(&self, ticker: &Ticker, range: &DateRange) -> Result<Vec<PriceBar>> {
        self.serve(Query::PriceHistory, ticker).await?;
        Ok(self
            .history
            .get(ticker.as_str())
            .map(|bars| {
                bars.iter()
                    .filter(|bar| bar.date >= range.start() && bar.date <= range.end())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn balance_sheet(&self, ticker: &Ticker) -> Result<Option<BalanceSheet>> {
        self.serve(Query::BalanceSheet, ticker).await?;
        Ok(self.balance_sheets.get(ticker.as_str()).cloned())
    }

    async fn news(&self, ticker: &Ticker, limit: usize) -> Result<Vec<NewsItem>> {
        self.serve(Query::News, ticker).await?;
        Ok(self
            .news
            .get(ticker.as_str())
            .map(|items| items.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{normalize_date_range, normalize_ticker};

    #[tokio::test]
    async fn test_history_is_filtered_to_range() {
        let source = InMemoryMarketData::sample();
        let ticker = normalize_ticker("msft").unwrap();
        let range = normalize_date_range("2024-01-03", "2024-01-04").unwrap();

        let bars = source.price_history(&ticker, &range).await.unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 370.60);
    }

    #[tokio::test]
    async fn test_unknown_ticker_is_empty_not_error() {
        let source = InMemoryMarketData::sample();
        let ticker = normalize_ticker("ZZZZ").unwrap();

        assert!(source.recent_closes(&ticker).await.unwrap().is_empty());
        assert!(source.balance_sheet(&ticker).await.unwrap().is_none());
        assert!(source.news(&ticker, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure_and_call_log() {
        let source = InMemoryMarketData::sample().failing(Query::News, "TSLA", "rate limited");
        let ticker = normalize_ticker("TSLA").unwrap();

        let err = source.news(&ticker, 5).await.unwrap_err();
        assert_eq!(err.to_string(), "rate limited");
        assert_eq!(source.calls(), vec![(Query::News, "TSLA".to_string())]);
    }
}
