//! Yahoo Finance backed market data
//!
//! Uses the public chart, fundamentals-timeseries and search endpoints.
//! A long-lived reqwest::Client is reused for connection pooling.

use crate::error::OrchestrationError;
use crate::market_data::MarketDataSource;
use crate::models::{BalanceSheet, NewsItem, PriceBar};
use crate::validation::{DateRange, Ticker};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Balance-sheet series requested from the timeseries endpoint, in the
/// order of the [`BalanceSheet`] fields they fill.
const BALANCE_SHEET_SERIES: [&str; 5] = [
    "annualTotalDebt",
    "annualNetDebt",
    "annualCashAndCashEquivalents",
    "annualTotalAssets",
    "annualStockholdersEquity",
];

/// Earliest period requested for fundamentals (2015-09-01).
const FUNDAMENTALS_PERIOD_START: i64 = 1_441_065_600;

pub struct YahooFinanceClient {
    client: Client,
    base_url: Url,
}

impl YahooFinanceClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/')).map_err(|e| {
            OrchestrationError::Config(format!("invalid market data base url '{}': {}", base_url, e))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| OrchestrationError::Config("market data base url cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET and decode JSON. Non-success statuses still return the body so
    /// callers can tell "not found" apart from real failures.
    async fn get_json(&self, url: Url, query: &[(&str, String)]) -> Result<(StatusCode, Value)> {
        debug!(url = %url, "Yahoo Finance request");

        let response = self
            .client
            .get(url.clone())
            .query(query)
            .send()
            .await
            .map_err(|e| OrchestrationError::remote(format!("request to {} failed: {}", url.path(), e)))?;

        let status = response.status();
        let body = response.json::<Value>().await.map_err(|e| {
            OrchestrationError::remote(format!("invalid JSON from {} ({}): {}", url.path(), status, e))
        })?;

        Ok((status, body))
    }

    async fn chart(&self, ticker: &Ticker, query: &[(&str, String)]) -> Result<Vec<PriceBar>> {
        let url = self.endpoint(&["v8", "finance", "chart", ticker.as_str()])?;
        let (status, body) = self.get_json(url, query).await?;
        parse_chart(status, body)
    }
}

#[async_trait]
impl MarketDataSource for YahooFinanceClient {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn recent_closes(&self, ticker: &Ticker) -> Result<Vec<f64>> {
        let bars = self
            .chart(
                ticker,
                &[("range", "5d".to_string()), ("interval", "1d".to_string())],
            )
            .await?;
        Ok(bars.into_iter().map(|bar| bar.close).collect())
    }

    async fn price_history(&self, ticker: &Ticker, range: &DateRange) -> Result<Vec<PriceBar>> {
        // period2 is exclusive upstream; ask for the day after `end`.
        let period2 = range
            .end()
            .checked_add_days(Days::new(1))
            .unwrap_or_else(|| range.end());

        let bars = self
            .chart(
                ticker,
                &[
                    ("period1", unix_midnight(range.start()).to_string()),
                    ("period2", unix_midnight(period2).to_string()),
                    ("interval", "1d".to_string()),
                ],
            )
            .await?;

        Ok(bars
            .into_iter()
            .filter(|bar| bar.date >= range.start() && bar.date <= range.end())
            .collect())
    }

    async fn balance_sheet(&self, ticker: &Ticker) -> Result<Option<BalanceSheet>> {
        let url = self.endpoint(&[
            "ws",
            "fundamentals-timeseries",
            "v1",
            "finance",
            "timeseries",
            ticker.as_str(),
        ])?;
        let query = [
            ("symbol", ticker.to_string()),
            ("type", BALANCE_SHEET_SERIES.join(",")),
            ("period1", FUNDAMENTALS_PERIOD_START.to_string()),
            ("period2", Utc::now().timestamp().to_string()),
        ];

        let (status, body) = self.get_json(url, &query).await?;
        if !status.is_success() {
            return Err(upstream_error(status, &body, "/timeseries/error"));
        }
        Ok(parse_balance_sheet(&body))
    }

    async fn news(&self, ticker: &Ticker, limit: usize) -> Result<Vec<NewsItem>> {
        let url = self.endpoint(&["v1", "finance", "search"])?;
        let query = [
            ("q", ticker.to_string()),
            ("quotesCount", "0".to_string()),
            ("newsCount", limit.to_string()),
        ];

        let (status, body) = self.get_json(url, &query).await?;
        if !status.is_success() {
            return Err(upstream_error(status, &body, "/finance/error"));
        }

        let search: SearchResponse = serde_json::from_value(body)
            .map_err(|e| OrchestrationError::remote(format!("unexpected search payload: {}", e)))?;

        Ok(search
            .news
            .into_iter()
            .filter(|item| !item.title.trim().is_empty())
            .take(limit)
            .map(|item| NewsItem {
                title: item.title,
                link: item.link,
                publisher: item.publisher,
            })
            .collect())
    }
}

fn unix_midnight(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

fn upstream_error(status: StatusCode, body: &Value, error_pointer: &str) -> OrchestrationError {
    let detail = body
        .pointer(error_pointer)
        .and_then(|e| e.get("description"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());
    OrchestrationError::remote(format!("upstream returned {}: {}", status, detail))
}

//
// ================= Chart =================
//

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartEnvelope,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    result: Option<Vec<ChartResult>>,
    error: Option<YahooError>,
}

#[derive(Debug, Deserialize)]
struct YahooError {
    code: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

/// Decode a chart payload. Unknown symbols come back as a "Not Found"
/// error object, which is no data rather than a failure.
fn parse_chart(status: StatusCode, body: Value) -> Result<Vec<PriceBar>> {
    let response: ChartResponse = match serde_json::from_value(body) {
        Ok(response) => response,
        Err(e) if status.is_success() => {
            return Err(OrchestrationError::remote(format!("unexpected chart payload: {}", e)))
        }
        Err(_) => return Err(OrchestrationError::remote(format!("upstream returned {}", status))),
    };

    if let Some(error) = response.chart.error {
        if error.code.eq_ignore_ascii_case("Not Found") {
            return Ok(Vec::new());
        }
        return Err(OrchestrationError::remote(format!(
            "upstream returned {}: {}",
            error.code,
            error.description.unwrap_or_default()
        )));
    }
    if !status.is_success() {
        return Err(OrchestrationError::remote(format!("upstream returned {}", status)));
    }

    let Some(result) = response.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(Vec::new());
    };
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let offset = result.meta.gmtoffset;

    let bars = result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            let close = quote.close.get(i).copied().flatten()?;
            let date = DateTime::from_timestamp(ts + offset, 0)?.date_naive();
            let at = |series: &[Option<f64>]| series.get(i).copied().flatten().unwrap_or(close);
            Some(PriceBar {
                date,
                open: at(quote.open.as_slice()),
                high: at(quote.high.as_slice()),
                low: at(quote.low.as_slice()),
                close,
                volume: quote.volume.get(i).copied().flatten().unwrap_or(0),
            })
        })
        .collect();

    Ok(bars)
}

//
// ================= Fundamentals =================
//

/// Latest reported value of each series; `None` when nothing was reported.
fn parse_balance_sheet(body: &Value) -> Option<BalanceSheet> {
    let results = body.pointer("/timeseries/result")?.as_array()?;

    let mut sheet = BalanceSheet::default();
    for series in BALANCE_SHEET_SERIES {
        let latest = results
            .iter()
            .filter_map(|r| r.get(series))
            .filter_map(Value::as_array)
            .flatten()
            .filter(|point| !point.is_null())
            .filter_map(|point| {
                let as_of = point
                    .get("asOfDate")
                    .and_then(Value::as_str)
                    .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())?;
                let raw = point.pointer("/reportedValue/raw").and_then(Value::as_f64)?;
                Some((as_of, raw))
            })
            .max_by_key(|(as_of, _)| *as_of);

        let Some((as_of, raw)) = latest else {
            continue;
        };
        sheet.as_of = sheet.as_of.max(Some(as_of));
        let slot = match series {
            "annualTotalDebt" => &mut sheet.total_debt,
            "annualNetDebt" => &mut sheet.net_debt,
            "annualCashAndCashEquivalents" => &mut sheet.cash,
            "annualTotalAssets" => &mut sheet.total_assets,
            _ => &mut sheet.equity,
        };
        *slot = Some(raw);
    }

    (!sheet.is_empty()).then_some(sheet)
}

//
// ================= Search =================
//

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    news: Vec<SearchNews>,
}

#[derive(Debug, Deserialize)]
struct SearchNews {
    #[serde(default)]
    title: String,
    link: Option<String>,
    publisher: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chart_not_found_is_no_data() {
        let body = json!({
            "chart": {
                "result": null,
                "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}
            }
        });

        let bars = parse_chart(StatusCode::NOT_FOUND, body).unwrap();
        assert!(bars.is_empty());
    }

    #[test]
    fn test_chart_server_error_is_failure() {
        let err = parse_chart(StatusCode::BAD_GATEWAY, json!({"message": "bad gateway"})).unwrap_err();
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn test_chart_rows_skip_missing_closes() {
        let body = json!({
            "chart": {
                "result": [{
                    "meta": {"symbol": "MSFT", "gmtoffset": -18000},
                    "timestamp": [1704205800, 1704292200, 1704378600],
                    "indicators": {"quote": [{
                        "open": [373.86, 369.01, null],
                        "high": [375.90, 373.26, null],
                        "low": [366.77, 368.51, null],
                        "close": [370.87, 370.60, null],
                        "volume": [25258600, 23083500, null]
                    }]}
                }],
                "error": null
            }
        });

        let bars = parse_chart(StatusCode::OK, body).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(bars[1].close, 370.60);
        assert_eq!(bars[1].volume, 23_083_500);
    }

    #[test]
    fn test_balance_sheet_takes_latest_points() {
        let body = json!({
            "timeseries": {
                "result": [
                    {
                        "meta": {"type": ["annualTotalDebt"]},
                        "annualTotalDebt": [
                            {"asOfDate": "2022-09-30", "reportedValue": {"raw": 120.0}},
                            null,
                            {"asOfDate": "2023-09-30", "reportedValue": {"raw": 111.0}}
                        ]
                    },
                    {
                        "meta": {"type": ["annualCashAndCashEquivalents"]},
                        "annualCashAndCashEquivalents": [
                            {"asOfDate": "2023-09-30", "reportedValue": {"raw": 29.9}}
                        ]
                    },
                    {"meta": {"type": ["annualNetDebt"]}}
                ],
                "error": null
            }
        });

        let sheet = parse_balance_sheet(&body).unwrap();
        assert_eq!(sheet.total_debt, Some(111.0));
        assert_eq!(sheet.cash, Some(29.9));
        assert_eq!(sheet.net_debt, None);
        assert_eq!(sheet.as_of, NaiveDate::from_ymd_opt(2023, 9, 30));
    }

    #[test]
    fn test_balance_sheet_without_points_is_none() {
        let body = json!({"timeseries": {"result": [{"meta": {"type": ["annualTotalDebt"]}}]}});
        assert!(parse_balance_sheet(&body).is_none());
    }

    #[test]
    fn test_endpoint_encodes_ticker_segment() {
        let client = YahooFinanceClient::new("https://query2.finance.yahoo.com/").unwrap();
        let url = client.endpoint(&["v8", "finance", "chart", "BRK/B"]).unwrap();
        assert_eq!(url.as_str(), "https://query2.finance.yahoo.com/v8/finance/chart/BRK%2FB");
    }
}
