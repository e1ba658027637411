//! Message classifier
//!
//! Pulls the ticker and date range out of free text for the offline oracle:
//! - explicit `$TICKER` or an uppercase token such as `AAPL`, `RELIANCE.NS`
//! - otherwise the word following "about", "for", "of" or "on"
//! - dates in any accepted input format, in the order they appear

use crate::models::{ConversationTurn, TurnRole};
use crate::validation::parse_date;

/// Uppercase tokens that are words, not symbols. Static list, zero allocation.
const NOT_TICKERS: &[&str] = &[
    "I", "A", "OK", "USD", "INR", "EUR", "ETF", "CEO", "CFO", "EPS", "PE", "AI", "IPO", "Q1", "Q2",
    "Q3", "Q4", "YTD", "TTM", "NEWS", "PLEASE", "HI",
];

/// Words after "about"/"for"/"of"/"on" that are never tickers.
const STOPWORDS: &[&str] = &[
    "the", "a", "an", "me", "my", "it", "this", "that", "them", "us", "stock", "stocks", "share",
    "shares", "company", "news", "history", "price", "prices", "today", "now", "last", "latest",
    "recent", "previous", "more", "details", "detail", "analysis", "its", "their", "from",
];

const LEAD_WORDS: &[&str] = &["about", "for", "of", "on"];

/// Interaction classifier
pub struct MessageClassifier;

impl MessageClassifier {
    /// Ticker named in the message, uppercased.
    pub fn extract_ticker(message: &str) -> Option<String> {
        let tokens: Vec<&str> = message.split_whitespace().map(clean_token).collect();

        if let Some(symbol) = tokens
            .iter()
            .find_map(|t| t.strip_prefix('$'))
            .filter(|s| looks_like_symbol(s))
        {
            return Some(symbol.to_uppercase());
        }

        // A shouting message makes every token look like a symbol.
        let shouting = message.chars().filter(|c| c.is_alphabetic()).all(char::is_uppercase);
        if !shouting {
            if let Some(symbol) = tokens.iter().find(|t| is_uppercase_symbol(t)) {
                return Some(symbol.to_string());
            }
        }

        tokens.windows(2).find_map(|pair| {
            let lead = pair[0].to_lowercase();
            let candidate = pair[1];
            let usable = LEAD_WORDS.contains(&lead.as_str())
                && looks_like_symbol(candidate)
                && !STOPWORDS.contains(&candidate.to_lowercase().as_str());
            usable.then(|| candidate.to_uppercase())
        })
    }

    /// Raw date strings in order of appearance.
    pub fn extract_dates(message: &str) -> Vec<String> {
        message
            .split_whitespace()
            .map(clean_token)
            .filter(|t| parse_date(t).is_some())
            .map(str::to_string)
            .collect()
    }

    /// First two dates in the message, as (start, end).
    pub fn extract_date_range(message: &str) -> Option<(String, String)> {
        let mut dates = Self::extract_dates(message).into_iter();
        match (dates.next(), dates.next()) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }

    /// Most recent ticker the user mentioned in the window.
    pub fn ticker_from_history(history: &[ConversationTurn]) -> Option<String> {
        user_turns_newest_first(history).find_map(|t| Self::extract_ticker(&t.content))
    }

    /// Most recent date range the user mentioned in the window.
    pub fn date_range_from_history(history: &[ConversationTurn]) -> Option<(String, String)> {
        user_turns_newest_first(history).find_map(|t| Self::extract_date_range(&t.content))
    }
}

fn user_turns_newest_first(history: &[ConversationTurn]) -> impl Iterator<Item = &ConversationTurn> {
    history.iter().rev().filter(|t| t.role == TurnRole::User)
}

/// Strip surrounding punctuation but keep `$` and inner `.`/`-`/`/`.
fn clean_token(token: &str) -> &str {
    token
        .trim_start_matches(|c: char| !c.is_alphanumeric() && c != '$' && c != '^')
        .trim_end_matches(|c: char| !c.is_alphanumeric())
}

fn looks_like_symbol(token: &str) -> bool {
    (1..=12).contains(&token.len())
        && token.chars().any(|c| c.is_ascii_alphabetic())
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='))
}

fn is_uppercase_symbol(token: &&str) -> bool {
    looks_like_symbol(token)
        && token.len() >= 2
        && !token.chars().any(|c| c.is_ascii_lowercase())
        && !NOT_TICKERS.contains(token)
}
