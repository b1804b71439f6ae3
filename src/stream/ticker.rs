//! Cashtag extraction.

use crate::error::StreamError;
use regex::Regex;
use serde::{Deserialize, Serialize};

const TICKER_PATTERN: &str = r"\$[a-zA-Z]*";

/// What to do when a post mentions several tickers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickerPolicy {
    /// Keep the first one
    #[default]
    First,
    /// Reject the post
    Strict,
}

/// Pulls `$TICKER` mentions out of post text.
#[derive(Debug, Clone)]
pub struct TickerExtractor {
    pattern: Regex,
    policy: TickerPolicy,
}

impl TickerExtractor {
    pub fn new(policy: TickerPolicy) -> Result<Self, StreamError> {
        Ok(Self {
            pattern: Regex::new(TICKER_PATTERN)?,
            policy,
        })
    }

    /// All tickers in order of appearance, without the `$`. A lone `$` is not a ticker.
    pub fn tickers(&self, text: &str) -> Vec<String> {
        self.pattern
            .find_iter(text)
            .map(|m| m.as_str().trim_start_matches('$'))
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// The single ticker a post is about, if any.
    pub fn extract_ticker(&self, text: &str) -> Result<Option<String>, StreamError> {
        let mut tickers = self.tickers(text);
        match (tickers.len(), self.policy) {
            (0, _) => Ok(None),
            (1, _) | (_, TickerPolicy::First) => Ok(Some(tickers.swap_remove(0))),
            (_, TickerPolicy::Strict) => Err(StreamError::MultipleTickers(tickers)),
        }
    }
}
