//! Error types for the trading core and the stream ingester.
//!
//! Every failure in the position lifecycle surfaces as a [`TradingError`].
//! The only internal recovery is the close-on-mismatch unwind in the
//! specification verifier; everything else propagates to the caller as-is.

use thiserror::Error;

/// Errors raised while talking to the broker or driving a position.
#[derive(Debug, Error)]
pub enum TradingError {
    /// The broker answered with a status other than the expected success code.
    #[error("request failed ({status}): {body}")]
    Request {
        /// HTTP status code.
        status: u16,
        /// Raw response text.
        body: String,
    },

    /// Connection, TLS or timeout failure before a response arrived.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Login succeeded but the session tokens were missing or unusable.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// A market search did not resolve to exactly one instrument.
    #[error("market search for '{term}' returned {matches} results, expected exactly 1")]
    AmbiguousMarket {
        /// Search term sent to the broker.
        term: String,
        /// Number of instruments returned.
        matches: usize,
    },

    /// Sizing inputs are missing, zero, or produce an empty order.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// The configured account is not in the broker's account list.
    #[error("account not found: {account_id}")]
    AccountNotFound {
        /// Configured account id.
        account_id: String,
    },

    /// A submitted order never showed up in the open-position list.
    #[error("position with deal reference {deal_reference} not found after {attempts} attempts")]
    PositionNotFound {
        /// Deal reference returned at submission.
        deal_reference: String,
        /// Number of polls made.
        attempts: u32,
    },

    /// A close could not be confirmed; the position may still be open.
    #[error("position {deal_id} may still be open after close: {reason}")]
    CloseVerification {
        /// Deal id of the position that failed to close.
        deal_id: String,
        /// Why the close was not confirmed.
        reason: String,
    },

    /// The broker recorded different parameters than requested; the position was closed.
    #[error("position closed due to parameter mismatch: {field}")]
    SpecificationMismatch {
        /// Name of the first mismatching field.
        field: String,
    },
}

impl TradingError {
    /// Creates a request error from status code and body.
    pub fn request(status: u16, body: impl Into<String>) -> Self {
        Self::Request {
            status,
            body: body.into(),
        }
    }

    /// Creates an ambiguous market error.
    pub fn ambiguous_market(term: impl Into<String>, matches: usize) -> Self {
        Self::AmbiguousMarket {
            term: term.into(),
            matches,
        }
    }

    /// Creates a position not found error.
    pub fn position_not_found(deal_reference: impl Into<String>, attempts: u32) -> Self {
        Self::PositionNotFound {
            deal_reference: deal_reference.into(),
            attempts,
        }
    }

    /// Creates a close verification error.
    pub fn close_verification(deal_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CloseVerification {
            deal_id: deal_id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a specification mismatch error.
    pub fn specification_mismatch(field: impl Into<String>) -> Self {
        Self::SpecificationMismatch {
            field: field.into(),
        }
    }

    /// Returns true if an open position may have been left behind.
    #[must_use]
    pub fn leaves_exposure(&self) -> bool {
        matches!(self, Self::CloseVerification { .. })
    }
}

impl From<reqwest::Error> for TradingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_timeout() {
            Self::Transport(format!("timeout: {err}"))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for TradingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result type alias for trading operations.
pub type Result<T> = std::result::Result<T, TradingError>;

/// Errors raised by the post stream ingester.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The stream API answered with an unexpected status.
    #[error("stream request failed ({status}): {body}")]
    Request {
        /// HTTP status code.
        status: u16,
        /// Raw response text.
        body: String,
    },

    /// Connection or read failure.
    #[error("stream transport error: {0}")]
    Transport(String),

    /// A stream line was not the expected JSON shape.
    #[error("stream decode error: {0}")]
    Decode(String),

    /// Strict ticker policy and the post mentions more than one ticker.
    #[error("multiple tickers in post: {0:?}")]
    MultipleTickers(Vec<String>),

    /// The ticker pattern failed to compile.
    #[error("invalid ticker pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Writing a record to disk failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
