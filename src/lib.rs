//! # Trailing Stop Trader
//!
//! Opens leveraged OTC positions on a spread-betting/CFD broker, attaches a
//! trailing stop scaled to the fill level, and verifies that the broker
//! recorded exactly what was requested. A position that does not match is
//! closed immediately.
//!
//! ## Architecture
//!
//! - `config`: Configuration loading and validation
//! - `error`: Error taxonomy for trading and stream ingestion
//! - `exchange`: Broker REST session and an in-memory mock broker
//! - `trading`: Sizing, opening, risk attachment, verification and monitoring
//! - `stream`: Filtered social-media post stream with ticker extraction

pub mod config;
pub mod error;
pub mod exchange;
pub mod stream;
pub mod trading;

pub use config::Config;
pub use error::{StreamError, TradingError};
