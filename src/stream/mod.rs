//! Social-media post stream ingestion.
//!
//! Installs filter rules, holds the streaming connection open, extracts the
//! cashtag each post mentions and hands the result to a [`PostSink`].
//! Independent of the trading core.

mod client;
mod sink;
mod ticker;
mod types;

pub use client::{parse_post, StreamClient};
pub use sink::{FileSink, PostSink};
pub use ticker::{TickerExtractor, TickerPolicy};
pub use types::{InstalledRule, PostRecord, StreamRule};
