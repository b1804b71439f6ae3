//! Broker integration.
//!
//! Provides REST connectivity for:
//! - Session login and per-endpoint API versioning
//! - Market search and instrument details
//! - Account balances
//! - Opening, updating and closing OTC positions
//!
//! `MockBroker` implements the same `BrokerApi` surface in memory for paper
//! trading and tests.

pub mod mock;
mod session;
mod traits;
mod types;

pub use mock::MockBroker;
pub use session::{Endpoint, SessionClient};
pub use traits::BrokerApi;
#[cfg(test)]
pub use traits::MockBrokerApi;
pub use types::*;
