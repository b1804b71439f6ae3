//! Narrow broker capability used by every trading component.
//!
//! Components borrow a `BrokerApi` instead of inheriting headers and session
//! state from the object that built them. The live [`SessionClient`] and the
//! in-memory [`MockBroker`] both implement it.
//!
//! [`SessionClient`]: super::SessionClient
//! [`MockBroker`]: super::MockBroker

use super::types::*;
use crate::error::Result;
use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

/// Broker calls the position lifecycle depends on.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Free-text instrument search.
    async fn search_markets(&self, term: &str) -> Result<Vec<MarketSummary>>;

    /// Full details for one instrument.
    async fn market_details(&self, epic: &str) -> Result<Market>;

    /// Every account visible to the session.
    async fn accounts(&self) -> Result<Vec<Account>>;

    /// Every open position on the session's account.
    async fn open_positions(&self) -> Result<Vec<OpenPositionEntry>>;

    /// Submit a new position; answers with its deal reference.
    async fn create_position(&self, order: &OpenPositionRequest) -> Result<DealReference>;

    /// Attach stop/trailing parameters to an open position.
    async fn update_position(
        &self,
        deal_id: &str,
        request: &TrailingStopRequest,
    ) -> Result<DealReference>;

    /// Submit the offsetting order for an open position.
    async fn close_position(&self, request: &ClosePositionRequest) -> Result<DealReference>;
}
