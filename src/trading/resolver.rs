//! Instrument lookup by search term or epic.

use crate::error::{Result, TradingError};
use crate::exchange::{BrokerApi, Market};
use tracing::{info, warn};

/// Resolves a tradable market snapshot.
pub struct MarketResolver<'a> {
    broker: &'a dyn BrokerApi,
}

impl<'a> MarketResolver<'a> {
    pub fn new(broker: &'a dyn BrokerApi) -> Self {
        Self { broker }
    }

    /// Search by free text and require exactly one hit.
    ///
    /// An ambiguous term must never silently pick an instrument to trade.
    pub async fn resolve_by_symbol(&self, term: &str) -> Result<Market> {
        let matches = self.broker.search_markets(term).await?;

        if matches.len() != 1 {
            warn!(%term, matches = matches.len(), "Market search is not unique");
            return Err(TradingError::ambiguous_market(term, matches.len()));
        }

        let epic = &matches[0].epic;
        info!(%term, %epic, name = %matches[0].instrument_name, "Market resolved");
        self.resolve_by_id(epic).await
    }

    /// Fetch details for a known epic.
    pub async fn resolve_by_id(&self, epic: &str) -> Result<Market> {
        self.broker.market_details(epic).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{MarketSummary, MockBroker, MockBrokerApi};
    use rust_decimal_macros::dec;

    fn summary(epic: &str) -> MarketSummary {
        MarketSummary {
            epic: epic.to_string(),
            instrument_name: epic.to_string(),
            expiry: None,
        }
    }

    #[tokio::test]
    async fn test_unique_match_fetches_details() {
        let broker = MockBroker::paper("ACC").await;
        let resolver = MarketResolver::new(&broker);

        let market = resolver.resolve_by_symbol("BITCOIN").await.unwrap();
        assert_eq!(market.epic(), "CS.D.BITCOIN.CFD.IP");
        assert_eq!(market.margin_factor(), dec!(50));
    }

    #[tokio::test]
    async fn test_no_match_is_ambiguous() {
        let broker = MockBroker::paper("ACC").await;
        let resolver = MarketResolver::new(&broker);

        let err = resolver.resolve_by_symbol("DOGE").await.unwrap_err();
        assert!(matches!(err, TradingError::AmbiguousMarket { matches: 0, .. }));
    }

    #[tokio::test]
    async fn test_multiple_matches_never_fetch_details() {
        let mut broker = MockBrokerApi::new();
        broker
            .expect_search_markets()
            .returning(|_| Ok(vec![summary("CS.D.BITCOIN.CFD.IP"), summary("CS.D.BITCOIN.TODAY.IP")]));
        broker.expect_market_details().never();

        let resolver = MarketResolver::new(&broker);
        let err = resolver.resolve_by_symbol("BTC").await.unwrap_err();

        match err {
            TradingError::AmbiguousMarket { term, matches } => {
                assert_eq!(term, "BTC");
                assert_eq!(matches, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_by_id_passes_through() {
        let broker = MockBroker::paper("ACC").await;
        let resolver = MarketResolver::new(&broker);

        assert!(resolver.resolve_by_id("CS.D.BITCOIN.CFD.IP").await.is_ok());
        assert!(matches!(
            resolver.resolve_by_id("CS.D.UNKNOWN.IP").await,
            Err(TradingError::Request { status: 404, .. })
        ));
    }
}
