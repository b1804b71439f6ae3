//! Trailing-stop parameters scaled to the confirmed entry level.

use crate::config::TrailingStopRule;
use crate::error::Result;
use crate::exchange::{BrokerApi, Market, TrailingStopRequest};
use crate::trading::ConfirmedPosition;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

/// Build the trailing-stop update for a position opened at `level`.
///
/// The submitted distance never undercuts
/// `level * min_stop_pct / 100 + buffer`, and the submitted step never
/// undercuts the market's minimum step distance.
pub fn trailing_stop_request(
    level: Decimal,
    market: &Market,
    rule: &TrailingStopRule,
    buffer: Decimal,
) -> TrailingStopRequest {
    let min_stop_distance = level * (market.min_stop_distance_pct() / dec!(100)) + buffer;
    let our_stop_distance = level * rule.trailing_stop_distance;

    let min_step_distance = market.min_step_distance();
    let our_step_distance = level * rule.trailing_step;

    TrailingStopRequest {
        trailing_stop: true,
        trailing_stop_distance: our_stop_distance.max(min_stop_distance),
        trailing_stop_increment: our_step_distance.max(min_step_distance),
        stop_level: rule.stop_level * level,
        limit_level: rule.limit_level.map(|fraction| fraction * level),
    }
}

/// Attaches trailing-stop rules to open positions.
pub struct RiskAdjuster<'a> {
    broker: &'a dyn BrokerApi,
    buffer: Decimal,
}

impl<'a> RiskAdjuster<'a> {
    /// `buffer` is the absolute price margin added to the broker's minimum stop distance.
    pub fn new(broker: &'a dyn BrokerApi, buffer: Decimal) -> Self {
        Self { broker, buffer }
    }

    /// Submit the trailing stop and return exactly what was sent.
    pub async fn apply_trailing_stop(
        &self,
        position: &ConfirmedPosition,
        market: &Market,
        rule: &TrailingStopRule,
    ) -> Result<TrailingStopRequest> {
        let request = trailing_stop_request(position.level, market, rule, self.buffer);

        self.broker
            .update_position(&position.deal_id, &request)
            .await?;

        info!(
            deal_id = %position.deal_id,
            level = %position.level,
            trailing_stop_distance = %request.trailing_stop_distance,
            trailing_stop_increment = %request.trailing_stop_increment,
            stop_level = %request.stop_level,
            "Trailing stop applied"
        );

        Ok(request)
    }
}
