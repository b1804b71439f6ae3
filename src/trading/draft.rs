//! Draft position specification.

use crate::config::PositionConfig;
use crate::exchange::{Direction, Market, OpenPositionRequest, OrderType, TimeInForce};
use rust_decimal::Decimal;

/// Market order built from a market snapshot and a computed size.
///
/// Risk fields stay unset; the trailing stop is attached after the position
/// is confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftSpecification {
    order: OpenPositionRequest,
}

impl DraftSpecification {
    pub fn new(market: &Market, size: Decimal, config: &PositionConfig) -> Self {
        Self {
            order: OpenPositionRequest {
                epic: market.epic().to_string(),
                expiry: "-".to_string(),
                direction: config.direction,
                size,
                order_type: OrderType::Market,
                time_in_force: TimeInForce::FillOrKill,
                level: None,
                guaranteed_stop: false,
                stop_level: None,
                stop_distance: None,
                trailing_stop: None,
                trailing_stop_increment: None,
                force_open: true,
                limit_level: None,
                limit_distance: None,
                quote_id: None,
                currency_code: config.currency_code.clone(),
            },
        }
    }

    /// Wire body submitted to open the position.
    pub fn order(&self) -> &OpenPositionRequest {
        &self.order
    }

    pub fn epic(&self) -> &str {
        &self.order.epic
    }

    pub fn size(&self) -> Decimal {
        self.order.size
    }

    pub fn direction(&self) -> Direction {
        self.order.direction
    }

    pub fn limit_level(&self) -> Option<Decimal> {
        self.order.limit_level
    }
}
