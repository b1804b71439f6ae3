//! Type definitions for broker API requests and responses.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Deal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// The direction that unwinds a position opened in `self`.
    pub fn opposite(self) -> Self {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    Quote,
}

/// Time in force for OTC orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    ExecuteAndEliminate,
    FillOrKill,
}

// ==================== Session ====================

/// Login request body.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub identifier: &'a str,
    pub password: &'a str,
}

// ==================== Markets ====================

/// Market search response (`GET markets?searchTerm=`, version 1).
#[derive(Debug, Clone, Deserialize)]
pub struct MarketSearchResponse {
    pub markets: Vec<MarketSummary>,
}

/// One search hit.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSummary {
    pub epic: String,
    #[serde(default)]
    pub instrument_name: String,
    #[serde(default)]
    pub expiry: Option<String>,
}

/// Full market details (`GET markets/{epic}`, version 3).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub instrument: Instrument,
    pub dealing_rules: DealingRules,
    pub snapshot: MarketSnapshot,
}

impl Market {
    pub fn epic(&self) -> &str {
        &self.instrument.epic
    }

    /// Margin factor in percent (e.g. 20 = 20%).
    pub fn margin_factor(&self) -> Decimal {
        self.instrument.margin_factor
    }

    /// Price used for sizing: the last seen high.
    pub fn reference_price(&self) -> Option<Decimal> {
        self.snapshot.high
    }

    /// Minimum trailing step, in price points.
    pub fn min_step_distance(&self) -> Decimal {
        self.dealing_rules.min_step_distance.value
    }

    /// Minimum stop/limit distance, in percent of level.
    pub fn min_stop_distance_pct(&self) -> Decimal {
        self.dealing_rules.min_normal_stop_or_limit_distance.value
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub epic: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub margin_factor: Decimal,
    #[serde(default)]
    pub margin_factor_unit: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealingRules {
    pub min_step_distance: DealingRule,
    pub min_normal_stop_or_limit_distance: DealingRule,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DealingRule {
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub value: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    #[serde(default)]
    pub market_status: Option<String>,
    #[serde(default)]
    pub high: Option<Decimal>,
    #[serde(default)]
    pub low: Option<Decimal>,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub offer: Option<Decimal>,
}

// ==================== Accounts ====================

/// Account list (`GET accounts`, version 1).
#[derive(Debug, Clone, Deserialize)]
pub struct AccountsResponse {
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub account_id: String,
    #[serde(default)]
    pub account_name: String,
    pub balance: AccountBalance,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    #[serde(default)]
    pub balance: Decimal,
    #[serde(default)]
    pub deposit: Decimal,
    #[serde(default)]
    pub profit_loss: Decimal,
    #[serde(default)]
    pub available: Decimal,
}

// ==================== Positions ====================

/// Open-position list (`GET positions`, version 2).
#[derive(Debug, Clone, Deserialize)]
pub struct PositionsResponse {
    pub positions: Vec<OpenPositionEntry>,
}

/// One open position together with its market summary.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenPositionEntry {
    pub position: PositionData,
    pub market: PositionMarket,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionData {
    pub deal_id: String,
    pub deal_reference: String,
    pub direction: Direction,
    pub size: Decimal,
    pub level: Decimal,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub created_date: Option<String>,
    #[serde(default)]
    pub stop_level: Option<Decimal>,
    #[serde(default)]
    pub limit_level: Option<Decimal>,
    #[serde(default)]
    pub trailing_stop_distance: Option<Decimal>,
    #[serde(default)]
    pub trailing_step: Option<Decimal>,
    #[serde(default)]
    pub controlled_risk: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionMarket {
    pub epic: String,
    #[serde(default)]
    pub instrument_name: String,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub offer: Option<Decimal>,
    #[serde(default)]
    pub market_status: Option<String>,
}

/// Body of `POST positions/otc` (version 2).
///
/// Unset risk fields are sent as explicit nulls.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPositionRequest {
    pub epic: String,
    pub expiry: String,
    pub direction: Direction,
    #[serde(with = "rust_decimal::serde::float")]
    pub size: Decimal,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub level: Option<Decimal>,
    pub guaranteed_stop: bool,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub stop_level: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub stop_distance: Option<Decimal>,
    pub trailing_stop: Option<bool>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub trailing_stop_increment: Option<Decimal>,
    pub force_open: bool,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub limit_level: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub limit_distance: Option<Decimal>,
    pub quote_id: Option<String>,
    pub currency_code: String,
}

/// Body of `PUT positions/otc/{dealId}` (version 2).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailingStopRequest {
    pub trailing_stop: bool,
    #[serde(with = "rust_decimal::serde::float")]
    pub trailing_stop_distance: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub trailing_stop_increment: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub stop_level: Decimal,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub limit_level: Option<Decimal>,
}

/// Body of the close call (`POST positions/otc` with `_method: DELETE`, version 1).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePositionRequest {
    pub deal_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub size: Decimal,
    pub direction: Direction,
    pub order_type: OrderType,
}

/// Every dealing call answers with a deal reference.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealReference {
    pub deal_reference: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_market_details_decode() {
        let market: Market = serde_json::from_value(json!({
            "instrument": { "epic": "CS.D.BITCOIN.CFD.IP", "name": "Bitcoin", "marginFactor": 50, "marginFactorUnit": "PERCENTAGE" },
            "dealingRules": {
                "minStepDistance": { "unit": "POINTS", "value": 5.0 },
                "minNormalStopOrLimitDistance": { "unit": "PERCENTAGE", "value": 0.1 }
            },
            "snapshot": { "marketStatus": "TRADEABLE", "high": 30123.5, "low": 29000, "bid": 30000, "offer": 30040 }
        }))
        .unwrap();

        assert_eq!(market.epic(), "CS.D.BITCOIN.CFD.IP");
        assert_eq!(market.margin_factor(), dec!(50));
        assert_eq!(market.reference_price(), Some(dec!(30123.5)));
        assert_eq!(market.min_step_distance(), dec!(5));
        assert_eq!(market.min_stop_distance_pct(), dec!(0.1));
    }

    #[test]
    fn test_position_entry_decode_with_nulls() {
        let entry: OpenPositionEntry = serde_json::from_value(json!({
            "position": {
                "dealId": "DIAAAABBBCCC",
                "dealReference": "REF1",
                "direction": "SELL",
                "size": 2,
                "level": 50000.0,
                "currency": "USD",
                "stopLevel": null,
                "limitLevel": null,
                "trailingStopDistance": null,
                "trailingStep": null,
                "controlledRisk": false
            },
            "market": { "epic": "CS.D.BITCOIN.CFD.IP", "instrumentName": "Bitcoin" }
        }))
        .unwrap();

        assert_eq!(entry.position.direction, Direction::Sell);
        assert_eq!(entry.position.size, dec!(2));
        assert_eq!(entry.position.stop_level, None);
        assert_eq!(entry.market.epic, "CS.D.BITCOIN.CFD.IP");
    }

    #[test]
    fn test_trailing_stop_request_encodes_numbers() {
        let request = TrailingStopRequest {
            trailing_stop: true,
            trailing_stop_distance: dec!(1150.000),
            trailing_stop_increment: dec!(500),
            stop_level: dec!(52500),
            limit_level: None,
        };
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["trailingStop"], json!(true));
        assert_eq!(value["trailingStopDistance"], json!(1150.0));
        assert_eq!(value["trailingStopIncrement"], json!(500.0));
        assert!(value.get("limitLevel").is_none());
    }

    #[test]
    fn test_direction_opposite() {
        assert_eq!(Direction::Sell.opposite(), Direction::Buy);
        assert_eq!(Direction::Buy.opposite(), Direction::Sell);
        assert_eq!(Direction::Sell.to_string(), "SELL");
    }
}
