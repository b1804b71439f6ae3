//! In-memory broker for paper trading and lifecycle tests.

use super::traits::BrokerApi;
use super::types::*;
use crate::error::{Result, TradingError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A submitted position that the broker has not indexed yet.
#[derive(Debug, Clone)]
struct PendingPosition {
    entry: OpenPositionEntry,
    polls_remaining: u32,
}

/// Simulated broker state.
#[derive(Debug, Default)]
struct MockBrokerState {
    markets: HashMap<String, Market>,
    accounts: Vec<Account>,
    positions: Vec<OpenPositionEntry>,
    pending: Vec<PendingPosition>,
    /// Polls a new position stays invisible for
    listing_delay: u32,
    /// Accept close requests without removing the position
    ignore_close: bool,
    /// Record this trailing step instead of the requested increment
    trailing_step_override: Option<Decimal>,
    /// Answer trailing-stop updates with a server error
    reject_updates: bool,
}

/// Mock broker that simulates the dealing endpoints.
pub struct MockBroker {
    state: RwLock<MockBrokerState>,
    deal_counter: AtomicU64,
    create_calls: AtomicU32,
    update_calls: AtomicU32,
    close_calls: AtomicU32,
    position_polls: AtomicU32,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    /// Create an empty broker with no markets or accounts.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MockBrokerState::default()),
            deal_counter: AtomicU64::new(1),
            create_calls: AtomicU32::new(0),
            update_calls: AtomicU32::new(0),
            close_calls: AtomicU32::new(0),
            position_polls: AtomicU32::new(0),
        }
    }

    /// Paper-trading broker with one bitcoin market and a funded account.
    pub async fn paper(account_id: &str) -> Self {
        let broker = Self::new();
        broker
            .add_market(Self::market(
                "CS.D.BITCOIN.CFD.IP",
                "Bitcoin",
                dec!(50),
                dec!(30000),
                dec!(5),
                dec!(0.1),
            ))
            .await;
        broker.add_account(account_id, dec!(1_000_000)).await;
        broker
    }

    /// Build a market snapshot. The fill level for both directions is `high`.
    pub fn market(
        epic: &str,
        name: &str,
        margin_factor: Decimal,
        high: Decimal,
        min_step_distance: Decimal,
        min_stop_distance_pct: Decimal,
    ) -> Market {
        Market {
            instrument: Instrument {
                epic: epic.to_string(),
                name: name.to_string(),
                margin_factor,
                margin_factor_unit: Some("PERCENTAGE".to_string()),
            },
            dealing_rules: DealingRules {
                min_step_distance: DealingRule {
                    unit: Some("POINTS".to_string()),
                    value: min_step_distance,
                },
                min_normal_stop_or_limit_distance: DealingRule {
                    unit: Some("PERCENTAGE".to_string()),
                    value: min_stop_distance_pct,
                },
            },
            snapshot: MarketSnapshot {
                market_status: Some("TRADEABLE".to_string()),
                high: Some(high),
                low: None,
                bid: Some(high),
                offer: Some(high),
            },
        }
    }

    pub async fn add_market(&self, market: Market) {
        let mut state = self.state.write().await;
        state.markets.insert(market.epic().to_string(), market);
    }

    pub async fn add_account(&self, account_id: &str, available: Decimal) {
        let mut state = self.state.write().await;
        state.accounts.push(Account {
            account_id: account_id.to_string(),
            account_name: "Paper".to_string(),
            balance: AccountBalance {
                balance: available,
                deposit: Decimal::ZERO,
                profit_loss: Decimal::ZERO,
                available,
            },
        });
    }

    /// New positions only show up in the list after `polls` empty polls.
    pub async fn set_listing_delay(&self, polls: u32) {
        self.state.write().await.listing_delay = polls;
    }

    /// Accept close requests but keep listing the position.
    pub async fn set_ignore_close(&self, ignore: bool) {
        self.state.write().await.ignore_close = ignore;
    }

    /// Record `step` as the trailing step no matter what is requested.
    pub async fn set_trailing_step_override(&self, step: Option<Decimal>) {
        self.state.write().await.trailing_step_override = step;
    }

    /// Fail every position update with a 500.
    pub async fn set_reject_updates(&self, reject: bool) {
        self.state.write().await.reject_updates = reject;
    }

    /// Remove a listed position as if its stop had been hit.
    pub async fn stop_out(&self, deal_id: &str) {
        let mut state = self.state.write().await;
        state.positions.retain(|p| p.position.deal_id != deal_id);
        info!(%deal_id, "Mock position stopped out");
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> u32 {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn position_polls(&self) -> u32 {
        self.position_polls.load(Ordering::SeqCst)
    }

    fn next_deal(&self) -> u64 {
        self.deal_counter.fetch_add(1, Ordering::SeqCst)
    }

    fn not_found(what: &str) -> TradingError {
        TradingError::request(404, format!("error.{what}.not-found"))
    }
}

#[async_trait]
impl BrokerApi for MockBroker {
    async fn search_markets(&self, term: &str) -> Result<Vec<MarketSummary>> {
        let state = self.state.read().await;
        let needle = term.to_lowercase();

        let mut matches: Vec<MarketSummary> = state
            .markets
            .values()
            .filter(|m| {
                m.epic().to_lowercase().contains(&needle)
                    || m.instrument.name.to_lowercase().contains(&needle)
            })
            .map(|m| MarketSummary {
                epic: m.epic().to_string(),
                instrument_name: m.instrument.name.clone(),
                expiry: Some("-".to_string()),
            })
            .collect();
        matches.sort_by(|a, b| a.epic.cmp(&b.epic));

        debug!(%term, matches = matches.len(), "Mock market search");
        Ok(matches)
    }

    async fn market_details(&self, epic: &str) -> Result<Market> {
        let state = self.state.read().await;
        state
            .markets
            .get(epic)
            .cloned()
            .ok_or_else(|| Self::not_found("market"))
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        Ok(self.state.read().await.accounts.clone())
    }

    async fn open_positions(&self) -> Result<Vec<OpenPositionEntry>> {
        self.position_polls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;

        let mut still_pending = Vec::new();
        for mut pending in std::mem::take(&mut state.pending) {
            if pending.polls_remaining == 0 {
                state.positions.push(pending.entry);
            } else {
                pending.polls_remaining -= 1;
                still_pending.push(pending);
            }
        }
        state.pending = still_pending;

        Ok(state.positions.clone())
    }

    async fn create_position(&self, order: &OpenPositionRequest) -> Result<DealReference> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;

        let market = state
            .markets
            .get(&order.epic)
            .ok_or_else(|| Self::not_found("market"))?;
        let level = match order.direction {
            Direction::Buy => market.snapshot.offer,
            Direction::Sell => market.snapshot.bid,
        }
        .or(market.snapshot.high)
        .unwrap_or(Decimal::ONE);

        let n = self.next_deal();
        let deal_reference = format!("MOCKREF{n}");
        let entry = OpenPositionEntry {
            position: PositionData {
                deal_id: format!("DIMOCK{n}"),
                deal_reference: deal_reference.clone(),
                direction: order.direction,
                size: order.size,
                level,
                currency: order.currency_code.clone(),
                created_date: Some(chrono::Utc::now().format("%Y/%m/%d %H:%M:%S%.3f").to_string()),
                stop_level: order.stop_level,
                limit_level: order.limit_level,
                trailing_stop_distance: None,
                trailing_step: None,
                controlled_risk: false,
            },
            market: PositionMarket {
                epic: order.epic.clone(),
                instrument_name: market.instrument.name.clone(),
                bid: market.snapshot.bid,
                offer: market.snapshot.offer,
                market_status: market.snapshot.market_status.clone(),
            },
        };

        let polls_remaining = state.listing_delay;
        state.pending.push(PendingPosition {
            entry,
            polls_remaining,
        });

        info!(
            %deal_reference,
            epic = %order.epic,
            direction = %order.direction,
            size = %order.size,
            %level,
            "Mock position opened"
        );

        Ok(DealReference { deal_reference })
    }

    async fn update_position(
        &self,
        deal_id: &str,
        request: &TrailingStopRequest,
    ) -> Result<DealReference> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;
        if state.reject_updates {
            return Err(TradingError::request(500, "error.service.unavailable"));
        }
        let step = state
            .trailing_step_override
            .unwrap_or(request.trailing_stop_increment);

        let MockBrokerState {
            positions, pending, ..
        } = &mut *state;
        let entry = positions
            .iter_mut()
            .chain(pending.iter_mut().map(|p| &mut p.entry))
            .find(|e| e.position.deal_id == deal_id)
            .ok_or_else(|| Self::not_found("position"))?;

        entry.position.trailing_stop_distance = Some(request.trailing_stop_distance);
        entry.position.trailing_step = Some(step);
        entry.position.stop_level = Some(request.stop_level);
        if request.limit_level.is_some() {
            entry.position.limit_level = request.limit_level;
        }

        debug!(%deal_id, "Mock position updated");
        Ok(DealReference {
            deal_reference: format!("MOCKREF{}", self.next_deal()),
        })
    }

    async fn close_position(&self, request: &ClosePositionRequest) -> Result<DealReference> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;

        if !state
            .positions
            .iter()
            .any(|e| e.position.deal_id == request.deal_id)
        {
            return Err(Self::not_found("position"));
        }

        if state.ignore_close {
            debug!(deal_id = %request.deal_id, "Mock close ignored");
        } else {
            state
                .positions
                .retain(|e| e.position.deal_id != request.deal_id);
            info!(deal_id = %request.deal_id, size = %request.size, "Mock position closed");
        }

        Ok(DealReference {
            deal_reference: format!("MOCKREF{}", self.next_deal()),
        })
    }
}
