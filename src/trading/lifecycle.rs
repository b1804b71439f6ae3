//! Position lifecycle: draft, open, risk, verify, monitor, close.

use crate::config::{ExecutionConfig, PositionConfig, TrailingStopRule};
use crate::error::{Result, TradingError};
use crate::exchange::{BrokerApi, Market, TrailingStopRequest};
use crate::trading::{
    available_funds, compute_size, ConfirmedPosition, DraftSpecification, MarketResolver,
    PollPolicy, PositionOpener, RiskAdjuster, SpecificationVerifier,
};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where a position is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    Draft,
    OpenPending,
    OpenConfirmed,
    RiskApplied,
    Verified,
    ClosedOnMismatch,
    Closed,
}

impl PositionState {
    /// Legal transitions. Nothing leaves `Closed`.
    pub fn can_transition_to(self, next: PositionState) -> bool {
        use PositionState::*;
        matches!(
            (self, next),
            (Draft, OpenPending)
                | (OpenPending, OpenConfirmed)
                | (OpenConfirmed, RiskApplied)
                | (OpenConfirmed, Closed)
                | (RiskApplied, Verified)
                | (RiskApplied, ClosedOnMismatch)
                | (ClosedOnMismatch, Closed)
                | (Verified, Closed)
        )
    }

}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PositionState::Draft => "draft",
            PositionState::OpenPending => "open-pending",
            PositionState::OpenConfirmed => "open-confirmed",
            PositionState::RiskApplied => "risk-applied",
            PositionState::Verified => "verified",
            PositionState::ClosedOnMismatch => "closed-on-mismatch",
            PositionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Records state transitions and rejects illegal ones.
#[derive(Debug, Clone)]
struct StateTracker {
    state: PositionState,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            state: PositionState::Draft,
        }
    }

    fn advance(&mut self, next: PositionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        info!(from = %self.state, to = %next, "Position state");
        self.state = next;
    }
}

/// How to find the market to trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketSource {
    /// Free-text search that must resolve uniquely
    Symbol(String),
    /// Known instrument id
    Epic(String),
}

/// Drives one position from draft to a verified (or unwound) state.
pub struct PositionLifecycle<'a> {
    broker: &'a dyn BrokerApi,
    account_id: String,
    position: PositionConfig,
    execution: ExecutionConfig,
}

impl<'a> PositionLifecycle<'a> {
    pub fn new(
        broker: &'a dyn BrokerApi,
        account_id: impl Into<String>,
        position: PositionConfig,
        execution: ExecutionConfig,
    ) -> Self {
        Self {
            broker,
            account_id: account_id.into(),
            position,
            execution,
        }
    }

    fn poll(&self) -> PollPolicy {
        PollPolicy::from(&self.execution)
    }

    /// Resolve, size and draft a position without submitting anything.
    pub async fn draft(&self, source: &MarketSource) -> Result<(Market, DraftSpecification)> {
        let resolver = MarketResolver::new(self.broker);
        let market = match source {
            MarketSource::Symbol(term) => resolver.resolve_by_symbol(term).await?,
            MarketSource::Epic(epic) => resolver.resolve_by_id(epic).await?,
        };

        let available = available_funds(self.broker, &self.account_id).await?;
        let size = compute_size(available, &market, self.position.allocation_fraction)?;
        if size <= Decimal::ZERO {
            return Err(TradingError::InsufficientData(format!(
                "available funds {} size to zero units of {}",
                available,
                market.epic()
            )));
        }

        let draft = DraftSpecification::new(&market, size, &self.position);
        Ok((market, draft))
    }

    /// Open a position with trailing-stop risk and verify what the broker
    /// recorded. On mismatch the position is closed before the error returns.
    pub async fn open_verified(
        &self,
        source: &MarketSource,
        rule: &TrailingStopRule,
    ) -> Result<OpenPosition<'a>> {
        let mut tracker = StateTracker::new();
        let (market, draft) = self.draft(source).await?;

        let opener = PositionOpener::new(self.broker, self.poll());
        tracker.advance(PositionState::OpenPending);
        let opened = opener.open(&draft).await?;
        tracker.advance(PositionState::OpenConfirmed);

        let (request, position) = match self.attach_risk(&opener, &opened, &market, rule).await {
            Ok(applied) => applied,
            Err(err) => {
                warn!(
                    deal_id = %opened.deal_id,
                    error = %err,
                    "Trailing stop not confirmed, closing unprotected position"
                );
                opener.close(&opened).await?;
                tracker.advance(PositionState::Closed);
                return Err(err);
            }
        };
        tracker.advance(PositionState::RiskApplied);

        let verifier = SpecificationVerifier::new(&opener);
        if let Err(err) = verifier.verify(&draft, &request, &position).await {
            if matches!(err, TradingError::SpecificationMismatch { .. }) {
                tracker.advance(PositionState::ClosedOnMismatch);
                tracker.advance(PositionState::Closed);
            }
            return Err(err);
        }
        tracker.advance(PositionState::Verified);

        Ok(OpenPosition {
            broker: self.broker,
            poll: self.poll(),
            market,
            draft,
            request,
            position,
            tracker,
        })
    }

    /// Submit the trailing stop, then re-read the position it was applied to.
    async fn attach_risk(
        &self,
        opener: &PositionOpener<'_>,
        opened: &ConfirmedPosition,
        market: &Market,
        rule: &TrailingStopRule,
    ) -> Result<(TrailingStopRequest, ConfirmedPosition)> {
        let adjuster = RiskAdjuster::new(self.broker, self.execution.stop_distance_buffer);
        let request = adjuster.apply_trailing_stop(opened, market, rule).await?;
        let position = opener.confirm(&opened.deal_reference).await?;
        Ok((request, position))
    }

    /// Close whatever open position carries `deal_reference`.
    pub async fn close_by_reference(&self, deal_reference: &str) -> Result<ConfirmedPosition> {
        let opener = PositionOpener::new(self.broker, self.poll());
        let position = opener
            .find(deal_reference)
            .await?
            .ok_or_else(|| TradingError::position_not_found(deal_reference, 1))?;
        opener.close(&position).await?;
        Ok(position)
    }
}

/// A verified position and the parameters it was opened with.
pub struct OpenPosition<'a> {
    broker: &'a dyn BrokerApi,
    poll: PollPolicy,
    market: Market,
    draft: DraftSpecification,
    request: TrailingStopRequest,
    position: ConfirmedPosition,
    tracker: StateTracker,
}

impl<'a> OpenPosition<'a> {
    pub fn state(&self) -> PositionState {
        self.tracker.state
    }

    /// Last snapshot read from the broker.
    pub fn position(&self) -> &ConfirmedPosition {
        &self.position
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    pub fn draft(&self) -> &DraftSpecification {
        &self.draft
    }

    /// Trailing-stop parameters that were submitted.
    pub fn request(&self) -> &TrailingStopRequest {
        &self.request
    }

    /// Re-read the position. Returns false, and moves to `Closed`, once the
    /// broker no longer lists it.
    pub async fn refresh(&mut self) -> Result<bool> {
        if self.state() == PositionState::Closed {
            return Ok(false);
        }

        let opener = PositionOpener::new(self.broker, self.poll);
        match opener.find(&self.position.deal_reference).await? {
            Some(position) => {
                self.position = position;
                Ok(true)
            }
            None => {
                info!(deal_id = %self.position.deal_id, "Position no longer listed");
                self.tracker.advance(PositionState::Closed);
                Ok(false)
            }
        }
    }

    /// Close the position on request.
    pub async fn close(&mut self) -> Result<()> {
        if self.state() == PositionState::Closed {
            return Ok(());
        }

        let opener = PositionOpener::new(self.broker, self.poll);
        opener.close(&self.position).await?;
        self.tracker.advance(PositionState::Closed);
        Ok(())
    }

    /// Refresh every `interval` until the position disappears (stopped out or
    /// closed elsewhere) or `shutdown` is set.
    pub async fn monitor(&mut self, interval: Duration, shutdown: &AtomicBool) -> Result<PositionState> {
        while !shutdown.load(Ordering::SeqCst) {
            if !self.refresh().await? {
                break;
            }

            let p = &self.position;
            info!(
                deal_id = %p.deal_id,
                level = %p.level,
                stop_level = ?p.stop_level,
                trailing_stop_distance = ?p.trailing_stop_distance,
                "Position open"
            );

            tokio::time::sleep(interval).await;
        }

        if self.state() != PositionState::Closed {
            warn!(deal_id = %self.position.deal_id, "Monitoring stopped with position still open");
        } else {
            debug!(deal_id = %self.position.deal_id, "Monitoring finished");
        }
        Ok(self.state())
    }
}
