//! Opening, confirming and closing positions.

use crate::config::ExecutionConfig;
use crate::error::{Result, TradingError};
use crate::exchange::{BrokerApi, ClosePositionRequest, Direction, OpenPositionEntry, OrderType};
use crate::trading::DraftSpecification;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Bounded wait for the broker to index (or drop) a position.
///
/// Attempt `n` is followed by a sleep of `n * interval` unless it was the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl PollPolicy {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            interval,
        }
    }

    /// Delay after a failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.interval * attempt
    }
}

impl From<&ExecutionConfig> for PollPolicy {
    fn from(config: &ExecutionConfig) -> Self {
        Self::new(
            config.poll_attempts,
            Duration::from_millis(config.poll_interval_ms),
        )
    }
}

/// A position the broker has accepted and lists as open.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedPosition {
    pub deal_id: String,
    pub deal_reference: String,
    pub epic: String,
    pub direction: Direction,
    pub size: Decimal,
    pub level: Decimal,
    pub currency: String,
    pub created_date: Option<String>,
    pub stop_level: Option<Decimal>,
    pub limit_level: Option<Decimal>,
    pub trailing_stop_distance: Option<Decimal>,
    pub trailing_step: Option<Decimal>,
}

impl From<OpenPositionEntry> for ConfirmedPosition {
    fn from(entry: OpenPositionEntry) -> Self {
        let p = entry.position;
        Self {
            deal_id: p.deal_id,
            deal_reference: p.deal_reference,
            epic: entry.market.epic,
            direction: p.direction,
            size: p.size,
            level: p.level,
            currency: p.currency,
            created_date: p.created_date,
            stop_level: p.stop_level,
            limit_level: p.limit_level,
            trailing_stop_distance: p.trailing_stop_distance,
            trailing_step: p.trailing_step,
        }
    }
}

/// Submits orders and waits for the broker to reflect them.
pub struct PositionOpener<'a> {
    broker: &'a dyn BrokerApi,
    poll: PollPolicy,
}

impl<'a> PositionOpener<'a> {
    pub fn new(broker: &'a dyn BrokerApi, poll: PollPolicy) -> Self {
        Self { broker, poll }
    }

    /// Submit the draft as a market order and wait until it is listed.
    pub async fn open(&self, draft: &DraftSpecification) -> Result<ConfirmedPosition> {
        let reference = self.broker.create_position(draft.order()).await?;

        info!(
            deal_reference = %reference.deal_reference,
            epic = %draft.epic(),
            direction = %draft.direction(),
            size = %draft.size(),
            "Position order submitted"
        );

        self.confirm(&reference.deal_reference).await
    }

    /// Poll the open-position list until `deal_reference` shows up.
    pub async fn confirm(&self, deal_reference: &str) -> Result<ConfirmedPosition> {
        for attempt in 1..=self.poll.attempts {
            if let Some(position) = self.find(deal_reference).await? {
                debug!(%deal_reference, attempt, deal_id = %position.deal_id, "Position confirmed");
                return Ok(position);
            }

            if attempt < self.poll.attempts {
                debug!(%deal_reference, attempt, "Position not listed yet, waiting");
                tokio::time::sleep(self.poll.delay(attempt)).await;
            }
        }

        warn!(%deal_reference, attempts = self.poll.attempts, "Position never appeared");
        Err(TradingError::position_not_found(
            deal_reference,
            self.poll.attempts,
        ))
    }

    /// Single lookup of `deal_reference` in the open-position list.
    pub async fn find(&self, deal_reference: &str) -> Result<Option<ConfirmedPosition>> {
        let positions = self.broker.open_positions().await?;
        Ok(positions
            .into_iter()
            .find(|e| e.position.deal_reference == deal_reference)
            .map(ConfirmedPosition::from))
    }

    /// Offset the position and wait until it is no longer listed.
    ///
    /// Any failure, including a rejected close request, is reported as
    /// `CloseVerification` since the position may still be open.
    pub async fn close(&self, position: &ConfirmedPosition) -> Result<()> {
        match self.try_close(position).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                error!(deal_id = %position.deal_id, "Position still open after close");
                Err(TradingError::close_verification(
                    &position.deal_id,
                    format!("still listed after {} polls", self.poll.attempts),
                ))
            }
            Err(e) => {
                error!(deal_id = %position.deal_id, error = %e, "Close failed");
                Err(TradingError::close_verification(&position.deal_id, e.to_string()))
            }
        }
    }

    /// Submit the close and poll. `Ok(false)` when the position stays listed.
    async fn try_close(&self, position: &ConfirmedPosition) -> Result<bool> {
        let request = ClosePositionRequest {
            deal_id: position.deal_id.clone(),
            size: position.size,
            direction: position.direction.opposite(),
            order_type: OrderType::Market,
        };

        let reference = self.broker.close_position(&request).await?;
        info!(
            deal_id = %position.deal_id,
            close_reference = %reference.deal_reference,
            direction = %request.direction,
            size = %request.size,
            "Close order submitted"
        );

        for attempt in 1..=self.poll.attempts {
            let positions = self.broker.open_positions().await?;
            if !positions
                .iter()
                .any(|e| e.position.deal_id == position.deal_id)
            {
                info!(deal_id = %position.deal_id, "Position closed");
                return Ok(true);
            }

            if attempt < self.poll.attempts {
                tokio::time::sleep(self.poll.delay(attempt)).await;
            }
        }

        Ok(false)
    }
}
