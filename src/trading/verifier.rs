//! Checks that the broker recorded what was requested.
//!
//! Requested values are the draft overlaid with the submitted trailing-stop
//! request; executed values are the confirmed position as re-read after the
//! risk update. A mismatch unwinds the position before reporting.

use crate::error::{Result, TradingError};
use crate::exchange::TrailingStopRequest;
use crate::trading::{ConfirmedPosition, DraftSpecification, PositionOpener};
use std::fmt;
use tracing::{error, info};

/// Fields compared between request and execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecificationField {
    Size,
    Direction,
    Epic,
    TrailingStopDistance,
    StopLevel,
    LimitLevel,
    /// Requested trailing-stop increment vs recorded trailing step.
    TrailingStep,
}

impl SpecificationField {
    /// Comparison order; the first mismatch is reported.
    pub const ALL: [SpecificationField; 7] = [
        SpecificationField::Size,
        SpecificationField::Direction,
        SpecificationField::Epic,
        SpecificationField::TrailingStopDistance,
        SpecificationField::StopLevel,
        SpecificationField::LimitLevel,
        SpecificationField::TrailingStep,
    ];

    /// Broker field name.
    pub fn as_str(self) -> &'static str {
        match self {
            SpecificationField::Size => "size",
            SpecificationField::Direction => "direction",
            SpecificationField::Epic => "epic",
            SpecificationField::TrailingStopDistance => "trailingStopDistance",
            SpecificationField::StopLevel => "stopLevel",
            SpecificationField::LimitLevel => "limitLevel",
            SpecificationField::TrailingStep => "trailingStep",
        }
    }
}

impl fmt::Display for SpecificationField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of comparing requested and executed parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationResult {
    Matched,
    Mismatch(SpecificationField),
}

impl VerificationResult {
    pub fn is_match(&self) -> bool {
        matches!(self, VerificationResult::Matched)
    }
}

/// Pure comparison; no broker calls.
pub fn compare(
    draft: &DraftSpecification,
    request: &TrailingStopRequest,
    position: &ConfirmedPosition,
) -> VerificationResult {
    let field_matches = |field: SpecificationField| match field {
        SpecificationField::Size => draft.size() == position.size,
        SpecificationField::Direction => draft.direction() == position.direction,
        SpecificationField::Epic => draft.epic() == position.epic,
        SpecificationField::TrailingStopDistance => {
            Some(request.trailing_stop_distance) == position.trailing_stop_distance
        }
        SpecificationField::StopLevel => {
            Some(request.stop_level) == position.stop_level
        }
        SpecificationField::LimitLevel => {
            request.limit_level.or(draft.limit_level()) == position.limit_level
        }
        SpecificationField::TrailingStep => {
            Some(request.trailing_stop_increment) == position.trailing_step
        }
    };

    SpecificationField::ALL
        .into_iter()
        .find(|field| !field_matches(*field))
        .map_or(VerificationResult::Matched, VerificationResult::Mismatch)
}

/// Verifies executed parameters and unwinds on mismatch.
pub struct SpecificationVerifier<'o, 'b> {
    opener: &'o PositionOpener<'b>,
}

impl<'o, 'b> SpecificationVerifier<'o, 'b> {
    pub fn new(opener: &'o PositionOpener<'b>) -> Self {
        Self { opener }
    }

    /// Ok when every field matches. Otherwise close the position once and
    /// fail with `SpecificationMismatch`. A close that fails for any reason
    /// surfaces as `CloseVerification` instead.
    pub async fn verify(
        &self,
        draft: &DraftSpecification,
        request: &TrailingStopRequest,
        position: &ConfirmedPosition,
    ) -> Result<()> {
        match compare(draft, request, position) {
            VerificationResult::Matched => {
                info!(deal_id = %position.deal_id, "Position specification verified");
                Ok(())
            }
            VerificationResult::Mismatch(field) => {
                error!(
                    deal_id = %position.deal_id,
                    %field,
                    "Executed position differs from request, closing"
                );
                self.opener.close(position).await?;
                Err(TradingError::specification_mismatch(field.as_str()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PositionConfig, TrailingStopRule};
    use crate::exchange::{DealReference, Direction, MockBroker, MockBrokerApi};
    use crate::trading::{trailing_stop_request, PollPolicy};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const EPIC: &str = "CS.D.BITCOIN.CFD.IP";

    fn fixture() -> (DraftSpecification, TrailingStopRequest, ConfirmedPosition) {
        let market = MockBroker::market(EPIC, "Bitcoin", dec!(50), dec!(50000), dec!(5), dec!(0.1));
        let draft = DraftSpecification::new(&market, dec!(2), &PositionConfig::default());
        let request =
            trailing_stop_request(dec!(50000), &market, &TrailingStopRule::default(), dec!(20));
        let position = ConfirmedPosition {
            deal_id: "DIAAAA".to_string(),
            deal_reference: "REF1".to_string(),
            epic: EPIC.to_string(),
            direction: Direction::Sell,
            size: dec!(2),
            level: dec!(50000),
            currency: "USD".to_string(),
            created_date: None,
            stop_level: Some(dec!(52500.0)),
            limit_level: None,
            trailing_stop_distance: Some(dec!(1150.0)),
            trailing_step: Some(dec!(500.0)),
        };
        (draft, request, position)
    }

    #[test]
    fn test_matching_specification() {
        let (draft, request, position) = fixture();
        assert_eq!(compare(&draft, &request, &position), VerificationResult::Matched);
    }

    type Mutation = fn(&mut ConfirmedPosition);

    fn single_field_changes() -> [(SpecificationField, Mutation); 7] {
        [
            (SpecificationField::Size, |p: &mut ConfirmedPosition| p.size = dec!(3)),
            (SpecificationField::Direction, |p: &mut ConfirmedPosition| p.direction = Direction::Buy),
            (SpecificationField::Epic, |p: &mut ConfirmedPosition| p.epic = "CS.D.ETHUSD.CFD.IP".to_string()),
            (SpecificationField::TrailingStopDistance, |p: &mut ConfirmedPosition| p.trailing_stop_distance = None),
            (SpecificationField::StopLevel, |p: &mut ConfirmedPosition| p.stop_level = Some(dec!(52000))),
            (SpecificationField::LimitLevel, |p: &mut ConfirmedPosition| p.limit_level = Some(dec!(45000))),
            (SpecificationField::TrailingStep, |p: &mut ConfirmedPosition| p.trailing_step = Some(dec!(250))),
        ]
    }

    #[test]
    fn test_each_single_difference_is_named() {
        let changes = single_field_changes();
        assert_eq!(changes.map(|(field, _)| field), SpecificationField::ALL);

        for (field, mutate) in changes {
            let (draft, request, mut position) = fixture();
            mutate(&mut position);
            assert_eq!(
                compare(&draft, &request, &position),
                VerificationResult::Mismatch(field),
                "expected {field} mismatch"
            );
        }
    }

    #[test]
    fn test_requested_limit_level_comes_from_request() {
        let (draft, mut request, mut position) = fixture();
        request.limit_level = Some(dec!(45000));
        position.limit_level = Some(dec!(45000));
        assert!(compare(&draft, &request, &position).is_match());
    }

    #[tokio::test]
    async fn test_match_makes_no_broker_calls() {
        let mut broker = MockBrokerApi::new();
        broker.expect_close_position().never();
        broker.expect_open_positions().never();

        let opener = PositionOpener::new(&broker, PollPolicy::new(1, Duration::ZERO));
        let (draft, request, position) = fixture();

        SpecificationVerifier::new(&opener)
            .verify(&draft, &request, &position)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_any_mismatch_closes_exactly_once() {
        for (field, mutate) in single_field_changes() {
            let (draft, request, mut position) = fixture();
            mutate(&mut position);
            let close_side = position.direction.opposite();

            let mut broker = MockBrokerApi::new();
            broker
                .expect_close_position()
                .withf(move |r| r.deal_id == "DIAAAA" && r.direction == close_side)
                .times(1)
                .returning(|_| {
                    Ok(DealReference {
                        deal_reference: "CLOSE1".to_string(),
                    })
                });
            broker.expect_open_positions().times(1).returning(|| Ok(vec![]));

            let opener = PositionOpener::new(&broker, PollPolicy::new(3, Duration::ZERO));
            let err = SpecificationVerifier::new(&opener)
                .verify(&draft, &request, &position)
                .await
                .unwrap_err();

            match err {
                TradingError::SpecificationMismatch { field: name } => assert_eq!(name, field.as_str()),
                other => panic!("unexpected error for {field}: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_failed_unwind_reports_exposure() {
        let mut broker = MockBrokerApi::new();
        broker
            .expect_close_position()
            .times(1)
            .returning(|_| Err(TradingError::request(503, "unavailable")));
        broker.expect_open_positions().never();

        let opener = PositionOpener::new(&broker, PollPolicy::new(3, Duration::ZERO));
        let (draft, request, mut position) = fixture();
        position.trailing_step = Some(dec!(250));

        let err = SpecificationVerifier::new(&opener)
            .verify(&draft, &request, &position)
            .await
            .unwrap_err();

        assert!(err.leaves_exposure());
        assert!(matches!(err, TradingError::CloseVerification { .. }));
    }
}
