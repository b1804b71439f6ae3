//! Position sizing from account balance and margin requirements.

use crate::error::{Result, TradingError};
use crate::exchange::{BrokerApi, Market};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

/// Whole units affordable with `allocation_fraction` of leveraged funds:
/// `floor(available / (margin_factor / 100) * allocation_fraction / high)`.
///
/// Never negative. Fails when the margin factor or reference price is
/// missing or not positive.
pub fn compute_size(
    available: Decimal,
    market: &Market,
    allocation_fraction: Decimal,
) -> Result<Decimal> {
    let margin_factor = market.margin_factor();
    if margin_factor <= Decimal::ZERO {
        return Err(TradingError::InsufficientData(format!(
            "margin factor for {} is {}",
            market.epic(),
            margin_factor
        )));
    }

    let reference_price = market
        .reference_price()
        .filter(|p| *p > Decimal::ZERO)
        .ok_or_else(|| {
            TradingError::InsufficientData(format!("no reference price for {}", market.epic()))
        })?;

    let leveraged_funds = available / (margin_factor / dec!(100));
    let size = (leveraged_funds * allocation_fraction / reference_price)
        .floor()
        .max(Decimal::ZERO);

    debug!(
        epic = %market.epic(),
        %available,
        %margin_factor,
        %reference_price,
        %allocation_fraction,
        %size,
        "Position size computed"
    );

    Ok(size)
}

/// Available funds of `account_id`.
pub async fn available_funds(broker: &dyn BrokerApi, account_id: &str) -> Result<Decimal> {
    broker
        .accounts()
        .await?
        .into_iter()
        .find(|a| a.account_id == account_id)
        .map(|a| a.balance.available)
        .ok_or_else(|| TradingError::AccountNotFound {
            account_id: account_id.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockBroker;
    use proptest::prelude::*;

    fn market(margin_factor: Decimal, high: Decimal) -> Market {
        MockBroker::market("CS.D.BITCOIN.CFD.IP", "Bitcoin", margin_factor, high, dec!(5), dec!(0.1))
    }

    #[test]
    fn test_small_balance_rounds_to_zero() {
        // 10000 / 0.2 * 0.05 / 30000 = 0.083
        let size = compute_size(dec!(10000), &market(dec!(20), dec!(30000)), dec!(0.05)).unwrap();
        assert_eq!(size, Decimal::ZERO);
    }

    #[test]
    fn test_size_is_floored() {
        // 1_000_000 / 0.5 * 0.05 / 30000 = 3.33
        let size =
            compute_size(dec!(1_000_000), &market(dec!(50), dec!(30000)), dec!(0.05)).unwrap();
        assert_eq!(size, dec!(3));
    }

    #[test]
    fn test_negative_balance_is_zero() {
        let size = compute_size(dec!(-500), &market(dec!(20), dec!(100)), dec!(0.05)).unwrap();
        assert_eq!(size, Decimal::ZERO);
    }

    #[test]
    fn test_zero_margin_factor_rejected() {
        let err = compute_size(dec!(10000), &market(dec!(0), dec!(30000)), dec!(0.05)).unwrap_err();
        assert!(matches!(err, TradingError::InsufficientData(_)));
    }

    #[test]
    fn test_missing_high_rejected() {
        let mut m = market(dec!(20), dec!(30000));
        m.snapshot.high = None;
        assert!(matches!(
            compute_size(dec!(10000), &m, dec!(0.05)),
            Err(TradingError::InsufficientData(_))
        ));

        m.snapshot.high = Some(Decimal::ZERO);
        assert!(compute_size(dec!(10000), &m, dec!(0.05)).is_err());
    }

    #[tokio::test]
    async fn test_available_funds_of_configured_account() {
        let broker = MockBroker::new();
        broker.add_account("OTHER", dec!(1)).await;
        broker.add_account("ABC123", dec!(2500.5)).await;

        assert_eq!(available_funds(&broker, "ABC123").await.unwrap(), dec!(2500.5));
        assert!(matches!(
            available_funds(&broker, "MISSING").await,
            Err(TradingError::AccountNotFound { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_size_monotonic_in_balance_and_allocation(
            balance in 0u64..10_000_000,
            extra in 0u64..1_000_000,
            alloc_bp in 1u32..10_000,
            alloc_extra_bp in 0u32..1_000,
            margin in 1u32..100,
            high in 1u64..100_000,
        ) {
            let m = market(Decimal::from(margin), Decimal::from(high));
            let alloc = Decimal::new(alloc_bp as i64, 4);
            let more_alloc = Decimal::new((alloc_bp + alloc_extra_bp) as i64, 4);

            let base = compute_size(Decimal::from(balance), &m, alloc).unwrap();
            let richer = compute_size(Decimal::from(balance + extra), &m, alloc).unwrap();
            let bolder = compute_size(Decimal::from(balance), &m, more_alloc).unwrap();

            prop_assert!(base >= Decimal::ZERO);
            prop_assert_eq!(base, base.trunc());
            prop_assert!(richer >= base);
            prop_assert!(bolder >= base);
        }
    }
}
