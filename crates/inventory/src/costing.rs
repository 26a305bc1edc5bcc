//! Tenant-wide weighted-average unit cost.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use partledger_core::{DomainError, DomainResult};

/// Blend incoming stock into the current average.
///
/// `current_qty` is the pre-movement quantity of the part summed over every
/// location of the tenant. The result is not rounded; a blend past the
/// decimal range is a validation error.
pub fn weighted_average_cost(
    current_qty: i64,
    current_avg: Decimal,
    incoming_qty: i64,
    incoming_cost: Decimal,
) -> DomainResult<Decimal> {
    let new_qty = current_qty.saturating_add(incoming_qty);
    if incoming_qty <= 0 || new_qty <= 0 {
        return Ok(incoming_cost);
    }

    Decimal::from(current_qty)
        .checked_mul(current_avg)
        .zip(Decimal::from(incoming_qty).checked_mul(incoming_cost))
        .and_then(|(held, incoming)| held.checked_add(incoming))
        .and_then(|weighted| weighted.checked_div(Decimal::from(new_qty)))
        .ok_or_else(|| DomainError::validation("average cost overflows"))
}

/// Outcome of one average recomputation, kept for logging and responses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostUpdate {
    pub quantity_before: i64,
    pub average_before: Decimal,
    pub incoming_quantity: i64,
    pub incoming_cost: Decimal,
    pub average_after: Decimal,
}

impl CostUpdate {
    pub fn compute(
        quantity_before: i64,
        average_before: Decimal,
        incoming_quantity: i64,
        incoming_cost: Decimal,
    ) -> DomainResult<Self> {
        Ok(Self {
            quantity_before,
            average_before,
            incoming_quantity,
            incoming_cost,
            average_after: weighted_average_cost(
                quantity_before,
                average_before,
                incoming_quantity,
                incoming_cost,
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_receipt_sets_cost() {
        assert_eq!(
            weighted_average_cost(0, Decimal::ZERO, 10, Decimal::from(100)).unwrap(),
            Decimal::from(100)
        );
    }

    #[test]
    fn second_receipt_blends() {
        let first = weighted_average_cost(0, Decimal::ZERO, 10, Decimal::from(100)).unwrap();
        let second = weighted_average_cost(10, first, 10, Decimal::from(200)).unwrap();
        assert_eq!(second, Decimal::from(150));
    }

    #[test]
    fn result_is_not_rounded() {
        // (1 * 1 + 2 * 2) / 3
        let avg = weighted_average_cost(1, Decimal::ONE, 2, Decimal::from(2)).unwrap();
        assert_eq!(avg, Decimal::from(5) / Decimal::from(3));
    }

    #[test]
    fn non_positive_incoming_takes_incoming_cost() {
        assert_eq!(
            weighted_average_cost(10, Decimal::from(5), 0, Decimal::from(9)).unwrap(),
            Decimal::from(9)
        );
    }

    #[test]
    fn blend_past_decimal_range_is_rejected() {
        let err = weighted_average_cost(
            4_000_000_000_000_000_000,
            Decimal::from(100_000_000_000i64),
            1,
            Decimal::ONE,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert!(CostUpdate::compute(1, Decimal::MAX, 1, Decimal::MAX).is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(256))]

            #[test]
            fn average_stays_between_inputs(
                current_qty in 0i64..100_000,
                current_avg in 0u32..1_000_000,
                incoming_qty in 1i64..100_000,
                incoming_cost in 0u32..1_000_000,
            ) {
                let avg_in = Decimal::new(current_avg as i64, 2);
                let cost_in = Decimal::new(incoming_cost as i64, 2);
                let avg = weighted_average_cost(current_qty, avg_in, incoming_qty, cost_in)
                    .unwrap();

                let lo = if current_qty == 0 { cost_in } else { avg_in.min(cost_in) };
                let hi = if current_qty == 0 { cost_in } else { avg_in.max(cost_in) };
                prop_assert!(avg >= lo && avg <= hi, "{avg} not in [{lo}, {hi}]");
            }
        }
    }
}
