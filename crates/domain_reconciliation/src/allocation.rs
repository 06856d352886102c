//! Cost-center allocation engine
//!
//! Splits a transaction's value across cost centers. Percentages must sum
//! to 100 within a 0.01 tolerance; values are computed with banker's
//! rounding and the rounding residual always lands on the LAST split in
//! input order, so the values sum exactly to the transaction amount.
//!
//! Planning a split is pure: nothing is persisted until the state machine
//! commits a reconciliation carrying the planned allocations.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use core_kernel::{AllocationId, CostCenterId, Money};

use crate::error::ValidationError;

/// One cost center's requested share, in percent (0-100)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRequest {
    pub cost_center_id: CostCenterId,
    pub percentage: Decimal,
}

impl SplitRequest {
    pub fn new(cost_center_id: CostCenterId, percentage: Decimal) -> Self {
        Self {
            cost_center_id,
            percentage,
        }
    }

    /// Splits evenly across the given cost centers.
    ///
    /// Shares are rounded to two decimal places; the last share absorbs the
    /// percentage remainder so the set always sums to exactly 100.
    pub fn even(cost_centers: &[CostCenterId]) -> Vec<SplitRequest> {
        let n = cost_centers.len();
        if n == 0 {
            return Vec::new();
        }
        let share = (dec!(100) / Decimal::from(n as u64)).round_dp(2);
        let mut splits: Vec<SplitRequest> = cost_centers
            .iter()
            .map(|&cc| SplitRequest::new(cc, share))
            .collect();
        let assigned: Decimal = share * Decimal::from((n - 1) as u64);
        if let Some(last) = splits.last_mut() {
            last.percentage = dec!(100) - assigned;
        }
        splits
    }
}

/// A computed share of a transaction's value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub cost_center_id: CostCenterId,
    pub percentage: Decimal,
    pub value: Money,
}

/// A validated set of split requests
///
/// Construction validates the set; [`SplitSet::allocate`] computes values
/// for a concrete amount.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitSet {
    splits: Vec<SplitRequest>,
}

/// Permitted drift between the percentage sum and 100
const PERCENT_TOLERANCE: Decimal = dec!(0.01);

impl SplitSet {
    /// Validates and wraps a split request set
    pub fn new(splits: Vec<SplitRequest>) -> Result<Self, ValidationError> {
        if splits.is_empty() {
            return Err(ValidationError::EmptySplitSet);
        }

        for (i, split) in splits.iter().enumerate() {
            if split.percentage <= Decimal::ZERO || split.percentage > dec!(100) {
                return Err(ValidationError::PercentageOutOfRange {
                    cost_center: split.cost_center_id,
                    percentage: split.percentage,
                });
            }
            if splits[..i]
                .iter()
                .any(|earlier| earlier.cost_center_id == split.cost_center_id)
            {
                return Err(ValidationError::DuplicateCostCenter(split.cost_center_id));
            }
        }

        let total: Decimal = splits.iter().map(|s| s.percentage).sum();
        if (total - dec!(100)).abs() > PERCENT_TOLERANCE {
            return Err(ValidationError::PercentageSumOutOfTolerance { total });
        }

        Ok(Self { splits })
    }

    pub fn splits(&self) -> &[SplitRequest] {
        &self.splits
    }

    /// Computes the allocation for each split against `amount`.
    ///
    /// Pure; safe to call for previews. Values use banker's rounding, with
    /// the residual assigned to the last split so the total is exact.
    pub fn allocate(&self, amount: Money) -> Result<Vec<Allocation>, ValidationError> {
        let percentages: Vec<Decimal> = self.splits.iter().map(|s| s.percentage).collect();
        let values = amount
            .split_by_percentages(&percentages)
            .map_err(|_| ValidationError::EmptySplitSet)?;

        Ok(self
            .splits
            .iter()
            .zip(values)
            .map(|(split, value)| Allocation {
                id: AllocationId::new_v7(),
                cost_center_id: split.cost_center_id,
                percentage: split.percentage,
                value,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::Currency;

    fn amount(minor: i64) -> Money {
        Money::from_minor(minor, Currency::Brl)
    }

    #[test]
    fn test_empty_split_set_is_rejected() {
        assert_eq!(
            SplitSet::new(Vec::new()).unwrap_err(),
            ValidationError::EmptySplitSet
        );
    }

    #[test]
    fn test_percentages_must_sum_to_100() {
        let splits = vec![
            SplitRequest::new(CostCenterId::new(), dec!(50)),
            SplitRequest::new(CostCenterId::new(), dec!(40)),
        ];
        assert_eq!(
            SplitSet::new(splits).unwrap_err(),
            ValidationError::PercentageSumOutOfTolerance { total: dec!(90) }
        );
    }

    #[test]
    fn test_tolerance_admits_tiny_drift() {
        let splits = vec![
            SplitRequest::new(CostCenterId::new(), dec!(33.33)),
            SplitRequest::new(CostCenterId::new(), dec!(33.33)),
            SplitRequest::new(CostCenterId::new(), dec!(33.33)),
        ];
        // 99.99 is within the 0.01 tolerance
        assert!(SplitSet::new(splits).is_ok());
    }

    #[test]
    fn test_duplicate_cost_center_is_rejected() {
        let cc = CostCenterId::new();
        let splits = vec![
            SplitRequest::new(cc, dec!(50)),
            SplitRequest::new(cc, dec!(50)),
        ];
        assert_eq!(
            SplitSet::new(splits).unwrap_err(),
            ValidationError::DuplicateCostCenter(cc)
        );
    }

    #[test]
    fn test_zero_percentage_is_rejected() {
        let cc = CostCenterId::new();
        let splits = vec![
            SplitRequest::new(CostCenterId::new(), dec!(100)),
            SplitRequest::new(cc, dec!(0)),
        ];
        assert_eq!(
            SplitSet::new(splits).unwrap_err(),
            ValidationError::PercentageOutOfRange {
                cost_center: cc,
                percentage: dec!(0),
            }
        );
    }

    #[test]
    fn test_rounding_residual_goes_to_last_split() {
        let splits = SplitSet::new(vec![
            SplitRequest::new(CostCenterId::new(), dec!(33.33)),
            SplitRequest::new(CostCenterId::new(), dec!(33.33)),
            SplitRequest::new(CostCenterId::new(), dec!(33.34)),
        ])
        .unwrap();

        let allocations = splits.allocate(amount(1000)).unwrap();
        let minors: Vec<i64> = allocations.iter().map(|a| a.value.to_minor()).collect();
        assert_eq!(minors, vec![333, 333, 334]);
    }

    #[test]
    fn test_single_split_takes_full_amount() {
        let splits =
            SplitSet::new(vec![SplitRequest::new(CostCenterId::new(), dec!(100))]).unwrap();
        let allocations = splits.allocate(amount(18_500_00)).unwrap();
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].value.to_minor(), 18_500_00);
    }

    #[test]
    fn test_even_split_sums_to_100() {
        let ccs: Vec<CostCenterId> = (0..3).map(|_| CostCenterId::new()).collect();
        let splits = SplitRequest::even(&ccs);
        let total: Decimal = splits.iter().map(|s| s.percentage).sum();
        assert_eq!(total, dec!(100));
        assert_eq!(splits[0].percentage, dec!(33.33));
        assert_eq!(splits[2].percentage, dec!(33.34));
    }

    #[test]
    fn test_preview_is_pure() {
        let splits = SplitSet::new(vec![
            SplitRequest::new(CostCenterId::new(), dec!(60)),
            SplitRequest::new(CostCenterId::new(), dec!(40)),
        ])
        .unwrap();

        let first = splits.allocate(amount(1000)).unwrap();
        let second = splits.allocate(amount(1000)).unwrap();
        let values = |allocs: &[Allocation]| -> Vec<i64> {
            allocs.iter().map(|a| a.value.to_minor()).collect()
        };
        assert_eq!(values(&first), values(&second));
        assert_eq!(values(&first), vec![600, 400]);
    }
}
