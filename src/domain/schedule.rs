use serde::{Deserialize, Serialize};

use super::{Cents, FeeError, FeeTier};

/// The pricing rule for one student, derived from their category and
/// scholarship status by `FeeTable::compute_schedule`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Normalized category code the schedule was computed for
    pub category: String,
    pub tier: FeeTier,
    pub base_fee: Cents,
    /// Zero unless the student is scholarship-eligible
    pub scholarship_discount: Cents,
}

impl FeeSchedule {
    /// Amount the student owes in total: base fee minus scholarship discount.
    /// Negative only for an inconsistent schedule.
    pub fn payable_fee(&self) -> Cents {
        self.base_fee.saturating_sub(self.scholarship_discount)
    }

    pub fn validate(&self) -> Result<(), FeeError> {
        if self.base_fee < 0 || self.scholarship_discount < 0 || self.payable_fee() < 0 {
            return Err(FeeError::InconsistentSchedule {
                base_fee: self.base_fee,
                discount: self.scholarship_discount,
            });
        }
        Ok(())
    }
}
