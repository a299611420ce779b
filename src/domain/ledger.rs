use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AcademicYear, Cents, FeeError, FeeSchedule, StudentId};

/// Cumulative payment state for one student in one academic year.
///
/// Exactly one of `remaining_fees` / `excess_amount` can be positive; both are
/// zero when the student has paid the payable fee to the paisa.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub student_id: StudentId,
    pub academic_year: AcademicYear,
    /// Sum of every accepted payment. Never decreases.
    pub amount_paid: Cents,
    pub remaining_fees: Cents,
    pub excess_amount: Cents,
    /// `None` only for the opening view of a student who has not paid yet
    pub last_payment_date: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    /// The zero-paid view of a student with no ledger record yet.
    /// Not persisted; a record is only created by the first payment.
    pub fn opening(
        student_id: impl Into<StudentId>,
        academic_year: AcademicYear,
        schedule: &FeeSchedule,
    ) -> Self {
        let (remaining_fees, excess_amount) = split_balance(schedule.payable_fee(), 0);
        Self {
            student_id: student_id.into(),
            academic_year,
            amount_paid: 0,
            remaining_fees,
            excess_amount,
            last_payment_date: None,
        }
    }

    /// Recompute the derived balances against `schedule`, keeping the paid
    /// total and payment date. Used after a student's fee profile changes.
    pub fn rederive(&self, schedule: &FeeSchedule) -> Result<Self, FeeError> {
        schedule.validate()?;
        let (remaining_fees, excess_amount) =
            split_balance(schedule.payable_fee(), self.amount_paid);
        Ok(Self {
            remaining_fees,
            excess_amount,
            ..self.clone()
        })
    }

    pub fn is_settled(&self) -> bool {
        self.remaining_fees == 0
    }
}

/// Apply one payment to a student's ledger for `academic_year`.
///
/// `prior` is the current entry for that year, or `None` before its first
/// payment.
/// Overpayment is accepted and reported as `excess_amount`.
///
/// Pure: nothing is read or written. Callers must serialize
/// load → `apply_payment` → persist per student, otherwise two concurrent
/// payments computed from the same `prior` lose one of them.
pub fn apply_payment(
    schedule: &FeeSchedule,
    student_id: &str,
    academic_year: AcademicYear,
    prior: Option<&LedgerEntry>,
    amount: Cents,
    now: DateTime<Utc>,
) -> Result<LedgerEntry, FeeError> {
    if amount <= 0 {
        return Err(FeeError::InvalidAmount(format!(
            "payment must be positive, got {amount} cents"
        )));
    }
    schedule.validate()?;

    debug_assert!(
        prior.is_none_or(|p| p.student_id == student_id && p.academic_year == academic_year)
    );
    let already_paid = prior.map_or(0, |entry| entry.amount_paid);
    let new_total = already_paid.checked_add(amount).ok_or_else(|| {
        FeeError::InvalidAmount(format!(
            "payment of {amount} cents overflows the paid total of {already_paid} cents"
        ))
    })?;

    let (remaining_fees, excess_amount) = split_balance(schedule.payable_fee(), new_total);

    Ok(LedgerEntry {
        student_id: student_id.to_string(),
        academic_year,
        amount_paid: new_total,
        remaining_fees,
        excess_amount,
        last_payment_date: Some(now),
    })
}

/// Split the deviation of `paid` from `payable` into (remaining, excess).
fn split_balance(payable: Cents, paid: Cents) -> (Cents, Cents) {
    if paid >= payable {
        (0, paid - payable)
    } else {
        (payable - paid, 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;
    use crate::domain::{FeeTable, FeeTier, units};

    fn reserved_schedule() -> FeeSchedule {
        FeeSchedule {
            category: "SC".into(),
            tier: FeeTier::Concessional,
            base_fee: units(53_000),
            scholarship_discount: 0,
        }
    }

    fn year() -> AcademicYear {
        AcademicYear::starting(2024).unwrap()
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, day, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_first_payment_creates_entry() {
        let entry =
            apply_payment(&reserved_schedule(), "STU000001", year(), None, units(20_000), at(1)).unwrap();

        assert_eq!(entry.student_id, "STU000001");
        assert_eq!(entry.academic_year, year());
        assert_eq!(entry.amount_paid, units(20_000));
        assert_eq!(entry.remaining_fees, units(33_000));
        assert_eq!(entry.excess_amount, 0);
        assert_eq!(entry.last_payment_date, Some(at(1)));
    }

    #[test]
    fn test_overpayment_recorded_as_excess() {
        let schedule = reserved_schedule();
        let first = apply_payment(&schedule, "STU000001", year(), None, units(20_000), at(1)).unwrap();
        let second =
            apply_payment(&schedule, "STU000001", year(), Some(&first), units(40_000), at(2)).unwrap();

        assert_eq!(second.amount_paid, units(60_000));
        assert_eq!(second.remaining_fees, 0);
        assert_eq!(second.excess_amount, units(7_000));
        assert_eq!(second.last_payment_date, Some(at(2)));
    }

    #[test]
    fn test_exact_payment_settles_without_excess() {
        let schedule = FeeTable::default().compute_schedule("SC", true).unwrap();
        let entry = apply_payment(&schedule, "STU000002", year(), None, units(10_000), at(3)).unwrap();

        assert_eq!(entry.remaining_fees, 0);
        assert_eq!(entry.excess_amount, 0);
        assert!(entry.is_settled());
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let schedule = reserved_schedule();
        let prior = apply_payment(&schedule, "STU000001", year(), None, 100, at(1)).unwrap();

        for amount in [0, -5] {
            let result = apply_payment(&schedule, "STU000001", year(), Some(&prior), amount, at(2));
            assert!(matches!(result, Err(FeeError::InvalidAmount(_))));
        }
        // Prior entry is untouched
        assert_eq!(prior.amount_paid, 100);
    }

    #[test]
    fn test_overflowing_total_rejected() {
        let schedule = reserved_schedule();
        let prior = apply_payment(&schedule, "STU000001", year(), None, i64::MAX - 10, at(1)).unwrap();
        let result = apply_payment(&schedule, "STU000001", year(), Some(&prior), 11, at(2));
        assert!(matches!(result, Err(FeeError::InvalidAmount(_))));
    }

    #[test]
    fn test_inconsistent_schedule_rejected() {
        let schedule = FeeSchedule {
            scholarship_discount: units(60_000),
            ..reserved_schedule()
        };
        let result = apply_payment(&schedule, "STU000001", year(), None, units(1_000), at(1));
        assert!(matches!(
            result,
            Err(FeeError::InconsistentSchedule { .. })
        ));
    }

    #[test]
    fn test_opening_entry() {
        let entry = LedgerEntry::opening("STU000003", year(), &reserved_schedule());
        assert_eq!(entry.amount_paid, 0);
        assert_eq!(entry.remaining_fees, units(53_000));
        assert_eq!(entry.excess_amount, 0);
        assert_eq!(entry.last_payment_date, None);
    }

    #[test]
    fn test_rederive_after_scholarship_granted() {
        let table = FeeTable::default();
        let before = table.compute_schedule("SC", false).unwrap();
        let after = table.compute_schedule("SC", true).unwrap();

        let entry = apply_payment(&before, "STU000004", year(), None, units(20_000), at(5)).unwrap();
        assert_eq!(entry.remaining_fees, units(33_000));

        let rederived = entry.rederive(&after).unwrap();
        assert_eq!(rederived.amount_paid, units(20_000));
        assert_eq!(rederived.remaining_fees, 0);
        assert_eq!(rederived.excess_amount, units(10_000));
        assert_eq!(rederived.last_payment_date, Some(at(5)));

        // Idempotent
        assert_eq!(rederived.rederive(&after).unwrap(), rederived);
    }

    fn payments() -> impl Strategy<Value = Vec<Cents>> {
        prop::collection::vec(1i64..5_000_000i64, 1..40)
    }

    fn payable() -> impl Strategy<Value = Cents> {
        0i64..20_000_000i64
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// The paid total is the exact sum of the payments, whatever their order.
        #[test]
        fn prop_paid_total_is_exact_sum(amounts in payments(), base in payable()) {
            let schedule = FeeSchedule { base_fee: base, ..reserved_schedule() };

            let mut forward: Option<LedgerEntry> = None;
            for amount in &amounts {
                forward = Some(apply_payment(&schedule, "S", year(), forward.as_ref(), *amount, at(1)).unwrap());
            }
            let mut backward: Option<LedgerEntry> = None;
            for amount in amounts.iter().rev() {
                backward = Some(apply_payment(&schedule, "S", year(), backward.as_ref(), *amount, at(1)).unwrap());
            }

            let expected: Cents = amounts.iter().sum();
            prop_assert_eq!(forward.as_ref().unwrap().amount_paid, expected);
            prop_assert_eq!(forward, backward);
        }

        /// Remaining and excess partition the deviation from the payable fee.
        #[test]
        fn prop_remaining_and_excess_partition(amounts in payments(), base in payable()) {
            let schedule = FeeSchedule { base_fee: base, ..reserved_schedule() };
            let payable = schedule.payable_fee();

            let mut entry: Option<LedgerEntry> = None;
            for amount in amounts {
                let prior_paid = entry.as_ref().map_or(0, |e| e.amount_paid);
                let next = apply_payment(&schedule, "S", year(), entry.as_ref(), amount, at(1)).unwrap();

                prop_assert!(next.amount_paid > prior_paid);
                prop_assert!(next.remaining_fees == 0 || next.excess_amount == 0);
                prop_assert!(next.remaining_fees >= 0 && next.excess_amount >= 0);
                if next.amount_paid >= payable {
                    prop_assert_eq!(next.remaining_fees, 0);
                }
                if next.amount_paid <= payable {
                    prop_assert_eq!(next.excess_amount, 0);
                }
                prop_assert_eq!(
                    next.amount_paid + next.remaining_fees - next.excess_amount,
                    payable
                );
                entry = Some(next);
            }
        }

        /// Non-positive amounts never produce an entry.
        #[test]
        fn prop_non_positive_rejected(amount in i64::MIN..=0i64) {
            let result = apply_payment(&reserved_schedule(), "S", year(), None, amount, at(1));
            prop_assert!(matches!(result, Err(FeeError::InvalidAmount(_))));
        }
    }
}
