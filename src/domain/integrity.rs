use serde::Serialize;

use super::{AcademicYear, Cents, FeeSchedule, LedgerEntry, StudentId};

/// A discrepancy found while auditing stored ledger entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerIssue {
    /// The entry's paid total differs from the sum of its payment records.
    PaidTotalMismatch {
        student_id: StudentId,
        academic_year: AcademicYear,
        recorded: Cents,
        summed: Cents,
    },
    /// Remaining/excess do not match the student's current schedule,
    /// e.g. after the fee table changed.
    StaleBalance {
        student_id: StudentId,
        academic_year: AcademicYear,
        remaining_fees: Cents,
        excess_amount: Cents,
        expected_remaining: Cents,
        expected_excess: Cents,
    },
    /// Payments exist for a student without a ledger entry.
    MissingEntry {
        student_id: StudentId,
        academic_year: AcademicYear,
        summed: Cents,
    },
    /// The student's schedule can no longer be computed.
    UnpricedStudent { student_id: StudentId, reason: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    pub entries_checked: usize,
    pub issues: Vec<LedgerIssue>,
}

impl IntegrityReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Audit one stored entry against its schedule and the sum of its payments.
pub fn audit_entry(
    entry: &LedgerEntry,
    schedule: &FeeSchedule,
    payments_total: Cents,
) -> Vec<LedgerIssue> {
    let mut issues = Vec::new();

    if entry.amount_paid != payments_total {
        issues.push(LedgerIssue::PaidTotalMismatch {
            student_id: entry.student_id.clone(),
            academic_year: entry.academic_year,
            recorded: entry.amount_paid,
            summed: payments_total,
        });
    }

    match entry.rederive(schedule) {
        Ok(expected) if expected != *entry => issues.push(LedgerIssue::StaleBalance {
            student_id: entry.student_id.clone(),
            academic_year: entry.academic_year,
            remaining_fees: entry.remaining_fees,
            excess_amount: entry.excess_amount,
            expected_remaining: expected.remaining_fees,
            expected_excess: expected.excess_amount,
        }),
        Ok(_) => {}
        Err(e) => issues.push(LedgerIssue::UnpricedStudent {
            student_id: entry.student_id.clone(),
            reason: e.to_string(),
        }),
    }

    issues
}
