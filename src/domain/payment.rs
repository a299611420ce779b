use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AcademicYear, Cents, StudentId};

pub type PaymentId = Uuid;

/// One accepted fee payment. Payments are immutable; the ledger entry holds
/// the running totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    /// Monotonically increasing sequence number, assigned by the repository
    pub sequence: i64,
    pub student_id: StudentId,
    /// Academic year whose ledger the payment was credited to
    pub academic_year: AcademicYear,
    /// Amount in cents (always positive)
    pub amount_cents: Cents,
    /// When the student paid
    pub paid_at: DateTime<Utc>,
    /// When the payment was recorded
    pub recorded_at: DateTime<Utc>,
    /// Bank or counter receipt reference
    pub reference: Option<String>,
}

impl Payment {
    pub fn new(
        student_id: StudentId,
        academic_year: AcademicYear,
        amount_cents: Cents,
        paid_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            student_id,
            academic_year,
            amount_cents,
            paid_at,
            recorded_at: Utc::now(),
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}
