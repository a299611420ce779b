use thiserror::Error;

use super::Cents;

/// Validation failures raised by the fee ledger computations.
///
/// None of these are retried: they describe bad input or bad reference data,
/// and the caller decides how to surface them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeeError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Unknown category code: {0}")]
    UnknownCategory(String),

    #[error(
        "Inconsistent fee schedule: base fee {base_fee} with scholarship discount {discount}"
    )]
    InconsistentSchedule { base_fee: Cents, discount: Cents },
}
