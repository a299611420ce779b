use thiserror::Error;

use crate::domain::FeeError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Fee(#[from] FeeError),

    #[error("Student not found: {0}")]
    StudentNotFound(String),

    #[error("Student already exists with email: {0}")]
    StudentAlreadyExists(String),

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Ledger for student {student_id} kept changing; gave up after {attempts} attempts")]
    ConcurrentModification { student_id: String, attempts: u32 },

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}
