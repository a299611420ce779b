use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::normalize_category;

/// External student identifier, e.g. `STU4F0A9C`.
pub type StudentId = String;

const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ID_SUFFIX_LEN: usize = 6;

/// Generate a fresh `STU` + 6 upper-case alphanumeric identifier.
/// Uniqueness is enforced by the store, not here.
pub fn generate_student_id() -> StudentId {
    let mut rng = rand::rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("STU{suffix}")
}

/// An admitted student's fee profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub student_id: StudentId,
    pub name: String,
    pub email: String,
    /// Normalized category code
    pub category: String,
    pub scholarship_eligible: bool,
    pub admitted_at: DateTime<Utc>,
}

impl Student {
    pub fn new(name: String, email: String, category: &str) -> Self {
        Self {
            student_id: generate_student_id(),
            name,
            email: normalize_email(&email),
            category: normalize_category(category),
            scholarship_eligible: false,
            admitted_at: Utc::now(),
        }
    }

    pub fn with_scholarship(mut self, eligible: bool) -> Self {
        self.scholarship_eligible = eligible;
        self
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Minimal shape check: one `@` with a non-empty local part and a dotted domain.
pub fn is_plausible_email(email: &str) -> bool {
    let email = email.trim();
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}
