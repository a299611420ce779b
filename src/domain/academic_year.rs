use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Calendar month (1-12) in which an academic year begins.
pub const ACADEMIC_YEAR_START_MONTH: u32 = 6;

/// An academic year such as `2024-25`, identified by the calendar year it
/// starts in. Each student has one ledger entry per academic year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AcademicYear {
    start: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid academic year '{0}', expected e.g. 2024-25")]
pub struct ParseAcademicYearError(String);

impl AcademicYear {
    pub fn starting(start: i32) -> Option<Self> {
        (1000..=9998).contains(&start).then_some(Self { start })
    }

    pub fn start_year(&self) -> i32 {
        self.start
    }

    /// The academic year `at` falls in.
    pub fn containing(at: DateTime<Utc>) -> Self {
        let start = if at.month() >= ACADEMIC_YEAR_START_MONTH {
            at.year()
        } else {
            at.year() - 1
        };
        Self { start }
    }

    pub fn current() -> Self {
        Self::containing(Utc::now())
    }
}

impl fmt::Display for AcademicYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.start, (self.start + 1).rem_euclid(100))
    }
}

/// Accepts `2024-25` and `2024-2025`.
impl FromStr for AcademicYear {
    type Err = ParseAcademicYearError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseAcademicYearError(s.to_string());
        let (first, second) = s.trim().split_once('-').ok_or_else(invalid)?;

        let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if first.len() != 4 || !all_digits(first) || !all_digits(second) {
            return Err(invalid());
        }

        let start: i32 = first.parse().map_err(|_| invalid())?;
        let end: i32 = second.parse().map_err(|_| invalid())?;
        let consecutive = match second.len() {
            2 => end == (start + 1) % 100,
            4 => end == start + 1,
            _ => false,
        };
        if !consecutive {
            return Err(invalid());
        }

        Self::starting(start).ok_or_else(invalid)
    }
}

impl TryFrom<String> for AcademicYear {
    type Error = ParseAcademicYearError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AcademicYear> for String {
    fn from(year: AcademicYear) -> Self {
        year.to_string()
    }
}
