use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{Cents, FeeError, FeeSchedule, units};

/// Fee band a category code maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeTier {
    /// Open / general admission rate.
    Standard,
    /// Reduced rate for reserved categories.
    Concessional,
}

impl FeeTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeTier::Standard => "standard",
            FeeTier::Concessional => "concessional",
        }
    }
}

impl std::fmt::Display for FeeTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What to do with a category code that is in neither code list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownCategoryPolicy {
    /// Fail with `FeeError::UnknownCategory`.
    #[default]
    Reject,
    /// Charge the standard rate and log a warning.
    Standard,
    /// Charge the concessional rate and log a warning.
    Concessional,
}

impl UnknownCategoryPolicy {
    fn fallback_tier(&self) -> Option<FeeTier> {
        match self {
            UnknownCategoryPolicy::Reject => None,
            UnknownCategoryPolicy::Standard => Some(FeeTier::Standard),
            UnknownCategoryPolicy::Concessional => Some(FeeTier::Concessional),
        }
    }
}

/// Category codes are compared trimmed and upper-cased.
pub fn normalize_category(code: &str) -> String {
    code.trim().to_uppercase()
}

/// The pricing table used to derive a student's `FeeSchedule`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTable {
    pub standard_fee: Cents,
    pub concessional_fee: Cents,
    /// Flat discount for scholarship-eligible students, regardless of tier.
    pub scholarship_discount: Cents,
    pub standard_codes: Vec<String>,
    pub concessional_codes: Vec<String>,
    pub unknown_category: UnknownCategoryPolicy,
}

impl Default for FeeTable {
    fn default() -> Self {
        Self {
            standard_fee: units(96_000),
            concessional_fee: units(53_000),
            scholarship_discount: units(43_000),
            standard_codes: vec!["OPEN".into(), "GENERAL".into()],
            concessional_codes: ["SC", "ST", "OBC", "NT", "VJ", "SBC"]
                .into_iter()
                .map(String::from)
                .collect(),
            unknown_category: UnknownCategoryPolicy::Reject,
        }
    }
}

impl FeeTable {
    pub fn base_fee(&self, tier: FeeTier) -> Cents {
        match tier {
            FeeTier::Standard => self.standard_fee,
            FeeTier::Concessional => self.concessional_fee,
        }
    }

    /// Resolve a category code to its tier, applying the unknown-category
    /// policy when the code is not listed.
    pub fn resolve_tier(&self, category: &str) -> Result<FeeTier, FeeError> {
        let code = normalize_category(category);

        if contains_code(&self.concessional_codes, &code) {
            return Ok(FeeTier::Concessional);
        }
        if contains_code(&self.standard_codes, &code) {
            return Ok(FeeTier::Standard);
        }

        match self.unknown_category.fallback_tier() {
            Some(tier) => {
                warn!(category = %code, tier = %tier, "unknown category code, applying fallback tier");
                Ok(tier)
            }
            None => Err(FeeError::UnknownCategory(code)),
        }
    }

    /// Derive the fee schedule for a student profile.
    ///
    /// Deterministic: the same table and inputs always give the same schedule.
    pub fn compute_schedule(
        &self,
        category: &str,
        scholarship_eligible: bool,
    ) -> Result<FeeSchedule, FeeError> {
        let tier = self.resolve_tier(category)?;
        let discount = if scholarship_eligible {
            self.scholarship_discount
        } else {
            0
        };

        let schedule = FeeSchedule {
            category: normalize_category(category),
            tier,
            base_fee: self.base_fee(tier),
            scholarship_discount: discount,
        };
        schedule.validate()?;
        Ok(schedule)
    }

    /// Check that every schedule this table can produce is consistent.
    pub fn validate(&self) -> Result<(), FeeError> {
        for tier in [FeeTier::Standard, FeeTier::Concessional] {
            let base_fee = self.base_fee(tier);
            if base_fee < 0
                || self.scholarship_discount < 0
                || self.scholarship_discount > base_fee
            {
                return Err(FeeError::InconsistentSchedule {
                    base_fee,
                    discount: self.scholarship_discount,
                });
            }
        }
        Ok(())
    }

    /// Codes present in both lists, normalized.
    pub fn overlapping_codes(&self) -> Vec<String> {
        self.standard_codes
            .iter()
            .map(|c| normalize_category(c))
            .filter(|c| contains_code(&self.concessional_codes, c))
            .collect()
    }
}

fn contains_code(codes: &[String], normalized: &str) -> bool {
    codes.iter().any(|c| normalize_category(c) == normalized)
}
