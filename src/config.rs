//! Configuration loading: fee table and service tunables.
//!
//! Sources, later ones overriding earlier ones:
//! 1. built-in defaults
//! 2. a TOML file (`feeledger.toml` unless another path is given)
//! 3. `FEELEDGER__<SECTION>__<KEY>` environment variables
//!
//! Monetary values are whole-unit decimal strings (`"96000"`, `"52500.50"`).

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::application::ServiceSettings;
use crate::domain::{FeeTable, UnknownCategoryPolicy, parse_cents};

/// Default config file, optional.
pub const DEFAULT_CONFIG_FILE: &str = "feeledger.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub fees: FeesConfig,
    pub service: ServiceConfig,
}

/// `[fees]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeesConfig {
    pub standard_fee: String,
    pub concessional_fee: String,
    pub scholarship_discount: String,
    pub standard_codes: Vec<String>,
    pub concessional_codes: Vec<String>,
    pub unknown_category: UnknownCategoryPolicy,
}

impl Default for FeesConfig {
    fn default() -> Self {
        let table = FeeTable::default();
        Self {
            standard_fee: "96000".into(),
            concessional_fee: "53000".into(),
            scholarship_discount: "43000".into(),
            standard_codes: table.standard_codes,
            concessional_codes: table.concessional_codes,
            unknown_category: table.unknown_category,
        }
    }
}

/// `[service]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub max_write_attempts: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_write_attempts: ServiceSettings::default().max_write_attempts,
        }
    }
}

impl AppConfig {
    /// Load configuration. An explicitly given file must exist; the default
    /// file is used only if present.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("FEELEDGER")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("fees.standard_codes")
                    .with_list_parse_key("fees.concessional_codes"),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Build a validated fee table from the `[fees]` section.
    pub fn fee_table(&self) -> Result<FeeTable> {
        let fees = &self.fees;
        let table = FeeTable {
            standard_fee: parse_amount("fees.standard_fee", &fees.standard_fee)?,
            concessional_fee: parse_amount("fees.concessional_fee", &fees.concessional_fee)?,
            scholarship_discount: parse_amount(
                "fees.scholarship_discount",
                &fees.scholarship_discount,
            )?,
            standard_codes: fees.standard_codes.clone(),
            concessional_codes: fees.concessional_codes.clone(),
            unknown_category: fees.unknown_category,
        };

        table.validate().context("Invalid fee table")?;

        let overlapping = table.overlapping_codes();
        if !overlapping.is_empty() {
            bail!(
                "Invalid fee table: codes listed as both standard and concessional: {}",
                overlapping.join(", ")
            );
        }

        Ok(table)
    }

    pub fn service_settings(&self) -> Result<ServiceSettings> {
        if self.service.max_write_attempts == 0 {
            bail!("service.max_write_attempts must be at least 1");
        }
        Ok(ServiceSettings {
            fee_table: self.fee_table()?,
            max_write_attempts: self.service.max_write_attempts,
        })
    }
}

fn parse_amount(key: &str, value: &str) -> Result<i64> {
    parse_cents(value).with_context(|| format!("Invalid amount for {key}: '{value}'"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::domain::units;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_match_builtin_table() {
        let config = AppConfig::default();
        assert_eq!(config.fee_table().unwrap(), FeeTable::default());
        assert_eq!(config.service_settings().unwrap().max_write_attempts, 10);
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"
            [fees]
            standard_fee = "100000"
            scholarship_discount = "40000.50"
            unknown_category = "standard"

            [service]
            max_write_attempts = 3
            "#,
        );

        let config = AppConfig::load(Some(file.path())).unwrap();
        let table = config.fee_table().unwrap();
        assert_eq!(table.standard_fee, units(100_000));
        assert_eq!(table.concessional_fee, units(53_000));
        assert_eq!(table.scholarship_discount, 4_000_050);
        assert_eq!(table.unknown_category, UnknownCategoryPolicy::Standard);
        assert_eq!(config.service.max_write_attempts, 3);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(AppConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_discount_above_base_rejected() {
        let config = AppConfig {
            fees: FeesConfig {
                scholarship_discount: "60000".into(),
                ..FeesConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.fee_table().is_err());
    }

    #[test]
    fn test_overlapping_codes_rejected() {
        let config = AppConfig {
            fees: FeesConfig {
                standard_codes: vec!["OPEN".into(), "OBC".into()],
                ..FeesConfig::default()
            },
            ..AppConfig::default()
        };
        let err = config.fee_table().unwrap_err();
        assert!(err.to_string().contains("OBC"));
    }

    #[test]
    fn test_bad_amount_rejected() {
        let config = AppConfig {
            fees: FeesConfig {
                standard_fee: "lots".into(),
                ..FeesConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.fee_table().is_err());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = AppConfig {
            service: ServiceConfig {
                max_write_attempts: 0,
            },
            ..AppConfig::default()
        };
        assert!(config.service_settings().is_err());
    }
}
