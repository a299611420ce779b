// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use feeledger::application::{FeeService, PaymentFilter, ServiceSettings};
use feeledger::domain::{AcademicYear, Student};
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(FeeService, TempDir)> {
    test_service_with(ServiceSettings::default()).await
}

pub async fn test_service_with(settings: ServiceSettings) -> Result<(FeeService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let service = FeeService::init(&db_path(&temp_dir), settings).await?;
    Ok((service, temp_dir))
}

/// Path of the database created by `test_service`, for opening a second service on it
pub fn db_path(temp_dir: &TempDir) -> String {
    temp_dir.path().join("test.db").to_str().unwrap().to_string()
}

/// Helper to parse a date string into DateTime<Utc>
pub fn parse_date(date_str: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

/// Helper to parse an academic year label such as "2024-25"
pub fn year(label: &str) -> AcademicYear {
    label.parse().unwrap()
}

/// Payment filter for one student across all years
pub fn for_student(student_id: &str) -> PaymentFilter {
    PaymentFilter {
        student_id: Some(student_id.to_string()),
        ..Default::default()
    }
}

/// Test fixture: a small roster covering both fee tiers
pub struct Roster;

impl Roster {
    /// OPEN without scholarship (payable 96000)
    pub async fn open(service: &FeeService) -> Result<Student> {
        Ok(service
            .admit_student("Rahul Mehta".into(), "rahul@example.com".into(), "OPEN", false)
            .await?)
    }

    /// SC without scholarship (payable 53000)
    pub async fn reserved(service: &FeeService) -> Result<Student> {
        Ok(service
            .admit_student("Asha Patil".into(), "asha@example.com".into(), "SC", false)
            .await?)
    }

    /// SC with scholarship (payable 10000)
    pub async fn scholar(service: &FeeService) -> Result<Student> {
        Ok(service
            .admit_student("Meera Shah".into(), "meera@example.com".into(), "SC", true)
            .await?)
    }
}
