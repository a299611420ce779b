mod common;

use anyhow::Result;
use common::{Roster, test_service, test_service_with, year};
use feeledger::application::{AppError, ServiceSettings};
use feeledger::domain::{FeeError, FeeTable, FeeTier, UnknownCategoryPolicy, units};

#[tokio::test]
async fn test_admit_normalizes_profile() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let student = service
        .admit_student(
            "  Kiran Rao ".into(),
            " Kiran.Rao@Example.COM ".into(),
            " obc ",
            true,
        )
        .await?;

    assert_eq!(student.name, "Kiran Rao");
    assert_eq!(student.email, "kiran.rao@example.com");
    assert_eq!(student.category, "OBC");
    assert!(student.scholarship_eligible);

    assert_eq!(student.student_id.len(), 9);
    assert!(student.student_id.starts_with("STU"));
    assert!(
        student.student_id[3..]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
    );

    let loaded = service.get_student(&student.student_id).await?;
    assert_eq!(loaded.email, student.email);
    assert_eq!(loaded.category, "OBC");
    Ok(())
}

#[tokio::test]
async fn test_duplicate_email_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    Roster::open(&service).await?;

    let result = service
        .admit_student("Someone Else".into(), "RAHUL@example.com".into(), "SC", false)
        .await;

    assert!(matches!(result, Err(AppError::StudentAlreadyExists(email)) if email == "rahul@example.com"));
    assert_eq!(service.list_students().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_invalid_input_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let result = service
        .admit_student("Nameless".into(), "not-an-email".into(), "OPEN", false)
        .await;
    assert!(matches!(result, Err(AppError::InvalidEmail(_))));

    let result = service
        .admit_student("   ".into(), "blank@example.com".into(), "OPEN", false)
        .await;
    assert!(matches!(result, Err(AppError::InvalidInput(_))));

    assert!(service.list_students().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unknown_category_rejected_by_default() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let result = service
        .admit_student("Zed".into(), "zed@example.com".into(), "NRI", false)
        .await;

    assert!(matches!(
        result,
        Err(AppError::Fee(FeeError::UnknownCategory(code))) if code == "NRI"
    ));
    assert!(service.list_students().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unknown_category_fallback_policy() -> Result<()> {
    let settings = ServiceSettings {
        fee_table: FeeTable {
            unknown_category: UnknownCategoryPolicy::Standard,
            ..FeeTable::default()
        },
        ..ServiceSettings::default()
    };
    let (service, _temp) = test_service_with(settings).await?;

    let student = service
        .admit_student("Zed".into(), "zed@example.com".into(), "nri", false)
        .await?;
    let status = service.get_fees(&student.student_id, year("2024-25")).await?;

    assert_eq!(status.schedule.category, "NRI");
    assert_eq!(status.schedule.tier, FeeTier::Standard);
    assert_eq!(status.schedule.payable_fee(), units(96_000));
    Ok(())
}

#[tokio::test]
async fn test_list_students_sorted_by_name() -> Result<()> {
    let (service, _temp) = test_service().await?;
    Roster::open(&service).await?;
    Roster::scholar(&service).await?;
    Roster::reserved(&service).await?;

    let names: Vec<_> = service
        .list_students()
        .await?
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["Asha Patil", "Meera Shah", "Rahul Mehta"]);
    Ok(())
}

#[tokio::test]
async fn test_unknown_student() -> Result<()> {
    let (service, _temp) = test_service().await?;

    assert!(matches!(
        service.get_student("STU000000").await,
        Err(AppError::StudentNotFound(_))
    ));
    assert!(matches!(
        service.get_fees("STU000000", year("2024-25")).await,
        Err(AppError::StudentNotFound(_))
    ));
    Ok(())
}
