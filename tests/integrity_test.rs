mod common;

use anyhow::Result;
use common::{Roster, db_path, parse_date, test_service, year};
use feeledger::application::{FeeService, ServiceSettings};
use feeledger::domain::{FeeTable, LedgerIssue, units};

#[tokio::test]
async fn test_clean_ledger_verifies() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let a = Roster::reserved(&service).await?;
    let b = Roster::open(&service).await?;
    Roster::scholar(&service).await?;

    let term = year("2024-25");
    service
        .pay_fees(&a.student_id, term, units(20_000), parse_date("2024-06-01"), None)
        .await?;
    service
        .pay_fees(&a.student_id, term, units(40_000), parse_date("2024-06-02"), None)
        .await?;
    service
        .pay_fees(&b.student_id, term, units(96_000), parse_date("2024-06-03"), None)
        .await?;
    service
        .pay_fees(&b.student_id, year("2025-26"), units(1_000), parse_date("2025-06-03"), None)
        .await?;

    let report = service.verify_ledger().await?;
    assert_eq!(report.entries_checked, 3);
    assert!(report.is_valid(), "unexpected issues: {:?}", report.issues);
    Ok(())
}

#[tokio::test]
async fn test_fee_table_change_is_reported_as_stale() -> Result<()> {
    let (service, temp) = test_service().await?;
    let student = Roster::open(&service).await?;
    service
        .pay_fees(
            &student.student_id,
            year("2024-25"),
            units(50_000),
            parse_date("2024-06-01"),
            None,
        )
        .await?;

    let raised = ServiceSettings {
        fee_table: FeeTable {
            standard_fee: units(100_000),
            ..FeeTable::default()
        },
        ..ServiceSettings::default()
    };
    let reopened = FeeService::connect(&db_path(&temp), raised).await?;

    // Reads show the stored balances until the next write
    let status = reopened.get_fees(&student.student_id, year("2024-25")).await?;
    assert_eq!(status.entry.remaining_fees, units(46_000));

    let report = reopened.verify_ledger().await?;
    assert_eq!(
        report.issues,
        vec![LedgerIssue::StaleBalance {
            student_id: student.student_id.clone(),
            academic_year: year("2024-25"),
            remaining_fees: units(46_000),
            excess_amount: 0,
            expected_remaining: units(50_000),
            expected_excess: 0,
        }]
    );

    // The next payment is priced on the new table and clears the drift
    let result = reopened
        .pay_fees(
            &student.student_id,
            year("2024-25"),
            units(10_000),
            parse_date("2024-06-02"),
            None,
        )
        .await?;
    assert_eq!(result.entry.remaining_fees, units(40_000));
    assert!(reopened.verify_ledger().await?.is_valid());
    Ok(())
}

#[tokio::test]
async fn test_dropped_category_is_unpriced() -> Result<()> {
    let (service, temp) = test_service().await?;
    let student = Roster::reserved(&service).await?;
    for (term, date) in [("2023-24", "2024-02-01"), ("2024-25", "2024-06-01")] {
        service
            .pay_fees(&student.student_id, year(term), units(1_000), parse_date(date), None)
            .await?;
    }

    let narrowed = ServiceSettings {
        fee_table: FeeTable {
            concessional_codes: vec!["ST".into()],
            ..FeeTable::default()
        },
        ..ServiceSettings::default()
    };
    let reopened = FeeService::connect(&db_path(&temp), narrowed).await?;

    // Reported once per student, not once per academic year
    let report = reopened.verify_ledger().await?;
    assert_eq!(report.entries_checked, 2);
    assert_eq!(report.issues.len(), 1);
    assert!(matches!(
        &report.issues[0],
        LedgerIssue::UnpricedStudent { student_id, .. } if *student_id == student.student_id
    ));
    Ok(())
}
