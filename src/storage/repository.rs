use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{AcademicYear, Cents, LedgerEntry, Payment, Student, StudentId};

use super::MIGRATION_001_INITIAL;

/// A ledger entry as stored, with its optimistic concurrency token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub entry: LedgerEntry,
    /// 1 after the first payment, incremented by every later write
    pub version: i64,
}

/// Identifies one ledger: a student in an academic year.
pub type LedgerKey = (StudentId, AcademicYear);

/// Sum and count of recorded payments for one ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaymentTotals {
    pub total_cents: Cents,
    pub count: i64,
}

/// Repository for persisting students, ledger entries and payments.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database URL.
    /// Use `?mode=rwc` in the URL to create the file if it doesn't exist.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid database URL")?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Create the schema. Safe to run on an initialized database.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    // ========================
    // Student operations
    // ========================

    /// Insert a newly admitted student.
    ///
    /// Returns `false` without writing when the student id or the email is
    /// already taken.
    pub async fn save_student(&self, student: &Student) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO students (student_id, name, email, category, scholarship_eligible, admitted_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&student.student_id)
        .bind(&student.name)
        .bind(&student.email)
        .bind(&student.category)
        .bind(student.scholarship_eligible)
        .bind(student.admitted_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(student_id = %student.student_id, "student saved");
                Ok(true)
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                debug!(student_id = %student.student_id, "student id or email already taken");
                Ok(false)
            }
            Err(e) => Err(e).context("Failed to save student"),
        }
    }

    pub async fn get_student(&self, student_id: &str) -> Result<Option<Student>> {
        let row = sqlx::query(
            r#"
            SELECT student_id, name, email, category, scholarship_eligible, admitted_at
            FROM students
            WHERE student_id = ?
            "#,
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch student")?;

        row.as_ref().map(Self::row_to_student).transpose()
    }

    pub async fn get_student_by_email(&self, email: &str) -> Result<Option<Student>> {
        let row = sqlx::query(
            r#"
            SELECT student_id, name, email, category, scholarship_eligible, admitted_at
            FROM students
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch student by email")?;

        row.as_ref().map(Self::row_to_student).transpose()
    }

    /// List all students, ordered by name.
    pub async fn list_students(&self) -> Result<Vec<Student>> {
        let rows = sqlx::query(
            r#"
            SELECT student_id, name, email, category, scholarship_eligible, admitted_at
            FROM students
            ORDER BY name, student_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list students")?;

        rows.iter().map(Self::row_to_student).collect()
    }

    fn row_to_student(row: &SqliteRow) -> Result<Student> {
        let admitted_at_str: String = row.get("admitted_at");

        Ok(Student {
            student_id: row.get("student_id"),
            name: row.get("name"),
            email: row.get("email"),
            category: row.get("category"),
            scholarship_eligible: row.get::<i32, _>("scholarship_eligible") != 0,
            admitted_at: parse_timestamp(&admitted_at_str).context("Invalid admitted_at")?,
        })
    }

    // ========================
    // Ledger operations
    // ========================

    /// Load a student's ledger entry for one academic year, with its version.
    pub async fn get_ledger_entry(
        &self,
        student_id: &str,
        academic_year: AcademicYear,
    ) -> Result<Option<StoredEntry>> {
        let row = sqlx::query(
            r#"
            SELECT student_id, academic_year, amount_paid, remaining_fees, excess_amount, last_payment_date, version
            FROM ledger_entries
            WHERE student_id = ? AND academic_year = ?
            "#,
        )
        .bind(student_id)
        .bind(academic_year.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch ledger entry")?;

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    /// Every ledger entry of one student, oldest academic year first.
    pub async fn list_student_entries(&self, student_id: &str) -> Result<Vec<StoredEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT student_id, academic_year, amount_paid, remaining_fees, excess_amount, last_payment_date, version
            FROM ledger_entries
            WHERE student_id = ?
            ORDER BY academic_year
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list student ledger entries")?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    pub async fn list_ledger_entries(&self) -> Result<Vec<StoredEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT student_id, academic_year, amount_paid, remaining_fees, excess_amount, last_payment_date, version
            FROM ledger_entries
            ORDER BY student_id, academic_year
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list ledger entries")?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    /// Persist a payment and the ledger entry it produced, atomically.
    ///
    /// The write only lands if the stored entry for the payment's academic
    /// year still has `expected_version` (`None` meaning no entry exists yet)
    /// and the student's profile still matches `student`, i.e. the schedule
    /// the entry was computed from is current. Returns `false` on a conflict,
    /// leaving the database unchanged. On success `payment.sequence` is filled in.
    pub async fn commit_payment(
        &self,
        student: &Student,
        entry: &LedgerEntry,
        expected_version: Option<i64>,
        payment: &mut Payment,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let academic_year = entry.academic_year.to_string();
        let last_payment_date = entry.last_payment_date.map(|dt| dt.to_rfc3339());
        let written = match expected_version {
            None => sqlx::query(
                r#"
                INSERT INTO ledger_entries (student_id, academic_year, amount_paid, remaining_fees, excess_amount, last_payment_date, version)
                SELECT ?, ?, ?, ?, ?, ?, 1
                WHERE EXISTS (
                    SELECT 1 FROM students
                    WHERE student_id = ? AND category = ? AND scholarship_eligible = ?
                )
                ON CONFLICT(student_id, academic_year) DO NOTHING
                "#,
            )
            .bind(&entry.student_id)
            .bind(&academic_year)
            .bind(entry.amount_paid)
            .bind(entry.remaining_fees)
            .bind(entry.excess_amount)
            .bind(&last_payment_date)
            .bind(&student.student_id)
            .bind(&student.category)
            .bind(student.scholarship_eligible)
            .execute(&mut *tx)
            .await
            .context("Failed to insert ledger entry")?,
            Some(version) => sqlx::query(
                r#"
                UPDATE ledger_entries
                SET amount_paid = ?, remaining_fees = ?, excess_amount = ?, last_payment_date = ?, version = version + 1
                WHERE student_id = ? AND academic_year = ? AND version = ?
                  AND EXISTS (
                    SELECT 1 FROM students
                    WHERE student_id = ? AND category = ? AND scholarship_eligible = ?
                  )
                "#,
            )
            .bind(entry.amount_paid)
            .bind(entry.remaining_fees)
            .bind(entry.excess_amount)
            .bind(&last_payment_date)
            .bind(&entry.student_id)
            .bind(&academic_year)
            .bind(version)
            .bind(&student.student_id)
            .bind(&student.category)
            .bind(student.scholarship_eligible)
            .execute(&mut *tx)
            .await
            .context("Failed to update ledger entry")?,
        }
        .rows_affected();

        if written == 0 {
            tx.rollback().await.context("Failed to roll back")?;
            debug!(
                student_id = %entry.student_id,
                academic_year = %entry.academic_year,
                ?expected_version,
                "ledger write conflict"
            );
            return Ok(false);
        }

        let row = sqlx::query(
            r#"
            INSERT INTO payments (id, sequence, student_id, academic_year, amount_cents, paid_at, recorded_at, reference)
            VALUES (?, (SELECT COALESCE(MAX(sequence), 0) + 1 FROM payments), ?, ?, ?, ?, ?, ?)
            RETURNING sequence
            "#,
        )
        .bind(payment.id.to_string())
        .bind(&payment.student_id)
        .bind(payment.academic_year.to_string())
        .bind(payment.amount_cents)
        .bind(payment.paid_at.to_rfc3339())
        .bind(payment.recorded_at.to_rfc3339())
        .bind(&payment.reference)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to save payment")?;

        tx.commit().await.context("Failed to commit payment")?;
        payment.sequence = row.get("sequence");

        debug!(
            student_id = %entry.student_id,
            academic_year = %entry.academic_year,
            sequence = payment.sequence,
            amount_paid = entry.amount_paid,
            "payment committed"
        );
        Ok(true)
    }

    /// Store a changed fee profile together with every ledger entry of the
    /// student, re-derived against the new schedule.
    ///
    /// `rederived` must hold all of the student's entries with the versions
    /// they were read at. Conflicts (the profile or an entry changed since
    /// they were read, or an entry appeared) return `false` without writing.
    pub async fn commit_profile_update(
        &self,
        previous: &Student,
        updated: &Student,
        rederived: &[(LedgerEntry, i64)],
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let updated_rows = sqlx::query(
            r#"
            UPDATE students SET category = ?, scholarship_eligible = ?
            WHERE student_id = ? AND category = ? AND scholarship_eligible = ?
              AND (SELECT COUNT(*) FROM ledger_entries WHERE student_id = ?) = ?
            "#,
        )
        .bind(&updated.category)
        .bind(updated.scholarship_eligible)
        .bind(&previous.student_id)
        .bind(&previous.category)
        .bind(previous.scholarship_eligible)
        .bind(&previous.student_id)
        .bind(rederived.len() as i64)
        .execute(&mut *tx)
        .await
        .context("Failed to update student profile")?
        .rows_affected();

        if updated_rows == 0 {
            tx.rollback().await.context("Failed to roll back")?;
            return Ok(false);
        }

        for (entry, version) in rederived {
            let written = sqlx::query(
                r#"
                UPDATE ledger_entries
                SET remaining_fees = ?, excess_amount = ?, version = version + 1
                WHERE student_id = ? AND academic_year = ? AND version = ? AND amount_paid = ?
                "#,
            )
            .bind(entry.remaining_fees)
            .bind(entry.excess_amount)
            .bind(&entry.student_id)
            .bind(entry.academic_year.to_string())
            .bind(version)
            .bind(entry.amount_paid)
            .execute(&mut *tx)
            .await
            .context("Failed to re-derive ledger entry")?
            .rows_affected();

            if written == 0 {
                tx.rollback().await.context("Failed to roll back")?;
                return Ok(false);
            }
        }

        tx.commit().await.context("Failed to commit profile update")?;
        debug!(
            student_id = %updated.student_id,
            entries = rederived.len(),
            "profile committed"
        );
        Ok(true)
    }

    fn row_to_entry(row: &SqliteRow) -> Result<StoredEntry> {
        let academic_year_str: String = row.get("academic_year");
        let last_payment_str: Option<String> = row.get("last_payment_date");

        Ok(StoredEntry {
            entry: LedgerEntry {
                student_id: row.get("student_id"),
                academic_year: academic_year_str
                    .parse::<AcademicYear>()
                    .context("Invalid academic_year")?,
                amount_paid: row.get("amount_paid"),
                remaining_fees: row.get("remaining_fees"),
                excess_amount: row.get("excess_amount"),
                last_payment_date: last_payment_str
                    .as_deref()
                    .map(parse_timestamp)
                    .transpose()
                    .context("Invalid last_payment_date")?,
            },
            version: row.get("version"),
        })
    }

    // ========================
    // Payment operations
    // ========================

    /// List payments in sequence order, optionally for one student and/or
    /// one academic year.
    pub async fn list_payments(
        &self,
        student_id: Option<&str>,
        academic_year: Option<AcademicYear>,
    ) -> Result<Vec<Payment>> {
        let mut query = String::from(
            "SELECT id, sequence, student_id, academic_year, amount_cents, paid_at, recorded_at, reference FROM payments WHERE 1=1",
        );
        let academic_year_str = academic_year.map(|y| y.to_string());

        if student_id.is_some() {
            query.push_str(" AND student_id = ?");
        }
        if academic_year_str.is_some() {
            query.push_str(" AND academic_year = ?");
        }
        query.push_str(" ORDER BY sequence");

        let mut sql_query = sqlx::query(&query);
        if let Some(id) = student_id {
            sql_query = sql_query.bind(id);
        }
        if let Some(ref year) = academic_year_str {
            sql_query = sql_query.bind(year);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list payments")?;

        rows.iter().map(Self::row_to_payment).collect()
    }

    /// Totals of recorded payments per student and academic year, in a
    /// single query.
    pub async fn payment_totals(&self) -> Result<HashMap<LedgerKey, PaymentTotals>> {
        let rows = sqlx::query(
            r#"
            SELECT student_id, academic_year, SUM(amount_cents) as total, COUNT(*) as count
            FROM payments
            GROUP BY student_id, academic_year
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to sum payments")?;

        rows.iter()
            .map(|row| -> Result<(LedgerKey, PaymentTotals)> {
                let academic_year_str: String = row.get("academic_year");
                let academic_year = academic_year_str
                    .parse::<AcademicYear>()
                    .context("Invalid academic_year")?;
                Ok((
                    (row.get::<String, _>("student_id"), academic_year),
                    PaymentTotals {
                        total_cents: row.get("total"),
                        count: row.get("count"),
                    },
                ))
            })
            .collect()
    }

    fn row_to_payment(row: &SqliteRow) -> Result<Payment> {
        let id_str: String = row.get("id");
        let paid_at_str: String = row.get("paid_at");
        let recorded_at_str: String = row.get("recorded_at");
        let academic_year_str: String = row.get("academic_year");

        Ok(Payment {
            id: Uuid::parse_str(&id_str).context("Invalid payment ID")?,
            sequence: row.get("sequence"),
            student_id: row.get("student_id"),
            academic_year: academic_year_str
                .parse::<AcademicYear>()
                .context("Invalid academic_year")?,
            amount_cents: row.get("amount_cents"),
            paid_at: parse_timestamp(&paid_at_str).context("Invalid paid_at")?,
            recorded_at: parse_timestamp(&recorded_at_str).context("Invalid recorded_at")?,
            reference: row.get("reference"),
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid timestamp: {value}"))?
        .with_timezone(&Utc))
}
