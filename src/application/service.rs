use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::domain::{
    AcademicYear, Cents, FeeSchedule, FeeTable, IntegrityReport, LedgerEntry, LedgerIssue,
    Payment, Student, StudentId, apply_payment, audit_entry, format_cents, generate_student_id,
    is_plausible_email, normalize_category, normalize_email,
};
use crate::storage::{Repository, StoredEntry};

use super::AppError;

/// Generated ids are retried this many times on collision before giving up.
const STUDENT_ID_ATTEMPTS: u32 = 5;

/// Tunables for `FeeService`.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub fee_table: FeeTable,
    /// Optimistic write attempts per payment before `ConcurrentModification`
    pub max_write_attempts: u32,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            fee_table: FeeTable::default(),
            max_write_attempts: 10,
        }
    }
}

/// Filter options for listing payments
#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub student_id: Option<String>,
    pub academic_year: Option<AcademicYear>,
}

/// Application service for the fee ledger.
/// This is the primary interface for any client (CLI, API, etc.).
///
/// Every read-modify-write of a student's ledgers runs under that student's
/// lock and is committed with a version check, so concurrent payments are
/// serialized in-process and across processes sharing the database.
pub struct FeeService {
    repo: Repository,
    settings: ServiceSettings,
    /// Held only while a write is in flight; idle entries are evicted.
    locks: DashMap<StudentId, Arc<Mutex<()>>>,
}

/// Fee position of a student for one academic year
#[derive(Debug, Clone)]
pub struct FeeStatus {
    pub student: Student,
    pub schedule: FeeSchedule,
    /// The stored entry, or the zero-paid opening view before any payment
    pub entry: LedgerEntry,
}

/// Result of an accepted payment
#[derive(Debug, Clone)]
pub struct PaymentResult {
    pub student: Student,
    pub schedule: FeeSchedule,
    pub entry: LedgerEntry,
    pub payment: Payment,
}

/// Result of a fee profile change
#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    pub student: Student,
    pub schedule: FeeSchedule,
    /// Every ledger entry of the student, re-derived against `schedule`
    pub entries: Vec<LedgerEntry>,
}

/// Everything needed to print a fee receipt for one academic year
#[derive(Debug, Clone, serde::Serialize)]
pub struct Receipt {
    pub student: Student,
    pub academic_year: AcademicYear,
    pub schedule: FeeSchedule,
    pub entry: LedgerEntry,
    pub payments: Vec<Payment>,
    pub issued_at: DateTime<Utc>,
}

impl FeeService {
    /// Create a new fee service with the given repository.
    pub fn new(repo: Repository, settings: ServiceSettings) -> Self {
        Self {
            repo,
            settings,
            locks: DashMap::new(),
        }
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str, settings: ServiceSettings) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(repo, settings))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str, settings: ServiceSettings) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Ok(Self::new(repo, settings))
    }

    pub fn fee_table(&self) -> &FeeTable {
        &self.settings.fee_table
    }

    /// Run `work` holding the student's lock, then drop the lock from the map
    /// unless another caller is already waiting on it.
    async fn with_student_lock<T, Fut>(
        &self,
        student_id: &str,
        work: impl FnOnce() -> Fut,
    ) -> Result<T, AppError>
    where
        Fut: Future<Output = Result<T, AppError>>,
    {
        let lock = self.locks.entry(student_id.to_string()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            work().await
        };
        drop(lock);
        self.locks
            .remove_if(student_id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    // ========================
    // Student operations
    // ========================

    /// Admit a student. The category must be priceable under the current fee
    /// table, so unknown codes fail here rather than at the first payment.
    #[instrument(skip(self, name))]
    pub async fn admit_student(
        &self,
        name: String,
        email: String,
        category: &str,
        scholarship_eligible: bool,
    ) -> Result<Student, AppError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::InvalidInput("student name is empty".into()));
        }
        if !is_plausible_email(&email) {
            return Err(AppError::InvalidEmail(email));
        }

        let schedule = self
            .settings
            .fee_table
            .compute_schedule(category, scholarship_eligible)?;

        let mut student =
            Student::new(name, email, category).with_scholarship(scholarship_eligible);

        // The store's unique constraints decide; a rejected insert is either a
        // taken email or an id collision.
        for _ in 0..STUDENT_ID_ATTEMPTS {
            if self.repo.save_student(&student).await? {
                info!(
                    student_id = %student.student_id,
                    category = %student.category,
                    payable = %format_cents(schedule.payable_fee()),
                    "student admitted"
                );
                return Ok(student);
            }
            if self.repo.get_student_by_email(&student.email).await?.is_some() {
                return Err(AppError::StudentAlreadyExists(student.email));
            }
            student.student_id = generate_student_id();
        }

        Err(AppError::InvalidInput(
            "could not allocate a unique student id".into(),
        ))
    }

    pub async fn get_student(&self, student_id: &str) -> Result<Student, AppError> {
        self.repo
            .get_student(student_id)
            .await?
            .ok_or_else(|| AppError::StudentNotFound(student_id.to_string()))
    }

    pub async fn find_student_by_email(&self, email: &str) -> Result<Option<Student>, AppError> {
        Ok(self.repo.get_student_by_email(&normalize_email(email)).await?)
    }

    pub async fn list_students(&self) -> Result<Vec<Student>, AppError> {
        Ok(self.repo.list_students().await?)
    }

    fn schedule_for(&self, student: &Student) -> Result<FeeSchedule, AppError> {
        Ok(self
            .settings
            .fee_table
            .compute_schedule(&student.category, student.scholarship_eligible)?)
    }

    /// Change a student's category and/or scholarship status, re-deriving the
    /// stored balances of every academic year against the new schedule.
    #[instrument(skip(self))]
    pub async fn update_profile(
        &self,
        student_id: &str,
        category: Option<&str>,
        scholarship_eligible: Option<bool>,
    ) -> Result<ProfileUpdate, AppError> {
        self.get_student(student_id).await?;
        self.with_student_lock(student_id, || {
            self.update_profile_locked(student_id, category, scholarship_eligible)
        })
        .await
    }

    async fn update_profile_locked(
        &self,
        student_id: &str,
        category: Option<&str>,
        scholarship_eligible: Option<bool>,
    ) -> Result<ProfileUpdate, AppError> {
        let attempts = self.settings.max_write_attempts;
        for attempt in 1..=attempts {
            let previous = self.get_student(student_id).await?;

            let mut updated = previous.clone();
            if let Some(category) = category {
                updated.category = normalize_category(category);
            }
            if let Some(eligible) = scholarship_eligible {
                updated.scholarship_eligible = eligible;
            }
            let schedule = self.schedule_for(&updated)?;

            let rederived = self
                .repo
                .list_student_entries(student_id)
                .await?
                .into_iter()
                .map(|stored| -> Result<(LedgerEntry, i64), AppError> {
                    Ok((stored.entry.rederive(&schedule)?, stored.version))
                })
                .collect::<Result<Vec<_>, _>>()?;

            if self
                .repo
                .commit_profile_update(&previous, &updated, &rederived)
                .await?
            {
                info!(
                    student_id,
                    category = %updated.category,
                    scholarship = updated.scholarship_eligible,
                    entries = rederived.len(),
                    "fee profile updated"
                );
                return Ok(ProfileUpdate {
                    student: updated,
                    schedule,
                    entries: rederived.into_iter().map(|(entry, _)| entry).collect(),
                });
            }
            warn!(student_id, attempt, "profile write conflict, retrying");
        }

        Err(AppError::ConcurrentModification {
            student_id: student_id.to_string(),
            attempts,
        })
    }

    // ========================
    // Fee operations
    // ========================

    /// Price a category without touching any student.
    pub fn preview_schedule(
        &self,
        category: &str,
        scholarship_eligible: bool,
    ) -> Result<FeeSchedule, AppError> {
        Ok(self
            .settings
            .fee_table
            .compute_schedule(category, scholarship_eligible)?)
    }

    /// Fee position of a student for one academic year.
    pub async fn get_fees(
        &self,
        student_id: &str,
        academic_year: AcademicYear,
    ) -> Result<FeeStatus, AppError> {
        let student = self.get_student(student_id).await?;
        let schedule = self.schedule_for(&student)?;
        let entry = match self.repo.get_ledger_entry(student_id, academic_year).await? {
            Some(stored) => stored.entry,
            None => LedgerEntry::opening(student_id, academic_year, &schedule),
        };

        Ok(FeeStatus {
            student,
            schedule,
            entry,
        })
    }

    /// Stored ledger entries of a student, oldest academic year first.
    pub async fn list_student_ledgers(
        &self,
        student_id: &str,
    ) -> Result<Vec<LedgerEntry>, AppError> {
        self.get_student(student_id).await?;
        Ok(self
            .repo
            .list_student_entries(student_id)
            .await?
            .into_iter()
            .map(|stored| stored.entry)
            .collect())
    }

    /// Record a fee payment against a student's ledger for `academic_year`.
    ///
    /// Loads the profile and the current entry, applies the payment and
    /// commits entry and payment record together. A concurrent writer
    /// invalidates the commit and the whole cycle is retried from a fresh read.
    #[instrument(skip(self, reference))]
    pub async fn pay_fees(
        &self,
        student_id: &str,
        academic_year: AcademicYear,
        amount_cents: Cents,
        paid_at: DateTime<Utc>,
        reference: Option<String>,
    ) -> Result<PaymentResult, AppError> {
        self.get_student(student_id).await?;
        self.with_student_lock(student_id, || {
            self.pay_fees_locked(student_id, academic_year, amount_cents, paid_at, reference)
        })
        .await
    }

    async fn pay_fees_locked(
        &self,
        student_id: &str,
        academic_year: AcademicYear,
        amount_cents: Cents,
        paid_at: DateTime<Utc>,
        reference: Option<String>,
    ) -> Result<PaymentResult, AppError> {
        let attempts = self.settings.max_write_attempts;
        for attempt in 1..=attempts {
            let student = self.get_student(student_id).await?;
            let schedule = self.schedule_for(&student)?;
            let stored = self.repo.get_ledger_entry(student_id, academic_year).await?;

            let entry = apply_payment(
                &schedule,
                &student.student_id,
                academic_year,
                stored.as_ref().map(|s| &s.entry),
                amount_cents,
                paid_at,
            )?;

            let mut payment = Payment::new(
                student.student_id.clone(),
                academic_year,
                amount_cents,
                paid_at,
            );
            if let Some(reference) = &reference {
                payment = payment.with_reference(reference.clone());
            }

            let committed = self
                .repo
                .commit_payment(
                    &student,
                    &entry,
                    stored.as_ref().map(|s| s.version),
                    &mut payment,
                )
                .await?;

            if committed {
                // Notification hook: downstream dispatchers subscribe to this event.
                info!(
                    student_id,
                    academic_year = %academic_year,
                    amount = %format_cents(amount_cents),
                    amount_paid = %format_cents(entry.amount_paid),
                    remaining = %format_cents(entry.remaining_fees),
                    excess = %format_cents(entry.excess_amount),
                    sequence = payment.sequence,
                    "payment accepted"
                );
                return Ok(PaymentResult {
                    student,
                    schedule,
                    entry,
                    payment,
                });
            }
            warn!(student_id, attempt, "ledger write conflict, retrying");
        }

        Err(AppError::ConcurrentModification {
            student_id: student_id.to_string(),
            attempts,
        })
    }

    /// Receipt for one academic year with its payment history.
    pub async fn get_receipt(
        &self,
        student_id: &str,
        academic_year: AcademicYear,
    ) -> Result<Receipt, AppError> {
        let status = self.get_fees(student_id, academic_year).await?;
        let payments = self
            .repo
            .list_payments(Some(student_id), Some(academic_year))
            .await?;

        Ok(Receipt {
            student: status.student,
            academic_year,
            schedule: status.schedule,
            entry: status.entry,
            payments,
            issued_at: Utc::now(),
        })
    }

    /// List payments in recording order.
    pub async fn list_payments(&self, filter: &PaymentFilter) -> Result<Vec<Payment>, AppError> {
        if let Some(id) = &filter.student_id {
            self.get_student(id).await?;
        }
        Ok(self
            .repo
            .list_payments(filter.student_id.as_deref(), filter.academic_year)
            .await?)
    }

    pub async fn list_ledger_entries(&self) -> Result<Vec<StoredEntry>, AppError> {
        Ok(self.repo.list_ledger_entries().await?)
    }

    // ========================
    // Integrity operations
    // ========================

    /// Audit every stored entry against its payment records and the student's
    /// current schedule.
    pub async fn verify_ledger(&self) -> Result<IntegrityReport, AppError> {
        let entries = self.repo.list_ledger_entries().await?;
        let mut totals = self.repo.payment_totals().await?;
        let students: HashMap<StudentId, Student> = self
            .repo
            .list_students()
            .await?
            .into_iter()
            .map(|s| (s.student_id.clone(), s))
            .collect();

        let mut report = IntegrityReport {
            entries_checked: entries.len(),
            issues: Vec::new(),
        };
        let mut unpriced = HashSet::new();

        for stored in &entries {
            let entry = &stored.entry;
            let summed = totals
                .remove(&(entry.student_id.clone(), entry.academic_year))
                .map_or(0, |t| t.total_cents);

            let student = students
                .get(&entry.student_id)
                .ok_or_else(|| AppError::StudentNotFound(entry.student_id.clone()))?;
            match self.schedule_for(student) {
                Ok(schedule) => report.issues.extend(audit_entry(entry, &schedule, summed)),
                Err(e) => {
                    if unpriced.insert(student.student_id.clone()) {
                        report.issues.push(LedgerIssue::UnpricedStudent {
                            student_id: student.student_id.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        let mut orphans: Vec<_> = totals.into_iter().collect();
        orphans.sort_by(|a, b| a.0.cmp(&b.0));
        for ((student_id, academic_year), totals) in orphans {
            report.issues.push(LedgerIssue::MissingEntry {
                student_id,
                academic_year,
                summed: totals.total_cents,
            });
        }

        Ok(report)
    }
}
