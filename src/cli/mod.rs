use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};

use crate::application::{FeeService, PaymentFilter, ServiceSettings};
use crate::config::AppConfig;
use crate::domain::{AcademicYear, FeeSchedule, LedgerIssue, format_cents, parse_cents};
use crate::io::{Exporter, ImportOptions, Importer, write_receipt_json, write_receipt_text};

/// feeledger - Student Fee Ledger
#[derive(Parser)]
#[command(name = "feeledger")]
#[command(about = "Track student fee schedules, payments and receipts")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "feeledger.db")]
    pub database: String,

    /// Config file (TOML). Defaults to ./feeledger.toml when present
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose (debug) logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Student management commands
    #[command(subcommand)]
    Student(StudentCommands),

    /// Show a student's fee position
    Fees {
        /// Student ID (e.g. STU4F0Z9C)
        student_id: String,

        /// Academic year, e.g. 2024-25 (defaults to the current one)
        #[arg(short, long)]
        year: Option<AcademicYear>,
    },

    /// Record a fee payment
    Pay {
        /// Student ID
        student_id: String,

        /// Amount paid (e.g., "20000" or "20000.50")
        amount: String,

        /// Date of the payment (YYYY-MM-DD, defaults to now)
        #[arg(long)]
        date: Option<String>,

        /// Academic year credited, e.g. 2024-25 (defaults to the year of the payment date)
        #[arg(short, long)]
        year: Option<AcademicYear>,

        /// Bank or counter receipt reference
        #[arg(short, long)]
        reference: Option<String>,
    },

    /// Print a fee receipt with payment history
    Receipt {
        /// Student ID
        student_id: String,

        /// Academic year, e.g. 2024-25 (defaults to the current one)
        #[arg(short, long)]
        year: Option<AcademicYear>,

        /// Format: text, json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Show the fee schedule for a category
    Schedule {
        /// Category code (e.g., OPEN, SC, OBC)
        category: String,

        /// Apply the scholarship discount
        #[arg(long)]
        scholarship: bool,
    },

    /// List recorded payments
    Payments {
        /// Filter by student ID
        #[arg(long)]
        student: Option<String>,

        /// Filter by academic year
        #[arg(short, long)]
        year: Option<AcademicYear>,
    },

    /// Verify ledger entries against payment records
    Check,

    /// Export data to CSV
    Export {
        /// What to export: payments, ledger
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,

        /// Only payments of this student
        #[arg(long)]
        student: Option<String>,

        /// Only payments credited to this academic year
        #[arg(long)]
        year: Option<AcademicYear>,
    },

    /// Import data from CSV
    Import {
        /// What to import: students
        import_type: String,

        /// Input file (stdin if omitted)
        #[arg(short, long)]
        input: Option<String>,

        /// Validate without importing
        #[arg(long)]
        dry_run: bool,

        /// Skip rows whose email is already admitted
        #[arg(long)]
        skip_duplicates: bool,
    },
}

#[derive(Subcommand)]
pub enum StudentCommands {
    /// Admit a new student
    Admit {
        /// Full name
        name: String,

        /// Email address (must be unique)
        #[arg(short, long)]
        email: String,

        /// Category code (e.g., OPEN, SC, OBC)
        #[arg(short, long)]
        category: String,

        /// Student is scholarship-eligible
        #[arg(long)]
        scholarship: bool,
    },

    /// List all students
    List,

    /// Show student details
    Show {
        /// Student ID
        student_id: String,
    },

    /// Change category or scholarship status
    Update {
        /// Student ID
        student_id: String,

        /// New category code
        #[arg(short, long)]
        category: Option<String>,

        /// New scholarship status (true/false)
        #[arg(long)]
        scholarship: Option<bool>,
    },
}

impl Cli {
    fn settings(&self) -> Result<ServiceSettings> {
        let config = AppConfig::load(self.config.as_deref()).context("Failed to load config")?;
        config.service_settings()
    }

    pub async fn run(self) -> Result<()> {
        let settings = self.settings()?;

        if matches!(self.command, Commands::Init) {
            FeeService::init(&self.database, settings).await?;
            println!("Database initialized: {}", self.database);
            return Ok(());
        }

        // Pricing needs no database
        if let Commands::Schedule {
            category,
            scholarship,
        } = &self.command
        {
            let schedule = settings.fee_table.compute_schedule(category, *scholarship)?;
            print_schedule(&schedule);
            return Ok(());
        }

        let service = FeeService::connect(&self.database, settings).await?;

        match self.command {
            Commands::Init | Commands::Schedule { .. } => {}

            Commands::Student(cmd) => run_student_command(&service, cmd).await?,

            Commands::Fees { student_id, year } => {
                let year = year.unwrap_or_else(AcademicYear::current);
                let status = service.get_fees(&student_id, year).await?;
                println!("Student: {} ({})", status.student.name, status.student.student_id);
                println!("  Academic year: {}", year);
                print_schedule(&status.schedule);
                println!("  Paid to date:  {:>14}", format_cents(status.entry.amount_paid));
                println!("  Remaining:     {:>14}", format_cents(status.entry.remaining_fees));
                println!("  Excess:        {:>14}", format_cents(status.entry.excess_amount));
                if let Some(last) = status.entry.last_payment_date {
                    println!("  Last payment:  {}", last.format("%Y-%m-%d"));
                }
            }

            Commands::Pay {
                student_id,
                amount,
                date,
                year,
                reference,
            } => {
                let amount_cents = parse_cents(&amount)
                    .with_context(|| format!("Invalid amount format '{}'", amount))?;
                let paid_at = match date {
                    Some(date_str) => parse_date(&date_str).with_context(|| {
                        format!("Invalid date format '{}'. Use YYYY-MM-DD", date_str)
                    })?,
                    None => Utc::now(),
                };
                let year = year.unwrap_or_else(|| AcademicYear::containing(paid_at));

                let result = service
                    .pay_fees(&student_id, year, amount_cents, paid_at, reference)
                    .await?;

                println!(
                    "Recorded payment #{}: {} for {} ({})",
                    result.payment.sequence,
                    format_cents(result.payment.amount_cents),
                    result.student.student_id,
                    year
                );
                println!(
                    "Paid {} of {} | remaining {} | excess {}",
                    format_cents(result.entry.amount_paid),
                    format_cents(result.schedule.payable_fee()),
                    format_cents(result.entry.remaining_fees),
                    format_cents(result.entry.excess_amount)
                );
            }

            Commands::Receipt {
                student_id,
                year,
                format,
                output,
            } => {
                let year = year.unwrap_or_else(AcademicYear::current);
                let receipt = service.get_receipt(&student_id, year).await?;
                let writer = open_output(output.as_deref())?;
                match format.as_str() {
                    "text" => write_receipt_text(&receipt, writer)?,
                    "json" => write_receipt_json(&receipt, writer)?,
                    other => bail!("Unknown receipt format '{}'. Use text or json", other),
                }
            }

            Commands::Payments { student, year } => {
                let filter = PaymentFilter {
                    student_id: student,
                    academic_year: year,
                };
                let payments = service.list_payments(&filter).await?;
                if payments.is_empty() {
                    println!("No payments found.");
                } else {
                    println!(
                        "{:<6} {:<12} {:<8} {:<12} {:>14}  {}",
                        "SEQ", "STUDENT", "YEAR", "DATE", "AMOUNT", "REFERENCE"
                    );
                    println!("{}", "-".repeat(69));
                    for p in payments {
                        println!(
                            "{:<6} {:<12} {:<8} {:<12} {:>14}  {}",
                            p.sequence,
                            p.student_id,
                            p.academic_year.to_string(),
                            p.paid_at.format("%Y-%m-%d"),
                            format_cents(p.amount_cents),
                            p.reference.as_deref().unwrap_or("-")
                        );
                    }
                }
            }

            Commands::Check => {
                let report = service.verify_ledger().await?;
                println!("Checked {} ledger entries", report.entries_checked);
                if report.is_valid() {
                    println!("Ledger is consistent.");
                } else {
                    for issue in &report.issues {
                        println!("  ! {}", describe_issue(issue));
                    }
                    bail!("{} ledger issue(s) found", report.issues.len());
                }
            }

            Commands::Export {
                export_type,
                output,
                student,
                year,
            } => {
                let exporter = Exporter::new(&service);
                let writer = open_output(output.as_deref())?;
                let count = match export_type.as_str() {
                    "payments" => {
                        let filter = PaymentFilter {
                            student_id: student,
                            academic_year: year,
                        };
                        exporter.export_payments_csv(writer, &filter).await?
                    }
                    "ledger" => exporter.export_ledger_csv(writer).await?,
                    other => bail!("Unknown export type '{}'. Use payments or ledger", other),
                };
                if output.is_some() {
                    eprintln!("Exported {} record(s)", count);
                }
            }

            Commands::Import {
                import_type,
                input,
                dry_run,
                skip_duplicates,
            } => {
                if import_type != "students" {
                    bail!("Unknown import type '{}'. Use students", import_type);
                }
                let reader: Box<dyn io::Read> = match input {
                    Some(path) => Box::new(BufReader::new(
                        File::open(&path).with_context(|| format!("Cannot open {}", path))?,
                    )),
                    None => Box::new(io::stdin()),
                };

                let result = Importer::new(&service)
                    .import_students_csv(
                        reader,
                        ImportOptions {
                            dry_run,
                            skip_duplicates,
                        },
                    )
                    .await?;

                let verb = if dry_run { "Would import" } else { "Imported" };
                println!("{} {} student(s), skipped {}", verb, result.imported, result.skipped);
                for error in &result.errors {
                    match &error.field {
                        Some(field) => println!("  line {} [{}]: {}", error.line, field, error.error),
                        None => println!("  line {}: {}", error.line, error.error),
                    }
                }
                if !result.errors.is_empty() {
                    bail!("{} row(s) failed", result.errors.len());
                }
            }
        }

        Ok(())
    }
}

async fn run_student_command(service: &FeeService, cmd: StudentCommands) -> Result<()> {
    match cmd {
        StudentCommands::Admit {
            name,
            email,
            category,
            scholarship,
        } => {
            let student = service
                .admit_student(name, email, &category, scholarship)
                .await?;
            println!("Admitted student: {} ({})", student.name, student.student_id);
        }

        StudentCommands::List => {
            let students = service.list_students().await?;
            if students.is_empty() {
                println!("No students found.");
            } else {
                println!(
                    "{:<12} {:<24} {:<10} {:<11}",
                    "ID", "NAME", "CATEGORY", "SCHOLARSHIP"
                );
                println!("{}", "-".repeat(60));
                for s in students {
                    println!(
                        "{:<12} {:<24} {:<10} {:<11}",
                        s.student_id,
                        s.name,
                        s.category,
                        if s.scholarship_eligible { "yes" } else { "no" }
                    );
                }
            }
        }

        StudentCommands::Show { student_id } => {
            let student = service.get_student(&student_id).await?;
            println!("Student: {}", student.name);
            println!("  ID:           {}", student.student_id);
            println!("  Email:        {}", student.email);
            println!("  Category:     {}", student.category);
            println!(
                "  Scholarship:  {}",
                if student.scholarship_eligible { "yes" } else { "no" }
            );
            println!(
                "  Admitted:     {}",
                student.admitted_at.format("%Y-%m-%d %H:%M:%S")
            );

            let ledgers = service.list_student_ledgers(&student_id).await?;
            if !ledgers.is_empty() {
                println!();
                println!(
                    "  {:<8} {:>14} {:>14} {:>14}",
                    "YEAR", "PAID", "REMAINING", "EXCESS"
                );
                for entry in ledgers {
                    println!(
                        "  {:<8} {:>14} {:>14} {:>14}",
                        entry.academic_year.to_string(),
                        format_cents(entry.amount_paid),
                        format_cents(entry.remaining_fees),
                        format_cents(entry.excess_amount)
                    );
                }
            }
        }

        StudentCommands::Update {
            student_id,
            category,
            scholarship,
        } => {
            if category.is_none() && scholarship.is_none() {
                bail!("Nothing to update: pass --category and/or --scholarship");
            }
            let update = service
                .update_profile(&student_id, category.as_deref(), scholarship)
                .await?;
            println!(
                "Updated {}: {} ({}), payable {}",
                update.student.student_id,
                update.schedule.category,
                update.schedule.tier,
                format_cents(update.schedule.payable_fee())
            );
            for entry in &update.entries {
                println!(
                    "Re-derived {}: remaining {} | excess {}",
                    entry.academic_year,
                    format_cents(entry.remaining_fees),
                    format_cents(entry.excess_amount)
                );
            }
        }
    }

    Ok(())
}

fn print_schedule(schedule: &FeeSchedule) {
    println!("  Category:      {} ({})", schedule.category, schedule.tier);
    println!("  Base fee:      {:>14}", format_cents(schedule.base_fee));
    println!(
        "  Discount:      {:>14}",
        format_cents(schedule.scholarship_discount)
    );
    println!("  Payable fee:   {:>14}", format_cents(schedule.payable_fee()));
}

fn describe_issue(issue: &LedgerIssue) -> String {
    match issue {
        LedgerIssue::PaidTotalMismatch {
            student_id,
            academic_year,
            recorded,
            summed,
        } => format!(
            "{} {}: ledger says {} paid, payments sum to {}",
            student_id,
            academic_year,
            format_cents(*recorded),
            format_cents(*summed)
        ),
        LedgerIssue::StaleBalance {
            student_id,
            academic_year,
            remaining_fees,
            excess_amount,
            expected_remaining,
            expected_excess,
        } => format!(
            "{} {}: remaining/excess {}/{} but schedule gives {}/{}",
            student_id,
            academic_year,
            format_cents(*remaining_fees),
            format_cents(*excess_amount),
            format_cents(*expected_remaining),
            format_cents(*expected_excess)
        ),
        LedgerIssue::MissingEntry {
            student_id,
            academic_year,
            summed,
        } => format!(
            "{} {}: {} in payments but no ledger entry",
            student_id,
            academic_year,
            format_cents(*summed)
        ),
        LedgerIssue::UnpricedStudent { student_id, reason } => {
            format!("{}: cannot compute schedule ({})", student_id, reason)
        }
    }
}

fn open_output(path: Option<&str>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Cannot create {}", path))?,
        )),
        None => Box::new(io::stdout()),
    })
}

/// Parse a date string in YYYY-MM-DD format into a DateTime<Utc> at midnight.
fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    let naive_date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .context("Date must be in YYYY-MM-DD format")?;

    let naive_datetime = naive_date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow::anyhow!("Invalid date"))?;

    Ok(DateTime::from_naive_utc_and_offset(naive_datetime, Utc))
}
