use anyhow::Result;
use std::collections::HashSet;
use std::io::Read;

use crate::application::{AppError, FeeService};
use crate::domain::{is_plausible_email, normalize_email};

/// Result of an import operation
#[derive(Debug, Clone, Default)]
pub struct ImportResult {
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<ImportError>,
}

/// Error that occurred during import
#[derive(Debug, Clone)]
pub struct ImportError {
    pub line: usize,
    pub field: Option<String>,
    pub error: String,
}

/// Options for import operations
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub dry_run: bool,
    pub skip_duplicates: bool,
}

/// Importer for bulk admissions
pub struct Importer<'a> {
    service: &'a FeeService,
}

impl<'a> Importer<'a> {
    pub fn new(service: &'a FeeService) -> Self {
        Self { service }
    }

    /// Import admissions from CSV with header `name,email,category,scholarship`.
    ///
    /// Rows are validated independently; a bad row is reported and the rest
    /// still import.
    pub async fn import_students_csv<R: Read>(
        &self,
        reader: R,
        options: ImportOptions,
    ) -> Result<ImportResult> {
        let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut result = ImportResult::default();
        // Normalized emails accepted so far in a dry run
        let mut seen = HashSet::new();

        for (line_num, record) in csv_reader.records().enumerate() {
            // Quoted fields may span lines; fall back to +2 for header and 0-indexing
            let fallback = line_num + 2;

            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    result.errors.push(ImportError {
                        line: e.position().map_or(fallback, |p| p.line() as usize),
                        field: None,
                        error: format!("CSV parse error: {}", e),
                    });
                    continue;
                }
            };

            let line = record.position().map_or(fallback, |p| p.line() as usize);

            let name = record.get(0).unwrap_or("");
            let email = record.get(1).unwrap_or("");
            let category = record.get(2).unwrap_or("");
            let scholarship_str = record.get(3).unwrap_or("");

            let scholarship = match parse_flag(scholarship_str) {
                Some(flag) => flag,
                None => {
                    result.errors.push(ImportError {
                        line,
                        field: Some("scholarship".to_string()),
                        error: format!("Invalid flag '{}'", scholarship_str),
                    });
                    continue;
                }
            };

            if options.dry_run {
                match self.check_row(name, email, category, scholarship, &seen).await? {
                    None => {
                        seen.insert(normalize_email(email));
                        result.imported += 1;
                    }
                    Some(problem) if problem.duplicate && options.skip_duplicates => {
                        result.skipped += 1;
                    }
                    Some(problem) => result.errors.push(ImportError {
                        line,
                        field: Some(problem.field.to_string()),
                        error: problem.error,
                    }),
                }
                continue;
            }

            match self
                .service
                .admit_student(name.to_string(), email.to_string(), category, scholarship)
                .await
            {
                Ok(_) => result.imported += 1,
                Err(AppError::StudentAlreadyExists(_)) if options.skip_duplicates => {
                    result.skipped += 1;
                }
                Err(AppError::Database(e)) => return Err(e),
                Err(e) => result.errors.push(ImportError {
                    line,
                    field: field_for(&e),
                    error: e.to_string(),
                }),
            }
        }

        Ok(result)
    }

    /// Everything `admit_student` checks, short of writing. `seen` holds the
    /// emails of earlier rows that would have been admitted.
    async fn check_row(
        &self,
        name: &str,
        email: &str,
        category: &str,
        scholarship: bool,
        seen: &HashSet<String>,
    ) -> Result<Option<RowProblem>> {
        let problem = |field: &'static str, error: String| -> Result<Option<RowProblem>> {
            Ok(Some(RowProblem {
                field,
                error,
                duplicate: false,
            }))
        };

        if name.is_empty() {
            return problem("name", "student name is empty".into());
        }
        if !is_plausible_email(email) {
            return problem("email", format!("Invalid email address: {}", email));
        }
        if let Err(e) = self.service.preview_schedule(category, scholarship) {
            return problem("category", e.to_string());
        }

        let email = normalize_email(email);
        if seen.contains(&email)
            || self.service.find_student_by_email(&email).await?.is_some()
        {
            return Ok(Some(RowProblem {
                field: "email",
                error: format!("Student already exists with email: {}", email),
                duplicate: true,
            }));
        }
        Ok(None)
    }
}

struct RowProblem {
    field: &'static str,
    error: String,
    duplicate: bool,
}

fn field_for(error: &AppError) -> Option<String> {
    let field = match error {
        AppError::InvalidEmail(_) | AppError::StudentAlreadyExists(_) => "email",
        AppError::Fee(_) => "category",
        AppError::InvalidInput(_) => "name",
        _ => return None,
    };
    Some(field.to_string())
}

/// Accepts true/false, yes/no, y/n, 1/0 (case-insensitive); empty means false.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" | "" => Some(false),
        _ => None,
    }
}
