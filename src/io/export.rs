use anyhow::Result;
use std::io::Write;

use crate::application::{FeeService, PaymentFilter, Receipt};
use crate::domain::format_cents;

/// Exporter for writing ledger data out as CSV or JSON
pub struct Exporter<'a> {
    service: &'a FeeService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a FeeService) -> Self {
        Self { service }
    }

    /// Export payments to CSV, optionally narrowed to a student or academic year
    pub async fn export_payments_csv<W: Write>(
        &self,
        writer: W,
        filter: &PaymentFilter,
    ) -> Result<usize> {
        let payments = self.service.list_payments(filter).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "sequence",
            "student_id",
            "academic_year",
            "amount",
            "paid_at",
            "recorded_at",
            "reference",
        ])?;

        for payment in &payments {
            csv_writer.write_record([
                payment.id.to_string(),
                payment.sequence.to_string(),
                payment.student_id.clone(),
                payment.academic_year.to_string(),
                format_cents(payment.amount_cents),
                payment.paid_at.to_rfc3339(),
                payment.recorded_at.to_rfc3339(),
                payment.reference.clone().unwrap_or_default(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(payments.len())
    }

    /// Export the ledger snapshot (one row per student and academic year) to CSV
    pub async fn export_ledger_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let entries = self.service.list_ledger_entries().await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "student_id",
            "academic_year",
            "amount_paid",
            "remaining_fees",
            "excess_amount",
            "last_payment_date",
            "version",
        ])?;

        for stored in &entries {
            let entry = &stored.entry;
            csv_writer.write_record([
                entry.student_id.clone(),
                entry.academic_year.to_string(),
                format_cents(entry.amount_paid),
                format_cents(entry.remaining_fees),
                format_cents(entry.excess_amount),
                entry
                    .last_payment_date
                    .map(|d| d.to_rfc3339())
                    .unwrap_or_default(),
                stored.version.to_string(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(entries.len())
    }
}

/// Write a receipt as pretty-printed JSON
pub fn write_receipt_json<W: Write>(receipt: &Receipt, mut writer: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, receipt)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Write a receipt as a plain-text block
pub fn write_receipt_text<W: Write>(receipt: &Receipt, mut writer: W) -> Result<()> {
    let student = &receipt.student;
    let schedule = &receipt.schedule;
    let entry = &receipt.entry;

    writeln!(writer, "FEE RECEIPT")?;
    writeln!(writer, "{}", "=".repeat(44))?;
    writeln!(writer, "Student:        {} ({})", student.name, student.student_id)?;
    writeln!(writer, "Email:          {}", student.email)?;
    writeln!(writer, "Academic year:  {}", receipt.academic_year)?;
    writeln!(writer, "Category:       {} ({})", schedule.category, schedule.tier)?;
    writeln!(
        writer,
        "Scholarship:    {}",
        if student.scholarship_eligible { "yes" } else { "no" }
    )?;
    writeln!(writer)?;
    writeln!(writer, "Base fee:       {:>14}", format_cents(schedule.base_fee))?;
    writeln!(
        writer,
        "Discount:       {:>14}",
        format_cents(schedule.scholarship_discount)
    )?;
    writeln!(writer, "Payable fee:    {:>14}", format_cents(schedule.payable_fee()))?;
    writeln!(writer, "Paid to date:   {:>14}", format_cents(entry.amount_paid))?;
    writeln!(writer, "Remaining:      {:>14}", format_cents(entry.remaining_fees))?;
    if entry.excess_amount > 0 {
        writeln!(writer, "Excess:         {:>14}", format_cents(entry.excess_amount))?;
    }
    writeln!(writer)?;

    if receipt.payments.is_empty() {
        writeln!(writer, "No payments recorded.")?;
    } else {
        writeln!(writer, "{:<6} {:<12} {:>14}  {}", "SEQ", "DATE", "AMOUNT", "REFERENCE")?;
        writeln!(writer, "{}", "-".repeat(44))?;
        for payment in &receipt.payments {
            writeln!(
                writer,
                "{:<6} {:<12} {:>14}  {}",
                payment.sequence,
                payment.paid_at.format("%Y-%m-%d"),
                format_cents(payment.amount_cents),
                payment.reference.as_deref().unwrap_or("-")
            )?;
        }
    }

    writeln!(writer)?;
    writeln!(
        writer,
        "Issued: {}",
        receipt.issued_at.format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writer.flush()?;
    Ok(())
}
