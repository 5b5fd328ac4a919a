pub mod allocate;
pub mod penalty;
pub mod schedule;

use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use agrilend_core::schedule::{Installment, InstallmentStatus};
use agrilend_core::types::LoanId;

/// One schedule row as it appears in CLI input/output files. A trimmed-down
/// view of the engine's installment: dates are plain days and the
/// principal/interest split is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub installment_number: u32,
    /// Due day, YYYY-MM-DD.
    pub due_date: NaiveDate,
    pub amount: Decimal,
    #[serde(default)]
    pub amount_paid: Decimal,
    #[serde(default)]
    pub penalty_amount: Decimal,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    "PENDING".to_string()
}

pub fn parse_status(raw: &str) -> Result<InstallmentStatus, Box<dyn std::error::Error>> {
    match raw.to_ascii_uppercase().as_str() {
        "PENDING" => Ok(InstallmentStatus::Pending),
        "PARTIAL" | "PARTIALLY_PAID" => Ok(InstallmentStatus::Partial),
        "OVERDUE" => Ok(InstallmentStatus::Overdue),
        "PAID" => Ok(InstallmentStatus::Paid),
        other => Err(format!("unknown installment status '{other}'").into()),
    }
}

pub fn status_label(status: InstallmentStatus) -> &'static str {
    match status {
        InstallmentStatus::Pending => "PENDING",
        InstallmentStatus::Partial => "PARTIAL",
        InstallmentStatus::Overdue => "OVERDUE",
        InstallmentStatus::Paid => "PAID",
    }
}

impl ScheduleRow {
    pub fn to_installment(&self) -> Result<Installment, Box<dyn std::error::Error>> {
        Ok(Installment {
            loan_id: LoanId::nil(),
            installment_number: self.installment_number,
            due_date: self.due_date.and_time(NaiveTime::MIN).and_utc(),
            principal_amount: self.amount,
            interest_amount: Decimal::ZERO,
            amount: self.amount,
            amount_paid: self.amount_paid,
            penalty_amount: self.penalty_amount,
            status: parse_status(&self.status)?,
            last_reminder_at: None,
        })
    }

    pub fn from_installment(row: &Installment) -> Self {
        Self {
            installment_number: row.installment_number,
            due_date: row.due_date.date_naive(),
            amount: row.amount,
            amount_paid: row.amount_paid,
            penalty_amount: row.penalty_amount,
            status: status_label(row.status).to_string(),
        }
    }
}

/// Parse a YYYY-MM-DD flag value.
pub fn parse_day(raw: &str, flag: &str) -> Result<NaiveDate, Box<dyn std::error::Error>> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| format!("{flag} expects YYYY-MM-DD, got '{raw}': {e}").into())
}
