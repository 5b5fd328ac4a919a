use chrono::Utc;
use clap::Args;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use agrilend_core::accrual::{compute_penalty, PENALTY_CAP_RATE};
use agrilend_core::types::to_cents;

use super::{parse_day, parse_status, ScheduleRow};
use crate::input;

/// Arguments for computing overdue penalties
#[derive(Args)]
pub struct PenaltyArgs {
    /// Path to a JSON file holding the schedule rows (or pipe via stdin)
    #[arg(long)]
    pub input: Option<String>,

    /// Reference date (YYYY-MM-DD); defaults to today
    #[arg(long)]
    pub as_of: Option<String>,
}

pub fn run_penalty(args: PenaltyArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let rows: Vec<ScheduleRow> = if let Some(ref path) = args.input {
        input::file::read_json(path)?
    } else if let Some(data) = input::stdin::read_stdin()? {
        serde_json::from_value(data)?
    } else {
        return Err("--input is required (or pipe schedule rows via stdin)".into());
    };

    let as_of = match &args.as_of {
        Some(raw) => parse_day(raw, "--as-of")?,
        None => Utc::now().date_naive(),
    };

    let mut total_penalty = Decimal::ZERO;
    let mut report = Vec::new();
    for row in &rows {
        let status = parse_status(&row.status)?;
        if !status.is_outstanding() || row.due_date >= as_of {
            continue;
        }
        let days_overdue = (as_of - row.due_date).num_days();
        let penalty = compute_penalty(row.amount, days_overdue);
        let cap = to_cents(row.amount * PENALTY_CAP_RATE);
        total_penalty += penalty;
        report.push(json!({
            "installment_number": row.installment_number,
            "due_date": row.due_date,
            "days_overdue": days_overdue,
            "penalty_amount": penalty,
            "capped": penalty >= cap,
        }));
    }

    Ok(json!({
        "result": {
            "as_of": as_of,
            "overdue_installments": report,
            "total_penalty": total_penalty,
        },
        "assumptions": {
            "daily_rate": "1% of installment amount per day overdue",
            "cap": "30% of installment amount",
        },
    }))
}
