use clap::Args;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use agrilend_core::allocation::allocate;

use super::{status_label, ScheduleRow};
use crate::input;

/// Arguments for a payment-allocation dry run
#[derive(Args)]
pub struct AllocateArgs {
    /// Path to a JSON file holding the schedule rows (or pipe via stdin)
    #[arg(long)]
    pub input: Option<String>,

    /// Payment amount to distribute
    #[arg(long)]
    pub amount: Decimal,
}

pub fn run_allocate(args: AllocateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let rows: Vec<ScheduleRow> = if let Some(ref path) = args.input {
        input::file::read_json(path)?
    } else if let Some(data) = input::stdin::read_stdin()? {
        serde_json::from_value(data)?
    } else {
        return Err("--input is required (or pipe schedule rows via stdin)".into());
    };

    let mut installments = rows
        .iter()
        .map(|r| r.to_installment())
        .collect::<Result<Vec<_>, _>>()?;

    let outcome = allocate(&mut installments, args.amount)?;

    let lines: Vec<Value> = outcome
        .lines
        .iter()
        .map(|l| {
            json!({
                "installment_number": l.installment_number,
                "applied": l.applied,
                "new_status": status_label(l.new_status),
            })
        })
        .collect();
    let schedule: Vec<ScheduleRow> = installments.iter().map(ScheduleRow::from_installment).collect();

    Ok(json!({
        "result": {
            "allocated": outcome.allocated,
            "remainder": outcome.remainder,
            "lines": lines,
            "schedule": schedule,
        },
    }))
}
