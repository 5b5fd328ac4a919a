use chrono::{NaiveTime, Utc};
use clap::{Args, ValueEnum};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use agrilend_core::loan::Loan;
use agrilend_core::product::{LoanProduct, ScheduleType};
use agrilend_core::schedule::build_schedule;
use agrilend_core::types::{FarmerId, Msisdn, ProductId};

use super::parse_day;

/// Arguments for previewing an installment plan
#[derive(Args)]
pub struct ScheduleArgs {
    /// Principal amount to schedule
    #[arg(long)]
    pub amount: Decimal,

    /// Annual interest rate in percent (e.g. 15 for 15% APR)
    #[arg(long, alias = "rate")]
    pub annual_rate: Decimal,

    /// Loan duration in days
    #[arg(long, default_value_t = 90)]
    pub duration_days: i64,

    /// Schedule layout
    #[arg(long, value_enum, default_value = "fixed")]
    pub schedule_type: ScheduleKind,

    /// Days of grace after each harvest date
    #[arg(long, default_value_t = 0)]
    pub grace_days: i64,

    /// Expected harvest date (YYYY-MM-DD); repeat for several harvests
    #[arg(long = "harvest-date")]
    pub harvest_dates: Vec<String>,

    /// Disbursement date (YYYY-MM-DD); defaults to today
    #[arg(long)]
    pub disbursed_on: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ScheduleKind {
    Fixed,
    Harvest,
}

pub fn run_schedule(args: ScheduleArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let disbursed_at = match &args.disbursed_on {
        Some(raw) => parse_day(raw, "--disbursed-on")?
            .and_time(NaiveTime::MIN)
            .and_utc(),
        None => Utc::now(),
    };

    let harvest_dates = args
        .harvest_dates
        .iter()
        .map(|raw| parse_day(raw, "--harvest-date"))
        .collect::<Result<Vec<_>, _>>()?;

    let schedule_type = match args.schedule_type {
        ScheduleKind::Fixed => ScheduleType::Fixed,
        ScheduleKind::Harvest => ScheduleType::Harvest,
    };

    let product = LoanProduct {
        id: ProductId::new(),
        name: "preview".into(),
        min_amount: args.amount,
        max_amount: args.amount,
        interest_rate: args.annual_rate,
        duration_days: args.duration_days,
        schedule_type,
        grace_period_days: args.grace_days,
        is_active: true,
        created_at: disbursed_at,
    };

    // A throwaway loan carries the terms through the generator.
    let phone = Msisdn::new("250000000000")?;
    let mut loan = Loan::new(FarmerId::new(), product.id, phone, args.amount, None, disbursed_at);
    loan.approve(None, disbursed_at)?;
    loan.mark_disbursed(args.duration_days, disbursed_at)?;

    let rows = build_schedule(&loan, &product, &harvest_dates)?;

    let total_principal: Decimal = rows.iter().map(|r| r.principal_amount).sum();
    let total_interest: Decimal = rows.iter().map(|r| r.interest_amount).sum();
    let installments: Vec<Value> = rows
        .iter()
        .map(|r| {
            json!({
                "installment_number": r.installment_number,
                "due_date": r.due_date.date_naive(),
                "principal_amount": r.principal_amount,
                "interest_amount": r.interest_amount,
                "amount": r.amount,
                "status": super::status_label(r.status),
            })
        })
        .collect();

    Ok(json!({
        "result": {
            "installments": installments,
            "total_principal": total_principal,
            "total_interest": total_interest,
            "total_due": total_principal + total_interest,
        },
        "assumptions": {
            "period_days": 30,
            "interest_convention": "monthly rate on declining balance",
        },
    }))
}
