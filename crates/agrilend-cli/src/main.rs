mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;

use commands::allocate::AllocateArgs;
use commands::penalty::PenaltyArgs;
use commands::schedule::ScheduleArgs;

/// Loan schedule, allocation and penalty calculations
#[derive(Parser)]
#[command(
    name = "agl",
    version,
    about = "Loan schedule, allocation and penalty calculations",
    long_about = "A CLI over the agrilend engine for previewing installment \
                  plans, dry-running the payment allocation waterfall and \
                  computing overdue penalties, all with decimal precision."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Preview the installment plan for a loan (fixed or harvest-aligned)
    Schedule(ScheduleArgs),
    /// Dry-run the oldest-due-first allocation of a payment over a schedule
    Allocate(AllocateArgs),
    /// Compute capped overdue penalties for a schedule as of a date
    Penalty(PenaltyArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Minimal,
}

fn main() {
    let cli = Cli::parse();

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Schedule(args) => commands::schedule::run_schedule(args),
        Commands::Allocate(args) => commands::allocate::run_allocate(args),
        Commands::Penalty(args) => commands::penalty::run_penalty(args),
        Commands::Version => {
            println!("agl {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
