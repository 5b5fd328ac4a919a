pub mod accrual;
pub mod allocation;
pub mod error;
pub mod gateway;
pub mod jobs;
pub mod ledger;
pub mod loan;
pub mod notify;
pub mod payments;
pub mod product;
pub mod reconcile;
pub mod schedule;
pub mod scoring;
pub mod store;
pub mod transaction;
pub mod types;

pub use error::{GatewayError, LendingError, LendingResult};
