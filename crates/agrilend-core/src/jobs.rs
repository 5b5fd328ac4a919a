use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::accrual::OverdueAccrualProcessor;
use crate::error::LendingResult;

/// A periodically executed unit of work. Deliberately broker-free: any
/// scheduler that can call `run` on a cadence can host one.
#[async_trait]
pub trait RecurringJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn period(&self) -> Duration;
    async fn run(&self) -> LendingResult<()>;
}

/// Drives registered jobs on their own intervals. A failing run is logged
/// and the schedule keeps going; one bad sweep must not stop the next.
#[derive(Default)]
pub struct JobRunner {
    handles: Vec<JoinHandle<()>>,
}

impl JobRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job: Arc<dyn RecurringJob>) {
        info!(job = job.name(), period_secs = job.period().as_secs(), "recurring job registered");
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(job.period());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = job.run().await {
                    error!(job = job.name(), error = %e, "recurring job run failed");
                }
            }
        });
        self.handles.push(handle);
    }

    /// Stop all schedules. In-flight runs are aborted at the next await.
    pub fn shutdown(self) {
        for handle in self.handles {
            handle.abort();
        }
    }
}

/// The daily overdue accrual sweep, packaged as a recurring job.
pub struct OverdueSweepJob {
    processor: Arc<OverdueAccrualProcessor>,
    period: Duration,
}

impl OverdueSweepJob {
    /// The design-target daily cadence.
    pub fn daily(processor: Arc<OverdueAccrualProcessor>) -> Self {
        Self::with_period(processor, Duration::from_secs(24 * 60 * 60))
    }

    pub fn with_period(processor: Arc<OverdueAccrualProcessor>, period: Duration) -> Self {
        Self { processor, period }
    }
}

#[async_trait]
impl RecurringJob for OverdueSweepJob {
    fn name(&self) -> &'static str {
        "overdue-accrual-sweep"
    }

    fn period(&self) -> Duration {
        self.period
    }

    async fn run(&self) -> LendingResult<()> {
        self.processor.sweep(Utc::now()).await?;
        Ok(())
    }
}
