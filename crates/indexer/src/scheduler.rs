//! Periodic job runner.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::config::ScheduleConfig;
use crate::jobs::Orchestrator;

/// Runs the orchestrator jobs on fixed intervals.
///
/// Each loop awaits its job before taking the next tick, so at most one run
/// of a job is in flight; ticks missed while a run is slow are dropped.
#[derive(Debug, Clone)]
pub struct Scheduler {
    orchestrator: Orchestrator,
    schedule: ScheduleConfig,
}

impl Scheduler {
    /// Create a scheduler for `orchestrator`.
    pub fn new(orchestrator: Orchestrator, schedule: ScheduleConfig) -> Self {
        Self {
            orchestrator,
            schedule,
        }
    }

    /// Run every loop until the process stops. Jobs run once immediately.
    pub async fn run(&self) {
        info!(
            unl_interval_secs = self.schedule.unl_interval_secs,
            manifest_interval_secs = self.schedule.manifest_interval_secs,
            domain_interval_secs = self.schedule.domain_interval_secs,
            "Scheduler starting"
        );

        let orchestrator = &self.orchestrator;
        tokio::join!(
            every(self.schedule.unl_interval_secs, "update_unls", || async {
                orchestrator.update_unls().await.map(|_| ())
            }),
            every(self.schedule.manifest_interval_secs, "update_manifests", || async {
                orchestrator.update_manifests().await.map(|_| ())
            }),
            every(self.schedule.domain_interval_secs, "verify_domains", || async {
                orchestrator.verify_domains().await.map(|_| ())
            }),
        );
    }
}

async fn every<F, Fut>(interval_secs: u64, job: &'static str, run: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        if let Err(e) = run().await {
            // Retried on the next tick.
            error!(job, "Scheduled job failed: {e:#}");
        }
    }
}
