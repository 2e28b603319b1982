//! Poll loop driving propagation cycles.

use std::sync::Arc;
use std::time::Duration;

use ada_common::AppResult;
use ada_core::{CycleReport, RunCoordinator};
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between cycle starts.
    pub interval: Duration,
    /// Run a single cycle and return.
    pub run_once: bool,
}

impl From<&ada_common::config::SchedulerConfig> for SchedulerConfig {
    fn from(config: &ada_common::config::SchedulerConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs.max(1)),
            run_once: config.run_once,
        }
    }
}

/// Something that runs one cycle.
#[async_trait::async_trait]
pub trait CycleRunner: Send + Sync {
    /// Run one cycle. `shutdown` flips to `true` when the process is asked
    /// to stop.
    async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) -> AppResult<CycleReport>;
}

#[async_trait::async_trait]
impl CycleRunner for RunCoordinator {
    async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) -> AppResult<CycleReport> {
        Self::run_cycle(self, shutdown).await
    }
}

/// Run cycles until shutdown. Returns the number of cycles run.
///
/// With `run_once` the single cycle's error is returned. Otherwise a failed
/// cycle is logged and the next one runs on schedule.
pub async fn run_scheduler<R: CycleRunner + ?Sized>(
    config: SchedulerConfig,
    runner: Arc<R>,
    mut shutdown: watch::Receiver<bool>,
) -> AppResult<usize> {
    if config.run_once {
        runner.run_cycle(&shutdown).await?;
        return Ok(1);
    }

    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycles = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        if *shutdown.borrow() {
            break;
        }

        cycles += 1;
        match runner.run_cycle(&shutdown).await {
            Ok(report) if report.cancelled => break,
            Ok(_) => {}
            Err(e) => tracing::error!(
                error = %e,
                code = e.error_code(),
                next_in_secs = config.interval.as_secs(),
                "Cycle failed"
            ),
        }
    }

    tracing::info!(cycles, "Scheduler stopped");
    Ok(cycles)
}
