// crates/server/src/simulate.rs
//! In-process stand-in for the external load-tool worker.
//!
//! Claims queued jobs, streams synthetic sample lines through the job
//! queue contract and finishes each job, so the reconciler and the fan-out
//! have real traffic without the load tool installed.

use std::time::Duration;

use benchstream_core::{JobQueue, QueueError};
use benchstream_types::QueuedJob;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub lines_per_job: u32,
    pub line_interval: Duration,
    pub poll_interval: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            lines_per_job: 30,
            line_interval: Duration::from_millis(100),
            poll_interval: Duration::from_millis(250),
        }
    }
}

pub struct SimulatedWorker {
    queue: JobQueue,
    config: SimulatorConfig,
}

impl SimulatedWorker {
    pub fn new(queue: JobQueue, config: SimulatorConfig) -> Self {
        Self { queue, config }
    }

    /// Poll the work queue until cancelled. A job in progress when the token
    /// fires is failed with a shutdown error.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(lines_per_job = self.config.lines_per_job, "Simulated worker started");
        loop {
            let claimed = tokio::select! {
                _ = cancel.cancelled() => break,
                res = self.queue.claim_next() => res,
            };
            match claimed {
                Ok(Some(job)) => {
                    let job_id = job.id.clone();
                    tracing::info!(job_id = %job_id, "Picked job");
                    let outcome = tokio::select! {
                        res = self.run_job(&job) => res,
                        _ = cancel.cancelled() => {
                            let _ = self.queue.fail(&job_id, "worker shut down").await;
                            break;
                        }
                    };
                    if let Err(e) = outcome {
                        tracing::warn!(job_id = %job_id, error = %e, "Simulated job failed");
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to poll work queue");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }
        tracing::info!("Simulated worker stopped");
    }

    /// Drive one job from `running` to a terminal status.
    pub async fn run_job(&self, job: &QueuedJob) -> Result<(), QueueError> {
        self.queue.mark_running(&job.id).await?;

        let Some(url) = job.params.get("url").and_then(|v| v.as_str()) else {
            let err = "missing url parameter";
            self.queue.fail(&job.id, err).await?;
            return Ok(());
        };
        let concurrency = job
            .params
            .get("concurrency")
            .and_then(|v| v.as_u64())
            .unwrap_or(5);

        self.queue
            .append_log(&job.id, &format!("Starting load against {url} with {concurrency} sessions"))
            .await;
        let step = self.config.line_interval.as_secs_f64();
        for i in 0..self.config.lines_per_job {
            self.queue.append_log(&job.id, &sample_line(i, step, concurrency)).await;
            tokio::time::sleep(self.config.line_interval).await;
        }
        self.queue.append_log(&job.id, "Done").await;
        self.queue.complete(&job.id, 0, None).await
    }
}

/// Deterministic sample that looks like the load tool's periodic output.
fn sample_line(i: u32, step: f64, concurrency: u64) -> String {
    let t = f64::from(i + 1) * step;
    let wobble = f64::from((i * 7) % 11) / 100.0;
    let cores = concurrency as f64 * (0.04 + wobble / 10.0);
    let mem_mb = 180 + concurrency * 12 + u64::from(i % 5);
    format!("t={t:.1}s active={concurrency} cpu_cores={cores:.3} mem_mb={mem_mb}")
}
