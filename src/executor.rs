//! Bounded job pool with per-job retry and exponential backoff.
//!
//! [`JobPool::submit`] never blocks: it spawns a task and returns a
//! [`JobHandle`]. Each attempt must hold one of `max_parallelism` semaphore
//! permits, so no more than that many attempts run at once across the whole
//! pool. Permits are released while a job sleeps between attempts.
//!
//! After attempt `k` fails, the job waits `initial_backoff * backoff_base^(k-1)`
//! before trying again. A job that exhausts `max_attempts` is reported as
//! failed and never retried again. Delays saturate at [`MAX_BACKOFF`]. The completion callback fires exactly once
//! per job, after its last attempt. Jobs complete in no particular order.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

/// Upper bound accepted for `max_attempts` in configuration.
pub const MAX_ATTEMPTS: u32 = 20;

/// Longest wait between two attempts of one job.
pub const MAX_BACKOFF: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_parallelism: usize,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_base: f64,
    /// Deadline per attempt. A timed-out attempt counts as a failure.
    pub attempt_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 10,
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            backoff_base: 2.0,
            attempt_timeout: None,
        }
    }
}

impl PoolConfig {
    /// Wait before the retry that follows failed attempt `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_base.powi(exponent);
        if secs.is_nan() {
            return self.initial_backoff.min(MAX_BACKOFF);
        }
        Duration::try_from_secs_f64(secs)
            .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
    }
}

/// Final result of a job, handed to its completion callback.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    Failed { error: String, attempts: u32 },
}

impl<T> JobOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            JobOutcome::Succeeded { attempts, .. } | JobOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Handle to a submitted job. Dropping it does not cancel the job.
pub struct JobHandle {
    task: JoinHandle<()>,
}

impl JobHandle {
    /// Wait until the job's callback has run.
    pub async fn wait(self) {
        let _ = self.task.await;
    }
}

/// Shared, cloneable job pool.
#[derive(Clone)]
pub struct JobPool {
    config: Arc<PoolConfig>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl JobPool {
    pub fn new(config: PoolConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_parallelism.max(1)));
        Self {
            config: Arc::new(config),
            permits,
            tracker: TaskTracker::new(),
        }
    }

    /// Submit a job. `job` is called with the 1-based attempt number and may
    /// be called up to `max_attempts` times; it must be idempotent.
    pub fn submit<T, E, F, Fut, C>(&self, label: impl Into<String>, job: F, on_complete: C) -> JobHandle
    where
        T: Send + 'static,
        E: Display + Send + 'static,
        F: Fn(u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        C: FnOnce(JobOutcome<T>) + Send + 'static,
    {
        let label = label.into();
        let config = self.config.clone();
        let permits = self.permits.clone();

        let task = self.tracker.spawn(async move {
            let outcome = run_with_retry(&config, &permits, &label, job).await;
            on_complete(outcome);
        });

        JobHandle { task }
    }

    /// Wait for every job submitted so far (and any they submit) to finish.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

async fn run_with_retry<T, E, F, Fut>(
    config: &PoolConfig,
    permits: &Semaphore,
    label: &str,
    job: F,
) -> JobOutcome<T>
where
    E: Display,
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = {
            let _permit = match permits.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    return JobOutcome::Failed {
                        error: "job pool closed".to_string(),
                        attempts: attempt - 1,
                    }
                }
            };
            match config.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, job(attempt)).await {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(_) => Err(format!("attempt timed out after {:?}", limit)),
                },
                None => job(attempt).await.map_err(|e| e.to_string()),
            }
        };

        match result {
            Ok(value) => {
                tracing::debug!(job = %label, attempt, "job succeeded");
                return JobOutcome::Succeeded {
                    value,
                    attempts: attempt,
                };
            }
            Err(error) if attempt >= max_attempts => {
                tracing::warn!(job = %label, attempt, %error, "job failed permanently");
                return JobOutcome::Failed {
                    error,
                    attempts: attempt,
                };
            }
            Err(error) => {
                let delay = config.backoff_after(attempt);
                tracing::info!(job = %label, attempt, %error, ?delay, "job attempt failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
