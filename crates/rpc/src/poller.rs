//! Bounded exponential back-off polling for server-side jobs.
//!
//! The loop is driven by a caller-supplied status check; it knows nothing
//! about the payload being waited on. Time comes from `tokio::time`, so
//! tests can run it on a paused clock.

use std::future::Future;
use std::time::Duration;

use br_domain::config::PollSettings;
use br_domain::error::{Error, Result};
use br_domain::job::JobStatus;
use br_domain::trace::TraceEvent;
use tokio::time::Instant;

/// Lower bound for the poll interval; a zero interval would spin.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Poll `check` until it reports a terminal status or `timeout` elapses.
///
/// Sleeps `min(interval, remaining)` between checks and doubles the
/// interval up to `max_interval`. Returns the terminal status (completed
/// *or* failed); on timeout returns [`Error::Timeout`] carrying the last
/// observed status. Errors from `check` are returned immediately.
pub async fn wait_for_completion<F, Fut>(
    mut check: F,
    initial_interval: Duration,
    max_interval: Duration,
    timeout: Duration,
) -> Result<JobStatus>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<JobStatus>>,
{
    let started = Instant::now();
    let max_interval = max_interval.max(MIN_INTERVAL);
    let mut interval = initial_interval.max(MIN_INTERVAL).min(max_interval);

    loop {
        let status = check().await?;
        if status.is_terminal() {
            return Ok(status);
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Err(Error::Timeout {
                message: format!(
                    "job {} still {:?} after {}s",
                    status.task_id,
                    status.status,
                    elapsed.as_secs()
                ),
                method_id: None,
                elapsed_secs: elapsed.as_secs_f64(),
                last_status: Some(Box::new(status)),
            });
        }

        let sleep_for = interval.min(timeout - elapsed);
        TraceEvent::JobPolled {
            task_id: status.task_id.clone(),
            status: status.status,
            elapsed_ms: elapsed.as_millis() as u64,
            next_interval_ms: sleep_for.as_millis() as u64,
        }
        .emit();

        if !sleep_for.is_zero() {
            tokio::time::sleep(sleep_for).await;
        }
        interval = interval.saturating_mul(2).min(max_interval);
    }
}

/// [`wait_for_completion`] with intervals taken from `settings`.
pub async fn wait_with<F, Fut>(settings: &PollSettings, check: F) -> Result<JobStatus>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<JobStatus>>,
{
    wait_for_completion(
        check,
        settings.initial_interval(),
        settings.max_interval(),
        settings.timeout(),
    )
    .await
}

/// Wait for several jobs concurrently. Each job keeps its own back-off and
/// deadline; one job timing out does not affect the others.
pub async fn wait_for_many<F, Fut>(
    task_ids: &[String],
    settings: &PollSettings,
    check: F,
) -> Vec<(String, Result<JobStatus>)>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<JobStatus>>,
{
    let check = &check;
    let waits = task_ids.iter().map(|task_id| async move {
        let result = wait_with(settings, || check(task_id.clone())).await;
        (task_id.clone(), result)
    });
    futures_util::future::join_all(waits).await
}
