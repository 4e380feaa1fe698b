use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};

use super::eligibility::SendRateLimiter;

/// Schedules a job that drops elapsed send windows so the limiter does not
/// grow with every user that has ever posted.
pub async fn start_rate_limit_sweeper(
    limiter: SendRateLimiter,
) -> Result<JobScheduler, Box<dyn std::error::Error + Send + Sync>> {
    let scheduler = JobScheduler::new().await?;

    // Run every minute
    let job = Job::new_async("0 * * * * *", move |_uuid, _l| {
        let limiter = limiter.clone();

        Box::pin(async move {
            let removed = limiter.prune_expired();
            if removed > 0 {
                debug!(
                    "Pruned {} expired send windows, {} still tracked",
                    removed,
                    limiter.tracked_senders()
                );
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    info!("Rate limit sweeper started");
    Ok(scheduler)
}
