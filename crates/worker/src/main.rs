//! Vendorbill Background Worker
//!
//! Runs the remediation jobs on a schedule:
//! - Overdue subscription suspension (hourly)
//! - Payment reminders for invoices due within the lead time (daily at 08:00 UTC)
//! - Late payment alerts for past-due invoices (daily at 09:00 UTC)
//!
//! Every run takes a Postgres advisory lock named after its job, so several worker
//! replicas never process the same batch concurrently.

mod job_lock;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use vendorbill_billing::BillingService;
use vendorbill_shared::create_pool;

use crate::job_lock::run_exclusive;

const SUSPEND_OVERDUE: (&str, &str) = ("suspend_overdue", "0 0 * * * *");
const SEND_REMINDERS: (&str, &str) = ("send_reminders", "0 0 8 * * *");
const SEND_LATE_ALERTS: (&str, &str) = ("send_late_alerts", "0 0 9 * * *");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Vendorbill Worker");

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = create_pool(&database_url).await?;
    info!("Database pool created");

    let billing = Arc::new(BillingService::from_env(pool.clone()));
    let scheduler = JobScheduler::new().await?;

    // Job 1: Suspend subscriptions past end date plus grace period
    let (name, schedule) = SUSPEND_OVERDUE;
    let (job_pool, job_billing) = (pool.clone(), billing.clone());
    scheduler
        .add(Job::new_async(schedule, move |_uuid, _l| {
            let pool = job_pool.clone();
            let billing = job_billing.clone();
            Box::pin(async move {
                run_exclusive(&pool, name, || async {
                    info!("Running overdue subscription suspension");
                    if let Err(e) = billing.remediation.suspend_overdue().await {
                        error!(error = %e, "Overdue suspension run failed");
                    }
                })
                .await;
            })
        })?)
        .await?;
    info!("Scheduled: Overdue suspension (hourly)");

    // Job 2: Remind vendors of invoices coming due
    let (name, schedule) = SEND_REMINDERS;
    let (job_pool, job_billing) = (pool.clone(), billing.clone());
    scheduler
        .add(Job::new_async(schedule, move |_uuid, _l| {
            let pool = job_pool.clone();
            let billing = job_billing.clone();
            Box::pin(async move {
                run_exclusive(&pool, name, || async {
                    info!("Sending payment reminders");
                    if let Err(e) = billing.remediation.send_reminders().await {
                        error!(error = %e, "Reminder run failed");
                    }
                })
                .await;
            })
        })?)
        .await?;
    info!("Scheduled: Payment reminders (daily at 08:00 UTC)");

    // Job 3: Alert vendors of past-due invoices
    let (name, schedule) = SEND_LATE_ALERTS;
    let (job_pool, job_billing) = (pool.clone(), billing.clone());
    scheduler
        .add(Job::new_async(schedule, move |_uuid, _l| {
            let pool = job_pool.clone();
            let billing = job_billing.clone();
            Box::pin(async move {
                run_exclusive(&pool, name, || async {
                    info!("Sending late payment alerts");
                    if let Err(e) = billing.remediation.send_late_alerts().await {
                        error!(error = %e, "Late alert run failed");
                    }
                })
                .await;
            })
        })?)
        .await?;
    info!("Scheduled: Late payment alerts (daily at 09:00 UTC)");

    info!("Starting job scheduler");
    scheduler.start().await?;
    info!("Vendorbill Worker started with 3 scheduled jobs");

    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_job_schedules_parse() {
        for (name, schedule) in [SUSPEND_OVERDUE, SEND_REMINDERS, SEND_LATE_ALERTS] {
            let job = Job::new_async(schedule, |_uuid, _l| Box::pin(async {}));
            assert!(job.is_ok(), "{} has an invalid schedule {}", name, schedule);
        }
    }

    #[test]
    fn test_job_names_are_distinct() {
        assert_ne!(SUSPEND_OVERDUE.0, SEND_REMINDERS.0);
        assert_ne!(SEND_REMINDERS.0, SEND_LATE_ALERTS.0);
        assert_ne!(SUSPEND_OVERDUE.0, SEND_LATE_ALERTS.0);
    }
}
