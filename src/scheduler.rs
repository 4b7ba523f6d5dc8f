use std::sync::Arc;

use chrono::{Datelike, Utc};
use cron::Schedule;
use sqlx::PgPool;

use crate::domain::subscriber_email::SubscriberEmail;
use crate::queue::{DigestQueue, JobPayload, QueueError};
use crate::storage;

pub const DIGEST_TEMPLATE: &str = "weekly_digest";

#[derive(thiserror::Error, Debug)]
pub enum EnqueueDigestError {
    #[error("Failed to read the subscriber set.")]
    Storage(#[from] sqlx::Error),
    #[error("Failed to enqueue a digest job.")]
    Queue(#[from] QueueError),
}

/// Parse the configured digest schedule. The cron crate wants six fields
/// (with seconds) while the configuration uses the common five-field form,
/// so a zero seconds field is prepended.
pub fn parse_digest_cron(expr: &str) -> Result<Schedule, String> {
    let full_expr = format!("0 {}", expr);

    full_expr
        .parse::<Schedule>()
        .map_err(|err| format!("Invalid cron expression '{}': {}", expr, err))
}

/// Produces digest runs: on every fire of the weekly schedule (or on a manual
/// trigger) it reads the active-subscriber set and enqueues one job per
/// subscriber. Fanning out per subscriber keeps one bad mailbox from
/// blocking everyone else's digest.
pub struct DigestScheduler {
    pool: PgPool,
    queue: Arc<dyn DigestQueue>,
    schedule: Schedule,
    subject_template: String,
}

impl DigestScheduler {
    pub fn new(
        pool: PgPool,
        queue: Arc<dyn DigestQueue>,
        schedule: Schedule,
        subject_template: String,
    ) -> Self {
        Self {
            pool,
            queue,
            schedule,
            subject_template,
        }
    }

    /// Sleep-until-due loop for the time-based trigger. Runs for the life of
    /// the process.
    pub async fn run(&self) {
        loop {
            let Some(fire_at) = self.schedule.upcoming(Utc).next() else {
                tracing::error!("The digest schedule has no upcoming fire times, giving up");
                return;
            };
            let wait = (fire_at - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);

            tracing::info!(fire_at = %fire_at, "Next digest run scheduled");
            tokio::time::sleep(wait).await;

            match self.enqueue_digest_for_all_active().await {
                Ok(0) => tracing::info!("Digest run skipped: no active subscribers"),
                Ok(enqueued) => tracing::info!(enqueued, "Digest jobs enqueued"),
                Err(err) => tracing::error!("Digest run failed: {:?}", err),
            }
        }
    }

    /// One digest run. Returns how many jobs were enqueued; zero means there
    /// was nobody to send to. A broker failure propagates to the caller, so
    /// a manual trigger sees it synchronously.
    #[tracing::instrument(name = "Enqueue digests for all active subscribers", skip(self))]
    pub async fn enqueue_digest_for_all_active(&self) -> Result<usize, EnqueueDigestError> {
        let subscribers = storage::active_subscribers(&self.pool).await?;

        if subscribers.is_empty() {
            return Ok(0);
        }

        let week = Utc::now().iso_week().week();
        let enqueued = enqueue_digests(
            self.queue.as_ref(),
            &subscribers,
            week,
            &self.subject_template,
        )
        .await?;

        Ok(enqueued)
    }
}

/// Fan one digest run out to the queue: one job per subscriber, each with a
/// singleton recipient list and the ISO week number in its context.
pub async fn enqueue_digests(
    queue: &dyn DigestQueue,
    subscribers: &[SubscriberEmail],
    week: u32,
    subject_template: &str,
) -> Result<usize, QueueError> {
    let subject = subject_template.replace("{week}", &week.to_string());
    let mut enqueued = 0;

    for subscriber in subscribers {
        queue
            .add(JobPayload {
                template: String::from(DIGEST_TEMPLATE),
                recipients: vec![String::from(subscriber.as_ref())],
                subject: subject.clone(),
                context: serde_json::json!({ "week": week }),
            })
            .await?;
        enqueued += 1;
    }

    Ok(enqueued)
}
