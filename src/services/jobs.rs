//! In-process background job queue with exponential-backoff retries.

use anyhow::Result;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sqlx::PgPool;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::mailer::OutgoingEmail;
use super::{email, push};
use crate::app::AppState;
use crate::config::Settings;

#[derive(Debug, Clone)]
pub enum Job {
    SendEmail(OutgoingEmail),
    /// Device push for a single in-app notification
    PushToUser {
        user_id: Uuid,
        title: String,
        body: String,
        data: serde_json::Value,
    },
    /// Broadcast push notification already moved to `sending`
    SendPushNotification { notification_id: Uuid },
    /// Email campaign already moved to `sending`
    SendCampaign { campaign_id: Uuid },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::SendEmail(_) => "send_email",
            Job::PushToUser { .. } => "push_to_user",
            Job::SendPushNotification { .. } => "send_push_notification",
            Job::SendCampaign { .. } => "send_campaign",
        }
    }
}

/// Producer handle; cheap to clone into handlers.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl JobQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, job: Job) {
        let kind = job.kind();
        if self.tx.send(job).is_err() {
            tracing::error!(job = kind, "Job worker is gone, dropping job");
        } else {
            tracing::debug!(job = kind, "Job enqueued");
        }
    }
}

/// Retry budget for a failing job: `base × 2^attempt` between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            base: Duration::from_secs(settings.job_retry_base_seconds),
            max_retries: settings.job_max_retries,
        }
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        let ceiling = self.base.saturating_mul(2u32.saturating_pow(self.max_retries));
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(ceiling)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Delays before each retry.
    pub fn delays(&self) -> Vec<Duration> {
        let mut backoff = self.backoff();
        (0..self.max_retries)
            .filter_map(|_| backoff.next_backoff())
            .collect()
    }
}

/// Runs `op` until it succeeds or the retry budget is spent.
pub async fn run_with_retry<F, Fut, T>(policy: RetryPolicy, kind: &'static str, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = AtomicU32::new(0);
    let attempts = &attempts;
    let op = &op;

    backoff::future::retry_notify(
        policy.backoff(),
        move || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            op().await.map_err(|e| {
                if attempt >= policy.max_retries {
                    backoff::Error::permanent(e)
                } else {
                    backoff::Error::transient(e)
                }
            })
        },
        move |err: anyhow::Error, delay: Duration| {
            tracing::warn!(
                job = kind,
                attempt = attempts.load(Ordering::SeqCst),
                retry_in_secs = delay.as_secs(),
                error = %err,
                "Job failed, retrying"
            );
        },
    )
    .await
}

/// Drains the queue, running every job on its own task.
pub async fn run_worker(state: Arc<AppState>, mut rx: mpsc::UnboundedReceiver<Job>) {
    let policy = RetryPolicy::from_settings(&state.settings);
    tracing::info!(
        base_secs = policy.base.as_secs(),
        max_retries = policy.max_retries,
        "Job worker started"
    );

    while let Some(job) = rx.recv().await {
        let state = state.clone();
        tokio::spawn(async move {
            let kind = job.kind();
            let result = run_with_retry(policy, kind, || execute(&state, &job)).await;
            match result {
                Ok(()) => tracing::debug!(job = kind, "Job completed"),
                Err(e) => {
                    tracing::error!(job = kind, error = %e, "Job failed permanently");
                    on_terminal_failure(&state, &job).await;
                }
            }
        });
    }

    tracing::info!("Job worker stopped");
}

/// Re-queues broadcasts left in `sending` by a previous process. The queue
/// lives in memory, so anything claimed before a restart would otherwise
/// stay `sending` forever. Delivery is at-least-once for those rows.
pub async fn recover_interrupted(db: &PgPool, queue: &JobQueue) -> Result<usize> {
    let campaigns: Vec<Uuid> =
        sqlx::query_scalar("SELECT id FROM email_campaigns WHERE status = 'sending' ORDER BY updated_at")
            .fetch_all(db)
            .await?;
    let notifications: Vec<Uuid> = sqlx::query_scalar(
        "SELECT id FROM push_notifications WHERE status = 'sending' ORDER BY updated_at",
    )
    .fetch_all(db)
    .await?;

    let jobs = campaigns
        .into_iter()
        .map(|campaign_id| Job::SendCampaign { campaign_id })
        .chain(
            notifications
                .into_iter()
                .map(|notification_id| Job::SendPushNotification { notification_id }),
        );

    let mut recovered = 0;
    for job in jobs {
        queue.enqueue(job);
        recovered += 1;
    }
    if recovered > 0 {
        tracing::warn!(recovered, "Re-queued interrupted deliveries");
    }
    Ok(recovered)
}

async fn execute(state: &AppState, job: &Job) -> Result<()> {
    match job {
        Job::SendEmail(email) => state.mailer.send(email).await,
        Job::PushToUser {
            user_id,
            title,
            body,
            data,
        } => push::send_to_user(state, *user_id, title, body, data)
            .await
            .map(|_| ()),
        Job::SendPushNotification { notification_id } => {
            push::deliver_push_notification(state, *notification_id).await
        }
        Job::SendCampaign { campaign_id } => email::deliver_campaign(state, *campaign_id).await,
    }
}

async fn on_terminal_failure(state: &AppState, job: &Job) {
    let result = match job {
        Job::SendPushNotification { notification_id } => {
            push::mark_push_failed(&state.db, *notification_id).await
        }
        Job::SendCampaign { campaign_id } => {
            email::mark_campaign_failed(&state.db, *campaign_id).await
        }
        Job::SendEmail(_) | Job::PushToUser { .. } => Ok(()),
    };
    if let Err(e) = result {
        tracing::error!(job = job.kind(), error = %e, "Failed to record job failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_doubles_from_base() {
        let policy = RetryPolicy {
            base: Duration::from_secs(60),
            max_retries: 3,
        };
        assert_eq!(
            policy.delays(),
            vec![
                Duration::from_secs(60),
                Duration::from_secs(120),
                Duration::from_secs(240)
            ]
        );
    }

    #[test]
    fn policy_from_settings() {
        let policy = RetryPolicy::from_settings(&crate::config::tests::test_settings());
        assert_eq!(policy.base, Duration::from_secs(60));
        assert_eq!(policy.max_retries, 3);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy {
            base: Duration::from_millis(1),
            max_retries: 3,
        };
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = run_with_retry(policy, "test", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                anyhow::bail!("transient")
            }
            Ok(7)
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let policy = RetryPolicy {
            base: Duration::from_millis(1),
            max_retries: 2,
        };
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = run_with_retry(policy, "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("always")
        })
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn queue_delivers_in_order() {
        let (queue, mut rx) = JobQueue::new();
        let id = Uuid::new_v4();
        queue.enqueue(Job::SendPushNotification { notification_id: id });
        queue.enqueue(Job::SendEmail(OutgoingEmail::plain("a@example.com", "s", "b")));

        let first = tokio_test::block_on(rx.recv()).unwrap();
        assert!(matches!(first, Job::SendPushNotification { notification_id } if notification_id == id));
        assert_eq!(tokio_test::block_on(rx.recv()).unwrap().kind(), "send_email");
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn interrupted_deliveries_are_requeued(pool: PgPool) {
        let campaign = Uuid::new_v4();
        let template = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO email_templates (id, name, template_type, subject, html_content) VALUES ($1, 'T', 'welcome', 'S', 'B')",
        )
        .bind(template)
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO email_campaigns (id, name, subject, template_id, status) VALUES ($1, 'C', 'S', $2, 'sending')",
        )
        .bind(campaign)
        .bind(template)
        .execute(&pool)
        .await
        .unwrap();
        let stuck_push = Uuid::new_v4();
        let draft_push = Uuid::new_v4();
        for (id, status) in [(stuck_push, "sending"), (draft_push, "draft")] {
            sqlx::query("INSERT INTO push_notifications (id, title, message, status) VALUES ($1, 'T', 'M', $2)")
                .bind(id)
                .bind(status)
                .execute(&pool)
                .await
                .unwrap();
        }

        let (queue, mut rx) = JobQueue::new();
        assert_eq!(recover_interrupted(&pool, &queue).await.unwrap(), 2);

        match rx.try_recv().unwrap() {
            Job::SendCampaign { campaign_id } => assert_eq!(campaign_id, campaign),
            other => panic!("unexpected job {}", other.kind()),
        }
        match rx.try_recv().unwrap() {
            Job::SendPushNotification { notification_id } => assert_eq!(notification_id, stuck_push),
            other => panic!("unexpected job {}", other.kind()),
        }
        assert!(rx.try_recv().is_err());
    }
}
