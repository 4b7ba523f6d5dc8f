use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod memory;
pub mod redis;

pub use self::memory::InProcessQueue;
pub use self::redis::RedisQueue;

/// Errors a job handler can surface; the dispatch loop turns them into a
/// `Failed` event instead of letting them escape.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub template: String,
    /// Always a single recipient: the scheduler enqueues one job per
    /// subscriber so one bad address cannot block the rest of a run.
    pub recipients: Vec<String>,
    pub subject: String,
    pub context: serde_json::Value,
}

/// A unit of work owned by the queue from `add` until its handler settles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub payload: JobPayload,
}

/// Fire-and-forget notifications about settled jobs. By the time an event is
/// observed the job itself is already finished; a lagging subscriber never
/// slows dispatch down.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Completed { job_id: Uuid },
    Failed { job_id: Uuid, error: String },
    QueueError { message: String },
}

#[derive(thiserror::Error, Debug)]
pub enum QueueError {
    #[error("The job broker is unreachable.")]
    Unavailable(#[source] ::redis::RedisError),
    #[error("Failed to encode a job for the broker.")]
    Encode(#[from] serde_json::Error),
    #[error("A job handler is already registered for this queue.")]
    HandlerAlreadyRegistered,
    #[error("The queue no longer accepts jobs.")]
    Closed,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError>;
}

/// The capability set both queue backends expose. The backend is chosen once
/// at startup; everything downstream holds an `Arc<dyn DigestQueue>` and
/// never knows which variant it got.
#[async_trait]
pub trait DigestQueue: Send + Sync {
    /// Enqueue a job and return its id without waiting for execution. The
    /// durable backend fails here when the broker is unreachable; the
    /// in-process backend accepts the job unconditionally.
    async fn add(&self, payload: JobPayload) -> Result<Uuid, QueueError>;

    /// Register the single handler for this queue. `concurrency` bounds how
    /// many handler invocations may be in flight at once; this system always
    /// passes 1 so digest sends never overlap. Jobs reach the handler in
    /// `add` order.
    fn process(&self, concurrency: usize, handler: Arc<dyn JobHandler>) -> Result<(), QueueError>;

    /// Subscribe to settled-job notifications.
    fn subscribe(&self) -> broadcast::Receiver<QueueEvent>;
}

const EVENT_CHANNEL_CAPACITY: usize = 64;

fn event_channel() -> broadcast::Sender<QueueEvent> {
    let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    sender
}

/// Runs one job to completion and emits the matching event. Handler errors
/// stop here; they must never take the dispatch loop down with them.
async fn run_job(handler: &dyn JobHandler, job: &Job, events: &broadcast::Sender<QueueEvent>) {
    match handler.handle(job).await {
        Ok(()) => {
            tracing::info!(job_id = %job.id, "Job completed");
            let _ = events.send(QueueEvent::Completed { job_id: job.id });
        }
        Err(err) => {
            tracing::error!(job_id = %job.id, "Job failed: {:?}", err);
            let _ = events.send(QueueEvent::Failed {
                job_id: job.id,
                error: err.to_string(),
            });
        }
    }
}
