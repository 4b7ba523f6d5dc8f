use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Semaphore};
use uuid::Uuid;

use super::{
    event_channel, run_job, DigestQueue, Job, JobHandler, JobPayload, QueueError, QueueEvent,
};

const DEFAULT_QUEUE_KEY: &str = "digest_jobs";
/// Seconds BRPOP blocks before the consumer loop re-checks the connection.
const POP_BLOCK_SECS: usize = 5;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// The durable queue backend: jobs are JSON blobs on a Redis list, so they
/// survive a process restart and any replica can drain them. `add` pushes and
/// returns; delivery is the consumer loop's problem.
pub struct RedisQueue {
    client: redis::Client,
    queue_key: String,
    events: broadcast::Sender<QueueEvent>,
    handler_registered: AtomicBool,
}

impl RedisQueue {
    pub fn new(client: redis::Client) -> Self {
        Self::with_key(client, DEFAULT_QUEUE_KEY)
    }

    pub fn with_key(client: redis::Client, queue_key: &str) -> Self {
        Self {
            client,
            queue_key: queue_key.to_string(),
            events: event_channel(),
            handler_registered: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl DigestQueue for RedisQueue {
    #[tracing::instrument(name = "Enqueue a job to the broker", skip(self, payload))]
    async fn add(&self, payload: JobPayload) -> Result<Uuid, QueueError> {
        let job = Job {
            id: Uuid::new_v4(),
            payload,
        };
        let serialized = serde_json::to_string(&job)?;

        // Broker unreachable at enqueue time must surface to the caller
        // right here, not after the fact through an event.
        let mut conn = self
            .client
            .get_tokio_connection()
            .await
            .map_err(QueueError::Unavailable)?;

        redis::cmd("LPUSH")
            .arg(&self.queue_key)
            .arg(serialized)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(QueueError::Unavailable)?;

        Ok(job.id)
    }

    fn process(&self, concurrency: usize, handler: Arc<dyn JobHandler>) -> Result<(), QueueError> {
        let already_registered = self
            .handler_registered
            .swap(true, Ordering::SeqCst);

        if already_registered {
            return Err(QueueError::HandlerAlreadyRegistered);
        }

        let client = self.client.clone();
        let queue_key = self.queue_key.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(concurrency));

            loop {
                let mut conn = match client.get_tokio_connection().await {
                    Ok(conn) => conn,
                    Err(err) => {
                        tracing::error!("Failed to connect to the job broker: {:?}", err);
                        let _ = events.send(QueueEvent::QueueError {
                            message: err.to_string(),
                        });
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                };

                loop {
                    let popped: Result<Option<(String, String)>, redis::RedisError> =
                        redis::cmd("BRPOP")
                            .arg(&queue_key)
                            .arg(POP_BLOCK_SECS)
                            .query_async(&mut conn)
                            .await;

                    match popped {
                        Ok(Some((_, raw))) => {
                            let job: Job = match serde_json::from_str(&raw) {
                                Ok(job) => job,
                                Err(err) => {
                                    tracing::error!(
                                        "Discarding a job the broker handed back in an \
                                         undecodable shape: {:?}",
                                        err
                                    );
                                    let _ = events.send(QueueEvent::QueueError {
                                        message: err.to_string(),
                                    });
                                    continue;
                                }
                            };

                            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                                return;
                            };
                            let handler = handler.clone();
                            let events = events.clone();

                            tokio::spawn(async move {
                                run_job(handler.as_ref(), &job, &events).await;
                                drop(permit);
                            });
                        }
                        // BRPOP timed out with nothing queued; block again.
                        Ok(None) => continue,
                        Err(err) => {
                            tracing::error!("Lost the job broker connection: {:?}", err);
                            let _ = events.send(QueueEvent::QueueError {
                                message: err.to_string(),
                            });
                            tokio::time::sleep(RECONNECT_DELAY).await;
                            break;
                        }
                    }
                }
            }
        });

        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }
}
