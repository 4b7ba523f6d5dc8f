use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Semaphore};
use uuid::Uuid;

use super::{
    event_channel, run_job, DigestQueue, Job, JobHandler, JobPayload, QueueError, QueueEvent,
};

/// The fallback queue backend: a process-local FIFO with no broker behind it.
///
/// Jobs live in an in-memory channel, so a crash before execution loses them
/// and a handler failure is final — the job is not requeued. Jobs added
/// before `process` is called are buffered and dispatched once the handler
/// shows up.
pub struct InProcessQueue {
    sender: mpsc::UnboundedSender<Job>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
    events: broadcast::Sender<QueueEvent>,
}

impl InProcessQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            events: event_channel(),
        }
    }
}

impl Default for InProcessQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DigestQueue for InProcessQueue {
    async fn add(&self, payload: JobPayload) -> Result<Uuid, QueueError> {
        let job = Job {
            id: Uuid::new_v4(),
            payload,
        };
        let job_id = job.id;

        // Only fails when the dispatch loop is gone, which means the queue
        // is shutting down; there is no broker to be unreachable.
        self.sender.send(job).map_err(|_| QueueError::Closed)?;

        Ok(job_id)
    }

    fn process(&self, concurrency: usize, handler: Arc<dyn JobHandler>) -> Result<(), QueueError> {
        let mut slot = self.receiver.lock().map_err(|_| QueueError::Closed)?;
        let mut receiver = slot
            .take()
            .ok_or(QueueError::HandlerAlreadyRegistered)?;
        let events = self.events.clone();

        tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(concurrency));

            while let Some(job) = receiver.recv().await {
                // Acquiring before spawning keeps dispatch in add order and,
                // with a concurrency of 1, strictly serial.
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                let handler = handler.clone();
                let events = events.clone();

                tokio::spawn(async move {
                    run_job(handler.as_ref(), &job, &events).await;
                    drop(permit);
                });
            }
        });

        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }
}
