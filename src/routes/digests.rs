use actix_web::{web, HttpResponse, ResponseError};
use reqwest::StatusCode;

use crate::queue::QueueError;
use crate::scheduler::{DigestScheduler, EnqueueDigestError};

#[derive(thiserror::Error)]
pub enum TriggerDigestError {
    #[error("Failed to start a digest run.")]
    Enqueue(#[from] EnqueueDigestError),
}

impl std::fmt::Debug for TriggerDigestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Caused by:\n\t({})", self)
    }
}

impl ResponseError for TriggerDigestError {
    fn status_code(&self) -> StatusCode {
        match self {
            TriggerDigestError::Enqueue(EnqueueDigestError::Queue(QueueError::Unavailable(_))) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            TriggerDigestError::Enqueue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Manual digest trigger, same fan-out as the weekly run.
#[tracing::instrument(name = "Triggering a digest run manually", skip(scheduler))]
pub async fn handle_trigger_digest(
    scheduler: web::Data<DigestScheduler>,
) -> Result<HttpResponse, TriggerDigestError> {
    let enqueued = scheduler.enqueue_digest_for_all_active().await?;

    if enqueued == 0 {
        return Ok(HttpResponse::Ok().json(serde_json::json!({
            "enqueued": 0,
            "message": "no subscribers"
        })));
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({ "enqueued": enqueued })))
}
