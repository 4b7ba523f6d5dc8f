use actix_web::{web, HttpResponse, Responder};
use sqlx::PgPool;

use crate::domain::new_subscriber::{NewSubscriber, NewSubscriberBody};
use crate::storage::{upsert_subscriber, SignupOutcome};

#[tracing::instrument(
    name = "Signing up a new subscriber handler",
    skip(body, db_pool),
    fields(subscriber_email = %body.email)
)]
pub async fn handle_signup(
    body: web::Json<NewSubscriberBody>,
    db_pool: web::Data<PgPool>,
) -> impl Responder {
    let new_subscriber: NewSubscriber = match body.try_into() {
        Ok(subscriber) => subscriber,
        Err(err) => {
            tracing::error!("Validation error: {:?}", err);
            return HttpResponse::BadRequest().finish();
        }
    };

    match upsert_subscriber(&db_pool, &new_subscriber).await {
        Ok(SignupOutcome::Created(subscriber)) | Ok(SignupOutcome::Reactivated(subscriber)) => {
            HttpResponse::Created().json(subscriber)
        }
        // Re-signup of an active subscriber is a no-op, reported as such.
        Ok(SignupOutcome::AlreadyActive) => HttpResponse::Ok().json(serde_json::json!({
            "status": "already_subscribed"
        })),
        Err(err) => {
            tracing::error!("Failed to sign up subscriber: {:?}", err);
            HttpResponse::InternalServerError().finish()
        }
    }
}
