use actix_web::{web, HttpResponse, Responder};
use sqlx::PgPool;

use crate::domain::new_subscriber::{NewSubscriber, NewSubscriberBody};
use crate::storage::deactivate_subscriber;

#[tracing::instrument(
    name = "Unsubscribing handler",
    skip(body, db_pool),
    fields(subscriber_email = %body.email)
)]
pub async fn handle_unsubscribe(
    body: web::Json<NewSubscriberBody>,
    db_pool: web::Data<PgPool>,
) -> impl Responder {
    let subscriber: NewSubscriber = match body.try_into() {
        Ok(subscriber) => subscriber,
        Err(err) => {
            tracing::error!("Validation error: {:?}", err);
            return HttpResponse::BadRequest().finish();
        }
    };

    match deactivate_subscriber(&db_pool, &subscriber.email).await {
        Ok(true) => HttpResponse::Ok().finish(),
        Ok(false) => HttpResponse::NotFound().json(serde_json::json!({
            "status": "not_subscribed"
        })),
        Err(err) => {
            tracing::error!("Failed to unsubscribe: {:?}", err);
            HttpResponse::InternalServerError().finish()
        }
    }
}
