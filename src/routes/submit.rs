use actix_web::{web, HttpResponse, Responder};
use sqlx::PgPool;

use crate::domain::new_quote::{NewQuote, NewQuoteBody};
use crate::storage::insert_quote;

/// Accepts a visitor-submitted quote. The quote gets the next free index and
/// sits unapproved until moderation flips it.
#[tracing::instrument(
    name = "Submitting a new quote handler",
    skip(body, db_pool),
    fields(quote_author = %body.author, quote_area = %body.area)
)]
pub async fn handle_submit_quote(
    body: web::Json<NewQuoteBody>,
    db_pool: web::Data<PgPool>,
) -> impl Responder {
    let new_quote: NewQuote = match body.try_into() {
        Ok(quote) => quote,
        Err(err) => {
            tracing::error!("Validation error: {:?}", err);
            return HttpResponse::BadRequest().finish();
        }
    };

    match insert_quote(&db_pool, &new_quote).await {
        Ok(quote) => HttpResponse::Created().json(quote),
        Err(err) => {
            tracing::error!("Failed to insert new quote: {:?}", err);
            HttpResponse::InternalServerError().finish()
        }
    }
}
