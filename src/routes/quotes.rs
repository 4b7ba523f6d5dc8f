use actix_web::{web, HttpResponse, Responder};

use crate::selector::{QuoteSelector, SelectQuoteError};
use crate::storage::PgQuoteStorage;

#[tracing::instrument(name = "Random quote handler", skip(selector))]
pub async fn handle_random_quote(
    selector: web::Data<QuoteSelector<PgQuoteStorage>>,
) -> impl Responder {
    match selector.pick_random_approved().await {
        Ok(quote) => HttpResponse::Ok().json(quote),
        Err(err @ SelectQuoteError::EmptyCorpus)
        | Err(err @ SelectQuoteError::NoApprovedQuotes) => {
            tracing::warn!("No quote to serve: {:?}", err);
            HttpResponse::NotFound().finish()
        }
        Err(err) => {
            tracing::error!("Failed to pick a quote: {:?}", err);
            HttpResponse::InternalServerError().finish()
        }
    }
}
