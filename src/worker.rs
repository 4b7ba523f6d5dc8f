use async_trait::async_trait;

use crate::domain::quote::Quote;
use crate::domain::subscriber_email::SubscriberEmail;
use crate::email_client::EmailClient;
use crate::queue::{HandlerError, Job, JobHandler};
use crate::selector::{QuoteSelector, SelectQuoteError};
use crate::storage::QuoteReader;

#[derive(thiserror::Error, Debug)]
pub enum DeliveryError {
    #[error("Could not pick a quote for the digest.")]
    QuoteSelection(#[from] SelectQuoteError),
    #[error("Recipient address rejected: {0}")]
    InvalidRecipient(String),
    #[error("The mail transport rejected the digest.")]
    Transport(#[from] reqwest::Error),
}

/// The sole consumer of the digest queue. Each job is one subscriber's
/// digest: pick a quote, render the body, hand it to the mail transport.
/// Any failure fails the job — no digest ever goes out with a placeholder
/// quote, and a failed job is not retried.
pub struct DigestWorker<S> {
    selector: QuoteSelector<S>,
    email_client: EmailClient,
}

impl<S: QuoteReader> DigestWorker<S> {
    pub fn new(selector: QuoteSelector<S>, email_client: EmailClient) -> Self {
        Self {
            selector,
            email_client,
        }
    }

    #[tracing::instrument(name = "Deliver one digest", skip(self, job), fields(job_id = %job.id))]
    async fn deliver(&self, job: &Job) -> Result<(), DeliveryError> {
        let quote = self.selector.pick_random_approved().await?;
        let html_body = render_digest_body(&quote, &job.payload.context);

        for recipient in &job.payload.recipients {
            let recipient = SubscriberEmail::parse(recipient.clone())
                .map_err(DeliveryError::InvalidRecipient)?;

            self.email_client
                .send_email(&recipient, &job.payload.subject, &html_body)
                .await?;

            tracing::info!(
                recipient = %recipient,
                quote_index = quote.index,
                "Digest delivered"
            );
        }

        Ok(())
    }
}

#[async_trait]
impl<S: QuoteReader + 'static> JobHandler for DigestWorker<S> {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
        self.deliver(job).await?;

        Ok(())
    }
}

fn render_digest_body(quote: &Quote, context: &serde_json::Value) -> String {
    let week = context.get("week").and_then(|value| value.as_u64());
    let heading = match week {
        Some(week) => format!("Your quote for week {}", week),
        None => String::from("Your quote of the week"),
    };

    format!(
        r#"
            <div>
                <h1>{}</h1>
                <blockquote>{}</blockquote>
                <p>— {} ({})</p>
            </div>
        "#,
        heading, quote.text, quote.author, quote.area
    )
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::render_digest_body;
    use crate::domain::quote::Quote;

    fn sample_quote() -> Quote {
        Quote {
            id: Uuid::new_v4(),
            index: 7,
            text: String::from("Nothing in life is to be feared, it is only to be understood."),
            author: String::from("Marie Curie"),
            area: String::from("science"),
            approved: true,
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn body_contains_quote_author_and_week() {
        let body = render_digest_body(&sample_quote(), &serde_json::json!({ "week": 32 }));

        assert!(body.contains("week 32"));
        assert!(body.contains("Marie Curie"));
        assert!(body.contains("only to be understood"));
    }

    #[test]
    fn body_falls_back_to_a_generic_heading_without_a_week() {
        let body = render_digest_body(&sample_quote(), &serde_json::Value::Null);

        assert!(body.contains("Your quote of the week"));
    }
}
