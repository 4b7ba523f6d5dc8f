use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::domain::new_quote::NewQuote;
use crate::domain::new_subscriber::NewSubscriber;
use crate::domain::quote::Quote;
use crate::domain::subscriber::Subscriber;
use crate::domain::subscriber_email::SubscriberEmail;

/// How many times an insert is retried when two submissions race on the same
/// index and one of them trips the UNIQUE constraint.
const MAX_INDEX_ALLOCATION_ATTEMPTS: u32 = 3;

/// The two read shapes the quote selector needs from the backing store.
/// Kept as a trait so tests can run the selector against an in-memory corpus.
#[async_trait]
pub trait QuoteReader: Send + Sync {
    /// Highest `index` across all quotes regardless of approval, or None for
    /// an empty corpus.
    async fn max_index(&self) -> Result<Option<i64>, sqlx::Error>;

    /// Quotes in ascending index order, optionally starting at a floor,
    /// at most `limit` rows.
    async fn scan_by_index(
        &self,
        start_inclusive: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Quote>, sqlx::Error>;
}

#[derive(Clone)]
pub struct PgQuoteStorage {
    pool: PgPool,
}

impl PgQuoteStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuoteReader for PgQuoteStorage {
    async fn max_index(&self) -> Result<Option<i64>, sqlx::Error> {
        let row = sqlx::query("SELECT MAX(quote_index) AS max_index FROM quotes")
            .fetch_one(&self.pool)
            .await?;

        row.try_get("max_index")
    }

    async fn scan_by_index(
        &self,
        start_inclusive: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Quote>, sqlx::Error> {
        sqlx::query(
            r#"
            SELECT id, quote_index, text, author, area, approved, submitted_at
            FROM quotes
            WHERE quote_index >= COALESCE($1, 0)
            ORDER BY quote_index ASC
            LIMIT $2
            "#,
        )
        .bind(start_inclusive)
        .bind(limit)
        .map(map_quote_row)
        .fetch_all(&self.pool)
        .await
    }
}

/// The index that the next submitted quote gets: one past the highest ever
/// assigned, starting at 1 for an empty corpus.
pub fn next_index(max_index: Option<i64>) -> i64 {
    max_index.unwrap_or(0) + 1
}

#[tracing::instrument(name = "Read the next free quote index", skip(pool))]
pub async fn next_quote_index(pool: &PgPool) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT MAX(quote_index) AS max_index FROM quotes")
        .fetch_one(pool)
        .await?;

    Ok(next_index(row.try_get("max_index")?))
}

/// Persist a new quote with the next free index. The index is computed inside
/// the INSERT itself; the UNIQUE constraint on `quote_index` turns a race
/// between concurrent submissions into a retryable conflict, so assignment
/// stays serializable without an explicit lock.
#[tracing::instrument(name = "Insert a new quote into the database", skip(new_quote, pool))]
pub async fn insert_quote(pool: &PgPool, new_quote: &NewQuote) -> Result<Quote, sqlx::Error> {
    let mut attempts = 0;

    loop {
        attempts += 1;

        let result = sqlx::query(
            r#"
            INSERT INTO quotes (id, quote_index, text, author, area, approved, submitted_at)
            SELECT $1, COALESCE(MAX(quote_index), 0) + 1, $2, $3, $4, FALSE, $5
            FROM quotes
            RETURNING id, quote_index, text, author, area, approved, submitted_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new_quote.text.as_ref())
        .bind(new_quote.author.as_ref())
        .bind(new_quote.area.as_ref())
        .bind(Utc::now())
        .map(map_quote_row)
        .fetch_one(pool)
        .await;

        match result {
            Ok(quote) => return Ok(quote),
            Err(err) if is_unique_violation(&err) && attempts < MAX_INDEX_ALLOCATION_ATTEMPTS => {
                tracing::warn!(attempts, "Quote index collision, retrying allocation");
            }
            Err(err) => {
                tracing::error!("Failed to execute query: {:?}", err);
                return Err(err);
            }
        }
    }
}

#[derive(Debug)]
pub enum SignupOutcome {
    Created(Subscriber),
    Reactivated(Subscriber),
    AlreadyActive,
}

/// Idempotent signup: a fresh email gets a row, an unsubscribed one is
/// reactivated, an already-active one is left untouched and reported as such.
#[tracing::instrument(
    name = "Upsert a subscriber",
    skip(new_subscriber, pool),
    fields(subscriber_email = %new_subscriber.email)
)]
pub async fn upsert_subscriber(
    pool: &PgPool,
    new_subscriber: &NewSubscriber,
) -> Result<SignupOutcome, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let existing: Option<bool> =
        sqlx::query("SELECT active FROM subscribers WHERE email = $1 FOR UPDATE")
            .bind(new_subscriber.email.as_ref())
            .map(|row: PgRow| row.get("active"))
            .fetch_optional(&mut tx)
            .await?;

    let outcome = match existing {
        None => {
            let subscriber = sqlx::query(
                r#"
                INSERT INTO subscribers (email, active, subscribed_at)
                VALUES ($1, TRUE, $2)
                RETURNING email, active, subscribed_at, unsubscribed_at
                "#,
            )
            .bind(new_subscriber.email.as_ref())
            .bind(Utc::now())
            .map(map_subscriber_row)
            .fetch_one(&mut tx)
            .await?;

            SignupOutcome::Created(subscriber)
        }
        Some(true) => SignupOutcome::AlreadyActive,
        Some(false) => {
            let subscriber = sqlx::query(
                r#"
                UPDATE subscribers
                SET active = TRUE, subscribed_at = $2, unsubscribed_at = NULL
                WHERE email = $1
                RETURNING email, active, subscribed_at, unsubscribed_at
                "#,
            )
            .bind(new_subscriber.email.as_ref())
            .bind(Utc::now())
            .map(map_subscriber_row)
            .fetch_one(&mut tx)
            .await?;

            SignupOutcome::Reactivated(subscriber)
        }
    };

    tx.commit().await?;

    Ok(outcome)
}

/// Flip a subscriber to inactive. Returns false when the email is unknown or
/// already inactive.
#[tracing::instrument(name = "Deactivate a subscriber", skip(pool))]
pub async fn deactivate_subscriber(
    pool: &PgPool,
    email: &SubscriberEmail,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE subscribers
        SET active = FALSE, unsubscribed_at = $2
        WHERE email = $1 AND active = TRUE
        "#,
    )
    .bind(email.as_ref())
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[tracing::instrument(name = "Fetch all active subscribers", skip(pool))]
pub async fn active_subscribers(pool: &PgPool) -> Result<Vec<SubscriberEmail>, sqlx::Error> {
    let rows: Vec<String> = sqlx::query("SELECT email FROM subscribers WHERE active = TRUE")
        .map(|row: PgRow| row.get("email"))
        .fetch_all(pool)
        .await?;

    // Stored emails went through SubscriberEmail::parse on the way in; a row
    // that no longer parses is skipped rather than poisoning the whole run.
    Ok(rows
        .into_iter()
        .filter_map(|email| match SubscriberEmail::parse(email) {
            Ok(email) => Some(email),
            Err(err) => {
                tracing::warn!("Skipping stored subscriber with invalid email: {}", err);
                None
            }
        })
        .collect())
}

fn map_subscriber_row(row: PgRow) -> Subscriber {
    Subscriber {
        email: SubscriberEmail::parse(row.get("email")).unwrap(),
        active: row.get("active"),
        subscribed_at: row.get("subscribed_at"),
        unsubscribed_at: row.get("unsubscribed_at"),
    }
}

fn map_quote_row(row: PgRow) -> Quote {
    Quote {
        id: row.get("id"),
        index: row.get("quote_index"),
        text: row.get("text"),
        author: row.get("author"),
        area: row.get("area"),
        approved: row.get("approved"),
        submitted_at: row.get("submitted_at"),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::next_index;

    #[test]
    fn next_index_starts_at_one_for_an_empty_corpus() {
        assert_eq!(next_index(None), 1);
    }

    #[test]
    fn next_index_is_one_past_the_current_maximum() {
        assert_eq!(next_index(Some(41)), 42);
    }
}
