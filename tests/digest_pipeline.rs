use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use secrecy::Secret;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use quote_digest::domain::quote::Quote;
use quote_digest::domain::subscriber_email::SubscriberEmail;
use quote_digest::email_client::EmailClient;
use quote_digest::queue::{DigestQueue, InProcessQueue, QueueEvent};
use quote_digest::scheduler::enqueue_digests;
use quote_digest::selector::QuoteSelector;
use quote_digest::storage::QuoteReader;
use quote_digest::worker::DigestWorker;

/// Fixed in-memory corpus standing in for the quotes table.
struct FixedCorpus {
    quotes: Vec<Quote>,
}

#[async_trait]
impl QuoteReader for FixedCorpus {
    async fn max_index(&self) -> Result<Option<i64>, sqlx::Error> {
        Ok(self.quotes.iter().map(|quote| quote.index).max())
    }

    async fn scan_by_index(
        &self,
        start_inclusive: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Quote>, sqlx::Error> {
        let floor = start_inclusive.unwrap_or(0);
        let mut matching: Vec<Quote> = self
            .quotes
            .iter()
            .filter(|quote| quote.index >= floor)
            .cloned()
            .collect();

        matching.sort_by_key(|quote| quote.index);
        matching.truncate(limit as usize);

        Ok(matching)
    }
}

fn approved_quote(index: i64) -> Quote {
    Quote {
        id: Uuid::new_v4(),
        index,
        text: format!("Wisdom number {}", index),
        author: String::from("Seneca"),
        area: String::from("philosophy"),
        approved: true,
        submitted_at: Utc::now(),
    }
}

fn subscribers(emails: &[&str]) -> Vec<SubscriberEmail> {
    emails
        .iter()
        .map(|email| SubscriberEmail::parse(email.to_string()).unwrap())
        .collect()
}

fn email_client_for(server: &MockServer) -> EmailClient {
    EmailClient::new(
        server.uri(),
        SubscriberEmail::parse(String::from("digest@test.com")).unwrap(),
        Secret::new(String::from("test-api-key")),
        None,
    )
}

async fn next_event(receiver: &mut tokio::sync::broadcast::Receiver<QueueEvent>) -> QueueEvent {
    tokio::time::timeout(Duration::from_secs(5), receiver.recv())
        .await
        .expect("Timed out waiting for a queue event")
        .expect("Event channel closed")
}

#[tokio::test]
async fn a_digest_run_delivers_one_mail_per_subscriber() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mail/send"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&mock_server)
        .await;

    let corpus = FixedCorpus {
        quotes: vec![approved_quote(1), approved_quote(2), approved_quote(3)],
    };
    let worker = DigestWorker::new(QuoteSelector::new(corpus, 20), email_client_for(&mock_server));

    let queue = InProcessQueue::new();
    let mut events = queue.subscribe();
    queue.process(1, Arc::new(worker)).unwrap();

    let enqueued = enqueue_digests(
        &queue,
        &subscribers(&["ada@test.com", "grace@test.com", "edsger@test.com"]),
        32,
        "Your quote of the week (week {week})",
    )
    .await
    .unwrap();

    assert_eq!(enqueued, 3);

    for _ in 0..3 {
        let event = next_event(&mut events).await;
        assert!(
            matches!(event, QueueEvent::Completed { .. }),
            "Expected a Completed event, got {:?}",
            event
        );
    }
}

#[tokio::test]
async fn a_rejected_send_fails_the_job_but_not_the_run() {
    let mock_server = MockServer::start().await;

    // The transport turns every send down; each job must fail on its own
    // without stopping the ones behind it.
    Mock::given(method("POST"))
        .and(path("/mail/send"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;

    let corpus = FixedCorpus {
        quotes: vec![approved_quote(1)],
    };
    let worker = DigestWorker::new(QuoteSelector::new(corpus, 20), email_client_for(&mock_server));

    let queue = InProcessQueue::new();
    let mut events = queue.subscribe();
    queue.process(1, Arc::new(worker)).unwrap();

    enqueue_digests(
        &queue,
        &subscribers(&["ada@test.com", "grace@test.com", "edsger@test.com"]),
        32,
        "Week {week}",
    )
    .await
    .unwrap();

    for _ in 0..3 {
        let event = next_event(&mut events).await;
        assert!(
            matches!(event, QueueEvent::Failed { .. }),
            "Expected a Failed event, got {:?}",
            event
        );
    }
}

#[tokio::test]
async fn an_empty_corpus_fails_the_job_before_any_send() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mail/send"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let corpus = FixedCorpus { quotes: Vec::new() };
    let worker = DigestWorker::new(QuoteSelector::new(corpus, 20), email_client_for(&mock_server));

    let queue = InProcessQueue::new();
    let mut events = queue.subscribe();
    queue.process(1, Arc::new(worker)).unwrap();

    enqueue_digests(&queue, &subscribers(&["ada@test.com"]), 32, "Week {week}")
        .await
        .unwrap();

    match next_event(&mut events).await {
        QueueEvent::Failed { error, .. } => {
            assert!(error.contains("quote"), "Unexpected failure reason: {}", error);
        }
        other => panic!("Expected a Failed event, got {:?}", other),
    }
}
