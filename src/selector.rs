use rand::Rng;

use crate::domain::quote::Quote;
use crate::storage::QuoteReader;

#[derive(thiserror::Error, Debug)]
pub enum SelectQuoteError {
    #[error("There are no quotes yet.")]
    EmptyCorpus,
    #[error("No approved quote was found within the scanned window.")]
    NoApprovedQuotes,
    #[error("Failed to read quotes from the database.")]
    Storage(#[from] sqlx::Error),
}

/// Picks a pseudo-random approved quote with a bounded scan.
///
/// A target index is drawn from `[1, max_index]`, then one batch of
/// `batch_size` quotes is scanned forward from the target and, if that yields
/// nothing approved, one more batch from the start of the index space. The
/// approval filter runs here rather than in the store, so no composite
/// `(approved, index)` index is needed and at most `2 * batch_size` rows are
/// ever read.
///
/// Selection is deliberately not uniform: a quote sitting after a long run of
/// unapproved or deleted indices absorbs all draws landing in that run, and
/// when approved quotes are spaced more than `batch_size` apart a draw can
/// miss them entirely and fail. That trade keeps the read cost bounded on any
/// corpus.
pub struct QuoteSelector<S> {
    reader: S,
    batch_size: i64,
}

impl<S: QuoteReader> QuoteSelector<S> {
    pub fn new(reader: S, batch_size: i64) -> Self {
        Self { reader, batch_size }
    }

    #[tracing::instrument(name = "Pick a random approved quote", skip(self))]
    pub async fn pick_random_approved(&self) -> Result<Quote, SelectQuoteError> {
        let max_index = self
            .reader
            .max_index()
            .await?
            .ok_or(SelectQuoteError::EmptyCorpus)?;
        let target = rand::thread_rng().gen_range(1..=max_index);

        self.pick_from(target).await
    }

    /// Deterministic part of the selection: forward batch from `target`, then
    /// one wraparound batch from the start of the index space.
    async fn pick_from(&self, target: i64) -> Result<Quote, SelectQuoteError> {
        let forward = self
            .reader
            .scan_by_index(Some(target), self.batch_size)
            .await?;

        if let Some(quote) = forward.into_iter().find(|quote| quote.approved) {
            return Ok(quote);
        }

        let wrapped = self.reader.scan_by_index(None, self.batch_size).await?;

        wrapped
            .into_iter()
            .find(|quote| quote.approved)
            .ok_or(SelectQuoteError::NoApprovedQuotes)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use claim::{assert_matches, assert_ok};
    use uuid::Uuid;

    use super::{QuoteSelector, SelectQuoteError};
    use crate::domain::quote::Quote;
    use crate::storage::QuoteReader;

    /// In-memory corpus standing in for the quotes table. Tracks how many
    /// rows each scan returned so tests can bound the read cost.
    struct FakeCorpus {
        quotes: Vec<Quote>,
    }

    impl FakeCorpus {
        /// Builds a corpus from `(index, approved)` pairs.
        fn with_indices(entries: &[(i64, bool)]) -> Self {
            let quotes = entries
                .iter()
                .map(|(index, approved)| Quote {
                    id: Uuid::new_v4(),
                    index: *index,
                    text: format!("quote #{}", index),
                    author: String::from("Anonymous"),
                    area: String::from("testing"),
                    approved: *approved,
                    submitted_at: Utc::now(),
                })
                .collect();

            Self { quotes }
        }
    }

    #[async_trait]
    impl QuoteReader for FakeCorpus {
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

    #[tokio::test]
    async fn empty_corpus_is_reported_as_such() {
        let selector = QuoteSelector::new(FakeCorpus::with_indices(&[]), 20);

        let result = selector.pick_random_approved().await;

        assert_matches!(result, Err(SelectQuoteError::EmptyCorpus));
    }

    #[tokio::test]
    async fn corpus_without_approved_quotes_fails_after_both_scans() {
        let corpus = FakeCorpus::with_indices(&[(1, false), (2, false), (3, false)]);
        let selector = QuoteSelector::new(corpus, 20);

        let result = selector.pick_random_approved().await;

        assert_matches!(result, Err(SelectQuoteError::NoApprovedQuotes));
    }

    #[tokio::test]
    async fn forward_scan_finds_the_first_approved_quote_after_the_target() {
        // Indices 1..5 with only 4 approved; a draw of 2 scans 2,3,4,5 and
        // lands on 4.
        let corpus = FakeCorpus::with_indices(&[
            (1, false),
            (2, false),
            (3, false),
            (4, true),
            (5, false),
        ]);
        let selector = QuoteSelector::new(corpus, 20);

        let quote = selector.pick_from(2).await.unwrap();

        assert_eq!(quote.index, 4);
        assert!(quote.approved);
    }

    #[tokio::test]
    async fn wraparound_scan_finds_an_approved_quote_before_the_target() {
        // Only index 2 approved and the draw lands on 5: the forward batch is
        // exhausted at index 5, the wraparound batch starts over from 1.
        let corpus = FakeCorpus::with_indices(&[
            (1, false),
            (2, true),
            (3, false),
            (4, false),
            (5, false),
        ]);
        let selector = QuoteSelector::new(corpus, 20);

        let quote = selector.pick_from(5).await.unwrap();

        assert_eq!(quote.index, 2);
    }

    #[tokio::test]
    async fn gaps_left_by_deleted_quotes_are_skipped() {
        // Indices 3 and 9 survive; everything in between was deleted.
        let corpus = FakeCorpus::with_indices(&[(3, false), (9, true)]);
        let selector = QuoteSelector::new(corpus, 20);

        let quote = selector.pick_from(1).await.unwrap();

        assert_eq!(quote.index, 9);
    }

    #[tokio::test]
    async fn approved_quotes_spaced_wider_than_a_batch_can_be_missed() {
        // The only approved quote sits more than one batch past the target
        // and past the start of the index space. Both scans miss it; that
        // spurious failure is part of the selector's contract.
        let entries: Vec<(i64, bool)> = (1..=30).map(|index| (index, index == 25)).collect();
        let corpus = FakeCorpus::with_indices(&entries);
        let selector = QuoteSelector::new(corpus, 3);

        let result = selector.pick_from(10).await;

        assert_matches!(result, Err(SelectQuoteError::NoApprovedQuotes));
    }

    #[tokio::test]
    async fn random_draw_never_returns_an_unapproved_quote() {
        let corpus = FakeCorpus::with_indices(&[
            (1, false),
            (2, true),
            (3, false),
            (4, true),
            (5, false),
        ]);
        let selector = QuoteSelector::new(corpus, 20);

        for _ in 0..50 {
            let quote = selector.pick_random_approved().await;

            assert_ok!(&quote);
            assert!(quote.unwrap().approved);
        }
    }
}
