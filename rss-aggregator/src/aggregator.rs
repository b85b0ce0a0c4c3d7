use crate::ledger::SeenRecord;
use crate::traits::{FeedFetch, FetchedFeed};
use crate::types::{Article, FeedSource, FetchCause, FetchError};
use futures::future::join_all;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The new articles of one run, plus every feed that could not be fetched.
#[derive(Debug, Default)]
pub struct Aggregation {
    pub articles: Vec<Article>,
    pub failures: Vec<FetchError>,
}

impl Aggregation {
    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }
}

/// Collects articles that earlier runs have not delivered yet.
///
/// Output is grouped by feed in registry order, and within a feed follows the
/// feed's own order. This holds whether fetching is sequential or concurrent.
pub struct Aggregator<F: FeedFetch> {
    fetcher: F,
    timeout: Duration,
    concurrent: bool,
}

impl<F: FeedFetch> Aggregator<F> {
    pub fn new(fetcher: F, timeout: Duration) -> Self {
        Self {
            fetcher,
            timeout,
            concurrent: false,
        }
    }

    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    /// Fetch every source and accept each article not yet in `seen`, marking
    /// it as it goes. Fetch failures are collected, never returned as errors.
    pub async fn run(&self, sources: &[FeedSource], seen: &mut SeenRecord) -> Aggregation {
        info!(
            "Aggregating {} feeds ({})",
            sources.len(),
            if self.concurrent { "concurrent" } else { "sequential" }
        );

        let results = if self.concurrent {
            join_all(sources.iter().map(|source| self.fetch_bounded(source))).await
        } else {
            let mut results = Vec::with_capacity(sources.len());
            for source in sources {
                results.push(self.fetch_bounded(source).await);
            }
            results
        };

        let mut aggregation = Aggregation::default();
        for result in results {
            match result {
                Ok(feed) => accept_new(feed, seen, &mut aggregation.articles),
                Err(e) => {
                    warn!("{}", e);
                    aggregation.failures.push(e);
                }
            }
        }

        info!(
            "Aggregation finished: {} new articles, {}/{} feeds failed",
            aggregation.articles.len(),
            aggregation.failures.len(),
            sources.len()
        );
        for failure in &aggregation.failures {
            info!("  skipped {}: {}", failure.identifier, failure.cause);
        }

        aggregation
    }

    async fn fetch_bounded(&self, source: &FeedSource) -> Result<FetchedFeed, FetchError> {
        match tokio::time::timeout(self.timeout, self.fetcher.fetch(source)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::new(&source.identifier, FetchCause::Timeout(self.timeout))),
        }
    }
}

fn accept_new(feed: FetchedFeed, seen: &mut SeenRecord, out: &mut Vec<Article>) {
    let identifier = feed.identifier.clone();
    let mut accepted = 0;
    for article in feed {
        if seen.mark_seen(&identifier, &article.guid) {
            out.push(article);
            accepted += 1;
        } else {
            debug!("Skipping already seen {} from {}", article.guid, identifier);
        }
    }
    info!("Feed {}: {} new articles", identifier, accepted);
}
