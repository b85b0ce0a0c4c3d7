use crate::types::{Article, FeedSource, FetchError};
use async_trait::async_trait;

/// Anything that can turn a configured feed into its current articles.
///
/// Each call performs a fresh fetch; nothing is cached between calls.
#[async_trait]
pub trait FeedFetch: Send + Sync {
    async fn fetch(&self, source: &FeedSource) -> Result<FetchedFeed, FetchError>;
}

/// The outcome of one successful fetch: consumed once, in feed order.
#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub identifier: String,
    pub title: Option<String>,
    pub articles: Vec<Article>,
}

impl IntoIterator for FetchedFeed {
    type Item = Article;
    type IntoIter = std::vec::IntoIter<Article>;

    fn into_iter(self) -> Self::IntoIter {
        self.articles.into_iter()
    }
}
