use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A configured feed: a URL or a local file path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    #[serde(alias = "url")]
    pub identifier: String,
    #[serde(default, alias = "name", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, alias = "num_articles", skip_serializing_if = "Option::is_none")]
    pub max_articles: Option<usize>,
}

impl FeedSource {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            label: None,
            max_articles: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_max_articles(mut self, max_articles: usize) -> Self {
        self.max_articles = Some(max_articles);
        self
    }
}

/// One normalized feed entry. Every optional field of the source feed has
/// already been resolved to an explicit value or `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub feed_identifier: String,
    pub guid: String,
    pub title: String,
    pub link: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub summary_or_body: String,
    pub feed_label: String,
}

/// Everything the transport needs to hand one compiled document to a reader.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub artifact: Vec<u8>,
    pub file_name: String,
    pub destination: String,
    pub subject: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub destination: String,
    pub bytes_sent: usize,
    pub sent: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("invalid delivery address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("failed to build message: {0}")]
    Message(String),

    #[error("transport error: {0}")]
    Transport(String),
}

// Object style note:
// A dispatcher is handed one finished artifact per run and either delivers it
// or reports why not. It never retries and never touches the ledger; the
// caller has already persisted it by the time dispatch is attempted.

#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Short name used in logs, e.g. "smtp" or "dry-run".
    fn name(&self) -> &str;

    async fn dispatch(&self, request: DeliveryRequest) -> Result<DeliveryReceipt, DeliveryError>;
}
