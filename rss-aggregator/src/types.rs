use std::path::PathBuf;
use std::time::Duration;

pub use interfaces::defs::{Article, DeliveryError, DeliveryReceipt, DeliveryRequest, Dispatcher, FeedSource};

/// Why a single feed could not be fetched. Never fatal for a run.
#[derive(Debug, thiserror::Error)]
pub enum FetchCause {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status}")]
    Status { status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("feed parse error: {0}")]
    Parse(String),

    #[error("feed size exceeds limit: {size_mb}MB")]
    TooLarge { size_mb: usize },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unsupported feed identifier: {0}")]
    Unsupported(String),
}

#[derive(Debug, thiserror::Error)]
#[error("failed to fetch feed {identifier}: {cause}")]
pub struct FetchError {
    pub identifier: String,
    #[source]
    pub cause: FetchCause,
}

impl FetchError {
    pub fn new(identifier: impl Into<String>, cause: impl Into<FetchCause>) -> Self {
        Self {
            identifier: identifier.into(),
            cause: cause.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no feeds configured")]
    NoFeeds,

    #[error("all {count} feeds failed to fetch")]
    AllFeedsFailed { count: usize },

    #[error("ledger at {path} is unreadable: {reason}")]
    LedgerCorrupt { path: PathBuf, reason: String },

    #[error("ledger error: {0}")]
    Ledger(#[from] sqlx::Error),

    #[error("another run holds the lock at {path}")]
    Locked { path: PathBuf },

    #[error("compilation error: {0}")]
    Compilation(String),

    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AggregatorError>;
