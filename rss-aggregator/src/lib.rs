pub mod types;
pub mod config;
pub mod registry;
pub mod traits;
pub mod parser;
pub mod fetcher;
pub mod fulltext;
pub mod ledger;
pub mod aggregator;
pub mod compiler;
pub mod pipeline;
pub mod logging;

pub use types::*;
pub use config::{AppConfig, ArticleMode, DeliveryConfig, FetchConfig, GuidFallback};
pub use registry::FeedRegistry;
pub use traits::{FeedFetch, FetchedFeed};
pub use parser::FeedParser;
pub use fetcher::Fetcher;
pub use fulltext::FullTextExtractor;
pub use ledger::{Ledger, RunLock, SeenRecord};
pub use aggregator::{Aggregation, Aggregator};
pub use compiler::{CompileOutcome, CompiledDocument, DocumentCompiler};
pub use pipeline::{Pipeline, RunOutcome, RunReport};
