use crate::aggregator::Aggregator;
use crate::compiler::{CompileOutcome, DocumentCompiler};
use crate::config::{AppConfig, ArticleMode};
use crate::fetcher::Fetcher;
use crate::fulltext::FullTextExtractor;
use crate::ledger::{Ledger, RunLock};
use crate::registry::FeedRegistry;
use crate::traits::FeedFetch;
use crate::types::{AggregatorError, DeliveryReceipt, DeliveryRequest, Dispatcher, FetchError, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Debug)]
pub enum RunOutcome {
    /// A newspaper was written, the ledger updated and the artifact handed to the dispatcher.
    Delivered {
        artifact: PathBuf,
        receipt: DeliveryReceipt,
    },
    /// No feed had anything that was not delivered before.
    NothingNew,
}

#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub accepted: usize,
    pub failures: Vec<FetchError>,
}

/// One end-to-end run: registry, ledger, aggregation, compilation, delivery.
pub struct Pipeline<F: FeedFetch> {
    config: AppConfig,
    aggregator: Aggregator<F>,
    compiler: DocumentCompiler,
    full_text: Option<FullTextExtractor>,
    dispatcher: Box<dyn Dispatcher>,
}

impl Pipeline<Fetcher> {
    pub fn from_config(config: AppConfig, dispatcher: Box<dyn Dispatcher>) -> Result<Self> {
        let fetcher = Fetcher::new(config.fetch.clone(), config.article_mode, config.guid_fallback)?;
        let full_text = match config.article_mode {
            ArticleMode::Full => Some(FullTextExtractor::new(&config.fetch)?),
            ArticleMode::Summary => None,
        };
        Ok(Self::with_fetcher(config, fetcher, dispatcher).full_text(full_text))
    }
}

impl<F: FeedFetch> Pipeline<F> {
    pub fn with_fetcher(config: AppConfig, fetcher: F, dispatcher: Box<dyn Dispatcher>) -> Self {
        let aggregator = Aggregator::new(fetcher, config.fetch.timeout()).concurrent(config.fetch.concurrent);
        let compiler = DocumentCompiler::from_config(&config);
        Self {
            config,
            aggregator,
            compiler,
            full_text: None,
            dispatcher,
        }
    }

    /// Download linked pages for the article bodies before compiling.
    pub fn full_text(mut self, extractor: Option<FullTextExtractor>) -> Self {
        self.full_text = extractor;
        self
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<RunReport> {
        let _lock = RunLock::acquire(&self.config.ledger_path)?;
        info!("Starting run '{}' at {}", self.config.run_label, now.to_rfc3339());

        let registry = FeedRegistry::load(&self.config.feeds_path)?;
        let sources = registry.list_sources();
        if sources.is_empty() {
            return Err(AggregatorError::NoFeeds);
        }

        let ledger = Ledger::new(&self.config.ledger_path);
        let mut seen = ledger.load().await?;

        let aggregation = self.aggregator.run(sources, &mut seen).await;
        if aggregation.failures.len() == sources.len() {
            error!("Every configured feed failed, nothing can be compiled");
            return Err(AggregatorError::AllFeedsFailed { count: sources.len() });
        }

        let accepted = aggregation.articles.len();
        let articles = match &self.full_text {
            Some(extractor) if accepted > 0 => extractor.enrich(aggregation.articles).await,
            _ => aggregation.articles,
        };

        let document = match self.compiler.compile(&articles, now) {
            CompileOutcome::NothingToDeliver => {
                info!("Nothing new since the last run");
                return Ok(RunReport {
                    outcome: RunOutcome::NothingNew,
                    accepted,
                    failures: aggregation.failures,
                });
            }
            CompileOutcome::Document(document) => document,
        };

        let artifact = self.compiler.render_epub(&document)?;
        let artifact_path = self.config.output_dir.join(document.file_name());
        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        tokio::fs::write(&artifact_path, &artifact).await?;
        info!("Wrote {} ({} bytes)", artifact_path.display(), artifact.len());

        // Persist before dispatch: a failed send must not redeliver these articles.
        ledger.persist(&seen).await?;

        let request = DeliveryRequest {
            artifact,
            file_name: document.file_name(),
            destination: self
                .config
                .delivery
                .as_ref()
                .map(|d| d.target_email.clone())
                .unwrap_or_default(),
            subject: format!("{} - {}", self.config.run_label, document.date()),
        };

        info!("Dispatching {} via {}", request.file_name, self.dispatcher.name());
        let receipt = self.dispatcher.dispatch(request).await.map_err(|e| {
            warn!("Delivery failed, ledger already records these {} articles: {}", accepted, e);
            AggregatorError::Delivery(e)
        })?;

        info!(
            "Run complete: {} articles delivered to {}, {} feeds skipped",
            accepted,
            receipt.destination,
            aggregation.failures.len()
        );
        Ok(RunReport {
            outcome: RunOutcome::Delivered {
                artifact: artifact_path,
                receipt,
            },
            accepted,
            failures: aggregation.failures,
        })
    }
}
