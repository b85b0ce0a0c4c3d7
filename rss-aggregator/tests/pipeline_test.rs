use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use interfaces::{DeliveryError, DeliveryReceipt, DeliveryRequest, Dispatcher, DryRunDispatcher};
use rss_aggregator::{
    AggregatorError, AppConfig, ArticleMode, FeedRegistry, FeedSource, Ledger, Pipeline, RunLock,
    RunOutcome,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};
use tempfile::TempDir;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .try_init()
            .ok();
    });
}

fn rss(title: &str, items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(guid, item_title)| {
            format!(
                "<item><title>{}</title><link>https://example.com/{}</link><guid>{}</guid><description>&lt;p&gt;Body of {}&lt;/p&gt;</description></item>",
                item_title, guid, guid, item_title
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>{}</title><link>https://example.com</link><description>test</description>{}</channel></rss>"#,
        title, items
    )
}

struct Fixture {
    dir: TempDir,
    config: AppConfig,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            run_label: "Test Paper".to_string(),
            feeds_path: dir.path().join("configs").join("feeds.json"),
            ledger_path: dir.path().join("state").join("ledger.db"),
            output_dir: dir.path().join("newspapers"),
            ..AppConfig::default()
        };
        Self { dir, config }
    }

    fn feed_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write_feed(&self, name: &str, content: &str) -> String {
        let path = self.feed_path(name);
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().to_string()
    }

    fn register(&self, identifiers: &[String]) {
        let mut registry = FeedRegistry::load(&self.config.feeds_path).unwrap();
        for identifier in identifiers {
            registry.add_source(FeedSource::new(identifier.clone())).unwrap();
        }
        registry.save().unwrap();
    }

    fn pipeline(&self, dispatcher: Box<dyn Dispatcher>) -> Pipeline<rss_aggregator::Fetcher> {
        Pipeline::from_config(self.config.clone(), dispatcher).unwrap()
    }

    fn artifacts(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.config.output_dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn run_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap()
}

#[derive(Clone, Default)]
struct RecordingDispatcher {
    requests: Arc<Mutex<Vec<DeliveryRequest>>>,
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    fn name(&self) -> &str {
        "recording"
    }

    async fn dispatch(&self, request: DeliveryRequest) -> Result<DeliveryReceipt, DeliveryError> {
        let receipt = DeliveryReceipt {
            destination: request.destination.clone(),
            bytes_sent: request.artifact.len(),
            sent: true,
        };
        self.requests.lock().unwrap().push(request);
        Ok(receipt)
    }
}

struct FailingDispatcher;

#[async_trait]
impl Dispatcher for FailingDispatcher {
    fn name(&self) -> &str {
        "failing"
    }

    async fn dispatch(&self, _request: DeliveryRequest) -> Result<DeliveryReceipt, DeliveryError> {
        Err(DeliveryError::Transport("connection refused".to_string()))
    }
}

fn artifact_exists(path: &Path) -> bool {
    path.exists() && std::fs::metadata(path).unwrap().len() > 0
}

#[tokio::test]
async fn test_first_run_delivers_then_nothing_new() {
    let fixture = Fixture::new();
    let feed = fixture.write_feed("news.xml", &rss("News", &[("n1", "One"), ("n2", "Two")]));
    fixture.register(&[feed.clone()]);

    let dispatcher = RecordingDispatcher::default();
    let report = fixture
        .pipeline(Box::new(dispatcher.clone()))
        .run(run_time())
        .await
        .unwrap();

    assert_eq!(report.accepted, 2);
    match &report.outcome {
        RunOutcome::Delivered { artifact, receipt } => {
            assert!(artifact_exists(artifact));
            assert!(artifact.ends_with("newspaper_2024-05-01.epub"));
            assert!(receipt.sent);
        }
        RunOutcome::NothingNew => panic!("expected a delivery"),
    }

    {
        let requests = dispatcher.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].subject, "Test Paper - 2024-05-01");
        assert_eq!(requests[0].file_name, "newspaper_2024-05-01.epub");
        assert!(requests[0].artifact.starts_with(b"PK"));
    }

    let seen = Ledger::new(&fixture.config.ledger_path).load().await.unwrap();
    assert!(seen.contains(&feed, "n1"));
    assert!(seen.contains(&feed, "n2"));

    let second = fixture
        .pipeline(Box::new(dispatcher.clone()))
        .run(run_time())
        .await
        .unwrap();
    assert!(matches!(second.outcome, RunOutcome::NothingNew));
    assert_eq!(second.accepted, 0);
    assert_eq!(dispatcher.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_only_new_articles_are_delivered() {
    let fixture = Fixture::new();
    let feed = fixture.write_feed("news.xml", &rss("News", &[("n1", "One")]));
    fixture.register(&[feed.clone()]);

    fixture
        .pipeline(Box::new(DryRunDispatcher))
        .run(run_time())
        .await
        .unwrap();

    fixture.write_feed("news.xml", &rss("News", &[("n2", "Two"), ("n1", "One")]));
    let report = fixture
        .pipeline(Box::new(DryRunDispatcher))
        .run(run_time() + chrono::Duration::days(1))
        .await
        .unwrap();

    assert_eq!(report.accepted, 1);
    assert_eq!(fixture.artifacts().len(), 2);
}

#[tokio::test]
async fn test_nothing_new_writes_no_artifact() {
    let fixture = Fixture::new();
    let feed = fixture.write_feed("empty.xml", &rss("Empty", &[]));
    fixture.register(&[feed]);

    let report = fixture
        .pipeline(Box::new(DryRunDispatcher))
        .run(run_time())
        .await
        .unwrap();

    assert!(matches!(report.outcome, RunOutcome::NothingNew));
    assert!(fixture.artifacts().is_empty());
    assert!(!fixture.config.ledger_path.exists());
}

#[tokio::test]
async fn test_no_feeds_is_fatal() {
    let fixture = Fixture::new();
    let err = fixture
        .pipeline(Box::new(DryRunDispatcher))
        .run(run_time())
        .await
        .unwrap_err();
    assert!(matches!(err, AggregatorError::NoFeeds));
}

#[tokio::test]
async fn test_corrupt_ledger_compiles_nothing() {
    let fixture = Fixture::new();
    let feed = fixture.write_feed("news.xml", &rss("News", &[("n1", "One")]));
    fixture.register(&[feed]);

    std::fs::create_dir_all(fixture.config.ledger_path.parent().unwrap()).unwrap();
    std::fs::write(&fixture.config.ledger_path, b"this is not a ledger at all, just text").unwrap();

    let err = fixture
        .pipeline(Box::new(DryRunDispatcher))
        .run(run_time())
        .await
        .unwrap_err();
    assert!(matches!(err, AggregatorError::LedgerCorrupt { .. }));
    assert!(fixture.artifacts().is_empty());
}

#[tokio::test]
async fn test_failing_feed_is_skipped() {
    let fixture = Fixture::new();
    let first = fixture.write_feed("one.xml", &rss("One", &[("a1", "A1")]));
    let missing = fixture.feed_path("missing.xml").to_string_lossy().to_string();
    let broken = fixture.write_feed("broken.xml", "<html>not a feed</html>");
    let third = fixture.write_feed("three.xml", &rss("Three", &[("c1", "C1")]));
    fixture.register(&[first.clone(), missing.clone(), broken.clone(), third.clone()]);

    let dispatcher = RecordingDispatcher::default();
    let report = fixture
        .pipeline(Box::new(dispatcher.clone()))
        .run(run_time())
        .await
        .unwrap();

    assert_eq!(report.accepted, 2);
    let failed: Vec<&str> = report.failures.iter().map(|f| f.identifier.as_str()).collect();
    assert_eq!(failed, vec![missing.as_str(), broken.as_str()]);
    assert!(matches!(report.outcome, RunOutcome::Delivered { .. }));
}

#[tokio::test]
async fn test_all_feeds_failing_is_fatal() {
    let fixture = Fixture::new();
    let missing = fixture.feed_path("missing.xml").to_string_lossy().to_string();
    fixture.register(&[missing]);

    let err = fixture
        .pipeline(Box::new(DryRunDispatcher))
        .run(run_time())
        .await
        .unwrap_err();
    assert!(matches!(err, AggregatorError::AllFeedsFailed { count: 1 }));
}

#[tokio::test]
async fn test_delivery_failure_keeps_articles_marked_seen() {
    let fixture = Fixture::new();
    let feed = fixture.write_feed("news.xml", &rss("News", &[("n1", "One")]));
    fixture.register(&[feed.clone()]);

    let err = fixture
        .pipeline(Box::new(FailingDispatcher))
        .run(run_time())
        .await
        .unwrap_err();
    assert!(matches!(err, AggregatorError::Delivery(_)));
    assert_eq!(fixture.artifacts().len(), 1);

    let seen = Ledger::new(&fixture.config.ledger_path).load().await.unwrap();
    assert!(seen.contains(&feed, "n1"));

    let retry = fixture
        .pipeline(Box::new(DryRunDispatcher))
        .run(run_time())
        .await
        .unwrap();
    assert!(matches!(retry.outcome, RunOutcome::NothingNew));
}

#[tokio::test]
async fn test_concurrent_run_is_rejected() {
    let fixture = Fixture::new();
    let feed = fixture.write_feed("news.xml", &rss("News", &[("n1", "One")]));
    fixture.register(&[feed]);

    let _held = RunLock::acquire(&fixture.config.ledger_path).unwrap();
    let err = fixture
        .pipeline(Box::new(DryRunDispatcher))
        .run(run_time())
        .await
        .unwrap_err();
    assert!(matches!(err, AggregatorError::Locked { .. }));
}

#[tokio::test]
async fn test_full_mode_delivers_when_pages_are_unreachable() {
    let mut fixture = Fixture::new();
    fixture.config.article_mode = ArticleMode::Full;
    fixture.config.fetch.article_timeout_seconds = 2;

    // Nothing listens on the closed port, so every page download fails fast.
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let feed = fixture.write_feed(
        "news.xml",
        &format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>News</title><link>https://example.com</link><description>test</description><item><title>Linked</title><link>http://{}/story</link><guid>l1</guid><description>Feed body</description></item><item><title>Unlinked</title><guid>u1</guid><description>Other body</description></item></channel></rss>"#,
            closed
        ),
    );
    fixture.register(&[feed.clone()]);

    let dispatcher = RecordingDispatcher::default();
    let report = fixture
        .pipeline(Box::new(dispatcher.clone()))
        .run(run_time())
        .await
        .unwrap();

    assert_eq!(report.accepted, 2);
    assert!(matches!(report.outcome, RunOutcome::Delivered { .. }));
    assert_eq!(dispatcher.requests.lock().unwrap().len(), 1);

    let seen = Ledger::new(&fixture.config.ledger_path).load().await.unwrap();
    assert!(seen.contains(&feed, "l1"));
    assert!(seen.contains(&feed, "u1"));
}
