use interfaces::Article;
use rss_aggregator::{FetchCause, FetchConfig, FullTextExtractor};
use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .try_init()
            .ok();
    });
}

const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>The last lighthouse keeper</title></head>
<body>
  <div class="nav"><a href="/">Home</a> | <a href="/world">World</a> | <a href="/sport">Sport</a></div>
  <div class="article" id="story">
    <h1>The last lighthouse keeper</h1>
    <p>For forty years, Margaret Hale climbed the spiral stairs of the Skerry light every evening, trimming the wick, polishing the lens, and logging the weather in a ledger that now fills an entire shelf.</p>
    <p>When the light was automated last spring, the coastguard offered her a cottage in town, a pension, and a plaque, but she asked only to keep the ledgers, which she says are the true history of the island.</p>
    <p>Fishermen who grew up watching the beam sweep across the harbour describe her as stubborn, generous, and impossible to argue with, especially about the tides, the gulls, or the proper way to brew tea.</p>
    <p>She still walks to the headland each night, she admits, just to check that the new lamp turns on, and so far, she says with some disappointment, it has never once failed.</p>
  </div>
  <div class="footer">Copyright The Island Gazette</div>
</body>
</html>"#;

/// Serve one canned HTML response per connection, after an optional delay.
async fn serve(status: &'static str, body: &'static str, delay: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                tokio::time::sleep(delay).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

fn article(guid: &str, link: Option<String>) -> Article {
    Article {
        feed_identifier: "https://gazette.example/rss".to_string(),
        guid: guid.to_string(),
        title: format!("Story {}", guid),
        link,
        published_at: None,
        author: None,
        summary_or_body: format!("Feed summary of {}", guid),
        feed_label: "Island Gazette".to_string(),
    }
}

fn extractor(config: FetchConfig) -> FullTextExtractor {
    FullTextExtractor::new(&config).unwrap()
}

#[tokio::test]
async fn test_extracts_article_text_from_page() {
    init_tracing();
    let addr = serve("200 OK", PAGE, Duration::ZERO).await;

    let body = extractor(FetchConfig::default())
        .extract(&format!("http://{}/lighthouse", addr))
        .await
        .unwrap();
    assert!(body.contains("Margaret Hale climbed the spiral stairs"));
    assert!(body.contains("it has never once failed"));
}

#[tokio::test]
async fn test_failed_pages_keep_feed_body() {
    init_tracing();
    let page = serve("200 OK", PAGE, Duration::ZERO).await;
    let missing = serve("404 Not Found", "gone", Duration::ZERO).await;

    let articles = vec![
        article("ok", Some(format!("http://{}/lighthouse", page))),
        article("missing", Some(format!("http://{}/gone", missing))),
        article("unlinked", None),
        article("ftp", Some("ftp://gazette.example/story".to_string())),
        article("junk", Some("not a url".to_string())),
    ];
    let enriched = extractor(FetchConfig::default()).enrich(articles.clone()).await;

    assert_eq!(enriched.len(), articles.len());
    assert!(enriched[0].summary_or_body.contains("Margaret Hale"));
    assert_eq!(enriched[0].guid, "ok");
    assert_eq!(enriched[0].title, articles[0].title);
    assert_eq!(&enriched[1..], &articles[1..]);
}

#[tokio::test]
async fn test_slow_page_is_bounded_by_article_timeout() {
    init_tracing();
    let addr = serve("200 OK", PAGE, Duration::from_secs(5)).await;
    let config = FetchConfig {
        article_timeout_seconds: 1,
        ..FetchConfig::default()
    };
    let extractor = extractor(config);
    let link = format!("http://{}/slow", addr);

    let err = extractor.extract(&link).await.unwrap_err();
    assert!(matches!(err, FetchCause::Timeout(_) | FetchCause::Http(_)));

    let original = article("slow", Some(link));
    let enriched = extractor.enrich(vec![original.clone()]).await;
    assert_eq!(enriched, vec![original]);
}

#[tokio::test]
async fn test_error_status_is_reported() {
    init_tracing();
    let addr = serve("500 Internal Server Error", "boom", Duration::ZERO).await;
    let err = extractor(FetchConfig::default())
        .extract(&format!("http://{}/broken", addr))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchCause::Status { status: 500 }));
}
