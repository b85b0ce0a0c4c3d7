use crate::config::{ArticleMode, FetchConfig, GuidFallback};
use crate::parser::FeedParser;
use crate::traits::{FeedFetch, FetchedFeed};
use crate::types::{FeedSource, FetchCause, FetchError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use url::Url;

enum Location {
    Http(Url),
    File(PathBuf),
}

/// Retrieves feeds over HTTP(S) or from local files and parses them.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    parser: FeedParser,
}

impl Fetcher {
    pub fn new(config: FetchConfig, mode: ArticleMode, guid_fallback: GuidFallback) -> Result<Self> {
        Ok(Self {
            client: build_client(&config, config.timeout())?,
            config,
            parser: FeedParser::new(mode, guid_fallback),
        })
    }

    /// Raw feed bytes for an identifier, without parsing.
    pub async fn fetch_content(&self, identifier: &str) -> std::result::Result<Vec<u8>, FetchCause> {
        match classify(identifier)? {
            Location::Http(url) => self.fetch_http(url).await,
            Location::File(path) => self.read_file(path).await,
        }
    }

    async fn fetch_http(&self, url: Url) -> std::result::Result<Vec<u8>, FetchCause> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchCause::Status { status: status.as_u16() });
        }

        if let Some(content_length) = response.content_length() {
            check_size(
                usize::try_from(content_length).unwrap_or(usize::MAX),
                self.config.max_feed_size_mb,
            )?;
        }

        let bytes = response.bytes().await?;
        check_size(bytes.len(), self.config.max_feed_size_mb)?;
        debug!("Fetched {} ({} bytes, HTTP {})", url, bytes.len(), status.as_u16());
        Ok(bytes.to_vec())
    }

    async fn read_file(&self, path: PathBuf) -> std::result::Result<Vec<u8>, FetchCause> {
        let metadata = tokio::fs::metadata(&path).await?;
        check_size(
            usize::try_from(metadata.len()).unwrap_or(usize::MAX),
            self.config.max_feed_size_mb,
        )?;
        let bytes = tokio::fs::read(&path).await?;
        debug!("Read {} ({} bytes)", path.display(), bytes.len());
        Ok(bytes)
    }

}

pub(crate) fn build_client(config: &FetchConfig, timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(&config.user_agent)
        .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .timeout(timeout)
        .gzip(true)
        .deflate(true)
        .brotli(true)
        .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
        .build()
}

pub(crate) fn check_size(len: usize, max_mb: usize) -> std::result::Result<(), FetchCause> {
    const MB: usize = 1024 * 1024;
    if len > max_mb.saturating_mul(MB) {
        return Err(FetchCause::TooLarge { size_mb: len.div_ceil(MB) });
    }
    Ok(())
}

#[async_trait]
impl FeedFetch for Fetcher {
    async fn fetch(&self, source: &FeedSource) -> std::result::Result<FetchedFeed, FetchError> {
        let start = Instant::now();
        let content = self
            .fetch_content(&source.identifier)
            .await
            .map_err(|cause| FetchError::new(&source.identifier, cause))?;
        let parsed = self
            .parser
            .parse_feed(source, &content)
            .map_err(|cause| FetchError::new(&source.identifier, cause))?;

        info!(
            "Fetched feed {}: {} entries in {}ms",
            source.identifier,
            parsed.articles.len(),
            start.elapsed().as_millis()
        );
        Ok(FetchedFeed {
            identifier: source.identifier.clone(),
            title: parsed.title,
            articles: parsed.articles,
        })
    }
}

fn classify(identifier: &str) -> std::result::Result<Location, FetchCause> {
    let identifier = identifier.trim();
    match Url::parse(identifier) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(Location::Http(url)),
            "file" => url
                .to_file_path()
                .map(Location::File)
                .map_err(|_| FetchCause::Unsupported(identifier.to_string())),
            // A drive letter such as `C:\feeds\news.xml` parses as a one-letter scheme.
            scheme if scheme.len() == 1 => Ok(Location::File(PathBuf::from(identifier))),
            _ => Err(FetchCause::Unsupported(identifier.to_string())),
        },
        Err(_) => Ok(Location::File(PathBuf::from(identifier))),
    }
}
