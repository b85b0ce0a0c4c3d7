//! Full article text for `full` mode: download each linked page and keep the
//! readable part of it. Every failure falls back to the body from the feed.

use crate::config::FetchConfig;
use crate::fetcher::{build_client, check_size};
use crate::types::{Article, FetchCause, Result};
use reqwest::Client;
use std::io::Cursor;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

pub struct FullTextExtractor {
    client: Client,
    timeout: Duration,
    max_page_size_mb: usize,
}

impl FullTextExtractor {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config, config.article_timeout())?,
            timeout: config.article_timeout(),
            max_page_size_mb: config.max_feed_size_mb,
        })
    }

    /// Readable HTML of the page at `link`.
    pub async fn extract(&self, link: &str) -> std::result::Result<String, FetchCause> {
        let url = Url::parse(link).map_err(|e| FetchCause::Unsupported(format!("{}: {}", link, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchCause::Unsupported(format!("scheme '{}'", url.scheme())));
        }

        let page = timeout(self.timeout, self.download(&url))
            .await
            .map_err(|_| FetchCause::Timeout(self.timeout))??;

        let product = readability::extractor::extract(&mut Cursor::new(page), &url)
            .map_err(|e| FetchCause::Parse(e.to_string()))?;
        if product.text.trim().is_empty() {
            return Err(FetchCause::Parse("no article text found".to_string()));
        }
        Ok(product.content)
    }

    async fn download(&self, url: &Url) -> std::result::Result<Vec<u8>, FetchCause> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchCause::Status { status: status.as_u16() });
        }
        if let Some(content_length) = response.content_length() {
            check_size(
                usize::try_from(content_length).unwrap_or(usize::MAX),
                self.max_page_size_mb,
            )?;
        }

        let bytes = response.bytes().await?;
        check_size(bytes.len(), self.max_page_size_mb)?;
        Ok(bytes.to_vec())
    }

    /// Replace each body with the extracted page text, one article at a time.
    /// Articles without a link, or whose page fails, keep the feed body.
    pub async fn enrich(&self, articles: Vec<Article>) -> Vec<Article> {
        let total = articles.len();
        let mut extracted = 0;
        let mut enriched = Vec::with_capacity(total);

        for article in articles {
            let Some(link) = article.link.as_deref() else {
                debug!("'{}' has no link, keeping the feed body", article.title);
                enriched.push(article);
                continue;
            };

            match self.extract(link).await {
                Ok(body) => {
                    debug!("Extracted {} bytes of article text from {}", body.len(), link);
                    extracted += 1;
                    enriched.push(Article {
                        summary_or_body: body,
                        ..article
                    });
                }
                Err(cause) => {
                    warn!("No full text for {}, keeping the feed body: {}", link, cause);
                    enriched.push(article);
                }
            }
        }

        info!("Extracted full text for {} of {} articles", extracted, total);
        enriched
    }
}
