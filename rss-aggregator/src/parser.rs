use crate::config::{ArticleMode, GuidFallback};
use crate::types::{Article, FeedSource, FetchCause};
use feed_rs::model::{Entry, Link};
use feed_rs::parser;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

pub const UNTITLED: &str = "Untitled";

// feed-rs invents an id for entries that have none. We swap its generator for
// a fixed marker so those entries can be given our own documented fallback.
const MISSING_ID: &str = "urn:epistle:missing-id";

#[derive(Debug)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub articles: Vec<Article>,
}

/// Turns raw feed bytes into strongly typed articles.
pub struct FeedParser {
    mode: ArticleMode,
    guid_fallback: GuidFallback,
}

struct RawEntry {
    own_id: Option<String>,
    title: String,
    link: Option<String>,
    entry: Entry,
}

impl FeedParser {
    pub fn new(mode: ArticleMode, guid_fallback: GuidFallback) -> Self {
        Self { mode, guid_fallback }
    }

    pub fn parse_feed(&self, source: &FeedSource, content: &[u8]) -> Result<ParsedFeed, FetchCause> {
        debug!("Parsing feed {} ({} bytes)", source.identifier, content.len());

        let feed = parser::Builder::new()
            .id_generator(|_links, _title, _uri| MISSING_ID.to_string())
            .build()
            .parse(content)
            .map_err(|e| FetchCause::Parse(e.to_string()))?;

        let title = feed
            .title
            .map(|t| normalize_title(&t.content))
            .filter(|t| !t.is_empty());
        let feed_label = source
            .label
            .clone()
            .filter(|l| !l.trim().is_empty())
            .or_else(|| title.clone())
            .unwrap_or_else(|| source.identifier.clone());

        let raw: Vec<RawEntry> = feed.entries.into_iter().map(RawEntry::from).collect();

        let mut link_counts: HashMap<&str, usize> = HashMap::new();
        for entry in &raw {
            if let Some(link) = entry.link.as_deref() {
                *link_counts.entry(link).or_default() += 1;
            }
        }

        let limit = source.max_articles.unwrap_or(usize::MAX);
        let articles = raw
            .iter()
            .take(limit)
            .map(|entry| {
                let link_is_unique = entry
                    .link
                    .as_deref()
                    .map(|l| link_counts.get(l).copied().unwrap_or(0) == 1)
                    .unwrap_or(false);
                let guid = match &entry.own_id {
                    Some(id) => id.clone(),
                    None => fallback_guid(
                        self.guid_fallback,
                        &source.identifier,
                        &entry.title,
                        entry.link.as_deref(),
                        link_is_unique,
                    ),
                };

                Article {
                    feed_identifier: source.identifier.clone(),
                    guid,
                    title: entry.title.clone(),
                    link: entry.link.clone(),
                    published_at: entry.entry.published.or(entry.entry.updated),
                    author: entry
                        .entry
                        .authors
                        .first()
                        .map(|a| a.name.trim().to_string())
                        .filter(|a| !a.is_empty()),
                    summary_or_body: self.select_body(&entry.entry),
                    feed_label: feed_label.clone(),
                }
            })
            .collect::<Vec<_>>();

        debug!("Parsed {} articles from {}", articles.len(), source.identifier);
        Ok(ParsedFeed { title, articles })
    }

    fn select_body(&self, entry: &Entry) -> String {
        let summary = entry
            .summary
            .as_ref()
            .map(|s| s.content.clone())
            .filter(|s| !s.trim().is_empty());
        let content = entry
            .content
            .as_ref()
            .and_then(|c| c.body.clone())
            .filter(|s| !s.trim().is_empty());

        let preferred = match self.mode {
            ArticleMode::Summary => summary.or(content),
            ArticleMode::Full => content.or(summary),
        };
        preferred.unwrap_or_default()
    }
}

impl From<Entry> for RawEntry {
    fn from(entry: Entry) -> Self {
        let own_id = Some(entry.id.trim().to_string()).filter(|id| !id.is_empty() && id != MISSING_ID);
        let title = entry
            .title
            .as_ref()
            .map(|t| normalize_title(&t.content))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNTITLED.to_string());
        let link = primary_link(&entry.links);

        Self {
            own_id,
            title,
            link,
            entry,
        }
    }
}

fn primary_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.trim().to_string())
        .filter(|href| !href.is_empty())
}

fn normalize_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deterministic identity for an entry without an id of its own.
pub fn fallback_guid(
    policy: GuidFallback,
    feed_identifier: &str,
    title: &str,
    link: Option<&str>,
    link_is_unique: bool,
) -> String {
    match (policy, link) {
        (GuidFallback::LinkOrHash, Some(link)) if link_is_unique => format!("link:{}", link),
        _ => {
            let mut hasher = Sha256::new();
            hasher.update(feed_identifier.as_bytes());
            hasher.update([0x1f]);
            hasher.update(title.as_bytes());
            hasher.update([0x1f]);
            hasher.update(link.unwrap_or("").as_bytes());
            format!("sha256:{:x}", hasher.finalize())
        }
    }
}
