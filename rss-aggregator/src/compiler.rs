//! Turns a run's new articles into one EPUB newspaper.
//!
//! Compilation happens in two steps. [`DocumentCompiler::compile`] lays out
//! the document: title, table of contents and one sanitized XHTML section
//! per article. [`DocumentCompiler::render_epub`] packages that layout.

use crate::config::AppConfig;
use crate::types::{AggregatorError, Article, Result};
use ammonia::UrlRelative;
use chrono::{DateTime, SecondsFormat, Utc};
use epub_builder::{EpubBuilder, EpubContent, ReferenceType, TocElement, ZipLibrary};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DATE_UNKNOWN: &str = "date unknown";
pub const OMITTED_PLACEHOLDER: &str = "This article could not be rendered and was omitted.";

const STYLESHEET: &str = r#"body { font-family: serif; line-height: 1.4; margin: 0 0.5em; }
h1 { font-size: 1.6em; text-align: center; }
h2.feed { font-size: 1.4em; border-bottom: 1px solid #999; }
.article { page-break-before: always; }
.article h3 { font-size: 1.2em; margin-bottom: 0.2em; }
.meta { font-size: 0.85em; color: #555; margin-top: 0; }
.omitted { font-style: italic; color: #555; }
ul.toc { list-style-type: none; padding-left: 0.5em; }
"#;

const ALLOWED_TAGS: &[&str] = &[
    "a", "abbr", "b", "blockquote", "br", "caption", "cite", "code", "dd", "del", "div", "dl",
    "dt", "em", "figcaption", "figure", "h1", "h2", "h3", "h4", "h5", "h6", "hr", "i", "ins",
    "kbd", "li", "ol", "p", "pre", "q", "s", "small", "span", "strong", "sub", "sup", "table",
    "tbody", "td", "tfoot", "th", "thead", "tr", "u", "ul",
];

/// Result of compiling one run. An empty run never produces a document.
#[derive(Debug)]
pub enum CompileOutcome {
    NothingToDeliver,
    Document(CompiledDocument),
}

#[derive(Debug, Clone)]
pub struct CompiledDocument {
    pub title: String,
    pub run_label: String,
    pub run_timestamp: DateTime<Utc>,
    pub identifier: Uuid,
    pub language: String,
    pub author: String,
    pub toc: Vec<TocGroup>,
    pub sections: Vec<ArticleSection>,
}

/// Table of contents entries for one feed, in article order.
#[derive(Debug, Clone)]
pub struct TocGroup {
    pub feed_label: String,
    pub entries: Vec<TocEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub title: String,
    pub anchor: String,
}

#[derive(Debug, Clone)]
pub struct ArticleSection {
    pub anchor: String,
    pub title: String,
    pub feed_label: String,
    pub link: Option<String>,
    pub author: Option<String>,
    pub published: String,
    /// Well-formed XHTML fragment, or the omission placeholder.
    pub body: String,
    pub omitted: bool,
}

impl CompiledDocument {
    pub fn date(&self) -> String {
        self.run_timestamp.format("%Y-%m-%d").to_string()
    }

    pub fn file_name(&self) -> String {
        format!("newspaper_{}.epub", self.date())
    }

    pub fn article_count(&self) -> usize {
        self.sections.len()
    }

    pub fn omitted_count(&self) -> usize {
        self.sections.iter().filter(|s| s.omitted).count()
    }
}

pub struct DocumentCompiler {
    run_label: String,
    language: String,
    author: String,
    sanitizer: ammonia::Builder<'static>,
}

impl DocumentCompiler {
    pub fn new(run_label: impl Into<String>, language: impl Into<String>, author: impl Into<String>) -> Self {
        let mut sanitizer = ammonia::Builder::empty();
        sanitizer
            .add_tags(ALLOWED_TAGS)
            .add_tag_attributes("a", &["href", "title"])
            .add_tag_attributes("abbr", &["title"])
            .add_tag_attributes("td", &["colspan", "rowspan"])
            .add_tag_attributes("th", &["colspan", "rowspan"])
            .clean_content_tags(HashSet::from(["script", "style"]))
            .url_schemes(HashSet::from(["http", "https", "mailto"]))
            .url_relative(UrlRelative::Deny)
            .link_rel(Some("noopener noreferrer"));

        Self {
            run_label: run_label.into(),
            language: language.into(),
            author: author.into(),
            sanitizer,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.run_label, &config.language, &config.author)
    }

    pub fn compile(&self, articles: &[Article], run_timestamp: DateTime<Utc>) -> CompileOutcome {
        if articles.is_empty() {
            debug!("No articles to compile");
            return CompileOutcome::NothingToDeliver;
        }

        let mut toc: Vec<TocGroup> = Vec::new();
        let mut sections = Vec::with_capacity(articles.len());
        let mut previous_feed: Option<&str> = None;

        for (index, article) in articles.iter().enumerate() {
            let anchor = format!("article-{}", index);
            let title = xml_text(&article.title);
            let feed_label = xml_text(&article.feed_label);

            if previous_feed != Some(article.feed_identifier.as_str()) {
                toc.push(TocGroup {
                    feed_label: feed_label.clone(),
                    entries: Vec::new(),
                });
                previous_feed = Some(article.feed_identifier.as_str());
            }
            if let Some(group) = toc.last_mut() {
                group.entries.push(TocEntry {
                    title: title.clone(),
                    anchor: anchor.clone(),
                });
            }

            let (body, omitted) = match self.render_body(&article.summary_or_body) {
                Ok(body) => (body, false),
                Err(reason) => {
                    warn!(
                        "Omitting body of '{}' from {}: {}",
                        article.title, article.feed_identifier, reason
                    );
                    (OMITTED_PLACEHOLDER.to_string(), true)
                }
            };

            sections.push(ArticleSection {
                anchor,
                title,
                feed_label,
                link: article.link.as_deref().map(xml_text),
                author: article.author.as_deref().map(xml_text),
                published: article
                    .published_at
                    .map(|ts| ts.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_else(|| DATE_UNKNOWN.to_string()),
                body,
                omitted,
            });
        }

        let date = run_timestamp.format("%Y-%m-%d");
        let run_label = xml_text(&self.run_label);
        let document = CompiledDocument {
            title: format!("{} — {}", run_label, date),
            run_label,
            run_timestamp,
            identifier: Uuid::new_v5(
                &Uuid::NAMESPACE_URL,
                run_timestamp.to_rfc3339_opts(SecondsFormat::Secs, true).as_bytes(),
            ),
            language: self.language.clone(),
            author: xml_text(&self.author),
            toc,
            sections,
        };

        info!(
            "Compiled '{}': {} articles in {} feed groups ({} omitted)",
            document.title,
            document.article_count(),
            document.toc.len(),
            document.omitted_count()
        );
        CompileOutcome::Document(document)
    }

    /// Sanitize an entry body into a well-formed XHTML fragment.
    pub fn render_body(&self, raw: &str) -> std::result::Result<String, String> {
        let cleaned = self.sanitizer.clean(raw).to_string();
        let xhtml = to_xhtml(&cleaned);
        check_well_formed(&xhtml)?;
        Ok(xhtml)
    }

    pub fn render_epub(&self, document: &CompiledDocument) -> Result<Vec<u8>> {
        let zip = ZipLibrary::new().map_err(compilation)?;
        let mut builder = EpubBuilder::new(zip).map_err(compilation)?;
        builder
            .metadata("title", document.title.as_str())
            .map_err(compilation)?;
        builder
            .metadata("author", document.author.as_str())
            .map_err(compilation)?;
        builder
            .metadata("lang", document.language.as_str())
            .map_err(compilation)?;
        builder
            .metadata("generator", "epistle")
            .map_err(compilation)?;
        builder.set_uuid(document.identifier);
        builder
            .stylesheet(STYLESHEET.as_bytes())
            .map_err(compilation)?;

        let cover = cover_page(document);
        builder
            .add_content(
                EpubContent::new("cover.xhtml", cover.as_bytes())
                    .title(document.title.as_str())
                    .reftype(ReferenceType::TitlePage),
            )
            .map_err(compilation)?;

        let contents = contents_page(document);
        builder
            .add_content(
                EpubContent::new("contents.xhtml", contents.as_bytes())
                    .title("Contents")
                    .reftype(ReferenceType::Toc),
            )
            .map_err(compilation)?;

        let mut sections = document.sections.iter();
        for (index, group) in document.toc.iter().enumerate() {
            let href = chapter_href(index);
            let chapter_sections: Vec<&ArticleSection> = sections.by_ref().take(group.entries.len()).collect();
            let chapter = chapter_page(document, group, &chapter_sections);

            let mut content = EpubContent::new(href.as_str(), chapter.as_bytes())
                .title(group.feed_label.as_str())
                .reftype(ReferenceType::Text);
            for entry in &group.entries {
                content = content.child(TocElement::new(
                    format!("{}#{}", href, entry.anchor),
                    entry.title.as_str(),
                ));
            }
            builder.add_content(content).map_err(compilation)?;
        }

        let mut out = Vec::new();
        builder.generate(&mut out).map_err(compilation)?;
        info!("Rendered {} ({} bytes)", document.file_name(), out.len());
        Ok(out)
    }
}

fn compilation(e: impl std::fmt::Display) -> AggregatorError {
    AggregatorError::Compilation(e.to_string())
}

fn chapter_href(index: usize) -> String {
    format!("feed-{}.xhtml", index)
}

/// ammonia serializes HTML; EPUB readers want XML.
fn to_xhtml(html: &str) -> String {
    html.replace("<br>", "<br />")
        .replace("<hr>", "<hr />")
        .replace("&nbsp;", "&#160;")
}

/// Characters allowed by the XML 1.0 `Char` production.
fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\u{9}' | '\u{A}' | '\u{D}'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

/// Drop characters XML cannot carry, such as terminal escapes in titles.
fn xml_text(text: &str) -> String {
    text.chars().filter(|c| is_xml_char(*c)).collect()
}

fn reject_illegal_chars(text: &str) -> std::result::Result<(), String> {
    match text.chars().find(|c| !is_xml_char(*c)) {
        Some(c) => Err(format!("character U+{:04X} is not allowed in XML", u32::from(c))),
        None => Ok(()),
    }
}

fn check_well_formed(fragment: &str) -> std::result::Result<(), String> {
    reject_illegal_chars(fragment)?;
    let wrapped = format!("<div>{}</div>", fragment);
    let mut reader = Reader::from_str(&wrapped);
    let mut depth: usize = 0;
    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Text(text)) => {
                let text = text.unescape().map_err(|e| e.to_string())?;
                reject_illegal_chars(&text)?;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }
    }
    if depth != 0 {
        return Err(format!("{} unclosed elements", depth));
    }
    Ok(())
}

fn page(document: &CompiledDocument, title: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="{lang}" lang="{lang}">
<head>
<title>{title}</title>
<link rel="stylesheet" type="text/css" href="stylesheet.css" />
</head>
<body>
{body}
</body>
</html>
"#,
        lang = escape(document.language.as_str()),
        title = escape(title),
        body = body
    )
}

fn cover_page(document: &CompiledDocument) -> String {
    let body = format!(
        "<h1>{}</h1>\n<p class=\"meta\">{}</p>\n<p>{} articles from {} feeds</p>",
        escape(document.run_label.as_str()),
        document.run_timestamp.format("%A, %d %B %Y, %H:%M UTC"),
        document.article_count(),
        document.toc.len()
    );
    page(document, &document.title, &body)
}

fn contents_page(document: &CompiledDocument) -> String {
    let mut body = String::from("<h1>Contents</h1>\n");
    for (index, group) in document.toc.iter().enumerate() {
        let href = chapter_href(index);
        body.push_str(&format!("<h2 class=\"feed\">{}</h2>\n<ul class=\"toc\">\n", escape(group.feed_label.as_str())));
        for entry in &group.entries {
            body.push_str(&format!(
                "<li><a href=\"{}#{}\">{}</a></li>\n",
                href,
                entry.anchor,
                escape(entry.title.as_str())
            ));
        }
        body.push_str("</ul>\n");
    }
    page(document, "Contents", &body)
}

fn chapter_page(document: &CompiledDocument, group: &TocGroup, sections: &[&ArticleSection]) -> String {
    let mut body = format!("<h2 class=\"feed\">{}</h2>\n", escape(group.feed_label.as_str()));
    for section in sections {
        body.push_str(&format!("<div class=\"article\" id=\"{}\">\n", section.anchor));
        match &section.link {
            Some(link) => body.push_str(&format!(
                "<h3><a href=\"{}\">{}</a></h3>\n",
                escape(link.as_str()),
                escape(section.title.as_str())
            )),
            None => body.push_str(&format!("<h3>{}</h3>\n", escape(section.title.as_str()))),
        }

        let mut meta = vec![escape(section.feed_label.as_str()).into_owned()];
        if let Some(author) = &section.author {
            meta.push(escape(author.as_str()).into_owned());
        }
        meta.push(section.published.clone());
        body.push_str(&format!("<p class=\"meta\">{}</p>\n", meta.join(" · ")));

        if section.omitted {
            body.push_str(&format!("<p class=\"omitted\">{}</p>\n", section.body));
        } else {
            body.push_str(&format!("<div class=\"body\">{}</div>\n", section.body));
        }
        body.push_str("</div>\n");
    }
    page(document, &group.feed_label, &body)
}
