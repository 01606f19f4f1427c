//! Web pages as an ingestion source.
//!
//! Every URL in `ingest.urls` is fetched once per ingest run, one at a
//! time with `crawl_delay_ms` between requests. HTML is rendered to
//! Markdown so the chunker sees headings and fenced code blocks:
//!
//! | HTML | Markdown |
//! |------|----------|
//! | `<h1>`..`<h6>` | `#`..`######` headings |
//! | `<pre>` (`class="language-x"` on it or its `<code>`) | fenced block tagged `x` |
//! | inline `<code>` | backticks |
//! | `<li>` | `- ` items |
//! | `script`, `style`, `nav`, `header`, `footer`, ... | dropped |
//!
//! Non-HTML responses (plain text, raw Markdown) are indexed as-is. The
//! page URL is both `source_id` and `source_url`; the category comes from
//! `[[ingest.categories]]` or, failing that, the URL path.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use docrag_core::models::Document;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use scraper::{ElementRef, Html, Node, Selector};

use crate::config::{CategoryRule, IngestConfig};
use crate::http;

const SKIP_TAGS: &[&str] = &[
    "head", "script", "style", "noscript", "template", "svg", "nav", "header", "footer", "aside",
    "form", "button",
];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "ul", "ol", "table", "tr", "blockquote", "dl", "dt",
    "dd", "figure", "details", "summary",
];

/// Path segments too generic to name a category.
const GENERIC_SEGMENTS: &[&str] = &["docs", "doc", "documentation", "en", "latest", "stable"];

/// Pages of one fetch pass.
#[derive(Debug, Default)]
pub struct WebFetch {
    pub docs: Vec<Document>,
    /// URLs that could not be fetched this run.
    pub failed: Vec<String>,
}

/// Text content of an HTML page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub title: Option<String>,
    pub body: String,
}

/// Fetch every configured URL. A failing page is logged and listed in
/// [`WebFetch::failed`]; it does not stop the pass.
pub async fn fetch_pages(config: &IngestConfig) -> Result<WebFetch> {
    let client = http::client(Some(Duration::from_secs(config.fetch_timeout_secs)))?;
    let mut fetched = WebFetch::default();

    for (i, url) in config.urls.iter().enumerate() {
        if i > 0 && config.crawl_delay_ms > 0 {
            tokio::time::sleep(config.crawl_delay()).await;
        }
        match fetch_page(&client, url, &config.categories).await {
            Ok(doc) => {
                tracing::debug!(url = %url, chars = doc.body.len(), "fetched page");
                fetched.docs.push(doc);
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %format!("{:#}", e), "page fetch failed");
                fetched.failed.push(url.clone());
            }
        }
    }
    Ok(fetched)
}

async fn fetch_page(client: &reqwest::Client, url: &str, rules: &[CategoryRule]) -> Result<Document> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("GET {}", url))?
        .error_for_status()?;
    let is_html = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(true, |v| v.contains("html"));
    let text = response.text().await?;

    if is_html {
        page_document(url, &text, rules)
    } else {
        let parsed = Url::parse(url)?;
        Ok(Document {
            source_id: url.to_string(),
            title: Some(url_title(&parsed)),
            source_url: Some(url.to_string()),
            category: Some(categorize(&parsed, rules)),
            body: text,
            fetched_at: Utc::now(),
        })
    }
}

/// Build the [`Document`] for an HTML page fetched from `url`.
pub fn page_document(url: &str, html: &str, rules: &[CategoryRule]) -> Result<Document> {
    let parsed = Url::parse(url).with_context(|| format!("invalid URL '{}'", url))?;
    let page = extract_page(html)?;
    Ok(Document {
        source_id: url.to_string(),
        title: Some(page.title.unwrap_or_else(|| url_title(&parsed))),
        source_url: Some(url.to_string()),
        category: Some(categorize(&parsed, rules)),
        body: page.body,
        fetched_at: Utc::now(),
    })
}

/// Category of a page: the first rule whose pattern occurs in the URL
/// path, else the first non-generic path segment, else `"general"`.
pub fn categorize(url: &Url, rules: &[CategoryRule]) -> String {
    let path = url.path();
    if let Some(rule) = rules.iter().find(|r| path.contains(r.pattern.as_str())) {
        return rule.name.clone();
    }
    url.path_segments()
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty() && !GENERIC_SEGMENTS.contains(s))
        .map(|s| s.trim_end_matches(".html").to_string())
        .unwrap_or_else(|| "general".to_string())
}

fn url_title(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .unwrap_or_else(|| url.host_str().unwrap_or("page").to_string())
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("bad selector '{}': {:?}", css, e))
}

/// Render the main content of `html` as Markdown.
///
/// The first `<main>`, `<article>` or `[role=main]` element is the content
/// root when present, otherwise `<body>`.
pub fn extract_page(html: &str) -> Result<Page> {
    let doc = Html::parse_document(html);

    let title = doc
        .select(&selector("title")?)
        .next()
        .or_else(|| doc.select(&selector("h1").ok()?).next())
        .map(|el| collapse(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let root = match doc.select(&selector("main, article, [role=main]")?).next() {
        Some(el) => el,
        None => doc
            .select(&selector("body")?)
            .next()
            .unwrap_or_else(|| doc.root_element()),
    };

    let mut body = String::new();
    render(root, &mut body);
    let body = body.trim_end().to_string();
    Ok(Page { title, body })
}

fn render(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(el) = ElementRef::wrap(child) {
            render_element(el, out);
        } else if let Node::Text(text) = child.value() {
            push_inline(out, text);
        }
    }
}

fn render_element(el: ElementRef<'_>, out: &mut String) {
    let name = el.value().name();
    if SKIP_TAGS.contains(&name) {
        return;
    }
    match name {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = name[1..].parse::<usize>().unwrap_or(1);
            let text = collapse(&el.text().collect::<String>());
            if text.is_empty() {
                return;
            }
            end_block(out);
            out.push_str(&"#".repeat(level));
            out.push(' ');
            out.push_str(&text);
            end_block(out);
        }
        "pre" => {
            end_block(out);
            push_code_block(el, out);
            end_block(out);
        }
        "code" => {
            let text = el.text().collect::<String>();
            out.push('`');
            out.push_str(text.trim());
            out.push('`');
        }
        "li" => {
            if !out.is_empty() && !out.ends_with('\n') {
                out.truncate(out.trim_end_matches([' ', '\t']).len());
                out.push('\n');
            }
            out.push_str("- ");
            render(el, out);
            out.truncate(out.trim_end_matches([' ', '\t']).len());
            out.push('\n');
        }
        "br" => out.push('\n'),
        _ if BLOCK_TAGS.contains(&name) => {
            end_block(out);
            render(el, out);
            end_block(out);
        }
        _ => render(el, out),
    }
}

fn push_code_block(pre: ElementRef<'_>, out: &mut String) {
    let lang = code_language(pre).unwrap_or_default();
    let raw = pre.text().collect::<String>();
    let code = raw
        .strip_prefix('\n')
        .unwrap_or(&raw)
        .trim_end_matches(['\n', '\r', ' ', '\t']);
    let fence = if code.contains("```") { "~~~~" } else { "```" };
    out.push_str(fence);
    out.push_str(&lang);
    out.push('\n');
    out.push_str(code);
    out.push('\n');
    out.push_str(fence);
}

/// `language-x` / `lang-x` class on the `<pre>` or its first `<code>`.
fn code_language(pre: ElementRef<'_>) -> Option<String> {
    let from_classes = |el: ElementRef<'_>| {
        el.value().classes().find_map(|c| {
            c.strip_prefix("language-")
                .or_else(|| c.strip_prefix("lang-"))
                .map(str::to_string)
        })
    };
    from_classes(pre).or_else(|| {
        let code = selector("code").ok()?;
        pre.select(&code).next().and_then(&from_classes)
    })
}

fn push_inline(out: &mut String, text: &str) {
    let needs_space = !out.is_empty() && !out.ends_with([' ', '\n']);
    if text.starts_with(char::is_whitespace) && needs_space {
        out.push(' ');
    }
    let mut words = text.split_whitespace().peekable();
    if words.peek().is_none() {
        return;
    }
    for (i, word) in words.enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(word);
    }
    if text.ends_with(char::is_whitespace) {
        out.push(' ');
    }
}

fn end_block(out: &mut String) {
    out.truncate(out.trim_end_matches([' ', '\t']).len());
    if out.is_empty() {
        return;
    }
    while !out.ends_with("\n\n") {
        out.push('\n');
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
