//! Link resolution: find the latest concall presentation on the listing page.
//!
//! The listing page groups earnings-call material under a `Concalls`
//! heading, one list item per period:
//!
//! ```text
//! <h3>Concalls</h3>
//! <ul>
//!   <li class="flex"> <div>Nov 2024</div> <a href="…">Transcript</a> <a href="…">PPT</a> </li>
//!   <li class="flex"> <div>Aug 2024</div> <a href="…">PPT</a> </li>
//! </ul>
//! ```
//!
//! The page is scraped with a handful of regexes rather than a DOM parser:
//! only the heading, list items and anchors matter, and a missing heading
//! is reported as layout drift instead of a crash.
//!
//! ## Ordering assumption
//!
//! The site lists periods newest first. [`select_most_recent`] takes the
//! first presentation in page order and never parses the label. It is the
//! only function that encodes this assumption; swapping it for a date-based
//! sort touches nothing else.

use crate::error::{ConcallError, FetchFailure};
use crate::pipeline::retry::{retry_with_backoff, RetryPolicy};
use crate::types::{CompanyIdentifier, PresentationLink};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One presentation entry on the listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    /// Absolute presentation URL.
    pub url: String,
    /// Period label shown next to the links.
    pub label: Option<String>,
}

/// Fetches listing pages and extracts the latest presentation link.
#[derive(Debug, Clone)]
pub struct LinkResolver {
    client: Client,
    base_url: String,
    timeout_secs: u64,
    retry: RetryPolicy,
}

impl LinkResolver {
    pub fn new(client: Client, base_url: impl Into<String>, timeout_secs: u64, retry: RetryPolicy) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout_secs,
            retry,
        }
    }

    /// Consolidated listing page for a company.
    pub fn consolidated_url(&self, id: &CompanyIdentifier) -> String {
        format!("{}/company/{}/consolidated/", self.base_url, id)
    }

    /// Standalone listing page for a company.
    pub fn standalone_url(&self, id: &CompanyIdentifier) -> String {
        format!("{}/company/{}/", self.base_url, id)
    }

    /// Resolve the most recent presentation link for `id`.
    ///
    /// Tries the consolidated page first and falls back to the standalone
    /// page only when the consolidated one does not exist (404).
    ///
    /// # Errors
    /// - [`ConcallError::NotFound`] — the page lists no presentation.
    /// - [`ConcallError::UpstreamUnavailable`] — fetch failed after retries,
    ///   or the page no longer has a `Concalls` section.
    pub async fn resolve(&self, id: &CompanyIdentifier) -> Result<PresentationLink, ConcallError> {
        let consolidated = self.consolidated_url(id);
        match self.resolve_at(id, &consolidated).await {
            Err(ConcallError::UpstreamUnavailable {
                failure: FetchFailure::Status(404),
                ..
            }) => {
                let standalone = self.standalone_url(id);
                debug!("{}: no consolidated page, trying {}", id, standalone);
                self.resolve_at(id, &standalone).await
            }
            other => other,
        }
    }

    async fn resolve_at(
        &self,
        id: &CompanyIdentifier,
        page_url: &str,
    ) -> Result<PresentationLink, ConcallError> {
        let html = retry_with_backoff(&self.retry, "listing page", || self.fetch_page(page_url)).await?;

        let entries = parse_listing(&html, page_url).map_err(|failure| {
            ConcallError::UpstreamUnavailable {
                url: page_url.to_string(),
                failure,
            }
        })?;
        debug!("{}: {} presentation entries on {}", id, entries.len(), page_url);

        let entry = select_most_recent(entries).ok_or_else(|| ConcallError::NotFound {
            symbol: id.to_string(),
            url: page_url.to_string(),
        })?;

        info!(
            "{}: latest presentation {} ({})",
            id,
            entry.url,
            entry.label.as_deref().unwrap_or("unlabeled")
        );
        Ok(PresentationLink::new(entry.url, entry.label))
    }

    async fn fetch_page(&self, page_url: &str) -> Result<String, ConcallError> {
        let unavailable = |failure: FetchFailure| ConcallError::UpstreamUnavailable {
            url: page_url.to_string(),
            failure,
        };

        debug!("GET {}", page_url);
        let response = self
            .client
            .get(page_url)
            .timeout(Duration::from_secs(self.timeout_secs))
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.5")
            .send()
            .await
            .map_err(|e| unavailable(FetchFailure::from_reqwest(&e, self.timeout_secs)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(FetchFailure::Status(status.as_u16())));
        }

        response
            .text()
            .await
            .map_err(|e| unavailable(FetchFailure::from_reqwest(&e, self.timeout_secs)))
    }
}

/// Pick the most recent entry: the first one in page order.
pub fn select_most_recent(entries: Vec<ListingEntry>) -> Option<ListingEntry> {
    entries.into_iter().next()
}

// ── Parsing ──────────────────────────────────────────────────────────────────

static RE_CONCALLS_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<h[1-6]\b[^>]*>\s*(?:<[^>]+>\s*)*Concalls\s*(?:</[^>]+>\s*)*</h[1-6]\s*>")
        .unwrap()
});

static RE_SECTION_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h[1-6]\b|</section\s*>").unwrap());

static RE_LIST_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<li\b[^>]*>(.*?)</li\s*>").unwrap());

static RE_ANCHOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<a\b([^>]*)>(.*?)</a\s*>").unwrap());

static RE_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());

static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Extract presentation entries from a listing page, in page order.
///
/// Returns [`FetchFailure::LayoutChanged`] when the `Concalls` heading is
/// missing. An empty vector means the section exists but holds no `PPT`
/// link.
pub fn parse_listing(html: &str, page_url: &str) -> Result<Vec<ListingEntry>, FetchFailure> {
    let heading = RE_CONCALLS_HEADING
        .find(html)
        .ok_or_else(|| FetchFailure::LayoutChanged("no 'Concalls' heading".into()))?;

    let rest = &html[heading.end()..];
    let section = match RE_SECTION_END.find(rest) {
        Some(end) => &rest[..end.start()],
        None => rest,
    };

    let base = reqwest::Url::parse(page_url).ok();
    let mut entries = Vec::new();

    for item in RE_LIST_ITEM.captures_iter(section) {
        let body = &item[1];
        let Some(href) = presentation_href(body) else {
            continue;
        };
        let url = match absolutize(base.as_ref(), &href) {
            Some(url) => url,
            None => {
                warn!("Skipping unparseable presentation href {:?}", href);
                continue;
            }
        };
        entries.push(ListingEntry {
            url,
            label: entry_label(body),
        });
    }

    Ok(entries)
}

/// The `href` of the anchor whose visible text is "PPT".
fn presentation_href(item_html: &str) -> Option<String> {
    RE_ANCHOR.captures_iter(item_html).find_map(|anchor| {
        let text = visible_text(&anchor[2]);
        if !text.eq_ignore_ascii_case("ppt") {
            return None;
        }
        let attrs = RE_HREF.captures(&anchor[1])?;
        let raw = attrs.get(1).or_else(|| attrs.get(2))?.as_str();
        let href = decode_entities(raw.trim());
        (!href.is_empty() && href != "#").then_some(href)
    })
}

/// Text preceding the first link in the item, e.g. "Nov 2024".
fn entry_label(item_html: &str) -> Option<String> {
    let before_links = match RE_ANCHOR.find(item_html) {
        Some(m) => &item_html[..m.start()],
        None => item_html,
    };
    let label = visible_text(before_links);
    (!label.is_empty()).then_some(label)
}

fn visible_text(fragment: &str) -> String {
    let stripped = RE_TAG.replace_all(fragment, " ");
    let decoded = decode_entities(&stripped);
    RE_SPACES.replace_all(decoded.trim(), " ").to_string()
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn absolutize(base: Option<&reqwest::Url>, href: &str) -> Option<String> {
    if let Ok(url) = reqwest::Url::parse(href) {
        return matches!(url.scheme(), "http" | "https").then(|| url.to_string());
    }
    base?.join(href).ok().map(|u| u.to_string())
}
