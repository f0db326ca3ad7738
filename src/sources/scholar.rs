use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::{accumulate_page, PaperSource, SearchFilters, SourceError};
use crate::paper::Paper;

const SCHOLAR_URL: &str = "https://scholar.google.com/scholar";
const RESULTS_PER_PAGE: u32 = 10;

// Scholar publishes no API and blocks obvious bots; the outbound identity is
// picked at random per session and every page request is preceded by a
// randomized delay.
const BROWSERS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36",
];

pub struct GoogleScholarClient {
    client: reqwest::Client,
}

impl GoogleScholarClient {
    pub fn new() -> Self {
        let ua = BROWSERS[fastrand::usize(..BROWSERS.len())];
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            "text/html,application/xhtml+xml".parse().unwrap(),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            "en-US,en;q=0.9".parse().unwrap(),
        );
        Self {
            client: reqwest::Client::builder()
                .user_agent(ua)
                .default_headers(headers)
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap(),
        }
    }
}

impl Default for GoogleScholarClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Compiled selectors and patterns for one results page.
struct ItemSelectors {
    result: Selector,
    title: Selector,
    link: Selector,
    info: Selector,
    snippet: Selector,
    footer_links: Selector,
    cluster: Regex,
    cited_by: Regex,
}

impl ItemSelectors {
    fn new() -> Result<Self, SourceError> {
        let sel = |s: &str| {
            Selector::parse(s).map_err(|e| SourceError::Parse(format!("bad selector: {:?}", e)))
        };
        Ok(Self {
            result: sel("div.gs_ri")?,
            title: sel("h3.gs_rt")?,
            link: sel("a[href]")?,
            info: sel("div.gs_a")?,
            snippet: sel("div.gs_rs")?,
            footer_links: sel("div.gs_fl a")?,
            cluster: Regex::new(r"(?:cluster|cites)=(\d+)")
                .map_err(|e| SourceError::Parse(e.to_string()))?,
            cited_by: Regex::new(r"Cited by (\d+)")
                .map_err(|e| SourceError::Parse(e.to_string()))?,
        })
    }
}

/// Parse a whole Scholar results page. Malformed items are dropped; the
/// remaining items are unaffected.
fn parse_results_page(html: &str) -> Result<Vec<Paper>, SourceError> {
    let sel = ItemSelectors::new()?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&sel.result)
        .filter_map(|item| parse_item(item, &sel))
        .collect())
}

/// Extract one result item. The title heading and the author/venue line are
/// the two load-bearing anchors; everything else is best-effort.
fn parse_item(item: ElementRef, sel: &ItemSelectors) -> Option<Paper> {
    let title_el = item.select(&sel.title).next()?;
    let info_el = item.select(&sel.info).next()?;

    let title = title_el
        .text()
        .collect::<String>()
        .replace("[PDF]", "")
        .replace("[HTML]", "")
        .trim()
        .to_string();
    let url = title_el
        .select(&sel.link)
        .next()
        .and_then(|a| a.value().attr("href"))
        .unwrap_or("")
        .to_string();

    // The cluster id is Scholar's only stable cross-session identifier; the
    // URL-hash fallback is merely a session-local disambiguator.
    let id = extract_cluster_id(item, sel).unwrap_or_else(|| synthesized_id(&url));

    let info_text = info_el.text().collect::<String>();
    let authors: Vec<String> = info_text
        .split('-')
        .next()
        .unwrap_or("")
        .split(',')
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();
    let year = extract_year(&info_text);

    let abstract_text = item
        .select(&sel.snippet)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    Some(Paper {
        id,
        title,
        authors,
        abstract_text,
        doi: String::new(),
        published_date: year.and_then(|y| chrono::NaiveDate::from_ymd_opt(y, 1, 1)),
        updated_date: None,
        pdf_url: String::new(),
        landing_url: url,
        source: "google_scholar".to_string(),
        categories: Vec::new(),
        keywords: Vec::new(),
        citation_count: extract_citations(item, sel),
        reference_ids: Vec::new(),
        extra: serde_json::Map::new(),
    })
}

/// First purely-numeric token within a plausible publication-year range.
fn extract_year(text: &str) -> Option<i32> {
    let current = Utc::now().year();
    text.split_whitespace()
        .filter(|w| !w.is_empty() && w.chars().all(|c| c.is_ascii_digit()))
        .filter_map(|w| w.parse::<i32>().ok())
        .find(|y| (1900..=current).contains(y))
}

/// Look for `cluster=<digits>` or `cites=<digits>` in the footer links, then
/// fall back to a `data-cid` attribute on the item itself.
fn extract_cluster_id(item: ElementRef, sel: &ItemSelectors) -> Option<String> {
    for a in item.select(&sel.footer_links) {
        if let Some(href) = a.value().attr("href") {
            if let Some(caps) = sel.cluster.captures(href) {
                return Some(caps[1].to_string());
            }
        }
    }
    item.value().attr("data-cid").map(str::to_string)
}

fn extract_citations(item: ElementRef, sel: &ItemSelectors) -> u32 {
    for a in item.select(&sel.footer_links) {
        let text = a.text().collect::<String>();
        if let Some(caps) = sel.cited_by.captures(&text) {
            if let Ok(n) = caps[1].parse() {
                return n;
            }
        }
    }
    0
}

fn synthesized_id(url: &str) -> String {
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    format!("gs_{}", hasher.finish())
}

#[async_trait]
impl PaperSource for GoogleScholarClient {
    fn name(&self) -> &str {
        "google_scholar"
    }

    async fn search(
        &self,
        query: &str,
        max_results: u32,
        filters: &SearchFilters,
    ) -> Result<Vec<Paper>, SourceError> {
        let mut papers: Vec<Paper> = Vec::new();
        let mut start: u32 = 0;

        while (papers.len() as u32) < max_results {
            // Randomized politeness delay before every page request.
            tokio::time::sleep(Duration::from_millis(fastrand::u64(1_000..3_000))).await;

            let start_str = start.to_string();
            let mut params: Vec<(&str, String)> = vec![
                ("q", query.to_string()),
                ("start", start_str),
                ("hl", "en".to_string()),
                // Include articles and citations.
                ("as_sdt", "0,5".to_string()),
            ];
            // Scholar only filters at year granularity.
            if let Some(d) = filters.date_from {
                params.push(("as_ylo", d.year().to_string()));
            }
            if let Some(d) = filters.date_to {
                params.push(("as_yhi", d.year().to_string()));
            }

            let resp = self.client.get(SCHOLAR_URL).query(&params).send().await;
            let resp = match resp {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    tracing::warn!("Scholar search failed with status {}", r.status());
                    break;
                }
                Err(e) => {
                    tracing::warn!("Scholar request failed: {}", e);
                    break;
                }
            };
            let html = match resp.text().await {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!("Scholar response unreadable: {}", e);
                    break;
                }
            };

            let page = match parse_results_page(&html) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!("Scholar page parse failed: {}", e);
                    break;
                }
            };
            if !accumulate_page(&mut papers, page, max_results) {
                break;
            }
            start += RESULTS_PER_PAGE;
        }

        Ok(papers)
    }

    async fn download_pdf(&self, _id: &str, _dir: &Path) -> Result<PathBuf, SourceError> {
        Err(SourceError::NotSupported(
            "Google Scholar does not provide direct PDF downloads; \
             use the paper URL to access the publisher's website"
                .to_string(),
        ))
    }

    async fn read_text(&self, _id: &str, _dir: &Path) -> Result<String, SourceError> {
        Err(SourceError::NotSupported(
            "Google Scholar does not support reading paper text; \
             use the paper URL to access the full text on the publisher's website"
                .to_string(),
        ))
    }
}
