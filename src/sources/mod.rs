pub mod arxiv;
pub mod crossref;
pub mod openalex;
pub mod scholar;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::paper::Paper;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("API error: {0}")]
    Api(String),
    /// The provider structurally cannot offer this capability.
    #[error("Not supported: {0}")]
    NotSupported(String),
    /// The capability exists but this particular item lacks it.
    #[error("Not available: {0}")]
    NotAvailable(String),
}

/// Date-range filter for searches. Providers that only support
/// year-granularity filtering truncate to the year component.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchFilters {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

/// Capability set implemented by each provider client. Only `search` is
/// mandatory; the rest default to "no result" or a *not supported* outcome
/// so callers can treat every capability as optional.
#[async_trait]
pub trait PaperSource: Send + Sync {
    fn name(&self) -> &str;

    /// Search the provider. Returns at most `max_results` records; a failed
    /// or empty page ends pagination early and the partial result collected
    /// so far is returned rather than an error.
    async fn search(
        &self,
        query: &str,
        max_results: u32,
        filters: &SearchFilters,
    ) -> Result<Vec<Paper>, SourceError>;

    async fn get_by_id(&self, _id: &str) -> Result<Option<Paper>, SourceError> {
        Ok(None)
    }

    async fn get_by_doi(&self, _doi: &str) -> Result<Option<Paper>, SourceError> {
        Ok(None)
    }

    /// Works cited by `id`, sorted by citation count descending.
    async fn get_references(
        &self,
        _id: &str,
        _max_results: u32,
    ) -> Result<Vec<Paper>, SourceError> {
        Ok(Vec::new())
    }

    /// Works citing `id`, sorted by citation count descending.
    async fn get_citations(
        &self,
        _id: &str,
        _max_results: u32,
    ) -> Result<Vec<Paper>, SourceError> {
        Ok(Vec::new())
    }

    /// Download the work's PDF into `dir`, named `<id>.pdf`.
    async fn download_pdf(&self, _id: &str, _dir: &Path) -> Result<PathBuf, SourceError> {
        Err(SourceError::NotSupported(format!(
            "{} does not provide direct PDF downloads",
            self.name()
        )))
    }

    /// Ensure the PDF is present locally (downloading if absent), then
    /// extract its text.
    async fn read_text(&self, id: &str, dir: &Path) -> Result<String, SourceError> {
        let path = dir.join(format!("{}.pdf", sanitize_filename(id)));
        let path = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            path
        } else {
            self.download_pdf(id, dir).await?
        };
        crate::pdf::extract_text(&path)
            .await
            .map_err(|e| SourceError::NotAvailable(format!("could not read paper text: {}", e)))
    }
}

/// Fold one page of parsed results into the accumulator, keeping at most
/// `max_results` records overall and preserving page order. Returns `true`
/// when another page is worth fetching: this page had content and the cap
/// has not been reached yet.
pub(crate) fn accumulate_page(acc: &mut Vec<Paper>, page: Vec<Paper>, max_results: u32) -> bool {
    if page.is_empty() {
        return false;
    }
    let room = (max_results as usize).saturating_sub(acc.len());
    acc.extend(page.into_iter().take(room));
    acc.len() < max_results as usize
}

/// Strip any recognized DOI prefix, leaving the bare `10.xxxx/...` form.
pub fn normalize_doi(doi: &str) -> String {
    let doi = doi.trim();
    for prefix in ["https://doi.org/", "http://doi.org/", "doi:"] {
        if let Some(rest) = doi.strip_prefix(prefix) {
            return rest.to_string();
        }
    }
    doi.to_string()
}

/// Parse a provider-supplied publication date: full `YYYY-MM-DD` first, then
/// a bare year (mapped to January 1st), otherwise `None`. Never fails.
pub(crate) fn parse_pub_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d);
    }
    raw.get(..4)?
        .parse::<i32>()
        .ok()
        .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1))
}

/// Parse a caller-supplied `YYYY-MM-DD` filter date. Invalid strings are
/// logged and ignored rather than failing the search.
pub fn parse_date_arg(name: &str, value: Option<&str>) -> Option<NaiveDate> {
    let raw = value?;
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(d) => Some(d),
        Err(_) => {
            tracing::warn!("Ignoring invalid {} date: {}", name, raw);
            None
        }
    }
}

/// Make a record id safe to use as a base filename (DOIs contain slashes).
pub(crate) fn sanitize_filename(id: &str) -> String {
    id.chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            other => other,
        })
        .collect()
}

/// Fetch `url` and write the body to `dir/<id>.pdf`, creating `dir` if needed.
pub(crate) async fn download_to(
    client: &reqwest::Client,
    url: &str,
    id: &str,
    dir: &Path,
) -> Result<PathBuf, SourceError> {
    let resp = client.get(url).send().await?.error_for_status()?;
    let bytes = resp.bytes().await?;
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}.pdf", sanitize_filename(id)));
    tokio::fs::write(&path, &bytes).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_doi_strips_all_prefixes() {
        for input in [
            "https://doi.org/10.1038/nature12373",
            "http://doi.org/10.1038/nature12373",
            "doi:10.1038/nature12373",
            "10.1038/nature12373",
            "  10.1038/nature12373  ",
        ] {
            assert_eq!(normalize_doi(input), "10.1038/nature12373");
        }
    }

    #[test]
    fn test_normalize_doi_is_idempotent() {
        let once = normalize_doi("https://doi.org/10.7717/peerj.4375");
        assert_eq!(normalize_doi(&once), once);
    }

    #[test]
    fn test_parse_pub_date_full_then_year() {
        assert_eq!(
            parse_pub_date("2023-05-17"),
            NaiveDate::from_ymd_opt(2023, 5, 17)
        );
        assert_eq!(parse_pub_date("2023"), NaiveDate::from_ymd_opt(2023, 1, 1));
        assert_eq!(parse_pub_date("2023-bogus"), NaiveDate::from_ymd_opt(2023, 1, 1));
        assert_eq!(parse_pub_date("n/a"), None);
        assert_eq!(parse_pub_date(""), None);
    }

    #[test]
    fn test_parse_date_arg_ignores_invalid() {
        assert_eq!(
            parse_date_arg("date_from", Some("2024-01-01")),
            NaiveDate::from_ymd_opt(2024, 1, 1)
        );
        assert_eq!(parse_date_arg("date_from", Some("January 2024")), None);
        assert_eq!(parse_date_arg("date_from", None), None);
    }

    #[test]
    fn test_sanitize_filename_handles_doi_ids() {
        assert_eq!(sanitize_filename("10.7717/peerj.4375"), "10.7717_peerj.4375");
        assert_eq!(sanitize_filename("W2741809807"), "W2741809807");
    }

    fn numbered_paper(n: usize) -> Paper {
        Paper {
            id: format!("p{}", n),
            title: format!("Paper {}", n),
            authors: Vec::new(),
            abstract_text: String::new(),
            doi: String::new(),
            published_date: None,
            updated_date: None,
            pdf_url: String::new(),
            landing_url: String::new(),
            source: "stub".to_string(),
            categories: Vec::new(),
            keywords: Vec::new(),
            citation_count: 0,
            reference_ids: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_full_page_truncated_to_max_results_in_order() {
        let mut acc = Vec::new();
        let page: Vec<Paper> = (0..10).map(numbered_paper).collect();
        assert!(!accumulate_page(&mut acc, page, 5));
        let ids: Vec<&str> = acc.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["p0", "p1", "p2", "p3", "p4"]);
    }

    #[test]
    fn test_short_pages_keep_paginating() {
        let mut acc = Vec::new();
        assert!(accumulate_page(&mut acc, (0..3).map(numbered_paper).collect(), 10));
        assert!(accumulate_page(&mut acc, (3..6).map(numbered_paper).collect(), 10));
        assert_eq!(acc.len(), 6);
    }

    #[test]
    fn test_empty_page_stops_pagination() {
        let mut acc = vec![numbered_paper(0)];
        assert!(!accumulate_page(&mut acc, Vec::new(), 10));
        assert_eq!(acc.len(), 1);
    }

    #[test]
    fn test_exactly_filled_cap_stops_pagination() {
        let mut acc = Vec::new();
        assert!(!accumulate_page(&mut acc, (0..5).map(numbered_paper).collect(), 5));
        assert_eq!(acc.len(), 5);
    }

    /// A source exposing only `search` keeps the trait defaults for the
    /// optional capabilities.
    struct SearchOnlySource;

    #[async_trait]
    impl PaperSource for SearchOnlySource {
        fn name(&self) -> &str {
            "search_only"
        }

        async fn search(
            &self,
            _query: &str,
            _max_results: u32,
            _filters: &SearchFilters,
        ) -> Result<Vec<Paper>, SourceError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_default_capabilities_degrade_gracefully() {
        let src = SearchOnlySource;
        assert!(src.get_by_id("x").await.unwrap().is_none());
        assert!(src.get_by_doi("10.1/x").await.unwrap().is_none());
        assert!(src.get_references("x", 10).await.unwrap().is_empty());
        assert!(src.get_citations("x", 10).await.unwrap().is_empty());

        let dir = tempfile::tempdir().unwrap();
        let err = src.download_pdf("x", dir.path()).await.unwrap_err();
        assert!(matches!(err, SourceError::NotSupported(_)));
        assert!(err.to_string().contains("search_only"));

        // read_text on a provider without download support surfaces the
        // same not-supported outcome instead of touching the network.
        let err = src.read_text("x", dir.path()).await.unwrap_err();
        assert!(matches!(err, SourceError::NotSupported(_)));
    }
}
