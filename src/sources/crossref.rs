use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::{
    accumulate_page, download_to, normalize_doi, PaperSource, SearchFilters, SourceError,
};
use crate::paper::Paper;

const BASE_URL: &str = "https://api.crossref.org/works";
const ROWS_MAX: u32 = 100;
const SELECT_FIELDS: &str = "DOI,title,author,abstract,published,\
is-referenced-by-count,link,URL,subject,container-title,type,publisher";

/// Client for the CrossRef REST API. A contact email rides along on every
/// request (CrossRef's polite pool), identifying the caller in exchange for
/// more reliable service.
pub struct CrossRefClient {
    client: reqwest::Client,
    mailto: String,
}

impl CrossRefClient {
    pub fn new(email: Option<String>) -> Self {
        let mailto = email.unwrap_or_else(|| "scholar-search@example.org".to_string());
        let ua = format!("scholar-search/0.1 (mailto:{})", mailto);
        Self {
            client: reqwest::Client::builder()
                .user_agent(ua)
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap(),
            mailto,
        }
    }
}

#[derive(Deserialize)]
struct CRResponse {
    message: CRMessage,
}

#[derive(Deserialize)]
struct CRMessage {
    // Present for search queries.
    items: Option<Vec<CRItem>>,
    // Present when a single work is looked up by DOI.
    #[serde(rename = "DOI")]
    doi: Option<String>,
    title: Option<Vec<String>>,
    author: Option<Vec<CRAuthor>>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    #[serde(rename = "is-referenced-by-count")]
    citation_count: Option<u32>,
    published: Option<CRDate>,
    link: Option<Vec<CRLink>>,
    #[serde(rename = "URL")]
    url: Option<String>,
    subject: Option<Vec<String>>,
    #[serde(rename = "container-title")]
    container_title: Option<Vec<String>>,
    #[serde(rename = "type")]
    work_type: Option<String>,
    publisher: Option<String>,
}

#[derive(Deserialize)]
struct CRItem {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    title: Option<Vec<String>>,
    author: Option<Vec<CRAuthor>>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    #[serde(rename = "is-referenced-by-count")]
    citation_count: Option<u32>,
    published: Option<CRDate>,
    link: Option<Vec<CRLink>>,
    #[serde(rename = "URL")]
    url: Option<String>,
    subject: Option<Vec<String>>,
    #[serde(rename = "container-title")]
    container_title: Option<Vec<String>>,
    #[serde(rename = "type")]
    work_type: Option<String>,
    publisher: Option<String>,
}

impl CRMessage {
    fn into_item(self) -> CRItem {
        CRItem {
            doi: self.doi,
            title: self.title,
            author: self.author,
            abstract_text: self.abstract_text,
            citation_count: self.citation_count,
            published: self.published,
            link: self.link,
            url: self.url,
            subject: self.subject,
            container_title: self.container_title,
            work_type: self.work_type,
            publisher: self.publisher,
        }
    }
}

#[derive(Deserialize)]
struct CRAuthor {
    given: Option<String>,
    family: Option<String>,
}

#[derive(Deserialize)]
struct CRDate {
    #[serde(rename = "date-parts")]
    date_parts: Option<Vec<Vec<u32>>>,
}

#[derive(Deserialize)]
struct CRLink {
    #[serde(rename = "URL")]
    url: Option<String>,
    #[serde(rename = "content-type")]
    content_type: Option<String>,
}

/// CrossRef dates come as nested `[[year, month?, day?]]` arrays; missing
/// components default to 1, so a bare year becomes January 1st.
fn date_from_parts(date: &CRDate) -> Option<chrono::NaiveDate> {
    let parts = date.date_parts.as_ref()?.first()?;
    let year = *parts.first()? as i32;
    let month = parts.get(1).copied().unwrap_or(1);
    let day = parts.get(2).copied().unwrap_or(1);
    chrono::NaiveDate::from_ymd_opt(year, month, day)
}

/// CrossRef abstracts carry JATS markup; strip the tags and collapse
/// whitespace. Degrades to the raw string on a bad pattern.
fn strip_jats(text: &str) -> String {
    let stripped = match Regex::new(r"<[^>]+>") {
        Ok(re) => re.replace_all(text, " ").into_owned(),
        Err(_) => text.to_string(),
    };
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A CrossRef item with no DOI cannot be assigned an id and is dropped.
fn item_to_paper(item: &CRItem) -> Option<Paper> {
    let doi = normalize_doi(item.doi.as_deref()?);
    if doi.is_empty() {
        return None;
    }

    let authors = item
        .author
        .as_ref()
        .map(|list| {
            list.iter()
                .map(|a| {
                    format!(
                        "{} {}",
                        a.given.as_deref().unwrap_or(""),
                        a.family.as_deref().unwrap_or("")
                    )
                    .trim()
                    .to_string()
                })
                .filter(|name| !name.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let pdf_url = item
        .link
        .as_ref()
        .and_then(|links| {
            links
                .iter()
                .find(|l| l.content_type.as_deref() == Some("application/pdf"))
        })
        .and_then(|l| l.url.clone())
        .unwrap_or_default();

    let categories: Vec<String> = item
        .subject
        .iter()
        .flatten()
        .take(3)
        .cloned()
        .collect();

    let mut extra = serde_json::Map::new();
    if let Some(venue) = item.container_title.as_ref().and_then(|t| t.first()) {
        extra.insert("venue".into(), Value::String(venue.clone()));
    }
    if let Some(t) = &item.work_type {
        extra.insert("type".into(), Value::String(t.clone()));
    }
    if let Some(p) = &item.publisher {
        extra.insert("publisher".into(), Value::String(p.clone()));
    }

    Some(Paper {
        landing_url: item
            .url
            .clone()
            .unwrap_or_else(|| format!("https://doi.org/{}", doi)),
        id: doi.clone(),
        title: item
            .title
            .as_ref()
            .and_then(|t| t.first())
            .cloned()
            .unwrap_or_default(),
        authors,
        abstract_text: item
            .abstract_text
            .as_deref()
            .map(strip_jats)
            .unwrap_or_default(),
        doi,
        published_date: item.published.as_ref().and_then(date_from_parts),
        updated_date: None,
        pdf_url,
        source: "crossref".to_string(),
        categories,
        keywords: Vec::new(),
        citation_count: item.citation_count.unwrap_or(0),
        reference_ids: Vec::new(),
        extra,
    })
}

#[async_trait]
impl PaperSource for CrossRefClient {
    fn name(&self) -> &str {
        "crossref"
    }

    async fn search(
        &self,
        query: &str,
        max_results: u32,
        filters: &SearchFilters,
    ) -> Result<Vec<Paper>, SourceError> {
        let rows = max_results.min(ROWS_MAX).max(1);
        let rows_str = rows.to_string();

        let mut filter_parts: Vec<String> = Vec::new();
        if let Some(d) = filters.date_from {
            filter_parts.push(format!("from-pub-date:{}", d.format("%Y-%m-%d")));
        }
        if let Some(d) = filters.date_to {
            filter_parts.push(format!("until-pub-date:{}", d.format("%Y-%m-%d")));
        }
        let filter = filter_parts.join(",");

        let mut papers: Vec<Paper> = Vec::new();
        let mut offset: u32 = 0;
        while (papers.len() as u32) < max_results {
            let offset_str = offset.to_string();
            let mut params: Vec<(&str, &str)> = vec![
                ("query", query),
                ("rows", rows_str.as_str()),
                ("offset", offset_str.as_str()),
                ("mailto", self.mailto.as_str()),
                ("select", SELECT_FIELDS),
            ];
            if !filter.is_empty() {
                params.push(("filter", filter.as_str()));
            }

            let resp = self.client.get(BASE_URL).query(&params).send().await;
            let resp = match resp.and_then(|r| r.error_for_status()) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("CrossRef page at offset {} failed: {}", offset, e);
                    break;
                }
            };
            let data: CRResponse = match resp.json().await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!("CrossRef returned bad JSON: {}", e);
                    break;
                }
            };
            let items = data.message.items.unwrap_or_default();
            let parsed: Vec<Paper> = items.iter().filter_map(item_to_paper).collect();
            if !accumulate_page(&mut papers, parsed, max_results) {
                break;
            }
            offset += rows;
        }

        Ok(papers)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Paper>, SourceError> {
        // CrossRef's identifier space is the DOI itself.
        self.get_by_doi(id).await
    }

    async fn get_by_doi(&self, doi: &str) -> Result<Option<Paper>, SourceError> {
        let doi = normalize_doi(doi);
        let url = format!("{}/{}", BASE_URL, doi);
        let resp = self
            .client
            .get(&url)
            .query(&[("mailto", self.mailto.as_str())])
            .send()
            .await?;
        if resp.status() == 404 {
            return Ok(None);
        }
        let cr: CRResponse = resp.error_for_status()?.json().await?;
        Ok(item_to_paper(&cr.message.into_item()))
    }

    async fn download_pdf(&self, id: &str, dir: &Path) -> Result<PathBuf, SourceError> {
        let paper = self.get_by_doi(id).await?.ok_or_else(|| {
            SourceError::NotAvailable(format!("no CrossRef record for DOI {}", id))
        })?;
        if paper.pdf_url.is_empty() {
            return Err(SourceError::NotAvailable(
                "no full-text link registered for this DOI; try the publisher page".to_string(),
            ));
        }
        download_to(&self.client, &paper.pdf_url, &paper.id, dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_item() -> CRItem {
        serde_json::from_value(json!({
            "DOI": "10.1038/nature12373",
            "title": ["Nanometre-scale thermometry in a living cell"],
            "author": [
                {"given": "G.", "family": "Kucsko"},
                {"given": "P. C.", "family": "Maurer"}
            ],
            "abstract": "<jats:p>Sensitive probing of <jats:italic>temperature</jats:italic> variations.</jats:p>",
            "is-referenced-by-count": 1500,
            "published": {"date-parts": [[2013, 8, 1]]},
            "link": [
                {"URL": "https://www.nature.com/articles/nature12373.pdf",
                 "content-type": "application/pdf"},
                {"URL": "https://www.nature.com/articles/nature12373",
                 "content-type": "text/html"}
            ],
            "URL": "https://doi.org/10.1038/nature12373",
            "container-title": ["Nature"],
            "type": "journal-article"
        }))
        .unwrap()
    }

    #[test]
    fn test_item_to_paper_maps_fields() {
        let paper = item_to_paper(&sample_item()).unwrap();
        assert_eq!(paper.id, "10.1038/nature12373");
        assert_eq!(paper.doi, "10.1038/nature12373");
        assert_eq!(paper.title, "Nanometre-scale thermometry in a living cell");
        assert_eq!(paper.authors, vec!["G. Kucsko", "P. C. Maurer"]);
        assert_eq!(paper.citation_count, 1500);
        assert_eq!(
            paper.published_date,
            chrono::NaiveDate::from_ymd_opt(2013, 8, 1)
        );
        assert_eq!(
            paper.pdf_url,
            "https://www.nature.com/articles/nature12373.pdf"
        );
        assert_eq!(
            paper.extra.get("venue").and_then(Value::as_str),
            Some("Nature")
        );
    }

    #[test]
    fn test_abstract_jats_markup_stripped() {
        let paper = item_to_paper(&sample_item()).unwrap();
        assert_eq!(
            paper.abstract_text,
            "Sensitive probing of temperature variations."
        );
    }

    #[test]
    fn test_year_only_date_defaults_to_january_first() {
        let item: CRItem = serde_json::from_value(json!({
            "DOI": "10.5555/year.only",
            "title": ["Year only"],
            "published": {"date-parts": [[2009]]}
        }))
        .unwrap();
        let paper = item_to_paper(&item).unwrap();
        assert_eq!(
            paper.published_date,
            chrono::NaiveDate::from_ymd_opt(2009, 1, 1)
        );
    }

    #[test]
    fn test_item_without_doi_is_dropped() {
        let item: CRItem = serde_json::from_value(json!({"title": ["No DOI"]})).unwrap();
        assert!(item_to_paper(&item).is_none());
    }

    #[test]
    fn test_missing_optionals_default_to_empty() {
        let item: CRItem =
            serde_json::from_value(json!({"DOI": "10.5555/bare"})).unwrap();
        let paper = item_to_paper(&item).unwrap();
        assert_eq!(paper.title, "");
        assert!(paper.authors.is_empty());
        assert_eq!(paper.abstract_text, "");
        assert_eq!(paper.citation_count, 0);
        assert_eq!(paper.landing_url, "https://doi.org/10.5555/bare");
    }
}
