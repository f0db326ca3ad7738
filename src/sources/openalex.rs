use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    accumulate_page, download_to, normalize_doi, parse_pub_date, PaperSource, SearchFilters,
    SourceError,
};
use crate::paper::Paper;

const BASE_URL: &str = "https://api.openalex.org";
const OPENALEX_URI_PREFIX: &str = "https://openalex.org/";
// OpenAlex caps per_page at 200.
const PER_PAGE_MAX: u32 = 200;
const SELECT_FIELDS: &str = "id,title,authorships,abstract_inverted_index,doi,\
publication_date,updated_date,open_access,primary_location,type,cited_by_count,\
referenced_works,topics";

/// Client for OpenAlex, a fully open index of scholarly works.
///
/// Uses the polite pool: a contact email is attached to every request via
/// `mailto`, which OpenAlex rewards with faster rate limits.
pub struct OpenAlexClient {
    client: reqwest::Client,
    mailto: String,
}

impl OpenAlexClient {
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

    async fn fetch_work(&self, path: &str) -> Result<Option<OAWork>, SourceError> {
        let resp = self
            .client
            .get(format!("{}/works/{}", BASE_URL, path))
            .query(&[("mailto", self.mailto.as_str()), ("select", SELECT_FIELDS)])
            .send()
            .await?;
        if resp.status() == 404 {
            return Ok(None);
        }
        let work: OAWork = resp.error_for_status()?.json().await?;
        Ok(Some(work))
    }

    /// Search the author index by name, ordered by OpenAlex relevance.
    pub async fn search_authors(
        &self,
        name: &str,
        max_results: u32,
    ) -> Result<Vec<Author>, SourceError> {
        let per_page = max_results.min(PER_PAGE_MAX).max(1).to_string();
        let resp: OAAuthorsResponse = self
            .client
            .get(format!("{}/authors", BASE_URL))
            .query(&[
                ("search", name),
                ("per_page", per_page.as_str()),
                ("mailto", self.mailto.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let mut authors: Vec<Author> = resp.results.iter().filter_map(parse_author).collect();
        authors.truncate(max_results as usize);
        Ok(authors)
    }

    /// Works by one author, sorted by citation count descending.
    pub async fn author_works(
        &self,
        author_id: &str,
        max_results: u32,
        filters: &SearchFilters,
    ) -> Result<Vec<Paper>, SourceError> {
        let filter = author_filter(&normalize_author_id(author_id), filters);
        self.filtered_works(&filter, max_results).await
    }

    /// One filtered works query, sorted by citation count descending.
    async fn filtered_works(
        &self,
        filter: &str,
        max_results: u32,
    ) -> Result<Vec<Paper>, SourceError> {
        let per_page = max_results.min(PER_PAGE_MAX).max(1).to_string();
        let resp: OAResponse = self
            .client
            .get(format!("{}/works", BASE_URL))
            .query(&[
                ("filter", filter),
                ("per_page", per_page.as_str()),
                ("sort", "cited_by_count:desc"),
                ("mailto", self.mailto.as_str()),
                ("select", SELECT_FIELDS),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let mut papers: Vec<Paper> = resp.results.iter().filter_map(parse_work).collect();
        papers.truncate(max_results as usize);
        Ok(papers)
    }
}

/// An author record from the OpenAlex `/authors` index. Empty affiliation
/// lists and missing ORCIDs are dropped from the serialized form.
#[derive(Debug, Clone, Serialize)]
pub struct Author {
    pub id: String,
    pub name: String,
    pub works_count: u64,
    pub citations: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub affiliations: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub orcid: String,
}

#[derive(Deserialize)]
struct OAResponse {
    #[serde(default)]
    results: Vec<OAWork>,
}

#[derive(Deserialize)]
struct OAAuthorsResponse {
    #[serde(default)]
    results: Vec<OAAuthorRecord>,
}

#[derive(Deserialize)]
struct OAAuthorRecord {
    id: Option<String>,
    display_name: Option<String>,
    works_count: Option<u64>,
    cited_by_count: Option<u64>,
    affiliations: Option<Vec<OAAffiliation>>,
    orcid: Option<String>,
}

#[derive(Deserialize)]
struct OAAffiliation {
    institution: Option<OAInstitution>,
}

#[derive(Deserialize)]
struct OAInstitution {
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct OAWork {
    id: Option<String>,
    title: Option<String>,
    authorships: Option<Vec<OAAuthorship>>,
    abstract_inverted_index: Option<Value>,
    doi: Option<String>,
    publication_date: Option<String>,
    updated_date: Option<String>,
    open_access: Option<OAOpenAccess>,
    primary_location: Option<OALocation>,
    #[serde(rename = "type")]
    work_type: Option<String>,
    cited_by_count: Option<u32>,
    referenced_works: Option<Vec<String>>,
    topics: Option<Vec<OATopic>>,
}

#[derive(Deserialize)]
struct OAAuthorship {
    author: OAAuthor,
}
#[derive(Deserialize)]
struct OAAuthor {
    display_name: Option<String>,
}
#[derive(Deserialize)]
struct OAOpenAccess {
    is_oa: Option<bool>,
    oa_url: Option<String>,
}
#[derive(Deserialize)]
struct OALocation {
    pdf_url: Option<String>,
}
#[derive(Deserialize)]
struct OATopic {
    display_name: Option<String>,
}

/// Rebuild abstract text from the OpenAlex word -> positions inverted index.
/// Malformed input degrades to an empty string, never an error.
fn reconstruct_abstract(index: Option<&Value>) -> String {
    let Some(Value::Object(map)) = index else {
        return String::new();
    };
    let mut words: Vec<(i64, &str)> = Vec::new();
    for (word, positions) in map {
        let Some(list) = positions.as_array() else {
            return String::new();
        };
        for pos in list {
            let Some(pos) = pos.as_i64() else {
                return String::new();
            };
            words.push((pos, word.as_str()));
        }
    }
    // Stable sort: words sharing a position keep insertion order.
    words.sort_by_key(|&(pos, _)| pos);
    words
        .iter()
        .map(|&(_, word)| word)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Batch filter for a capped set of reference ids, or `None` when there is
/// nothing to fetch (no references, or a zero cap) and the request should be
/// skipped entirely.
fn reference_filter(ref_ids: &mut Vec<String>, max_results: u32) -> Option<String> {
    ref_ids.truncate(max_results as usize);
    if ref_ids.is_empty() {
        return None;
    }
    Some(format!("openalex:{}", ref_ids.join("|")))
}

/// Canonicalize an OpenAlex work id to its prefixed short form: accepts
/// `W2741809807`, bare `2741809807`, `openalex:W2741809807`, and the full
/// `https://openalex.org/W2741809807` URI.
fn normalize_work_id(id: &str) -> String {
    let id = id.trim();
    let id = id.strip_prefix(OPENALEX_URI_PREFIX).unwrap_or(id);
    let id = id.strip_prefix("openalex:").unwrap_or(id);
    if id.chars().all(|c| c.is_ascii_digit()) && !id.is_empty() {
        format!("W{}", id)
    } else {
        id.to_string()
    }
}

/// Canonicalize an OpenAlex author id: accepts `A5015666723`, bare digits,
/// `openalex:A5015666723`, and the full URI form.
fn normalize_author_id(id: &str) -> String {
    let id = id.trim();
    let id = id.strip_prefix(OPENALEX_URI_PREFIX).unwrap_or(id);
    let id = id.strip_prefix("openalex:").unwrap_or(id);
    if id.chars().all(|c| c.is_ascii_digit()) && !id.is_empty() {
        format!("A{}", id)
    } else {
        id.to_string()
    }
}

fn author_filter(author_id: &str, filters: &SearchFilters) -> String {
    let mut parts = vec![format!("author.id:{}", author_id)];
    if let Some(d) = filters.date_from {
        parts.push(format!("from_publication_date:{}", d.format("%Y-%m-%d")));
    }
    if let Some(d) = filters.date_to {
        parts.push(format!("to_publication_date:{}", d.format("%Y-%m-%d")));
    }
    parts.join(",")
}

/// An author record without an id is dropped, like works.
fn parse_author(item: &OAAuthorRecord) -> Option<Author> {
    let id = item.id.as_deref()?.replace(OPENALEX_URI_PREFIX, "");
    if id.is_empty() {
        return None;
    }

    let affiliations: Vec<String> = item
        .affiliations
        .iter()
        .flatten()
        .filter_map(|a| a.institution.as_ref().and_then(|i| i.display_name.clone()))
        .take(3)
        .collect();

    Some(Author {
        id,
        name: item.display_name.clone().unwrap_or_default(),
        works_count: item.works_count.unwrap_or(0),
        citations: item.cited_by_count.unwrap_or(0),
        affiliations,
        orcid: item
            .orcid
            .as_deref()
            .map(|o| o.trim_start_matches("https://orcid.org/").to_string())
            .unwrap_or_default(),
    })
}

fn parse_work(item: &OAWork) -> Option<Paper> {
    let id = item.id.as_deref()?.replace(OPENALEX_URI_PREFIX, "");
    if id.is_empty() {
        return None;
    }

    let authors = item
        .authorships
        .as_ref()
        .map(|list| {
            list.iter()
                .filter_map(|a| a.author.display_name.clone())
                .collect()
        })
        .unwrap_or_default();

    // Open-access URL first, then the primary location's PDF link.
    let mut pdf_url = String::new();
    if let Some(oa) = &item.open_access {
        if oa.is_oa.unwrap_or(false) {
            pdf_url = oa.oa_url.clone().unwrap_or_default();
        }
    }
    if pdf_url.is_empty() {
        if let Some(loc) = &item.primary_location {
            pdf_url = loc.pdf_url.clone().unwrap_or_default();
        }
    }

    // Top topics become categories; fall back to the work type.
    let mut categories: Vec<String> = item
        .topics
        .iter()
        .flatten()
        .take(3)
        .filter_map(|t| t.display_name.clone())
        .collect();
    if categories.is_empty() {
        if let Some(t) = &item.work_type {
            categories.push(t.clone());
        }
    }

    let reference_ids = item
        .referenced_works
        .as_ref()
        .map(|refs| {
            refs.iter()
                .map(|r| r.replace(OPENALEX_URI_PREFIX, ""))
                .collect()
        })
        .unwrap_or_default();

    Some(Paper {
        landing_url: format!("{}{}", OPENALEX_URI_PREFIX, id),
        id,
        title: item.title.clone().unwrap_or_default(),
        authors,
        abstract_text: reconstruct_abstract(item.abstract_inverted_index.as_ref()),
        doi: item.doi.as_deref().map(normalize_doi).unwrap_or_default(),
        published_date: item
            .publication_date
            .as_deref()
            .and_then(parse_pub_date),
        updated_date: item
            .updated_date
            .as_deref()
            .and_then(|s| parse_pub_date(s.get(..10).unwrap_or(s))),
        pdf_url,
        source: "openalex".to_string(),
        categories,
        keywords: Vec::new(),
        citation_count: item.cited_by_count.unwrap_or(0),
        reference_ids,
        extra: serde_json::Map::new(),
    })
}

#[async_trait]
impl PaperSource for OpenAlexClient {
    fn name(&self) -> &str {
        "openalex"
    }

    async fn search(
        &self,
        query: &str,
        max_results: u32,
        filters: &SearchFilters,
    ) -> Result<Vec<Paper>, SourceError> {
        let mut parts = vec![format!("title_and_abstract.search:{}", query)];
        if let Some(d) = filters.date_from {
            parts.push(format!("from_publication_date:{}", d.format("%Y-%m-%d")));
        }
        if let Some(d) = filters.date_to {
            parts.push(format!("to_publication_date:{}", d.format("%Y-%m-%d")));
        }
        let filter = parts.join(",");
        let per_page = max_results.min(PER_PAGE_MAX).max(1).to_string();

        let mut papers: Vec<Paper> = Vec::new();
        let mut page: u32 = 1;
        while (papers.len() as u32) < max_results {
            let page_str = page.to_string();
            let resp = self
                .client
                .get(format!("{}/works", BASE_URL))
                .query(&[
                    ("filter", filter.as_str()),
                    ("per_page", per_page.as_str()),
                    ("page", page_str.as_str()),
                    ("mailto", self.mailto.as_str()),
                    ("select", SELECT_FIELDS),
                ])
                .send()
                .await;
            let resp = match resp.and_then(|r| r.error_for_status()) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("OpenAlex page {} failed: {}", page, e);
                    break;
                }
            };
            let data: OAResponse = match resp.json().await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!("OpenAlex page {} returned bad JSON: {}", page, e);
                    break;
                }
            };
            let parsed: Vec<Paper> = data.results.iter().filter_map(parse_work).collect();
            if !accumulate_page(&mut papers, parsed, max_results) {
                break;
            }
            page += 1;
        }

        Ok(papers)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Paper>, SourceError> {
        let work_id = normalize_work_id(id);
        Ok(self
            .fetch_work(&work_id)
            .await?
            .as_ref()
            .and_then(parse_work))
    }

    async fn get_by_doi(&self, doi: &str) -> Result<Option<Paper>, SourceError> {
        let doi = normalize_doi(doi);
        let path = format!("https://doi.org/{}", doi);
        Ok(self.fetch_work(&path).await?.as_ref().and_then(parse_work))
    }

    async fn get_references(
        &self,
        id: &str,
        max_results: u32,
    ) -> Result<Vec<Paper>, SourceError> {
        let work_id = normalize_work_id(id);
        let Some(work) = self.fetch_work(&work_id).await? else {
            return Ok(Vec::new());
        };
        let mut ref_ids: Vec<String> = work
            .referenced_works
            .unwrap_or_default()
            .iter()
            .map(|r| r.replace(OPENALEX_URI_PREFIX, ""))
            .collect();
        let Some(filter) = reference_filter(&mut ref_ids, max_results) else {
            return Ok(Vec::new());
        };
        self.filtered_works(&filter, max_results).await
    }

    async fn get_citations(
        &self,
        id: &str,
        max_results: u32,
    ) -> Result<Vec<Paper>, SourceError> {
        let work_id = normalize_work_id(id);
        let filter = format!("cites:{}", work_id);
        self.filtered_works(&filter, max_results).await
    }

    async fn download_pdf(&self, id: &str, dir: &Path) -> Result<PathBuf, SourceError> {
        let paper = self.get_by_id(id).await?.ok_or_else(|| {
            SourceError::NotAvailable(format!("no OpenAlex work found for {}", id))
        })?;
        if paper.pdf_url.is_empty() {
            return Err(SourceError::NotAvailable(
                "no open-access PDF for this work; try the DOI or publisher page".to_string(),
            ));
        }
        download_to(&self.client, &paper.pdf_url, &paper.id, dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reconstruct_abstract_orders_by_position() {
        let index = json!({
            "deep": [0],
            "learning": [1],
            "models": [2, 4],
            "are": [3]
        });
        assert_eq!(
            reconstruct_abstract(Some(&index)),
            "deep learning models are models"
        );
    }

    #[test]
    fn test_reconstruct_abstract_word_count_matches_occurrences() {
        let index = json!({"a": [0, 2, 5], "b": [1, 3], "c": [4]});
        let text = reconstruct_abstract(Some(&index));
        assert_eq!(text.split_whitespace().count(), 6);
    }

    #[test]
    fn test_reconstruct_abstract_empty_and_absent() {
        assert_eq!(reconstruct_abstract(None), "");
        assert_eq!(reconstruct_abstract(Some(&json!({}))), "");
    }

    #[test]
    fn test_reconstruct_abstract_malformed_degrades_to_empty() {
        assert_eq!(reconstruct_abstract(Some(&json!("not a map"))), "");
        assert_eq!(reconstruct_abstract(Some(&json!({"word": "oops"}))), "");
        assert_eq!(reconstruct_abstract(Some(&json!({"word": ["oops"]}))), "");
    }

    #[test]
    fn test_normalize_work_id_accepts_all_forms() {
        for input in [
            "W2741809807",
            "2741809807",
            "openalex:W2741809807",
            "https://openalex.org/W2741809807",
        ] {
            assert_eq!(normalize_work_id(input), "W2741809807");
        }
    }

    #[test]
    fn test_normalize_author_id_accepts_all_forms() {
        for input in [
            "A5015666723",
            "5015666723",
            "openalex:A5015666723",
            "https://openalex.org/A5015666723",
        ] {
            assert_eq!(normalize_author_id(input), "A5015666723");
        }
    }

    #[test]
    fn test_author_filter_includes_date_range() {
        let filters = SearchFilters {
            date_from: chrono::NaiveDate::from_ymd_opt(2020, 1, 1),
            date_to: chrono::NaiveDate::from_ymd_opt(2023, 12, 31),
        };
        assert_eq!(
            author_filter("A5015666723", &filters),
            "author.id:A5015666723,from_publication_date:2020-01-01,\
             to_publication_date:2023-12-31"
        );
        assert_eq!(
            author_filter("A5015666723", &SearchFilters::default()),
            "author.id:A5015666723"
        );
    }

    #[test]
    fn test_parse_author_caps_affiliations_and_strips_orcid() {
        let record: OAAuthorRecord = serde_json::from_value(json!({
            "id": "https://openalex.org/A5015666723",
            "display_name": "Yann LeCun",
            "works_count": 742,
            "cited_by_count": 381452,
            "orcid": "https://orcid.org/0000-0003-0000-0000",
            "affiliations": [
                {"institution": {"display_name": "New York University"}},
                {"institution": {"display_name": "Meta"}},
                {"institution": {"display_name": "Bell Labs"}},
                {"institution": {"display_name": "Ignored Fourth"}}
            ]
        }))
        .unwrap();
        let author = parse_author(&record).unwrap();
        assert_eq!(author.id, "A5015666723");
        assert_eq!(author.name, "Yann LeCun");
        assert_eq!(author.works_count, 742);
        assert_eq!(author.citations, 381452);
        assert_eq!(author.affiliations.len(), 3);
        assert_eq!(author.orcid, "0000-0003-0000-0000");
    }

    #[test]
    fn test_author_empty_fields_omitted_from_output() {
        let record: OAAuthorRecord = serde_json::from_value(json!({
            "id": "https://openalex.org/A1",
            "display_name": "Anonymous"
        }))
        .unwrap();
        let value = serde_json::to_value(parse_author(&record).unwrap()).unwrap();
        assert!(value.get("affiliations").is_none());
        assert!(value.get("orcid").is_none());
        assert_eq!(value["works_count"], 0);
    }

    #[test]
    fn test_author_record_without_id_is_dropped() {
        let record: OAAuthorRecord =
            serde_json::from_value(json!({"display_name": "No id"})).unwrap();
        assert!(parse_author(&record).is_none());
    }

    #[test]
    fn test_reference_filter_batches_and_caps() {
        let mut ids = vec!["W1".to_string(), "W2".to_string(), "W3".to_string()];
        assert_eq!(
            reference_filter(&mut ids, 2),
            Some("openalex:W1|W2".to_string())
        );
    }

    #[test]
    fn test_reference_filter_skips_degenerate_requests() {
        assert_eq!(reference_filter(&mut Vec::new(), 10), None);

        // A zero cap must not produce an empty-filter request.
        let mut ids = vec!["W1".to_string(), "W2".to_string()];
        assert_eq!(reference_filter(&mut ids, 0), None);
    }

    fn sample_work() -> OAWork {
        serde_json::from_value(json!({
            "id": "https://openalex.org/W2741809807",
            "title": "The state of OA",
            "authorships": [
                {"author": {"display_name": "Heather Piwowar"}},
                {"author": {"display_name": "Jason Priem"}}
            ],
            "abstract_inverted_index": {"Despite": [0], "growing": [1], "interest": [2]},
            "doi": "https://doi.org/10.7717/peerj.4375",
            "publication_date": "2018-02-13",
            "updated_date": "2024-06-01T08:00:00",
            "open_access": {"is_oa": true, "oa_url": "https://peerj.com/articles/4375.pdf"},
            "cited_by_count": 1044,
            "topics": [
                {"display_name": "Scholarly Communication"},
                {"display_name": "Open Access"},
                {"display_name": "Bibliometrics"},
                {"display_name": "Ignored Fourth Topic"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_work_normalizes_fields() {
        let paper = parse_work(&sample_work()).unwrap();
        assert_eq!(paper.id, "W2741809807");
        assert_eq!(paper.doi, "10.7717/peerj.4375");
        assert_eq!(paper.authors.len(), 2);
        assert_eq!(paper.abstract_text, "Despite growing interest");
        assert_eq!(paper.citation_count, 1044);
        assert_eq!(paper.categories.len(), 3);
        assert_eq!(paper.landing_url, "https://openalex.org/W2741809807");
        assert_eq!(
            paper.published_date,
            chrono::NaiveDate::from_ymd_opt(2018, 2, 13)
        );
        assert_eq!(
            paper.updated_date,
            chrono::NaiveDate::from_ymd_opt(2024, 6, 1)
        );
    }

    #[test]
    fn test_parse_work_without_id_is_dropped() {
        let work: OAWork = serde_json::from_value(json!({"title": "No id"})).unwrap();
        assert!(parse_work(&work).is_none());
    }

    #[test]
    fn test_parse_work_falls_back_to_type_category() {
        let work: OAWork = serde_json::from_value(json!({
            "id": "https://openalex.org/W1",
            "type": "article"
        }))
        .unwrap();
        let paper = parse_work(&work).unwrap();
        assert_eq!(paper.categories, vec!["article".to_string()]);
        assert!(paper.authors.is_empty());
        assert_eq!(paper.abstract_text, "");
    }
}
