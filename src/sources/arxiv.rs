use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;

use super::{
    accumulate_page, download_to, normalize_doi, parse_pub_date, PaperSource, SearchFilters,
    SourceError,
};
use crate::paper::Paper;

const BASE_URL: &str = "https://export.arxiv.org/api/query";
const PAGE_MAX: u32 = 100;
// arXiv asks for no more than 1 request every 3 seconds.
const PAGE_DELAY: Duration = Duration::from_secs(3);

pub struct ArxivClient {
    client: reqwest::Client,
}

impl ArxivClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("scholar-search/0.1")
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap(),
        }
    }
}

impl Default for ArxivClient {
    fn default() -> Self {
        Self::new()
    }
}

fn build_query(query: &str, filters: &SearchFilters) -> String {
    let mut q = format!("all:{}", urlencoding::encode(query));
    if filters.date_from.is_some() || filters.date_to.is_some() {
        let from = filters
            .date_from
            .map(|d| d.format("%Y%m%d").to_string())
            .unwrap_or_else(|| "19000101".to_string());
        let to = filters
            .date_to
            .map(|d| d.format("%Y%m%d").to_string())
            .unwrap_or_else(|| Utc::now().format("%Y%m%d").to_string());
        q.push_str(&format!(
            "+AND+submittedDate:[{}0000+TO+{}2359]",
            from, to
        ));
    }
    q
}

#[async_trait]
impl PaperSource for ArxivClient {
    fn name(&self) -> &str {
        "arxiv"
    }

    async fn search(
        &self,
        query: &str,
        max_results: u32,
        filters: &SearchFilters,
    ) -> Result<Vec<Paper>, SourceError> {
        let page_size = max_results.min(PAGE_MAX).max(1);
        let search_query = build_query(query, filters);

        let mut papers: Vec<Paper> = Vec::new();
        let mut start: u32 = 0;
        while (papers.len() as u32) < max_results {
            if start > 0 {
                tokio::time::sleep(PAGE_DELAY).await;
            }
            let url = format!(
                "{}?search_query={}&start={}&max_results={}&sortBy=relevance&sortOrder=descending",
                BASE_URL, search_query, start, page_size
            );
            let xml = match self.client.get(&url).send().await {
                Ok(r) if r.status().is_success() => match r.text().await {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::warn!("arXiv response unreadable: {}", e);
                        break;
                    }
                },
                Ok(r) => {
                    tracing::warn!("arXiv search failed with status {}", r.status());
                    break;
                }
                Err(e) => {
                    tracing::warn!("arXiv request failed: {}", e);
                    break;
                }
            };
            let page = match parse_atom_feed(&xml) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!("arXiv feed parse failed: {}", e);
                    break;
                }
            };
            if !accumulate_page(&mut papers, page, max_results) {
                break;
            }
            start += page_size;
        }

        Ok(papers)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Paper>, SourceError> {
        let arxiv_id = id.strip_prefix("arxiv:").unwrap_or(id);
        let url = format!("{}?id_list={}", BASE_URL, arxiv_id);
        let xml = self.client.get(&url).send().await?.text().await?;
        let results = parse_atom_feed(&xml)?;
        Ok(results.into_iter().next())
    }

    async fn download_pdf(&self, id: &str, dir: &Path) -> Result<PathBuf, SourceError> {
        let paper = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| SourceError::NotAvailable(format!("no arXiv entry for {}", id)))?;
        if paper.pdf_url.is_empty() {
            return Err(SourceError::NotAvailable(
                "this arXiv entry has no PDF link".to_string(),
            ));
        }
        download_to(&self.client, &paper.pdf_url, &paper.id, dir).await
    }
}

fn parse_atom_feed(xml: &str) -> Result<Vec<Paper>, SourceError> {
    let mut reader = Reader::from_str(xml);
    let mut papers = Vec::new();
    let mut in_entry = false;
    let mut current_tag = String::new();
    let mut title = String::new();
    let mut summary = String::new();
    let mut entry_id = String::new();
    let mut authors: Vec<String> = Vec::new();
    let mut categories: Vec<String> = Vec::new();
    let mut published = String::new();
    let mut updated = String::new();
    let mut link_pdf = String::new();
    let mut link_abs = String::new();
    let mut author_name = String::new();
    let mut in_author = false;
    let mut doi = String::new();
    let mut journal_ref = String::new();
    let mut buf = Vec::new();

    let read_link = |e: &quick_xml::events::BytesStart| -> (String, String) {
        let mut href = String::new();
        let mut title_attr = String::new();
        for attr in e.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let val = String::from_utf8_lossy(&attr.value).to_string();
            if key == "href" {
                href = val;
            } else if key == "title" {
                title_attr = val;
            }
        }
        (href, title_attr)
    };

    let read_category = |e: &quick_xml::events::BytesStart, categories: &mut Vec<String>| {
        for attr in e.attributes().flatten() {
            if attr.key.as_ref() == b"term" {
                let term = String::from_utf8_lossy(&attr.value).to_string();
                if !term.is_empty() && !categories.contains(&term) {
                    categories.push(term);
                }
            }
        }
    };

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "entry" {
                    in_entry = true;
                    title.clear();
                    summary.clear();
                    entry_id.clear();
                    authors.clear();
                    categories.clear();
                    published.clear();
                    updated.clear();
                    link_pdf.clear();
                    link_abs.clear();
                    doi.clear();
                    journal_ref.clear();
                } else if in_entry {
                    current_tag = tag.clone();
                    if tag == "author" {
                        in_author = true;
                        author_name.clear();
                    }
                    if tag == "link" {
                        let (href, title_attr) = read_link(&e);
                        if title_attr == "pdf" {
                            link_pdf = href;
                        } else if link_abs.is_empty() && href.contains("abs") {
                            link_abs = href;
                        }
                    }
                    if tag == "category" || tag.ends_with(":primary_category") {
                        read_category(&e, &mut categories);
                    }
                }
            }
            Ok(Event::Empty(e)) if in_entry => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "link" {
                    let (href, title_attr) = read_link(&e);
                    if title_attr == "pdf" {
                        link_pdf = href;
                    } else if link_abs.is_empty() && href.contains("abs") {
                        link_abs = href;
                    }
                } else if tag == "category" || tag.ends_with(":primary_category") {
                    read_category(&e, &mut categories);
                }
            }
            Ok(Event::Text(e)) if in_entry => {
                let text = e.unescape().unwrap_or_default().to_string();
                match current_tag.as_str() {
                    "title" => title.push_str(&text),
                    "summary" => summary.push_str(&text),
                    "id" if entry_id.is_empty() => entry_id = text,
                    "published" => published.push_str(&text),
                    "updated" => updated.push_str(&text),
                    "name" if in_author => author_name.push_str(&text),
                    tag if tag.ends_with(":doi") || tag == "doi" => doi = text,
                    tag if tag.ends_with(":journal_ref") => journal_ref = text,
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "entry" && in_entry {
                    in_entry = false;
                    // The entry id is a URL; the arXiv id is its last segment.
                    let id = entry_id
                        .rsplit('/')
                        .next()
                        .unwrap_or(&entry_id)
                        .to_string();
                    if !id.is_empty() && !title.trim().is_empty() {
                        let mut capped = categories.clone();
                        capped.truncate(3);
                        let mut extra = serde_json::Map::new();
                        if !journal_ref.trim().is_empty() {
                            extra.insert(
                                "journal_ref".into(),
                                Value::String(journal_ref.trim().to_string()),
                            );
                        }
                        papers.push(Paper {
                            id: id.clone(),
                            title: title.trim().replace('\n', " "),
                            authors: authors.clone(),
                            abstract_text: summary.trim().replace('\n', " "),
                            doi: normalize_doi(&doi),
                            published_date: published.get(..10).and_then(parse_pub_date),
                            updated_date: updated.get(..10).and_then(parse_pub_date),
                            pdf_url: link_pdf.clone(),
                            landing_url: if link_abs.is_empty() {
                                entry_id.clone()
                            } else {
                                link_abs.clone()
                            },
                            source: "arxiv".to_string(),
                            categories: capped,
                            keywords: Vec::new(),
                            citation_count: 0,
                            reference_ids: Vec::new(),
                            extra,
                        });
                    }
                } else if tag == "author" && in_author {
                    in_author = false;
                    if !author_name.trim().is_empty() {
                        authors.push(author_name.trim().to_string());
                    }
                }
                if tag == current_tag {
                    current_tag.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SourceError::Parse(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(papers)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_ATOM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <entry>
    <id>http://arxiv.org/abs/1706.03762v7</id>
    <title>Attention Is All You Need</title>
    <summary>The dominant sequence transduction models are based on complex
recurrent or convolutional neural networks.</summary>
    <published>2017-06-12T17:57:34Z</published>
    <updated>2023-08-02T00:41:18Z</updated>
    <author><name>Ashish Vaswani</name></author>
    <author><name>Noam Shazeer</name></author>
    <arxiv:doi>10.48550/arXiv.1706.03762</arxiv:doi>
    <arxiv:journal_ref>NeurIPS 2017</arxiv:journal_ref>
    <link href="http://arxiv.org/abs/1706.03762v7" rel="alternate" type="text/html"/>
    <link href="http://arxiv.org/pdf/1706.03762v7" title="pdf" type="application/pdf"/>
    <category term="cs.CL" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.LG" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_atom_feed() {
        let papers = parse_atom_feed(SAMPLE_ATOM).unwrap();
        assert_eq!(papers.len(), 1);
        let p = &papers[0];
        assert_eq!(p.id, "1706.03762v7");
        assert_eq!(p.title, "Attention Is All You Need");
        assert_eq!(p.authors, vec!["Ashish Vaswani", "Noam Shazeer"]);
        assert_eq!(p.doi, "10.48550/arXiv.1706.03762");
        assert_eq!(p.categories, vec!["cs.CL", "cs.LG"]);
        assert_eq!(
            p.published_date,
            chrono::NaiveDate::from_ymd_opt(2017, 6, 12)
        );
        assert_eq!(
            p.updated_date,
            chrono::NaiveDate::from_ymd_opt(2023, 8, 2)
        );
        assert_eq!(p.pdf_url, "http://arxiv.org/pdf/1706.03762v7");
        assert_eq!(p.landing_url, "http://arxiv.org/abs/1706.03762v7");
        assert_eq!(
            p.extra.get("journal_ref").and_then(Value::as_str),
            Some("NeurIPS 2017")
        );
        assert!(p.abstract_text.starts_with("The dominant sequence"));
        assert!(!p.abstract_text.contains('\n'));
    }

    #[test]
    fn test_entry_without_title_is_dropped() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry><id>http://arxiv.org/abs/2301.00001v1</id></entry>
</feed>"#;
        assert!(parse_atom_feed(xml).unwrap().is_empty());
    }

    #[test]
    fn test_build_query_with_date_range() {
        let filters = SearchFilters {
            date_from: chrono::NaiveDate::from_ymd_opt(2024, 1, 1),
            date_to: chrono::NaiveDate::from_ymd_opt(2024, 12, 31),
        };
        let q = build_query("machine learning", &filters);
        assert!(q.starts_with("all:machine%20learning"));
        assert!(q.contains("submittedDate:[202401010000+TO+202412312359]"));
    }

    #[test]
    fn test_build_query_without_dates_has_no_filter() {
        let q = build_query("qcd", &SearchFilters::default());
        assert_eq!(q, "all:qcd");
    }
}
