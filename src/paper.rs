use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Normalized, provider-agnostic representation of one scholarly work.
///
/// Every provider client populates this shape. `id` and `source` are always
/// non-empty: an item that cannot be assigned an id is dropped at parse time
/// instead of being constructed. Collection fields default to empty vectors,
/// never to an absent value, so callers only ever branch on emptiness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paper {
    /// Provider-scoped unique identifier. The format varies by provider and
    /// is never reinterpreted across providers.
    pub id: String,
    pub title: String,
    /// Author names in appearance order.
    pub authors: Vec<String>,
    pub abstract_text: String,
    /// Bare `10.xxxx/...` DOI; any URL or `doi:` prefix is stripped before
    /// storage. Empty when unknown.
    pub doi: String,
    /// When only a year is known, defaults to January 1st of that year.
    pub published_date: Option<NaiveDate>,
    pub updated_date: Option<NaiveDate>,
    /// Direct full-text link, empty if none is known.
    pub pdf_url: String,
    /// Link to the provider's page for the work.
    pub landing_url: String,
    /// Originating provider tag (e.g. "openalex", "google_scholar").
    pub source: String,
    /// Provider-defined topical tags, capped at a small count.
    pub categories: Vec<String>,
    pub keywords: Vec<String>,
    /// 0 when unknown.
    pub citation_count: u32,
    /// Identifiers of works this one cites; empty unless explicitly fetched.
    pub reference_ids: Vec<String>,
    /// Provider-specific attributes not otherwise modeled.
    pub extra: Map<String, Value>,
}

/// Controls how a [`Paper`] is rendered into a key/value output map.
#[derive(Debug, Clone, Copy)]
pub struct SerializeOptions {
    /// Max characters for the abstract: 0 omits the field, a positive N
    /// truncates with a trailing `...`, negative includes it unmodified.
    pub abstract_limit: i64,
    /// When set, keys whose values are empty or absent are omitted entirely.
    pub compact: bool,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            abstract_limit: 200,
            compact: true,
        }
    }
}

impl Paper {
    /// Render into a transmission-ready map. List fields are joined with
    /// `"; "`, dates use `YYYY-MM-DD`. Output is deterministic for a given
    /// record and options.
    pub fn to_output(&self, opts: &SerializeOptions) -> Map<String, Value> {
        let mut out = Map::new();
        put_text(&mut out, "id", &self.id, opts.compact);
        put_text(&mut out, "title", &self.title, opts.compact);
        put_list(&mut out, "authors", &self.authors, opts.compact);

        if opts.abstract_limit != 0 {
            let text = truncate_abstract(&self.abstract_text, opts.abstract_limit);
            put_text(&mut out, "abstract", &text, opts.compact);
        } else if !opts.compact {
            out.insert("abstract".into(), Value::Null);
        }

        put_text(&mut out, "doi", &self.doi, opts.compact);
        put_date(&mut out, "published_date", self.published_date, opts.compact);
        put_date(&mut out, "updated_date", self.updated_date, opts.compact);
        put_text(&mut out, "pdf_url", &self.pdf_url, opts.compact);
        put_text(&mut out, "landing_url", &self.landing_url, opts.compact);
        put_text(&mut out, "source", &self.source, opts.compact);
        put_list(&mut out, "categories", &self.categories, opts.compact);
        put_list(&mut out, "keywords", &self.keywords, opts.compact);

        if self.citation_count > 0 || !opts.compact {
            out.insert("citation_count".into(), Value::from(self.citation_count));
        }
        put_list(&mut out, "reference_ids", &self.reference_ids, opts.compact);

        if !self.extra.is_empty() || !opts.compact {
            out.insert("extra".into(), Value::Object(self.extra.clone()));
        }
        out
    }
}

fn truncate_abstract(text: &str, limit: i64) -> String {
    if limit > 0 && text.chars().count() > limit as usize {
        let cut: String = text.chars().take(limit as usize).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

fn put_text(out: &mut Map<String, Value>, key: &str, value: &str, compact: bool) {
    if !value.is_empty() {
        out.insert(key.into(), Value::String(value.to_string()));
    } else if !compact {
        out.insert(key.into(), Value::Null);
    }
}

fn put_list(out: &mut Map<String, Value>, key: &str, values: &[String], compact: bool) {
    if !values.is_empty() {
        out.insert(key.into(), Value::String(values.join("; ")));
    } else if !compact {
        out.insert(key.into(), Value::Null);
    }
}

fn put_date(out: &mut Map<String, Value>, key: &str, date: Option<NaiveDate>, compact: bool) {
    match date {
        Some(d) => {
            out.insert(key.into(), Value::String(d.format("%Y-%m-%d").to_string()));
        }
        None if !compact => {
            out.insert(key.into(), Value::Null);
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Paper {
        Paper {
            id: "W2741809807".into(),
            title: "The state of OA".into(),
            authors: vec!["Heather Piwowar".into(), "Jason Priem".into()],
            abstract_text: "Despite growing interest in open access, relatively little is known."
                .into(),
            doi: "10.7717/peerj.4375".into(),
            published_date: NaiveDate::from_ymd_opt(2018, 2, 13),
            updated_date: None,
            pdf_url: "https://peerj.com/articles/4375.pdf".into(),
            landing_url: "https://openalex.org/W2741809807".into(),
            source: "openalex".into(),
            categories: vec!["Library and Information Sciences".into()],
            keywords: vec![],
            citation_count: 1044,
            reference_ids: vec![],
            extra: Map::new(),
        }
    }

    #[test]
    fn test_compact_omits_empty_fields() {
        let out = sample().to_output(&SerializeOptions::default());
        assert!(out.contains_key("id"));
        assert!(out.contains_key("doi"));
        assert!(!out.contains_key("keywords"));
        assert!(!out.contains_key("updated_date"));
        assert!(!out.contains_key("reference_ids"));
        assert!(!out.contains_key("extra"));
    }

    #[test]
    fn test_non_compact_keeps_empty_fields_as_null() {
        let out = sample().to_output(&SerializeOptions {
            abstract_limit: -1,
            compact: false,
        });
        assert_eq!(out.get("keywords"), Some(&Value::Null));
        assert_eq!(out.get("updated_date"), Some(&Value::Null));
    }

    #[test]
    fn test_authors_joined_with_semicolon() {
        let out = sample().to_output(&SerializeOptions::default());
        assert_eq!(
            out.get("authors").and_then(Value::as_str),
            Some("Heather Piwowar; Jason Priem")
        );
    }

    #[test]
    fn test_date_rendered_iso() {
        let out = sample().to_output(&SerializeOptions::default());
        assert_eq!(
            out.get("published_date").and_then(Value::as_str),
            Some("2018-02-13")
        );
    }

    #[test]
    fn test_abstract_limit_zero_omits() {
        let out = sample().to_output(&SerializeOptions {
            abstract_limit: 0,
            compact: true,
        });
        assert!(!out.contains_key("abstract"));
    }

    #[test]
    fn test_abstract_limit_truncates_with_ellipsis() {
        let out = sample().to_output(&SerializeOptions {
            abstract_limit: 10,
            compact: true,
        });
        assert_eq!(
            out.get("abstract").and_then(Value::as_str),
            Some("Despite gr...")
        );
    }

    #[test]
    fn test_abstract_limit_negative_keeps_full_text() {
        let paper = sample();
        let out = paper.to_output(&SerializeOptions {
            abstract_limit: -1,
            compact: true,
        });
        assert_eq!(
            out.get("abstract").and_then(Value::as_str),
            Some(paper.abstract_text.as_str())
        );
    }

    #[test]
    fn test_serialization_is_idempotent() {
        let paper = sample();
        let opts = SerializeOptions::default();
        let a = serde_json::to_string(&paper.to_output(&opts)).unwrap();
        let b = serde_json::to_string(&paper.to_output(&opts)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_citations_omitted_in_compact_mode() {
        let mut paper = sample();
        paper.citation_count = 0;
        let out = paper.to_output(&SerializeOptions::default());
        assert!(!out.contains_key("citation_count"));
    }
}
