use std::path::PathBuf;

/// Process configuration loaded from environment variables. Read-only after
/// construction; provider clients copy what they need at build time.
#[derive(Debug, Clone)]
pub struct Config {
    /// Contact email attached to polite-pool requests (OpenAlex, CrossRef).
    pub contact_email: Option<String>,
    /// Default directory for downloaded PDFs.
    pub download_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        let contact_email = std::env::var("SCHOLAR_SEARCH_CONTACT_EMAIL")
            .or_else(|_| std::env::var("OPENALEX_EMAIL"))
            .ok();
        let download_dir = std::env::var("SCHOLAR_SEARCH_DOWNLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./downloads"));

        Self {
            contact_email,
            download_dir,
        }
    }

    /// Describe each provider and its politeness setup.
    pub fn source_status(&self) -> Vec<SourceStatus> {
        let polite = if self.contact_email.is_some() {
            "Polite pool email set"
        } else {
            "No contact email (limited rate)"
        };
        vec![
            SourceStatus {
                name: "openalex".into(),
                note: polite.into(),
            },
            SourceStatus {
                name: "crossref".into(),
                note: polite.into(),
            },
            SourceStatus {
                name: "arxiv".into(),
                note: "No API key required; 3s between page requests".into(),
            },
            SourceStatus {
                name: "google_scholar".into(),
                note: "HTML scraping with randomized delays".into(),
            },
        ]
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub note: String,
}
