use std::path::PathBuf;
use std::sync::Arc;

use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters,
    model::*, tool, tool_handler, tool_router,
    transport::stdio, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

mod config;
mod paper;
mod pdf;
mod resolve;
mod sources;

use config::Config;
use paper::{Paper, SerializeOptions};
use sources::{
    arxiv::ArxivClient, crossref::CrossRefClient, openalex::OpenAlexClient,
    scholar::GoogleScholarClient, parse_date_arg, PaperSource, SearchFilters,
};

const SUPPORTED_SOURCES: &str = "openalex, crossref, arxiv, google_scholar";

// ── Parameter structs ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchParams {
    #[schemars(description = "Search query string")]
    query: String,
    #[schemars(description = "Maximum results to return (default 10, max 100)")]
    max_results: Option<u32>,
    #[schemars(description = "Max chars for abstract: 0 omits, -1 full (default 200)")]
    abstract_limit: Option<i64>,
    #[schemars(description = "Start date YYYY-MM-DD")]
    date_from: Option<String>,
    #[schemars(description = "End date YYYY-MM-DD")]
    date_to: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GetWorkParams {
    #[schemars(description = "OpenAlex work ID (e.g. W2741809807, bare digits, or full URI)")]
    id: String,
    #[schemars(description = "Max chars for abstract: 0 omits, -1 full (default 200)")]
    abstract_limit: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GetByDoiParams {
    #[schemars(description = "DOI, with or without https://doi.org/ or doi: prefix")]
    doi: String,
    #[schemars(description = "Max chars for abstract: 0 omits, -1 full (default 200)")]
    abstract_limit: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RelationParams {
    #[schemars(description = "OpenAlex work ID to look up")]
    id: String,
    #[schemars(description = "Maximum results to return (default 25, max 200)")]
    max_results: Option<u32>,
    #[schemars(description = "Max chars for abstract: 0 omits, -1 full (default 200)")]
    abstract_limit: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct AuthorSearchParams {
    #[schemars(description = "Author name to search for (e.g. 'Yann LeCun', 'Hinton')")]
    name: String,
    #[schemars(description = "Maximum authors to return (default 10, max 100)")]
    max_results: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct AuthorWorksParams {
    #[schemars(description = "OpenAlex author ID (e.g. A5015666723, bare digits, or full URI)")]
    author_id: String,
    #[schemars(description = "Maximum results to return (default 25, max 200)")]
    max_results: Option<u32>,
    #[schemars(description = "Max chars for abstract: 0 omits, -1 full (default 200)")]
    abstract_limit: Option<i64>,
    #[schemars(description = "Start date YYYY-MM-DD")]
    date_from: Option<String>,
    #[schemars(description = "End date YYYY-MM-DD")]
    date_to: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct PaperFileParams {
    #[schemars(description = "Paper identifier (format depends on source)")]
    id: String,
    #[schemars(description = "Source platform (openalex, crossref, arxiv, google_scholar)")]
    source: String,
    #[schemars(description = "Directory for downloaded PDFs (default from config)")]
    save_path: Option<String>,
}

// ── Server ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ScholarSearchServer {
    tool_router: ToolRouter<Self>,
    config: Arc<Config>,
    openalex: Arc<OpenAlexClient>,
    crossref: Arc<CrossRefClient>,
    arxiv: Arc<ArxivClient>,
    scholar: Arc<GoogleScholarClient>,
}

#[tool_router]
impl ScholarSearchServer {
    pub fn create() -> Self {
        let config = Config::from_env();

        let openalex = Arc::new(OpenAlexClient::new(config.contact_email.clone()));
        let crossref = Arc::new(CrossRefClient::new(config.contact_email.clone()));
        let arxiv = Arc::new(ArxivClient::new());
        let scholar = Arc::new(GoogleScholarClient::new());

        tracing::info!(
            "Initialized 4 paper sources, download_dir={}",
            config.download_dir.display()
        );

        Self {
            tool_router: Self::tool_router(),
            config: Arc::new(config),
            openalex,
            crossref,
            arxiv,
            scholar,
        }
    }

    fn source_by_name(&self, name: &str) -> Option<Arc<dyn PaperSource>> {
        match name.to_lowercase().as_str() {
            "openalex" => Some(self.openalex.clone()),
            "crossref" => Some(self.crossref.clone()),
            "arxiv" => Some(self.arxiv.clone()),
            "google_scholar" => Some(self.scholar.clone()),
            _ => None,
        }
    }

    /// Fixed DOI resolution chain, ordered by metadata richness: OpenAlex
    /// carries citation counts and topics, CrossRef is the registry of record.
    fn doi_chain(&self) -> Vec<Arc<dyn PaperSource>> {
        vec![self.openalex.clone(), self.crossref.clone()]
    }

    fn save_dir(&self, save_path: Option<&str>) -> PathBuf {
        save_path
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.download_dir.clone())
    }

    async fn run_search(
        &self,
        source: &dyn PaperSource,
        params: &SearchParams,
    ) -> Result<CallToolResult, McpError> {
        let max = params.max_results.unwrap_or(10).min(100);
        let filters = SearchFilters {
            date_from: parse_date_arg("date_from", params.date_from.as_deref()),
            date_to: parse_date_arg("date_to", params.date_to.as_deref()),
        };
        match source.search(&params.query, max, &filters).await {
            Ok(papers) => render_papers(&papers, params.abstract_limit),
            Err(e) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Error searching {}: {}",
                source.name(),
                e
            ))])),
        }
    }

    #[tool(description = "List available paper sources and their politeness setup")]
    async fn list_sources(&self) -> Result<CallToolResult, McpError> {
        let statuses = self.config.source_status();
        let json = serde_json::to_string_pretty(&statuses)
            .map_err(|e| McpError::internal_error(format!("{}", e), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(description = "Search scholarly works on OpenAlex (240M+ works, citation counts, topics)")]
    async fn search_openalex(
        &self,
        Parameters(params): Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        self.run_search(self.openalex.as_ref(), &params).await
    }

    #[tool(description = "Search scholarly works on CrossRef (DOI registry)")]
    async fn search_crossref(
        &self,
        Parameters(params): Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        self.run_search(self.crossref.as_ref(), &params).await
    }

    #[tool(description = "Search preprints on arXiv")]
    async fn search_arxiv(
        &self,
        Parameters(params): Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        self.run_search(self.arxiv.as_ref(), &params).await
    }

    #[tool(description = "Search Google Scholar (scraped; date filters use year only)")]
    async fn search_google_scholar(
        &self,
        Parameters(params): Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        self.run_search(self.scholar.as_ref(), &params).await
    }

    #[tool(description = "Get a specific work from OpenAlex by its ID")]
    async fn get_openalex_work(
        &self,
        Parameters(params): Parameters<GetWorkParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.openalex.get_by_id(&params.id).await {
            Ok(Some(paper)) => render_paper(&paper, params.abstract_limit),
            Ok(None) => Ok(CallToolResult::success(vec![Content::text(format!(
                "No OpenAlex work found for: {}",
                params.id
            ))])),
            Err(e) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Error fetching work {}: {}",
                params.id, e
            ))])),
        }
    }

    #[tool(description = "Resolve a DOI to a paper record (OpenAlex first, CrossRef fallback)")]
    async fn get_paper_by_doi(
        &self,
        Parameters(params): Parameters<GetByDoiParams>,
    ) -> Result<CallToolResult, McpError> {
        match resolve::resolve_doi(&self.doi_chain(), &params.doi).await {
            Some(paper) => render_paper(&paper, params.abstract_limit),
            None => Ok(CallToolResult::success(vec![Content::text(format!(
                "No record found for DOI: {}",
                params.doi
            ))])),
        }
    }

    #[tool(description = "Search for authors by name on OpenAlex")]
    async fn search_authors(
        &self,
        Parameters(params): Parameters<AuthorSearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let max = params.max_results.unwrap_or(10).min(100);
        match self.openalex.search_authors(&params.name, max).await {
            Ok(authors) => {
                let json = serde_json::to_string_pretty(&authors)
                    .map_err(|e| McpError::internal_error(format!("{}", e), None))?;
                Ok(CallToolResult::success(vec![Content::text(json)]))
            }
            Err(e) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Error searching authors: {}",
                e
            ))])),
        }
    }

    #[tool(description = "Get works by an author (OpenAlex author ID), sorted by citations")]
    async fn get_author_papers(
        &self,
        Parameters(params): Parameters<AuthorWorksParams>,
    ) -> Result<CallToolResult, McpError> {
        let max = params.max_results.unwrap_or(25).min(200);
        let filters = SearchFilters {
            date_from: parse_date_arg("date_from", params.date_from.as_deref()),
            date_to: parse_date_arg("date_to", params.date_to.as_deref()),
        };
        match self.openalex.author_works(&params.author_id, max, &filters).await {
            Ok(papers) => render_papers(&papers, params.abstract_limit),
            Err(e) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Error fetching author works: {}",
                e
            ))])),
        }
    }

    #[tool(description = "Get works cited by a paper (outgoing references), sorted by citations")]
    async fn get_references(
        &self,
        Parameters(params): Parameters<RelationParams>,
    ) -> Result<CallToolResult, McpError> {
        let max = params.max_results.unwrap_or(25).min(200);
        match self.openalex.get_references(&params.id, max).await {
            Ok(papers) => render_papers(&papers, params.abstract_limit),
            Err(e) => {
                tracing::warn!("get_references failed for {}: {}", params.id, e);
                render_papers(&[], params.abstract_limit)
            }
        }
    }

    #[tool(description = "Get works that cite a paper (incoming citations), sorted by citations")]
    async fn get_citations(
        &self,
        Parameters(params): Parameters<RelationParams>,
    ) -> Result<CallToolResult, McpError> {
        let max = params.max_results.unwrap_or(25).min(200);
        match self.openalex.get_citations(&params.id, max).await {
            Ok(papers) => render_papers(&papers, params.abstract_limit),
            Err(e) => {
                tracing::warn!("get_citations failed for {}: {}", params.id, e);
                render_papers(&[], params.abstract_limit)
            }
        }
    }

    #[tool(description = "Download the PDF of a paper from a supported source")]
    async fn download_paper(
        &self,
        Parameters(params): Parameters<PaperFileParams>,
    ) -> Result<CallToolResult, McpError> {
        let Some(source) = self.source_by_name(&params.source) else {
            return Ok(CallToolResult::success(vec![Content::text(format!(
                "Unknown source: {}. Supported: {}",
                params.source, SUPPORTED_SOURCES
            ))]));
        };
        let dir = self.save_dir(params.save_path.as_deref());
        match source.download_pdf(&params.id, &dir).await {
            Ok(path) => Ok(CallToolResult::success(vec![Content::text(
                path.display().to_string(),
            )])),
            Err(e) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Error downloading paper: {}",
                e
            ))])),
        }
    }

    #[tool(description = "Download (if needed) and extract the text content of a paper PDF")]
    async fn read_paper(
        &self,
        Parameters(params): Parameters<PaperFileParams>,
    ) -> Result<CallToolResult, McpError> {
        let Some(source) = self.source_by_name(&params.source) else {
            return Ok(CallToolResult::success(vec![Content::text(format!(
                "Unknown source: {}. Supported: {}",
                params.source, SUPPORTED_SOURCES
            ))]));
        };
        let dir = self.save_dir(params.save_path.as_deref());
        match source.read_text(&params.id, &dir).await {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(e) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Error reading paper: {}",
                e
            ))])),
        }
    }
}

fn serialize_opts(abstract_limit: Option<i64>) -> SerializeOptions {
    SerializeOptions {
        abstract_limit: abstract_limit.unwrap_or(200),
        compact: true,
    }
}

fn render_papers(papers: &[Paper], abstract_limit: Option<i64>) -> Result<CallToolResult, McpError> {
    let opts = serialize_opts(abstract_limit);
    let maps: Vec<_> = papers.iter().map(|p| p.to_output(&opts)).collect();
    let json = serde_json::to_string_pretty(&maps)
        .map_err(|e| McpError::internal_error(format!("{}", e), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn render_paper(paper: &Paper, abstract_limit: Option<i64>) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(&paper.to_output(&serialize_opts(abstract_limit)))
        .map_err(|e| McpError::internal_error(format!("{}", e), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[tool_handler]
impl ServerHandler for ScholarSearchServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Search and retrieve scholarly paper metadata across OpenAlex, \
                 CrossRef, arXiv, and Google Scholar. Resolve DOIs, follow \
                 citation links, and download or read open-access PDFs."
                    .into(),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Starting scholar-search MCP server");

    let server = ScholarSearchServer::create();
    let service = server.serve(stdio()).await?;
    service.waiting().await?;

    Ok(())
}
