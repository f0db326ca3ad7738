use std::sync::Arc;

use crate::paper::Paper;
use crate::sources::{normalize_doi, PaperSource};

/// Resolve a single DOI through a fixed-priority chain of providers,
/// returning the first hit. The chain order reflects metadata richness, not
/// configuration: providers exposing citation counts and topic categories
/// come first. Provider failures are logged and skipped; `None` means every
/// provider came up empty.
pub async fn resolve_doi(chain: &[Arc<dyn PaperSource>], doi: &str) -> Option<Paper> {
    let doi = normalize_doi(doi);
    for source in chain {
        match source.get_by_doi(&doi).await {
            Ok(Some(paper)) => return Some(paper),
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("{} failed to resolve DOI {}: {}", source.name(), doi, e);
                continue;
            }
        }
    }
    None
}
