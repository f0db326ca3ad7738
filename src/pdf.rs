//! PDF text extraction.
//!
//! Tries the `pdftotext` binary (poppler) first since it handles academic
//! layouts best, then falls back to the pure-Rust `pdf-extract` crate when
//! the binary is not installed.

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

const PDFTOTEXT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("pdftotext failed: {0}")]
    Tool(String),
    #[error("text extraction failed: {0}")]
    Extract(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Extract text from a PDF file.
pub async fn extract_text(path: &Path) -> Result<String, PdfError> {
    match extract_with_pdftotext(path).await {
        Ok(Some(text)) => return Ok(text),
        Ok(None) => {}
        Err(e) => tracing::debug!("pdftotext unavailable: {}", e),
    }
    extract_with_library(path).await
}

/// Run `pdftotext -layout`. Returns `Ok(None)` when the binary is missing or
/// the conversion fails, so the caller can fall back.
async fn extract_with_pdftotext(path: &Path) -> Result<Option<String>, PdfError> {
    let child = Command::new("pdftotext")
        .args(["-layout", "-enc", "UTF-8"])
        .arg(path)
        .arg("-")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();
    let child = match child {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let output = tokio::time::timeout(PDFTOTEXT_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| PdfError::Tool("timed out".to_string()))??;
    if !output.status.success() {
        return Ok(None);
    }
    Ok(Some(
        String::from_utf8_lossy(&output.stdout).trim().to_string(),
    ))
}

async fn extract_with_library(path: &Path) -> Result<String, PdfError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text(&path)
            .map(|text| text.trim().to_string())
            .map_err(|e| PdfError::Extract(e.to_string()))
    })
    .await
    .map_err(|e| PdfError::Extract(e.to_string()))?
}
