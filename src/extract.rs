//! Batch entry points: OCR a tree of page images, or run a list of prompts.
//!
//! Both entry points hand their per-item network call to
//! [`BatchInvoker::invoke_all`] and then work on the ordered results, so page
//! `n` of a document always lands in `page_{n}.txt` no matter which OCR call
//! finished first.
//!
//! ## Output layout
//!
//! ```text
//! out_dir/
//!  ├─ report/            one folder per document
//!  │   ├─ page_1.txt     cleaned OCR text; empty when the page failed
//!  │   ├─ page_2.txt
//!  │   └─ lang.txt       detected language code
//!  └─ …
//! ```
//!
//! The combined document is assembled from the per-page texts; see
//! [`combine_documents`].

use crate::error::{BatchError, RequestError};
use crate::invoker::BatchInvoker;
use crate::output::{BatchOutput, BatchStats};
use crate::pipeline::chat::{ChatClient, ChatPrompt};
use crate::pipeline::input::{self, DocumentInput};
use crate::pipeline::lang::{detect_document_language, Language};
use crate::pipeline::ocr::OcrClient;
use crate::pipeline::postprocess;
use crate::request::Request;
use serde::Serialize;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Width the document title is centred in.
pub const TITLE_WIDTH: usize = 80;

/// Text extracted from one document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentOutput {
    /// Document name, used as its title in the combined output.
    pub name: String,
    /// Folder holding `page_N.txt` and `lang.txt`.
    pub folder: PathBuf,
    /// Cleaned text per page in reading order; failed pages are empty.
    pub pages: Vec<String>,
    /// Pages whose OCR failed, in page order.
    pub failures: Vec<PageFailure>,
    pub language: Language,
    pub stats: BatchStats,
}

/// A page that could not be recognised.
#[derive(Debug, Clone, Serialize)]
pub struct PageFailure {
    /// 1-based page position.
    pub page: usize,
    pub error: RequestError,
}

/// Everything produced by [`extract_documents`].
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionOutput {
    pub documents: Vec<DocumentOutput>,
    /// The combined text of every document.
    pub combined: String,
    pub total_duration_ms: u64,
}

impl ExtractionOutput {
    pub fn total_pages(&self) -> usize {
        self.documents.iter().map(|d| d.pages.len()).sum()
    }

    pub fn failed_pages(&self) -> usize {
        self.documents.iter().map(|d| d.failures.len()).sum()
    }
}

// ── Assembly helpers ─────────────────────────────────────────────────────

/// Centre `name` in [`TITLE_WIDTH`] columns. Longer titles are left as-is.
pub fn format_title_line(name: &str) -> String {
    let title = name.trim();
    if title.chars().count() >= TITLE_WIDTH {
        return title.to_string();
    }
    format!("{:^width$}", title, width = TITLE_WIDTH)
}

/// Pick a unique output folder name for a document.
///
/// Names are compared case-insensitively; clashes get `_1`, `_2`, …
/// appended. A blank name becomes `pdf`.
pub fn resolve_output_folder(name: &str, used: &mut HashSet<String>) -> String {
    let base = match name.trim() {
        "" => "pdf",
        n => n,
    };
    let mut candidate = base.to_string();
    let mut suffix = 1;
    while used.contains(&candidate.to_lowercase()) {
        candidate = format!("{base}_{suffix}");
        suffix += 1;
    }
    used.insert(candidate.to_lowercase());
    candidate
}

/// Join documents into one text.
///
/// Each document starts with its centred title line followed by its
/// non-empty pages, one per line. Documents are separated by a blank line.
pub fn combine_documents(documents: &[DocumentOutput]) -> String {
    documents
        .iter()
        .map(|doc| {
            let body: Vec<&str> = doc
                .pages
                .iter()
                .map(|p| p.trim())
                .filter(|p| !p.is_empty())
                .collect();
            format!("{}\n{}", format_title_line(&doc.name), body.join("\n"))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ── OCR entry points ─────────────────────────────────────────────────────

/// OCR one document and write its page files into `folder`.
///
/// Fails with [`BatchError::AllRequestsFailed`] when the document has pages
/// and none of them could be recognised; the (empty) page files and
/// `lang.txt` are still written first.
pub async fn extract_document(
    doc: &DocumentInput,
    folder: &Path,
    client: &OcrClient,
    invoker: &BatchInvoker,
) -> Result<DocumentOutput, BatchError> {
    let output = ocr_document(doc, folder, client, invoker).await?;
    if output.stats.total > 0 && output.stats.succeeded == 0 {
        return Err(all_failed(output.stats.total, &[output], invoker));
    }
    Ok(output)
}

/// OCR every document under `input_dir` into `out_dir`.
///
/// Documents run one after another; the pages of each document run
/// concurrently through `invoker`. A document whose pages all fail is kept
/// (with empty pages) as long as some page somewhere succeeded.
pub async fn extract_documents(
    input_dir: &Path,
    out_dir: &Path,
    client: &OcrClient,
    invoker: &BatchInvoker,
) -> Result<ExtractionOutput, BatchError> {
    let start = Instant::now();
    let inputs = input::resolve_documents(input_dir)?;
    info!(
        "Extracting {} documents from {}",
        inputs.len(),
        input_dir.display()
    );

    create_dir(out_dir).await?;

    let mut used = HashSet::new();
    let mut documents = Vec::with_capacity(inputs.len());
    for doc in &inputs {
        let folder = out_dir.join(resolve_output_folder(&doc.name, &mut used));
        let output = ocr_document(doc, &folder, client, invoker).await?;
        if output.stats.total > 0 && output.stats.succeeded == 0 {
            warn!("Document '{}': every page failed", output.name);
        }
        documents.push(output);
    }

    let total: usize = documents.iter().map(|d| d.stats.total).sum();
    let succeeded: usize = documents.iter().map(|d| d.stats.succeeded).sum();
    if total > 0 && succeeded == 0 {
        return Err(all_failed(total, &documents, invoker));
    }

    let combined = combine_documents(&documents);
    let total_duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Extraction complete: {}/{} pages across {} documents, {}ms",
        succeeded,
        total,
        documents.len(),
        total_duration_ms
    );

    Ok(ExtractionOutput {
        documents,
        combined,
        total_duration_ms,
    })
}

/// Run [`extract_documents`] and write the combined text to `combined_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn extract_to_file(
    input_dir: &Path,
    out_dir: &Path,
    combined_path: &Path,
    client: &OcrClient,
    invoker: &BatchInvoker,
) -> Result<ExtractionOutput, BatchError> {
    let output = extract_documents(input_dir, out_dir, client, invoker).await?;
    write_atomic(combined_path, &output.combined).await?;
    info!("Combined text written to {}", combined_path.display());
    Ok(output)
}

// ── Chat entry point ─────────────────────────────────────────────────────

/// Send every prompt through `client`, results in prompt order.
pub async fn chat_batch(
    prompts: Vec<Request<ChatPrompt>>,
    client: &ChatClient,
    invoker: &BatchInvoker,
) -> BatchOutput<String> {
    invoker
        .invoke_all(prompts, |request| {
            let messages = request.payload.messages();
            async move { client.complete(&messages).await }
        })
        .await
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn ocr_document(
    doc: &DocumentInput,
    folder: &Path,
    client: &OcrClient,
    invoker: &BatchInvoker,
) -> Result<DocumentOutput, BatchError> {
    info!("Document '{}': {} pages", doc.name, doc.pages.len());
    create_dir(folder).await?;

    let requests: Vec<Request<PathBuf>> = doc
        .pages
        .iter()
        .enumerate()
        .map(|(i, page)| Request::new(format!("{}/page_{}", doc.name, i + 1), page.path.clone()))
        .collect();

    let batch = invoker
        .invoke_all(requests, |request| {
            let path = request.payload.clone();
            async move { client.recognize_path(&path).await }
        })
        .await;

    let mut pages = Vec::with_capacity(batch.results.len());
    let mut failures = Vec::new();
    for (i, result) in batch.results.iter().enumerate() {
        let text = match &result.outcome {
            Ok(raw) => postprocess::clean_text(raw),
            Err(e) => {
                warn!("{}", e);
                failures.push(PageFailure {
                    page: i + 1,
                    error: e.clone(),
                });
                String::new()
            }
        };
        write_file(&folder.join(format!("page_{}.txt", i + 1)), &text).await?;
        pages.push(text);
    }

    let language = detect_document_language(&pages);
    write_file(&folder.join("lang.txt"), language.code()).await?;
    debug!("Document '{}': language {}", doc.name, language);

    Ok(DocumentOutput {
        name: doc.name.clone(),
        folder: folder.to_path_buf(),
        pages,
        failures,
        language,
        stats: batch.stats,
    })
}

fn all_failed(total: usize, documents: &[DocumentOutput], invoker: &BatchInvoker) -> BatchError {
    let first_error = documents
        .iter()
        .flat_map(|d| d.failures.iter())
        .next()
        .map(|f| f.error.to_string())
        .unwrap_or_else(|| "Unknown error".to_string());
    BatchError::AllRequestsFailed {
        total,
        attempts: invoker.config().retry.max_attempts,
        first_error,
    }
}

async fn create_dir(dir: &Path) -> Result<(), BatchError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| BatchError::OutputWriteFailed {
            path: dir.to_path_buf(),
            source: e,
        })
}

async fn write_file(path: &Path, contents: &str) -> Result<(), BatchError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| BatchError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Write to `{path}.tmp`, then rename over `path`.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<(), BatchError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir(parent).await?;
    }

    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);

    write_file(&tmp_path, contents).await?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| BatchError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}
