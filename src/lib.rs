//! # ocrbatch
//!
//! Run many independent remote calls (OCR requests, chat prompts) through a
//! bounded worker pool with retries, and get the results back in input order.
//!
//! ## Why this crate?
//!
//! Scanned documents are OCR'd one page image per request. Sending pages one
//! at a time is slow; sending all of them at once trips rate limits; and the
//! pages still have to come back in reading order. [`BatchInvoker`] caps the
//! number of in-flight calls, retries failed calls with a fixed or
//! exponential backoff, and puts each result back at its request's index.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input dir
//!  │
//!  ├─ 1. Input    one folder per document, page_N.png/jpg inside
//!  ├─ 2. Invoke   ≤ W concurrent OCR calls, retries with backoff
//!  ├─ 3. Clean    deterministic text cleanup per page
//!  ├─ 4. Detect   dominant language per document
//!  └─ 5. Output   page_N.txt + lang.txt per document, combined text file
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ocrbatch::{numbered, BatchConfig, BatchInvoker, InvokeError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BatchConfig::builder()
//!         .max_workers(4)
//!         .max_attempts(3)
//!         .backoff_secs(1.0)
//!         .build()?;
//!     let invoker = BatchInvoker::new(config);
//!
//!     let requests = numbered(vec!["a", "b", "c"]);
//!     let output = invoker
//!         .invoke_all(requests, |r| {
//!             let word = r.payload;
//!             async move { Ok::<_, InvokeError>(word.to_uppercase()) }
//!         })
//!         .await;
//!
//!     for result in &output.results {
//!         println!("{} -> {:?}", result.id, result.outcome);
//!     }
//!     eprintln!("{}/{} succeeded", output.stats.succeeded, output.stats.total);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ocrbatch` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! ocrbatch = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod invoker;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod request;
pub mod retry;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{BatchConfig, BatchConfigBuilder, ChatConfig, ImageMode, OcrConfig};
pub use error::{BatchError, InvokeError, RequestError};
pub use extract::{
    chat_batch, combine_documents, extract_document, extract_documents, extract_to_file,
    DocumentOutput, ExtractionOutput, PageFailure,
};
pub use invoker::{invoke_all, BatchInvoker};
pub use output::{BatchOutput, BatchStats, RequestResult};
pub use pipeline::chat::{ChatClient, ChatPrompt};
pub use pipeline::lang::Language;
pub use pipeline::ocr::OcrClient;
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use request::{numbered, Request};
pub use retry::{Backoff, RetryPolicy};
pub use stream::{invoke_stream, ResultStream};
