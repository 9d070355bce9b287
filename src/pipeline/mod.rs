//! Pipeline stages for batch page OCR and chat prompting.
//!
//! Each submodule implements exactly one step. None of them retries or
//! schedules work; that belongs to [`crate::invoker`], which drives these
//! stages as its per-request send function.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ encode ──▶ sign ──▶ ocr ──▶ postprocess ──▶ lang
//! (pages)   (base64)   (HMAC)   (HTTP)   (cleanup)      (detect)
//! ```
//!
//! 1. [`input`]  — discover document directories and validate page images
//! 2. [`encode`] — base64-wrap page bytes for the request body
//! 3. [`sign`]   — HMAC-SHA256 request signing for the OCR service
//! 4. [`ocr`]    — one signed OCR call per page; network I/O lives here
//! 5. [`postprocess`] — deterministic text-cleanup rules
//! 6. [`lang`]   — dominant-language detection per document
//!
//! [`chat`] is the other send function: one chat-completion call per prompt.

pub mod chat;
pub mod encode;
pub mod input;
pub mod lang;
pub mod ocr;
pub mod postprocess;
pub mod sign;
