//! Input resolution: discover documents and their page images on disk.
//!
//! A batch root holds one directory per document; each document directory
//! holds its rasterised pages as `page_1.png`, `page_2.png`, … (JPEG is
//! accepted too). Pages are ordered by the number in their name, not
//! lexically, so `page_10` follows `page_9`. Every image is validated by its
//! magic bytes before anything is sent over the network, so a stray text
//! file surfaces as a clear error rather than a failed OCR call.

use crate::error::BatchError;
use crate::pipeline::encode::ImageKind;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// One validated page image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-based page number from the file name (0 when it has none).
    pub page_num: usize,
    pub path: PathBuf,
    pub kind: ImageKind,
}

/// A document directory and its pages in reading order.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    /// Directory name, used as the document title.
    pub name: String,
    pub dir: PathBuf,
    pub pages: Vec<PageImage>,
}

/// Page number encoded in a `page_N.ext` file stem; 0 when absent.
pub fn page_sort_key(path: &Path) -> usize {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.strip_prefix("page_"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn map_io(path: &Path, e: std::io::Error) -> BatchError {
    match e.kind() {
        std::io::ErrorKind::NotFound => BatchError::InputNotFound {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => BatchError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => BatchError::InputReadFailed {
            path: path.to_path_buf(),
            source: e,
        },
    }
}

/// Check an image file is readable and is PNG or JPEG.
pub fn validate_image(path: &Path) -> Result<ImageKind, BatchError> {
    let mut f = std::fs::File::open(path).map_err(|e| map_io(path, e))?;
    let mut magic = [0u8; 4];
    let n = f.read(&mut magic).map_err(|e| map_io(path, e))?;
    ImageKind::from_magic(&magic[..n]).ok_or_else(|| BatchError::NotAnImage {
        path: path.to_path_buf(),
        magic,
    })
}

/// List and validate the page images of one document directory.
pub fn resolve_document(dir: &Path) -> Result<DocumentInput, BatchError> {
    if !dir.is_dir() {
        return Err(BatchError::InputNotFound {
            path: dir.to_path_buf(),
        });
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| map_io(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && has_image_extension(p))
        .collect();
    paths.sort_by(|a, b| {
        page_sort_key(a)
            .cmp(&page_sort_key(b))
            .then_with(|| a.file_name().cmp(&b.file_name()))
    });

    let pages = paths
        .into_iter()
        .map(|path| {
            let kind = validate_image(&path)?;
            Ok(PageImage {
                page_num: page_sort_key(&path),
                path,
                kind,
            })
        })
        .collect::<Result<Vec<_>, BatchError>>()?;

    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if pages.is_empty() {
        warn!("Document '{}' has no page images", name);
    }
    debug!("Resolved document '{}': {} pages", name, pages.len());

    Ok(DocumentInput {
        name,
        dir: dir.to_path_buf(),
        pages,
    })
}

/// Resolve every document directory under `root`, sorted case-insensitively.
pub fn resolve_documents(root: &Path) -> Result<Vec<DocumentInput>, BatchError> {
    if !root.exists() {
        return Err(BatchError::InputNotFound {
            path: root.to_path_buf(),
        });
    }

    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)
        .map_err(|e| map_io(root, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    if dirs.is_empty() {
        return Err(BatchError::NoDocuments {
            path: root.to_path_buf(),
        });
    }
    dirs.sort_by_key(|p| {
        p.file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    });

    dirs.iter().map(|d| resolve_document(d)).collect()
}
