//! Image encoding: raw page bytes → base64 for JSON/form request bodies.
//!
//! Both vendor APIs take images inline as base64. The OCR endpoint wants the
//! bare base64 string in its form body; the chat endpoint wants a
//! `data:` URI in an `image_url` content part.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;

/// Detected image container, from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
}

impl ImageKind {
    /// Sniff the first bytes of a file.
    pub fn from_magic(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"\x89PNG") {
            Some(ImageKind::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageKind::Jpeg)
        } else {
            None
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpeg",
        }
    }
}

/// Base64-encode image bytes.
pub fn encode_base64(bytes: &[u8]) -> String {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded image → {} bytes base64", b64.len());
    b64
}

/// Build a `data:` URI for a chat `image_url` part. Unknown formats are
/// labelled PNG.
pub fn to_data_url(bytes: &[u8]) -> String {
    let mime = ImageKind::from_magic(bytes)
        .unwrap_or(ImageKind::Png)
        .mime_type();
    format!("data:{};base64,{}", mime, encode_base64(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n";

    #[test]
    fn sniff_magic() {
        assert_eq!(ImageKind::from_magic(PNG_HEADER), Some(ImageKind::Png));
        assert_eq!(ImageKind::from_magic(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_magic(b"%PDF"), None);
        assert_eq!(ImageKind::from_magic(b""), None);
    }

    #[test]
    fn encode_is_valid_base64() {
        let b64 = encode_base64(b"hello");
        assert_eq!(b64, "aGVsbG8=");
        assert_eq!(STANDARD.decode(&b64).expect("valid base64"), b"hello");
    }

    #[test]
    fn data_url_carries_mime() {
        let url = to_data_url(PNG_HEADER);
        assert!(url.starts_with("data:image/png;base64,"), "got: {url}");
    }
}
