//! Volcengine `OCRNormal` client: one page image in, plain text out.
//!
//! The endpoint takes a signed, form-encoded POST and answers with
//! `{"code": 10000, "data": {"line_texts": [...]}}` on success. Any other
//! `code` is a service-level failure and is surfaced as
//! [`InvokeError::Api`] so the invoker retries it like a transport error.

use crate::config::{ImageMode, OcrConfig};
use crate::error::{retry_after_secs, BatchError, InvokeError};
use crate::pipeline::encode::encode_base64;
use crate::pipeline::sign::{sign_request, Credentials};
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const OCR_ACTION: &str = "OCRNormal";
pub const OCR_VERSION: &str = "2020-08-26";
pub const OCR_SUCCESS_CODE: i64 = 10000;

/// Raw response body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OcrResponse {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub data: Option<OcrData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OcrData {
    /// Sometimes sent as an explicit `null` for blank pages.
    #[serde(default)]
    pub line_texts: Option<Vec<String>>,
}

/// Pull the recognised text out of a response.
///
/// Non-empty lines are joined with `\n` and the result trimmed.
pub fn extract_ocr_text(response: &OcrResponse) -> Result<String, InvokeError> {
    if response.code != Some(OCR_SUCCESS_CODE) {
        let message = response
            .message
            .clone()
            .or_else(|| response.error.clone())
            .unwrap_or_default();
        return Err(InvokeError::Api {
            status: 200,
            message: format!("OCR code {:?}: {}", response.code, message),
        });
    }

    let lines: Vec<&str> = response
        .data
        .as_ref()
        .and_then(|d| d.line_texts.as_deref())
        .map(|lines| {
            lines
                .iter()
                .map(String::as_str)
                .filter(|l| !l.is_empty())
                .collect()
        })
        .unwrap_or_default();
    Ok(lines.join("\n").trim().to_string())
}

/// Client for the OCR endpoint. Cheap to clone; share one per batch.
#[derive(Debug, Clone)]
pub struct OcrClient {
    http: reqwest::Client,
    config: OcrConfig,
}

impl OcrClient {
    pub fn new(config: OcrConfig) -> Result<Self, BatchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BatchError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &OcrConfig {
        &self.config
    }

    /// Form fields for an inline image.
    pub fn body_from_bytes(&self, bytes: &[u8]) -> Vec<(String, String)> {
        let mut body = vec![("image_base64".to_string(), encode_base64(bytes))];
        self.push_options(&mut body);
        body
    }

    /// Form fields for a page file, honouring the configured [`ImageMode`].
    ///
    /// URL mode only sends `{prefix}/{file name}`; the file is not read.
    pub fn body_for_path(&self, path: &Path) -> Result<Vec<(String, String)>, InvokeError> {
        let mut body = match self.config.image_mode {
            ImageMode::Url => {
                let prefix = self.config.image_url_prefix.as_deref().ok_or_else(|| {
                    InvokeError::InvalidRequest(
                        "OCR_IMAGE_URL_PREFIX is required in image_url mode".into(),
                    )
                })?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                vec![(
                    "image_url".to_string(),
                    format!("{}/{}", prefix.trim_end_matches('/'), name),
                )]
            }
            ImageMode::Base64 => {
                let bytes = std::fs::read(path).map_err(|e| {
                    InvokeError::InvalidRequest(format!("read {}: {e}", path.display()))
                })?;
                return Ok(self.body_from_bytes(&bytes));
            }
        };
        self.push_options(&mut body);
        Ok(body)
    }

    fn push_options(&self, body: &mut Vec<(String, String)>) {
        let c = &self.config;
        let options = [
            ("approximate_pixel", &c.approximate_pixel),
            ("filter_thresh", &c.filter_thresh),
            ("mode", &c.mode),
            ("half_to_full", &c.half_to_full),
        ];
        for (key, value) in options {
            if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                body.push((key.to_string(), v.to_string()));
            }
        }
    }

    /// Base URL and bare `host[:port]` for the configured endpoint.
    fn endpoint(&self) -> (String, String) {
        let host = self.config.host.trim_end_matches('/');
        match host.split_once("://") {
            Some((_, bare)) => (host.to_string(), bare.to_string()),
            None => (format!("https://{host}"), host.to_string()),
        }
    }

    /// Sign and send one recognition request.
    pub async fn recognize(&self, body: &[(String, String)]) -> Result<String, InvokeError> {
        let query = [("Action", OCR_ACTION), ("Version", OCR_VERSION)];
        let form = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(body.iter())
            .finish();
        let (base_url, host) = self.endpoint();

        let mut headers = BTreeMap::new();
        headers.insert("Host".to_string(), host);
        headers.insert(
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );
        headers.insert("Accept".to_string(), "application/json".to_string());

        let creds = Credentials {
            access_key: &self.config.access_key,
            secret_key: &self.config.secret_key,
            session_token: self.config.session_token.as_deref(),
            region: &self.config.region,
            service: &self.config.service,
        };
        sign_request("POST", "/", &mut headers, &form, &query, &creds, Utc::now());

        let url = format!("{base_url}/?Action={OCR_ACTION}&Version={OCR_VERSION}");
        let mut request = self.http.post(&url).body(form);
        for (name, value) in &headers {
            // reqwest derives Host from the URL.
            if name != "Host" {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| InvokeError::from_transport(e, self.config.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(InvokeError::from_status(status.as_u16(), retry_after, text));
        }

        let parsed: OcrResponse = response
            .json()
            .await
            .map_err(|e| InvokeError::InvalidResponse(e.to_string()))?;
        let text = extract_ocr_text(&parsed)?;
        debug!("OCR returned {} chars", text.chars().count());
        Ok(text)
    }

    /// Recognise one page file end to end.
    pub async fn recognize_path(&self, path: &Path) -> Result<String, InvokeError> {
        let body = self.body_for_path(path)?;
        self.recognize(&body).await
    }

    /// Recognise in-memory image bytes.
    pub async fn recognize_bytes(&self, bytes: &[u8]) -> Result<String, InvokeError> {
        self.recognize(&self.body_from_bytes(bytes)).await
    }
}
