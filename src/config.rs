//! Configuration types for batch invocation and the two vendor clients.
//!
//! Batch behaviour is controlled through [`BatchConfig`], built via its
//! [`BatchConfigBuilder`]. The service configs ([`ChatConfig`],
//! [`OcrConfig`]) are resolved once from the environment and then passed
//! around by value; nothing below reads process-wide state after start-up.
//!
//! Blank environment variables are treated exactly like unset ones, so a
//! `.env` line such as `OCR_REGION=` falls back to the default.

use crate::error::BatchError;
use crate::progress::ProgressCallback;
use crate::retry::{Backoff, RetryPolicy};
use std::fmt;
use std::time::Duration;

/// Default worker count when nothing else is configured.
pub const DEFAULT_MAX_WORKERS: usize = 2;

/// Configuration for one batch run.
///
/// # Example
/// ```rust
/// use ocrbatch::BatchConfig;
/// use std::time::Duration;
///
/// let config = BatchConfig::builder()
///     .max_workers(4)
///     .max_attempts(5)
///     .backoff(Duration::from_millis(500))
///     .exponential(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_workers, 4);
/// ```
#[derive(Clone)]
pub struct BatchConfig {
    /// Maximum requests in flight at once, backoff sleeps included. Default: 2.
    ///
    /// Vendor endpoints rate-limit per account; two concurrent calls keep a
    /// typical free-tier quota clear of `429`s.
    pub max_workers: usize,

    /// Per-request retry policy.
    pub retry: RetryPolicy,

    /// Optional per-request event sink.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            retry: RetryPolicy::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("max_workers", &self.max_workers)
            .field("retry", &self.retry)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
            invalid: None,
        }
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
    /// First setter value that could not be represented; reported by `build`.
    invalid: Option<String>,
}

impl BatchConfigBuilder {
    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.max_workers = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n;
        self
    }

    pub fn backoff(mut self, delay: Duration) -> Self {
        self.config.retry.backoff = delay;
        self
    }

    /// Negative values are treated as zero; values too large for a
    /// `Duration` make `build` fail.
    pub fn backoff_secs(mut self, secs: f64) -> Self {
        match Duration::try_from_secs_f64(secs.max(0.0)) {
            Ok(delay) => self.backoff(delay),
            Err(_) => {
                if self.invalid.is_none() {
                    self.invalid = Some(format!("backoff of {secs}s is out of range"));
                }
                self
            }
        }
    }

    /// Double the delay after each retry instead of keeping it fixed.
    pub fn exponential(mut self, on: bool) -> Self {
        self.config.retry.strategy = if on {
            Backoff::Exponential { factor: 2.0 }
        } else {
            Backoff::Fixed
        };
        self
    }

    pub fn max_backoff(mut self, cap: Duration) -> Self {
        self.config.retry.max_backoff = cap;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, BatchError> {
        if let Some(msg) = self.invalid {
            return Err(BatchError::InvalidConfig(msg));
        }
        let c = &self.config;
        if c.max_workers == 0 {
            return Err(BatchError::InvalidConfig("max_workers must be ≥ 1".into()));
        }
        if c.retry.max_attempts == 0 {
            return Err(BatchError::InvalidConfig("max_attempts must be ≥ 1".into()));
        }
        if let Backoff::Exponential { factor } = c.retry.strategy {
            if !(factor >= 1.0) {
                return Err(BatchError::InvalidConfig(format!(
                    "backoff factor must be ≥ 1.0, got {factor}"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Environment helpers ──────────────────────────────────────────────────

/// Read an environment variable, treating blank values as unset.
pub fn env_value(name: &str) -> Option<String> {
    Vars(process_env).value(name)
}

fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Variable lookup over any source; blank values count as unset.
struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn value(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn or(&self, name: &str, default: &str) -> String {
        self.value(name).unwrap_or_else(|| default.to_string())
    }

    fn require(&self, name: &str, hint: &str) -> Result<String, BatchError> {
        self.value(name).ok_or_else(|| BatchError::MissingCredentials {
            var: name.to_string(),
            hint: hint.to_string(),
        })
    }
}

/// Worker count from `OCR_MAX_WORKERS`, falling back to [`DEFAULT_MAX_WORKERS`]
/// when unset, non-numeric, or zero.
pub fn resolve_max_workers() -> usize {
    parse_workers(env_value("OCR_MAX_WORKERS").as_deref())
}

fn parse_workers(raw: Option<&str>) -> usize {
    raw.and_then(|v| v.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_MAX_WORKERS)
}

// ── Chat service ─────────────────────────────────────────────────────────

pub const DEFAULT_CHAT_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";
pub const DEFAULT_CHAT_MODEL: &str = "doubao-seed-1-6-251015";

/// Settings for the Ark chat-completion endpoint.
#[derive(Clone)]
pub struct ChatConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// `low`, `medium` or `high`. Default: `medium`.
    pub reasoning_effort: String,
    /// Per-call timeout. Default: 120 s.
    pub timeout_secs: u64,
}

impl ChatConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_CHAT_BASE_URL.to_string(),
            model: DEFAULT_CHAT_MODEL.to_string(),
            reasoning_effort: "medium".to_string(),
            timeout_secs: 120,
        }
    }

    /// Resolve from `ARK_API_KEY` (required), `ARK_BASE_URL`, `ARK_MODEL`
    /// and `ARK_REASONING_EFFORT`.
    pub fn from_env() -> Result<Self, BatchError> {
        Self::from_lookup(process_env)
    }

    /// Resolve from an arbitrary variable source, as [`ChatConfig::from_env`] does.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, BatchError> {
        let vars = Vars(get);
        let api_key = vars.require("ARK_API_KEY", "Set ARK_API_KEY in the environment or in .env.")?;
        Ok(Self {
            base_url: vars.or("ARK_BASE_URL", DEFAULT_CHAT_BASE_URL),
            model: vars.or("ARK_MODEL", DEFAULT_CHAT_MODEL),
            reasoning_effort: vars.or("ARK_REASONING_EFFORT", "medium"),
            ..Self::new(api_key)
        })
    }
}

impl fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("reasoning_effort", &self.reasoning_effort)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ── OCR service ──────────────────────────────────────────────────────────

pub const DEFAULT_OCR_HOST: &str = "visual.volcengineapi.com";
pub const DEFAULT_OCR_REGION: &str = "cn-north-1";
pub const DEFAULT_OCR_SERVICE: &str = "cv";
pub const DEFAULT_OCR_MODE: &str = "default";

/// How page images reach the OCR service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageMode {
    /// Inline the image bytes as `image_base64`. (default)
    #[default]
    Base64,
    /// Send `image_url = {prefix}/{file name}`; the image must already be hosted.
    Url,
}

impl ImageMode {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "image_url" | "url" => ImageMode::Url,
            _ => ImageMode::Base64,
        }
    }
}

/// Settings for the Volcengine `OCRNormal` endpoint.
#[derive(Clone)]
pub struct OcrConfig {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
    pub region: String,
    pub service: String,
    /// Host name, or a full `http(s)://host[:port]` base URL.
    pub host: String,
    pub image_mode: ImageMode,
    pub image_url_prefix: Option<String>,
    pub approximate_pixel: Option<String>,
    pub mode: Option<String>,
    pub filter_thresh: Option<String>,
    pub half_to_full: Option<String>,
    /// Per-call timeout. Default: 30 s.
    pub timeout_secs: u64,
}

impl OcrConfig {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token: None,
            region: DEFAULT_OCR_REGION.to_string(),
            service: DEFAULT_OCR_SERVICE.to_string(),
            host: DEFAULT_OCR_HOST.to_string(),
            image_mode: ImageMode::Base64,
            image_url_prefix: None,
            approximate_pixel: None,
            mode: Some(DEFAULT_OCR_MODE.to_string()),
            filter_thresh: None,
            half_to_full: None,
            timeout_secs: 30,
        }
    }

    /// Resolve from `VOLC_ACCESS_KEY` / `VOLC_SECRET_KEY` (both required)
    /// and the optional `OCR_*` variables. The `IMAGEX_*` names are accepted
    /// as fallbacks for the image mode and URL prefix.
    pub fn from_env() -> Result<Self, BatchError> {
        Self::from_lookup(process_env)
    }

    /// Resolve from an arbitrary variable source, as [`OcrConfig::from_env`] does.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, BatchError> {
        let vars = Vars(get);
        let hint = "Set VOLC_ACCESS_KEY and VOLC_SECRET_KEY in the environment or in .env.";
        let access_key = vars.require("VOLC_ACCESS_KEY", hint)?;
        let secret_key = vars.require("VOLC_SECRET_KEY", hint)?;

        let image_mode = vars
            .value("OCR_IMAGE_MODE")
            .or_else(|| vars.value("IMAGEX_IMAGE_MODE"))
            .map(|m| ImageMode::parse(&m))
            .unwrap_or_default();

        Ok(Self {
            session_token: vars.value("VOLC_SESSION_TOKEN"),
            region: vars.or("OCR_REGION", DEFAULT_OCR_REGION),
            service: vars.or("OCR_SERVICE", DEFAULT_OCR_SERVICE),
            host: vars.or("OCR_ENDPOINT", DEFAULT_OCR_HOST),
            image_mode,
            image_url_prefix: vars
                .value("OCR_IMAGE_URL_PREFIX")
                .or_else(|| vars.value("IMAGEX_IMAGE_URL_PREFIX")),
            approximate_pixel: vars.value("OCR_APPROXIMATE_PIXEL"),
            mode: Some(vars.or("OCR_MODE", DEFAULT_OCR_MODE)),
            filter_thresh: vars.value("OCR_FILTER_THRESH"),
            half_to_full: vars.value("OCR_HALF_TO_FULL"),
            ..Self::new(access_key, secret_key)
        })
    }
}

impl fmt::Debug for OcrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrConfig")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .field("service", &self.service)
            .field("host", &self.host)
            .field("image_mode", &self.image_mode)
            .field("image_url_prefix", &self.image_url_prefix)
            .field("mode", &self.mode)
            .finish()
    }
}
