//! Chat-completion client for the Ark (Doubao) OpenAI-compatible endpoint.
//!
//! This module turns a prompt (optionally with an image) into a single
//! `POST {base_url}/chat/completions` call. It is intentionally thin: retry
//! and concurrency live in [`crate::invoker`], prompt content belongs to the
//! caller.
//!
//! ## Message Layout
//!
//! Text-only prompts are sent as a plain string `content`. Prompts with an
//! image use the multimodal array form, image part first:
//!
//! ```json
//! [{"type": "image_url", "image_url": {"url": "..."}}, {"type": "text", "text": "..."}]
//! ```

use crate::config::ChatConfig;
use crate::error::{retry_after_secs, BatchError, InvokeError};
use crate::pipeline::encode::{to_data_url, ImageKind};
use eventsource_stream::{EventStreamError, Eventsource};
use futures::future;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;
use tokio_stream::Stream;
use tracing::debug;

/// One chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

/// Plain text, or an ordered list of multimodal parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    ImageUrl { image_url: ImageUrl },
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Build the single user message for a prompt.
pub fn build_messages(text: &str, image_url: Option<&str>) -> Vec<ChatMessage> {
    let content = match image_url {
        Some(url) => MessageContent::Parts(vec![
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: url.to_string(),
                },
            },
            ContentPart::Text {
                text: text.to_string(),
            },
        ]),
        None => MessageContent::Text(text.to_string()),
    };
    vec![ChatMessage {
        role: "user".to_string(),
        content,
    }]
}

/// One prompt of a chat batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPrompt {
    pub text: String,
    /// An `http(s)://` or `data:` URL sent as the image part.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl ChatPrompt {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image_url: None,
        }
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        build_messages(&self.text, self.image_url.as_deref())
    }
}

/// Turn an image reference into something the endpoint accepts.
///
/// URLs (`http://`, `https://`, `data:`) pass through; anything else is read
/// as a local PNG/JPEG file and inlined as a `data:` URL.
pub fn resolve_image_ref(reference: &str) -> Result<String, BatchError> {
    let r = reference.trim();
    if r.starts_with("http://") || r.starts_with("https://") || r.starts_with("data:") {
        return Ok(r.to_string());
    }
    let path = Path::new(r);
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => BatchError::InputNotFound {
            path: path.to_path_buf(),
        },
        _ => BatchError::InputReadFailed {
            path: path.to_path_buf(),
            source: e,
        },
    })?;
    if ImageKind::from_magic(&bytes).is_none() {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(BatchError::NotAnImage {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(to_data_url(&bytes))
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    reasoning_effort: &'a str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// A boxed stream of content deltas.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, InvokeError>> + Send>>;

/// Client for the chat endpoint. Cheap to clone; share one per batch.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    config: ChatConfig,
}

impl ChatClient {
    pub fn new(config: ChatConfig) -> Result<Self, BatchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BatchError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    async fn post(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response, InvokeError> {
        let body = CompletionRequest {
            model: &self.config.model,
            messages,
            reasoning_effort: &self.config.reasoning_effort,
            stream,
        };

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| InvokeError::from_transport(e, self.config.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(InvokeError::from_status(status.as_u16(), retry_after, text));
        }
        Ok(response)
    }

    /// Send one completion and return the first choice's text.
    ///
    /// A `null` content is returned as an empty string; a response with no
    /// choices at all is an [`InvokeError::InvalidResponse`].
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, InvokeError> {
        let response = self.post(messages, false).await?;
        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| InvokeError::InvalidResponse(e.to_string()))?;

        if let Some(ref usage) = parsed.usage {
            debug!(
                "Chat: {} input tokens, {} output tokens",
                usage.prompt_tokens, usage.completion_tokens
            );
        }

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| InvokeError::InvalidResponse("no choices in response".into()))
    }

    /// Send one completion with `stream: true` and yield content deltas as
    /// they arrive. Chunks without choices or with empty deltas are skipped;
    /// the stream ends at `[DONE]`.
    pub async fn complete_stream(&self, messages: &[ChatMessage]) -> Result<DeltaStream, InvokeError> {
        let response = self.post(messages, true).await?;
        let timeout_secs = self.config.timeout_secs;
        Ok(sse_deltas(response.bytes_stream(), move |e| {
            InvokeError::from_transport(e, timeout_secs)
        }))
    }
}

/// Turn a raw SSE byte stream into content deltas.
///
/// Multi-line `data:` fields are joined into one event before parsing.
fn sse_deltas<S, B, E, F>(body: S, transport: F) -> DeltaStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
    F: Fn(E) -> InvokeError + Send + 'static,
{
    let deltas = body
        .eventsource()
        .take_while(|item| future::ready(!matches!(item, Ok(event) if event.data == "[DONE]")))
        .filter_map(move |item| {
            future::ready(match item {
                Ok(event) => parse_chunk(&event.data).transpose(),
                Err(EventStreamError::Transport(e)) => Some(Err(transport(e))),
                Err(e) => Some(Err(InvokeError::InvalidResponse(e.to_string()))),
            })
        });
    Box::pin(deltas)
}

/// The first choice's non-empty content delta, if any.
fn parse_chunk(data: &str) -> Result<Option<String>, InvokeError> {
    let chunk: StreamChunk =
        serde_json::from_str(data).map_err(|e| InvokeError::InvalidResponse(e.to_string()))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn text_only_message_is_plain_string() {
        let msgs = build_messages("Hello", None);
        let json = serde_json::to_value(&msgs).unwrap();
        assert_eq!(json, serde_json::json!([{"role": "user", "content": "Hello"}]));
    }

    #[test]
    fn image_message_puts_image_first() {
        let msgs = build_messages("Describe", Some("https://x/y.png"));
        let json = serde_json::to_value(&msgs).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "role": "user",
                "content": [
                    {"type": "image_url", "image_url": {"url": "https://x/y.png"}},
                    {"type": "text", "text": "Describe"}
                ]
            }])
        );
    }

    #[test]
    fn request_omits_stream_flag_when_false() {
        let msgs = build_messages("hi", None);
        let body = CompletionRequest {
            model: "m",
            messages: &msgs,
            reasoning_effort: "medium",
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("stream").is_none());
        assert_eq!(json["reasoning_effort"], "medium");
    }

    #[test]
    fn prompt_deserialises_without_image() {
        let p: ChatPrompt = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert_eq!(p, ChatPrompt::new("hi"));
        assert_eq!(p.messages(), build_messages("hi", None));
    }

    #[test]
    fn image_refs() {
        assert_eq!(
            resolve_image_ref(" https://x/y.png ").unwrap(),
            "https://x/y.png"
        );
        assert!(matches!(
            resolve_image_ref("/no/such/image.png"),
            Err(BatchError::InputNotFound { .. })
        ));
    }

    #[test]
    fn local_image_becomes_data_url() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("a.png");
        std::fs::write(&png, b"\x89PNG\r\n\x1a\nrest").unwrap();
        let url = resolve_image_ref(png.to_str().unwrap()).unwrap();
        assert!(url.starts_with("data:image/png;base64,"), "got: {url}");

        let txt = dir.path().join("a.txt");
        std::fs::write(&txt, b"hello").unwrap();
        assert!(matches!(
            resolve_image_ref(txt.to_str().unwrap()),
            Err(BatchError::NotAnImage { magic, .. }) if &magic == b"hell"
        ));
    }

    async fn deltas_of(body: &'static str) -> Vec<Result<String, InvokeError>> {
        let chunks = body
            .as_bytes()
            .chunks(7)
            .map(|c| Ok::<_, std::io::Error>(c.to_vec()))
            .collect::<Vec<_>>();
        let s = sse_deltas(stream::iter(chunks), |e| InvokeError::Network(e.to_string()));
        s.collect().await
    }

    #[test]
    fn chunk_parsing() {
        assert_eq!(
            parse_chunk(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap(),
            Some("Hi".into())
        );
        assert_eq!(parse_chunk(r#"{"choices":[]}"#).unwrap(), None);
        assert_eq!(parse_chunk(r#"{"choices":[{"delta":{"content":""}}]}"#).unwrap(), None);
        assert!(matches!(parse_chunk("{oops"), Err(InvokeError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn data_split_across_lines_is_one_event() {
        let got = deltas_of(
            "data: {\"choices\":[{\"delta\":\ndata: {\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\n",
        )
        .await;
        assert_eq!(got, vec![Ok("Hi".to_string())]);
    }

    #[tokio::test]
    async fn stream_skips_comments_and_stops_at_done() {
        let got = deltas_of(concat!(
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\r\n\r\n",
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        ))
        .await;
        assert_eq!(got, vec![Ok("a".to_string()), Ok("b".to_string())]);
    }

    #[tokio::test]
    async fn malformed_event_is_invalid_response() {
        let got = deltas_of("data: {oops\n\n").await;
        assert!(matches!(got.as_slice(), [Err(InvokeError::InvalidResponse(_))]));
    }
}
