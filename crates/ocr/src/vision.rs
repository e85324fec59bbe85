//! Last-resort reference reading through a hosted vision model.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

pub const DEFAULT_VISION_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_VISION_MODEL: &str = "gemini-2.0-flash";

const PROMPT: &str = "Extract the Amazon reference (like FBA... or X00...) from this label. \
                      Return ONLY the reference string.";

#[derive(Debug, Error)]
pub enum VisionError {
    /// Credentials were rejected. Every later call would fail the same way.
    #[error("Vision service rejected the API key: {0}")]
    Unauthorized(String),
    #[error("Vision service error ({status}): {message}")]
    Service { status: u16, message: String },
    #[error("Vision request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

pub trait VisionFallback: Send + Sync {
    /// Whether calling [`extract_reference`](Self::extract_reference) can
    /// ever produce an answer. Lets callers skip rendering an image for it.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Ask for the reference printed on a PNG-encoded label image.
    /// `Ok(None)` means the service answered but found nothing.
    fn extract_reference(
        &self,
        png: &[u8],
    ) -> impl Future<Output = Result<Option<String>, VisionError>> + Send;
}

/// Vision fallback selected at configuration time.
pub enum VisionBackend {
    Disabled,
    Gemini(GeminiVision),
}

impl VisionFallback for VisionBackend {
    fn is_enabled(&self) -> bool {
        !matches!(self, VisionBackend::Disabled)
    }

    async fn extract_reference(&self, png: &[u8]) -> Result<Option<String>, VisionError> {
        match self {
            VisionBackend::Disabled => Ok(None),
            VisionBackend::Gemini(client) => client.extract_reference(png).await,
        }
    }
}

pub struct GeminiVision {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiVision {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: DEFAULT_VISION_ENDPOINT.to_string(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub async fn extract_reference(&self, png: &[u8]) -> Result<Option<String>, VisionError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        );
        let body = json!({
            "contents": [{
                "parts": [
                    { "inline_data": { "mime_type": "image/png", "data": STANDARD.encode(png) } },
                    { "text": PROMPT }
                ]
            }]
        });

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, message));
        }

        let parsed: GenerateResponse = response.json().await?;
        Ok(first_text(&parsed))
    }
}

fn classify_failure(status: StatusCode, message: String) -> VisionError {
    let rejected_key = message.to_ascii_lowercase().contains("api key");
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN || rejected_key {
        VisionError::Unauthorized(message)
    } else {
        VisionError::Service { status: status.as_u16(), message }
    }
}

fn first_text(response: &GenerateResponse) -> Option<String> {
    response
        .candidates
        .iter()
        .filter_map(|c| c.content.as_ref())
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| p.text.as_deref())
        .map(str::trim)
        .find(|t| !t.is_empty())
        .map(str::to_string)
}

// ── Mock (always available, used for tests) ───────────────────────────────────

pub enum MockReply {
    Text(String),
    Nothing,
    Unauthorized,
}

pub struct MockVision {
    reply: MockReply,
    calls: AtomicUsize,
}

impl MockVision {
    pub fn new(reply: MockReply) -> Self {
        Self { reply, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl VisionFallback for MockVision {
    async fn extract_reference(&self, _png: &[u8]) -> Result<Option<String>, VisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            MockReply::Text(text) => Ok(Some(text.clone())),
            MockReply::Nothing => Ok(None),
            MockReply::Unauthorized => Err(VisionError::Unauthorized("API key not valid".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_classified() {
        assert!(matches!(
            classify_failure(StatusCode::FORBIDDEN, String::new()),
            VisionError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::BAD_REQUEST, "API key not valid.".into()),
            VisionError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "overloaded".into()),
            VisionError::Service { status: 500, .. }
        ));
    }

    #[test]
    fn first_non_empty_part_is_used() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"  "},{"text":" FBA15ABCDEF\n"}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(first_text(&parsed).as_deref(), Some("FBA15ABCDEF"));
        let empty: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(first_text(&empty), None);
    }

    #[tokio::test]
    async fn disabled_backend_never_answers() {
        assert!(!VisionBackend::Disabled.is_enabled());
        assert_eq!(VisionBackend::Disabled.extract_reference(b"png").await.unwrap(), None);
    }

    #[tokio::test]
    async fn mock_counts_calls() {
        let vision = MockVision::new(MockReply::Unauthorized);
        assert!(vision.extract_reference(b"").await.is_err());
        assert_eq!(vision.calls(), 1);
    }
}
