//! Model-service capability contract
//!
//! The pipeline only needs "given instructions and text, return text".
//! [`HttpModelClient`] speaks an OpenAI-compatible chat-completions shape;
//! nothing else in the crate depends on that shape.

use crate::config::ModelConfig;
use crate::error::ModelError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};

/// One completion request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRequest {
    pub model: String,
    /// Instructions
    pub system: String,
    /// Text to operate on
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Completion text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelResponse {
    pub text: String,
}

impl ModelResponse {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Hosted model capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Whether credentials are present
    fn is_configured(&self) -> bool;

    /// Run one completion
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;
}

/// Await `fut` under a hard budget
///
/// Elapsing is a failure of the calling tier, never retried here.
pub async fn with_timeout<T, F>(budget: Duration, fut: F) -> Result<T, ModelError>
where
    F: Future<Output = Result<T, ModelError>>,
{
    let start = Instant::now();
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(ModelError::Timeout {
            elapsed_ms: elapsed_ms(start),
        }),
    }
}

/// Milliseconds since `start`, saturating
#[inline]
#[must_use]
pub fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Parse the JSON object embedded in a model reply
///
/// Tolerates code fences and prose around the object.
///
/// # Errors
/// [`ModelError::InvalidResponse`] when no object parses as `T`
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Result<T, ModelError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let candidate = match (start, end) {
        (Some(s), Some(e)) if e > s => &text[s..=e],
        _ => {
            return Err(ModelError::InvalidResponse(
                "reply contains no JSON object".to_string(),
            ))
        }
    };
    serde_json::from_str(candidate).map_err(|e| ModelError::InvalidResponse(e.to_string()))
}

/// Client used when no credentials are configured
///
/// Every call fails with [`ModelError::NotConfigured`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredClient;

#[async_trait]
impl ModelClient for UnconfiguredClient {
    fn is_configured(&self) -> bool {
        false
    }

    async fn complete(&self, _request: ModelRequest) -> Result<ModelResponse, ModelError> {
        Err(ModelError::NotConfigured)
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// reqwest-backed client for OpenAI-compatible endpoints
#[derive(Debug, Clone)]
pub struct HttpModelClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpModelClient {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    #[must_use]
    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(config.endpoint.clone(), config.api_key.clone())
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ModelError::NotConfigured);
        };

        let body = ChatRequest {
            model: &request.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let start = Instant::now();
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e, start))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ModelError::RateLimited { retry_after });
        }
        if status == reqwest::StatusCode::BAD_REQUEST
            || status == reqwest::StatusCode::UNPROCESSABLE_ENTITY
        {
            let detail = response.text().await.unwrap_or_default();
            return Err(ModelError::MalformedInput(detail));
        }
        if !status.is_success() {
            return Err(ModelError::Transport(format!("upstream returned {status}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ModelError::InvalidResponse("no choices in reply".to_string()))?;

        tracing::debug!(
            model = %request.model,
            latency_ms = elapsed_ms(start),
            "model call completed"
        );
        Ok(ModelResponse { text })
    }
}

fn classify_transport(err: &reqwest::Error, start: Instant) -> ModelError {
    if err.is_timeout() {
        ModelError::Timeout {
            elapsed_ms: elapsed_ms(start),
        }
    } else {
        ModelError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        pass: bool,
    }

    #[test]
    fn extract_json_tolerates_fences() {
        let reply = "Sure.\n```json\n{\"pass\": true}\n```";
        let verdict: Verdict = extract_json(reply).unwrap();
        assert_eq!(verdict, Verdict { pass: true });
    }

    #[test]
    fn extract_json_rejects_prose() {
        let err = extract_json::<Verdict>("I think it passes").unwrap_err();
        assert!(matches!(err, ModelError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn timeout_is_classified() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, ModelError>(())
        };
        let err = with_timeout(Duration::from_millis(10), slow).await.unwrap_err();
        assert!(matches!(err, ModelError::Timeout { .. }));
    }

    #[tokio::test]
    async fn missing_key_is_not_configured() {
        let client = HttpModelClient::new("http://127.0.0.1:9/v1/chat/completions", Some(String::new()));
        assert!(!client.is_configured());

        let err = client
            .complete(ModelRequest {
                model: "m".into(),
                system: String::new(),
                prompt: String::new(),
                max_tokens: 1,
                temperature: 0.0,
            })
            .await
            .unwrap_err();
        assert_eq!(err, ModelError::NotConfigured);
    }
}
