//! Transform service
//!
//! Thin typed wrapper around one model call: validate the request,
//! run the call under its budget, measure latency.

use crate::config::{ModelConfig, TransformConfig};
use crate::error::{ModelError, TransformError};
use crate::model::{elapsed_ms, with_timeout, ModelClient, ModelRequest};
use crate::prompts::transform_prompt;
use crate::types::{ChunkId, IntensityLevel, SessionId, TransformKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Inbound transform request as sent by the client
///
/// Every field is optional on the wire so that missing fields surface as
/// validation errors rather than opaque parse failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub chunk_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub level: Option<u8>,
}

impl TransformRequest {
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        chunk_id: impl Into<String>,
        content: impl Into<String>,
        kind: TransformKind,
    ) -> Self {
        Self {
            session_id: Some(session_id.into()),
            chunk_id: Some(chunk_id.into()),
            content: Some(content.into()),
            kind: Some(kind.as_str().to_string()),
            level: None,
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: u8) -> Self {
        self.level = Some(level);
        self
    }
}

/// A request that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTransform {
    pub session_id: SessionId,
    pub chunk_id: ChunkId,
    pub content: String,
    pub kind: TransformKind,
    /// Always `None` for expansions
    pub level: Option<IntensityLevel>,
}

/// Model output plus measured latency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub transformed_content: String,
    pub latency_ms: u64,
}

fn required(field: Option<String>, name: &str) -> Result<String, TransformError> {
    field
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| TransformError::Validation(format!("missing required field '{name}'")))
}

/// Rewrites and expands passages through the model
pub struct TransformService {
    client: Arc<dyn ModelClient>,
    config: TransformConfig,
    model: String,
    max_tokens: u32,
}

impl std::fmt::Debug for TransformService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformService")
            .field("model", &self.model)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TransformService {
    #[must_use]
    pub fn new(client: Arc<dyn ModelClient>, config: TransformConfig, model: &ModelConfig) -> Self {
        Self {
            client,
            config,
            model: model.transform_model.clone(),
            max_tokens: model.max_tokens,
        }
    }

    /// Check the request contract before any external call
    ///
    /// # Errors
    /// [`TransformError::Validation`] naming the offending field
    pub fn validate(&self, request: TransformRequest) -> Result<ValidatedTransform, TransformError> {
        let session_id = SessionId::new(required(request.session_id, "sessionId")?);
        let chunk_id = ChunkId::new(required(request.chunk_id, "chunkId")?);
        let content = required(request.content, "content")?;
        let kind: TransformKind = required(request.kind, "kind")?.parse()?;

        let length = content.chars().count();
        if length < self.config.min_content_chars {
            return Err(TransformError::Validation(format!(
                "content too short: {length} characters, minimum {}",
                self.config.min_content_chars
            )));
        }

        let level = match kind {
            TransformKind::Expand => None,
            TransformKind::Rewrite => {
                let raw = request.level.ok_or_else(|| {
                    TransformError::Validation("rewrite requires 'level' (1-3)".to_string())
                })?;
                Some(IntensityLevel::new(raw)?)
            }
        };

        Ok(ValidatedTransform {
            session_id,
            chunk_id,
            content,
            kind,
            level,
        })
    }

    /// Run the model call
    ///
    /// # Errors
    /// Model failures, including the budget elapsing and empty output
    pub async fn transform(&self, request: &ValidatedTransform) -> Result<TransformOutput, TransformError> {
        let (system, prompt) = transform_prompt(request.kind, request.level, &request.content);
        let call = ModelRequest {
            model: self.model.clone(),
            system,
            prompt,
            max_tokens: self.max_tokens,
            temperature: self.config.temperature,
        };

        let start = Instant::now();
        let result = with_timeout(self.config.timeout(), self.client.complete(call)).await;
        let latency_ms = elapsed_ms(start);
        metrics::histogram!("acp_transform_latency_ms").record(latency_ms as f64);

        let response = result.map_err(|e| {
            tracing::warn!(
                session_id = %request.session_id,
                chunk_id = %request.chunk_id,
                kind = %request.kind,
                latency_ms,
                error = %e,
                "transform call failed"
            );
            e
        })?;

        let transformed_content = response.text.trim().to_string();
        if transformed_content.is_empty() {
            return Err(ModelError::InvalidResponse("empty transformation".to_string()).into());
        }

        tracing::info!(
            session_id = %request.session_id,
            chunk_id = %request.chunk_id,
            kind = %request.kind,
            level = ?request.level.map(|l| l.value()),
            latency_ms,
            "transform completed"
        );

        Ok(TransformOutput {
            transformed_content,
            latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MockModelClient, ModelResponse};
    use std::time::Duration;

    const PASSAGE: &str = "I build small tools for people who read slowly.";

    fn service(client: MockModelClient) -> TransformService {
        TransformService::new(Arc::new(client), TransformConfig::default(), &ModelConfig::default())
    }

    fn untouched() -> TransformService {
        let mut mock = MockModelClient::new();
        mock.expect_complete().never();
        service(mock)
    }

    #[test]
    fn validation_rules() {
        let svc = untouched();

        let ok = svc
            .validate(TransformRequest::new("s", "c", PASSAGE, TransformKind::Rewrite).with_level(2))
            .unwrap();
        assert_eq!(ok.level, Some(IntensityLevel::HEATED));

        let expand = svc
            .validate(TransformRequest::new("s", "c", PASSAGE, TransformKind::Expand).with_level(9))
            .unwrap();
        assert_eq!(expand.level, None);

        let short = svc.validate(TransformRequest::new("s", "c", "too short", TransformKind::Expand));
        assert!(matches!(short, Err(TransformError::Validation(m)) if m.contains("too short")));

        let no_level = svc.validate(TransformRequest::new("s", "c", PASSAGE, TransformKind::Rewrite));
        assert!(matches!(no_level, Err(TransformError::Validation(_))));

        let bad_level =
            svc.validate(TransformRequest::new("s", "c", PASSAGE, TransformKind::Rewrite).with_level(4));
        assert!(matches!(bad_level, Err(TransformError::Validation(_))));

        let mut bad_kind = TransformRequest::new("s", "c", PASSAGE, TransformKind::Expand);
        bad_kind.kind = Some("summarize".into());
        assert!(matches!(svc.validate(bad_kind), Err(TransformError::Validation(_))));

        let missing = TransformRequest {
            content: Some(PASSAGE.into()),
            ..TransformRequest::default()
        };
        assert!(matches!(
            svc.validate(missing),
            Err(TransformError::Validation(m)) if m.contains("sessionId")
        ));
    }

    #[test]
    fn exactly_minimum_length_is_accepted() {
        let svc = untouched();
        let twenty = "a".repeat(20);
        assert!(svc
            .validate(TransformRequest::new("s", "c", twenty, TransformKind::Expand))
            .is_ok());
    }

    #[tokio::test]
    async fn transform_trims_model_output() {
        let mut mock = MockModelClient::new();
        mock.expect_complete()
            .times(1)
            .withf(|req| req.prompt == PASSAGE)
            .returning(|_| Ok(ModelResponse::new("  Expanded text.\n")));
        let svc = service(mock);

        let req = svc
            .validate(TransformRequest::new("s", "c", PASSAGE, TransformKind::Expand))
            .unwrap();
        let out = svc.transform(&req).await.unwrap();
        assert_eq!(out.transformed_content, "Expanded text.");
    }

    #[tokio::test]
    async fn empty_output_is_invalid() {
        let mut mock = MockModelClient::new();
        mock.expect_complete().returning(|_| Ok(ModelResponse::new("   ")));
        let svc = service(mock);

        let req = svc
            .validate(TransformRequest::new("s", "c", PASSAGE, TransformKind::Expand))
            .unwrap();
        let err = svc.transform(&req).await.unwrap_err();
        assert!(matches!(err, TransformError::Model(ModelError::InvalidResponse(_))));
    }

    struct Stalled;

    #[async_trait::async_trait]
    impl ModelClient for Stalled {
        fn is_configured(&self) -> bool {
            true
        }

        async fn complete(&self, _request: ModelRequest) -> Result<crate::model::ModelResponse, ModelError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(crate::model::ModelResponse::new("late"))
        }
    }

    #[tokio::test]
    async fn budget_elapsing_is_a_timeout() {
        let config = TransformConfig {
            timeout_ms: 20,
            ..TransformConfig::default()
        };
        let svc = TransformService::new(Arc::new(Stalled), config, &ModelConfig::default());
        let req = svc
            .validate(TransformRequest::new("s", "c", PASSAGE, TransformKind::Expand))
            .unwrap();

        let err = svc.transform(&req).await.unwrap_err();
        assert!(matches!(err, TransformError::Model(ModelError::Timeout { .. })));
    }
}
