//! Testing utilities for the ACP workspace
//!
//! Scripted model client with call recording, plus fixtures for
//! configuration, batches, reports and manifests.

#![allow(missing_docs)]

use acp_content::{
    ElementKind, ExpansionChunk, ExpansionVersion, Manifest, SourceDescriptor, VersionEvaluation,
};
use acp_core::{
    BatchId, BatchSummary, ChunkId, EvaluationBatch, EvaluationReport, GateResult, ModelClient,
    ModelError, ModelRequest, ModelResponse, PipelineConfig, Sampler, SessionId, TransformKind,
    TransformationRecord, VisitorInfo,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Model name the test config uses for transforms
pub const TRANSFORM_MODEL: &str = "test-transform";
/// Model name the test config uses for the gate's LLM tier
pub const GATE_MODEL: &str = "test-gate";
/// Model name the test config uses for rubric scoring
pub const RUBRIC_MODEL: &str = "test-rubric";

/// A passage comfortably above the minimum transform length
pub const PASSAGE: &str = "I keep a small garden behind the office and write about it on slow Fridays.";

/// Model client that replays scripted replies per model name
///
/// Queued replies are consumed first; a standing reply then answers every
/// further call. Every request is recorded.
#[derive(Debug, Default)]
pub struct ScriptedModelClient {
    unconfigured: bool,
    queued: Mutex<HashMap<String, VecDeque<Result<String, ModelError>>>>,
    standing: Mutex<HashMap<String, Result<String, ModelError>>>,
    calls: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModelClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Client reporting missing credentials
    #[must_use]
    pub fn unconfigured() -> Self {
        Self {
            unconfigured: true,
            ..Self::default()
        }
    }

    /// Answer every call to `model` with `text`
    #[must_use]
    pub fn reply(self, model: &str, text: impl Into<String>) -> Self {
        self.standing.lock().insert(model.to_string(), Ok(text.into()));
        self
    }

    /// Answer the next call to `model` with `text`
    #[must_use]
    pub fn reply_once(self, model: &str, text: impl Into<String>) -> Self {
        self.queued
            .lock()
            .entry(model.to_string())
            .or_default()
            .push_back(Ok(text.into()));
        self
    }

    /// Fail the next call to `model`, then fall back to its standing reply
    #[must_use]
    pub fn fail_once(self, model: &str, error: ModelError) -> Self {
        self.queued
            .lock()
            .entry(model.to_string())
            .or_default()
            .push_back(Err(error));
        self
    }

    /// Fail every call to `model`
    #[must_use]
    pub fn fail(self, model: &str, error: ModelError) -> Self {
        self.standing.lock().insert(model.to_string(), Err(error));
        self
    }

    /// All recorded requests, in call order
    #[must_use]
    pub fn calls(&self) -> Vec<ModelRequest> {
        self.calls.lock().clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Calls addressed to one model
    #[must_use]
    pub fn calls_to(&self, model: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.model == model).count()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    fn is_configured(&self) -> bool {
        !self.unconfigured
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let model = request.model.clone();
        self.calls.lock().push(request);

        if self.unconfigured {
            return Err(ModelError::NotConfigured);
        }
        if let Some(next) = self.queued.lock().get_mut(&model).and_then(VecDeque::pop_front) {
            return next.map(ModelResponse::new);
        }
        match self.standing.lock().get(&model) {
            Some(reply) => reply.clone().map(ModelResponse::new),
            None => Err(ModelError::InvalidResponse(format!("no scripted reply for {model}"))),
        }
    }
}

/// Sampler with a fixed answer
#[derive(Debug, Clone, Copy)]
pub struct FixedSampler(pub bool);

impl Sampler for FixedSampler {
    fn sample(&self, _rate: f64) -> bool {
        self.0
    }
}

/// Configuration with distinct model names, credentials, and every batch sampled
#[must_use]
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default().with_sample_rate(1.0);
    config.model.api_key = Some("test-key".to_string());
    config.model.transform_model = TRANSFORM_MODEL.to_string();
    config.model.gate_model = GATE_MODEL.to_string();
    config.model.evaluation_model = RUBRIC_MODEL.to_string();
    config
}

/// Coherence verdict JSON as the gate expects it
#[must_use]
pub fn verdict(pass: bool, reason: &str) -> String {
    serde_json::json!({ "pass": pass, "reason": reason }).to_string()
}

/// Rubric reply scoring `count` transformations
#[must_use]
pub fn rubric_reply(count: usize, average: f64, passed: bool) -> String {
    let scores: Vec<_> = (0..count)
        .map(|i| {
            serde_json::json!({
                "index": i,
                "effectiveness": average,
                "integrity": average,
                "technicalQuality": average,
                "score": average,
                "passed": passed,
            })
        })
        .collect();
    serde_json::json!({
        "transformationScores": scores,
        "batchSummary": { "averageScore": average, "passed": passed, "notes": "scripted" },
    })
    .to_string()
}

/// Passed transformation record
#[must_use]
pub fn record(session: &str, chunk: &str, kind: TransformKind) -> TransformationRecord {
    TransformationRecord {
        session_id: SessionId::new(session),
        chunk_id: ChunkId::new(chunk),
        original_content: PASSAGE.to_string(),
        transformed_content: format!("{PASSAGE} And the tomatoes have opinions."),
        kind,
        level: None,
        latency_ms: 42,
        gate: GateResult::pass(1),
        created_at: Utc::now(),
    }
}

/// Batch with `count` expansion records
#[must_use]
pub fn batch(session: &str, count: usize) -> EvaluationBatch {
    EvaluationBatch {
        session_id: SessionId::new(session),
        batch_id: BatchId::generate(),
        timestamp: Utc::now(),
        visitor: VisitorInfo::default(),
        events: Vec::new(),
        transformations: (0..count)
            .map(|i| record(session, &format!("chunk-{i}"), TransformKind::Expand))
            .collect(),
        trigger: None,
    }
}

/// Non-sentinel report
#[must_use]
pub fn scored_report(average: f64, passed: bool, count: usize) -> EvaluationReport {
    EvaluationReport {
        batch_id: BatchId::generate(),
        session_id: SessionId::new("fixture"),
        evaluated_at: Utc::now(),
        transformation_scores: Vec::new(),
        batch_summary: BatchSummary {
            average_score: average,
            passed,
            total_transformations: count,
            passed_count: if passed { count } else { 0 },
            failed_count: if passed { 0 } else { count },
            notes: String::new(),
            skip_reason: None,
        },
    }
}

/// Passage whose chunk has two passing embedded versions and one failing
pub const SERVABLE_ORIGINAL: &str = "I keep a **small** garden behind the office.";
/// Passage whose chunk has only failing versions
pub const UNSERVABLE_ORIGINAL: &str = "Nobody reads the footer.";

/// Manifest with a servable and an unservable chunk, all bodies embedded
#[must_use]
pub fn sample_manifest() -> Manifest {
    let servable = ExpansionChunk::from_original(
        SERVABLE_ORIGINAL,
        SourceDescriptor::new("about.mdx", ElementKind::Paragraph, 0),
    )
    .with_version(
        ExpansionVersion::new(1, "sensory", 2.0, VersionEvaluation::new(8.0, 9.0, 8.5, true))
            .with_content("I keep a small garden behind the office, mint and stubborn tomatoes."),
    )
    .with_version(
        ExpansionVersion::new(2, "tangent", 2.4, VersionEvaluation::new(7.5, 8.0, 8.0, true))
            .with_content("I keep a small garden behind the office; the snails keep me."),
    )
    .with_version(
        ExpansionVersion::new(3, "overwrought", 4.0, VersionEvaluation::new(3.0, 4.0, 6.0, false))
            .with_content("Verily, a garden."),
    );

    let unservable = ExpansionChunk::from_original(
        UNSERVABLE_ORIGINAL,
        SourceDescriptor::new("layout.mdx", ElementKind::Other, 9),
    )
    .with_version(
        ExpansionVersion::new(1, "elaborate", 3.0, VersionEvaluation::new(2.0, 3.0, 4.0, false))
            .with_content("Nobody, truly nobody, reads the footer."),
    );

    Manifest::new().with_chunks(vec![servable, unservable])
}
