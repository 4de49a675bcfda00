//! Sampled rubric evaluation of batches
//!
//! [`BatchEvaluator::evaluate_sampled`] applies the cost controls
//! (disabled switch, empty batch, sampling draw) and only then pays for
//! [`BatchEvaluator::evaluate_batch`]. Skipped batches yield sentinel
//! reports that aggregates must ignore.

use crate::config::{EvaluationConfig, ModelConfig};
use crate::error::{EvaluationError, ModelError};
use crate::model::{elapsed_ms, extract_json, with_timeout, ModelClient, ModelRequest};
use crate::prompts::rubric_prompt;
use crate::types::{BatchSummary, EvaluationBatch, EvaluationReport, SkipReason, TransformationScore};
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;

/// Bernoulli draw deciding whether a batch is scored
pub trait Sampler: Send + Sync {
    /// `true` with probability `rate`
    fn sample(&self, rate: f64) -> bool;
}

/// [`Sampler`] over a mutex-guarded `StdRng`
#[derive(Debug)]
pub struct RandomSampler {
    rng: Mutex<StdRng>,
}

impl RandomSampler {
    /// Seeded from the OS
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic sequence for tests
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for RandomSampler {
    fn sample(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.rng.lock().random_bool(rate)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RubricReply {
    #[serde(alias = "transformation_scores")]
    transformation_scores: Vec<RubricScore>,
    #[serde(alias = "batch_summary")]
    batch_summary: RubricSummary,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RubricScore {
    #[serde(default)]
    index: Option<usize>,
    effectiveness: f64,
    integrity: f64,
    #[serde(alias = "technical_quality")]
    technical_quality: f64,
    #[serde(default)]
    score: Option<f64>,
    passed: bool,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RubricSummary {
    #[serde(alias = "average_score")]
    average_score: f64,
    passed: bool,
    #[serde(default, alias = "failed_count")]
    failed_count: Option<usize>,
    #[serde(default)]
    notes: Option<String>,
}

/// Scores batches against the rubric
pub struct BatchEvaluator {
    client: Arc<dyn ModelClient>,
    config: EvaluationConfig,
    model: String,
    max_tokens: u32,
    sampler: Arc<dyn Sampler>,
}

impl std::fmt::Debug for BatchEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEvaluator")
            .field("config", &self.config)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl BatchEvaluator {
    #[must_use]
    pub fn new(client: Arc<dyn ModelClient>, config: EvaluationConfig, model: &ModelConfig) -> Self {
        Self {
            client,
            config,
            model: model.evaluation_model.clone(),
            max_tokens: model.max_tokens.max(2_048),
            sampler: Arc::new(RandomSampler::new()),
        }
    }

    /// Replace the sampling source
    #[must_use]
    pub fn with_sampler(mut self, sampler: Arc<dyn Sampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Apply cost controls, then score if the batch survives them
    ///
    /// # Errors
    /// Invalid batch ids, or a failed scoring call
    pub async fn evaluate_sampled(
        &self,
        batch: &EvaluationBatch,
    ) -> Result<EvaluationReport, EvaluationError> {
        validate_ids(batch)?;

        let skip = if !self.config.enabled {
            Some(SkipReason::Disabled)
        } else if batch.transformations.is_empty() {
            Some(SkipReason::EmptyBatch)
        } else if !self.sampler.sample(self.config.sample_rate) {
            Some(SkipReason::SampledSkip)
        } else {
            None
        };

        if let Some(reason) = skip {
            metrics::counter!("acp_evaluations_total", "outcome" => reason.as_str()).increment(1);
            tracing::debug!(
                batch_id = %batch.batch_id,
                session_id = %batch.session_id,
                reason = reason.as_str(),
                "batch not evaluated"
            );
            return Ok(EvaluationReport::sentinel(
                batch.session_id.clone(),
                reason,
                Utc::now(),
            ));
        }

        self.evaluate_batch(batch).await
    }

    /// Score a batch unconditionally with one model call
    ///
    /// # Errors
    /// Invalid batch ids, model failures, or a reply that does not
    /// score every transformation exactly once
    pub async fn evaluate_batch(
        &self,
        batch: &EvaluationBatch,
    ) -> Result<EvaluationReport, EvaluationError> {
        validate_ids(batch)?;

        let (system, prompt) = rubric_prompt(batch);
        let request = ModelRequest {
            model: self.model.clone(),
            system,
            prompt,
            max_tokens: self.max_tokens,
            temperature: 0.0,
        };

        let start = Instant::now();
        let outcome = with_timeout(self.config.timeout(), self.client.complete(request))
            .await
            .and_then(|response| extract_json::<RubricReply>(&response.text))
            .and_then(|reply| build_report(batch, reply));

        match outcome {
            Ok(report) => {
                metrics::counter!("acp_evaluations_total", "outcome" => "scored").increment(1);
                tracing::info!(
                    batch_id = %batch.batch_id,
                    session_id = %batch.session_id,
                    transformations = report.batch_summary.total_transformations,
                    average_score = report.batch_summary.average_score,
                    passed = report.batch_summary.passed,
                    latency_ms = elapsed_ms(start),
                    "batch evaluated"
                );
                Ok(report)
            }
            Err(err) => {
                metrics::counter!("acp_evaluations_total", "outcome" => "error").increment(1);
                tracing::warn!(
                    batch_id = %batch.batch_id,
                    latency_ms = elapsed_ms(start),
                    error = %err,
                    "batch evaluation failed"
                );
                Err(err.into())
            }
        }
    }
}

fn validate_ids(batch: &EvaluationBatch) -> Result<(), EvaluationError> {
    if batch.session_id.as_str().trim().is_empty() {
        return Err(EvaluationError::InvalidBatch("missing sessionId".to_string()));
    }
    if batch.batch_id.as_str().trim().is_empty() {
        return Err(EvaluationError::InvalidBatch("missing batchId".to_string()));
    }
    Ok(())
}

fn build_report(batch: &EvaluationBatch, reply: RubricReply) -> Result<EvaluationReport, ModelError> {
    let expected = batch.transformations.len();
    if reply.transformation_scores.len() != expected {
        return Err(ModelError::InvalidResponse(format!(
            "rubric scored {} transformations, batch has {expected}",
            reply.transformation_scores.len()
        )));
    }

    let mut slots: Vec<Option<TransformationScore>> = vec![None; expected];
    for (position, raw) in reply.transformation_scores.into_iter().enumerate() {
        let index = raw.index.unwrap_or(position);
        let record = batch.transformations.get(index).ok_or_else(|| {
            ModelError::InvalidResponse(format!("score index {index} out of range"))
        })?;
        let slot = &mut slots[index];
        if slot.is_some() {
            return Err(ModelError::InvalidResponse(format!("index {index} scored twice")));
        }
        let score = raw
            .score
            .unwrap_or((raw.effectiveness + raw.integrity + raw.technical_quality) / 3.0);
        *slot = Some(TransformationScore {
            chunk_id: record.chunk_id.clone(),
            kind: record.kind,
            level: record.level,
            effectiveness: raw.effectiveness,
            integrity: raw.integrity,
            technical_quality: raw.technical_quality,
            score,
            passed: raw.passed,
            notes: raw.notes,
        });
    }

    // Length matched and no index repeated, so every slot is filled
    let scores: Vec<TransformationScore> = slots.into_iter().flatten().collect();
    let failed_count = reply
        .batch_summary
        .failed_count
        .unwrap_or_else(|| scores.iter().filter(|s| !s.passed).count())
        .min(expected);

    Ok(EvaluationReport {
        batch_id: batch.batch_id.clone(),
        session_id: batch.session_id.clone(),
        evaluated_at: Utc::now(),
        batch_summary: BatchSummary {
            average_score: reply.batch_summary.average_score,
            passed: reply.batch_summary.passed,
            total_transformations: scores.len(),
            passed_count: expected - failed_count,
            failed_count,
            notes: reply.batch_summary.notes.unwrap_or_default(),
            skip_reason: None,
        },
        transformation_scores: scores,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MockModelClient, ModelResponse};
    use crate::types::{BatchId, ChunkId, GateResult, SessionId, TransformKind, TransformationRecord, VisitorInfo};

    struct Always(bool);

    impl Sampler for Always {
        fn sample(&self, _rate: f64) -> bool {
            self.0
        }
    }

    fn batch(n: usize) -> EvaluationBatch {
        let session_id = SessionId::new("tab");
        EvaluationBatch {
            session_id: session_id.clone(),
            batch_id: BatchId::generate(),
            timestamp: Utc::now(),
            visitor: VisitorInfo::default(),
            events: Vec::new(),
            transformations: (0..n)
                .map(|i| TransformationRecord {
                    session_id: session_id.clone(),
                    chunk_id: ChunkId::new(format!("c{i}")),
                    original_content: "before".into(),
                    transformed_content: "after".into(),
                    kind: TransformKind::Expand,
                    level: None,
                    latency_ms: 1,
                    gate: GateResult::pass(0),
                    created_at: Utc::now(),
                })
                .collect(),
            trigger: None,
        }
    }

    fn evaluator(mock: MockModelClient, sampler: bool) -> BatchEvaluator {
        BatchEvaluator::new(Arc::new(mock), EvaluationConfig::default(), &ModelConfig::default())
            .with_sampler(Arc::new(Always(sampler)))
    }

    const TWO_SCORES: &str = r#"Here you go:
    {"transformationScores": [
        {"index": 1, "effectiveness": 6, "integrity": 7, "technicalQuality": 8, "score": 7, "passed": true},
        {"index": 0, "effectiveness": 3, "integrity": 4, "technicalQuality": 5, "passed": false, "notes": "flat"}
     ],
     "batchSummary": {"averageScore": 5.5, "passed": true, "notes": "uneven"}}"#;

    #[tokio::test]
    async fn scores_are_aligned_by_index() {
        let mut mock = MockModelClient::new();
        mock.expect_complete()
            .times(1)
            .returning(|_| Ok(ModelResponse::new(TWO_SCORES)));

        let b = batch(2);
        let report = evaluator(mock, true).evaluate_sampled(&b).await.unwrap();

        assert_eq!(report.batch_id, b.batch_id);
        assert_eq!(report.transformation_scores.len(), 2);
        assert_eq!(report.batch_summary.total_transformations, 2);
        assert_eq!(report.transformation_scores[0].chunk_id, ChunkId::new("c0"));
        assert!((report.transformation_scores[0].score - 4.0).abs() < f64::EPSILON);
        assert_eq!(report.batch_summary.failed_count, 1);
        assert_eq!(report.batch_summary.passed_count, 1);
        // Reported independently: passed despite a middling average
        assert!(report.batch_summary.passed);
        assert!((report.batch_summary.average_score - 5.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn sampled_skip_makes_no_call() {
        let mut mock = MockModelClient::new();
        mock.expect_complete().never();

        let report = evaluator(mock, false).evaluate_sampled(&batch(3)).await.unwrap();
        assert!(report.is_sentinel());
        assert_eq!(report.batch_summary.skip_reason, Some(SkipReason::SampledSkip));
    }

    #[tokio::test]
    async fn disabled_and_empty_are_sentinels() {
        let mut mock = MockModelClient::new();
        mock.expect_complete().never();
        let config = EvaluationConfig {
            enabled: false,
            ..EvaluationConfig::default()
        };
        let disabled = BatchEvaluator::new(Arc::new(mock), config, &ModelConfig::default());
        let report = disabled.evaluate_sampled(&batch(2)).await.unwrap();
        assert_eq!(report.batch_summary.skip_reason, Some(SkipReason::Disabled));

        let mut mock = MockModelClient::new();
        mock.expect_complete().never();
        let report = evaluator(mock, true).evaluate_sampled(&batch(0)).await.unwrap();
        assert_eq!(report.batch_summary.skip_reason, Some(SkipReason::EmptyBatch));
    }

    #[tokio::test]
    async fn missing_ids_are_rejected() {
        let mut mock = MockModelClient::new();
        mock.expect_complete().never();
        let mut b = batch(1);
        b.batch_id = BatchId::new("");

        let err = evaluator(mock, true).evaluate_sampled(&b).await.unwrap_err();
        assert!(matches!(err, EvaluationError::InvalidBatch(m) if m.contains("batchId")));
    }

    #[tokio::test]
    async fn score_count_mismatch_is_invalid() {
        let mut mock = MockModelClient::new();
        mock.expect_complete()
            .returning(|_| Ok(ModelResponse::new(TWO_SCORES)));

        let err = evaluator(mock, true).evaluate_sampled(&batch(3)).await.unwrap_err();
        assert!(matches!(err, EvaluationError::Model(ModelError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn not_configured_is_surfaced() {
        let mut mock = MockModelClient::new();
        mock.expect_complete()
            .returning(|_| Err(ModelError::NotConfigured));

        let err = evaluator(mock, true).evaluate_sampled(&batch(1)).await.unwrap_err();
        assert_eq!(err, EvaluationError::Model(ModelError::NotConfigured));
    }

    #[test]
    fn seeded_sampler_converges() {
        let sampler = RandomSampler::seeded(7);
        let trials = 20_000;
        let hits = (0..trials).filter(|_| sampler.sample(0.15)).count();
        let rate = hits as f64 / f64::from(trials);
        assert!((rate - 0.15).abs() < 0.015, "rate was {rate}");

        assert!(!sampler.sample(0.0));
        assert!(sampler.sample(1.0));
    }
}
