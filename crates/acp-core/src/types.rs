//! Core data model
//!
//! Wire names are camelCase to match the browser client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use ulid::Ulid;

pub use acp_diff::{IntensityLevel, TransformKind};

/// Visitor tab identifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identifier of a passage on the page
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ChunkId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Evaluation batch identifier (ULID, sortable by creation time)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    /// Fresh time-ordered id
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Synthetic id for a sentinel report, e.g. `sampled-skip-01J...`
    #[must_use]
    pub fn sentinel(reason: SkipReason) -> Self {
        Self(format!("{}-{}", reason.as_str(), Ulid::new()))
    }

    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for BatchId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coarse geolocation from the edge proxy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

impl GeoLocation {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.country.is_none() && self.region.is_none() && self.city.is_none()
    }
}

/// Visitor metadata snapshot
///
/// The client fills device/referrer/locale fields; the server boundary
/// fills `ip` and `location`. Unknown client fields are carried through
/// untouched in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoLocation>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Kind of visitor interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorKind {
    Scroll,
    Dwell,
    Hover,
    Click,
    Selection,
    Copy,
    VisibilityChange,
    Resize,
}

/// One visitor interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorEvent {
    pub kind: BehaviorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<ChunkId>,
    pub timestamp: DateTime<Utc>,
    /// Scroll depth, dwell millis, and the like
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl BehaviorEvent {
    #[must_use]
    pub fn new(kind: BehaviorKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            chunk_id: None,
            timestamp,
            value: None,
        }
    }

    #[must_use]
    pub fn on_chunk(mut self, chunk_id: ChunkId) -> Self {
        self.chunk_id = Some(chunk_id);
        self
    }

    #[must_use]
    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }
}

/// Gate stage that rejected a transformation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateTier {
    Heuristics,
    Llm,
}

impl GateTier {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Heuristics => "heuristics",
            Self::Llm => "llm",
        }
    }
}

/// Outcome of the quality gate for one transformation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResult {
    pub passed: bool,
    /// Rejecting tier, `None` when passed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<GateTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub latency_ms: u64,
}

impl GateResult {
    #[must_use]
    pub fn pass(latency_ms: u64) -> Self {
        Self {
            passed: true,
            tier: None,
            reason: None,
            latency_ms,
        }
    }

    #[must_use]
    pub fn reject(tier: GateTier, reason: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            passed: false,
            tier: Some(tier),
            reason: Some(reason.into()),
            latency_ms,
        }
    }
}

/// One transformation attempt, accepted or rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationRecord {
    pub session_id: SessionId,
    pub chunk_id: ChunkId,
    pub original_content: String,
    /// What the model produced, even when the gate rejected it
    pub transformed_content: String,
    pub kind: TransformKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<IntensityLevel>,
    pub latency_ms: u64,
    pub gate: GateResult,
    pub created_at: DateTime<Utc>,
}

/// Why the batch bounded a set of transformations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    SessionEnd,
    TransformCount,
    TimeElapsed,
}

impl TriggerReason {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SessionEnd => "session_end",
            Self::TransformCount => "transform_count",
            Self::TimeElapsed => "time_elapsed",
        }
    }
}

/// Everything accumulated for one session since its previous batch
///
/// Ids default to empty on the wire so that their absence is reported as
/// a validation error by the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationBatch {
    #[serde(default)]
    pub session_id: SessionId,
    #[serde(default)]
    pub batch_id: BatchId,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub visitor: VisitorInfo,
    #[serde(default)]
    pub events: Vec<BehaviorEvent>,
    #[serde(default)]
    pub transformations: Vec<TransformationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerReason>,
}

/// Why a report carries no scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Evaluation switched off in configuration
    Disabled,
    /// Lost the sampling draw
    SampledSkip,
    /// Triggered with nothing to score
    EmptyBatch,
}

impl SkipReason {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::SampledSkip => "sampled-skip",
            Self::EmptyBatch => "empty-batch",
        }
    }
}

/// Rubric score of one transformation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationScore {
    pub chunk_id: ChunkId,
    pub kind: TransformKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<IntensityLevel>,
    pub effectiveness: f64,
    pub integrity: f64,
    pub technical_quality: f64,
    pub score: f64,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Batch-level judgment
///
/// `passed` and `average_score` are reported independently by the rubric
/// call; neither is derived from the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub average_score: f64,
    pub passed: bool,
    pub total_transformations: usize,
    pub passed_count: usize,
    pub failed_count: usize,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
}

/// Scored (or sentinel) result of one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    pub batch_id: BatchId,
    pub session_id: SessionId,
    pub evaluated_at: DateTime<Utc>,
    pub transformation_scores: Vec<TransformationScore>,
    pub batch_summary: BatchSummary,
}

impl EvaluationReport {
    /// Zero-transformation report under a synthetic batch id
    #[must_use]
    pub fn sentinel(session_id: SessionId, reason: SkipReason, at: DateTime<Utc>) -> Self {
        Self {
            batch_id: BatchId::sentinel(reason),
            session_id,
            evaluated_at: at,
            transformation_scores: Vec::new(),
            batch_summary: BatchSummary {
                average_score: 0.0,
                passed: false,
                total_transformations: 0,
                passed_count: 0,
                failed_count: 0,
                notes: format!("not evaluated: {}", reason.as_str()),
                skip_reason: Some(reason),
            },
        }
    }

    /// Whether this report must be excluded from aggregates
    #[inline]
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.batch_summary.total_transformations == 0
    }
}

/// Statistics over a set of reports, sentinels excluded
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportAggregate {
    pub report_count: usize,
    pub transformation_count: usize,
    pub mean_average_score: f64,
    /// Fraction of reports whose batch passed
    pub pass_rate: f64,
    pub sentinels_excluded: usize,
}

impl ReportAggregate {
    #[must_use]
    pub fn from_reports<'a, I>(reports: I) -> Self
    where
        I: IntoIterator<Item = &'a EvaluationReport>,
    {
        let mut agg = Self::default();
        let mut score_sum = 0.0;
        let mut passed = 0usize;

        for report in reports {
            if report.is_sentinel() {
                agg.sentinels_excluded += 1;
                continue;
            }
            agg.report_count += 1;
            agg.transformation_count += report.batch_summary.total_transformations;
            score_sum += report.batch_summary.average_score;
            if report.batch_summary.passed {
                passed += 1;
            }
        }

        if agg.report_count > 0 {
            let n = agg.report_count as f64;
            agg.mean_average_score = score_sum / n;
            agg.pass_rate = passed as f64 / n;
        }
        agg
    }
}
