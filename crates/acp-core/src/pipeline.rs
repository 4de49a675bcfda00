//! Inbound handlers
//!
//! [`Pipeline`] owns every component and turns the four inbound requests
//! (transform, evaluate, expansion lookup, reports listing) plus session
//! traffic into calls on them. It is the composition root: configuration
//! is read once here and injected into each constructor.

use crate::batch::BatchAccumulator;
use crate::config::PipelineConfig;
use crate::error::ApiError;
use crate::evaluator::{BatchEvaluator, Sampler};
use crate::gate::{GateInput, GateOptions, QualityGate};
use crate::kv::KeyValueStore;
use crate::model::{HttpModelClient, ModelClient, UnconfiguredClient};
use crate::reports::{ReportStore, SessionStore};
use crate::session::Session;
use crate::transform::{TransformRequest, TransformService};
use crate::types::{
    BatchId, BehaviorEvent, EvaluationBatch, EvaluationReport, GateTier, GeoLocation,
    ReportAggregate, SessionId, TransformationRecord, VisitorInfo,
};
use acp_content::{ChunkStats, ContentError, ExpansionStore, Fingerprint};
use acp_diff::{plan_transition, TransitionPlan};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Reply to a transform request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformResponse {
    /// New text when the gate passed, otherwise the untouched original
    pub transformed_content: String,
    pub latency_ms: u64,
    pub gate_passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_tier: Option<GateTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_reason: Option<String>,
    /// How to animate the accepted change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animation: Option<TransitionPlan>,
}

/// Evaluate request body
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EvaluateRequest {
    #[serde(default)]
    pub batch: Option<EvaluationBatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluateResponse {
    pub report: EvaluationReport,
}

/// Expansion lookup parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpansionQuery {
    /// 8-hex fingerprint
    #[serde(default)]
    pub hash: Option<String>,
    /// Raw passage, fingerprinted on the fly
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub stats_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpansionLookup {
    pub chunk_id: Fingerprint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub stats: ChunkStats,
}

/// Reports listing parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportsQuery {
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportsResponse {
    pub reports: Vec<EvaluationReport>,
    /// Over the listed reports, sentinels excluded
    pub aggregate: ReportAggregate,
}

/// Request-boundary headers used to enrich visitor metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    headers: BTreeMap<String, String>,
}

impl RequestMeta {
    /// Collect headers; names are matched case-insensitively
    pub fn from_headers<I, K, V>(headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
                .collect(),
        }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// First `x-forwarded-for` hop, else `x-real-ip`
    #[must_use]
    pub fn client_ip(&self) -> Option<String> {
        self.header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| self.header("x-real-ip"))
            .map(ToString::to_string)
    }

    /// Edge geolocation headers
    #[must_use]
    pub fn location(&self) -> Option<GeoLocation> {
        let location = GeoLocation {
            country: self
                .header("x-vercel-ip-country")
                .or_else(|| self.header("cf-ipcountry"))
                .map(ToString::to_string),
            region: self.header("x-vercel-ip-country-region").map(ToString::to_string),
            city: self.header("x-vercel-ip-city").map(ToString::to_string),
        };
        (!location.is_empty()).then_some(location)
    }

    /// Overwrite `ip` and `location` only, leaving every other field as sent
    pub fn enrich(&self, visitor: &mut VisitorInfo) {
        if let Some(ip) = self.client_ip() {
            visitor.ip = Some(ip);
        }
        if let Some(location) = self.location() {
            visitor.location = Some(location);
        }
    }
}

/// All components behind the inbound handlers
pub struct Pipeline {
    config: PipelineConfig,
    transformer: TransformService,
    gate: QualityGate,
    evaluator: BatchEvaluator,
    accumulator: BatchAccumulator,
    reports: ReportStore,
    sessions: SessionStore,
    expansions: Arc<ExpansionStore>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("live_sessions", &self.accumulator.len())
            .field("expansion_chunks", &self.expansions.len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Wire components from explicit collaborators
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        client: Arc<dyn ModelClient>,
        kv: Arc<dyn KeyValueStore>,
        expansions: Arc<ExpansionStore>,
    ) -> Self {
        Self {
            transformer: TransformService::new(Arc::clone(&client), config.transform.clone(), &config.model),
            gate: QualityGate::new(config.gate.clone(), Some(Arc::clone(&client)), &config.model),
            evaluator: BatchEvaluator::new(client, config.evaluation.clone(), &config.model),
            accumulator: BatchAccumulator::new(config.batch).with_tombstone_ttl(config.sessions.ttl()),
            reports: ReportStore::new(Arc::clone(&kv), config.reports.clone()),
            sessions: SessionStore::new(kv, &config.sessions),
            expansions,
            config,
        }
    }

    /// Build the HTTP model client and load expansions from configuration
    ///
    /// Missing credentials yield an [`UnconfiguredClient`]; requests that
    /// need the model then fail with a service-unavailable error.
    ///
    /// # Errors
    /// The configured manifest could not be loaded
    pub async fn from_config(
        config: PipelineConfig,
        kv: Arc<dyn KeyValueStore>,
    ) -> Result<Self, ContentError> {
        let client: Arc<dyn ModelClient> = if config.model.is_configured() {
            Arc::new(HttpModelClient::from_config(&config.model))
        } else {
            tracing::warn!("model API key not set; transform and evaluation are unavailable");
            Arc::new(UnconfiguredClient)
        };

        let expansions = match &config.expansions.manifest_path {
            Some(path) => ExpansionStore::open(path, config.expansions.cache_settings()).await?,
            None => ExpansionStore::empty(),
        };
        tracing::info!(chunks = expansions.len(), "pipeline ready");

        Ok(Self::new(config, client, kv, Arc::new(expansions)))
    }

    /// Replace the evaluation sampler
    #[must_use]
    pub fn with_sampler(mut self, sampler: Arc<dyn Sampler>) -> Self {
        self.evaluator = self.evaluator.with_sampler(sampler);
        self
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn accumulator(&self) -> &BatchAccumulator {
        &self.accumulator
    }

    #[inline]
    #[must_use]
    pub fn report_store(&self) -> &ReportStore {
        &self.reports
    }

    #[inline]
    #[must_use]
    pub fn session_store(&self) -> &SessionStore {
        &self.sessions
    }

    #[inline]
    #[must_use]
    pub fn expansions(&self) -> &ExpansionStore {
        &self.expansions
    }

    /// Validate, transform, gate, and fall back to the original on rejection
    ///
    /// The attempt is recorded in the session either way. Does not poll the
    /// batch trigger; hosts call [`Pipeline::poll_batch`] off the hot path.
    ///
    /// # Errors
    /// Validation failures and model failures
    pub async fn handle_transform(&self, request: TransformRequest) -> Result<TransformResponse, ApiError> {
        let request = self.transformer.validate(request)?;
        let output = self.transformer.transform(&request).await?;

        let gate = self
            .gate
            .gate(
                GateInput {
                    original: &request.content,
                    transformed: &output.transformed_content,
                    kind: request.kind,
                    level: request.level,
                },
                GateOptions::default(),
            )
            .await;

        let (served, animation) = if gate.passed {
            let plan = plan_transition(
                &request.content,
                &output.transformed_content,
                request.kind,
                request.level,
            );
            (output.transformed_content.clone(), Some(plan))
        } else {
            (request.content.clone(), None)
        };

        let response = TransformResponse {
            transformed_content: served,
            latency_ms: output.latency_ms,
            gate_passed: gate.passed,
            gate_tier: gate.tier,
            gate_reason: gate.reason.clone(),
            animation,
        };

        let record = TransformationRecord {
            session_id: request.session_id,
            chunk_id: request.chunk_id,
            original_content: request.content,
            transformed_content: output.transformed_content,
            kind: request.kind,
            level: request.level,
            latency_ms: output.latency_ms,
            gate,
            created_at: Utc::now(),
        };
        let session_id = record.session_id.clone();
        if let Err(err) = self.accumulator.record_transformation(record, Utc::now()) {
            // The visitor still gets a valid response
            tracing::warn!(session_id = %session_id, error = %err, "transformation not recorded");
        }

        Ok(response)
    }

    /// Begin tracking a session with the client's visitor snapshot
    ///
    /// Idempotent: an already tracked session keeps its first snapshot.
    ///
    /// # Errors
    /// Empty session id, or the id belongs to a session that already ended
    pub fn handle_session_start(
        &self,
        session_id: &str,
        mut visitor: VisitorInfo,
        meta: &RequestMeta,
    ) -> Result<Session, ApiError> {
        let id = parse_session_id(session_id)?;
        meta.enrich(&mut visitor);
        Ok(self.accumulator.open(id, visitor, Utc::now())?)
    }

    /// Record a behavior event, then check the batch trigger
    ///
    /// # Errors
    /// Empty session id, ended session, or a failed evaluation
    pub async fn handle_behavior(
        &self,
        session_id: &str,
        event: BehaviorEvent,
    ) -> Result<Option<EvaluationReport>, ApiError> {
        let id = parse_session_id(session_id)?;
        self.accumulator.record_event(&id, event, Utc::now())?;
        self.poll_batch(&id, false).await
    }

    /// End the session and evaluate whatever it accumulated
    ///
    /// # Errors
    /// Unknown session or a failed evaluation
    pub async fn handle_session_end(&self, session_id: &str) -> Result<Option<EvaluationReport>, ApiError> {
        let id = parse_session_id(session_id)?;
        self.poll_batch(&id, true).await
    }

    /// Check the trigger; on fire, evaluate (sampled) and persist
    ///
    /// Returns the report when a batch was cut. Sentinel reports are
    /// returned but not persisted. A batch whose scoring call fails goes
    /// back to the session and is cut again by the next firing poll.
    ///
    /// # Errors
    /// Unknown session, or the scoring call failed
    pub async fn poll_batch(&self, id: &SessionId, ending: bool) -> Result<Option<EvaluationReport>, ApiError> {
        let poll = self.accumulator.poll(id, Utc::now(), ending)?;
        let Some(batch) = poll.batch else {
            return Ok(None);
        };

        let report = match self.evaluator.evaluate_sampled(&batch).await {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(session_id = %id, batch_id = %batch.batch_id, error = %err, "evaluation failed, batch requeued");
                self.accumulator.requeue(poll.session, batch);
                return Err(err.into());
            }
        };
        let session = self.record_report(&report, poll.session).await;
        self.save_session(&session).await;
        Ok(Some(report))
    }

    /// End every session idle past `sessions.idle_timeout_secs` as of `now`
    ///
    /// Each one gets its final batch cut and scored like an explicit end.
    /// Sessions whose scoring fails stay tracked for the next sweep.
    pub async fn sweep_idle_at(&self, now: DateTime<Utc>) -> Vec<EvaluationReport> {
        let idle_after = chrono::Duration::from_std(self.config.sessions.idle_timeout())
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let idle = self.accumulator.idle_sessions(now, idle_after);
        if idle.is_empty() {
            return Vec::new();
        }
        tracing::info!(sessions = idle.len(), "ending idle sessions");

        let mut reports = Vec::with_capacity(idle.len());
        for id in idle {
            match self.poll_batch(&id, true).await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(err) => tracing::warn!(session_id = %id, error = %err, "idle session not ended"),
            }
        }
        reports
    }

    /// [`Pipeline::sweep_idle_at`] the current time
    pub async fn sweep_idle(&self) -> Vec<EvaluationReport> {
        self.sweep_idle_at(Utc::now()).await
    }

    /// Sweep idle sessions every `every` until the pipeline is dropped
    pub fn spawn_idle_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let pipeline = Arc::downgrade(self);
        let every = every.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(pipeline) = pipeline.upgrade() else {
                    break;
                };
                pipeline.sweep_idle().await;
            }
        })
    }

    /// Score a client-submitted batch
    ///
    /// # Errors
    /// Missing batch or ids, or a failed scoring call
    pub async fn handle_evaluate(
        &self,
        request: EvaluateRequest,
        meta: &RequestMeta,
    ) -> Result<EvaluateResponse, ApiError> {
        let mut batch = request
            .batch
            .ok_or_else(|| ApiError::Validation("missing batch".to_string()))?;
        meta.enrich(&mut batch.visitor);

        let report = self.evaluator.evaluate_sampled(&batch).await?;
        if !report.is_sentinel() {
            self.reports.store_logged(&report).await;
        }
        Ok(EvaluateResponse { report })
    }

    /// Resolve a passage to a vetted expansion
    ///
    /// # Errors
    /// Bad query, or no chunk / passing version / body
    pub async fn handle_expansion_lookup(&self, query: ExpansionQuery) -> Result<ExpansionLookup, ApiError> {
        let id = match (query.hash.as_deref(), query.content.as_deref()) {
            (Some(hash), _) => hash
                .trim()
                .parse::<Fingerprint>()
                .map_err(|e| ApiError::Validation(e.to_string()))?,
            (None, Some(content)) => Fingerprint::of(content),
            (None, None) => {
                return Err(ApiError::Validation("either hash or content is required".to_string()))
            }
        };

        let stats = self
            .expansions
            .stats_for(&id)
            .ok_or_else(|| ApiError::NotFound(format!("no expansion for {id}")))?;

        if query.stats_only {
            return Ok(ExpansionLookup {
                chunk_id: id,
                version: None,
                content: None,
                stats,
            });
        }

        let version = match query.version {
            Some(number) => self.expansions.specific_version(&id, number),
            None => self.expansions.random_passing_version(&id),
        }
        .ok_or_else(|| ApiError::NotFound(format!("no servable version for {id}")))?
        .version;

        let content = self
            .expansions
            .resolve_content(&id, version)
            .await
            .ok_or_else(|| ApiError::NotFound(format!("body of {id} v{version} is missing")))?;

        Ok(ExpansionLookup {
            chunk_id: id,
            version: Some(version),
            content: Some(content.to_string()),
            stats,
        })
    }

    /// One report by id, or the most recent ones
    ///
    /// # Errors
    /// Unknown batch id or a store failure
    pub async fn handle_reports(&self, query: ReportsQuery) -> Result<ReportsResponse, ApiError> {
        let reports = match query.batch_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => {
                let report = self
                    .reports
                    .get(&BatchId::new(id))
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("report {id}")))?;
                vec![report]
            }
            None => self.reports.recent(query.limit).await?,
        };

        let aggregate = ReportAggregate::from_reports(&reports);
        Ok(ReportsResponse { reports, aggregate })
    }

    async fn record_report(&self, report: &EvaluationReport, session: Session) -> Session {
        if report.is_sentinel() {
            return session;
        }
        self.reports.store_logged(report).await;
        // Ended sessions are no longer tracked; attach to the final snapshot
        self.accumulator
            .attach_report(&session.id, report.batch_id.clone())
            .unwrap_or_else(|| session.append_report_ref(report.batch_id.clone()))
    }

    async fn save_session(&self, session: &Session) {
        if let Err(err) = self.sessions.save(session).await {
            tracing::warn!(session_id = %session.id, error = %err, "session snapshot not saved");
        }
    }
}

fn parse_session_id(raw: &str) -> Result<SessionId, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::Validation("missing sessionId".to_string()));
    }
    Ok(SessionId::new(trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn meta(headers: &[(&str, &str)]) -> RequestMeta {
        RequestMeta::from_headers(headers.iter().map(|(k, v)| (*k, (*v).to_string())))
    }

    #[test]
    fn forwarded_for_first_hop_wins() {
        let m = meta(&[("X-Forwarded-For", " 203.0.113.9, 10.0.0.1"), ("x-real-ip", "10.0.0.2")]);
        assert_eq!(m.client_ip().as_deref(), Some("203.0.113.9"));

        let m = meta(&[("x-real-ip", "10.0.0.2")]);
        assert_eq!(m.client_ip().as_deref(), Some("10.0.0.2"));

        assert_eq!(meta(&[]).client_ip(), None);
    }

    #[test]
    fn enrich_touches_only_ip_and_location() {
        let mut visitor = VisitorInfo {
            device: Some("desktop".into()),
            referrer: Some("https://news.example".into()),
            ip: Some("client-claimed".into()),
            ..VisitorInfo::default()
        };
        visitor.extra.insert("screen".into(), serde_json::json!({"w": 1440}));
        let untouched = visitor.clone();

        meta(&[
            ("x-forwarded-for", "198.51.100.4"),
            ("x-vercel-ip-country", "NL"),
            ("x-vercel-ip-city", "Utrecht"),
        ])
        .enrich(&mut visitor);

        assert_eq!(visitor.ip.as_deref(), Some("198.51.100.4"));
        assert_eq!(
            visitor.location,
            Some(GeoLocation {
                country: Some("NL".into()),
                region: None,
                city: Some("Utrecht".into()),
            })
        );
        assert_eq!(visitor.device, untouched.device);
        assert_eq!(visitor.referrer, untouched.referrer);
        assert_eq!(visitor.extra, untouched.extra);
    }

    #[test]
    fn no_headers_leaves_visitor_alone() {
        let mut visitor = VisitorInfo {
            ip: Some("1.1.1.1".into()),
            ..VisitorInfo::default()
        };
        meta(&[]).enrich(&mut visitor);
        assert_eq!(visitor.ip.as_deref(), Some("1.1.1.1"));
        assert_eq!(visitor.location, None);
    }
}
