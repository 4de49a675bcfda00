//! Report and session persistence over [`KeyValueStore`]
//!
//! Key layout:
//! - `report:{batch_id}` JSON report, optional expiry
//! - `reports:recent` sorted set, member = batch id, score = evaluation time (ms)
//! - `session:{session_id}` JSON session snapshot, 24h expiry

use crate::config::{ReportConfig, SessionConfig};
use crate::error::StoreError;
use crate::kv::KeyValueStore;
use crate::session::Session;
use crate::types::{BatchId, EvaluationReport, SessionId};
use std::sync::Arc;
use std::time::Duration;

/// Sorted-set key of the recent-reports index
pub const RECENT_INDEX_KEY: &str = "reports:recent";

fn report_key(id: &BatchId) -> String {
    format!("report:{id}")
}

fn session_key(id: &SessionId) -> String {
    format!("session:{id}")
}

/// Reports keyed by batch id, with a time-ordered index
#[derive(Clone)]
pub struct ReportStore {
    kv: Arc<dyn KeyValueStore>,
    config: ReportConfig,
}

impl std::fmt::Debug for ReportStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportStore").field("config", &self.config).finish_non_exhaustive()
    }
}

impl ReportStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, config: ReportConfig) -> Self {
        Self { kv, config }
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    /// Write the report, then its index entry
    ///
    /// A failed index write is logged and tolerated: the report is
    /// reachable by id and the recent listing is eventually consistent.
    /// The index keeps at most `max_limit` ids; older ones are trimmed here
    /// since no listing can reach them.
    ///
    /// # Errors
    /// The report value itself could not be written
    pub async fn store(&self, report: &EvaluationReport) -> Result<(), StoreError> {
        let key = report_key(&report.batch_id);
        let json = serde_json::to_string(report).map_err(|e| StoreError::serialization(&key, &e))?;
        self.kv.set(&key, json, self.config.ttl()).await?;

        let score = report.evaluated_at.timestamp_millis();
        if let Err(err) = self
            .kv
            .zadd(RECENT_INDEX_KEY, report.batch_id.as_str(), score)
            .await
        {
            metrics::counter!("acp_report_persist_failures_total", "stage" => "index").increment(1);
            tracing::warn!(batch_id = %report.batch_id, error = %err, "report index write failed");
            return Ok(());
        }
        self.trim_index().await;
        Ok(())
    }

    async fn trim_index(&self) {
        let overflow = match self
            .kv
            .zrevrange(RECENT_INDEX_KEY, self.config.max_limit, usize::MAX)
            .await
        {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(error = %err, "report index trim failed");
                return;
            }
        };
        for id in overflow {
            self.unindex(&id).await;
        }
    }

    async fn unindex(&self, id: &str) {
        if let Err(err) = self.kv.zrem(RECENT_INDEX_KEY, id).await {
            tracing::warn!(batch_id = %id, error = %err, "report index removal failed");
        }
    }

    /// Persist without surfacing failure
    ///
    /// Returns whether the report was written. Used after a successful
    /// evaluation, whose success must not depend on storage.
    pub async fn store_logged(&self, report: &EvaluationReport) -> bool {
        match self.store(report).await {
            Ok(()) => true,
            Err(err) => {
                metrics::counter!("acp_report_persist_failures_total", "stage" => "report").increment(1);
                tracing::error!(batch_id = %report.batch_id, error = %err, "report persistence failed");
                false
            }
        }
    }

    /// # Errors
    /// Backend failure or an undecodable stored value
    pub async fn get(&self, id: &BatchId) -> Result<Option<EvaluationReport>, StoreError> {
        let key = report_key(id);
        match self.kv.get(&key).await? {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StoreError::serialization(&key, &e)),
        }
    }

    /// Most recent batch ids first; `limit` defaults to 50 and caps at 100
    ///
    /// # Errors
    /// Backend failure
    pub async fn recent_ids(&self, limit: Option<usize>) -> Result<Vec<BatchId>, StoreError> {
        let limit = self.config.clamp_limit(limit);
        Ok(self
            .kv
            .zrevrange(RECENT_INDEX_KEY, 0, limit)
            .await?
            .into_iter()
            .map(BatchId::new)
            .collect())
    }

    /// Most recent reports; ids whose report has expired are skipped and
    /// dropped from the index
    ///
    /// # Errors
    /// Backend failure
    pub async fn recent(&self, limit: Option<usize>) -> Result<Vec<EvaluationReport>, StoreError> {
        let mut reports = Vec::new();
        for id in self.recent_ids(limit).await? {
            match self.get(&id).await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {
                    tracing::debug!(batch_id = %id, "indexed report has expired");
                    self.unindex(id.as_str()).await;
                }
                Err(StoreError::Serialization { key, message }) => {
                    tracing::warn!(key = %key, message = %message, "skipping undecodable report");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(reports)
    }
}

/// Session snapshots keyed by session id
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, config: &SessionConfig) -> Self {
        Self { kv, ttl: config.ttl() }
    }

    /// # Errors
    /// Backend or serialization failure
    pub async fn save(&self, session: &Session) -> Result<(), StoreError> {
        let key = session_key(&session.id);
        let json = serde_json::to_string(session).map_err(|e| StoreError::serialization(&key, &e))?;
        self.kv.set(&key, json, Some(self.ttl)).await
    }

    /// # Errors
    /// Backend or deserialization failure
    pub async fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let key = session_key(id);
        match self.kv.get(&key).await? {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StoreError::serialization(&key, &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use crate::types::{BatchSummary, SkipReason, VisitorInfo};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};

    fn report(offset_ms: i64) -> EvaluationReport {
        EvaluationReport {
            batch_id: BatchId::generate(),
            session_id: SessionId::new("tab"),
            evaluated_at: Utc::now() + ChronoDuration::milliseconds(offset_ms),
            transformation_scores: Vec::new(),
            batch_summary: BatchSummary {
                average_score: 7.0,
                passed: true,
                total_transformations: 1,
                passed_count: 1,
                failed_count: 0,
                notes: String::new(),
                skip_reason: None,
            },
        }
    }

    fn memory_store() -> ReportStore {
        ReportStore::new(Arc::new(MemoryStore::new()), ReportConfig::default())
    }

    #[tokio::test]
    async fn store_get_and_list_newest_first() {
        let store = memory_store();
        let older = report(-1_000);
        let newer = report(0);
        store.store(&newer).await.unwrap();
        store.store(&older).await.unwrap();

        assert_eq!(store.get(&older.batch_id).await.unwrap(), Some(older.clone()));
        assert_eq!(
            store.recent_ids(None).await.unwrap(),
            vec![newer.batch_id.clone(), older.batch_id.clone()]
        );
        assert!(store.get(&BatchId::new("absent")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn listing_is_capped() {
        let store = memory_store();
        for i in 0..120 {
            store.store(&report(i)).await.unwrap();
        }
        assert_eq!(store.recent_ids(None).await.unwrap().len(), 50);
        assert_eq!(store.recent_ids(Some(1_000)).await.unwrap().len(), 100);
        assert_eq!(store.recent(Some(5)).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn index_is_trimmed_to_max_limit() {
        let kv = Arc::new(MemoryStore::new());
        let store = ReportStore::new(kv.clone(), ReportConfig::default());
        let mut newest = Vec::new();
        for i in 0..120 {
            let r = report(i);
            if i >= 20 {
                newest.push(r.batch_id.clone());
            }
            store.store(&r).await.unwrap();
        }
        let indexed = kv.zrevrange(RECENT_INDEX_KEY, 0, usize::MAX).await.unwrap();
        assert_eq!(indexed.len(), 100);
        newest.reverse();
        assert_eq!(store.recent_ids(Some(100)).await.unwrap(), newest);
    }

    #[tokio::test]
    async fn expired_reports_leave_the_index() {
        let kv = Arc::new(MemoryStore::new());
        let store = ReportStore::new(kv.clone(), ReportConfig::default());
        let kept = report(0);
        let gone = report(-1_000);
        store.store(&kept).await.unwrap();
        store.store(&gone).await.unwrap();
        // Stands in for the report value reaching its expiry
        kv.delete(&report_key(&gone.batch_id)).await.unwrap();

        assert_eq!(store.recent(None).await.unwrap(), vec![kept.clone()]);
        assert_eq!(store.recent_ids(None).await.unwrap(), vec![kept.batch_id]);
    }

    /// Values succeed, the sorted-set index always fails
    struct IndexDown(MemoryStore);

    #[async_trait]
    impl KeyValueStore for IndexDown {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.0.get(key).await
        }
        async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
            self.0.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<bool, StoreError> {
            self.0.delete(key).await
        }
        async fn zadd(&self, _key: &str, _member: &str, _score: i64) -> Result<(), StoreError> {
            Err(StoreError::Backend("index unavailable".into()))
        }
        async fn zrem(&self, _key: &str, _member: &str) -> Result<bool, StoreError> {
            Err(StoreError::Backend("index unavailable".into()))
        }
        async fn zrevrange(&self, key: &str, offset: usize, limit: usize) -> Result<Vec<String>, StoreError> {
            self.0.zrevrange(key, offset, limit).await
        }
    }

    #[tokio::test]
    async fn index_failure_is_tolerated() {
        let store = ReportStore::new(Arc::new(IndexDown(MemoryStore::new())), ReportConfig::default());
        let r = report(0);

        assert!(store.store(&r).await.is_ok());
        assert!(store.get(&r.batch_id).await.unwrap().is_some());
        assert!(store.recent_ids(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sentinels_can_be_stored_by_id() {
        let store = memory_store();
        let sentinel = EvaluationReport::sentinel(SessionId::new("tab"), SkipReason::SampledSkip, Utc::now());
        store.store(&sentinel).await.unwrap();
        assert!(store.get(&sentinel.batch_id).await.unwrap().unwrap().is_sentinel());
    }

    #[tokio::test]
    async fn sessions_round_trip() {
        let kv = Arc::new(MemoryStore::new());
        let sessions = SessionStore::new(kv, &SessionConfig::default());
        let session = Session::start(SessionId::new("tab"), VisitorInfo::default(), Utc::now()).end();

        sessions.save(&session).await.unwrap();
        assert_eq!(sessions.load(&session.id).await.unwrap(), Some(session));
        assert!(sessions.load(&SessionId::new("other")).await.unwrap().is_none());
    }
}
