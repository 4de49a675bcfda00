//! Batch trigger policy and the per-session accumulator
//!
//! The accumulator serializes read-decide-reset per session: a session's
//! pending state sits behind its own `parking_lot::Mutex`, so two
//! concurrent polls can never cut the same batch twice. Different sessions
//! never contend.

use crate::config::BatchPolicy;
use crate::error::SessionError;
use crate::session::Session;
use crate::types::{
    BatchId, BehaviorEvent, EvaluationBatch, SessionId, TransformationRecord, TriggerReason,
    VisitorInfo,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

/// Result of a trigger check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDecision {
    pub should_trigger: bool,
    pub reason: Option<TriggerReason>,
}

impl TriggerDecision {
    const HOLD: Self = Self {
        should_trigger: false,
        reason: None,
    };

    const fn fire(reason: TriggerReason) -> Self {
        Self {
            should_trigger: true,
            reason: Some(reason),
        }
    }
}

/// Decide whether accumulated work should become a batch
///
/// Priority: session end, then transform count, then elapsed time.
#[must_use]
pub const fn check_batch_trigger(
    policy: &BatchPolicy,
    transforms_since_last: usize,
    ms_since_last: u64,
    session_ending: bool,
) -> TriggerDecision {
    if session_ending {
        TriggerDecision::fire(TriggerReason::SessionEnd)
    } else if transforms_since_last >= policy.transform_count_threshold {
        TriggerDecision::fire(TriggerReason::TransformCount)
    } else if ms_since_last >= policy.time_threshold_ms {
        TriggerDecision::fire(TriggerReason::TimeElapsed)
    } else {
        TriggerDecision::HOLD
    }
}

/// Outcome of [`BatchAccumulator::poll`]
#[derive(Debug, Clone)]
pub struct BatchPoll {
    /// Session after the poll
    pub session: Session,
    pub decision: TriggerDecision,
    /// Present when the decision fired
    pub batch: Option<EvaluationBatch>,
}

#[derive(Debug)]
struct Pending {
    session: Session,
    events: Vec<BehaviorEvent>,
    transformations: Vec<TransformationRecord>,
    last_batch_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl Pending {
    fn new(session: Session) -> Self {
        let started_at = session.started_at;
        Self {
            session,
            events: Vec::new(),
            transformations: Vec::new(),
            last_batch_at: started_at,
            last_seen: started_at,
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.last_seen = self.last_seen.max(now);
    }
}

/// Live sessions and the work accumulated since each one's last batch
///
/// Ended sessions leave a tombstone for `tombstone_ttl` so that late
/// traffic under the same id is rejected instead of reopening it.
#[derive(Debug)]
pub struct BatchAccumulator {
    policy: BatchPolicy,
    sessions: DashMap<SessionId, Arc<Mutex<Pending>>>,
    ended: DashMap<SessionId, DateTime<Utc>>,
    tombstone_ttl: chrono::Duration,
}

impl BatchAccumulator {
    #[must_use]
    pub fn new(policy: BatchPolicy) -> Self {
        Self {
            policy,
            sessions: DashMap::new(),
            ended: DashMap::new(),
            tombstone_ttl: chrono::Duration::hours(24),
        }
    }

    /// How long an ended id stays rejected
    #[must_use]
    pub fn with_tombstone_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.tombstone_ttl = chrono::Duration::from_std(ttl).unwrap_or(self.tombstone_ttl);
        self
    }

    #[inline]
    #[must_use]
    pub fn policy(&self) -> &BatchPolicy {
        &self.policy
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Start tracking a session, or return the tracked one
    ///
    /// An existing session keeps its visitor snapshot.
    ///
    /// # Errors
    /// [`SessionError::SessionEnded`] for a recently ended id
    pub fn open(
        &self,
        id: SessionId,
        visitor: VisitorInfo,
        now: DateTime<Utc>,
    ) -> Result<Session, SessionError> {
        let slot = self.slot_or_insert(id, visitor, now)?;
        let mut pending = slot.lock();
        pending.touch(now);
        Ok(pending.session.clone())
    }

    /// Latest snapshot of a tracked session
    #[must_use]
    pub fn snapshot(&self, id: &SessionId) -> Option<Session> {
        let slot = self.slot(id)?;
        let pending = slot.lock();
        Some(pending.session.clone())
    }

    /// Append a behavior event, opening the session on first interaction
    ///
    /// # Errors
    /// [`SessionError::SessionEnded`]
    pub fn record_event(
        &self,
        id: &SessionId,
        event: BehaviorEvent,
        now: DateTime<Utc>,
    ) -> Result<Session, SessionError> {
        let slot = self.slot_or_insert(id.clone(), VisitorInfo::default(), now)?;
        let mut pending = slot.lock();
        let next = pending.session.append_behavior_event(event.clone())?;
        pending.session = next.clone();
        pending.events.push(event);
        pending.touch(now);
        Ok(next)
    }

    /// Append a transformation record to its owning session
    ///
    /// # Errors
    /// [`SessionError::SessionEnded`]
    pub fn record_transformation(
        &self,
        record: TransformationRecord,
        now: DateTime<Utc>,
    ) -> Result<Session, SessionError> {
        let slot = self.slot_or_insert(record.session_id.clone(), VisitorInfo::default(), now)?;
        let mut pending = slot.lock();
        let next = pending.session.append_transformation_record(record.clone())?;
        pending.session = next.clone();
        pending.transformations.push(record);
        pending.touch(now);
        Ok(next)
    }

    /// Check the trigger and, if it fires, cut a batch
    ///
    /// With `ending` the session is moved to its terminal state and stops
    /// being tracked once the final batch is cut.
    ///
    /// # Errors
    /// [`SessionError::UnknownSession`], or
    /// [`SessionError::SessionEnded`] for an id that already ended
    pub fn poll(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
        ending: bool,
    ) -> Result<BatchPoll, SessionError> {
        let slot = self.slot(id).ok_or_else(|| {
            if self.ended.contains_key(id) {
                SessionError::SessionEnded(id.to_string())
            } else {
                SessionError::UnknownSession(id.to_string())
            }
        })?;

        let poll = {
            let mut pending = slot.lock();
            let elapsed = u64::try_from((now - pending.last_batch_at).num_milliseconds()).unwrap_or(0);
            let decision =
                check_batch_trigger(&self.policy, pending.transformations.len(), elapsed, ending);

            if ending {
                pending.session = pending.session.end();
            }

            let batch = decision.should_trigger.then(|| {
                pending.last_batch_at = now;
                EvaluationBatch {
                    session_id: id.clone(),
                    batch_id: BatchId::generate(),
                    timestamp: now,
                    visitor: pending.session.visitor.clone(),
                    events: std::mem::take(&mut pending.events),
                    transformations: std::mem::take(&mut pending.transformations),
                    trigger: decision.reason,
                }
            });

            if let Some(batch) = &batch {
                tracing::debug!(
                    session_id = %id,
                    batch_id = %batch.batch_id,
                    reason = ?decision.reason,
                    transformations = batch.transformations.len(),
                    "batch cut"
                );
            }

            BatchPoll {
                session: pending.session.clone(),
                decision,
                batch,
            }
        };

        if ending {
            self.sessions.remove(id);
            self.ended
                .retain(|_, at| now.signed_duration_since(*at) < self.tombstone_ttl);
            self.ended.insert(id.clone(), now);
        }
        Ok(poll)
    }

    /// Put an unscored batch back in front of its session's pending work
    ///
    /// A session that was ended by the poll that cut the batch is tracked
    /// again, still ended: appends stay rejected and the next final poll
    /// cuts the batch anew.
    pub fn requeue(&self, session: Session, batch: EvaluationBatch) {
        let id = session.id.clone();
        let slot = match self.slot(&id) {
            Some(slot) => slot,
            None => {
                self.ended.remove(&id);
                let entry = self
                    .sessions
                    .entry(id.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(Pending::new(session.end()))));
                Arc::clone(entry.value())
            }
        };

        let mut pending = slot.lock();
        tracing::debug!(
            session_id = %id,
            batch_id = %batch.batch_id,
            transformations = batch.transformations.len(),
            "batch requeued"
        );
        pending.events.splice(0..0, batch.events);
        pending.transformations.splice(0..0, batch.transformations);
    }

    /// Sessions silent for at least `idle_after`, plus ended sessions still
    /// holding requeued work
    #[must_use]
    pub fn idle_sessions(&self, now: DateTime<Utc>, idle_after: chrono::Duration) -> Vec<SessionId> {
        let slots: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        slots
            .into_iter()
            .filter(|(_, slot)| {
                let pending = slot.lock();
                pending.session.is_ended() || now.signed_duration_since(pending.last_seen) >= idle_after
            })
            .map(|(id, _)| id)
            .collect()
    }

    /// Record that a report was produced for this session
    pub fn attach_report(&self, id: &SessionId, batch_id: BatchId) -> Option<Session> {
        let slot = self.slot(id)?;
        let mut pending = slot.lock();
        pending.session = pending.session.append_report_ref(batch_id);
        Some(pending.session.clone())
    }

    fn slot(&self, id: &SessionId) -> Option<Arc<Mutex<Pending>>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn slot_or_insert(
        &self,
        id: SessionId,
        visitor: VisitorInfo,
        now: DateTime<Utc>,
    ) -> Result<Arc<Mutex<Pending>>, SessionError> {
        if let Some(ended_at) = self.ended.get(&id).map(|at| *at) {
            if now.signed_duration_since(ended_at) < self.tombstone_ttl {
                return Err(SessionError::SessionEnded(id.to_string()));
            }
            self.ended.remove(&id);
        }
        let entry = self.sessions.entry(id.clone()).or_insert_with(|| {
            tracing::debug!(session_id = %id, "session opened");
            Arc::new(Mutex::new(Pending::new(Session::start(id, visitor, now))))
        });
        Ok(Arc::clone(entry.value()))
    }
}
