//! Copy-on-write visitor session
//!
//! Every mutator returns a new [`Session`]; the receiver is never touched.
//! Sequences are `im::Vector`s, so a snapshot shares structure with its
//! successors and cloning is cheap.

use crate::error::SessionError;
use crate::types::{BatchId, BehaviorEvent, SessionId, TransformationRecord, VisitorInfo};
use chrono::{DateTime, Utc};
use im::Vector;
use serde::{Deserialize, Serialize};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    /// Terminal
    Ended,
}

/// One visitor tab
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    pub visitor: VisitorInfo,
    events: Vector<BehaviorEvent>,
    transformations: Vector<TransformationRecord>,
    evaluation_reports: Vector<BatchId>,
    ended: bool,
}

impl Session {
    #[must_use]
    pub fn start(id: SessionId, visitor: VisitorInfo, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            started_at,
            visitor,
            events: Vector::new(),
            transformations: Vector::new(),
            evaluation_reports: Vector::new(),
            ended: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.ended {
            SessionState::Ended
        } else {
            SessionState::Active
        }
    }

    #[inline]
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    #[inline]
    #[must_use]
    pub fn events(&self) -> &Vector<BehaviorEvent> {
        &self.events
    }

    #[inline]
    #[must_use]
    pub fn transformations(&self) -> &Vector<TransformationRecord> {
        &self.transformations
    }

    #[inline]
    #[must_use]
    pub fn evaluation_reports(&self) -> &Vector<BatchId> {
        &self.evaluation_reports
    }

    /// Append a behavior event
    ///
    /// # Errors
    /// [`SessionError::SessionEnded`] once the session is terminal
    pub fn append_behavior_event(&self, event: BehaviorEvent) -> Result<Self, SessionError> {
        self.ensure_active()?;
        let mut next = self.clone();
        next.events.push_back(event);
        Ok(next)
    }

    /// Append a transformation record
    ///
    /// # Errors
    /// Ended session, or a record owned by another session
    pub fn append_transformation_record(
        &self,
        record: TransformationRecord,
    ) -> Result<Self, SessionError> {
        self.ensure_active()?;
        if record.session_id != self.id {
            return Err(SessionError::SessionMismatch {
                session: self.id.to_string(),
                record: record.session_id.to_string(),
            });
        }
        let mut next = self.clone();
        next.transformations.push_back(record);
        Ok(next)
    }

    /// Reference an evaluation report
    ///
    /// Allowed after the end: the final batch is evaluated once the
    /// session has already closed.
    #[must_use]
    pub fn append_report_ref(&self, batch_id: BatchId) -> Self {
        let mut next = self.clone();
        next.evaluation_reports.push_back(batch_id);
        next
    }

    /// Move to the terminal state (idempotent)
    #[must_use]
    pub fn end(&self) -> Self {
        let mut next = self.clone();
        next.ended = true;
        next
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        if self.ended {
            Err(SessionError::SessionEnded(self.id.to_string()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BehaviorKind, ChunkId, GateResult, TransformKind};

    fn session() -> Session {
        Session::start(SessionId::new("tab-1"), VisitorInfo::default(), Utc::now())
    }

    fn record(session: &str) -> TransformationRecord {
        TransformationRecord {
            session_id: SessionId::new(session),
            chunk_id: ChunkId::new("intro"),
            original_content: "original".into(),
            transformed_content: "changed".into(),
            kind: TransformKind::Expand,
            level: None,
            latency_ms: 12,
            gate: GateResult::pass(1),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn appends_leave_snapshot_untouched() {
        let before = session();
        let after = before
            .append_behavior_event(BehaviorEvent::new(BehaviorKind::Scroll, Utc::now()))
            .unwrap();

        assert!(before.events().is_empty());
        assert_eq!(after.events().len(), 1);
    }

    #[test]
    fn ended_session_rejects_appends() {
        let ended = session().end();
        assert_eq!(ended.state(), SessionState::Ended);

        let err = ended
            .append_behavior_event(BehaviorEvent::new(BehaviorKind::Click, Utc::now()))
            .unwrap_err();
        assert!(matches!(err, SessionError::SessionEnded(_)));
        assert!(ended.append_transformation_record(record("tab-1")).is_err());

        // Report refs still land after the end
        assert_eq!(ended.append_report_ref(BatchId::generate()).evaluation_reports().len(), 1);
    }

    #[test]
    fn foreign_record_is_rejected() {
        let err = session().append_transformation_record(record("tab-2")).unwrap_err();
        assert!(matches!(err, SessionError::SessionMismatch { .. }));
    }

    #[test]
    fn order_is_preserved() {
        let mut s = session();
        for kind in [BehaviorKind::Scroll, BehaviorKind::Dwell, BehaviorKind::Copy] {
            s = s.append_behavior_event(BehaviorEvent::new(kind, Utc::now())).unwrap();
        }
        let kinds: Vec<_> = s.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![BehaviorKind::Scroll, BehaviorKind::Dwell, BehaviorKind::Copy]);
    }

    #[test]
    fn serde_round_trip() {
        let s = session()
            .append_transformation_record(record("tab-1"))
            .unwrap()
            .end();
        let json = serde_json::to_string(&s).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
