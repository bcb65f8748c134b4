//! Domain entities mirrored from persistent storage.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::{
    measurement::AnalysisResult,
    subject::SubjectBinding,
    types::{JobStage, OutputFormat, ReservationState, TransactionKind},
};

/// When each stage of a job was entered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageTimestamps {
    pub queued_at: Option<OffsetDateTime>,
    pub analyzing_at: Option<OffsetDateTime>,
    pub rendering_at: Option<OffsetDateTime>,
    pub finished_at: Option<OffsetDateTime>,
}

impl StageTimestamps {
    pub fn record(&mut self, stage: JobStage, at: OffsetDateTime) {
        match stage {
            JobStage::Queued => self.queued_at = Some(at),
            JobStage::Analyzing => self.analyzing_at = Some(at),
            JobStage::Rendering => self.rendering_at = Some(at),
            JobStage::Completed | JobStage::Failed => self.finished_at = Some(at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportJobRecord {
    pub id: Uuid,
    pub account_id: String,
    pub organization_id: Option<String>,
    pub requester_id: String,
    pub session_id: String,
    pub engine_id: String,
    pub engine_version: String,
    pub renderer_id: String,
    pub renderer_version: String,
    pub stage: JobStage,
    pub analysis_result: Option<AnalysisResult>,
    pub rendered_artifact_id: Option<Uuid>,
    pub reserved_amount: i64,
    pub error_info: Option<String>,
    pub attempts: i32,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub stage_timestamps: StageTimestamps,
}

/// Credit held for one job until it is charged or refunded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reservation {
    pub job_id: Uuid,
    pub account_id: String,
    pub amount: i64,
    pub state: ReservationState,
    pub created_at: OffsetDateTime,
    pub settled_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreditTransactionRecord {
    pub id: Uuid,
    pub account_id: String,
    pub kind: TransactionKind,
    pub amount: i64,
    pub balance_delta: i64,
    pub related_job_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    pub format: OutputFormat,
    pub content_type: String,
    #[serde(skip)]
    pub body: Vec<u8>,
    pub created_at: OffsetDateTime,
}

/// Reason a share link refuses access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDenial {
    Unknown,
    Revoked,
    Expired,
    Exhausted,
    SubjectMismatch,
}

impl AccessDenial {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessDenial::Unknown => "unknown",
            AccessDenial::Revoked => "revoked",
            AccessDenial::Expired => "expired",
            AccessDenial::Exhausted => "exhausted",
            AccessDenial::SubjectMismatch => "subject_mismatch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareLinkRecord {
    pub id: Uuid,
    pub prefix: String,
    #[serde(skip)]
    pub hashed_secret: Vec<u8>,
    pub job_id: Uuid,
    #[serde(skip)]
    pub subject_binding: SubjectBinding,
    pub expires_at: OffsetDateTime,
    pub max_access_count: i32,
    pub access_count: i32,
    pub created_by: String,
    pub created_at: OffsetDateTime,
    pub revoked_at: Option<OffsetDateTime>,
}

impl ShareLinkRecord {
    /// Why the link would refuse one more access at `now`, if it would.
    pub fn denial_at(&self, now: OffsetDateTime) -> Option<AccessDenial> {
        if self.revoked_at.is_some() {
            return Some(AccessDenial::Revoked);
        }
        if now >= self.expires_at {
            return Some(AccessDenial::Expired);
        }
        if self.access_count >= self.max_access_count {
            return Some(AccessDenial::Exhausted);
        }
        None
    }

    pub fn remaining_accesses(&self) -> i32 {
        (self.max_access_count - self.access_count).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn link(now: OffsetDateTime) -> ShareLinkRecord {
        ShareLinkRecord {
            id: Uuid::new_v4(),
            prefix: "abc".into(),
            hashed_secret: Vec::new(),
            job_id: Uuid::new_v4(),
            subject_binding: SubjectBinding::IdentityClaim {
                issuer: "clinic".into(),
                subject: "p-1".into(),
            },
            expires_at: now + Duration::days(1),
            max_access_count: 2,
            access_count: 0,
            created_by: "tester".into(),
            created_at: now,
            revoked_at: None,
        }
    }

    #[test]
    fn revocation_wins_over_other_denials() {
        let now = OffsetDateTime::now_utc();
        let mut record = link(now);
        record.revoked_at = Some(now);
        record.access_count = 2;
        assert_eq!(
            record.denial_at(now + Duration::days(2)),
            Some(AccessDenial::Revoked)
        );
    }

    #[test]
    fn link_expires_at_the_boundary() {
        let now = OffsetDateTime::now_utc();
        let record = link(now);
        assert_eq!(record.denial_at(now), None);
        assert_eq!(
            record.denial_at(record.expires_at),
            Some(AccessDenial::Expired)
        );
    }

    #[test]
    fn exhausted_link_reports_zero_remaining() {
        let now = OffsetDateTime::now_utc();
        let mut record = link(now);
        record.access_count = 2;
        assert_eq!(record.denial_at(now), Some(AccessDenial::Exhausted));
        assert_eq!(record.remaining_accesses(), 0);
    }
}
