//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::{
    AccessDenial, ArtifactRecord, CreditTransactionRecord, ReportJobRecord, Reservation,
    ShareLinkRecord,
};
use crate::domain::measurement::{AnalysisResult, MeasurementSummary};
use crate::domain::subject::SubjectBinding;
use crate::domain::types::{JobStage, OutputFormat, ReservationState, TransactionKind};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ReserveParams {
    pub account_id: String,
    pub job_id: Uuid,
    pub amount: i64,
}

#[derive(Debug, Clone)]
pub enum ReserveOutcome {
    Reserved(Reservation),
    Insufficient { available: i64 },
    /// A reservation already exists for the job; nothing was changed.
    AlreadyReserved(Reservation),
}

/// Final disposition of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Charge,
    Refund,
}

impl Settlement {
    pub fn target_state(self) -> ReservationState {
        match self {
            Settlement::Charge => ReservationState::Charged,
            Settlement::Refund => ReservationState::Refunded,
        }
    }

    pub fn transaction_kind(self) -> TransactionKind {
        match self {
            Settlement::Charge => TransactionKind::Charge,
            Settlement::Refund => TransactionKind::Refund,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SettleOutcome {
    Settled(Reservation),
    AlreadySettled(Reservation),
    Missing,
}

/// Per-account balances plus the append-only transaction log.
///
/// Every method must be linearizable per account: implementations serialize
/// the check-and-mutate of a balance, the reservation state change and the
/// appended transaction as one step.
#[async_trait]
pub trait LedgerRepo: Send + Sync {
    async fn reserve(&self, params: ReserveParams) -> Result<ReserveOutcome, RepoError>;

    async fn settle(&self, job_id: Uuid, settlement: Settlement)
    -> Result<SettleOutcome, RepoError>;

    async fn top_up(&self, account_id: &str, amount: i64) -> Result<i64, RepoError>;

    async fn balance(&self, account_id: &str) -> Result<i64, RepoError>;

    async fn find_reservation(&self, job_id: Uuid) -> Result<Option<Reservation>, RepoError>;

    async fn list_transactions(
        &self,
        account_id: &str,
    ) -> Result<Vec<CreditTransactionRecord>, RepoError>;

    async fn list_open_reservations(
        &self,
        created_before: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<Reservation>, RepoError>;
}

#[derive(Debug, Clone)]
pub struct NewReportJob {
    pub account_id: String,
    pub organization_id: Option<String>,
    pub requester_id: String,
    pub session_id: String,
    pub engine_id: String,
    pub engine_version: String,
    pub renderer_id: String,
    pub renderer_version: String,
    pub reserved_amount: i64,
}

/// Compare-and-set move of a job from `from` to `to`.
#[derive(Debug, Clone)]
pub struct StageTransition {
    pub id: Uuid,
    pub from: JobStage,
    pub to: JobStage,
    pub analysis_result: Option<AnalysisResult>,
    pub rendered_artifact_id: Option<Uuid>,
    pub error_info: Option<String>,
    pub attempts: Option<i32>,
    pub at: OffsetDateTime,
}

impl StageTransition {
    pub fn new(id: Uuid, from: JobStage, to: JobStage) -> Self {
        Self {
            id,
            from,
            to,
            analysis_result: None,
            rendered_artifact_id: None,
            error_info: None,
            attempts: None,
            at: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_analysis(mut self, analysis: AnalysisResult) -> Self {
        self.analysis_result = Some(analysis);
        self
    }

    pub fn with_artifact(mut self, artifact_id: Uuid) -> Self {
        self.rendered_artifact_id = Some(artifact_id);
        self
    }

    pub fn with_error(mut self, error_info: impl Into<String>) -> Self {
        self.error_info = Some(error_info.into());
        self
    }

    pub fn with_attempts(mut self, attempts: i32) -> Self {
        self.attempts = Some(attempts);
        self
    }
}

#[async_trait]
pub trait ReportJobsRepo: Send + Sync {
    async fn create_job(&self, job: NewReportJob) -> Result<ReportJobRecord, RepoError>;

    async fn find_job(&self, id: Uuid) -> Result<Option<ReportJobRecord>, RepoError>;

    /// Apply the transition only if the job is still in `from`; `None` otherwise.
    async fn transition(
        &self,
        transition: StageTransition,
    ) -> Result<Option<ReportJobRecord>, RepoError>;

    async fn list_for_account(
        &self,
        account_id: &str,
        limit: u32,
    ) -> Result<Vec<ReportJobRecord>, RepoError>;

    async fn list_stalled(
        &self,
        updated_before: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<ReportJobRecord>, RepoError>;
}

#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub job_id: Uuid,
    pub format: OutputFormat,
    pub content_type: String,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait ArtifactsRepo: Send + Sync {
    async fn insert_artifact(&self, artifact: NewArtifact) -> Result<ArtifactRecord, RepoError>;

    async fn find_artifact(&self, id: Uuid) -> Result<Option<ArtifactRecord>, RepoError>;
}

#[async_trait]
pub trait SummariesRepo: Send + Sync {
    async fn get_summary(&self, session_id: &str)
    -> Result<Option<MeasurementSummary>, RepoError>;
}

#[derive(Debug, Clone)]
pub struct NewShareLink {
    pub prefix: String,
    pub hashed_secret: Vec<u8>,
    pub job_id: Uuid,
    pub subject_binding: SubjectBinding,
    pub expires_at: OffsetDateTime,
    pub max_access_count: i32,
    pub created_by: String,
}

#[derive(Debug, Clone)]
pub enum ConsumeOutcome {
    Granted(ShareLinkRecord),
    Denied(AccessDenial),
}

#[async_trait]
pub trait ShareLinksRepo: Send + Sync {
    async fn create_link(&self, link: NewShareLink) -> Result<ShareLinkRecord, RepoError>;

    async fn find_link(&self, id: Uuid) -> Result<Option<ShareLinkRecord>, RepoError>;

    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ShareLinkRecord>, RepoError>;

    /// Check and count one access as a single atomic step.
    async fn consume_access(
        &self,
        id: Uuid,
        now: OffsetDateTime,
    ) -> Result<ConsumeOutcome, RepoError>;

    async fn revoke_link(
        &self,
        id: Uuid,
        revoked_at: OffsetDateTime,
    ) -> Result<Option<ShareLinkRecord>, RepoError>;

    async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<ShareLinkRecord>, RepoError>;
}
