//! Process-local store used when no database is configured, and by tests.
//!
//! Ledger mutations lock the account entry first and the reservation entry
//! second; nothing acquires them in the opposite order.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{
    ArtifactsRepo, ConsumeOutcome, LedgerRepo, NewArtifact, NewReportJob, NewShareLink,
    RepoError, ReportJobsRepo, ReserveOutcome, ReserveParams, SettleOutcome, Settlement,
    ShareLinksRepo, StageTransition, SummariesRepo,
};
use crate::domain::entities::{
    AccessDenial, ArtifactRecord, CreditTransactionRecord, ReportJobRecord, Reservation,
    ShareLinkRecord, StageTimestamps,
};
use crate::domain::measurement::MeasurementSummary;
use crate::domain::types::{JobStage, ReservationState, TransactionKind};

#[derive(Debug, Default)]
struct AccountBook {
    balance: i64,
    transactions: Vec<CreditTransactionRecord>,
}

impl AccountBook {
    fn append(
        &mut self,
        account_id: &str,
        kind: TransactionKind,
        amount: i64,
        job: Option<Uuid>,
    ) -> Result<(), RepoError> {
        let delta = kind.balance_delta(amount);
        self.balance = self
            .balance
            .checked_add(delta)
            .ok_or_else(|| RepoError::InvalidInput {
                message: format!("balance of account `{account_id}` would overflow"),
            })?;
        self.transactions.push(CreditTransactionRecord {
            id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            kind,
            amount,
            balance_delta: delta,
            related_job_id: job,
            created_at: OffsetDateTime::now_utc(),
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryRepositories {
    accounts: DashMap<String, AccountBook>,
    reservations: DashMap<Uuid, Reservation>,
    jobs: DashMap<Uuid, ReportJobRecord>,
    artifacts: DashMap<Uuid, ArtifactRecord>,
    summaries: DashMap<String, MeasurementSummary>,
    share_links: DashMap<Uuid, ShareLinkRecord>,
    share_prefixes: DashMap<String, Uuid>,
}

impl MemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a summary available to `get_summary`.
    pub fn insert_summary(&self, summary: MeasurementSummary) {
        self.summaries.insert(summary.session_id.clone(), summary);
    }

    /// Load starting balances and summaries. Balances are credited as top-ups
    /// so the transaction log still explains them.
    pub async fn apply_seed(&self, seed: MemorySeed) -> Result<(), RepoError> {
        for (account_id, amount) in seed.accounts {
            if amount <= 0 {
                return Err(RepoError::InvalidInput {
                    message: format!("seed balance for `{account_id}` must be positive"),
                });
            }
            self.top_up(&account_id, amount).await?;
        }
        for summary in seed.summaries {
            self.insert_summary(summary);
        }
        Ok(())
    }
}

/// Starting data for an in-memory deployment, read from JSON.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemorySeed {
    #[serde(default)]
    pub accounts: BTreeMap<String, i64>,
    #[serde(default)]
    pub summaries: Vec<MeasurementSummary>,
}

#[async_trait]
impl LedgerRepo for MemoryRepositories {
    async fn reserve(&self, params: ReserveParams) -> Result<ReserveOutcome, RepoError> {
        let mut book = self.accounts.entry(params.account_id.clone()).or_default();

        match self.reservations.entry(params.job_id) {
            Entry::Occupied(existing) => Ok(ReserveOutcome::AlreadyReserved(existing.get().clone())),
            Entry::Vacant(slot) => {
                if book.balance < params.amount {
                    return Ok(ReserveOutcome::Insufficient {
                        available: book.balance,
                    });
                }
                book.append(
                    &params.account_id,
                    TransactionKind::Reserve,
                    params.amount,
                    Some(params.job_id),
                )?;
                let reservation = Reservation {
                    job_id: params.job_id,
                    account_id: params.account_id,
                    amount: params.amount,
                    state: ReservationState::Reserved,
                    created_at: OffsetDateTime::now_utc(),
                    settled_at: None,
                };
                slot.insert(reservation.clone());
                Ok(ReserveOutcome::Reserved(reservation))
            }
        }
    }

    async fn settle(
        &self,
        job_id: Uuid,
        settlement: Settlement,
    ) -> Result<SettleOutcome, RepoError> {
        let Some(account_id) = self
            .reservations
            .get(&job_id)
            .map(|reservation| reservation.account_id.clone())
        else {
            return Ok(SettleOutcome::Missing);
        };

        let mut book = self.accounts.entry(account_id.clone()).or_default();
        let Some(mut reservation) = self.reservations.get_mut(&job_id) else {
            return Ok(SettleOutcome::Missing);
        };
        if reservation.state != ReservationState::Reserved {
            return Ok(SettleOutcome::AlreadySettled(reservation.clone()));
        }

        book.append(
            &account_id,
            settlement.transaction_kind(),
            reservation.amount,
            Some(job_id),
        )?;
        reservation.state = settlement.target_state();
        reservation.settled_at = Some(OffsetDateTime::now_utc());
        Ok(SettleOutcome::Settled(reservation.clone()))
    }

    async fn top_up(&self, account_id: &str, amount: i64) -> Result<i64, RepoError> {
        let mut book = self.accounts.entry(account_id.to_string()).or_default();
        book.append(account_id, TransactionKind::Topup, amount, None)?;
        Ok(book.balance)
    }

    async fn balance(&self, account_id: &str) -> Result<i64, RepoError> {
        Ok(self
            .accounts
            .get(account_id)
            .map(|book| book.balance)
            .unwrap_or(0))
    }

    async fn find_reservation(&self, job_id: Uuid) -> Result<Option<Reservation>, RepoError> {
        Ok(self.reservations.get(&job_id).map(|entry| entry.clone()))
    }

    async fn list_transactions(
        &self,
        account_id: &str,
    ) -> Result<Vec<CreditTransactionRecord>, RepoError> {
        Ok(self
            .accounts
            .get(account_id)
            .map(|book| book.transactions.clone())
            .unwrap_or_default())
    }

    async fn list_open_reservations(
        &self,
        created_before: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<Reservation>, RepoError> {
        let mut open: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|entry| {
                entry.state == ReservationState::Reserved && entry.created_at < created_before
            })
            .map(|entry| entry.clone())
            .collect();
        open.sort_by_key(|reservation| reservation.created_at);
        open.truncate(limit as usize);
        Ok(open)
    }
}

#[async_trait]
impl ReportJobsRepo for MemoryRepositories {
    async fn create_job(&self, job: NewReportJob) -> Result<ReportJobRecord, RepoError> {
        let now = OffsetDateTime::now_utc();
        let mut stage_timestamps = StageTimestamps::default();
        stage_timestamps.record(JobStage::Queued, now);
        let record = ReportJobRecord {
            id: Uuid::new_v4(),
            account_id: job.account_id,
            organization_id: job.organization_id,
            requester_id: job.requester_id,
            session_id: job.session_id,
            engine_id: job.engine_id,
            engine_version: job.engine_version,
            renderer_id: job.renderer_id,
            renderer_version: job.renderer_version,
            stage: JobStage::Queued,
            analysis_result: None,
            rendered_artifact_id: None,
            reserved_amount: job.reserved_amount,
            error_info: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
            stage_timestamps,
        };
        self.jobs.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<ReportJobRecord>, RepoError> {
        Ok(self.jobs.get(&id).map(|entry| entry.clone()))
    }

    async fn transition(
        &self,
        transition: StageTransition,
    ) -> Result<Option<ReportJobRecord>, RepoError> {
        let Some(mut job) = self.jobs.get_mut(&transition.id) else {
            return Ok(None);
        };
        if job.stage != transition.from {
            return Ok(None);
        }

        job.stage = transition.to;
        job.stage_timestamps.record(transition.to, transition.at);
        job.updated_at = transition.at;
        if let Some(analysis) = transition.analysis_result {
            job.analysis_result = Some(analysis);
        }
        if let Some(artifact_id) = transition.rendered_artifact_id {
            job.rendered_artifact_id = Some(artifact_id);
        }
        if let Some(error_info) = transition.error_info {
            job.error_info = Some(error_info);
        }
        if let Some(attempts) = transition.attempts {
            job.attempts = attempts;
        }
        Ok(Some(job.clone()))
    }

    async fn list_for_account(
        &self,
        account_id: &str,
        limit: u32,
    ) -> Result<Vec<ReportJobRecord>, RepoError> {
        let mut jobs: Vec<ReportJobRecord> = self
            .jobs
            .iter()
            .filter(|entry| entry.account_id == account_id)
            .map(|entry| entry.clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        jobs.truncate(limit as usize);
        Ok(jobs)
    }

    async fn list_stalled(
        &self,
        updated_before: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<ReportJobRecord>, RepoError> {
        let mut jobs: Vec<ReportJobRecord> = self
            .jobs
            .iter()
            .filter(|entry| !entry.stage.is_terminal() && entry.updated_at < updated_before)
            .map(|entry| entry.clone())
            .collect();
        jobs.sort_by_key(|job| job.updated_at);
        jobs.truncate(limit as usize);
        Ok(jobs)
    }
}

#[async_trait]
impl ArtifactsRepo for MemoryRepositories {
    async fn insert_artifact(&self, artifact: NewArtifact) -> Result<ArtifactRecord, RepoError> {
        let record = ArtifactRecord {
            id: Uuid::new_v4(),
            job_id: artifact.job_id,
            format: artifact.format,
            content_type: artifact.content_type,
            body: artifact.body,
            created_at: OffsetDateTime::now_utc(),
        };
        self.artifacts.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_artifact(&self, id: Uuid) -> Result<Option<ArtifactRecord>, RepoError> {
        Ok(self.artifacts.get(&id).map(|entry| entry.clone()))
    }
}

#[async_trait]
impl SummariesRepo for MemoryRepositories {
    async fn get_summary(
        &self,
        session_id: &str,
    ) -> Result<Option<MeasurementSummary>, RepoError> {
        Ok(self.summaries.get(session_id).map(|entry| entry.clone()))
    }
}

#[async_trait]
impl ShareLinksRepo for MemoryRepositories {
    async fn create_link(&self, link: NewShareLink) -> Result<ShareLinkRecord, RepoError> {
        let record = ShareLinkRecord {
            id: Uuid::new_v4(),
            prefix: link.prefix,
            hashed_secret: link.hashed_secret,
            job_id: link.job_id,
            subject_binding: link.subject_binding,
            expires_at: link.expires_at,
            max_access_count: link.max_access_count,
            access_count: 0,
            created_by: link.created_by,
            created_at: OffsetDateTime::now_utc(),
            revoked_at: None,
        };

        match self.share_prefixes.entry(record.prefix.clone()) {
            Entry::Occupied(_) => {
                return Err(RepoError::Duplicate {
                    constraint: "share_links_prefix_key".to_string(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(record.id);
            }
        }
        self.share_links.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_link(&self, id: Uuid) -> Result<Option<ShareLinkRecord>, RepoError> {
        Ok(self.share_links.get(&id).map(|entry| entry.clone()))
    }

    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ShareLinkRecord>, RepoError> {
        let Some(id) = self.share_prefixes.get(prefix).map(|entry| *entry) else {
            return Ok(None);
        };
        Ok(self.share_links.get(&id).map(|entry| entry.clone()))
    }

    async fn consume_access(
        &self,
        id: Uuid,
        now: OffsetDateTime,
    ) -> Result<ConsumeOutcome, RepoError> {
        let Some(mut link) = self.share_links.get_mut(&id) else {
            return Ok(ConsumeOutcome::Denied(AccessDenial::Unknown));
        };
        if let Some(denial) = link.denial_at(now) {
            return Ok(ConsumeOutcome::Denied(denial));
        }
        link.access_count += 1;
        Ok(ConsumeOutcome::Granted(link.clone()))
    }

    async fn revoke_link(
        &self,
        id: Uuid,
        revoked_at: OffsetDateTime,
    ) -> Result<Option<ShareLinkRecord>, RepoError> {
        let Some(mut link) = self.share_links.get_mut(&id) else {
            return Ok(None);
        };
        if link.revoked_at.is_none() {
            link.revoked_at = Some(revoked_at);
        }
        Ok(Some(link.clone()))
    }

    async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<ShareLinkRecord>, RepoError> {
        let mut links: Vec<ShareLinkRecord> = self
            .share_links
            .iter()
            .filter(|entry| entry.job_id == job_id)
            .map(|entry| entry.clone())
            .collect();
        links.sort_by_key(|link| link.created_at);
        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reserve(account: &str, job_id: Uuid, amount: i64) -> ReserveParams {
        ReserveParams {
            account_id: account.to_string(),
            job_id,
            amount,
        }
    }

    #[tokio::test]
    async fn reserve_then_settle_once() {
        let repo = MemoryRepositories::new();
        repo.top_up("acct", 10).await.expect("top up");
        let job_id = Uuid::new_v4();

        let outcome = repo.reserve(reserve("acct", job_id, 7)).await.expect("reserve");
        assert!(matches!(outcome, ReserveOutcome::Reserved(_)));
        assert_eq!(repo.balance("acct").await.expect("balance"), 3);

        let again = repo.reserve(reserve("acct", job_id, 7)).await.expect("reserve");
        assert!(matches!(again, ReserveOutcome::AlreadyReserved(_)));
        assert_eq!(repo.balance("acct").await.expect("balance"), 3);

        let settled = repo
            .settle(job_id, Settlement::Refund)
            .await
            .expect("settle");
        assert!(matches!(settled, SettleOutcome::Settled(_)));
        let repeated = repo
            .settle(job_id, Settlement::Charge)
            .await
            .expect("settle");
        assert!(matches!(repeated, SettleOutcome::AlreadySettled(_)));
        assert_eq!(repo.balance("acct").await.expect("balance"), 10);
    }

    #[tokio::test]
    async fn insufficient_balance_leaves_no_trace() {
        let repo = MemoryRepositories::new();
        repo.top_up("acct", 3).await.expect("top up");
        let job_id = Uuid::new_v4();

        let outcome = repo.reserve(reserve("acct", job_id, 7)).await.expect("reserve");
        assert!(matches!(
            outcome,
            ReserveOutcome::Insufficient { available: 3 }
        ));
        assert!(repo.find_reservation(job_id).await.expect("find").is_none());
        assert_eq!(repo.list_transactions("acct").await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn top_up_past_the_balance_limit_is_rejected() {
        let repo = MemoryRepositories::new();
        repo.top_up("acct", i64::MAX).await.expect("top up");

        let err = repo.top_up("acct", 1).await.expect_err("overflow");
        assert!(matches!(err, RepoError::InvalidInput { .. }));
        assert_eq!(repo.balance("acct").await.expect("balance"), i64::MAX);
        assert_eq!(repo.list_transactions("acct").await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn seed_credits_accounts_and_loads_summaries() {
        let repo = MemoryRepositories::new();
        let seed: MemorySeed = serde_json::from_str(
            r#"{
                "accounts": { "acct-1": 25 },
                "summaries": [{
                    "session_id": "session-9",
                    "subject_id": "subject-9",
                    "quality_score": 72,
                    "per_signal_metrics": { "eeg": { "alpha": 0.4 } }
                }]
            }"#,
        )
        .expect("seed json");

        repo.apply_seed(seed).await.expect("apply seed");

        assert_eq!(repo.balance("acct-1").await.expect("balance"), 25);
        let transactions = repo.list_transactions("acct-1").await.expect("list");
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].kind, TransactionKind::Topup);
        let summary = repo
            .get_summary("session-9")
            .await
            .expect("lookup")
            .expect("summary");
        assert_eq!(summary.quality_score, 72);
    }

    #[tokio::test]
    async fn seed_rejects_non_positive_balances() {
        let repo = MemoryRepositories::new();
        let seed = MemorySeed {
            accounts: BTreeMap::from([("acct-1".to_string(), 0)]),
            summaries: Vec::new(),
        };

        let err = repo.apply_seed(seed).await.expect_err("zero balance");
        assert!(matches!(err, RepoError::InvalidInput { .. }));
        assert!(repo.list_transactions("acct-1").await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn transition_requires_expected_stage() {
        let repo = MemoryRepositories::new();
        let job = repo
            .create_job(NewReportJob {
                account_id: "acct".into(),
                organization_id: None,
                requester_id: "user".into(),
                session_id: "s-1".into(),
                engine_id: "engine".into(),
                engine_version: "1".into(),
                renderer_id: "renderer".into(),
                renderer_version: "1".into(),
                reserved_amount: 7,
            })
            .await
            .expect("create");

        let stale = repo
            .transition(StageTransition::new(
                job.id,
                JobStage::Analyzing,
                JobStage::Rendering,
            ))
            .await
            .expect("transition");
        assert!(stale.is_none());

        let moved = repo
            .transition(StageTransition::new(
                job.id,
                JobStage::Queued,
                JobStage::Analyzing,
            ))
            .await
            .expect("transition")
            .expect("applied");
        assert_eq!(moved.stage, JobStage::Analyzing);
        assert!(moved.stage_timestamps.analyzing_at.is_some());
    }
}
