//! Prepaid credit ledger: reserve before work, then charge or refund exactly once.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, error};
use uuid::Uuid;

use crate::application::repos::{
    LedgerRepo, RepoError, ReserveOutcome, ReserveParams, SettleOutcome, Settlement,
};
use crate::domain::entities::{CreditTransactionRecord, Reservation};

pub(crate) const METRIC_LEDGER_RESERVED: &str = "healthreport_ledger_reservations_total";
pub(crate) const METRIC_LEDGER_CHARGED: &str = "healthreport_ledger_charges_total";
pub(crate) const METRIC_LEDGER_REFUNDED: &str = "healthreport_ledger_refunds_total";
pub(crate) const METRIC_LEDGER_INSUFFICIENT: &str = "healthreport_ledger_insufficient_total";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient credit: {required} required, {available} available")]
    InsufficientCredit { required: i64, available: i64 },
    #[error("ledger consistency violated for job {job_id}: {message}")]
    Consistency { job_id: Uuid, message: String },
    #[error("invalid credit amount {0}")]
    InvalidAmount(i64),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl LedgerError {
    fn consistency(job_id: Uuid, message: impl Into<String>) -> Self {
        let err = Self::Consistency {
            job_id,
            message: message.into(),
        };
        error!(
            target = "healthreport::application::ledger",
            job_id = %job_id,
            error = %err,
            "ledger contract violated"
        );
        err
    }
}

/// Result of comparing the cached balance with the transaction log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceAudit {
    pub account_id: String,
    pub cached_balance: i64,
    pub computed_balance: i64,
    pub transaction_count: usize,
}

impl BalanceAudit {
    pub fn is_consistent(&self) -> bool {
        self.cached_balance == self.computed_balance && self.computed_balance >= 0
    }
}

#[derive(Clone)]
pub struct CreditLedger {
    repo: Arc<dyn LedgerRepo>,
}

impl CreditLedger {
    pub fn new(repo: Arc<dyn LedgerRepo>) -> Self {
        Self { repo }
    }

    pub async fn reserve(
        &self,
        account_id: &str,
        amount: i64,
        job_id: Uuid,
    ) -> Result<Reservation, LedgerError> {
        if amount < 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let outcome = self
            .repo
            .reserve(ReserveParams {
                account_id: account_id.to_string(),
                job_id,
                amount,
            })
            .await?;

        match outcome {
            ReserveOutcome::Reserved(reservation) => {
                counter!(METRIC_LEDGER_RESERVED).increment(1);
                debug!(
                    target = "healthreport::application::ledger",
                    account_id,
                    job_id = %job_id,
                    amount,
                    "credit reserved"
                );
                Ok(reservation)
            }
            ReserveOutcome::Insufficient { available } => {
                counter!(METRIC_LEDGER_INSUFFICIENT).increment(1);
                Err(LedgerError::InsufficientCredit {
                    required: amount,
                    available,
                })
            }
            ReserveOutcome::AlreadyReserved(_) => Err(LedgerError::consistency(
                job_id,
                "a reservation already exists for this job",
            )),
        }
    }

    /// Finalize the reserved debit of `job_id`.
    pub async fn charge(&self, job_id: Uuid) -> Result<Reservation, LedgerError> {
        let reservation = self.settle(job_id, Settlement::Charge).await?;
        counter!(METRIC_LEDGER_CHARGED).increment(1);
        Ok(reservation)
    }

    /// Return the reserved amount of `job_id` to its account.
    pub async fn refund(&self, job_id: Uuid) -> Result<Reservation, LedgerError> {
        let reservation = self.settle(job_id, Settlement::Refund).await?;
        counter!(METRIC_LEDGER_REFUNDED).increment(1);
        Ok(reservation)
    }

    async fn settle(
        &self,
        job_id: Uuid,
        settlement: Settlement,
    ) -> Result<Reservation, LedgerError> {
        match self.repo.settle(job_id, settlement).await? {
            SettleOutcome::Settled(reservation) => {
                debug!(
                    target = "healthreport::application::ledger",
                    job_id = %job_id,
                    state = reservation.state.as_str(),
                    amount = reservation.amount,
                    "reservation settled"
                );
                Ok(reservation)
            }
            SettleOutcome::AlreadySettled(reservation) => Err(LedgerError::consistency(
                job_id,
                format!("reservation is already {}", reservation.state.as_str()),
            )),
            SettleOutcome::Missing => Err(LedgerError::consistency(
                job_id,
                "no reservation exists for this job",
            )),
        }
    }

    pub async fn reservation(&self, job_id: Uuid) -> Result<Option<Reservation>, LedgerError> {
        Ok(self.repo.find_reservation(job_id).await?)
    }

    /// Reservations still held that were taken before `created_before`.
    pub async fn open_reservations(
        &self,
        created_before: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<Reservation>, LedgerError> {
        Ok(self
            .repo
            .list_open_reservations(created_before, limit)
            .await?)
    }

    pub async fn balance(&self, account_id: &str) -> Result<i64, LedgerError> {
        Ok(self.repo.balance(account_id).await?)
    }

    /// Seed an account balance. There is no payment flow behind this.
    pub async fn top_up(&self, account_id: &str, amount: i64) -> Result<i64, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        Ok(self.repo.top_up(account_id, amount).await?)
    }

    pub async fn transactions(
        &self,
        account_id: &str,
    ) -> Result<Vec<CreditTransactionRecord>, LedgerError> {
        Ok(self.repo.list_transactions(account_id).await?)
    }

    pub async fn audit_balance(&self, account_id: &str) -> Result<BalanceAudit, LedgerError> {
        let transactions = self.repo.list_transactions(account_id).await?;
        let cached_balance = self.repo.balance(account_id).await?;
        let computed_balance = transactions.iter().map(|tx| tx.balance_delta).sum();
        Ok(BalanceAudit {
            account_id: account_id.to_string(),
            cached_balance,
            computed_balance,
            transaction_count: transactions.len(),
        })
    }
}
