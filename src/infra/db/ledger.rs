//! Credit ledger tables. Each mutation runs in one transaction that first
//! locks the account row, then the reservation row.

use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{
    LedgerRepo, RepoError, ReserveOutcome, ReserveParams, SettleOutcome, Settlement,
};
use crate::domain::entities::{CreditTransactionRecord, Reservation};
use crate::domain::types::{ReservationState, TransactionKind};

use super::{PostgresRepositories, map_sqlx_error};

const RESERVATION_COLUMNS: &str =
    "job_id, account_id, amount, state, created_at, settled_at";

#[derive(Debug, sqlx::FromRow)]
struct ReservationRow {
    job_id: Uuid,
    account_id: String,
    amount: i64,
    state: ReservationState,
    created_at: OffsetDateTime,
    settled_at: Option<OffsetDateTime>,
}

impl From<ReservationRow> for Reservation {
    fn from(row: ReservationRow) -> Self {
        Reservation {
            job_id: row.job_id,
            account_id: row.account_id,
            amount: row.amount,
            state: row.state,
            created_at: row.created_at,
            settled_at: row.settled_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    account_id: String,
    kind: TransactionKind,
    amount: i64,
    balance_delta: i64,
    related_job_id: Option<Uuid>,
    created_at: OffsetDateTime,
}

impl From<TransactionRow> for CreditTransactionRecord {
    fn from(row: TransactionRow) -> Self {
        CreditTransactionRecord {
            id: row.id,
            account_id: row.account_id,
            kind: row.kind,
            amount: row.amount,
            balance_delta: row.balance_delta,
            related_job_id: row.related_job_id,
            created_at: row.created_at,
        }
    }
}

/// Lock the account row, creating an empty account on first use.
async fn lock_account(
    tx: &mut Transaction<'_, Postgres>,
    account_id: &str,
) -> Result<i64, RepoError> {
    sqlx::query(
        "INSERT INTO credit_accounts (account_id, balance) VALUES ($1, 0) \
         ON CONFLICT (account_id) DO NOTHING",
    )
    .bind(account_id)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;

    sqlx::query_scalar::<_, i64>(
        "SELECT balance FROM credit_accounts WHERE account_id = $1 FOR UPDATE",
    )
    .bind(account_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(map_sqlx_error)
}

async fn append_transaction(
    tx: &mut Transaction<'_, Postgres>,
    account_id: &str,
    kind: TransactionKind,
    amount: i64,
    related_job_id: Option<Uuid>,
) -> Result<i64, RepoError> {
    let delta = kind.balance_delta(amount);

    sqlx::query(
        "INSERT INTO credit_transactions \
         (id, account_id, kind, amount, balance_delta, related_job_id, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(Uuid::new_v4())
    .bind(account_id)
    .bind(kind)
    .bind(amount)
    .bind(delta)
    .bind(related_job_id)
    .bind(OffsetDateTime::now_utc())
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;

    sqlx::query_scalar::<_, i64>(
        "UPDATE credit_accounts SET balance = balance + $2, updated_at = now() \
         WHERE account_id = $1 RETURNING balance",
    )
    .bind(account_id)
    .bind(delta)
    .fetch_one(&mut **tx)
    .await
    .map_err(map_sqlx_error)
}

#[async_trait::async_trait]
impl LedgerRepo for PostgresRepositories {
    async fn reserve(&self, params: ReserveParams) -> Result<ReserveOutcome, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let balance = lock_account(&mut tx, &params.account_id).await?;

        let existing = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM credit_reservations WHERE job_id = $1"
        ))
        .bind(params.job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        if let Some(existing) = existing {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(ReserveOutcome::AlreadyReserved(existing.into()));
        }

        if balance < params.amount {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(ReserveOutcome::Insufficient { available: balance });
        }

        let reservation = sqlx::query_as::<_, ReservationRow>(&format!(
            "INSERT INTO credit_reservations (job_id, account_id, amount, state, created_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {RESERVATION_COLUMNS}"
        ))
        .bind(params.job_id)
        .bind(&params.account_id)
        .bind(params.amount)
        .bind(ReservationState::Reserved)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        append_transaction(
            &mut tx,
            &params.account_id,
            TransactionKind::Reserve,
            params.amount,
            Some(params.job_id),
        )
        .await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(ReserveOutcome::Reserved(reservation.into()))
    }

    async fn settle(
        &self,
        job_id: Uuid,
        settlement: Settlement,
    ) -> Result<SettleOutcome, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let account_id = sqlx::query_scalar::<_, String>(
            "SELECT account_id FROM credit_reservations WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        let Some(account_id) = account_id else {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(SettleOutcome::Missing);
        };

        lock_account(&mut tx, &account_id).await?;
        let current = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM credit_reservations WHERE job_id = $1 FOR UPDATE"
        ))
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        if current.state != ReservationState::Reserved {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(SettleOutcome::AlreadySettled(current.into()));
        }

        let settled = sqlx::query_as::<_, ReservationRow>(&format!(
            "UPDATE credit_reservations SET state = $2, settled_at = $3 \
             WHERE job_id = $1 RETURNING {RESERVATION_COLUMNS}"
        ))
        .bind(job_id)
        .bind(settlement.target_state())
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        append_transaction(
            &mut tx,
            &account_id,
            settlement.transaction_kind(),
            settled.amount,
            Some(job_id),
        )
        .await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(SettleOutcome::Settled(settled.into()))
    }

    async fn top_up(&self, account_id: &str, amount: i64) -> Result<i64, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        lock_account(&mut tx, account_id).await?;
        let balance =
            append_transaction(&mut tx, account_id, TransactionKind::Topup, amount, None).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(balance)
    }

    async fn balance(&self, account_id: &str) -> Result<i64, RepoError> {
        let balance = sqlx::query_scalar::<_, i64>(
            "SELECT balance FROM credit_accounts WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(balance.unwrap_or(0))
    }

    async fn find_reservation(&self, job_id: Uuid) -> Result<Option<Reservation>, RepoError> {
        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM credit_reservations WHERE job_id = $1"
        ))
        .bind(job_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(Reservation::from))
    }

    async fn list_transactions(
        &self,
        account_id: &str,
    ) -> Result<Vec<CreditTransactionRecord>, RepoError> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            "SELECT id, account_id, kind, amount, balance_delta, related_job_id, created_at \
             FROM credit_transactions WHERE account_id = $1 ORDER BY seq",
        )
        .bind(account_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(CreditTransactionRecord::from).collect())
    }

    async fn list_open_reservations(
        &self,
        created_before: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<Reservation>, RepoError> {
        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM credit_reservations \
             WHERE state = $1 AND created_at < $2 ORDER BY created_at LIMIT $3"
        ))
        .bind(ReservationState::Reserved)
        .bind(created_before)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Reservation::from).collect())
    }
}
