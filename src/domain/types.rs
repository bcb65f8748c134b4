//! Shared domain enumerations aligned with persisted database enums.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;

/// Stage of a report job along the generation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "report_stage", rename_all = "snake_case")]
pub enum JobStage {
    Queued,
    Analyzing,
    Rendering,
    Completed,
    Failed,
}

impl JobStage {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStage::Queued => "queued",
            JobStage::Analyzing => "analyzing",
            JobStage::Rendering => "rendering",
            JobStage::Completed => "completed",
            JobStage::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStage::Completed | JobStage::Failed)
    }

    /// Callers may only cancel before rendering starts.
    pub fn is_cancellable(self) -> bool {
        matches!(self, JobStage::Queued | JobStage::Analyzing)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: JobStage) -> bool {
        match (self, next) {
            (JobStage::Queued, JobStage::Analyzing)
            | (JobStage::Analyzing, JobStage::Rendering)
            | (JobStage::Rendering, JobStage::Completed) => true,
            (current, JobStage::Failed) => !current.is_terminal(),
            _ => false,
        }
    }

    pub fn ensure_transition(self, next: JobStage) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl Display for JobStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for JobStage {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "queued" => Ok(JobStage::Queued),
            "analyzing" => Ok(JobStage::Analyzing),
            "rendering" => Ok(JobStage::Rendering),
            "completed" => Ok(JobStage::Completed),
            "failed" => Ok(JobStage::Failed),
            _ => Err(()),
        }
    }
}

/// Accounting kind of a credit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "credit_transaction_kind", rename_all = "snake_case")]
pub enum TransactionKind {
    Reserve,
    Charge,
    Refund,
    Topup,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Reserve => "reserve",
            TransactionKind::Charge => "charge",
            TransactionKind::Refund => "refund",
            TransactionKind::Topup => "topup",
        }
    }

    /// Signed balance effect of a transaction of this kind.
    ///
    /// A charge finalizes an earlier reserve, so it records the amount without
    /// moving the balance a second time.
    pub fn balance_delta(self, amount: i64) -> i64 {
        match self {
            TransactionKind::Reserve => -amount,
            TransactionKind::Charge => 0,
            TransactionKind::Refund | TransactionKind::Topup => amount,
        }
    }
}

impl Display for TransactionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement state of a job's credit reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "reservation_state", rename_all = "snake_case")]
pub enum ReservationState {
    Reserved,
    Charged,
    Refunded,
}

impl ReservationState {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationState::Reserved => "reserved",
            ReservationState::Charged => "charged",
            ReservationState::Refunded => "refunded",
        }
    }

    pub fn is_open(self) -> bool {
        self == ReservationState::Reserved
    }
}

impl Display for ReservationState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deliverable format produced by a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "output_format", rename_all = "snake_case")]
pub enum OutputFormat {
    Web,
    Pdf,
    Json,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Web => "web",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Json => "json",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Web => "text/html; charset=utf-8",
            OutputFormat::Pdf => "application/pdf",
            OutputFormat::Json => "application/json",
        }
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(Self::Web),
            "pdf" => Ok(Self::Pdf),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

/// Who may view reports produced by a renderer inside the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessControl {
    Public,
    Organization,
}

/// Signal families a measurement summary can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Eeg,
    Ppg,
    Acc,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Eeg => "eeg",
            DataType::Ppg => "ppg",
            DataType::Acc => "acc",
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
