use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::application::ledger::BalanceAudit;
use crate::domain::catalog::{EngineDescriptor, RendererDescriptor};
use crate::domain::entities::{CreditTransactionRecord, ReportJobRecord, ShareLinkRecord};
use crate::domain::subject::SubjectBinding;

fn default_expiry_days() -> u32 {
    7
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SubmitReportRequest {
    pub session_id: String,
    pub engine_id: String,
    pub renderer_id: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct IssueShareLinkRequest {
    pub subject_binding: Option<SubjectBinding>,
    #[serde(default = "default_expiry_days")]
    pub expiry_days: u32,
    pub max_access_count: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct EngineList {
    pub engines: Vec<EngineDescriptor>,
}

#[derive(Debug, Serialize)]
pub struct RendererView {
    #[serde(flatten)]
    pub descriptor: RendererDescriptor,
    pub recommended: bool,
}

#[derive(Debug, Serialize)]
pub struct RendererList {
    pub renderers: Vec<RendererView>,
}

#[derive(Debug, Serialize)]
pub struct ReportJobList {
    pub jobs: Vec<ReportJobRecord>,
}

#[derive(Debug, Serialize)]
pub struct ShareLinkIssuedResponse {
    pub link: ShareLinkRecord,
    pub token: String,
    pub remaining_accesses: i32,
}

#[derive(Debug, Serialize)]
pub struct ShareLinkView {
    #[serde(flatten)]
    pub link: ShareLinkRecord,
    pub remaining_accesses: i32,
}

impl From<ShareLinkRecord> for ShareLinkView {
    fn from(link: ShareLinkRecord) -> Self {
        let remaining_accesses = link.remaining_accesses();
        Self {
            link,
            remaining_accesses,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ShareLinkList {
    pub job_id: Uuid,
    pub links: Vec<ShareLinkView>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub account_id: String,
    pub balance: i64,
    pub consistent: bool,
}

impl From<BalanceAudit> for BalanceResponse {
    fn from(audit: BalanceAudit) -> Self {
        let consistent = audit.is_consistent();
        Self {
            account_id: audit.account_id,
            balance: audit.cached_balance,
            consistent,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionList {
    pub account_id: String,
    pub transactions: Vec<CreditTransactionRecord>,
}
