use std::sync::Arc;

use crate::application::ledger::CreditLedger;
use crate::application::orchestrator::ReportOrchestrator;
use crate::application::share_links::ShareLinkService;

/// Services reachable from the authenticated API.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: ReportOrchestrator,
    pub ledger: CreditLedger,
    pub share_links: Arc<ShareLinkService>,
}

impl ApiState {
    pub fn new(
        orchestrator: ReportOrchestrator,
        ledger: CreditLedger,
        share_links: Arc<ShareLinkService>,
    ) -> Self {
        Self {
            orchestrator,
            ledger,
            share_links,
        }
    }
}
