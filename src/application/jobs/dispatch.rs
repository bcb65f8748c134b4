//! Hand-off of queued report jobs to whatever executes them.

use std::sync::Arc;

use apalis::prelude::Storage;
use apalis_sql::postgres::PostgresStorage;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tracing::{error, warn};
use uuid::Uuid;

use crate::application::orchestrator::ReportOrchestrator;

use super::generate::GenerateReportJob;

#[derive(Debug, Error)]
#[error("job dispatch failed: {0}")]
pub struct DispatchError(pub String);

#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, job_id: Uuid) -> Result<(), DispatchError>;
}

/// Pushes jobs onto the Postgres-backed apalis queue.
#[derive(Clone)]
pub struct ApalisDispatcher {
    storage: PostgresStorage<GenerateReportJob>,
}

impl ApalisDispatcher {
    pub fn new(storage: PostgresStorage<GenerateReportJob>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl JobDispatcher for ApalisDispatcher {
    async fn dispatch(&self, job_id: Uuid) -> Result<(), DispatchError> {
        let mut storage = self.storage.clone();
        storage
            .push(GenerateReportJob { job_id })
            .await
            .map(|_| ())
            .map_err(|err| DispatchError(err.to_string()))
    }
}

/// In-process queue used when no database is configured.
#[derive(Clone)]
pub struct LocalDispatcher {
    sender: mpsc::UnboundedSender<Uuid>,
}

impl LocalDispatcher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Uuid>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl JobDispatcher for LocalDispatcher {
    async fn dispatch(&self, job_id: Uuid) -> Result<(), DispatchError> {
        self.sender
            .send(job_id)
            .map_err(|_| DispatchError("local worker has shut down".to_string()))
    }
}

/// Drain the local queue, running at most `concurrency` jobs at once.
pub fn spawn_local_worker(
    mut receiver: mpsc::UnboundedReceiver<Uuid>,
    orchestrator: ReportOrchestrator,
    concurrency: usize,
) -> tokio::task::JoinHandle<()> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    tokio::spawn(async move {
        while let Some(job_id) = receiver.recv().await {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                warn!(
                    target = "healthreport::application::jobs::local",
                    "worker semaphore closed"
                );
                break;
            };
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                if let Err(err) = orchestrator.execute(job_id).await {
                    error!(
                        target = "healthreport::application::jobs::local",
                        job_id = %job_id,
                        error = %err,
                        "report job failed"
                    );
                }
                drop(permit);
            });
        }
    })
}
