mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use healthreport::application::orchestrator::{
    ERROR_CANCELLED, ERROR_DISPATCH_FAILED, ERROR_INSUFFICIENT_CREDIT, ERROR_STALLED,
    OrchestratorError, SubmitReportCommand,
};
use healthreport::application::repos::{ReportJobsRepo, StageTransition};
use healthreport::domain::types::{JobStage, ReservationState, TransactionKind};
use uuid::Uuid;

use common::{
    ENGINE, FLAKY_RENDERER, Harness, ORG_RENDERER, WEB_RENDERER, caller, org_caller,
    submit_command, summary,
};

async fn kinds(harness: &Harness) -> Vec<TransactionKind> {
    harness
        .ledger
        .transactions(&caller().account_id)
        .await
        .expect("transactions")
        .into_iter()
        .map(|tx| tx.kind)
        .collect()
}

#[tokio::test]
async fn completed_job_is_charged_once() {
    let harness = Harness::funded(10).await;

    let job_id = harness.submit_and_run(WEB_RENDERER).await;

    let job = harness
        .orchestrator
        .get_job(&caller(), job_id)
        .await
        .expect("job");
    assert_eq!(job.stage, JobStage::Completed);
    assert_eq!(job.reserved_amount, 7);
    assert!(job.analysis_result.is_some());
    assert!(job.stage_timestamps.finished_at.is_some());
    assert_eq!(harness.balance().await, 3);
    assert_eq!(
        kinds(&harness).await,
        vec![
            TransactionKind::Topup,
            TransactionKind::Reserve,
            TransactionKind::Charge
        ]
    );

    let charge = harness
        .ledger
        .transactions(&caller().account_id)
        .await
        .expect("transactions")
        .into_iter()
        .find(|tx| tx.kind == TransactionKind::Charge)
        .expect("charge row");
    assert_eq!(charge.amount, 7);
    assert_eq!(charge.related_job_id, Some(job_id));

    let artifact = harness
        .orchestrator
        .get_artifact(&caller(), job_id)
        .await
        .expect("artifact");
    assert!(artifact.content_type.starts_with("text/html"));
    let html = String::from_utf8(artifact.body).expect("utf8");
    assert!(html.contains("Stress index for subject-9"));
}

#[tokio::test]
async fn insufficient_credit_fails_without_moving_balance() {
    let harness = Harness::funded(3).await;

    let err = harness
        .orchestrator
        .submit(&caller(), submit_command(WEB_RENDERER))
        .await
        .expect_err("not enough credit");

    let OrchestratorError::InsufficientCredit {
        job_id,
        required,
        available,
    } = err
    else {
        panic!("unexpected error: {err}");
    };
    assert_eq!((required, available), (7, 3));
    let job = harness
        .orchestrator
        .get_job(&caller(), job_id)
        .await
        .expect("job is kept");
    assert_eq!(job.stage, JobStage::Failed);
    assert_eq!(job.error_info.as_deref(), Some(ERROR_INSUFFICIENT_CREDIT));
    assert_eq!(harness.balance().await, 3);
    assert_eq!(kinds(&harness).await, vec![TransactionKind::Topup]);
    assert!(harness.dispatcher.dispatched.lock().await.is_empty());
}

#[tokio::test]
async fn engine_failing_twice_refunds_the_reservation() {
    let harness = Harness::funded(10).await;
    harness.engine.fail_next(2);

    let job_id = harness.submit_and_run(WEB_RENDERER).await;

    let job = harness
        .orchestrator
        .get_job(&caller(), job_id)
        .await
        .expect("job");
    assert_eq!(job.stage, JobStage::Failed);
    assert_eq!(job.attempts, 2);
    assert!(
        job.error_info
            .as_deref()
            .is_some_and(|info| info.starts_with("engine_failed"))
    );
    assert_eq!(harness.engine.analyze_calls.load(Ordering::SeqCst), 2);
    assert_eq!(harness.balance().await, 10);
    assert_eq!(
        kinds(&harness).await,
        vec![
            TransactionKind::Topup,
            TransactionKind::Reserve,
            TransactionKind::Refund
        ]
    );
    let reservation = harness
        .ledger
        .reservation(job_id)
        .await
        .expect("lookup")
        .expect("reservation");
    assert_eq!(reservation.state, ReservationState::Refunded);
}

#[tokio::test]
async fn engine_recovers_on_second_attempt() {
    let harness = Harness::funded(10).await;
    harness.engine.fail_next(1);

    let job_id = harness.submit_and_run(WEB_RENDERER).await;

    let job = harness
        .orchestrator
        .get_job(&caller(), job_id)
        .await
        .expect("job");
    assert_eq!(job.stage, JobStage::Completed);
    assert_eq!(job.attempts, 2);
    assert_eq!(harness.balance().await, 3);
}

#[tokio::test]
async fn engine_timeout_counts_as_an_attempt() {
    let harness = Harness::funded(10).await;
    harness.engine.hang_next(1);

    let job_id = harness.submit_and_run(WEB_RENDERER).await;

    let job = harness
        .orchestrator
        .get_job(&caller(), job_id)
        .await
        .expect("job");
    assert_eq!(job.stage, JobStage::Completed);
    assert_eq!(job.attempts, 2);
}

#[tokio::test]
async fn renderer_failure_is_not_retried_and_refunds() {
    let harness = Harness::funded(10).await;
    harness.renderer.fail.store(true, Ordering::SeqCst);

    let job_id = harness.submit_and_run(FLAKY_RENDERER).await;

    let job = harness
        .orchestrator
        .get_job(&caller(), job_id)
        .await
        .expect("job");
    assert_eq!(job.stage, JobStage::Failed);
    assert!(job.analysis_result.is_some());
    assert_eq!(job.rendered_artifact_id, None);
    assert_eq!(harness.renderer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.balance().await, 10);
}

#[tokio::test]
async fn renderer_timeout_refunds() {
    let harness = Harness::funded(10).await;
    harness.renderer.hang.store(true, Ordering::SeqCst);

    let job_id = harness.submit_and_run(FLAKY_RENDERER).await;

    let job = harness
        .orchestrator
        .get_job(&caller(), job_id)
        .await
        .expect("job");
    assert_eq!(job.stage, JobStage::Failed);
    assert!(
        job.error_info
            .as_deref()
            .is_some_and(|info| info.starts_with("renderer_failed") && info.contains("timed out"))
    );
    assert_eq!(harness.renderer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.balance().await, 10);
    assert_eq!(
        kinds(&harness).await,
        vec![
            TransactionKind::Topup,
            TransactionKind::Reserve,
            TransactionKind::Refund
        ]
    );
}

#[tokio::test]
async fn cancel_while_analyzing_drops_the_late_result() {
    let harness = Harness::funded(10).await;
    harness.engine.hang_next(1);
    let job = harness
        .orchestrator
        .submit(&caller(), submit_command(WEB_RENDERER))
        .await
        .expect("submit");

    let worker = harness.orchestrator.clone();
    let running = tokio::spawn(async move { worker.execute(job.id).await });
    tokio::time::sleep(Duration::from_millis(30)).await;

    let cancelled = harness
        .orchestrator
        .cancel(&caller(), job.id)
        .await
        .expect("cancel while analyzing");
    assert_eq!(cancelled.stage, JobStage::Failed);

    let finished = running.await.expect("worker task").expect("execute");
    assert_eq!(finished.stage, JobStage::Failed);
    assert_eq!(finished.error_info.as_deref(), Some(ERROR_CANCELLED));
    assert_eq!(finished.analysis_result, None);
    assert_eq!(harness.renderer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.balance().await, 10);
    assert_eq!(
        kinds(&harness).await,
        vec![
            TransactionKind::Topup,
            TransactionKind::Reserve,
            TransactionKind::Refund
        ]
    );
}

#[tokio::test]
async fn queued_job_can_be_cancelled_once() {
    let harness = Harness::funded(10).await;
    let job = harness
        .orchestrator
        .submit(&caller(), submit_command(WEB_RENDERER))
        .await
        .expect("submit");
    assert_eq!(harness.balance().await, 3);

    let cancelled = harness
        .orchestrator
        .cancel(&caller(), job.id)
        .await
        .expect("cancel");
    assert_eq!(cancelled.stage, JobStage::Failed);
    assert_eq!(cancelled.error_info.as_deref(), Some(ERROR_CANCELLED));
    assert_eq!(harness.balance().await, 10);

    let again = harness.orchestrator.cancel(&caller(), job.id).await;
    assert!(matches!(
        again,
        Err(OrchestratorError::InvalidState {
            stage: JobStage::Failed,
            ..
        })
    ));

    // The worker that later picks the job up leaves it alone.
    let executed = harness.orchestrator.execute(job.id).await.expect("execute");
    assert_eq!(executed.stage, JobStage::Failed);
    assert_eq!(harness.engine.analyze_calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.balance().await, 10);
}

#[tokio::test]
async fn completed_job_cannot_be_cancelled() {
    let harness = Harness::funded(10).await;
    let job_id = harness.submit_and_run(WEB_RENDERER).await;

    let err = harness
        .orchestrator
        .cancel(&caller(), job_id)
        .await
        .expect_err("completed");
    assert!(matches!(
        err,
        OrchestratorError::InvalidState {
            stage: JobStage::Completed,
            ..
        }
    ));
    assert_eq!(harness.balance().await, 3);
}

#[tokio::test]
async fn rejected_requests_reserve_nothing() {
    let harness = Harness::funded(10).await;
    harness.repos.insert_summary(summary("noisy", 20));

    let cases = [
        SubmitReportCommand {
            session_id: "missing".to_string(),
            ..submit_command(WEB_RENDERER)
        },
        SubmitReportCommand {
            session_id: "noisy".to_string(),
            ..submit_command(WEB_RENDERER)
        },
        SubmitReportCommand {
            engine_id: "ppg-cardio".to_string(),
            ..submit_command(WEB_RENDERER)
        },
        submit_command("not-a-renderer"),
        submit_command(ORG_RENDERER),
    ];
    for cmd in cases {
        let err = harness
            .orchestrator
            .submit(&caller(), cmd.clone())
            .await
            .expect_err("rejected");
        assert!(
            matches!(err, OrchestratorError::Validation(_)),
            "{cmd:?} gave {err}"
        );
    }

    assert_eq!(kinds(&harness).await, vec![TransactionKind::Topup]);
    assert!(
        harness
            .orchestrator
            .list_jobs(&caller(), 10)
            .await
            .expect("jobs")
            .is_empty()
    );
}

#[tokio::test]
async fn engine_rejection_stops_submission() {
    let harness = Harness::funded(10).await;
    harness.engine.reject.store(true, Ordering::SeqCst);

    let err = harness
        .orchestrator
        .submit(&caller(), submit_command(WEB_RENDERER))
        .await
        .expect_err("rejected");
    assert!(matches!(err, OrchestratorError::Validation(ref msg) if msg.contains("channel")));
    assert_eq!(harness.balance().await, 10);
}

#[tokio::test]
async fn organization_renderer_needs_an_organization() {
    let harness = Harness::new();
    harness
        .ledger
        .top_up(&org_caller().account_id, 10)
        .await
        .expect("top up");

    let job = harness
        .orchestrator
        .submit(&org_caller(), submit_command(ORG_RENDERER))
        .await
        .expect("organization caller");
    assert_eq!(job.organization_id.as_deref(), Some("clinic-7"));
    assert_eq!(job.engine_id, ENGINE);
}

#[tokio::test]
async fn dispatch_failure_refunds() {
    let harness = Harness::funded(10).await;
    harness.dispatcher.fail.store(true, Ordering::SeqCst);

    let err = harness
        .orchestrator
        .submit(&caller(), submit_command(WEB_RENDERER))
        .await
        .expect_err("dispatch fails");
    let OrchestratorError::Dispatch { job_id, .. } = err else {
        panic!("unexpected error: {err}");
    };

    let job = harness
        .orchestrator
        .get_job(&caller(), job_id)
        .await
        .expect("job");
    assert_eq!(job.stage, JobStage::Failed);
    assert_eq!(job.error_info.as_deref(), Some(ERROR_DISPATCH_FAILED));
    assert_eq!(harness.balance().await, 10);
}

#[tokio::test]
async fn balance_matches_transaction_log() {
    let harness = Harness::funded(20).await;
    harness.submit_and_run(WEB_RENDERER).await;
    harness.engine.fail_next(2);
    harness.submit_and_run(WEB_RENDERER).await;
    harness
        .orchestrator
        .submit(&caller(), submit_command(WEB_RENDERER))
        .await
        .expect("queued");

    let audit = harness
        .ledger
        .audit_balance(&caller().account_id)
        .await
        .expect("audit");
    assert!(audit.is_consistent());
    assert_eq!(audit.cached_balance, 20 - 7 - 7);
    assert_eq!(audit.transaction_count, 1 + 2 + 2 + 1);
}

#[tokio::test]
async fn jobs_are_private_to_their_account() {
    let harness = Harness::funded(10).await;
    let job_id = harness.submit_and_run(WEB_RENDERER).await;

    let mut stranger = caller();
    stranger.account_id = "acct-2".to_string();
    let err = harness
        .orchestrator
        .get_job(&stranger, job_id)
        .await
        .expect_err("foreign job");
    assert!(matches!(err, OrchestratorError::NotFound));
}

#[tokio::test]
async fn reaper_fails_stalled_jobs_and_refunds() {
    let harness = Harness::funded(10).await;
    let job = harness
        .orchestrator
        .submit(&caller(), submit_command(WEB_RENDERER))
        .await
        .expect("submit");
    tokio::time::sleep(Duration::from_millis(5)).await;

    let report = harness
        .orchestrator
        .reap_stalled(Duration::ZERO, 100)
        .await
        .expect("reap");
    assert_eq!(report.failed_jobs, 1);
    assert_eq!(report.refunded, 1);

    let job = harness
        .orchestrator
        .get_job(&caller(), job.id)
        .await
        .expect("job");
    assert_eq!(job.stage, JobStage::Failed);
    assert_eq!(job.error_info.as_deref(), Some(ERROR_STALLED));
    assert_eq!(harness.balance().await, 10);

    let second = harness
        .orchestrator
        .reap_stalled(Duration::ZERO, 100)
        .await
        .expect("reap again");
    assert_eq!(second, Default::default());
}

/// Walk a job through the stage table without settling its reservation,
/// as a worker that crashed right after its last stage move would.
async fn force_stages(harness: &Harness, job_id: Uuid, stages: &[JobStage]) {
    let mut from = JobStage::Queued;
    for &to in stages {
        harness
            .repos
            .transition(StageTransition::new(job_id, from, to))
            .await
            .expect("transition")
            .expect("stage matched");
        from = to;
    }
}

#[tokio::test]
async fn reaper_settles_reservations_left_open_by_finished_jobs() {
    let harness = Harness::funded(20).await;
    let completed = harness
        .orchestrator
        .submit(&caller(), submit_command(WEB_RENDERER))
        .await
        .expect("submit");
    let failed = harness
        .orchestrator
        .submit(&caller(), submit_command(WEB_RENDERER))
        .await
        .expect("submit");
    force_stages(
        &harness,
        completed.id,
        &[JobStage::Analyzing, JobStage::Rendering, JobStage::Completed],
    )
    .await;
    force_stages(&harness, failed.id, &[JobStage::Failed]).await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let report = harness
        .orchestrator
        .reap_stalled(Duration::ZERO, 100)
        .await
        .expect("reap");
    assert_eq!(report.failed_jobs, 0);
    assert_eq!(report.charged, 1);
    assert_eq!(report.refunded, 1);

    let transactions = harness
        .ledger
        .transactions(&caller().account_id)
        .await
        .expect("transactions");
    let charges: Vec<_> = transactions
        .iter()
        .filter(|tx| tx.kind == TransactionKind::Charge)
        .collect();
    assert_eq!(charges.len(), 1);
    assert_eq!(charges[0].related_job_id, Some(completed.id));
    assert_eq!(harness.balance().await, 20 - 7);

    let again = harness
        .orchestrator
        .reap_stalled(Duration::ZERO, 100)
        .await
        .expect("reap again");
    assert_eq!(again, Default::default());
}

#[tokio::test]
async fn reaper_leaves_recently_finished_jobs_to_their_worker() {
    let harness = Harness::funded(10).await;
    let job = harness
        .orchestrator
        .submit(&caller(), submit_command(WEB_RENDERER))
        .await
        .expect("submit");
    tokio::time::sleep(Duration::from_millis(300)).await;
    force_stages(
        &harness,
        job.id,
        &[JobStage::Analyzing, JobStage::Rendering, JobStage::Completed],
    )
    .await;

    // The reservation is older than the cutoff while the job moved just now.
    let report = harness
        .orchestrator
        .reap_stalled(Duration::from_millis(150), 100)
        .await
        .expect("reap");
    assert_eq!(report, Default::default());
    let reservation = harness
        .ledger
        .reservation(job.id)
        .await
        .expect("lookup")
        .expect("reservation");
    assert_eq!(reservation.state, ReservationState::Reserved);
}

#[tokio::test]
async fn completion_tolerates_a_reservation_already_charged() {
    let harness = Harness::funded(10).await;
    let job = harness
        .orchestrator
        .submit(&caller(), submit_command(WEB_RENDERER))
        .await
        .expect("submit");
    harness.ledger.charge(job.id).await.expect("charged elsewhere");

    let finished = harness.orchestrator.execute(job.id).await.expect("execute");

    assert_eq!(finished.stage, JobStage::Completed);
    assert_eq!(harness.balance().await, 3);
    assert_eq!(
        kinds(&harness).await,
        vec![
            TransactionKind::Topup,
            TransactionKind::Reserve,
            TransactionKind::Charge
        ]
    );
}
