use std::{future::IntoFuture, path::Path, process, sync::Arc};

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_cron::CronStream;
use apalis_sql::{Config as ApalisSqlConfig, postgres::PostgresStorage};
use healthreport::{
    application::{
        error::AppError,
        jobs::{
            ApalisDispatcher, GENERATE_REPORT_QUEUE, GenerateReportJob, JobDispatcher,
            LocalDispatcher, ReaperContext, ReportWorkerContext, process_generate_report_job,
            process_reap_stalled_jobs, reaper_schedule, spawn_local_worker,
        },
        ledger::CreditLedger,
        orchestrator::ReportOrchestrator,
        registry::Registry,
        repos::{ArtifactsRepo, LedgerRepo, ReportJobsRepo, ShareLinksRepo, SummariesRepo},
        share_links::ShareLinkService,
    },
    config,
    domain::measurement::MeasurementSummary,
    infra::{
        catalog,
        db::PostgresRepositories,
        error::InfraError,
        http::{self, ApiState, RouterState},
        memory::{MemoryRepositories, MemorySeed},
        telemetry,
    },
};
use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(args) => run_serve(settings, *args).await,
        config::Command::Catalog(args) => match args.command {
            config::CatalogCommand::Check(_) => run_catalog_check(&settings),
        },
        config::Command::Ledger(args) => match args.command {
            config::LedgerCommand::Audit(audit) => run_ledger_audit(settings, audit).await,
            config::LedgerCommand::TopUp(top_up) => run_ledger_top_up(settings, top_up).await,
        },
        config::Command::Summaries(args) => match args.command {
            config::SummariesCommand::Import(import) => {
                run_summaries_import(settings, import).await
            }
        },
    }
}

/// Services wired over one storage backend.
struct Services {
    orchestrator: ReportOrchestrator,
    ledger: CreditLedger,
    share_links: Arc<ShareLinkService>,
}

fn build_services<R>(
    repositories: Arc<R>,
    registry: Arc<Registry>,
    dispatcher: Arc<dyn JobDispatcher>,
    settings: &config::Settings,
) -> Services
where
    R: LedgerRepo + ReportJobsRepo + ArtifactsRepo + SummariesRepo + ShareLinksRepo + 'static,
{
    let ledger = CreditLedger::new(repositories.clone());
    let orchestrator = ReportOrchestrator::new(
        registry,
        ledger.clone(),
        repositories.clone(),
        repositories.clone(),
        repositories.clone(),
        dispatcher,
    );
    let share_links = Arc::new(ShareLinkService::new(
        repositories.clone(),
        repositories.clone(),
        repositories,
        settings.share_links,
    ));
    Services {
        orchestrator,
        ledger,
        share_links,
    }
}

async fn run_serve(settings: config::Settings, args: config::ServeArgs) -> Result<(), AppError> {
    let registry = Arc::new(load_catalog(&settings.catalog.path)?);

    let (services, db, background) = match settings.database.url.as_deref() {
        Some(url) => {
            if args.memory_seed.is_some() {
                warn!(
                    target = "healthreport::serve",
                    "--memory-seed is ignored when a database is configured"
                );
            }
            let repositories = init_repositories(url, &settings).await?;
            PostgresStorage::setup(repositories.pool())
                .await
                .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

            let storage: PostgresStorage<GenerateReportJob> = PostgresStorage::new_with_config(
                repositories.pool().clone(),
                ApalisSqlConfig::new(GENERATE_REPORT_QUEUE),
            );
            let services = build_services(
                repositories.clone(),
                registry,
                Arc::new(ApalisDispatcher::new(storage.clone())),
                &settings,
            );
            let monitor = spawn_job_monitor(
                Some(storage),
                services.orchestrator.clone(),
                &settings.jobs,
            )?;
            (services, Some(repositories), vec![monitor])
        }
        None => {
            warn!(
                target = "healthreport::serve",
                "no database configured; running with in-memory storage that is lost on exit \
                 (load balances and summaries with --memory-seed)"
            );
            let repositories = Arc::new(MemoryRepositories::new());
            if let Some(path) = args.memory_seed.as_deref() {
                seed_memory(&repositories, path).await?;
            }
            let (dispatcher, receiver) = LocalDispatcher::channel();
            let services = build_services(repositories, registry, Arc::new(dispatcher), &settings);
            let mut handles = vec![spawn_local_worker(
                receiver,
                services.orchestrator.clone(),
                settings.jobs.generate_concurrency.get() as usize,
            )];
            if settings.jobs.reaper_enabled {
                handles.push(spawn_job_monitor(
                    None,
                    services.orchestrator.clone(),
                    &settings.jobs,
                )?);
            }
            (services, None, handles)
        }
    };

    let state = RouterState {
        api: ApiState::new(services.orchestrator, services.ledger, services.share_links),
        db,
    };
    let result = serve_http(&settings, state).await;

    for handle in background {
        handle.abort();
        let _ = handle.await;
    }

    result
}

fn run_catalog_check(settings: &config::Settings) -> Result<(), AppError> {
    let registry = load_catalog(&settings.catalog.path)?;

    for engine in registry.list_engines() {
        info!(
            target = "healthreport::catalog",
            id = %engine.id,
            version = %engine.version,
            cost = engine.cost_per_analysis,
            active = engine.active,
            "engine"
        );
        let compatible: Vec<String> = registry
            .find_compatible(&engine.id)
            .into_iter()
            .map(|renderer| format!("{}@{}", renderer.id, renderer.version))
            .collect();
        info!(
            target = "healthreport::catalog",
            engine = %engine.id,
            renderers = ?compatible,
            "compatible renderers"
        );
    }
    for renderer in registry.list_renderers() {
        info!(
            target = "healthreport::catalog",
            id = %renderer.id,
            version = %renderer.version,
            format = renderer.output_format.as_str(),
            cost = renderer.cost_per_render,
            recommended = registry.is_recommended(&renderer.id),
            "renderer"
        );
    }
    Ok(())
}

async fn run_ledger_audit(
    settings: config::Settings,
    args: config::LedgerAuditArgs,
) -> Result<(), AppError> {
    let repositories = init_repositories(require_database_url(&settings)?, &settings).await?;
    let ledger = CreditLedger::new(repositories);

    let audit = ledger.audit_balance(&args.account_id).await?;
    info!(
        target = "healthreport::ledger",
        account_id = %audit.account_id,
        cached_balance = audit.cached_balance,
        computed_balance = audit.computed_balance,
        transactions = audit.transaction_count,
        "balance audited"
    );

    if !audit.is_consistent() {
        return Err(AppError::unexpected(format!(
            "account {} balance {} does not match transaction log {}",
            audit.account_id, audit.cached_balance, audit.computed_balance
        )));
    }
    Ok(())
}

async fn run_ledger_top_up(
    settings: config::Settings,
    args: config::LedgerTopUpArgs,
) -> Result<(), AppError> {
    let repositories = init_repositories(require_database_url(&settings)?, &settings).await?;
    let ledger = CreditLedger::new(repositories);

    let balance = ledger.top_up(&args.account_id, args.amount).await?;
    info!(
        target = "healthreport::ledger",
        account_id = %args.account_id,
        amount = args.amount,
        balance,
        "account credited"
    );
    Ok(())
}

async fn run_summaries_import(
    settings: config::Settings,
    args: config::SummariesImportArgs,
) -> Result<(), AppError> {
    let data = tokio::fs::read_to_string(&args.file)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let summaries: Vec<MeasurementSummary> = serde_json::from_str(&data)
        .map_err(|err| AppError::validation(format!("invalid summaries file: {err}")))?;

    let repositories = init_repositories(require_database_url(&settings)?, &settings).await?;
    for summary in &summaries {
        repositories
            .upsert_summary(summary)
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    }

    info!(
        target = "healthreport::summaries",
        count = summaries.len(),
        file = %args.file.display(),
        "summaries imported"
    );
    Ok(())
}

async fn seed_memory(repositories: &MemoryRepositories, path: &Path) -> Result<(), AppError> {
    let data = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let seed: MemorySeed = serde_json::from_str(&data)
        .map_err(|err| AppError::validation(format!("invalid memory seed: {err}")))?;
    let accounts = seed.accounts.len();
    let summaries = seed.summaries.len();

    repositories
        .apply_seed(seed)
        .await
        .map_err(|err| AppError::validation(format!("invalid memory seed: {err}")))?;
    info!(
        target = "healthreport::serve",
        file = %path.display(),
        accounts,
        summaries,
        "in-memory storage seeded"
    );
    Ok(())
}

fn load_catalog(path: &Path) -> Result<Registry, AppError> {
    let registry = catalog::load_registry(path)?;
    info!(
        target = "healthreport::catalog",
        path = %path.display(),
        engines = registry.list_engines().len(),
        renderers = registry.list_renderers().len(),
        "capability catalog loaded"
    );
    Ok(registry)
}

fn require_database_url(settings: &config::Settings) -> Result<&str, AppError> {
    settings
        .database
        .url
        .as_deref()
        .ok_or_else(|| AppError::from(InfraError::configuration("database url is not configured")))
}

async fn init_repositories(
    database_url: &str,
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

/// Run the apalis workers: the report generator when a queue is given, and the
/// cron reaper when enabled.
fn spawn_job_monitor(
    storage: Option<PostgresStorage<GenerateReportJob>>,
    orchestrator: ReportOrchestrator,
    jobs: &config::JobsSettings,
) -> Result<tokio::task::JoinHandle<()>, AppError> {
    let mut monitor = Monitor::new();

    if let Some(storage) = storage {
        let generate_worker = WorkerBuilder::new("generate-report-worker")
            .concurrency(jobs.generate_concurrency.get() as usize)
            .data(ReportWorkerContext {
                orchestrator: orchestrator.clone(),
            })
            .backend(storage)
            .build_fn(process_generate_report_job);
        monitor = monitor.register(generate_worker);
    }

    if jobs.reaper_enabled {
        let schedule = reaper_schedule(&jobs.reaper_schedule).map_err(AppError::validation)?;
        let reaper_worker = WorkerBuilder::new("reap-stalled-jobs-worker")
            .data(ReaperContext {
                orchestrator,
                stalled_after: jobs.stalled_after,
                batch_size: jobs.reaper_batch_size.get(),
            })
            .backend(CronStream::new(schedule))
            .build_fn(process_reap_stalled_jobs);
        monitor = monitor.register(reaper_worker);
    }

    Ok(tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "job monitor stopped");
        }
    }))
}

async fn serve_http(settings: &config::Settings, state: RouterState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "healthreport::serve",
        addr = %settings.server.addr,
        "listening"
    );

    let drain = Arc::new(Notify::new());
    let drain_signal = drain.clone();
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move { drain_signal.notified().await });
    let mut server = std::pin::pin!(server.into_future());

    tokio::select! {
        result = &mut server => {
            return result.map_err(|err| AppError::unexpected(format!("server error: {err}")));
        }
        _ = shutdown_signal() => {}
    }

    drain.notify_one();
    match tokio::time::timeout(settings.server.graceful_shutdown, server).await {
        Ok(result) => result.map_err(|err| AppError::unexpected(format!("server error: {err}"))),
        Err(_) => {
            warn!(
                target = "healthreport::serve",
                timeout_secs = settings.server.graceful_shutdown.as_secs(),
                "graceful shutdown timed out; dropping open connections"
            );
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(target = "healthreport::serve", "shutdown requested");
}
