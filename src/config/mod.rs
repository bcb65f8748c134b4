//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::share_links::ShareLinkPolicy;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "healthreport";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_GENERATE_CONCURRENCY: u32 = 4;
const DEFAULT_STALLED_AFTER_SECS: u64 = 15 * 60;
const DEFAULT_REAPER_SCHEDULE: &str = "0 */5 * * * *";
const DEFAULT_REAPER_BATCH_SIZE: u32 = 100;
const DEFAULT_CATALOG_PATH: &str = "catalog/registry.toml";
const DEFAULT_SHARE_MAX_EXPIRY_DAYS: u32 = 30;
const DEFAULT_SHARE_MAX_ACCESS_COUNT: u32 = 5;

/// Command-line arguments for the healthreport binary.
#[derive(Debug, Parser)]
#[command(
    name = "healthreport",
    version,
    about = "Credit-metered health report service"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "HEALTHREPORT_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service and report workers.
    Serve(Box<ServeArgs>),
    /// Inspect the capability catalog.
    Catalog(CatalogArgs),
    /// Inspect account balances.
    Ledger(LedgerArgs),
    /// Load measurement summaries handed over by the acquisition pipeline.
    Summaries(SummariesArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,

    /// JSON file of account balances and summaries loaded at startup when
    /// running without a database.
    #[arg(long = "memory-seed", value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub memory_seed: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the report worker concurrency.
    #[arg(long = "jobs-generate-concurrency", value_name = "COUNT")]
    pub jobs_generate_concurrency: Option<u32>,

    /// Override the age after which an unfinished job counts as stalled.
    #[arg(long = "jobs-stalled-after-seconds", value_name = "SECONDS")]
    pub jobs_stalled_after_seconds: Option<u64>,

    /// Enable or disable the stalled-job reaper.
    #[arg(
        long = "jobs-reaper-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub jobs_reaper_enabled: Option<bool>,

    /// Override the capability catalog path.
    #[arg(long = "catalog-path", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub catalog_path: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct CatalogArgs {
    #[command(subcommand)]
    pub command: CatalogCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CatalogCommand {
    /// Load the catalog and print what it registers.
    Check(CatalogCheckArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct CatalogCheckArgs {
    /// Catalog file to check instead of the configured one.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct LedgerArgs {
    #[command(subcommand)]
    pub command: LedgerCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum LedgerCommand {
    /// Recompute an account balance from its transaction log.
    Audit(LedgerAuditArgs),
    /// Credit an account out of band.
    #[command(name = "top-up")]
    TopUp(LedgerTopUpArgs),
}

#[derive(Debug, Args, Clone)]
pub struct LedgerAuditArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Account to audit.
    #[arg(value_name = "ACCOUNT")]
    pub account_id: String,
}

#[derive(Debug, Args, Clone)]
pub struct LedgerTopUpArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Account to credit.
    #[arg(value_name = "ACCOUNT")]
    pub account_id: String,

    /// Credits to add.
    #[arg(value_name = "AMOUNT")]
    pub amount: i64,
}

#[derive(Debug, Args, Clone)]
pub struct SummariesArgs {
    #[command(subcommand)]
    pub command: SummariesCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum SummariesCommand {
    /// Upsert summaries from a JSON array file.
    Import(SummariesImportArgs),
}

#[derive(Debug, Args, Clone)]
pub struct SummariesImportArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// JSON file holding an array of measurement summaries.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub jobs: JobsSettings,
    pub catalog: CatalogSettings,
    pub share_links: ShareLinkPolicy,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub generate_concurrency: NonZeroU32,
    pub stalled_after: Duration,
    pub reaper_enabled: bool,
    pub reaper_schedule: String,
    pub reaper_batch_size: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("HEALTHREPORT").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Ledger(args)) => match &args.command {
            LedgerCommand::Audit(audit) => raw.apply_database_override(&audit.database),
            LedgerCommand::TopUp(top_up) => raw.apply_database_override(&top_up.database),
        },
        Some(Command::Summaries(args)) => match &args.command {
            SummariesCommand::Import(import) => raw.apply_database_override(&import.database),
        },
        Some(Command::Catalog(args)) => match &args.command {
            CatalogCommand::Check(check) => {
                if let Some(file) = check.file.as_ref() {
                    raw.catalog.path = Some(file.clone());
                }
            }
        },
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    jobs: RawJobsSettings,
    catalog: RawCatalogSettings,
    share_links: RawShareLinkSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(value) = overrides.jobs_generate_concurrency {
            self.jobs.generate_concurrency = Some(value);
        }
        if let Some(value) = overrides.jobs_stalled_after_seconds {
            self.jobs.stalled_after_seconds = Some(value);
        }
        if let Some(value) = overrides.jobs_reaper_enabled {
            self.jobs.reaper_enabled = Some(value);
        }
        if let Some(path) = overrides.catalog_path.as_ref() {
            self.catalog.path = Some(path.clone());
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            jobs,
            catalog,
            share_links,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            jobs: build_jobs_settings(jobs)?,
            catalog: build_catalog_settings(catalog)?,
            share_links: build_share_link_settings(share_links)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_jobs_settings(jobs: RawJobsSettings) -> Result<JobsSettings, LoadError> {
    let generate_concurrency = non_zero_u32(
        jobs.generate_concurrency
            .unwrap_or(DEFAULT_GENERATE_CONCURRENCY)
            .into(),
        "jobs.generate_concurrency",
    )?;

    let stalled_after_secs = jobs
        .stalled_after_seconds
        .unwrap_or(DEFAULT_STALLED_AFTER_SECS);
    if stalled_after_secs == 0 {
        return Err(LoadError::invalid(
            "jobs.stalled_after_seconds",
            "must be greater than zero",
        ));
    }

    let reaper_schedule = jobs
        .reaper_schedule
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_REAPER_SCHEDULE.to_string());
    crate::application::jobs::reaper_schedule(&reaper_schedule)
        .map_err(|reason| LoadError::invalid("jobs.reaper_schedule", reason))?;

    let reaper_batch_size = non_zero_u32(
        jobs.reaper_batch_size
            .unwrap_or(DEFAULT_REAPER_BATCH_SIZE)
            .into(),
        "jobs.reaper_batch_size",
    )?;

    Ok(JobsSettings {
        generate_concurrency,
        stalled_after: Duration::from_secs(stalled_after_secs),
        reaper_enabled: jobs.reaper_enabled.unwrap_or(true),
        reaper_schedule,
        reaper_batch_size,
    })
}

fn build_catalog_settings(catalog: RawCatalogSettings) -> Result<CatalogSettings, LoadError> {
    let path = catalog
        .path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CATALOG_PATH));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid("catalog.path", "path must not be empty"));
    }
    Ok(CatalogSettings { path })
}

fn build_share_link_settings(
    share_links: RawShareLinkSettings,
) -> Result<ShareLinkPolicy, LoadError> {
    let max_expiry_days = non_zero_u32(
        share_links
            .max_expiry_days
            .unwrap_or(DEFAULT_SHARE_MAX_EXPIRY_DAYS)
            .into(),
        "share_links.max_expiry_days",
    )?;
    let default_max_access_count = non_zero_u32(
        share_links
            .default_max_access_count
            .unwrap_or(DEFAULT_SHARE_MAX_ACCESS_COUNT)
            .into(),
        "share_links.default_max_access_count",
    )?;

    Ok(ShareLinkPolicy {
        max_expiry_days: max_expiry_days.get(),
        default_max_access_count: default_max_access_count.get(),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    generate_concurrency: Option<u32>,
    stalled_after_seconds: Option<u64>,
    reaper_enabled: Option<bool>,
    reaper_schedule: Option<String>,
    reaper_batch_size: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCatalogSettings {
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawShareLinkSettings {
    max_expiry_days: Option<u32>,
    default_max_access_count: Option<u32>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(4000);
        raw.logging.level = Some("info".to_string());

        let overrides = ServeOverrides {
            server_port: Some(4321),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    }

    #[test]
    fn defaults_run_without_a_database() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
        assert!(settings.database.url.is_none());
        assert!(settings.jobs.reaper_enabled);
        assert_eq!(settings.jobs.stalled_after, Duration::from_secs(900));
        assert_eq!(settings.share_links.max_expiry_days, 30);
        assert_eq!(settings.share_links.default_max_access_count, 5);
    }

    #[test]
    fn blank_database_url_means_memory_mode() {
        let mut raw = RawSettings::default();
        raw.database.url = Some("   ".to_string());
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert!(settings.database.url.is_none());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut raw = RawSettings::default();
        raw.jobs.generate_concurrency = Some(0);
        let err = Settings::from_raw(raw).expect_err("zero concurrency");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "jobs.generate_concurrency",
                ..
            }
        ));
    }

    #[test]
    fn malformed_reaper_schedule_is_rejected() {
        let mut raw = RawSettings::default();
        raw.jobs.reaper_schedule = Some("hourly please".to_string());
        let err = Settings::from_raw(raw).expect_err("bad schedule");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "jobs.reaper_schedule",
                ..
            }
        ));
    }

    #[test]
    fn default_to_serve_command() {
        let args = CliArgs::parse_from(["healthreport"]);
        let command = args
            .command
            .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
        assert!(matches!(command, Command::Serve(_)));
    }

    #[test]
    fn parse_ledger_audit_arguments() {
        let args = CliArgs::parse_from([
            "healthreport",
            "ledger",
            "audit",
            "--database-url",
            "postgres://example",
            "acct-42",
        ]);

        match args.command.expect("ledger command") {
            Command::Ledger(ledger) => match ledger.command {
                LedgerCommand::Audit(audit) => {
                    assert_eq!(audit.account_id, "acct-42");
                    assert_eq!(
                        audit.database.database_url.as_deref(),
                        Some("postgres://example")
                    );
                }
                _ => panic!("wrong command parsed"),
            },
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn parse_catalog_check_arguments() {
        let args =
            CliArgs::parse_from(["healthreport", "catalog", "check", "/tmp/registry.toml"]);

        match args.command.expect("catalog command") {
            Command::Catalog(catalog) => match catalog.command {
                CatalogCommand::Check(check) => {
                    assert_eq!(
                        check.file.as_deref(),
                        Some(std::path::Path::new("/tmp/registry.toml"))
                    );
                }
            },
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn parse_summaries_import_arguments() {
        let args = CliArgs::parse_from([
            "healthreport",
            "summaries",
            "import",
            "--database-url",
            "postgres://example",
            "/tmp/summaries.json",
        ]);

        match args.command.expect("summaries command") {
            Command::Summaries(summaries) => match summaries.command {
                SummariesCommand::Import(import) => {
                    assert_eq!(import.file, std::path::Path::new("/tmp/summaries.json"));
                    assert_eq!(
                        import.database.database_url.as_deref(),
                        Some("postgres://example")
                    );
                }
            },
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn parse_serve_overrides() {
        let args = CliArgs::parse_from([
            "healthreport",
            "serve",
            "--server-host",
            "0.0.0.0",
            "--jobs-reaper-enabled",
            "false",
        ]);

        match args.command.expect("serve command") {
            Command::Serve(serve) => {
                assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
                assert_eq!(serve.overrides.jobs_reaper_enabled, Some(false));
            }
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn parse_memory_seed_path() {
        let args = CliArgs::parse_from(["healthreport", "serve", "--memory-seed", "seed.json"]);

        match args.command.expect("serve command") {
            Command::Serve(serve) => {
                assert_eq!(serve.memory_seed, Some(PathBuf::from("seed.json")));
            }
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    #[serial]
    fn config_file_is_layered_under_environment() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp config");
        writeln!(
            file,
            "[server]\nport = 4100\n\n[share_links]\nmax_expiry_days = 14"
        )
        .expect("write config");

        // SAFETY: env-mutating tests are serialized.
        unsafe { std::env::set_var("HEALTHREPORT__SERVER__PORT", "4200") };
        let args = CliArgs::parse_from([
            "healthreport",
            "--config-file",
            file.path().to_str().expect("utf8 path"),
            "catalog",
            "check",
        ]);
        let settings = load(&args);
        unsafe { std::env::remove_var("HEALTHREPORT__SERVER__PORT") };

        let settings = settings.expect("settings load");
        assert_eq!(settings.server.addr.port(), 4200);
        assert_eq!(settings.share_links.max_expiry_days, 14);
    }
}
