//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;
#[cfg(test)]
mod tests;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{CliArgs, Command, CompileArgs, CompileOverrides, ServeArgs, ServeOverrides};

use crate::domain::entities::{MAX_PASSES, RequestLimits};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "texpress";
const ENV_PREFIX: &str = "TEXPRESS";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_WORKER_CONCURRENCY: u32 = 2;
const DEFAULT_JOB_MAX_AGE_SECS: u64 = 24 * 60 * 60;
const DEFAULT_SCRATCH_DIR: &str = "/tmp/texpress/scratch";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_PASSES: u8 = 3;
const DEFAULT_MAX_SOURCE_BYTES: u64 = 1024 * 1024;
const DEFAULT_ARTIFACT_DIR: &str = "/tmp/texpress/pdfs";
const DEFAULT_ARTIFACT_RETENTION_SECS: u64 = 2 * 60 * 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;
const DEFAULT_CACHE_MAX_ENTRIES: usize = 50;
const DEFAULT_CACHE_TTL_SECS: u64 = 30 * 60;
const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_REMOTE_ENDPOINTS: &[&str] = &[
    "https://texlive2020.latexonline.cc/compile",
    "https://papeeria.com/api/compile",
    "https://latexbase.com/api/compile",
];

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub jobs: JobsSettings,
    pub compile: CompileSettings,
    pub artifacts: ArtifactSettings,
    pub cache: CacheSettings,
    pub remote: RemoteSettings,
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
    /// Jobs go through the Postgres broker when set, otherwise through the in-process queue.
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub worker_concurrency: NonZeroU32,
    pub max_age: Duration,
}

#[derive(Debug, Clone)]
pub struct CompileSettings {
    pub scratch_dir: PathBuf,
    pub bin_dir: Option<PathBuf>,
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub default_passes: u8,
    pub max_source_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct ArtifactSettings {
    pub directory: PathBuf,
    pub retention: Duration,
    pub sweep_interval: Duration,
    pub delete_after_download: bool,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_entries: NonZeroUsize,
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub enabled: bool,
    pub endpoints: Vec<String>,
    pub timeout: Duration,
}

impl CompileSettings {
    pub fn limits(&self) -> RequestLimits {
        RequestLimits {
            max_source_bytes: self.max_source_bytes,
            default_timeout_ms: self.default_timeout_ms,
            max_timeout_ms: self.max_timeout_ms,
            default_passes: self.default_passes,
        }
    }
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

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("remote.endpoints")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Compile(args)) => raw.apply_compile_overrides(&args.overrides),
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
    compile: RawCompileSettings,
    artifacts: RawArtifactSettings,
    cache: RawCacheSettings,
    remote: RawRemoteSettings,
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
        if let Some(value) = overrides.jobs_worker_concurrency {
            self.jobs.worker_concurrency = Some(value);
        }
        if let Some(directory) = overrides.artifacts_directory.as_ref() {
            self.artifacts.directory = Some(directory.clone());
        }
        if let Some(seconds) = overrides.artifacts_retention_seconds {
            self.artifacts.retention_seconds = Some(seconds);
        }
        if let Some(delete) = overrides.artifacts_delete_after_download {
            self.artifacts.delete_after_download = Some(delete);
        }
        if let Some(max) = overrides.cache_max_entries {
            self.cache.max_entries = Some(max);
        }
        if let Some(enabled) = overrides.remote_enabled {
            self.remote.enabled = Some(enabled);
        }

        self.apply_compile_overrides(&overrides.compile);
    }

    fn apply_compile_overrides(&mut self, overrides: &CompileOverrides) {
        if let Some(dir) = overrides.scratch_dir.as_ref() {
            self.compile.scratch_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.bin_dir.as_ref() {
            self.compile.bin_dir = Some(dir.clone());
        }
        if let Some(timeout) = overrides.default_timeout_ms {
            self.compile.default_timeout_ms = Some(timeout);
        }
        if let Some(passes) = overrides.default_passes {
            self.compile.default_passes = Some(passes);
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
            compile,
            artifacts,
            cache,
            remote,
        } = raw;

        let artifacts = build_artifact_settings(artifacts)?;
        let cache = build_cache_settings(cache)?;
        if cache.ttl > artifacts.retention {
            return Err(LoadError::invalid(
                "cache.ttl_seconds",
                "must not exceed artifacts.retention_seconds",
            ));
        }

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            jobs: build_jobs_settings(jobs)?,
            compile: build_compile_settings(compile)?,
            artifacts,
            cache,
            remote: build_remote_settings(remote)?,
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
    let graceful_shutdown = Duration::from_secs(non_zero_secs(
        graceful_secs,
        "server.graceful_shutdown_seconds",
    )?);

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
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
    let worker_concurrency = non_zero_u32(
        jobs.worker_concurrency
            .unwrap_or(DEFAULT_WORKER_CONCURRENCY)
            .into(),
        "jobs.worker_concurrency",
    )?;
    let max_age = Duration::from_secs(non_zero_secs(
        jobs.max_age_seconds.unwrap_or(DEFAULT_JOB_MAX_AGE_SECS),
        "jobs.max_age_seconds",
    )?);

    Ok(JobsSettings {
        worker_concurrency,
        max_age,
    })
}

fn build_compile_settings(compile: RawCompileSettings) -> Result<CompileSettings, LoadError> {
    let scratch_dir = compile
        .scratch_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRATCH_DIR));
    let bin_dir = compile
        .bin_dir
        .filter(|dir| !dir.as_os_str().is_empty());

    let default_timeout_ms = compile.default_timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
    if default_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "compile.default_timeout_ms",
            "must be greater than zero",
        ));
    }
    let max_timeout_ms = compile.max_timeout_ms.unwrap_or(DEFAULT_MAX_TIMEOUT_MS);
    if max_timeout_ms < default_timeout_ms {
        return Err(LoadError::invalid(
            "compile.max_timeout_ms",
            "must not be lower than compile.default_timeout_ms",
        ));
    }

    let default_passes = compile.default_passes.unwrap_or(DEFAULT_PASSES);
    if !(1..=MAX_PASSES).contains(&default_passes) {
        return Err(LoadError::invalid(
            "compile.default_passes",
            format!("must be between 1 and {MAX_PASSES}"),
        ));
    }

    let max_source_bytes_value = compile
        .max_source_bytes
        .unwrap_or(DEFAULT_MAX_SOURCE_BYTES);
    if max_source_bytes_value == 0 {
        return Err(LoadError::invalid(
            "compile.max_source_bytes",
            "must be greater than zero",
        ));
    }
    let max_source_bytes = usize::try_from(max_source_bytes_value).map_err(|_| {
        LoadError::invalid(
            "compile.max_source_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(CompileSettings {
        scratch_dir,
        bin_dir,
        default_timeout_ms,
        max_timeout_ms,
        default_passes,
        max_source_bytes,
    })
}

fn build_artifact_settings(
    artifacts: RawArtifactSettings,
) -> Result<ArtifactSettings, LoadError> {
    let directory = artifacts
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACT_DIR));
    let retention = Duration::from_secs(non_zero_secs(
        artifacts
            .retention_seconds
            .unwrap_or(DEFAULT_ARTIFACT_RETENTION_SECS),
        "artifacts.retention_seconds",
    )?);
    let sweep_interval = Duration::from_secs(non_zero_secs(
        artifacts
            .sweep_interval_seconds
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        "artifacts.sweep_interval_seconds",
    )?);

    Ok(ArtifactSettings {
        directory,
        retention,
        sweep_interval,
        delete_after_download: artifacts.delete_after_download.unwrap_or(true),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let max_entries = NonZeroUsize::new(cache.max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES))
        .ok_or_else(|| LoadError::invalid("cache.max_entries", "must be greater than zero"))?;
    let ttl = Duration::from_secs(non_zero_secs(
        cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS),
        "cache.ttl_seconds",
    )?);

    Ok(CacheSettings { max_entries, ttl })
}

fn build_remote_settings(remote: RawRemoteSettings) -> Result<RemoteSettings, LoadError> {
    let enabled = remote.enabled.unwrap_or(false);
    let endpoints: Vec<String> = match remote.endpoints {
        Some(endpoints) => endpoints
            .into_iter()
            .map(|endpoint| endpoint.trim().to_string())
            .filter(|endpoint| !endpoint.is_empty())
            .collect(),
        None => DEFAULT_REMOTE_ENDPOINTS
            .iter()
            .map(|endpoint| (*endpoint).to_string())
            .collect(),
    };
    if enabled && endpoints.is_empty() {
        return Err(LoadError::invalid(
            "remote.endpoints",
            "at least one endpoint is required when remote compilation is enabled",
        ));
    }
    if let Some(bad) = endpoints
        .iter()
        .find(|endpoint| !(endpoint.starts_with("http://") || endpoint.starts_with("https://")))
    {
        return Err(LoadError::invalid(
            "remote.endpoints",
            format!("`{bad}` is not an http(s) URL"),
        ));
    }

    let timeout_ms = remote.timeout_ms.unwrap_or(DEFAULT_REMOTE_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "remote.timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(RemoteSettings {
        enabled,
        endpoints,
        timeout: Duration::from_millis(timeout_ms),
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
    worker_concurrency: Option<u32>,
    max_age_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCompileSettings {
    scratch_dir: Option<PathBuf>,
    bin_dir: Option<PathBuf>,
    default_timeout_ms: Option<u64>,
    max_timeout_ms: Option<u64>,
    default_passes: Option<u8>,
    max_source_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawArtifactSettings {
    directory: Option<PathBuf>,
    retention_seconds: Option<u64>,
    sweep_interval_seconds: Option<u64>,
    delete_after_download: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    max_entries: Option<usize>,
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRemoteSettings {
    enabled: Option<bool>,
    endpoints: Option<Vec<String>>,
    timeout_ms: Option<u64>,
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

fn non_zero_secs(value: u64, key: &'static str) -> Result<u64, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(value)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
