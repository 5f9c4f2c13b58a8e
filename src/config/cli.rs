use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the texpress binary.
#[derive(Debug, Parser)]
#[command(name = "texpress", version, about = "LaTeX to PDF compilation service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TEXPRESS_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service and its compile workers.
    Serve(Box<ServeArgs>),
    /// Compile a single document locally and write the PDF.
    Compile(CompileArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CompileOverrides {
    /// Override the scratch directory used for compile workspaces.
    #[arg(long = "compile-scratch-dir", value_name = "PATH")]
    pub scratch_dir: Option<PathBuf>,

    /// Override the directory holding the TeX binaries.
    #[arg(long = "compile-bin-dir", value_name = "PATH")]
    pub bin_dir: Option<PathBuf>,

    /// Override the default per-job timeout in milliseconds.
    #[arg(long = "compile-default-timeout-ms", value_name = "MS")]
    pub default_timeout_ms: Option<u64>,

    /// Override the default number of engine passes.
    #[arg(long = "compile-default-passes", value_name = "COUNT")]
    pub default_passes: Option<u8>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub compile: CompileOverrides,

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

    /// Override the database connection URL used by the job broker.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the compile worker concurrency.
    #[arg(long = "jobs-worker-concurrency", value_name = "COUNT")]
    pub jobs_worker_concurrency: Option<u32>,

    /// Override the public artifact directory.
    #[arg(long = "artifacts-directory", value_name = "PATH")]
    pub artifacts_directory: Option<PathBuf>,

    /// Override how long artifacts and preview tokens stay valid.
    #[arg(long = "artifacts-retention-seconds", value_name = "SECONDS")]
    pub artifacts_retention_seconds: Option<u64>,

    /// Keep artifacts after their first download.
    #[arg(
        long = "artifacts-delete-after-download",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub artifacts_delete_after_download: Option<bool>,

    /// Override the result cache capacity.
    #[arg(long = "cache-max-entries", value_name = "COUNT")]
    pub cache_max_entries: Option<usize>,

    /// Enable remote compilation when no local toolchain is installed.
    #[arg(
        long = "remote-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub remote_enabled: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct CompileArgs {
    #[command(flatten)]
    pub overrides: CompileOverrides,

    /// LaTeX document to compile.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Where to write the resulting PDF.
    #[arg(long, short, value_name = "PDF", value_hint = ValueHint::FilePath)]
    pub output: PathBuf,

    /// Engine to compile with (pdflatex|xelatex|lualatex).
    #[arg(long, value_name = "ENGINE")]
    pub engine: Option<String>,

    /// Bibliography database passed to bibtex or biber.
    #[arg(long, value_name = "BIB", value_hint = ValueHint::FilePath)]
    pub bibliography: Option<PathBuf>,

    /// Run biber instead of bibtex.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub biber: bool,

    /// Number of engine passes.
    #[arg(long, value_name = "COUNT")]
    pub passes: Option<u8>,

    /// Wall-clock budget for the whole compile in milliseconds.
    #[arg(long = "timeout-ms", value_name = "MS")]
    pub timeout_ms: Option<u64>,
}
