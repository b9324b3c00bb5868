//! Spooler command-line driver.
//!
//! Runs print jobs against a simulated device and reports what the job
//! published, as JSON on stdout. Logs go to stderr (and optionally a rotating
//! file under `$SPOOL_HOME/logs`).

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use spool_job::SpoolConfig;
use spool_logging::LogConfig;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, error};

mod run;

#[derive(Parser, Debug)]
#[command(name = "spool", about = "Drive print jobs on a simulated device")]
struct Cli {
    /// Enable debug logging to stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Also log to a rotating file under $SPOOL_HOME/logs
    #[arg(long, global = true)]
    log_file: bool,

    /// Config file (TOML). Defaults to $SPOOL_HOME/spool.toml when present.
    #[arg(long, global = true, env = "SPOOL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a document and report the job's events as JSON
    Run(RunArgs),

    /// Show the effective configuration
    Config {
        /// Output as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Number of pages in the document
    #[arg(short = 'n', long, default_value = "3")]
    pages: u32,

    /// Per-page device delay in milliseconds (overrides config)
    #[arg(long)]
    page_delay_ms: Option<u64>,

    /// How long to wait for the job before canceling it, in milliseconds
    /// (overrides config)
    #[arg(long)]
    flush_timeout_ms: Option<u64>,

    /// Cancel the job once this many pages are done
    #[arg(long)]
    cancel_after_pages: Option<u32>,

    /// Make the device fail on this page
    #[arg(long)]
    fail_at_page: Option<u32>,

    /// Device name recorded in the print settings
    #[arg(long, default_value = "simulated")]
    device: String,

    /// Document title
    #[arg(long, default_value = "spool test page")]
    title: String,

    #[arg(long, default_value = "1")]
    copies: u32,

    /// Job cookie reported in the summary
    #[arg(long, default_value = "1")]
    cookie: i32,

    /// Go through the motions with a job that prints nothing
    #[arg(long)]
    dry_run: bool,
}

impl RunArgs {
    fn into_options(self, config: &SpoolConfig) -> run::RunOptions {
        run::RunOptions {
            pages: self.pages,
            page_delay: self
                .page_delay_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.page_delay()),
            flush_timeout: self
                .flush_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.flush_timeout()),
            cancel_after_pages: self.cancel_after_pages,
            fail_at_page: self.fail_at_page,
            device: self.device,
            title: self.title,
            copies: self.copies,
            cookie: self.cookie,
            dry_run: self.dry_run,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = spool_logging::init_logging(LogConfig {
        app_name: "spool",
        verbose: cli.verbose,
        log_to_file: cli.log_file,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => {
            let options = args.into_options(&config);
            let summary = run::run_print_job(&options, &config)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(if summary.outcome.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Config { json } => {
            let rendered = if json {
                serde_json::to_string_pretty(&config)?
            } else {
                toml::to_string_pretty(&config).context("Failed to render config as TOML")?
            };
            println!("{}", rendered);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<SpoolConfig> {
    if let Some(path) = path {
        return SpoolConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }

    let default_path = spool_logging::spool_home().join("spool.toml");
    if default_path.exists() {
        debug!("Using config {}", default_path.display());
        SpoolConfig::load(&default_path)
            .with_context(|| format!("Failed to load config from {}", default_path.display()))
    } else {
        Ok(SpoolConfig::default())
    }
}
