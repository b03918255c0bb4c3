//! refetch - resumable Reddit submission scraper
//!
//! Re-fetches submissions by id from the Reddit API in checkpointed,
//! compressed NDJSON shards. Interrupt and rerun at will.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "refetch")]
#[command(about = "Resumable batch scraper for Reddit submissions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./refetch.toml or ~/.config/refetch/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long, global = true)]
    read_timeout: Option<u64>,

    /// Maximum retry attempts for 429 / 5xx responses
    #[arg(long, global = true)]
    max_retries: Option<u32>,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape submissions for a dataset's id shards
    Scrape(cmd::scrape::ScrapeArgs),
    /// Split an id list into shard files
    Split(cmd::split::SplitArgs),
    /// Show checkpoint progress per shard
    Status(cmd::status::StatusArgs),
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(refetch_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug, progress bars show activity
    //   non-TTY: info unless --debug, logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    refetch_core::init_logging(quiet, cli.debug, multi);

    // Load configuration
    let mut config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    // Apply HTTP settings (config file defaults, CLI overrides)
    if let Some(t) = cli.read_timeout {
        config.http.read_timeout = t;
    }
    if let Some(n) = cli.max_retries {
        config.http.max_retries = n;
    }
    refetch_core::set_http_config(config.http_config());

    match cli.command {
        Command::Scrape(args) => {
            refetch_core::install_signal_handlers()?;
            let outcome = cmd::scrape::run(args, &config, &progress)?;
            Ok(ExitCode::from(outcome.exit_code()))
        }
        Command::Split(args) => cmd::split::run(args).map(|()| ExitCode::SUCCESS),
        Command::Status(args) => cmd::status::run(args, &config).map(|()| ExitCode::SUCCESS),
        Command::Config => {
            print_config(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_config(config: &Config) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec![
        "Base directory",
        &config.output.base_dir.display().to_string(),
    ]);
    table.add_row(vec!["Output format", &config.output.format]);
    table.add_row(vec![
        "Compression level",
        &config.output.compression_level.to_string(),
    ]);
    table.add_row(vec![
        "Batch sizes",
        &format!("{} local, {} remote", config.batch.local, config.batch.remote),
    ]);
    table.add_row(vec![
        "Workers",
        &format!("{} (max: {})", config.workers.default, config.workers.max),
    ]);
    table.add_row(vec![
        "Credentials",
        &config.reddit.auth_file.display().to_string(),
    ]);
    table.add_row(vec![
        "User agent",
        config
            .reddit
            .user_agent
            .as_deref()
            .unwrap_or("from credentials"),
    ]);
    table.add_row(vec!["Auth URL", &config.reddit.auth_url]);
    table.add_row(vec!["API URL", &config.reddit.api_url]);
    table.add_row(vec![
        "Timeouts",
        &format!(
            "{}s read, {}s connect",
            config.http.read_timeout, config.http.connect_timeout
        ),
    ]);
    table.add_row(vec!["Max retries", &config.http.max_retries.to_string()]);

    eprintln!("\n{table}");
}
