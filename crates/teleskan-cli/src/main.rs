use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use log::LevelFilter;
use teleskan::RunConfig;
use teleskan::pipeline::RunReport;
use teleskan::runner::ProviderStatus;
use teleskan::types::{Category, RunMode};
use teleskan::utils::PlanStats;

#[derive(Parser)]
#[command(name = "teleskan")]
#[command(about = "Scrapes Danish fiber, mobile and TV plans into comparison datasets", long_about = None)]
struct Cli {
    #[arg(
        short = 'l',
        long = "log-level",
        value_enum,
        default_value = "info",
        help = "Set the logging level"
    )]
    log_level: LogLevel,

    #[arg(
        long,
        env = "SCRAPER_CATEGORY",
        value_parser = parse_category,
        help = "Plan category to scrape: fiber, mobile (mobil) or tv"
    )]
    category: Category,

    #[arg(
        long,
        env = "SCRAPER_TYPE",
        value_parser = parse_mode,
        default_value = "full",
        help = "full persists the dataset, light checks a subset, test reads saved pages"
    )]
    mode: RunMode,

    #[arg(
        long,
        env = "SCRAPER_OUTPUT_DIR",
        default_value = "data",
        help = "Directory holding fiber.json, mobil.json and tv.json"
    )]
    output_dir: PathBuf,

    #[arg(
        long,
        env = "SCRAPER_FIXTURES_DIR",
        help = "Saved provider pages served in test mode"
    )]
    fixtures_dir: Option<PathBuf>,

    #[arg(long, help = "Only run this provider")]
    provider: Option<String>,

    #[arg(
        long,
        env = "FORCE_UPDATE",
        help = "Rewrite the dataset even when nothing changed"
    )]
    force: bool,

    #[arg(
        long,
        default_value_t = 1,
        value_parser = clap::value_parser!(u16).range(1..),
        help = "Providers scraped at the same time"
    )]
    concurrency: u16,

    #[arg(
        long,
        value_name = "SECONDS",
        default_value_t = 45,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Time allowed per provider"
    )]
    provider_timeout: u64,

    #[arg(
        long,
        value_name = "SECONDS",
        default_value_t = 600,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Time allowed for the whole run"
    )]
    run_timeout: u64,

    #[arg(
        long,
        env = "SCRAPER_LOG_FILE",
        default_value = "scraper.log",
        help = "Log file appended to alongside stderr"
    )]
    log_file: PathBuf,

    #[arg(
        short = 'o',
        long = "output",
        value_enum,
        default_value = "text",
        help = "Output format"
    )]
    format: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_category(s: &str) -> Result<Category, String> {
    Category::from_str(s).map_err(|e| e.to_string())
}

fn parse_mode(s: &str) -> Result<RunMode, String> {
    RunMode::from_str(s).map_err(|e| e.to_string())
}

/// Copies every log line to stderr and, when it could be opened, the log file.
struct TeeWriter {
    file: Option<File>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        if let Some(file) = &mut self.file {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        if let Some(file) = &mut self.file {
            file.flush()?;
        }
        Ok(())
    }
}

fn init_logging(level: LevelFilter, log_file: &Path) {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .inspect_err(|e| eprintln!("Cannot open log file {}: {}", log_file.display(), e))
        .ok();

    env_logger::Builder::new()
        .filter_level(level)
        .target(env_logger::Target::Pipe(Box::new(TeeWriter { file })))
        .init();
}

fn serialize_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            log::error!("Error serializing to JSON: {}", e);
            process::exit(1);
        }
    }
}

fn print_report(report: &RunReport) {
    let summary = &report.summary;
    println!("Category: {} (mode: {})", summary.category, summary.mode);
    println!(
        "Providers: {} attempted, {} succeeded, {} without plans, {} failed",
        summary.providers_attempted,
        summary.providers_succeeded,
        summary.providers_with_zero_yield,
        summary.providers_failed
    );
    for provider in &summary.providers {
        let status = match &provider.status {
            ProviderStatus::Ok => "ok".to_string(),
            ProviderStatus::ZeroYield => "no plans".to_string(),
            ProviderStatus::Failed { reason } => format!("failed ({})", reason),
            ProviderStatus::TimedOut => "timed out".to_string(),
            ProviderStatus::Cancelled => "cancelled".to_string(),
        };
        println!(
            "  {:<14} {:>3} accepted, {:>3} rejected  {}",
            provider.provider, provider.accepted, provider.rejected, status
        );
    }

    if summary.records.is_empty() {
        println!("\nNo plans collected.");
    } else {
        println!();
        for record in &summary.records {
            println!("{:>3}. {}", record.id, record);
        }
        print!("{}", PlanStats::from_records(&summary.records));
    }

    let store = &report.store;
    println!(
        "\nDataset {}: {} ({})",
        store.path.display(),
        store.outcome,
        store.changes
    );
    for change in &store.changes.price_changes {
        println!("  {}: {} -> {} kr/md", change.plan, change.old, change.new);
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.log_level.clone().into(), &cli.log_file);

    let mut config = RunConfig::new(cli.category, cli.mode, cli.output_dir);
    config.fixtures_dir = cli.fixtures_dir;
    config.provider = cli.provider;
    config.force_update = cli.force;
    config.concurrency = usize::from(cli.concurrency);
    config.provider_timeout = Duration::from_secs(cli.provider_timeout);
    config.run_timeout = Duration::from_secs(cli.run_timeout);

    log::info!(
        "Starting {} run for {} at {}",
        config.mode,
        config.category,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    let report = teleskan::run(config).await.unwrap_or_else(|e| {
        log::error!("Run aborted: {}", e);
        process::exit(1);
    });

    match cli.format {
        OutputFormat::Json => serialize_json(&report),
        OutputFormat::Text => print_report(&report),
    }
}
