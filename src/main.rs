use clap::Parser;
use sqlscan::sqli::config::{AuthConfig, ProgressFn, ScanConfig, SmartScanConfig};
use sqlscan::sqli::report::{self, ReportFormat};
use sqlscan::sqli::types::{SmartPhase, SmartScanProgress};
use sqlscan::sqli::{self, ScanError, SmartScanResult};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// SQL injection scanner (AUTHORIZED USE ONLY)
#[derive(Parser, Debug)]
#[command(name = "sqlscan")]
#[command(version)]
#[command(about = "Crawl a site and probe every discovered input for SQL injection", long_about = None)]
struct Cli {
    /// Start URL
    url: String,

    /// Skip browser-based capture of JavaScript requests
    #[arg(long)]
    no_js: bool,

    /// Show the browser window during capture
    #[arg(long)]
    headful: bool,

    /// Report format; without it a JSON summary is printed
    #[arg(long, value_enum)]
    report: Option<ReportFormat>,

    /// Report output path (defaults to stdout)
    #[arg(long)]
    out: Option<PathBuf>,

    /// Maximum crawl depth
    #[arg(long, default_value = "2")]
    max_depth: usize,

    /// Maximum pages to crawl
    #[arg(long, default_value = "50")]
    max_pages: usize,

    /// Concurrent point workers per candidate
    #[arg(long, default_value = "4")]
    parallel: usize,

    /// Candidates scanned at the same time
    #[arg(long, default_value = "2")]
    scan_parallel: usize,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value = "10000")]
    timeout_ms: u64,

    /// Delay a time-based payload must add, in milliseconds
    #[arg(long, default_value = "2500")]
    time_threshold_ms: u64,

    /// Request budget per candidate
    #[arg(long, default_value = "500")]
    max_requests: usize,

    /// Extra header in key:value format (repeatable)
    #[arg(long = "header")]
    headers: Vec<String>,

    /// Cookie in name=value format (repeatable)
    #[arg(long = "cookie")]
    cookies: Vec<String>,

    /// Payload overrides (YAML)
    #[arg(long)]
    payload_file: Option<PathBuf>,

    /// Login settings (YAML) used before crawling
    #[arg(long)]
    auth_file: Option<PathBuf>,

    /// Print only the summary block to stderr
    #[arg(long)]
    short: bool,
}

fn parse_pairs(items: &[String], sep: char) -> BTreeMap<String, String> {
    items
        .iter()
        .filter_map(|item| item.split_once(sep))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

fn print_progress(p: SmartScanProgress) {
    match p.phase {
        Some(SmartPhase::Crawl) => eprint!(
            "\r[crawl] {}/{} pages...",
            p.crawled_pages.unwrap_or(0),
            p.max_pages.unwrap_or(0)
        ),
        Some(SmartPhase::Scan) => {
            let eta = p
                .eta_ms
                .map(|ms| format!(", eta {}s", (ms as f64 / 1000.0).round() as u64))
                .unwrap_or_default();
            eprint!(
                "\r[scan] {}/{} candidates{}",
                p.scan_processed.unwrap_or(0),
                p.scan_total.unwrap_or(0),
                eta
            );
        }
        Some(SmartPhase::Done) => eprintln!("\n[done]"),
        None => {}
    }
}

fn build_config(cli: &Cli) -> Result<SmartScanConfig, ScanError> {
    let mut config = SmartScanConfig::new(cli.url.clone());
    config.max_depth = cli.max_depth;
    config.max_pages = cli.max_pages;
    config.use_browser = !cli.no_js;
    config.browser_headless = !cli.headful;
    config.parallel = cli.parallel;
    config.scan_parallel = cli.scan_parallel;
    config.request_timeout_ms = cli.timeout_ms;
    config.time_threshold_ms = cli.time_threshold_ms;
    config.max_requests = cli.max_requests;
    config.headers = parse_pairs(&cli.headers, ':');
    config.cookies = parse_pairs(&cli.cookies, '=');

    if let Some(path) = &cli.payload_file {
        config.payloads = ScanConfig::load_payloads_from_file(path)?;
        info!("✓ Loaded payload configuration from: {}", path.display());
    }
    if let Some(path) = &cli.auth_file {
        let auth: AuthConfig = serde_yaml::from_str(&std::fs::read_to_string(path)?)?;
        config.auth = Some(auth);
    }

    config.on_progress = Some(ProgressFn::new(print_progress));
    Ok(config)
}

fn write_output(cli: &Cli, result: &SmartScanResult) -> Result<(), ScanError> {
    let output = match cli.report {
        Some(format) => report::render(format, &report::merge_results(&result.sqli))?,
        None => report::summary_json(result)?,
    };
    match &cli.out {
        Some(path) => {
            std::fs::write(path, output)?;
            info!("📄 Report written to {}", path.display());
        }
        None => println!("{}", output),
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<bool, ScanError> {
    let config = build_config(&cli)?;
    let result = sqli::smart_scan(config).await?;
    sqli::print_results(&result, cli.short);
    write_output(&cli, &result)?;
    Ok(result.vulnerable())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    // usage errors exit with 2 from inside clap
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::from(1),
        Ok(false) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\n⛔ Scan failed: {}", e);
            ExitCode::from(2)
        }
    }
}
