// src/sqli/mod.rs
// SQL injection scanner: detection engine and crawl-driven discovery
// SAFETY: for AUTHORIZED testing only

pub mod auth;
pub mod browser;
pub mod config;
pub mod context;
pub mod crawler;
pub mod error;
pub mod heuristics;
pub mod http_client;
pub mod payloads;
pub mod points;
pub mod report;
pub mod stats;
pub mod tester;
pub mod types;

pub use config::{ScanConfig, SmartScanConfig};
pub use crawler::smart_scan;
pub use error::ScanError;
pub use types::{ScanResult, SmartScanResult};

use context::ScanContext;
use http_client::{cookie_header, HttpClient};
use std::sync::Arc;
use tester::SqliTester;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use types::{InjectionPoint, ScanPhase, ScanProgress, ScanTarget};
use url::Url;

/// Requests a single point is assumed to cost when applying `max_requests`
pub const REQUESTS_PER_POINT: usize = 6;

/// Keep at most `max(1, max_requests / 6)` points when the plan would
/// exceed the request budget
pub fn apply_request_budget(mut points: Vec<InjectionPoint>, max_requests: usize) -> Vec<InjectionPoint> {
    if points.len() * REQUESTS_PER_POINT > max_requests {
        let keep = (max_requests / REQUESTS_PER_POINT).max(1);
        warn!(
            "request budget {} allows {} of {} points; truncating",
            max_requests,
            keep,
            points.len()
        );
        points.truncate(keep);
    }
    points
}

/// Main entry point of the detection engine: probe every enabled
/// injection point of one target and collect all findings.
///
/// Only invalid input is an error. Unreachable targets, failed logins and
/// transport errors all end in a (possibly empty) `ScanResult`.
pub async fn run_scan(config: ScanConfig) -> Result<ScanResult, ScanError> {
    config.validate()?;
    let root = Url::parse(&config.target)?;

    warn!("[!] Use only with permission.");
    info!("🔍 Starting SQL injection scan of {}", config.target);

    let mut headers = config.headers.clone();
    let mut cookies = config.cookies.clone();
    if let Some(auth) = &config.auth {
        match auth::perform_auth(auth, config.request_timeout_ms, &config.user_agent).await {
            Some(session) => session.merge_into(&mut headers, &mut cookies),
            None => warn!("auth skipped; scanning unauthenticated"),
        }
    }

    let client = HttpClient::new(config.request_timeout_ms, &config.user_agent, true)?;
    let mut target = ScanTarget {
        url: config.target.clone(),
        method: config.method,
        headers,
        cookies,
        json_body: config.json_body.clone(),
        forms: Vec::new(),
    };

    // Phase 1: discover points
    let enable = &config.enable;
    let mut discovered = Vec::new();
    if enable.query {
        discovered.extend(points::discover_query_points(&root));
    }
    if enable.path {
        discovered.extend(points::discover_path_points(&root));
    }
    if enable.form {
        if config.forms.is_empty() {
            let mut page_headers = target.headers.clone();
            if let Some(cookie) = cookie_header(&target.cookies) {
                page_headers.insert("Cookie".to_string(), cookie);
            }
            let (form_points, forms) =
                points::fetch_and_discover_forms(&client, &config.target, &page_headers).await;
            discovered.extend(form_points);
            target.forms = forms;
        } else {
            discovered.extend(points::form_points(&config.forms));
            target.forms = config.forms.clone();
        }
    }
    if enable.json_enabled(config.json_body.is_some()) {
        discovered.extend(points::discover_json_points(config.json_body.as_ref()));
    }
    if enable.header {
        discovered.extend(points::discover_header_points(&config.headers));
    }
    if enable.cookie {
        discovered.extend(points::discover_cookie_points(&config.cookies));
    }
    let points = apply_request_budget(points::dedup_points(discovered), config.max_requests);
    info!("✓ {} injection points", points.len());

    let planned = SqliTester::checks_per_point(&config) * points.len();
    let ctx = Arc::new(ScanContext::new(planned, config.on_progress.clone()));
    ctx.emit(ScanProgress {
        phase: ScanPhase::Discover,
        points: Some(points.len()),
        planned_checks: Some(planned),
        processed_checks: None,
        eta_ms: None,
    });

    // Phase 2: probe points on a bounded pool
    let tester = Arc::new(SqliTester::new(client, target, &config, Arc::clone(&ctx)));
    let semaphore = Arc::new(Semaphore::new(config.parallel));
    let mut tasks = Vec::with_capacity(points.len());

    for point in points {
        let tester = Arc::clone(&tester);
        let sem = Arc::clone(&semaphore);
        tasks.push(tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            tester.test_point(&point).await;
        }));
    }

    for task in tasks {
        if let Err(e) = task.await {
            warn!("point task failed: {}", e);
        }
    }

    ctx.finish();
    let result = ScanResult::from_details(ctx.take_findings().await);
    info!(
        "✅ Scan complete: {}/{} checks, {} findings, vulnerable: {}",
        ctx.processed(),
        ctx.planned(),
        result.details.len(),
        result.vulnerable
    );
    Ok(result)
}

/// Human-readable summary of a crawl-and-scan run, written to stderr so
/// stdout stays free for reports
pub fn print_results(result: &SmartScanResult, short: bool) {
    eprintln!("\n{}", "═".repeat(70));
    eprintln!("  SQL INJECTION SCAN RESULTS");
    eprintln!("{}", "═".repeat(70));

    eprintln!("📊 Summary:");
    eprintln!("   Pages crawled:  {}", result.crawled_pages);
    eprintln!("   Candidates:     {}", result.candidates.len());
    let findings: Vec<_> = result
        .sqli
        .iter()
        .flat_map(|r| r.vulnerable_findings())
        .collect();
    eprintln!("   Vulnerable findings: {}", findings.len());
    eprintln!();

    if findings.is_empty() {
        eprintln!("✅ No SQL injection vulnerabilities detected");
        eprintln!();
        return;
    }

    if !short {
        eprintln!("📋 Detailed findings:");
        eprintln!("{}", "-".repeat(70));
        for (i, finding) in findings.iter().enumerate() {
            eprintln!("\n[{}] {} @ {}", i + 1, finding.technique, finding.point.label());
            eprintln!("    Payload: {}", finding.payload);
            if !finding.confirmations.is_empty() {
                eprintln!("    Confirmations: {}", finding.confirmations.join(", "));
            }
            if let Some(evidence) = &finding.evidence {
                eprintln!("    Evidence: {}", heuristics::Heuristics::clip(evidence, 160));
            }
        }
        eprintln!("\n{}", "-".repeat(70));
    }

    eprintln!("\n{}", "═".repeat(70));
}
