// src/sqli/crawler.rs
use crate::sqli::auth;
use crate::sqli::browser::{self, CaptureOptions, HeadlessCapture, NetworkCapture};
use crate::sqli::config::{EnableFlags, ProgressFn, ScanConfig, SmartScanConfig, TechniqueFlags};
use crate::sqli::error::ScanError;
use crate::sqli::http_client::{cookie_header, HttpClient};
use crate::sqli::points::extract_links_and_forms;
use crate::sqli::run_scan;
use crate::sqli::types::{
    DiscoveredCandidate, HttpMethod, ScanPhase, ScanProgress, ScanResult, SmartPhase,
    SmartScanProgress, SmartScanResult,
};
use futures::future::join_all;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

fn binary_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\.(png|jpe?g|gif|svg|webp|ico|pdf|zip|rar|7z|mp4|mp3)$").ok())
        .as_ref()
}

/// Images, archives, media and pdf are never crawled
pub fn is_binary_asset(url: &Url) -> bool {
    binary_regex().map_or(false, |re| re.is_match(url.path()))
}

/// What the static crawl found
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    /// Fetched pages in visiting order
    pub visited: Vec<String>,
    pub candidates: Vec<DiscoveredCandidate>,
}

/// Breadth-first, depth-limited crawler fetching pages in small batches
pub struct Crawler {
    http_client: HttpClient,
    config: Arc<SmartScanConfig>,
    base_url: Url,
    /// Headers sent with every page fetch, session cookie included
    headers: BTreeMap<String, String>,
}

impl Crawler {
    pub fn new(
        http_client: HttpClient,
        config: Arc<SmartScanConfig>,
        headers: BTreeMap<String, String>,
    ) -> Result<Self, ScanError> {
        let base_url = Url::parse(&config.base_url)?;
        Ok(Self {
            http_client,
            config,
            base_url,
            headers,
        })
    }

    pub async fn crawl(&self) -> CrawlOutcome {
        info!("🕷️ Starting crawl of {}", self.base_url);
        let max_pages = self.config.max_pages;
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((self.base_url.to_string(), 0));
        let mut seen: HashSet<String> = HashSet::new();
        let mut outcome = CrawlOutcome::default();

        while !queue.is_empty() && outcome.visited.len() < max_pages {
            let mut batch = Vec::new();
            while batch.len() < self.config.crawl_concurrency {
                let Some((url, depth)) = queue.pop_front() else {
                    break;
                };
                if outcome.visited.len() + batch.len() >= max_pages {
                    break;
                }
                if seen.insert(url.clone()) {
                    batch.push((url, depth));
                }
            }
            if batch.is_empty() {
                continue;
            }

            let pages = join_all(batch.iter().map(|(url, _)| {
                self.http_client.fetch_html(url, &self.headers)
            }))
            .await;

            for ((url, depth), html) in batch.into_iter().zip(pages) {
                outcome.visited.push(url.clone());
                self.emit(SmartScanProgress {
                    phase: Some(SmartPhase::Crawl),
                    crawled_pages: Some(outcome.visited.len()),
                    max_pages: Some(max_pages),
                    ..SmartScanProgress::default()
                });
                let Some(html) = html else {
                    continue;
                };

                let page = extract_links_and_forms(&url, &html);
                debug!(
                    "✓ {} (depth {}): {} links, {} forms",
                    url,
                    depth,
                    page.links.len(),
                    page.forms.len()
                );
                outcome
                    .candidates
                    .extend(page.forms.into_iter().map(DiscoveredCandidate::Form));

                for link in page.links {
                    let Ok(link_url) = Url::parse(&link) else {
                        continue;
                    };
                    if self.config.same_origin_only && link_url.origin() != self.base_url.origin() {
                        continue;
                    }
                    if is_binary_asset(&link_url) {
                        continue;
                    }
                    let href = link_url.to_string();
                    if link_url.query_pairs().next().is_some() {
                        outcome
                            .candidates
                            .push(DiscoveredCandidate::UrlWithQuery { url: href.clone() });
                    }
                    if depth + 1 <= self.config.max_depth && !seen.contains(&href) {
                        queue.push_back((href, depth + 1));
                    }
                }
            }
        }

        info!(
            "✅ Crawl complete: {} pages, {} raw candidates",
            outcome.visited.len(),
            outcome.candidates.len()
        );
        outcome
    }

    fn emit(&self, progress: SmartScanProgress) {
        if let Some(cb) = &self.config.on_progress {
            cb.emit(progress);
        }
    }
}

/// Keep the first candidate of every structural key
pub fn dedup_candidates(candidates: Vec<DiscoveredCandidate>) -> Vec<DiscoveredCandidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.dedup_key()))
        .collect()
}

fn enable_for(query_path: bool, form: bool, json: bool, techniques: TechniqueFlags) -> EnableFlags {
    EnableFlags {
        query: query_path,
        path: query_path,
        form,
        json: Some(json),
        header: false,
        cookie: false,
        ..EnableFlags::default()
    }
    .with_techniques(techniques)
}

/// Detection engine settings for one candidate
pub fn scan_config_for(candidate: &DiscoveredCandidate, template: &ScanConfig, techniques: TechniqueFlags) -> ScanConfig {
    let mut config = template.clone();
    match candidate {
        DiscoveredCandidate::UrlWithQuery { url } => {
            config.target = url.clone();
            config.method = Some(HttpMethod::Get);
            config.enable = enable_for(true, false, false, techniques);
        }
        DiscoveredCandidate::Form(form) => {
            config.target = form.action.clone();
            config.method = Some(form.method);
            config.forms = vec![form.clone()];
            config.enable = enable_for(false, true, false, techniques);
        }
        DiscoveredCandidate::JsonEndpoint {
            url,
            method,
            body,
            headers,
        } => {
            let structured = matches!(body, Some(Value::Object(_) | Value::Array(_)));
            let json = structured
                && matches!(method, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch);
            config.target = url.clone();
            config.method = Some(match method {
                HttpMethod::Get | HttpMethod::Post => *method,
                _ => HttpMethod::Post,
            });
            config.json_body = if json { body.clone() } else { None };
            if let Some(extra) = headers {
                config.headers.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            config.enable = enable_for(true, false, json, techniques);
        }
    }
    config
}

fn capture_options(config: &SmartScanConfig) -> CaptureOptions {
    CaptureOptions {
        base_url: config.base_url.clone(),
        same_origin_only: config.same_origin_only,
        headless: config.browser_headless,
        wait_ms: config.browser_wait_ms,
        timeout_ms: config.request_timeout_ms,
    }
}

/// Crawl from `base_url`, collect candidates (optionally including
/// requests observed in a headless browser) and run the detection engine
/// on each of them.
pub async fn smart_scan(config: SmartScanConfig) -> Result<SmartScanResult, ScanError> {
    let capture: Option<Box<dyn NetworkCapture>> = if config.use_browser {
        Some(Box::new(HeadlessCapture::new(capture_options(&config))))
    } else {
        None
    };
    smart_scan_with_capture(config, capture.as_deref()).await
}

/// `smart_scan` with an explicit network capture implementation
pub async fn smart_scan_with_capture(
    config: SmartScanConfig,
    capture: Option<&dyn NetworkCapture>,
) -> Result<SmartScanResult, ScanError> {
    config.validate()?;
    info!("🔍 Starting crawl-and-scan of {}", config.base_url);

    let mut headers = config.headers.clone();
    let mut cookies = config.cookies.clone();
    if let Some(auth) = &config.auth {
        match auth::perform_auth(auth, config.request_timeout_ms, &config.user_agent).await {
            Some(session) => session.merge_into(&mut headers, &mut cookies),
            None => warn!("auth skipped; crawling unauthenticated"),
        }
    }

    let mut page_headers = headers.clone();
    if let Some(cookie) = cookie_header(&cookies) {
        page_headers.insert("Cookie".to_string(), cookie);
    }
    let client = HttpClient::new(config.request_timeout_ms, &config.user_agent, true)?;
    let config = Arc::new(config);
    let crawler = Crawler::new(client, Arc::clone(&config), page_headers)?;

    // Phase 1: static crawl
    let CrawlOutcome {
        visited,
        mut candidates,
    } = crawler.crawl().await;

    // Phase 2: JS network capture
    if let Some(capture) = capture {
        let pages = browser::pages_to_visit(&visited, config.browser_max_pages);
        let observed = capture.capture(&pages).await;
        let endpoints =
            browser::candidates_from_requests(&observed, &pages, &capture_options(&config));
        info!("✓ {} endpoints observed in the browser", endpoints.len());
        candidates.extend(endpoints);
    }

    let candidates = dedup_candidates(candidates);
    let total = candidates.len();
    info!("✓ {} unique candidates", total);

    // Phase 3: scan candidates on a bounded pool
    let emit = |progress: SmartScanProgress| {
        if let Some(cb) = &config.on_progress {
            cb.emit(progress);
        }
    };
    emit(SmartScanProgress {
        phase: Some(SmartPhase::Scan),
        candidates_found: Some(total),
        scan_processed: Some(0),
        scan_total: Some(total),
        ..SmartScanProgress::default()
    });

    let mut template = config.scan_template();
    template.headers = headers;
    template.cookies = cookies;

    let semaphore = Arc::new(Semaphore::new(config.scan_parallel));
    let processed = Arc::new(AtomicUsize::new(0));
    let started = Instant::now();
    let mut tasks = Vec::with_capacity(total);

    for candidate in &candidates {
        let mut scan_config = scan_config_for(candidate, &template, config.techniques);
        let sem = Arc::clone(&semaphore);
        let processed = Arc::clone(&processed);
        let outer = config.on_progress.clone();

        scan_config.on_progress = outer.map(|outer: ProgressFn<SmartScanProgress>| {
            let processed = Arc::clone(&processed);
            ProgressFn::new(move |p: ScanProgress| {
                if p.phase != ScanPhase::Done {
                    return;
                }
                let done = (processed.load(Ordering::SeqCst) + 1).min(total);
                let per_candidate = started.elapsed().as_millis() as u64 / done.max(1) as u64;
                outer.emit(SmartScanProgress {
                    phase: Some(SmartPhase::Scan),
                    candidates_found: Some(total),
                    scan_processed: Some(done),
                    scan_total: Some(total),
                    eta_ms: Some(per_candidate * (total - done) as u64),
                    ..SmartScanProgress::default()
                });
            })
        });

        tasks.push(tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return ScanResult::default();
            };
            let target = scan_config.target.clone();
            let result = match run_scan(scan_config).await {
                Ok(result) => result,
                Err(e) => {
                    warn!("skipping candidate {}: {}", target, e);
                    ScanResult::default()
                }
            };
            processed.fetch_add(1, Ordering::SeqCst);
            result
        }));
    }

    let mut sqli = Vec::with_capacity(total);
    for task in tasks {
        match task.await {
            Ok(result) => sqli.push(result),
            Err(e) => {
                warn!("candidate task failed: {}", e);
                sqli.push(ScanResult::default());
            }
        }
    }

    emit(SmartScanProgress {
        phase: Some(SmartPhase::Done),
        candidates_found: Some(total),
        scan_processed: Some(total),
        scan_total: Some(total),
        eta_ms: Some(0),
        ..SmartScanProgress::default()
    });

    let result = SmartScanResult {
        crawled_pages: visited.len(),
        candidates,
        sqli,
    };
    info!(
        "✅ Crawl-and-scan complete: {} pages, {} candidates, vulnerable: {}",
        result.crawled_pages,
        result.candidates.len(),
        result.vulnerable()
    );
    Ok(result)
}
