// src/sqli/browser.rs
//! JavaScript network capture. Pages are opened in a real browser and the
//! same-origin requests their scripts issue become JSON endpoint candidates.

use crate::sqli::error::ScanError;
use crate::sqli::types::{DiscoveredCandidate, HttpMethod};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Visited pages considered for capture
pub const CAPTURE_PAGE_POOL: usize = 20;
/// Default number of pages opened when no explicit limit is set
pub const DEFAULT_CAPTURE_PAGES: usize = 10;

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub base_url: String,
    pub same_origin_only: bool,
    pub headless: bool,
    pub wait_ms: u64,
    pub timeout_ms: u64,
}

/// A request observed while a page was loaded
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedRequest {
    pub method: String,
    pub url: String,
    pub post_data: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
}

/// Headers the probe client manages itself; never replayed from a capture
const MANAGED_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "content-type",
    "connection",
    "cookie",
    "accept-encoding",
    "user-agent",
];

fn replayable_headers(headers: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    let kept: BTreeMap<String, String> = headers
        .iter()
        .filter(|(k, _)| !k.starts_with(':') && !MANAGED_HEADERS.contains(&k.to_ascii_lowercase().as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    (!kept.is_empty()).then_some(kept)
}

/// String-valued entries of a JSON header object
pub fn headers_from_json(value: &Value) -> Option<BTreeMap<String, String>> {
    let map = value.as_object()?;
    Some(
        map.iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect(),
    )
}

#[async_trait]
pub trait NetworkCapture: Send + Sync {
    /// Load each page and report the requests it made. Failures of any
    /// kind produce an empty list.
    async fn capture(&self, pages: &[String]) -> Vec<ObservedRequest>;
}

/// Pages to open: http(s) only, taken from the first visited pages
pub fn pages_to_visit(visited: &[String], max_pages: Option<usize>) -> Vec<String> {
    let pool: Vec<&String> = visited.iter().take(CAPTURE_PAGE_POOL).collect();
    let limit = max_pages.unwrap_or_else(|| DEFAULT_CAPTURE_PAGES.min(pool.len()));
    pool.into_iter()
        .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
        .take(limit)
        .cloned()
        .collect()
}

fn static_asset_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\.(js|mjs|css|map|png|jpe?g|gif|svg|webp|ico|woff2?|ttf|eot|pdf|zip|mp4|mp3)$").ok()
    })
    .as_ref()
}

/// Turn observed requests into deduplicated JSON endpoint candidates.
///
/// Page navigations and static assets are dropped; so are cross-origin
/// requests when `same_origin_only` is set. Bodies that parse as JSON
/// objects or arrays are kept structured, anything else as a string.
/// Observed headers are kept except those in `MANAGED_HEADERS`.
pub fn candidates_from_requests(
    observed: &[ObservedRequest],
    pages: &[String],
    options: &CaptureOptions,
) -> Vec<DiscoveredCandidate> {
    let Ok(base) = Url::parse(&options.base_url) else {
        return Vec::new();
    };
    let page_set: HashSet<&str> = pages.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for req in observed {
        let Ok(url) = Url::parse(&req.url) else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        if options.same_origin_only && url.origin() != base.origin() {
            continue;
        }
        let Some(method) = HttpMethod::parse(&req.method) else {
            continue;
        };
        if method == HttpMethod::Get
            && (page_set.contains(req.url.as_str())
                || static_asset_regex().map_or(false, |re| re.is_match(url.path())))
        {
            continue;
        }
        if !seen.insert(format!("{} {}", method, req.url)) {
            continue;
        }

        let body = req.post_data.as_ref().map(|raw| {
            match serde_json::from_str::<Value>(raw) {
                Ok(v @ (Value::Object(_) | Value::Array(_))) => v,
                _ => Value::String(raw.clone()),
            }
        });
        out.push(DiscoveredCandidate::JsonEndpoint {
            url: req.url.clone(),
            method,
            body,
            headers: req.headers.as_ref().and_then(replayable_headers),
        });
    }
    out
}

/// Capture through a locally installed Chrome/Chromium
pub struct HeadlessCapture {
    options: CaptureOptions,
}

impl HeadlessCapture {
    pub fn new(options: CaptureOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl NetworkCapture for HeadlessCapture {
    async fn capture(&self, pages: &[String]) -> Vec<ObservedRequest> {
        if pages.is_empty() {
            return Vec::new();
        }
        info!("[Headless] capturing network traffic of {} pages", pages.len());
        let pages = pages.to_vec();
        let options = self.options.clone();

        // headless_chrome is synchronous
        match tokio::task::spawn_blocking(move || capture_sync(&pages, &options)).await {
            Ok(Ok(observed)) => {
                info!("[Headless] observed {} requests", observed.len());
                observed
            }
            Ok(Err(e)) => {
                warn!("[Headless] capture skipped: {}", e);
                Vec::new()
            }
            Err(e) => {
                warn!("[Headless] capture task failed: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(feature = "headless")]
fn capture_sync(pages: &[String], options: &CaptureOptions) -> Result<Vec<ObservedRequest>, ScanError> {
    use headless_chrome::browser::tab::{RequestInterceptor, RequestPausedDecision};
    use headless_chrome::browser::transport::{SessionId, Transport};
    use headless_chrome::protocol::cdp::Fetch::events::RequestPausedEvent;
    use headless_chrome::{Browser, LaunchOptions};
    use std::sync::{Arc, Mutex};

    let browser_err = |e: &dyn std::fmt::Display| ScanError::Browser(e.to_string());

    let launch = LaunchOptions::default_builder()
        .headless(options.headless)
        .idle_browser_timeout(Duration::from_millis(options.timeout_ms.max(30_000)))
        .build()
        .map_err(|e| browser_err(&e))?;
    let browser = Browser::new(launch).map_err(|e| browser_err(&e))?;
    let tab = browser.new_tab().map_err(|e| browser_err(&e))?;

    let observed: Arc<Mutex<Vec<ObservedRequest>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&observed);
    let interceptor: Arc<dyn RequestInterceptor + Send + Sync> = Arc::new(
        move |_transport: Arc<Transport>, _session: SessionId, event: RequestPausedEvent| {
            let request = &event.params.request;
            if let Ok(mut list) = sink.lock() {
                list.push(ObservedRequest {
                    method: request.method.to_uppercase(),
                    url: request.url.clone(),
                    post_data: request.post_data.clone(),
                    headers: serde_json::to_value(&request.headers)
                        .ok()
                        .as_ref()
                        .and_then(headers_from_json),
                });
            }
            RequestPausedDecision::Continue(None)
        },
    );
    tab.enable_fetch(None, None).map_err(|e| browser_err(&e))?;
    tab.enable_request_interception(interceptor)
        .map_err(|e| browser_err(&e))?;

    for page in pages {
        let loaded = tab
            .navigate_to(page)
            .and_then(|t| t.wait_until_navigated());
        if let Err(e) = loaded {
            debug!("[Headless] navigation to {} failed: {}", page, e);
            continue;
        }
        // let client-side requests fire
        std::thread::sleep(Duration::from_millis(options.wait_ms));
    }

    let list = observed
        .lock()
        .map(|l| l.clone())
        .map_err(|e| ScanError::Browser(e.to_string()))?;
    Ok(list)
}

#[cfg(not(feature = "headless"))]
fn capture_sync(_pages: &[String], _options: &CaptureOptions) -> Result<Vec<ObservedRequest>, ScanError> {
    Err(ScanError::Browser(
        "built without the `headless` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> CaptureOptions {
        CaptureOptions {
            base_url: "http://app.test/".to_string(),
            same_origin_only: true,
            headless: true,
            wait_ms: 0,
            timeout_ms: 1000,
        }
    }

    fn observed(method: &str, url: &str, body: Option<&str>) -> ObservedRequest {
        ObservedRequest {
            method: method.to_string(),
            url: url.to_string(),
            post_data: body.map(str::to_string),
            headers: None,
        }
    }

    #[test]
    fn test_pages_to_visit_limits() {
        let visited: Vec<String> = (0..30).map(|i| format!("http://app.test/p{}", i)).collect();
        assert_eq!(pages_to_visit(&visited, None).len(), 10);
        assert_eq!(pages_to_visit(&visited, Some(25)).len(), 20);
        assert_eq!(pages_to_visit(&visited[..3], None).len(), 3);

        let mixed = vec!["ftp://app.test/".to_string(), "http://app.test/".to_string()];
        assert_eq!(pages_to_visit(&mixed, None), vec!["http://app.test/".to_string()]);
    }

    #[test]
    fn test_candidates_filtered_and_deduplicated() {
        let pages = vec!["http://app.test/".to_string()];
        let requests = vec![
            observed("GET", "http://app.test/", None),
            observed("GET", "http://app.test/static/app.js", None),
            observed("GET", "http://cdn.other/lib.js", None),
            observed("POST", "http://app.test/api/search", Some(r#"{"q":"x"}"#)),
            observed("POST", "http://app.test/api/search", Some(r#"{"q":"y"}"#)),
            observed("get", "http://app.test/api/items?id=3", None),
            observed("POST", "http://app.test/api/raw", Some("a=1")),
        ];
        let candidates = candidates_from_requests(&requests, &pages, &options());
        assert_eq!(candidates.len(), 3);
        assert_eq!(
            candidates[0],
            DiscoveredCandidate::JsonEndpoint {
                url: "http://app.test/api/search".to_string(),
                method: HttpMethod::Post,
                body: Some(serde_json::json!({"q": "x"})),
                headers: None,
            }
        );
        assert!(matches!(
            &candidates[2],
            DiscoveredCandidate::JsonEndpoint { body: Some(Value::String(s)), .. } if s == "a=1"
        ));
    }

    #[test]
    fn test_observed_headers_filtered() {
        let mut request = observed("POST", "http://app.test/api/items", Some("[1]"));
        request.headers = headers_from_json(&serde_json::json!({
            "Authorization": "Bearer t0k",
            "X-Requested-With": "XMLHttpRequest",
            "Content-Type": "application/json",
            "content-length": "3",
            "Cookie": "sid=1",
            ":authority": "app.test"
        }));
        let candidates = candidates_from_requests(&[request], &[], &options());
        let DiscoveredCandidate::JsonEndpoint { headers: Some(headers), .. } = &candidates[0] else {
            panic!("expected replayable headers");
        };
        let names: Vec<&str> = headers.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["Authorization", "X-Requested-With"]);

        let mut bare = observed("GET", "http://app.test/api/ping", None);
        bare.headers = headers_from_json(&serde_json::json!({"Host": "app.test"}));
        let candidates = candidates_from_requests(&[bare], &[], &options());
        assert!(matches!(&candidates[0], DiscoveredCandidate::JsonEndpoint { headers: None, .. }));
    }

    #[test]
    fn test_cross_origin_kept_when_allowed() {
        let mut opts = options();
        opts.same_origin_only = false;
        let requests = vec![observed("POST", "http://api.other/v1/find", None)];
        assert_eq!(candidates_from_requests(&requests, &[], &opts).len(), 1);
    }

    #[tokio::test]
    async fn test_capture_without_pages_is_empty() {
        let capture = HeadlessCapture::new(options());
        assert!(capture.capture(&[]).await.is_empty());
    }
}
