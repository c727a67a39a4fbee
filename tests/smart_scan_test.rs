// Crawl-and-scan tests with a stubbed browser capture

use async_trait::async_trait;
use sqlscan::sqli::browser::{NetworkCapture, ObservedRequest};
use sqlscan::sqli::config::{PayloadConfig, ProgressFn, TechniqueFlags};
use sqlscan::sqli::crawler::smart_scan_with_capture;
use sqlscan::sqli::types::{DiscoveredCandidate, PointKind, SmartPhase, SmartScanProgress};
use sqlscan::{smart_scan, SmartScanConfig};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const LOGIN_FORM: &str = r#"<form action="/login" method="post">
    <input type="text" name="user" />
    <input type="password" name="pass" />
</form>"#;

struct StubCapture {
    observed: Vec<ObservedRequest>,
}

#[async_trait]
impl NetworkCapture for StubCapture {
    async fn capture(&self, _pages: &[String]) -> Vec<ObservedRequest> {
        self.observed.clone()
    }
}

fn config(base: &str) -> SmartScanConfig {
    let mut config = SmartScanConfig::new(base);
    config.use_browser = false;
    config.jitter_ms = (0, 0);
    config.techniques = TechniqueFlags {
        error: true,
        boolean: false,
        time: false,
    };
    config.payloads = PayloadConfig {
        error: Some(vec!["'".to_string()]),
        ..PayloadConfig::default()
    };
    config
}

async fn mount_site(server: &MockServer) {
    let home = format!(
        r#"<html><body>
            <a href="/items?id=1">Item 1</a>
            <a href="/items?id=1#reviews">Item 1 reviews</a>
            <a href="/about">About</a>
            <a href="/brochure.pdf">Brochure</a>
            {}
        </body></html>"#,
        LOGIN_FORM
    );
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(home, "text/html"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            format!("<html><body><h1>About</h1>{}</body></html>", LOGIN_FORM),
            "text/html",
        ))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html><body>Item</body></html>", "text/html"))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>Invalid login</html>"))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/search"))
        .respond_with(|req: &Request| {
            let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap_or_default();
            let q = body["q"].as_str().unwrap_or("");
            if q.contains('\'') {
                ResponseTemplate::new(500).set_body_string(
                    "You have an error in your SQL syntax; check the manual for your MySQL server",
                )
            } else {
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"results": []}))
            }
        })
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_crawl_dedups_candidates_and_scans_captured_endpoint() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let base = format!("{}/", server.uri());

    let capture = StubCapture {
        observed: vec![
            // navigation of a crawled page is not a candidate
            ObservedRequest {
                method: "GET".to_string(),
                url: base.clone(),
                post_data: None,
                headers: None,
            },
            ObservedRequest {
                method: "POST".to_string(),
                url: format!("{}/api/search", server.uri()),
                post_data: Some(r#"{"q":"shoes"}"#.to_string()),
                headers: None,
            },
            ObservedRequest {
                method: "GET".to_string(),
                url: "http://cdn.elsewhere.test/tracker".to_string(),
                post_data: None,
                headers: None,
            },
        ],
    };

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let mut config = config(&base);
    config.on_progress = Some(ProgressFn::new(move |p: SmartScanProgress| {
        sink.lock().unwrap().push(p)
    }));

    let result = smart_scan_with_capture(config, Some(&capture)).await.unwrap();

    // "/", "/items?id=1" and "/about"; the pdf is never fetched
    assert_eq!(result.crawled_pages, 3);
    assert_eq!(result.candidates.len(), 3);
    assert!(matches!(result.candidates[0], DiscoveredCandidate::Form(_)));
    assert!(matches!(
        &result.candidates[1],
        DiscoveredCandidate::UrlWithQuery { url } if url.ends_with("/items?id=1")
    ));
    assert!(matches!(
        &result.candidates[2],
        DiscoveredCandidate::JsonEndpoint { url, .. } if url.ends_with("/api/search")
    ));

    assert_eq!(result.sqli.len(), 3);
    assert!(result.vulnerable());
    assert!(!result.sqli[0].vulnerable);
    assert!(!result.sqli[1].vulnerable);
    let finding = result.sqli[2].vulnerable_findings().next().unwrap();
    assert_eq!(finding.point.kind, PointKind::Json);
    assert_eq!(finding.point.name, "q");

    let events = events.lock().unwrap();
    assert_eq!(events[0].phase, Some(SmartPhase::Crawl));
    assert!(events
        .iter()
        .any(|e| e.phase == Some(SmartPhase::Scan) && e.scan_total == Some(3)));
    assert_eq!(events.last().unwrap().phase, Some(SmartPhase::Done));
}

#[tokio::test]
async fn test_scan_parallel_bounds_concurrent_candidates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"<html><body><a href="/a?x=1">A</a><a href="/b?y=1">B</a><a href="/c?z=1">C</a></body></html>"#,
            "text/html",
        ))
        .mount(&server)
        .await;

    let arrivals = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&arrivals);
    Mock::given(method("GET"))
        .and(path_regex("^/[abc]$"))
        .respond_with(move |req: &Request| {
            // crawl fetches carry the original value, scan requests do not
            if req.url.query_pairs().any(|(_, v)| v != "1") {
                seen.lock().unwrap().push(Instant::now());
            }
            ResponseTemplate::new(200)
                .set_body_raw("<html><body>page</body></html>", "text/html")
                .set_delay(Duration::from_millis(200))
        })
        .mount(&server)
        .await;

    let mut config = config(&format!("{}/", server.uri()));
    config.scan_parallel = 1;
    config.parallel = 1;
    let result = smart_scan(config).await.unwrap();

    assert_eq!(result.candidates.len(), 3);
    assert_eq!(result.sqli.len(), 3);

    let mut arrivals = arrivals.lock().unwrap().clone();
    // baseline and one error payload per candidate
    assert_eq!(arrivals.len(), 6);
    arrivals.sort();
    // one request at a time means every gap spans a full response delay
    assert!(arrivals
        .windows(2)
        .all(|w| w[1].duration_since(w[0]) >= Duration::from_millis(150)));
}

#[tokio::test]
async fn test_max_pages_bounds_crawl() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let mut config = config(&format!("{}/", server.uri()));
    config.max_pages = 1;
    let result = smart_scan(config).await.unwrap();

    assert_eq!(result.crawled_pages, 1);
    // the home page alone still yields the form and the query link
    assert_eq!(result.candidates.len(), 2);
    assert!(!result.vulnerable());
}

#[tokio::test]
async fn test_depth_zero_only_fetches_start_page() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let mut config = config(&format!("{}/", server.uri()));
    config.max_depth = 0;
    let result = smart_scan(config).await.unwrap();

    assert_eq!(result.crawled_pages, 1);
}

#[tokio::test]
async fn test_invalid_base_url_is_an_error() {
    assert!(smart_scan(SmartScanConfig::new("::nope::")).await.is_err());
}
