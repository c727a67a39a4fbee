// src/sqli/http_client.rs
//! Probe client: builds requests with exactly one injected value and sends
//! them without ever treating an HTTP status as a failure.

use crate::sqli::error::ScanError;
use crate::sqli::heuristics::Heuristics;
use crate::sqli::types::{HttpMethod, InjectionPoint, PointKind, PointMeta, ScanTarget};
use reqwest::header::{HeaderMap, HeaderName, CONTENT_TYPE, LOCATION, SET_COOKIE};
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeBody {
    Form(Vec<(String, String)>),
    Json(Value),
}

/// A fully resolved request, kept around so findings can be reproduced
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<ProbeBody>,
}

#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub text: String,
    pub content_type: Option<String>,
    pub location: Option<String>,
    pub set_cookies: Vec<String>,
    pub elapsed_ms: u64,
}

impl ProbeResponse {
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
            .unwrap_or(false)
    }
}

/// Result of one probe. A transport failure is data, not an error: the
/// technique treats that probe as inconclusive and moves on.
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    Response(ProbeResponse),
    Failed { error: String, elapsed_ms: u64 },
}

impl ProbeOutcome {
    pub fn response(&self) -> Option<&ProbeResponse> {
        match self {
            ProbeOutcome::Response(r) => Some(r),
            ProbeOutcome::Failed { .. } => None,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        match self {
            ProbeOutcome::Response(r) => r.elapsed_ms,
            ProbeOutcome::Failed { elapsed_ms, .. } => *elapsed_ms,
        }
    }
}

pub fn cookie_header(cookies: &BTreeMap<String, String>) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Build the request for `point` carrying `payload`; every other part of
/// the template keeps its baseline value.
pub fn build_probe(
    target: &ScanTarget,
    point: &InjectionPoint,
    payload: &str,
) -> Result<ProbeRequest, ScanError> {
    let mut url = Url::parse(&target.url)?;
    let mut method = target.method();
    let mut headers = target.headers.clone();
    let mut cookies = target.cookies.clone();
    let mut body = match (&target.json_body, method) {
        (Some(json), m) if m != HttpMethod::Get => Some(ProbeBody::Json(json.clone())),
        _ => None,
    };

    match point.kind {
        PointKind::Query => set_query_param(&mut url, &point.name, payload),
        PointKind::Path => {
            if let Some(PointMeta::PathSegment { position, .. }) = &point.meta {
                replace_path_segment(&mut url, *position, payload);
            }
        }
        PointKind::Form => {
            let (action, form_method) = match &point.meta {
                Some(PointMeta::Form { action, method }) => (action.as_str(), *method),
                _ => (target.url.as_str(), HttpMethod::Post),
            };
            url = Url::parse(action)?;
            method = form_method;
            let fields: Vec<(String, String)> = match target.form_for(action, form_method) {
                Some(form) => form
                    .fields
                    .iter()
                    .map(|f| {
                        let value = if f.name == point.name { payload } else { f.value.as_str() };
                        (f.name.clone(), value.to_string())
                    })
                    .collect(),
                None => vec![(point.name.clone(), payload.to_string())],
            };
            if method == HttpMethod::Get {
                for (name, value) in &fields {
                    set_query_param(&mut url, name, value);
                }
                body = None;
            } else {
                body = Some(ProbeBody::Form(fields));
            }
        }
        PointKind::Json => {
            let mut json = target.json_body.clone().unwrap_or(Value::Object(Default::default()));
            let path: Vec<String> = match &point.meta {
                Some(PointMeta::JsonPath { path, .. }) => path.clone(),
                _ => point.name.split('.').map(str::to_string).collect(),
            };
            set_json_path(&mut json, &path, payload);
            if !method.carries_body() {
                method = HttpMethod::Post;
            }
            body = Some(ProbeBody::Json(json));
        }
        PointKind::Header => {
            headers.insert(point.name.clone(), payload.to_string());
        }
        PointKind::Cookie => {
            cookies.insert(point.name.clone(), payload.to_string());
        }
    }

    if let Some(cookie) = cookie_header(&cookies) {
        headers.insert("Cookie".to_string(), cookie);
    }
    match &body {
        Some(ProbeBody::Form(_)) => {
            headers.insert(
                "Content-Type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            );
        }
        Some(ProbeBody::Json(_)) => {
            headers.insert("Content-Type".to_string(), "application/json".to_string());
        }
        None => {}
    }

    Ok(ProbeRequest {
        method,
        url: url.to_string(),
        headers,
        body,
    })
}

/// Replace every occurrence of `name` in the query string, or append it
fn set_query_param(url: &mut Url, name: &str, value: &str) {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut replaced = false;
    pairs.retain_mut(|(k, v)| {
        if k.as_str() != name {
            return true;
        }
        if replaced {
            return false;
        }
        *v = value.to_string();
        replaced = true;
        true
    });
    if !replaced {
        pairs.push((name.to_string(), value.to_string()));
    }
    url.query_pairs_mut().clear().extend_pairs(pairs.iter());
}

fn replace_path_segment(url: &mut Url, position: usize, payload: &str) {
    let mut segments: Vec<String> = url
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if let Some(seg) = segments.get_mut(position) {
        *seg = urlencoding::encode(payload).into_owned();
        let path = format!("/{}", segments.join("/"));
        url.set_path(&path);
    }
}

fn set_json_path(root: &mut Value, path: &[String], payload: &str) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = root;
    for key in parents {
        current = match current {
            Value::Array(items) => match key.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                Some(item) => item,
                None => return,
            },
            Value::Object(map) => map
                .entry(key.clone())
                .or_insert_with(|| Value::Object(Default::default())),
            _ => return,
        };
    }
    match current {
        Value::Array(items) => {
            if let Some(slot) = last.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                *slot = Value::String(payload.to_string());
            }
        }
        Value::Object(map) => {
            map.insert(last.clone(), Value::String(payload.to_string()));
        }
        _ => {}
    }
}

fn header_value(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

impl ProbeRequest {
    /// A curl command line that replays this request
    pub fn to_curl(&self) -> String {
        let mut parts = vec![
            "curl".to_string(),
            "-i".to_string(),
            "-X".to_string(),
            self.method.to_string(),
            shell_quote(&self.url),
        ];
        for (k, v) in &self.headers {
            parts.push("-H".to_string());
            parts.push(shell_quote(&format!("{}: {}", k, v)));
        }
        match &self.body {
            Some(ProbeBody::Form(fields)) => {
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields.iter())
                    .finish();
                parts.push("--data".to_string());
                parts.push(shell_quote(&encoded));
            }
            Some(ProbeBody::Json(json)) => {
                parts.push("--data".to_string());
                parts.push(shell_quote(&json.to_string()));
            }
            None => {}
        }
        parts.join(" ")
    }
}

/// HTTP client wrapper for the scanner
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout_ms: u64, user_agent: &str, follow_redirects: bool) -> Result<Self, ScanError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .user_agent(user_agent)
            .redirect(if follow_redirects {
                reqwest::redirect::Policy::limited(5)
            } else {
                reqwest::redirect::Policy::none()
            })
            .build()?;

        Ok(Self { client })
    }

    /// Send `payload` at `point`. Never returns an error: invalid requests
    /// and transport failures both become `ProbeOutcome::Failed`.
    pub async fn send_with_injection(
        &self,
        target: &ScanTarget,
        point: &InjectionPoint,
        payload: &str,
    ) -> (ProbeRequest, ProbeOutcome) {
        match build_probe(target, point, payload) {
            Ok(request) => {
                let outcome = self.send(&request).await;
                (request, outcome)
            }
            Err(e) => {
                let request = ProbeRequest {
                    method: target.method(),
                    url: target.url.clone(),
                    headers: target.headers.clone(),
                    body: None,
                };
                (
                    request,
                    ProbeOutcome::Failed {
                        error: e.to_string(),
                        elapsed_ms: 0,
                    },
                )
            }
        }
    }

    pub async fn send(&self, request: &ProbeRequest) -> ProbeOutcome {
        let method = match reqwest::Method::from_bytes(request.method.as_str().as_bytes()) {
            Ok(m) => m,
            Err(e) => {
                return ProbeOutcome::Failed {
                    error: e.to_string(),
                    elapsed_ms: 0,
                }
            }
        };
        let mut builder = self.client.request(method, &request.url);
        for (k, v) in &request.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        builder = match &request.body {
            Some(ProbeBody::Form(fields)) => {
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields.iter())
                    .finish();
                builder.body(encoded)
            }
            Some(ProbeBody::Json(json)) => builder.json(json),
            None => builder,
        };

        let start = Instant::now();
        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("probe to {} failed: {}", request.url, e);
                return ProbeOutcome::Failed {
                    error: e.to_string(),
                    elapsed_ms: start.elapsed().as_millis() as u64,
                };
            }
        };

        let status = response.status().as_u16();
        let content_type = header_value(response.headers(), CONTENT_TYPE);
        let location = header_value(response.headers(), LOCATION);
        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();

        match response.bytes().await {
            Ok(bytes) => ProbeOutcome::Response(ProbeResponse {
                status,
                text: Heuristics::body_to_text(&bytes, content_type.as_deref()),
                content_type,
                location,
                set_cookies,
                elapsed_ms: start.elapsed().as_millis() as u64,
            }),
            Err(e) => ProbeOutcome::Failed {
                error: e.to_string(),
                elapsed_ms: start.elapsed().as_millis() as u64,
            },
        }
    }

    /// Fetch a page for crawling; only successful HTML responses count
    pub async fn fetch_html(&self, url: &str, headers: &BTreeMap<String, String>) -> Option<String> {
        let request = ProbeRequest {
            method: HttpMethod::Get,
            url: url.to_string(),
            headers: headers.clone(),
            body: None,
        };
        match self.send(&request).await {
            ProbeOutcome::Response(r) if r.status < 400 => {
                let is_html = r
                    .content_type
                    .as_deref()
                    .map(|ct| ct.to_ascii_lowercase().contains("text/html"))
                    .unwrap_or(false);
                is_html.then_some(r.text)
            }
            ProbeOutcome::Response(r) => {
                debug!("skipping {} (status {})", url, r.status);
                None
            }
            ProbeOutcome::Failed { error, .. } => {
                debug!("fetch of {} failed: {}", url, error);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqli::types::{FormField, FormTarget};
    use serde_json::json;

    fn target(url: &str) -> ScanTarget {
        ScanTarget {
            url: url.to_string(),
            ..ScanTarget::default()
        }
    }

    #[test]
    fn test_http_client_creation() {
        assert!(HttpClient::new(1000, "test-agent", true).is_ok());
    }

    #[test]
    fn test_query_injection_keeps_other_params() {
        let t = target("http://x.test/search?q=test&page=2");
        let point = InjectionPoint::new(PointKind::Query, "q");
        let req = build_probe(&t, &point, "'").unwrap();
        let url = Url::parse(&req.url).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("q".to_string(), "'".to_string()),
                ("page".to_string(), "2".to_string())
            ]
        );
        assert_eq!(req.method, HttpMethod::Get);
        assert!(req.body.is_none());
    }

    #[test]
    fn test_path_injection_replaces_one_segment() {
        let t = target("http://x.test/users/42/profile");
        let point = InjectionPoint::new(PointKind::Path, "segment_1").with_meta(PointMeta::PathSegment {
            position: 1,
            segment: "42".to_string(),
        });
        let req = build_probe(&t, &point, "1 OR 1=1").unwrap();
        assert_eq!(req.url, "http://x.test/users/1%20OR%201%3D1/profile");
    }

    #[test]
    fn test_form_injection_keeps_sibling_defaults() {
        let mut t = target("http://x.test/");
        t.forms.push(FormTarget {
            action: "http://x.test/login".to_string(),
            method: HttpMethod::Post,
            enctype: None,
            fields: vec![
                FormField {
                    name: "user".to_string(),
                    value: "guest".to_string(),
                },
                FormField {
                    name: "token".to_string(),
                    value: "abc".to_string(),
                },
            ],
        });
        let point = InjectionPoint::new(PointKind::Form, "user").with_meta(PointMeta::Form {
            action: "http://x.test/login".to_string(),
            method: HttpMethod::Post,
        });
        let req = build_probe(&t, &point, "'").unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "http://x.test/login");
        assert_eq!(
            req.body,
            Some(ProbeBody::Form(vec![
                ("user".to_string(), "'".to_string()),
                ("token".to_string(), "abc".to_string()),
            ]))
        );
        assert_eq!(
            req.headers.get("Content-Type").map(String::as_str),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn test_json_injection_sets_nested_leaf() {
        let mut t = target("http://x.test/api");
        t.method = Some(HttpMethod::Post);
        t.json_body = Some(json!({"user": {"name": "bob", "id": 7}, "tags": ["a", "b"]}));

        let point = InjectionPoint::new(PointKind::Json, "tags.1").with_meta(PointMeta::JsonPath {
            path: vec!["tags".to_string(), "1".to_string()],
            numeric: false,
        });
        let req = build_probe(&t, &point, "'").unwrap();
        assert_eq!(
            req.body,
            Some(ProbeBody::Json(json!({"user": {"name": "bob", "id": 7}, "tags": ["a", "'"]})))
        );

        let point = InjectionPoint::new(PointKind::Json, "user.id").with_meta(PointMeta::JsonPath {
            path: vec!["user".to_string(), "id".to_string()],
            numeric: true,
        });
        let req = build_probe(&t, &point, "1 OR 1=1").unwrap();
        assert_eq!(
            req.body,
            Some(ProbeBody::Json(json!({"user": {"name": "bob", "id": "1 OR 1=1"}, "tags": ["a", "b"]})))
        );
    }

    #[test]
    fn test_cookie_injection_replaces_value() {
        let mut t = target("http://x.test/");
        t.cookies.insert("session".to_string(), "s1".to_string());
        t.cookies.insert("lang".to_string(), "en".to_string());
        let point = InjectionPoint::new(PointKind::Cookie, "lang");
        let req = build_probe(&t, &point, "'").unwrap();
        assert_eq!(req.headers.get("Cookie").map(String::as_str), Some("lang='; session=s1"));
    }

    #[test]
    fn test_header_injection() {
        let mut t = target("http://x.test/");
        t.headers.insert("X-Api-Version".to_string(), "1".to_string());
        let point = InjectionPoint::new(PointKind::Header, "X-Api-Version");
        let req = build_probe(&t, &point, "1'").unwrap();
        assert_eq!(req.headers.get("X-Api-Version").map(String::as_str), Some("1'"));
    }

    #[test]
    fn test_curl_rendering_quotes_payload() {
        let t = target("http://x.test/search?q=1");
        let point = InjectionPoint::new(PointKind::Query, "q");
        let req = build_probe(&t, &point, "'").unwrap();
        let curl = req.to_curl();
        assert!(curl.starts_with("curl -i -X GET 'http://x.test/search?q="));
        assert!(curl.contains("%27"));
    }

    #[tokio::test]
    async fn test_transport_failure_is_inconclusive() {
        let client = HttpClient::new(500, "test-agent", true).unwrap();
        let t = target("http://127.0.0.1:9/never");
        let point = InjectionPoint::new(PointKind::Query, "q");
        let (_, outcome) = client.send_with_injection(&t, &point, "'").await;
        assert!(outcome.response().is_none());
    }
}
