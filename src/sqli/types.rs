use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// HTTP methods the scanner issues or records
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Case-insensitive parse; anything unknown is `None`
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            _ => None,
        }
    }

    pub fn carries_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where in a request a payload is placed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PointKind {
    Query,
    Path,
    Form,
    Json,
    Header,
    Cookie,
}

impl PointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PointKind::Query => "query",
            PointKind::Path => "path",
            PointKind::Form => "form",
            PointKind::Json => "json",
            PointKind::Header => "header",
            PointKind::Cookie => "cookie",
        }
    }
}

impl fmt::Display for PointKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra locating data attached to a point
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PointMeta {
    /// Zero-based index among the non-empty path segments
    PathSegment { position: usize, segment: String },
    /// Key path from the JSON root; array elements use their index
    JsonPath { path: Vec<String>, numeric: bool },
    /// Owning form of a form field
    Form { action: String, method: HttpMethod },
}

/// A single named location where a payload replaces the baseline value.
///
/// Identity is `(kind, name, meta)`, which is exactly what the derived
/// `Eq`/`Hash` compare.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct InjectionPoint {
    pub kind: PointKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<PointMeta>,
}

impl InjectionPoint {
    pub fn new(kind: PointKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: PointMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn label(&self) -> String {
        format!("{}:{}", self.kind, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FormField {
    pub name: String,
    pub value: String,
}

/// An HTML form as discovered on a page
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormTarget {
    pub action: String,
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enctype: Option<String>,
    pub fields: Vec<FormField>,
}

/// Request template a point is probed against
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanTarget {
    pub url: String,
    pub method: Option<HttpMethod>,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    pub json_body: Option<serde_json::Value>,
    /// Forms found on the target page; form points resolve their siblings here
    pub forms: Vec<FormTarget>,
}

impl ScanTarget {
    pub fn method(&self) -> HttpMethod {
        self.method.unwrap_or(HttpMethod::Get)
    }

    pub fn form_for(&self, action: &str, method: HttpMethod) -> Option<&FormTarget> {
        self.forms
            .iter()
            .find(|f| f.action == action && f.method == method)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    Error,
    BooleanDifferential,
    Time,
    Union,
}

impl Technique {
    pub fn as_str(&self) -> &'static str {
        match self {
            Technique::Error => "error",
            Technique::BooleanDifferential => "boolean_differential",
            Technique::Time => "time",
            Technique::Union => "union",
        }
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend engine inferred from an error body
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DbFingerprint {
    Mysql,
    Postgres,
    Mssql,
    Oracle,
    Sqlite,
    Unknown,
}

impl DbFingerprint {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbFingerprint::Mysql => "mysql",
            DbFingerprint::Postgres => "postgres",
            DbFingerprint::Mssql => "mssql",
            DbFingerprint::Oracle => "oracle",
            DbFingerprint::Sqlite => "sqlite",
            DbFingerprint::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DbFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    /// `None` when the probe failed at the transport level
    pub status: Option<u16>,
    pub elapsed_ms: u64,
    pub body_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_location: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Reproduce {
    pub curl: Vec<String>,
}

/// Outcome of probing one point with one payload under one technique
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub point: InjectionPoint,
    pub payload: String,
    pub technique: Technique,
    pub vulnerable: bool,
    pub response_meta: ResponseMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub confirmations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reproduce: Option<Reproduce>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remediation: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScanResult {
    pub vulnerable: bool,
    pub details: Vec<Finding>,
}

impl ScanResult {
    pub fn from_details(details: Vec<Finding>) -> Self {
        Self {
            vulnerable: details.iter().any(|d| d.vulnerable),
            details,
        }
    }

    pub fn vulnerable_findings(&self) -> impl Iterator<Item = &Finding> {
        self.details.iter().filter(|d| d.vulnerable)
    }
}

/// Something the crawler found that the detection engine can be pointed at
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DiscoveredCandidate {
    UrlWithQuery {
        url: String,
    },
    Form(FormTarget),
    JsonEndpoint {
        url: String,
        method: HttpMethod,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<BTreeMap<String, String>>,
    },
}

impl DiscoveredCandidate {
    /// Structural dedup key: forms by method, action and sorted field
    /// names; everything else by method and url
    pub fn dedup_key(&self) -> String {
        match self {
            DiscoveredCandidate::UrlWithQuery { url } => format!("url-with-query:GET:{}", url),
            DiscoveredCandidate::Form(form) => {
                let mut names: Vec<&str> = form.fields.iter().map(|f| f.name.as_str()).collect();
                names.sort_unstable();
                format!("form:{}:{}:{}", form.method, form.action, names.join(","))
            }
            DiscoveredCandidate::JsonEndpoint { url, method, .. } => {
                format!("json-endpoint:{}:{}", method, url)
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SmartScanResult {
    pub crawled_pages: usize,
    pub candidates: Vec<DiscoveredCandidate>,
    pub sqli: Vec<ScanResult>,
}

impl SmartScanResult {
    pub fn vulnerable(&self) -> bool {
        self.sqli.iter().any(|r| r.vulnerable)
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanPhase {
    Discover,
    Scan,
    Done,
}

/// Progress of one detection engine invocation
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    pub phase: ScanPhase,
    pub points: Option<usize>,
    pub planned_checks: Option<usize>,
    pub processed_checks: Option<usize>,
    pub eta_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SmartPhase {
    Crawl,
    Scan,
    Done,
}

/// Progress of a crawl-and-scan invocation
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SmartScanProgress {
    pub phase: Option<SmartPhase>,
    pub crawled_pages: Option<usize>,
    pub max_pages: Option<usize>,
    pub candidates_found: Option<usize>,
    pub scan_processed: Option<usize>,
    pub scan_total: Option<usize>,
    pub eta_ms: Option<u64>,
}
