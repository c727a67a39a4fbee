// src/sqli/config.rs
use crate::sqli::error::ScanError;
use crate::sqli::payloads::{self, BooleanPair, OrderByPayload, TimePayload, UnionPayload};
use crate::sqli::types::{FormTarget, HttpMethod, ScanProgress, SmartScanProgress};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Progress callback shared between workers
pub struct ProgressFn<P>(pub Arc<dyn Fn(P) + Send + Sync>);

impl<P> Clone for ProgressFn<P> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<P> ProgressFn<P> {
    pub fn new(f: impl Fn(P) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn emit(&self, progress: P) {
        (self.0)(progress)
    }
}

impl<P> fmt::Debug for ProgressFn<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("ProgressFn(..)")
    }
}

/// Which injection points and techniques a scan uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnableFlags {
    pub query: bool,
    pub path: bool,
    pub form: bool,
    /// `None` means "enabled when a JSON body was supplied"
    pub json: Option<bool>,
    pub header: bool,
    pub cookie: bool,
    pub error: bool,
    pub boolean: bool,
    pub time: bool,
    pub union: bool,
}

impl Default for EnableFlags {
    fn default() -> Self {
        Self {
            query: true,
            path: true,
            form: true,
            json: None,
            // mutating auth-critical headers/cookies is opt-in
            header: false,
            cookie: false,
            error: true,
            boolean: true,
            time: true,
            // union column search is traffic heavy
            union: false,
        }
    }
}

impl EnableFlags {
    pub fn json_enabled(&self, has_body: bool) -> bool {
        self.json.unwrap_or(has_body)
    }

    pub fn with_techniques(mut self, techniques: TechniqueFlags) -> Self {
        self.error = techniques.error;
        self.boolean = techniques.boolean;
        self.time = techniques.time;
        self
    }
}

/// Technique switches exposed by the crawl-and-scan entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TechniqueFlags {
    pub error: bool,
    pub boolean: bool,
    pub time: bool,
}

impl Default for TechniqueFlags {
    fn default() -> Self {
        Self {
            error: true,
            boolean: true,
            time: true,
        }
    }
}

/// Payload overrides; unset lists fall back to the built-in catalogues.
/// Loadable from YAML so authorized testers can supply their own sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PayloadConfig {
    pub error: Option<Vec<String>>,
    pub boolean: Option<Vec<BooleanPair>>,
    pub time: Option<Vec<TimePayload>>,
    pub union: Option<Vec<UnionPayload>>,
    pub order_by: Option<Vec<OrderByPayload>>,
}

impl PayloadConfig {
    pub fn error(&self) -> Vec<String> {
        self.error.clone().unwrap_or_else(payloads::error_payloads)
    }

    pub fn boolean(&self) -> Vec<BooleanPair> {
        self.boolean.clone().unwrap_or_else(payloads::boolean_pairs)
    }

    pub fn time(&self) -> Vec<TimePayload> {
        self.time.clone().unwrap_or_else(payloads::time_payloads)
    }

    pub fn union(&self) -> Vec<UnionPayload> {
        self.union.clone().unwrap_or_else(payloads::union_payloads)
    }

    pub fn order_by(&self) -> Vec<OrderByPayload> {
        self.order_by.clone().unwrap_or_else(payloads::order_by_payloads)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthBodyType {
    FormUrlencoded,
    Json,
}

/// What a verification response must look like for the login to count
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthSuccess {
    pub status: Option<u16>,
    pub contains_text: Option<String>,
    pub not_contains_text: Option<String>,
    pub redirect_location_includes: Option<String>,
}

/// Optional pre-scan login
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    pub url: String,
    pub method: HttpMethod,
    #[serde(rename = "type")]
    pub body_type: AuthBodyType,
    pub username_field: String,
    pub password_field: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub additional_fields: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub verify_url: Option<String>,
    #[serde(default)]
    pub success: Option<AuthSuccess>,
}

/// Detection engine input for one target
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub target: String,
    pub method: Option<HttpMethod>,
    pub json_body: Option<serde_json::Value>,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    /// Forms already known to the caller; when empty the target page is
    /// fetched once to discover them
    pub forms: Vec<FormTarget>,
    pub auth: Option<AuthConfig>,
    pub time_threshold_ms: u64,
    pub request_timeout_ms: u64,
    pub parallel: usize,
    pub max_requests: usize,
    pub enable: EnableFlags,
    pub payloads: PayloadConfig,
    /// Inclusive range of the randomized pause between requests to one point
    pub jitter_ms: (u64, u64),
    pub user_agent: String,
    pub on_progress: Option<ProgressFn<ScanProgress>>,
}

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            method: None,
            json_body: None,
            headers: BTreeMap::new(),
            cookies: BTreeMap::new(),
            forms: Vec::new(),
            auth: None,
            time_threshold_ms: 2500,
            request_timeout_ms: 10_000,
            parallel: 4,
            max_requests: 500,
            enable: EnableFlags::default(),
            payloads: PayloadConfig::default(),
            jitter_ms: (100, 400),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            on_progress: None,
        }
    }
}

impl ScanConfig {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        let url = url::Url::parse(&self.target)
            .map_err(|e| ScanError::Config(format!("Invalid target URL: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ScanError::Config(format!(
                "Unsupported URL scheme: {}",
                url.scheme()
            )));
        }
        if self.parallel == 0 {
            return Err(ScanError::Config("parallel must be at least 1".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ScanError::Config(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        if self.jitter_ms.0 > self.jitter_ms.1 {
            return Err(ScanError::Config("jitter range is inverted".to_string()));
        }
        Ok(())
    }

    pub fn load_payloads_from_file(path: &Path) -> Result<PayloadConfig, ScanError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

/// Crawl-and-scan input
#[derive(Debug, Clone)]
pub struct SmartScanConfig {
    pub base_url: String,
    pub max_depth: usize,
    pub max_pages: usize,
    pub same_origin_only: bool,
    pub request_timeout_ms: u64,
    pub use_browser: bool,
    pub browser_max_pages: Option<usize>,
    pub browser_headless: bool,
    /// Wait after navigation for client-side requests to fire
    pub browser_wait_ms: u64,
    pub crawl_concurrency: usize,
    pub scan_parallel: usize,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    pub auth: Option<AuthConfig>,
    pub techniques: TechniqueFlags,
    /// Settings forwarded to each per-candidate detection run
    pub time_threshold_ms: u64,
    pub parallel: usize,
    pub max_requests: usize,
    pub payloads: PayloadConfig,
    pub jitter_ms: (u64, u64),
    pub user_agent: String,
    pub on_progress: Option<ProgressFn<SmartScanProgress>>,
}

impl Default for SmartScanConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            max_depth: 2,
            max_pages: 50,
            same_origin_only: true,
            request_timeout_ms: 10_000,
            use_browser: true,
            browser_max_pages: None,
            browser_headless: true,
            browser_wait_ms: 1000,
            crawl_concurrency: 4,
            scan_parallel: 2,
            headers: BTreeMap::new(),
            cookies: BTreeMap::new(),
            auth: None,
            techniques: TechniqueFlags::default(),
            time_threshold_ms: 2500,
            parallel: 4,
            max_requests: 500,
            payloads: PayloadConfig::default(),
            jitter_ms: (100, 400),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            on_progress: None,
        }
    }
}

impl SmartScanConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        url::Url::parse(&self.base_url)
            .map_err(|e| ScanError::Config(format!("Invalid base URL: {}", e)))?;
        if self.crawl_concurrency == 0 || self.scan_parallel == 0 || self.parallel == 0 {
            return Err(ScanError::Config(
                "concurrency settings must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Detection engine settings for one candidate, before the
    /// candidate-specific target and enable flags are applied
    pub fn scan_template(&self) -> ScanConfig {
        ScanConfig {
            target: self.base_url.clone(),
            headers: self.headers.clone(),
            cookies: self.cookies.clone(),
            time_threshold_ms: self.time_threshold_ms,
            request_timeout_ms: self.request_timeout_ms,
            parallel: self.parallel,
            max_requests: self.max_requests,
            payloads: self.payloads.clone(),
            jitter_ms: self.jitter_ms,
            user_agent: self.user_agent.clone(),
            ..ScanConfig::default()
        }
    }
}
