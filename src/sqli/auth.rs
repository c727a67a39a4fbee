// src/sqli/auth.rs
//! Optional pre-scan login producing a header/cookie overlay.

use crate::sqli::config::{AuthBodyType, AuthConfig, AuthSuccess};
use crate::sqli::http_client::{cookie_header, HttpClient, ProbeBody, ProbeOutcome, ProbeRequest, ProbeResponse};
use crate::sqli::types::HttpMethod;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Session state merged into every request of one invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthSession {
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    /// `Some(false)` when a verify URL was given and its criteria failed
    pub verified: Option<bool>,
}

impl AuthSession {
    /// Overlay this session onto caller-supplied headers and cookies.
    /// Session values win on conflicts.
    pub fn merge_into(
        &self,
        headers: &mut BTreeMap<String, String>,
        cookies: &mut BTreeMap<String, String>,
    ) {
        headers.extend(self.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        cookies.extend(self.cookies.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// Pull `name=value` pairs out of raw `Set-Cookie` header values
pub fn parse_set_cookies(values: &[String]) -> BTreeMap<String, String> {
    let mut jar = BTreeMap::new();
    for raw in values {
        let pair = raw.split(';').next().unwrap_or("");
        if let Some((name, value)) = pair.split_once('=') {
            let name = name.trim();
            if !name.is_empty() {
                jar.insert(name.to_string(), value.trim().to_string());
            }
        }
    }
    jar
}

fn login_request(auth: &AuthConfig) -> ProbeRequest {
    let mut headers = auth.headers.clone();
    let mut fields: Vec<(String, String)> = vec![
        (auth.username_field.clone(), auth.username.clone()),
        (auth.password_field.clone(), auth.password.clone()),
    ];
    fields.extend(
        auth.additional_fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );

    let body = if auth.method.carries_body() {
        match auth.body_type {
            AuthBodyType::FormUrlencoded => {
                headers.insert(
                    "Content-Type".to_string(),
                    "application/x-www-form-urlencoded".to_string(),
                );
                Some(ProbeBody::Form(fields))
            }
            AuthBodyType::Json => {
                headers.insert("Content-Type".to_string(), "application/json".to_string());
                let map: Map<String, Value> = fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect();
                Some(ProbeBody::Json(Value::Object(map)))
            }
        }
    } else {
        None
    };

    ProbeRequest {
        method: auth.method,
        url: auth.url.clone(),
        headers,
        body,
    }
}

fn criteria_met(success: &AuthSuccess, response: &ProbeResponse) -> bool {
    let status_ok = success.status.map_or(true, |s| response.status == s);
    let contains_ok = success
        .contains_text
        .as_deref()
        .map_or(true, |t| response.text.contains(t));
    let absent_ok = success
        .not_contains_text
        .as_deref()
        .map_or(true, |t| !response.text.contains(t));
    let redirect_ok = success.redirect_location_includes.as_deref().map_or(true, |t| {
        response
            .location
            .as_deref()
            .map_or(false, |loc| loc.contains(t))
    });
    status_ok && contains_ok && absent_ok && redirect_ok
}

/// Log in once and return the resulting session overlay.
///
/// Returns `None` when the login request cannot be delivered at all; the
/// caller then scans unauthenticated. Unmet verification criteria only
/// mark the session as unverified.
pub async fn perform_auth(auth: &AuthConfig, timeout_ms: u64, user_agent: &str) -> Option<AuthSession> {
    // redirects stay off so the login response's Set-Cookie is visible
    let client = match HttpClient::new(timeout_ms, user_agent, false) {
        Ok(c) => c,
        Err(e) => {
            warn!("auth client setup failed: {}", e);
            return None;
        }
    };

    let request = login_request(auth);
    let response = match client.send(&request).await {
        ProbeOutcome::Response(r) => r,
        ProbeOutcome::Failed { error, .. } => {
            warn!("login request to {} failed: {}", auth.url, error);
            return None;
        }
    };
    let cookies = parse_set_cookies(&response.set_cookies);
    info!(
        "login to {} returned {} ({} cookies)",
        auth.url,
        response.status,
        cookies.len()
    );

    let mut session = AuthSession {
        headers: auth.headers.clone(),
        cookies,
        verified: None,
    };

    if let Some(verify_url) = &auth.verify_url {
        let mut headers = auth.headers.clone();
        if let Some(cookie) = cookie_header(&session.cookies) {
            headers.insert("Cookie".to_string(), cookie);
        }
        let verify = ProbeRequest {
            method: HttpMethod::Get,
            url: verify_url.clone(),
            headers,
            body: None,
        };
        let ok = match client.send(&verify).await {
            ProbeOutcome::Response(r) => criteria_met(&auth.success.clone().unwrap_or_default(), &r),
            ProbeOutcome::Failed { error, .. } => {
                debug!("auth verification request failed: {}", error);
                false
            }
        };
        if !ok {
            warn!("auth verification against {} did not match; continuing with harvested cookies", verify_url);
        }
        session.verified = Some(ok);
    }

    Some(session)
}
