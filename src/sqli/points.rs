// src/sqli/points.rs
//! Injection point discovery, plus the link/form extraction shared with
//! the crawler.

use crate::sqli::http_client::HttpClient;
use crate::sqli::types::{FormField, FormTarget, HttpMethod, InjectionPoint, PointKind, PointMeta};
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;
use url::Url;

/// Links and forms found on one HTML page
#[derive(Debug, Default, Clone)]
pub struct PageExtract {
    pub links: Vec<String>,
    pub forms: Vec<FormTarget>,
}

/// Extract absolute http(s) links and forms with at least one named field.
/// Broken markup yields whatever the parser could recover.
pub fn extract_links_and_forms(page_url: &str, html: &str) -> PageExtract {
    let Ok(base) = Url::parse(page_url) else {
        return PageExtract::default();
    };
    let document = Html::parse_document(html);
    PageExtract {
        links: extract_links(&document, &base),
        forms: extract_forms(&document, &base),
    }
}

fn extract_links(document: &Html, base: &Url) -> Vec<String> {
    let Ok(link_selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let mut links = Vec::new();
    for element in document.select(&link_selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        if let Ok(mut url) = base.join(href) {
            if matches!(url.scheme(), "http" | "https") {
                url.set_fragment(None);
                links.push(url.to_string());
            }
        }
    }
    links
}

fn extract_forms(document: &Html, base: &Url) -> Vec<FormTarget> {
    let (Ok(form_selector), Ok(input_selector)) = (
        Selector::parse("form"),
        Selector::parse("input[name], select[name], textarea[name]"),
    ) else {
        return Vec::new();
    };

    let mut forms = Vec::new();
    for form in document.select(&form_selector) {
        let action = form.value().attr("action").map(str::trim).unwrap_or("");
        let method = form
            .value()
            .attr("method")
            .and_then(HttpMethod::parse)
            .unwrap_or(HttpMethod::Get);
        let enctype = form.value().attr("enctype").map(str::to_string);

        let fields: Vec<FormField> = form
            .select(&input_selector)
            .filter_map(|input| {
                let name = input.value().attr("name")?.to_string();
                let value = input
                    .value()
                    .attr("value")
                    .map(str::to_string)
                    .unwrap_or_else(|| input.text().collect::<String>().trim().to_string());
                Some(FormField { name, value })
            })
            .collect();
        if fields.is_empty() {
            continue;
        }

        let action_url = if action.is_empty() {
            Ok(base.clone())
        } else {
            base.join(action)
        };
        match action_url {
            Ok(url) => forms.push(FormTarget {
                action: url.to_string(),
                method,
                enctype,
                fields,
            }),
            Err(e) => debug!("skipping form with bad action {:?}: {}", action, e),
        }
    }
    forms
}

pub fn discover_query_points(url: &Url) -> Vec<InjectionPoint> {
    url.query_pairs()
        .map(|(name, _)| InjectionPoint::new(PointKind::Query, name.into_owned()))
        .collect()
}

pub fn discover_path_points(url: &Url) -> Vec<InjectionPoint> {
    url.path()
        .split('/')
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(position, segment)| {
            InjectionPoint::new(PointKind::Path, format!("segment_{}", position)).with_meta(
                PointMeta::PathSegment {
                    position,
                    segment: segment.to_string(),
                },
            )
        })
        .collect()
}

/// One point per string or number leaf, named by its dot-joined key path.
/// Arrays and nested objects are walked.
pub fn discover_json_points(body: Option<&Value>) -> Vec<InjectionPoint> {
    fn walk(value: &Value, path: &mut Vec<String>, out: &mut Vec<InjectionPoint>) {
        let children: Vec<(String, &Value)> = match value {
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
            Value::Array(items) => items.iter().enumerate().map(|(i, v)| (i.to_string(), v)).collect(),
            _ => return,
        };
        for (key, child) in children {
            path.push(key);
            match child {
                Value::String(_) | Value::Number(_) => out.push(
                    InjectionPoint::new(PointKind::Json, path.join(".")).with_meta(PointMeta::JsonPath {
                        path: path.clone(),
                        numeric: child.is_number(),
                    }),
                ),
                Value::Object(_) | Value::Array(_) => walk(child, path, out),
                _ => {}
            }
            path.pop();
        }
    }

    let mut points = Vec::new();
    if let Some(body @ (Value::Object(_) | Value::Array(_))) = body {
        walk(body, &mut Vec::new(), &mut points);
    }
    points
}

pub fn discover_header_points(headers: &BTreeMap<String, String>) -> Vec<InjectionPoint> {
    headers
        .keys()
        .map(|name| InjectionPoint::new(PointKind::Header, name.clone()))
        .collect()
}

pub fn discover_cookie_points(cookies: &BTreeMap<String, String>) -> Vec<InjectionPoint> {
    cookies
        .keys()
        .map(|name| InjectionPoint::new(PointKind::Cookie, name.clone()))
        .collect()
}

pub fn form_points(forms: &[FormTarget]) -> Vec<InjectionPoint> {
    forms
        .iter()
        .flat_map(|form| {
            form.fields.iter().map(move |field| {
                InjectionPoint::new(PointKind::Form, field.name.clone()).with_meta(PointMeta::Form {
                    action: form.action.clone(),
                    method: form.method,
                })
            })
        })
        .collect()
}

/// Fetch the page once and turn its forms into points. Unreachable or
/// non-HTML pages give empty lists.
pub async fn fetch_and_discover_forms(
    client: &HttpClient,
    url: &str,
    headers: &BTreeMap<String, String>,
) -> (Vec<InjectionPoint>, Vec<FormTarget>) {
    match client.fetch_html(url, headers).await {
        Some(html) => {
            let forms = extract_links_and_forms(url, &html).forms;
            (form_points(&forms), forms)
        }
        None => (Vec::new(), Vec::new()),
    }
}

/// Drop repeated `(kind, name, meta)` identities, keeping first occurrence
pub fn dedup_points(points: Vec<InjectionPoint>) -> Vec<InjectionPoint> {
    let mut seen = HashSet::new();
    points
        .into_iter()
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_param_extraction() {
        let url = Url::parse("https://example.com/page?id=1&name=test").unwrap();
        let points = discover_query_points(&url);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].name, "id");
        assert_eq!(points[1].name, "name");
    }

    #[test]
    fn test_path_points_carry_position() {
        let url = Url::parse("https://example.com/api/users/42/").unwrap();
        let points = discover_path_points(&url);
        assert_eq!(points.len(), 3);
        assert_eq!(points[2].name, "segment_2");
        assert_eq!(
            points[2].meta,
            Some(PointMeta::PathSegment {
                position: 2,
                segment: "42".to_string()
            })
        );
    }

    #[test]
    fn test_json_points_walk_nested_values() {
        let body = json!({
            "user": {"name": "bob", "age": 30, "admin": false},
            "tags": ["a", {"k": "v"}],
            "note": null
        });
        let mut names: Vec<String> = discover_json_points(Some(&body))
            .into_iter()
            .map(|p| p.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["tags.0", "tags.1.k", "user.age", "user.name"]);
        assert!(discover_json_points(Some(&json!("scalar"))).is_empty());
        assert!(discover_json_points(None).is_empty());
    }

    #[test]
    fn test_extract_links_and_forms() {
        let html = r##"
            <html><body>
                <a href="/search?q=test">search</a>
                <a href="#top">top</a>
                <a href="mailto:a@b.c">mail</a>
                <a href="https://other.test/x#frag">other</a>
                <form action="/login" method="post">
                    <input type="text" name="user" value="guest">
                    <input type="password" name="pass">
                    <textarea name="note">hello</textarea>
                    <input type="submit">
                </form>
                <form action="/empty"><input type="submit"></form>
            </body></html>
        "##;
        let page = extract_links_and_forms("http://site.test/index.html", html);
        assert_eq!(
            page.links,
            vec!["http://site.test/search?q=test", "https://other.test/x"]
        );
        assert_eq!(page.forms.len(), 1);
        let form = &page.forms[0];
        assert_eq!(form.action, "http://site.test/login");
        assert_eq!(form.method, HttpMethod::Post);
        let fields: Vec<(&str, &str)> = form
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.value.as_str()))
            .collect();
        assert_eq!(fields, vec![("user", "guest"), ("pass", ""), ("note", "hello")]);
    }

    #[test]
    fn test_form_points_tagged_with_owner() {
        let html = r#"<form action="/find"><input name="term"><select name="cat"></select></form>"#;
        let page = extract_links_and_forms("http://site.test/", html);
        let points = form_points(&page.forms);
        assert_eq!(points.len(), 2);
        assert_eq!(
            points[0].meta,
            Some(PointMeta::Form {
                action: "http://site.test/find".to_string(),
                method: HttpMethod::Get
            })
        );
    }

    #[test]
    fn test_dedup_points_by_identity() {
        let a = InjectionPoint::new(PointKind::Query, "q");
        let b = InjectionPoint::new(PointKind::Cookie, "q");
        let points = dedup_points(vec![a.clone(), b.clone(), a.clone()]);
        assert_eq!(points, vec![a, b]);
    }

    #[test]
    fn test_header_and_cookie_points() {
        let mut headers = BTreeMap::new();
        headers.insert("X-Token".to_string(), "t".to_string());
        let mut cookies = BTreeMap::new();
        cookies.insert("sid".to_string(), "1".to_string());
        assert_eq!(discover_header_points(&headers)[0].kind, PointKind::Header);
        assert_eq!(discover_cookie_points(&cookies)[0].name, "sid");
    }
}
