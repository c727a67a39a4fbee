// src/sqli/report.rs
//! Report export: JSON, Markdown, CSV and JUnit renderings of a
//! `ScanResult`, plus the remediation text attached to findings.

use crate::sqli::types::{Finding, ScanResult, SmartScanResult, Technique};
use chrono::Utc;
use serde::Serialize;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    Json,
    #[value(alias = "markdown")]
    Md,
    Csv,
    Junit,
}

/// Fix advice for a confirmed finding of `technique`
pub fn remediation_for(technique: Technique) -> Vec<String> {
    let mut advice = vec![
        "Use parameterized queries or prepared statements for every database call".to_string(),
        "Validate input against an allowlist of expected types and formats".to_string(),
    ];
    match technique {
        Technique::Error => {
            advice.push("Do not return database error messages to clients; log them server-side".to_string())
        }
        Technique::BooleanDifferential => advice.push(
            "Make sure query results cannot be steered by user-controlled boolean conditions".to_string(),
        ),
        Technique::Time => advice.push(
            "Enforce statement timeouts and restrict access to delay functions (SLEEP, pg_sleep, WAITFOR)"
                .to_string(),
        ),
        Technique::Union => advice.push(
            "Run the application with a least-privilege database account limited to required tables".to_string(),
        ),
    }
    advice
}

/// Flatten per-candidate results into one result
pub fn merge_results(results: &[ScanResult]) -> ScanResult {
    ScanResult::from_details(results.iter().flat_map(|r| r.details.iter().cloned()).collect())
}

pub fn render(format: ReportFormat, result: &ScanResult) -> Result<String, serde_json::Error> {
    Ok(match format {
        ReportFormat::Json => to_json(result)?,
        ReportFormat::Md => to_markdown(result),
        ReportFormat::Csv => to_csv(result),
        ReportFormat::Junit => to_junit(result),
    })
}

pub fn to_json(result: &ScanResult) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(result)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary<'a> {
    crawled_pages: usize,
    candidates: usize,
    vulns: usize,
    details: Vec<&'a Finding>,
}

/// Short JSON overview of a crawl-and-scan run: counts plus the first 20
/// vulnerable findings
pub fn summary_json(result: &SmartScanResult) -> Result<String, serde_json::Error> {
    let vulns: Vec<&Finding> = result
        .sqli
        .iter()
        .flat_map(|r| r.vulnerable_findings())
        .collect();
    serde_json::to_string_pretty(&Summary {
        crawled_pages: result.crawled_pages,
        candidates: result.candidates.len(),
        vulns: vulns.len(),
        details: vulns.into_iter().take(20).collect(),
    })
}

pub fn to_markdown(result: &ScanResult) -> String {
    let mut lines = vec![
        "# SQLi Scan Report".to_string(),
        String::new(),
        format!("Generated: {}", Utc::now().to_rfc3339()),
        String::new(),
        format!("Status: {}", if result.vulnerable { "VULNERABLE" } else { "OK" }),
        String::new(),
    ];

    let vulns: Vec<&Finding> = result.vulnerable_findings().collect();
    if vulns.is_empty() {
        lines.push("No confirmed findings.".to_string());
        return lines.join("\n");
    }

    lines.push(format!("Findings: {}", vulns.len()));
    lines.push(String::new());
    for (i, d) in vulns.iter().enumerate() {
        lines.push(format!(
            "## {}. {} @ {}:{}",
            i + 1,
            d.technique,
            d.point.kind,
            d.point.name
        ));
        if !d.confirmations.is_empty() {
            lines.push(format!("- confirmations: {}", d.confirmations.join(", ")));
        }
        if let Some(status) = d.response_meta.status {
            lines.push(format!("- status: {}", status));
        }
        lines.push(format!("- elapsedMs: {}", d.response_meta.elapsed_ms));
        lines.push(format!("- len: {}", d.response_meta.body_length));
        if let Some(evidence) = &d.evidence {
            lines.push(format!("- evidence: {}", evidence));
        }
        if let Some(reproduce) = d.reproduce.as_ref().filter(|r| !r.curl.is_empty()) {
            lines.push("- reproduce:".to_string());
            lines.extend(reproduce.curl.iter().map(|c| format!("  - curl: {}", c)));
        }
        if !d.remediation.is_empty() {
            lines.push("- remediation:".to_string());
            lines.extend(d.remediation.iter().map(|r| format!("  - {}", r)));
        }
        lines.push(String::new());
    }
    lines.join("\n")
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn to_csv(result: &ScanResult) -> String {
    let mut rows = vec![
        "technique,point_kind,point_name,vulnerable,status,elapsedMs,len,confirmations,reproduce_curl,remediation"
            .to_string(),
    ];
    for d in &result.details {
        let values = [
            d.technique.to_string(),
            d.point.kind.to_string(),
            d.point.name.clone(),
            d.vulnerable.to_string(),
            d.response_meta.status.map(|s| s.to_string()).unwrap_or_default(),
            d.response_meta.elapsed_ms.to_string(),
            d.response_meta.body_length.to_string(),
            d.confirmations.join("; "),
            d.reproduce
                .as_ref()
                .map(|r| r.curl.join(" | "))
                .unwrap_or_default(),
            d.remediation.join(" | "),
        ];
        rows.push(
            values
                .iter()
                .map(|v| csv_escape(v))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    rows.join("\n")
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

pub fn to_junit(result: &ScanResult) -> String {
    let failures = result.vulnerable_findings().count();
    let tests = result.details.len().max(1);
    let total_ms: u64 = result.details.iter().map(|d| d.response_meta.elapsed_ms).sum();

    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        xml,
        "<testsuite name=\"sql-scanner\" tests=\"{}\" failures=\"{}\" time=\"{:.3}\" timestamp=\"{}\">",
        tests,
        failures,
        total_ms as f64 / 1000.0,
        Utc::now().format("%Y-%m-%dT%H:%M:%S")
    );

    if result.details.is_empty() {
        xml.push_str("  <testcase classname=\"scan\" name=\"no_targets\"/>\n");
    }
    for d in &result.details {
        let name = format!("{} {}:{}", d.technique, d.point.kind, d.point.name);
        let class = format!("scan.{}", d.point.kind);
        let _ = write!(
            xml,
            "  <testcase classname=\"{}\" name=\"{}\" time=\"{:.3}\">",
            xml_escape(&class),
            xml_escape(&name),
            d.response_meta.elapsed_ms as f64 / 1000.0
        );
        if d.vulnerable {
            let message = if d.confirmations.is_empty() {
                "vulnerability".to_string()
            } else {
                d.confirmations.join(", ")
            };
            let curl = d
                .reproduce
                .as_ref()
                .map(|r| r.curl.join("\n"))
                .unwrap_or_default();
            let fix = d.remediation.join("\n");
            let body = [
                d.evidence.clone().unwrap_or_default(),
                if curl.is_empty() { String::new() } else { format!("curl:\n{}", curl) },
                if fix.is_empty() { String::new() } else { format!("fix:\n{}", fix) },
            ]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
            let _ = write!(
                xml,
                "\n    <failure message=\"{}\">{}</failure>\n  ",
                xml_escape(&message),
                xml_escape(&body)
            );
        }
        xml.push_str("</testcase>\n");
    }
    xml.push_str("</testsuite>");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqli::types::{InjectionPoint, PointKind, Reproduce, ResponseMeta};

    fn finding(technique: Technique, vulnerable: bool) -> Finding {
        Finding {
            point: InjectionPoint::new(PointKind::Query, "q"),
            payload: "'".to_string(),
            technique,
            vulnerable,
            response_meta: ResponseMeta {
                status: Some(500),
                elapsed_ms: 1500,
                body_length: 42,
                redirect_location: None,
            },
            evidence: vulnerable.then(|| "You have an error in your SQL syntax <near '>".to_string()),
            confirmations: if vulnerable {
                vec!["error_signature".to_string(), "db_fingerprint=mysql".to_string()]
            } else {
                Vec::new()
            },
            reproduce: vulnerable.then(|| Reproduce {
                curl: vec!["curl -i -X GET 'http://x.test/?q=%27'".to_string()],
            }),
            remediation: if vulnerable { remediation_for(technique) } else { Vec::new() },
        }
    }

    fn result() -> ScanResult {
        ScanResult::from_details(vec![
            finding(Technique::Error, false),
            finding(Technique::Error, true),
        ])
    }

    #[test]
    fn test_markdown_lists_vulnerable_findings() {
        let md = to_markdown(&result());
        assert!(md.starts_with("# SQLi Scan Report"));
        assert!(md.contains("Status: VULNERABLE"));
        assert!(md.contains("## 1. error @ query:q"));
        assert!(md.contains("- confirmations: error_signature, db_fingerprint=mysql"));
        assert!(md.contains("  - curl: curl -i -X GET"));
        assert!(!md.contains("## 2."));

        let clean = to_markdown(&ScanResult::default());
        assert!(clean.contains("Status: OK"));
        assert!(clean.contains("No confirmed findings."));
    }

    #[test]
    fn test_csv_rows_and_quoting() {
        let csv = to_csv(&result());
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines[0],
            "technique,point_kind,point_name,vulnerable,status,elapsedMs,len,confirmations,reproduce_curl,remediation"
        );
        assert_eq!(lines[1], "error,query,q,false,500,1500,42,,,");
        assert!(lines[2].starts_with("error,query,q,true,500,1500,42,error_signature; db_fingerprint=mysql,"));
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_escape("plain"), "plain");
    }

    #[test]
    fn test_junit_counts_and_escaping() {
        let xml = to_junit(&result());
        assert!(xml.contains("tests=\"2\" failures=\"1\" time=\"3.000\""));
        assert!(xml.contains("classname=\"scan.query\" name=\"error query:q\""));
        assert!(xml.contains("&lt;near &apos;&gt;"));
        assert!(xml.contains("<failure message=\"error_signature, db_fingerprint=mysql\">"));

        let empty = to_junit(&ScanResult::default());
        assert!(empty.contains("tests=\"1\" failures=\"0\""));
        assert!(empty.contains("name=\"no_targets\""));
    }

    #[test]
    fn test_merge_results() {
        let clean = ScanResult::from_details(vec![finding(Technique::Time, false)]);
        let merged = merge_results(&[clean.clone(), result()]);
        assert!(merged.vulnerable);
        assert_eq!(merged.details.len(), 3);
        assert!(!merge_results(&[clean]).vulnerable);
        assert!(!merge_results(&[]).vulnerable);
    }

    #[test]
    fn test_json_roundtrips_finding_fields() {
        let json = to_json(&result()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["vulnerable"], true);
        assert_eq!(value["details"][1]["technique"], "error");
        assert_eq!(value["details"][1]["responseMeta"]["elapsedMs"], 1500);
        assert!(value["details"][0].get("reproduce").is_none());
    }

    #[test]
    fn test_remediation_is_technique_specific() {
        assert!(remediation_for(Technique::Time).iter().any(|r| r.contains("pg_sleep")));
        assert!(remediation_for(Technique::Error).iter().any(|r| r.contains("error messages")));
    }
}
