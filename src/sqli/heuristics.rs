// src/sqli/heuristics.rs
//! Response comparison: text extraction, SQL error signatures, engine
//! fingerprinting and a cheap similarity signal.

use crate::sqli::types::DbFingerprint;
use regex::{Regex, RegexSet};
use std::sync::OnceLock;

/// True/false responses must be at most this similar to each other
pub const BOOLEAN_DIVERGENCE: f64 = 0.6;
/// ...while their similarity to the baseline differs by more than this
pub const BASELINE_SPREAD: f64 = 0.25;
/// Relative length delta accepted as a signal for JSON responses
pub const JSON_LENGTH_DELTA: f64 = 0.15;
/// `ORDER BY n` vs `ORDER BY n+10` counts as changed below this similarity
pub const ORDER_BY_DIVERGENCE: f64 = 0.995;

const ERROR_SIGNATURES: &[&str] = &[
    // MySQL
    r"(?i)mysql.*error",
    r"(?i)warning.*mysql",
    r"(?i)valid MySQL result",
    r"(?i)You have an error in your SQL syntax",
    // PostgreSQL
    r"(?i)PostgreSQL.*ERROR",
    r"(?i)Warning.*pg_",
    r"(?i)valid PostgreSQL result",
    r"(?i)unterminated quoted string at or near",
    // Oracle
    r"(?i)Oracle error",
    r"(?i)Oracle.*Driver",
    r"(?i)quoted string not properly terminated",
    r"\bORA-\d{5}",
    // SQL Server / ODBC
    r"(?i)SQLServer JDBC Driver",
    r"(?i)SqlException",
    r"(?i)OLE DB.*error",
    r"(?i)Unclosed quotation mark",
    r"(?i)Microsoft.*ODBC.*Driver",
    // Generic
    r"(?i)SQL syntax.*error",
    // SQLite
    r"(?i)SQLITE_ERROR",
    r"(?i)SQLite error",
    r"(?i)SQLite3::SQLException",
    r#"(?i)near ".*": syntax error"#,
    r"(?i)no such table",
    r"(?i)no such column",
];

/// Engine-distinguishing substrings, checked in order (lowercase)
const FINGERPRINTS: &[(&str, DbFingerprint)] = &[
    ("you have an error in your sql syntax", DbFingerprint::Mysql),
    ("mysql", DbFingerprint::Mysql),
    ("mariadb", DbFingerprint::Mysql),
    ("postgresql", DbFingerprint::Postgres),
    ("pg_", DbFingerprint::Postgres),
    ("unterminated quoted string at or near", DbFingerprint::Postgres),
    ("unclosed quotation mark", DbFingerprint::Mssql),
    ("sql server", DbFingerprint::Mssql),
    ("sqlserver", DbFingerprint::Mssql),
    ("odbc", DbFingerprint::Mssql),
    ("ole db", DbFingerprint::Mssql),
    ("quoted string not properly terminated", DbFingerprint::Oracle),
    ("ora-", DbFingerprint::Oracle),
    ("oracle", DbFingerprint::Oracle),
    ("sqlite", DbFingerprint::Sqlite),
    ("no such table", DbFingerprint::Sqlite),
    ("no such column", DbFingerprint::Sqlite),
];

fn error_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| RegexSet::new(ERROR_SIGNATURES).unwrap_or_else(|_| RegexSet::empty()))
}

fn title_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>([^<]*)</title>").ok())
        .as_ref()
}

pub struct Heuristics;

impl Heuristics {
    /// Turn a raw body into comparable text. Text passes through; a body
    /// that parses as JSON is re-serialized canonically so key order and
    /// whitespace do not count as differences.
    pub fn body_to_text(body: &[u8], content_type: Option<&str>) -> String {
        let is_json = content_type
            .map(|ct| ct.to_ascii_lowercase().contains("json"))
            .unwrap_or(false);
        if is_json {
            if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
                return match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
            }
        }
        String::from_utf8_lossy(body).into_owned()
    }

    pub fn extract_title(html: &str) -> String {
        title_regex()
            .and_then(|re| re.captures(html))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default()
    }

    pub fn has_sql_error(text: &str) -> bool {
        error_set().is_match(text)
    }

    pub fn detect_db_fingerprint(text: &str) -> DbFingerprint {
        let lower = text.to_lowercase();
        FINGERPRINTS
            .iter()
            .find(|(needle, _)| lower.contains(needle))
            .map(|(_, db)| *db)
            .unwrap_or(DbFingerprint::Unknown)
    }

    /// Positional character-match ratio: characters of the shorter string
    /// that match the longer one at the same index, over the longer length.
    ///
    /// This is an approximation of edit distance, chosen for speed. It is
    /// only ever compared against loose bands (0.6 .. 0.995), never used for
    /// exact matching.
    pub fn similarity_signal(a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        let (a, b) = (a.as_bytes(), b.as_bytes());
        let (shorter, longer) = if a.len() < b.len() { (a, b) } else { (b, a) };
        let matches = shorter
            .iter()
            .zip(longer.iter())
            .filter(|(x, y)| x == y)
            .count();
        matches as f64 / longer.len() as f64
    }

    /// `|len(a) - len(b)| / max(1, reference)`
    pub fn length_delta(a: &str, b: &str, reference: usize) -> f64 {
        (a.len() as f64 - b.len() as f64).abs() / reference.max(1) as f64
    }

    pub fn clip(text: &str, max_chars: usize) -> String {
        if text.chars().count() <= max_chars {
            text.to_string()
        } else {
            let mut out: String = text.chars().take(max_chars).collect();
            out.push_str("...");
            out
        }
    }
}
