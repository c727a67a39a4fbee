// src/sqli/error.rs
//! Error types for the SQL injection scanner module
//!
//! Only fundamentally invalid input surfaces as a `ScanError`. Transport
//! failures during probing, broken HTML, failed logins and a missing browser
//! all degrade in place and never reach the caller through this type.

use std::fmt;

/// Main error type for SQL injection scanner operations
#[derive(Debug)]
pub enum ScanError {
    /// HTTP client construction or request error
    Http(String),

    /// URL or data parsing error
    Parse(String),

    /// Configuration validation error
    Config(String),

    /// Headless browser launch or navigation error
    Browser(String),

    /// I/O error (payload files, report output)
    Io(std::io::Error),
}

impl std::error::Error for ScanError {}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ScanError::Http(s) => write!(f, "HTTP error: {}", s),
            ScanError::Parse(s) => write!(f, "Parse error: {}", s),
            ScanError::Config(s) => write!(f, "Configuration error: {}", s),
            ScanError::Browser(s) => write!(f, "Browser error: {}", s),
            ScanError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl From<std::io::Error> for ScanError {
    fn from(e: std::io::Error) -> Self {
        ScanError::Io(e)
    }
}

impl From<reqwest::Error> for ScanError {
    fn from(e: reqwest::Error) -> Self {
        ScanError::Http(e.to_string())
    }
}

impl From<url::ParseError> for ScanError {
    fn from(e: url::ParseError) -> Self {
        ScanError::Parse(e.to_string())
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(e: serde_json::Error) -> Self {
        ScanError::Parse(format!("JSON parse error: {}", e))
    }
}

impl From<serde_yaml::Error> for ScanError {
    fn from(e: serde_yaml::Error) -> Self {
        ScanError::Parse(format!("YAML parse error: {}", e))
    }
}
