// src/lib.rs
pub mod sqli;

pub use sqli::report::{self, ReportFormat};
pub use sqli::{run_scan, smart_scan, ScanConfig, ScanError, ScanResult, SmartScanConfig, SmartScanResult};
