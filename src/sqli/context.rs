// src/sqli/context.rs
//! Shared state of one detection run: the append-only finding list and the
//! progress counters. Handed to every point worker behind an `Arc`.

use crate::sqli::config::ProgressFn;
use crate::sqli::types::{Finding, ScanPhase, ScanProgress};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;

pub struct ScanContext {
    findings: Mutex<Vec<Finding>>,
    processed: AtomicUsize,
    planned: usize,
    started: Instant,
    on_progress: Option<ProgressFn<ScanProgress>>,
}

impl ScanContext {
    pub fn new(planned: usize, on_progress: Option<ProgressFn<ScanProgress>>) -> Self {
        Self {
            findings: Mutex::new(Vec::new()),
            processed: AtomicUsize::new(0),
            planned,
            started: Instant::now(),
            on_progress,
        }
    }

    pub fn planned(&self) -> usize {
        self.planned
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub async fn record(&self, finding: Finding) {
        self.findings.lock().await.push(finding);
    }

    /// Count one finished check and report progress
    pub fn check_done(&self) {
        let processed = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        self.report(processed);
    }

    /// Report progress without counting a check
    pub fn touch(&self) {
        self.report(self.processed());
    }

    fn report(&self, processed: usize) {
        self.emit(ScanProgress {
            phase: ScanPhase::Scan,
            points: None,
            planned_checks: Some(self.planned),
            processed_checks: Some(processed),
            eta_ms: self.eta_ms(processed),
        });
    }

    /// Average time per processed check times the checks left
    pub fn eta_ms(&self, processed: usize) -> Option<u64> {
        if self.planned == 0 {
            return None;
        }
        let elapsed = self.started.elapsed().as_millis() as u64;
        let avg = elapsed / processed.max(1) as u64;
        Some(avg.saturating_mul(self.planned.saturating_sub(processed) as u64))
    }

    pub fn emit(&self, progress: ScanProgress) {
        if let Some(cb) = &self.on_progress {
            cb.emit(progress);
        }
    }

    pub fn finish(&self) {
        self.emit(ScanProgress {
            phase: ScanPhase::Done,
            points: None,
            planned_checks: Some(self.planned),
            processed_checks: Some(self.processed()),
            eta_ms: Some(0),
        });
    }

    /// Drain the collected findings once every worker is done
    pub async fn take_findings(&self) -> Vec<Finding> {
        std::mem::take(&mut *self.findings.lock().await)
    }
}
