// src/sqli/tester.rs
use crate::sqli::config::{EnableFlags, ScanConfig};
use crate::sqli::context::ScanContext;
use crate::sqli::heuristics::{
    Heuristics, BASELINE_SPREAD, BOOLEAN_DIVERGENCE, JSON_LENGTH_DELTA, ORDER_BY_DIVERGENCE,
};
use crate::sqli::http_client::{HttpClient, ProbeOutcome, ProbeRequest};
use crate::sqli::payloads::{BooleanPair, OrderByPayload, TimePayload, UnionPayload};
use crate::sqli::report::remediation_for;
use crate::sqli::stats::{mean, paired_z_test_p_value};
use crate::sqli::types::*;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

/// Timing trials per time payload
pub const TIME_TRIALS: usize = 3;
/// Pause between the baseline and injected probe of one trial
pub const TRIAL_PAUSE_MS: u64 = 10;
/// Highest column index tried while inferring the UNION width
pub const MAX_ORDER_BY_COLUMNS: usize = 8;
/// Evidence text is clipped to this many characters
const EVIDENCE_CHARS: usize = 300;

/// Evidence for attempts that needed a reference response
const NO_BASELINE: &str = "baseline unavailable";

/// Reference response of a point, taken with an empty payload.
/// `None` when the probe failed at transport level.
struct Baseline {
    text: Option<String>,
}

/// Runs the per-point technique sequence: baseline, error, boolean,
/// union, time. One instance is shared by every worker of a run.
pub struct SqliTester {
    http_client: HttpClient,
    target: ScanTarget,
    ctx: Arc<ScanContext>,
    enable: EnableFlags,
    time_threshold_ms: u64,
    jitter_ms: (u64, u64),
    error_payloads: Vec<String>,
    boolean_pairs: Vec<BooleanPair>,
    time_payloads: Vec<TimePayload>,
    order_by_payloads: Vec<OrderByPayload>,
    union_payloads: Vec<UnionPayload>,
}

impl SqliTester {
    pub fn new(
        http_client: HttpClient,
        target: ScanTarget,
        config: &ScanConfig,
        ctx: Arc<ScanContext>,
    ) -> Self {
        Self {
            http_client,
            target,
            ctx,
            enable: config.enable,
            time_threshold_ms: config.time_threshold_ms,
            jitter_ms: config.jitter_ms,
            error_payloads: config.payloads.error(),
            boolean_pairs: config.payloads.boolean(),
            time_payloads: config.payloads.time(),
            order_by_payloads: config.payloads.order_by(),
            union_payloads: config.payloads.union(),
        }
    }

    /// Checks counted toward progress for one point
    pub fn checks_per_point(config: &ScanConfig) -> usize {
        let mut n = 0;
        if config.enable.error {
            n += config.payloads.error().len();
        }
        if config.enable.boolean {
            n += config.payloads.boolean().len();
        }
        if config.enable.time {
            n += config.payloads.time().len();
        }
        n
    }

    /// Run every enabled technique against one point, recording each
    /// attempt in the shared context
    pub async fn test_point(&self, point: &InjectionPoint) {
        debug!("testing {}", point.label());
        let baseline = self.baseline(point).await;
        self.pause().await;

        let mut fingerprint = None;
        if self.enable.error {
            fingerprint = self.test_error_based(point).await;
        }
        if self.enable.boolean {
            self.test_boolean_based(point, &baseline).await;
        }
        if self.enable.union {
            self.test_union_based(point, &baseline).await;
        }
        if self.enable.time {
            self.test_time_based(point, fingerprint).await;
        }
    }

    async fn baseline(&self, point: &InjectionPoint) -> Baseline {
        let (_, outcome) = self.send(point, "").await;
        match outcome {
            ProbeOutcome::Response(r) => {
                debug!(
                    "baseline for {}: status {}, {} bytes, title {:?}",
                    point.label(),
                    r.status,
                    r.text.len(),
                    Heuristics::extract_title(&r.text)
                );
                Baseline { text: Some(r.text) }
            }
            ProbeOutcome::Failed { error, .. } => {
                debug!("baseline for {} failed: {}", point.label(), error);
                Baseline { text: None }
            }
        }
    }

    /// Stops at the first payload that surfaces a database error and
    /// returns the engine it points to
    async fn test_error_based(&self, point: &InjectionPoint) -> Option<DbFingerprint> {
        for payload in &self.error_payloads {
            let (request, outcome) = self.send(point, payload).await;
            let text = outcome.response().map(|r| r.text.as_str()).unwrap_or("");
            let is_error = outcome.response().is_some() && Heuristics::has_sql_error(text);

            let mut fingerprint = None;
            let finding = if is_error {
                let db = Heuristics::detect_db_fingerprint(text);
                fingerprint = Some(db);
                info!("💥 SQL error from {} with {:?} (db: {})", point.label(), payload, db);
                self.finding(
                    point,
                    payload.clone(),
                    Technique::Error,
                    &outcome,
                    Some(Heuristics::clip(text, EVIDENCE_CHARS)),
                    vec!["error_signature".to_string(), format!("db_fingerprint={}", db)],
                    &[&request],
                )
            } else {
                self.attempt(point, payload.clone(), Technique::Error, &outcome, None)
            };
            self.ctx.record(finding).await;
            self.ctx.check_done();

            if is_error {
                return fingerprint;
            }
            self.pause().await;
        }
        None
    }

    async fn test_boolean_based(&self, point: &InjectionPoint, baseline: &Baseline) {
        for pair in &self.boolean_pairs {
            let (true_request, true_outcome) = self.send(point, &pair.true_payload).await;
            self.pause().await;
            let (false_request, false_outcome) = self.send(point, &pair.false_payload).await;
            let payload = format!("{} | {}", pair.true_payload, pair.false_payload);

            let verdict = match (
                baseline.text.as_deref(),
                true_outcome.response(),
                false_outcome.response(),
            ) {
                (Some(base), Some(t), Some(f)) => {
                    let sim_base_true = Heuristics::similarity_signal(base, &t.text);
                    let sim_base_false = Heuristics::similarity_signal(base, &f.text);
                    let sim_true_false = Heuristics::similarity_signal(&t.text, &f.text);
                    let both_ok = !t.is_server_error() && !f.is_server_error();
                    let length_delta =
                        Heuristics::length_delta(&t.text, &f.text, base.len());
                    let json_signal = (t.is_json() || f.is_json()) && length_delta > JSON_LENGTH_DELTA;
                    let diverged = sim_true_false < BOOLEAN_DIVERGENCE
                        && (sim_base_true - sim_base_false).abs() > BASELINE_SPREAD;
                    let vulnerable = both_ok && (diverged || json_signal);
                    vulnerable.then(|| {
                        format!(
                            "sim(base,true)={:.2} sim(base,false)={:.2} sim(true,false)={:.2} len_delta={:.2}",
                            sim_base_true, sim_base_false, sim_true_false, length_delta
                        )
                    })
                }
                _ => None,
            };

            let vulnerable = verdict.is_some();
            let finding = match verdict {
                Some(evidence) => {
                    info!("💥 Boolean differential on {} ({})", point.label(), evidence);
                    self.finding(
                        point,
                        payload,
                        Technique::BooleanDifferential,
                        &true_outcome,
                        Some(evidence),
                        pair.label.iter().cloned().collect(),
                        &[&true_request, &false_request],
                    )
                }
                None => {
                    let evidence = baseline.text.is_none().then(|| NO_BASELINE.to_string());
                    self.attempt(point, payload, Technique::BooleanDifferential, &true_outcome, evidence)
                }
            };
            self.ctx.record(finding).await;
            self.ctx.check_done();

            if vulnerable {
                return;
            }
            self.pause().await;
        }
    }

    /// Infer the column count with `ORDER BY n` against `ORDER BY n+10`,
    /// then confirm with a `UNION SELECT NULL,...` of that width
    async fn test_union_based(&self, point: &InjectionPoint, baseline: &Baseline) {
        let Some(columns) = self.infer_column_count(point).await else {
            debug!("no column count inferred for {}", point.label());
            return;
        };

        for union in &self.union_payloads {
            let payload = union.render(columns);
            let (request, outcome) = self.send(point, &payload).await;
            let evidence = baseline.text.as_deref().zip(outcome.response()).and_then(|(base, r)| {
                let sim = Heuristics::similarity_signal(base, &r.text);
                let delta = Heuristics::length_delta(base, &r.text, base.len());
                let differs = sim < ORDER_BY_DIVERGENCE || delta > JSON_LENGTH_DELTA;
                (!r.is_server_error() && !Heuristics::has_sql_error(&r.text) && differs)
                    .then(|| format!("union-sim={:.3} len_delta={:.2} columns={}", sim, delta, columns))
            });

            let vulnerable = evidence.is_some();
            let finding = match evidence {
                Some(evidence) => {
                    info!("💥 UNION injection on {} with {} columns", point.label(), columns);
                    let mut confirmations = vec![format!("union_columns={}", columns)];
                    confirmations.extend(union.label.iter().cloned());
                    self.finding(
                        point,
                        payload,
                        Technique::Union,
                        &outcome,
                        Some(evidence),
                        confirmations,
                        &[&request],
                    )
                }
                None => {
                    let evidence = baseline.text.is_none().then(|| NO_BASELINE.to_string());
                    self.attempt(point, payload, Technique::Union, &outcome, evidence)
                }
            };
            self.ctx.record(finding).await;
            self.ctx.touch();

            if vulnerable {
                return;
            }
            self.pause().await;
        }
    }

    async fn infer_column_count(&self, point: &InjectionPoint) -> Option<usize> {
        for template in &self.order_by_payloads {
            let mut last_changed: Option<(usize, f64, ProbeOutcome)> = None;

            for n in 1..=MAX_ORDER_BY_COLUMNS {
                let (_, low) = self.send(point, &template.render(n)).await;
                self.pause().await;
                let (_, high) = self.send(point, &template.render(n + 10)).await;
                self.pause().await;
                self.ctx.touch();

                let (Some(a), Some(b)) = (low.response(), high.response()) else {
                    break;
                };
                let sim = Heuristics::similarity_signal(&a.text, &b.text);
                let changed = sim < ORDER_BY_DIVERGENCE
                    || Heuristics::length_delta(&a.text, &b.text, a.text.len()) > JSON_LENGTH_DELTA;
                if !changed {
                    break;
                }
                last_changed = Some((n, sim, low));
            }

            if let Some((columns, sim, outcome)) = last_changed {
                let finding = Finding {
                    evidence: Some(format!("orderby-sim={:.3} at n={}", sim, columns)),
                    confirmations: vec![format!("orderby_columns={}", columns)],
                    ..self.attempt(point, template.render(columns), Technique::Union, &outcome, None)
                };
                self.ctx.record(finding).await;
                return Some(columns);
            }
        }
        None
    }

    async fn test_time_based(&self, point: &InjectionPoint, fingerprint: Option<DbFingerprint>) {
        let threshold = self.time_threshold_ms as f64;

        for time_payload in prioritise_time_payloads(&self.time_payloads, fingerprint) {
            let mut base_times = Vec::with_capacity(TIME_TRIALS);
            let mut injected_times = Vec::with_capacity(TIME_TRIALS);
            let mut diffs = Vec::with_capacity(TIME_TRIALS);
            let mut near_base = true;
            let mut last = None;

            for trial in 0..TIME_TRIALS {
                if trial > 0 {
                    self.pause().await;
                }
                let (_, base) = self.send(point, "").await;
                sleep(Duration::from_millis(TRIAL_PAUSE_MS)).await;
                let (request, injected) = self.send(point, &time_payload.p).await;

                match (base.response(), injected.response()) {
                    (Some(b), Some(i)) => {
                        if b.is_server_error() || i.is_server_error() {
                            near_base = false;
                        }
                        base_times.push(b.elapsed_ms as f64);
                        injected_times.push(i.elapsed_ms as f64);
                        diffs.push(i.elapsed_ms as f64 - b.elapsed_ms as f64);
                    }
                    _ => debug!("dropping timing trial {} for {}", trial + 1, point.label()),
                }
                last = Some((request, injected));
            }
            let Some((request, outcome)) = last else {
                continue;
            };

            let test = paired_z_test_p_value(&diffs);
            let mean_delta = mean(&injected_times) - mean(&base_times);
            let vulnerable = diffs.len() >= 2
                && near_base
                && mean_delta > 0.8 * threshold
                && test.p <= 0.05;
            let evidence = format!(
                "mean_delta_ms={:.0} z={:.2} p={:.4} trials={}",
                mean_delta,
                test.z,
                test.p,
                diffs.len()
            );

            let finding = if vulnerable {
                info!("💥 Time-based injection on {} ({})", point.label(), evidence);
                self.finding(
                    point,
                    time_payload.p.clone(),
                    Technique::Time,
                    &outcome,
                    Some(evidence),
                    time_payload.label.iter().cloned().collect(),
                    &[&request],
                )
            } else {
                self.attempt(point, time_payload.p.clone(), Technique::Time, &outcome, Some(evidence))
            };
            self.ctx.record(finding).await;
            self.ctx.check_done();

            if vulnerable {
                return;
            }
            self.pause().await;
        }
    }

    async fn send(&self, point: &InjectionPoint, payload: &str) -> (ProbeRequest, ProbeOutcome) {
        self.http_client
            .send_with_injection(&self.target, point, payload)
            .await
    }

    /// Randomized gap between two requests to the same point
    async fn pause(&self) {
        let (lo, hi) = self.jitter_ms;
        let ms = if hi > lo {
            rand::thread_rng().gen_range(lo..=hi)
        } else {
            lo
        };
        if ms > 0 {
            sleep(Duration::from_millis(ms)).await;
        }
    }

    /// A non-vulnerable attempt, kept for the audit trail
    fn attempt(
        &self,
        point: &InjectionPoint,
        payload: String,
        technique: Technique,
        outcome: &ProbeOutcome,
        evidence: Option<String>,
    ) -> Finding {
        Finding {
            point: point.clone(),
            payload,
            technique,
            vulnerable: false,
            response_meta: response_meta(outcome),
            evidence,
            confirmations: Vec::new(),
            reproduce: None,
            remediation: Vec::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finding(
        &self,
        point: &InjectionPoint,
        payload: String,
        technique: Technique,
        outcome: &ProbeOutcome,
        evidence: Option<String>,
        confirmations: Vec<String>,
        requests: &[&ProbeRequest],
    ) -> Finding {
        Finding {
            point: point.clone(),
            payload,
            technique,
            vulnerable: true,
            response_meta: response_meta(outcome),
            evidence,
            confirmations,
            reproduce: Some(Reproduce {
                curl: requests.iter().map(|r| r.to_curl()).collect(),
            }),
            remediation: remediation_for(technique),
        }
    }
}

pub fn response_meta(outcome: &ProbeOutcome) -> ResponseMeta {
    match outcome {
        ProbeOutcome::Response(r) => ResponseMeta {
            status: Some(r.status),
            elapsed_ms: r.elapsed_ms,
            body_length: r.text.len(),
            redirect_location: r.location.clone(),
        },
        ProbeOutcome::Failed { elapsed_ms, .. } => ResponseMeta {
            status: None,
            elapsed_ms: *elapsed_ms,
            body_length: 0,
            redirect_location: None,
        },
    }
}

/// Bring payloads whose label names the fingerprinted engine to the front,
/// keeping the configured order otherwise
pub fn prioritise_time_payloads(
    payloads: &[TimePayload],
    fingerprint: Option<DbFingerprint>,
) -> Vec<TimePayload> {
    let mut ordered = payloads.to_vec();
    if let Some(db) = fingerprint.filter(|db| *db != DbFingerprint::Unknown) {
        ordered.sort_by_key(|t| {
            !t.label
                .as_deref()
                .map(|l| l.starts_with(db.as_str()))
                .unwrap_or(false)
        });
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqli::payloads::time_payloads;
    use crate::sqli::http_client::ProbeResponse;

    fn labels(payloads: &[TimePayload]) -> Vec<String> {
        payloads.iter().filter_map(|t| t.label.clone()).collect()
    }

    #[test]
    fn test_fingerprint_moves_matching_payloads_first() {
        let ordered = prioritise_time_payloads(&time_payloads(), Some(DbFingerprint::Postgres));
        assert_eq!(labels(&ordered)[0], "postgres_sleep");

        let ordered = prioritise_time_payloads(&time_payloads(), Some(DbFingerprint::Mysql));
        assert_eq!(
            labels(&ordered),
            vec!["mysql_sleep", "mssql_waitfor", "postgres_sleep", "mssql_waitfor_numeric"]
        );
    }

    #[test]
    fn test_unknown_fingerprint_keeps_order() {
        let original = time_payloads();
        assert_eq!(
            prioritise_time_payloads(&original, Some(DbFingerprint::Unknown)),
            original
        );
        assert_eq!(prioritise_time_payloads(&original, None), original);
    }

    #[test]
    fn test_checks_per_point_counts_enabled_techniques() {
        let mut config = ScanConfig::new("http://x.test/?q=1");
        let all = config.payloads.error().len()
            + config.payloads.boolean().len()
            + config.payloads.time().len();
        assert_eq!(SqliTester::checks_per_point(&config), all);

        config.enable.time = false;
        config.enable.union = true;
        assert_eq!(
            SqliTester::checks_per_point(&config),
            config.payloads.error().len() + config.payloads.boolean().len()
        );
    }

    #[test]
    fn test_response_meta_for_failure() {
        let meta = response_meta(&ProbeOutcome::Failed {
            error: "timeout".to_string(),
            elapsed_ms: 10_000,
        });
        assert_eq!(meta.status, None);
        assert_eq!(meta.elapsed_ms, 10_000);

        let meta = response_meta(&ProbeOutcome::Response(ProbeResponse {
            status: 302,
            text: "moved".to_string(),
            content_type: None,
            location: Some("/login".to_string()),
            set_cookies: Vec::new(),
            elapsed_ms: 12,
        }));
        assert_eq!(meta.status, Some(302));
        assert_eq!(meta.body_length, 5);
        assert_eq!(meta.redirect_location.as_deref(), Some("/login"));
    }
}
