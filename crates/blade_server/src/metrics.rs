// Process-wide counters rendered in Prometheus text format.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

pub struct SimpleMetrics {
    pub http_requests_total: AtomicU64,
    pub experiments_created_success: AtomicU64,
    pub experiments_created_failure: AtomicU64,
    pub experiments_destroyed_success: AtomicU64,
    pub experiments_destroyed_failure: AtomicU64,
    pub idempotency_rejections_total: AtomicU64,
    pub http_request_duration_ms_total: AtomicU64,
    // Full metric line prefix (name plus labels) -> value
    pub labeled_counters: Mutex<BTreeMap<String, u64>>,
}

impl SimpleMetrics {
    pub fn new() -> Self {
        Self {
            http_requests_total: AtomicU64::new(0),
            experiments_created_success: AtomicU64::new(0),
            experiments_created_failure: AtomicU64::new(0),
            experiments_destroyed_success: AtomicU64::new(0),
            experiments_destroyed_failure: AtomicU64::new(0),
            idempotency_rejections_total: AtomicU64::new(0),
            http_request_duration_ms_total: AtomicU64::new(0),
            labeled_counters: Mutex::new(BTreeMap::new()),
        }
    }

    fn inc_labeled(&self, key: String) {
        if let Ok(mut map) = self.labeled_counters.lock() {
            *map.entry(key).or_insert(0) += 1;
        }
    }
}

impl Default for SimpleMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<SimpleMetrics> = OnceLock::new();

fn metrics() -> &'static SimpleMetrics {
    METRICS.get_or_init(SimpleMetrics::new)
}

fn counter(out: &mut String, name: &str, help: &str) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} counter\n"));
}

pub fn encode_metrics() -> String {
    let m = metrics();
    let mut out = String::new();

    counter(&mut out, "blade_http_requests_total", "Total number of HTTP requests");
    out.push_str(&format!(
        "blade_http_requests_total {}\n",
        m.http_requests_total.load(Ordering::Relaxed)
    ));

    counter(&mut out, "blade_experiments_created_total", "Experiment create outcomes");
    out.push_str(&format!(
        "blade_experiments_created_total{{result=\"success\"}} {}\n",
        m.experiments_created_success.load(Ordering::Relaxed)
    ));
    out.push_str(&format!(
        "blade_experiments_created_total{{result=\"failure\"}} {}\n",
        m.experiments_created_failure.load(Ordering::Relaxed)
    ));

    counter(&mut out, "blade_experiments_destroyed_total", "Experiment destroy outcomes");
    out.push_str(&format!(
        "blade_experiments_destroyed_total{{result=\"success\"}} {}\n",
        m.experiments_destroyed_success.load(Ordering::Relaxed)
    ));
    out.push_str(&format!(
        "blade_experiments_destroyed_total{{result=\"failure\"}} {}\n",
        m.experiments_destroyed_failure.load(Ordering::Relaxed)
    ));

    counter(
        &mut out,
        "blade_idempotency_rejections_total",
        "Requests rejected for a missing or replayed idempotency token",
    );
    out.push_str(&format!(
        "blade_idempotency_rejections_total {}\n",
        m.idempotency_rejections_total.load(Ordering::Relaxed)
    ));

    counter(
        &mut out,
        "blade_http_request_duration_ms_total",
        "Summed HTTP request latency in milliseconds",
    );
    out.push_str(&format!(
        "blade_http_request_duration_ms_total {}\n",
        m.http_request_duration_ms_total.load(Ordering::Relaxed)
    ));

    if let Ok(map) = m.labeled_counters.lock() {
        let mut family = "";
        for (key, value) in map.iter() {
            let name = key.split('{').next().unwrap_or(key);
            if name != family {
                family = name;
                let help = match name {
                    "blade_http_requests_by_route_total" => "HTTP requests by method, route and status",
                    _ => "Preparation outcomes",
                };
                counter(&mut out, name, help);
            }
            out.push_str(&format!("{key} {value}\n"));
        }
    }

    out
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let m = metrics();
    m.http_requests_total.fetch_add(1, Ordering::Relaxed);
    m.http_request_duration_ms_total
        .fetch_add((duration_secs * 1000.0) as u64, Ordering::Relaxed);
    m.inc_labeled(format!(
        "blade_http_requests_by_route_total{{method=\"{method}\",route=\"{}\",status=\"{status}\"}}",
        route_label(path)
    ));
}

/// Collapses a request path to its route template so uids do not become
/// label values. Paths outside the API are reported as `other`.
fn route_label(path: &str) -> &'static str {
    let rest = path.strip_prefix("/api/v1").unwrap_or(path);
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        ["experiments"] => "/experiments",
        ["experiments", _] => "/experiments/:uid",
        ["preparations"] => "/preparations",
        ["preparations", _] => "/preparations/:uid",
        ["status"] => "/status",
        ["openapi"] => "/openapi",
        _ => "other",
    }
}

pub fn record_create(success: bool) {
    if success {
        metrics().experiments_created_success.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics().experiments_created_failure.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn record_destroy(success: bool) {
    if success {
        metrics().experiments_destroyed_success.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics().experiments_destroyed_failure.fetch_add(1, Ordering::Relaxed);
    }
}

/// `op` is `prepare` or `revoke`.
pub fn record_preparation(op: &str, success: bool) {
    let result = if success { "success" } else { "failure" };
    metrics().inc_labeled(format!(
        "blade_preparations_total{{op=\"{op}\",result=\"{result}\"}}"
    ));
}

pub fn record_idempotency_rejection() {
    metrics()
        .idempotency_rejections_total
        .fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_output_carries_recorded_counters() {
        record_create(true);
        record_preparation("revoke", false);
        let text = encode_metrics();
        assert!(text.contains("# TYPE blade_http_requests_total counter"));
        assert!(text.contains("blade_experiments_created_total{result=\"success\"}"));
        assert!(text.contains("blade_preparations_total{op=\"revoke\",result=\"failure\"} "));
    }

    #[test]
    fn http_requests_are_labeled_by_route_template() {
        record_http_request("DELETE", "/experiments/4f2a9c", 200, 0.25);
        record_http_request("DELETE", "/api/v1/experiments/77aa01", 200, 0.0);
        let text = encode_metrics();
        assert!(text.contains("# TYPE blade_http_requests_by_route_total counter"));
        let line = text
            .lines()
            .find(|l| {
                l.starts_with(
                    "blade_http_requests_by_route_total{method=\"DELETE\",route=\"/experiments/:uid\",status=\"200\"}",
                )
            })
            .unwrap();
        let count: u64 = line.rsplit(' ').next().unwrap().parse().unwrap();
        assert!(count >= 2);
        assert!(!text.contains("4f2a9c"));
        assert_eq!(route_label("/api/v1/status"), "/status");
        assert_eq!(route_label("/nope/a/b"), "other");
    }
}
