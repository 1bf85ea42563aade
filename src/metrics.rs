//! Lightweight operational metrics.
//!
//! Counters, gauges, and timers keyed by name plus optional tags. This is
//! in-process accounting for run summaries and tests; shipping metrics to a
//! backend is out of scope.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::{json, Map, Value};

/// Collects counters, gauges, and timing samples.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, f64>,
    timers: HashMap<String, Vec<f64>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, name: &str, value: u64, tags: Option<&[(&str, &str)]>) {
        let key = make_key(name, tags);
        *self.counters.entry(key).or_insert(0) += value;
    }

    pub fn set_gauge(&mut self, name: &str, value: f64, tags: Option<&[(&str, &str)]>) {
        self.gauges.insert(make_key(name, tags), value);
    }

    pub fn record_time(&mut self, name: &str, seconds: f64, tags: Option<&[(&str, &str)]>) {
        self.timers
            .entry(make_key(name, tags))
            .or_default()
            .push(seconds);
    }

    /// Time a closure and record its duration under `name`.
    pub fn time<R>(&mut self, name: &str, f: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let result = f();
        self.record_time(name, start.elapsed().as_secs_f64(), None);
        result
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// Snapshot of all metrics with per-timer statistics.
    pub fn summary(&self) -> Value {
        let mut timers = Map::new();
        for (key, samples) in &self.timers {
            if samples.is_empty() {
                continue;
            }
            let total: f64 = samples.iter().sum();
            let min = samples.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            timers.insert(
                key.clone(),
                json!({
                    "count": samples.len(),
                    "total": total,
                    "avg": total / samples.len() as f64,
                    "min": min,
                    "max": max,
                }),
            );
        }
        json!({
            "counters": self.counters,
            "gauges": self.gauges,
            "timers": timers,
        })
    }

    pub fn reset(&mut self) {
        self.counters.clear();
        self.gauges.clear();
        self.timers.clear();
    }
}

/// `name[k1=v1,k2=v2]` with tags sorted for a stable key.
fn make_key(name: &str, tags: Option<&[(&str, &str)]>) -> String {
    match tags {
        None | Some([]) => name.to_string(),
        Some(tags) => {
            let mut pairs: Vec<String> =
                tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
            pairs.sort();
            format!("{name}[{}]", pairs.join(","))
        }
    }
}
