//! Lightweight in-memory rollups for analysis diagnostics.
//!
//! Keeps a bounded latency sample window per back end so hosts can surface
//! p95 numbers and fallback rates without persistent storage. Owned by the
//! processing manager; nothing here is global.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::types::AnalysisMode;

const MAX_SAMPLES_PER_METHOD: usize = 256;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodRollup {
    pub method: AnalysisMode,
    pub sample_count: usize,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub max_ms: u64,
    pub failure_count: u64,
    /// Successful analyses that only succeeded via the rule-based fallback
    /// after this method failed.
    pub fallback_count: u64,
    pub last_recorded_at: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub generated_at: String,
    pub methods: Vec<MethodRollup>,
}

#[derive(Debug, Clone, Default)]
struct MethodWindow {
    samples_ms: VecDeque<u64>,
    failure_count: u64,
    fallback_count: u64,
    last_recorded_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct MetricsRecorder {
    windows: Mutex<HashMap<AnalysisMode, MethodWindow>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latency of one successful analysis.
    pub fn record_success(&self, method: AnalysisMode, elapsed_ms: u64) {
        let mut windows = self.windows.lock();
        let window = windows.entry(method).or_default();
        if window.samples_ms.len() >= MAX_SAMPLES_PER_METHOD {
            window.samples_ms.pop_front();
        }
        window.samples_ms.push_back(elapsed_ms);
        window.last_recorded_at = Some(Utc::now());
    }

    /// Record a failed dispatch for `method`.
    pub fn record_failure(&self, method: AnalysisMode) {
        let mut windows = self.windows.lock();
        let window = windows.entry(method).or_default();
        window.failure_count += 1;
        if window.last_recorded_at.is_none() {
            window.last_recorded_at = Some(Utc::now());
        }
    }

    /// Record that a failure of `method` was recovered by the fallback.
    pub fn record_fallback(&self, method: AnalysisMode) {
        let mut windows = self.windows.lock();
        let window = windows.entry(method).or_default();
        window.fallback_count += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let windows = self.windows.lock();
        let mut methods: Vec<MethodRollup> = windows
            .iter()
            .map(|(method, window)| {
                let mut values: Vec<u64> = window.samples_ms.iter().copied().collect();
                values.sort_unstable();
                MethodRollup {
                    method: *method,
                    sample_count: values.len(),
                    p50_ms: percentile(&values, 50.0).unwrap_or(0),
                    p95_ms: percentile(&values, 95.0).unwrap_or(0),
                    max_ms: values.last().copied().unwrap_or(0),
                    failure_count: window.failure_count,
                    fallback_count: window.fallback_count,
                    last_recorded_at: window.last_recorded_at.map(|dt| dt.to_rfc3339()),
                }
            })
            .collect();

        methods.sort_by(|a, b| {
            b.p95_ms
                .cmp(&a.p95_ms)
                .then(a.method.as_str().cmp(b.method.as_str()))
        });

        MetricsSnapshot {
            generated_at: Utc::now().to_rfc3339(),
            methods,
        }
    }
}

fn percentile(values: &[u64], p: f64) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len();
    let rank = ((p / 100.0) * n as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(n - 1);
    Some(values[idx])
}
