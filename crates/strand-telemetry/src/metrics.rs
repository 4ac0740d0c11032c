use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// In-process metrics recorder. Counters and latency summaries are
/// attached best-effort by the orchestrator; recording never fails.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: Mutex<HashMap<String, u64>>,
    latencies: Mutex<HashMap<String, LatencyAccumulator>>,
}

#[derive(Clone, Debug, Default)]
struct LatencyAccumulator {
    count: u64,
    total_ms: u64,
    max_ms: u64,
}

/// Point-in-time view of recorded metrics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub latencies: HashMap<String, LatencySummary>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: u64,
    pub mean_ms: u64,
    pub max_ms: u64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, name: &str, by: u64) {
        let mut counters = self.counters.lock();
        *counters.entry(name.to_string()).or_insert(0) += by;
    }

    pub fn record_latency(&self, name: &str, duration: Duration) {
        let ms = duration.as_millis() as u64;
        let mut latencies = self.latencies.lock();
        let acc = latencies.entry(name.to_string()).or_default();
        acc.count += 1;
        acc.total_ms += ms;
        acc.max_ms = acc.max_ms.max(ms);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.lock().clone();
        let latencies = self
            .latencies
            .lock()
            .iter()
            .map(|(name, acc)| {
                (
                    name.clone(),
                    LatencySummary {
                        count: acc.count,
                        mean_ms: if acc.count > 0 { acc.total_ms / acc.count } else { 0 },
                        max_ms: acc.max_ms,
                    },
                )
            })
            .collect();
        MetricsSnapshot { counters, latencies }
    }
}
