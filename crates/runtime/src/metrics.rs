use std::collections::BTreeMap;

use parking_lot::Mutex;

/// Diagnostic counters shared by the sync services.
///
/// Values have no correctness role. Sorted maps keep snapshots stable so they
/// can be compared in tests and printed deterministically.
#[derive(Debug, Default)]
pub struct Metrics {
    inner: Mutex<MetricsInner>,
}

#[derive(Debug, Default, Clone)]
struct MetricsInner {
    counters: BTreeMap<&'static str, u64>,
    gauges: BTreeMap<&'static str, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub counters: Vec<(&'static str, u64)>,
    pub gauges: Vec<(&'static str, i64)>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.inner.lock().counters.get(name).copied().unwrap_or(0)
    }

    pub fn inc_counter(&self, name: &'static str, by: u64) {
        *self.inner.lock().counters.entry(name).or_insert(0) += by;
    }

    pub fn gauge(&self, name: &str) -> Option<i64> {
        self.inner.lock().gauges.get(name).copied()
    }

    pub fn set_gauge(&self, name: &'static str, value: i64) {
        self.inner.lock().gauges.insert(name, value);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.counters.clear();
        inner.gauges.clear();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        MetricsSnapshot {
            counters: inner.counters.iter().map(|(k, v)| (*k, *v)).collect(),
            gauges: inner.gauges.iter().map(|(k, v)| (*k, *v)).collect(),
        }
    }
}
