//! Counting `metrics` recorder.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use metrics::{
    Counter, CounterFn, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type Labels = Vec<(String, String)>;

/// Recorder that totals every counter increment, keyed by name and labels.
///
/// Gauges and histograms are ignored. Install it for the duration of a
/// closure with [`CountingRecorder::record`]; the recorder is thread-local,
/// so async code must run on a current-thread runtime inside the closure.
///
/// # Example
///
/// ```ignore
/// let recorder = CountingRecorder::new();
/// let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
/// recorder.record(|| runtime.block_on(supervisor.run()));
/// assert_eq!(recorder.count("connector.deliveries.acked"), 1);
/// ```
#[derive(Clone, Default)]
pub struct CountingRecorder {
    counters: Arc<Mutex<BTreeMap<(String, Labels), Arc<AtomicU64>>>>,
}

impl CountingRecorder {
    /// Create a recorder with no counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with this recorder installed on the current thread.
    pub fn record<T>(&self, f: impl FnOnce() -> T) -> T {
        metrics::with_local_recorder(self, f)
    }

    /// Total of counter `name` across all label sets.
    #[must_use]
    pub fn count(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .unwrap()
            .iter()
            .filter(|((key, _), _)| key == name)
            .map(|(_, total)| total.load(Ordering::SeqCst))
            .sum()
    }

    /// Total of counter `name` for series carrying `label = value`.
    #[must_use]
    pub fn count_labeled(&self, name: &str, label: &str, value: &str) -> u64 {
        self.counters
            .lock()
            .unwrap()
            .iter()
            .filter(|((key, labels), _)| {
                key == name && labels.iter().any(|(k, v)| k == label && v == value)
            })
            .map(|(_, total)| total.load(Ordering::SeqCst))
            .sum()
    }
}

struct Total(Arc<AtomicU64>);

impl CounterFn for Total {
    fn increment(&self, value: u64) {
        self.0.fetch_add(value, Ordering::SeqCst);
    }

    fn absolute(&self, value: u64) {
        self.0.fetch_max(value, Ordering::SeqCst);
    }
}

impl Recorder for CountingRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        let labels = key
            .labels()
            .map(|label| (label.key().to_string(), label.value().to_string()))
            .collect();
        let total = Arc::clone(
            self.counters
                .lock()
                .unwrap()
                .entry((key.name().to_string(), labels))
                .or_default(),
        );
        Counter::from_arc(Arc::new(Total(total)))
    }

    fn register_gauge(&self, _key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, _key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}
