//! Metrics collection and reporting using metrics-rs.
//!
//! Run outcomes, per-core CPI and perf counter totals are published through
//! the `metrics` facade. [`CliRecorder`] keeps them in memory so the CLI can
//! print a summary with `--metrics`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::{
    Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit, counter,
    describe_counter, describe_gauge, describe_histogram, histogram,
};
use parking_lot::RwLock;

use crate::controller::RunStatus;

/// Register metric descriptions. Call once at startup.
pub fn init() {
    describe_counter!("cosim_runs_total", Unit::Count, "Runs that reached a terminal status");
    describe_counter!("cosim_runs_failed_total", Unit::Count, "Runs that ended in FAIL");
    describe_counter!(
        "cosim_perf_calls_total",
        Unit::Count,
        "DUT-to-controller calls, by event class"
    );
    describe_counter!(
        "cosim_perf_bytes_total",
        Unit::Bytes,
        "Bytes moved from DUT to controller, by event class"
    );
    describe_gauge!(
        "cosim_core_cpi",
        Unit::Count,
        "Cycles per instruction of a core that exhausted its budget"
    );
    describe_histogram!(
        "cosim_run_duration_seconds",
        Unit::Seconds,
        "Wall-clock duration of a run"
    );
}

/// Record a finished run.
pub fn record_run(status: RunStatus, elapsed: Option<Duration>) {
    counter!("cosim_runs_total").increment(1);
    if status == RunStatus::Fail {
        counter!("cosim_runs_failed_total").increment(1);
    }
    if let Some(elapsed) = elapsed {
        histogram!("cosim_run_duration_seconds").record(elapsed.as_secs_f64());
    }
}

#[derive(Default)]
struct Storage<T> {
    values: RwLock<HashMap<String, T>>,
}

struct CliCounter {
    key: String,
    storage: Arc<Storage<u64>>,
}

impl metrics::CounterFn for CliCounter {
    fn increment(&self, value: u64) {
        *self.storage.values.write().entry(self.key.clone()).or_insert(0) += value;
    }

    fn absolute(&self, value: u64) {
        self.storage.values.write().insert(self.key.clone(), value);
    }
}

struct CliGauge {
    key: String,
    storage: Arc<Storage<f64>>,
}

impl metrics::GaugeFn for CliGauge {
    fn increment(&self, value: f64) {
        *self.storage.values.write().entry(self.key.clone()).or_insert(0.0) += value;
    }

    fn decrement(&self, value: f64) {
        *self.storage.values.write().entry(self.key.clone()).or_insert(0.0) -= value;
    }

    fn set(&self, value: f64) {
        self.storage.values.write().insert(self.key.clone(), value);
    }
}

struct CliHistogram {
    key: String,
    storage: Arc<Storage<Vec<f64>>>,
}

impl metrics::HistogramFn for CliHistogram {
    fn record(&self, value: f64) {
        self.storage
            .values
            .write()
            .entry(self.key.clone())
            .or_default()
            .push(value);
    }
}

/// Recorder that keeps metrics in memory for terminal output.
#[derive(Default)]
pub struct CliRecorder {
    counters: Arc<Storage<u64>>,
    gauges: Arc<Storage<f64>>,
    histograms: Arc<Storage<Vec<f64>>>,
}

impl CliRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install as the global recorder. `None` if one is already installed.
    #[must_use]
    pub fn install(self) -> Option<CliRecorderHandle> {
        let handle = self.handle();
        metrics::set_global_recorder(self).ok()?;
        Some(handle)
    }

    fn handle(&self) -> CliRecorderHandle {
        CliRecorderHandle {
            counters: Arc::clone(&self.counters),
            gauges: Arc::clone(&self.gauges),
            histograms: Arc::clone(&self.histograms),
        }
    }
}

fn key_to_string(key: &Key) -> String {
    let labels: Vec<String> = key
        .labels()
        .map(|l| format!("{}={}", l.key(), l.value()))
        .collect();
    if labels.is_empty() {
        key.name().to_string()
    } else {
        format!("{}{{{}}}", key.name(), labels.join(","))
    }
}

impl Recorder for CliRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(CliCounter {
            key: key_to_string(key),
            storage: Arc::clone(&self.counters),
        }))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(Arc::new(CliGauge {
            key: key_to_string(key),
            storage: Arc::clone(&self.gauges),
        }))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(Arc::new(CliHistogram {
            key: key_to_string(key),
            storage: Arc::clone(&self.histograms),
        }))
    }
}

/// Access to metrics recorded by an installed [`CliRecorder`].
pub struct CliRecorderHandle {
    counters: Arc<Storage<u64>>,
    gauges: Arc<Storage<f64>>,
    histograms: Arc<Storage<Vec<f64>>>,
}

impl CliRecorderHandle {
    #[must_use]
    pub fn get_counter(&self, key: &str) -> Option<u64> {
        self.counters.values.read().get(key).copied()
    }

    #[must_use]
    pub fn get_gauge(&self, key: &str) -> Option<f64> {
        self.gauges.values.read().get(key).copied()
    }

    /// Print all collected metrics, sorted by key.
    #[allow(clippy::cast_precision_loss)]
    pub fn print_summary(&self) {
        let counters = self.counters.values.read();
        let gauges = self.gauges.values.read();
        let histograms = self.histograms.values.read();

        if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
            println!("No metrics collected.");
            return;
        }

        println!();
        println!("## Metrics Summary");
        println!();

        if !counters.is_empty() {
            println!("### Counters");
            let mut entries: Vec<_> = counters.iter().collect();
            entries.sort();
            for (key, value) in entries {
                println!("  {key}: {value}");
            }
            println!();
        }

        if !gauges.is_empty() {
            println!("### Gauges");
            let mut entries: Vec<_> = gauges.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (key, value) in entries {
                println!("  {key}: {value:.6}");
            }
            println!();
        }

        if !histograms.is_empty() {
            println!("### Histograms");
            let mut entries: Vec<_> = histograms.iter().filter(|(_, v)| !v.is_empty()).collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (key, values) in entries {
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let avg = values.iter().sum::<f64>() / values.len() as f64;
                println!(
                    "  {key}: count={}, min={min:.6}, max={max:.6}, avg={avg:.6}",
                    values.len()
                );
            }
            println!();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::Label;

    #[test]
    fn test_key_to_string() {
        let key = Key::from_name("cosim_runs_total");
        assert_eq!(key_to_string(&key), "cosim_runs_total");

        let key = Key::from_parts(
            "cosim_perf_calls_total",
            vec![Label::new("event", "load"), Label::new("core", "1")],
        );
        assert_eq!(key_to_string(&key), "cosim_perf_calls_total{event=load,core=1}");
    }

    #[test]
    fn test_cli_recorder_storage() {
        let recorder = CliRecorder::new();
        let counter = CliCounter {
            key: "cosim_runs_total".to_string(),
            storage: Arc::clone(&recorder.counters),
        };
        metrics::CounterFn::increment(&counter, 2);
        metrics::CounterFn::increment(&counter, 1);
        assert_eq!(counter.storage.values.read().get("cosim_runs_total"), Some(&3));

        let gauge = CliGauge {
            key: "cosim_core_cpi".to_string(),
            storage: Arc::clone(&recorder.gauges),
        };
        metrics::GaugeFn::set(&gauge, 2.5);
        assert_eq!(gauge.storage.values.read().get("cosim_core_cpi"), Some(&2.5));
    }

    #[test]
    fn test_record_run_counts_outcomes() {
        let recorder = CliRecorder::new();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            record_run(RunStatus::Fail, Some(Duration::from_millis(5)));
            record_run(RunStatus::Done, None);
            metrics::gauge!("cosim_core_cpi", "core" => "0").set(2.5);
        });

        assert_eq!(handle.get_counter("cosim_runs_total"), Some(2));
        assert_eq!(handle.get_counter("cosim_runs_failed_total"), Some(1));
        assert_eq!(handle.get_gauge("cosim_core_cpi{core=0}"), Some(2.5));
        assert_eq!(
            handle.histograms.values.read().get("cosim_run_duration_seconds").map(Vec::len),
            Some(1)
        );
    }

    #[test]
    fn test_perf_flush_publishes_totals() {
        use crate::perf::{PerfCounters, PerfEventKind, PerfPolicy};

        let recorder = CliRecorder::new();
        let handle = recorder.handle();
        let mut perf = PerfCounters::new(PerfPolicy::PerCall, 2);
        perf.on_run_steps();
        perf.record(1, PerfEventKind::LoadEvent, 24);
        perf.record(1, PerfEventKind::LoadEvent, 8);
        metrics::with_local_recorder(&recorder, || perf.flush());

        assert_eq!(handle.get_counter("cosim_perf_calls_total{event=step}"), Some(1));
        assert_eq!(
            handle.get_counter("cosim_perf_calls_total{event=load,core=1}"),
            Some(2)
        );
        assert_eq!(
            handle.get_counter("cosim_perf_bytes_total{event=load,core=1}"),
            Some(32)
        );
        assert_eq!(handle.get_counter("cosim_perf_calls_total{event=load,core=0}"), None);
    }
}
