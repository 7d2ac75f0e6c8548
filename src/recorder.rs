use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use metrics_util::registry::{AtomicStorage, Registry};
use tracing::warn;

use crate::common::BuildError;
use crate::formatting::{sanitize_metric_name, sanitize_metric_segment};
use crate::snapshot::{DistributionStats, Snapshot, SnapshotSource, Value};

/// Running statistics for one histogram, updated with Welford's algorithm.
#[derive(Clone, Copy, Debug, Default)]
struct RunningStats {
    count: u64,
    sum: f64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    fn record_samples(&mut self, samples: &[f64]) {
        for &sample in samples {
            if self.count == 0 {
                self.min = sample;
                self.max = sample;
            } else {
                self.min = self.min.min(sample);
                self.max = self.max.max(sample);
            }

            self.count += 1;
            self.sum += sample;
            let delta = sample - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (sample - self.mean);
        }
    }

    fn to_stats(self) -> DistributionStats {
        let variance = if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        };
        DistributionStats {
            count: i64::try_from(self.count).unwrap_or(i64::MAX),
            sum: self.sum,
            mean: self.mean,
            variance,
            min: self.min,
            max: self.max,
        }
    }
}

pub(crate) struct Inner {
    registry: Registry<Key, AtomicStorage>,
    // Histogram buckets are drained on every sample, so the totals live here.
    distributions: Mutex<HashMap<Key, RunningStats>>,
}

impl Inner {
    fn sample(&self) -> Snapshot {
        let mut snapshot = Snapshot::new();

        self.registry.visit_counters(|key, counter| {
            let value = counter.load(Ordering::Acquire);
            insert_first(
                &mut snapshot,
                metric_name(key),
                Value::Counter(i64::try_from(value).unwrap_or(i64::MAX)),
            );
        });

        self.registry.visit_gauges(|key, gauge| {
            let value = f64::from_bits(gauge.load(Ordering::Acquire));
            // `as` saturates, and maps NaN to zero.
            insert_first(&mut snapshot, metric_name(key), Value::Gauge(value.round() as i64));
        });

        let mut distributions = self
            .distributions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.registry.visit_histograms(|key, histogram| {
            let entry = distributions.entry(key.clone()).or_default();
            histogram.clear_with(|samples| entry.record_samples(samples));
            insert_first(
                &mut snapshot,
                metric_name(key),
                Value::Distribution(entry.to_stats()),
            );
        });

        snapshot
    }
}

/// Keeps the first metric flattened to a given name; later ones are dropped with a warning.
fn insert_first(snapshot: &mut Snapshot, name: String, value: Value) {
    if let Some(existing) = snapshot.get(&name) {
        warn!(
            metric = %name,
            kept = existing.kind_str(),
            dropped = value.kind_str(),
            "two metrics map to the same statsd name, dropping the later one"
        );
        return;
    }
    snapshot.insert(name, value);
}

/// Flattens a key into a statsd name: the sanitized key name, followed by each non-empty label
/// value as its own segment, in key order.
fn metric_name(key: &Key) -> String {
    let mut name = sanitize_metric_name(key.name());
    for label in key.labels() {
        if label.value().is_empty() {
            continue;
        }
        name.push('.');
        name.push_str(&sanitize_metric_segment(label.value()));
    }
    name
}

/// A [`metrics`] recorder that keeps cumulative values which the exporter can sample.
///
/// Counters and gauges are read as they are. Histogram samples are folded into running summary
/// statistics each time the store is sampled, and reported as [`Value::Distribution`].
pub struct SnapshotRecorder {
    inner: Arc<Inner>,
}

impl SnapshotRecorder {
    pub fn new() -> Self {
        SnapshotRecorder {
            inner: Arc::new(Inner {
                registry: Registry::atomic(),
                distributions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns a handle that can be given to the exporter as its snapshot source.
    pub fn handle(&self) -> SnapshotRecorderHandle {
        SnapshotRecorderHandle {
            inner: self.inner.clone(),
        }
    }

    /// Installs this recorder as the global recorder and returns a handle to it.
    ///
    /// ## Errors
    ///
    /// If a global recorder is already installed, an error variant will be returned.
    pub fn install(self) -> Result<SnapshotRecorderHandle, BuildError> {
        let handle = self.handle();
        metrics::set_global_recorder(self).map_err(|_| BuildError::FailedToInstall)?;
        Ok(handle)
    }
}

impl Default for SnapshotRecorder {
    fn default() -> Self {
        SnapshotRecorder::new()
    }
}

impl Recorder for SnapshotRecorder {
    fn describe_counter(&self, _k: KeyName, _u: Option<Unit>, _d: SharedString) {}
    fn describe_gauge(&self, _k: KeyName, _u: Option<Unit>, _d: SharedString) {}
    fn describe_histogram(&self, _k: KeyName, _u: Option<Unit>, _d: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        self.inner
            .registry
            .get_or_create_counter(key, |c| c.clone().into())
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        self.inner
            .registry
            .get_or_create_gauge(key, |c| c.clone().into())
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        self.inner
            .registry
            .get_or_create_histogram(key, |c| c.clone().into())
    }
}

/// Handle for sampling metrics stored via [`SnapshotRecorder`].
#[derive(Clone)]
pub struct SnapshotRecorderHandle {
    inner: Arc<Inner>,
}

impl SnapshotSource for SnapshotRecorderHandle {
    fn sample(&self) -> Snapshot {
        self.inner.sample()
    }
}

#[cfg(test)]
mod tests {
    use super::SnapshotRecorder;
    use crate::formatting::{encode, Namespace};
    use crate::snapshot::{DistributionStats, SnapshotSource, Value};
    use metrics::{Key, Label, Level, Metadata, Recorder};

    static METADATA: Metadata = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

    #[test]
    fn test_counters_are_cumulative() {
        let recorder = SnapshotRecorder::new();
        let handle = recorder.handle();

        let counter = recorder.register_counter(&Key::from_name("basic.counter"), &METADATA);
        counter.increment(42);
        assert_eq!(
            handle.sample().get("basic.counter"),
            Some(&Value::Counter(42))
        );

        counter.increment(8);
        assert_eq!(
            handle.sample().get("basic.counter"),
            Some(&Value::Counter(50))
        );
    }

    #[test]
    fn test_gauges_are_rounded() {
        let recorder = SnapshotRecorder::new();
        let handle = recorder.handle();

        let gauge = recorder.register_gauge(&Key::from_name("basic.gauge"), &METADATA);
        gauge.set(-3.44);
        assert_eq!(handle.sample().get("basic.gauge"), Some(&Value::Gauge(-3)));

        gauge.set(2.5);
        assert_eq!(handle.sample().get("basic.gauge"), Some(&Value::Gauge(3)));
    }

    #[test]
    fn test_histograms_accumulate_across_samples() {
        let recorder = SnapshotRecorder::new();
        let handle = recorder.handle();

        let histogram = recorder.register_histogram(&Key::from_name("latency"), &METADATA);
        histogram.record(1.0);
        histogram.record(2.0);
        histogram.record(3.0);

        let expected = DistributionStats {
            count: 3,
            sum: 6.0,
            mean: 2.0,
            variance: 2.0 / 3.0,
            min: 1.0,
            max: 3.0,
        };
        match handle.sample().get("latency") {
            Some(Value::Distribution(stats)) => {
                assert_eq!(stats.count, expected.count);
                assert_eq!(stats.sum, expected.sum);
                assert_eq!(stats.min, expected.min);
                assert_eq!(stats.max, expected.max);
                assert!((stats.mean - expected.mean).abs() < 1e-12);
                assert!((stats.variance - expected.variance).abs() < 1e-12);
            }
            other => panic!("unexpected value: {:?}", other),
        }

        // Nothing new recorded: the statistics stay where they were.
        match handle.sample().get("latency") {
            Some(Value::Distribution(stats)) => assert_eq!(stats.count, 3),
            other => panic!("unexpected value: {:?}", other),
        }

        histogram.record(10.0);
        match handle.sample().get("latency") {
            Some(Value::Distribution(stats)) => {
                assert_eq!(stats.count, 4);
                assert_eq!(stats.sum, 16.0);
                assert_eq!(stats.max, 10.0);
            }
            other => panic!("unexpected value: {:?}", other),
        }
    }

    #[test]
    fn test_labels_become_name_segments() {
        let recorder = SnapshotRecorder::new();
        let handle = recorder.handle();

        let labels = vec![Label::new("method", "GET"), Label::new("region", "us-east")];
        let key = Key::from_parts("http requests", labels);
        recorder.register_counter(&key, &METADATA).increment(1);

        assert_eq!(
            handle.sample().get("http_requests.GET.us_east"),
            Some(&Value::Counter(1))
        );
    }

    #[test]
    fn test_empty_label_values_are_skipped() {
        let recorder = SnapshotRecorder::new();
        let handle = recorder.handle();

        let key = Key::from_parts("req", vec![Label::new("m", "")]);
        recorder.register_counter(&key, &METADATA).increment(1);

        let snapshot = handle.sample();
        assert_eq!(snapshot.len(), 1);
        let lines: Vec<String> = snapshot
            .iter()
            .flat_map(|(name, value)| encode(name, value, &Namespace::default()))
            .collect();
        assert_eq!(lines, ["req:1|c"]);
    }

    #[test]
    fn test_colliding_names_keep_the_first_metric() {
        let recorder = SnapshotRecorder::new();
        let handle = recorder.handle();

        let labelled = Key::from_parts("hits", vec![Label::new("m", "GET")]);
        recorder.register_counter(&labelled, &METADATA).increment(5);
        recorder
            .register_counter(&Key::from_name("hits.GET"), &METADATA)
            .increment(7);
        recorder
            .register_gauge(&Key::from_name("hits.GET"), &METADATA)
            .set(9.0);

        // Counters are visited before gauges, so the gauge never replaces a counter.
        let snapshot = handle.sample();
        assert_eq!(snapshot.len(), 1);
        match snapshot.get("hits.GET") {
            Some(Value::Counter(n)) => assert!(*n == 5 || *n == 7),
            other => panic!("unexpected value: {:?}", other),
        }
    }
}
