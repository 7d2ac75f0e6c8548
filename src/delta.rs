use tracing::trace;

use crate::snapshot::{DeltaSample, DistributionStats, Snapshot, Value};

/// Computes what changed between two consecutive snapshots.
///
/// Metrics that are new in `curr` are passed through with their full value, so the very first
/// cycle reports absolute readings (including the lifetime total of every counter). For metrics
/// seen before:
///
/// - counters report `curr - prev`, and nothing when unchanged
/// - gauges report the current reading when it changed
/// - labels are never reported
/// - distributions report nothing when the count is unchanged, otherwise the current statistics
///   with the count replaced by the number of new samples
///
/// A metric whose kind differs between the two snapshots is skipped for this cycle. Metrics that
/// only exist in `prev` produce nothing.
pub fn diff(prev: &Snapshot, curr: &Snapshot) -> DeltaSample {
    let mut delta = DeltaSample::new();

    for (name, value) in curr.iter() {
        let changed = match prev.get(name) {
            None => Some(value.clone()),
            Some(old) => diff_value(old, value),
        };

        if let Some(value) = changed {
            delta.insert(name, value);
        } else if let Some(old) = prev.get(name) {
            if std::mem::discriminant(old) != std::mem::discriminant(value) {
                trace!(
                    metric = name,
                    from = old.kind_str(),
                    to = value.kind_str(),
                    "metric changed kind between samples, skipping"
                );
            }
        }
    }

    delta
}

fn diff_value(old: &Value, new: &Value) -> Option<Value> {
    match (old, new) {
        (Value::Counter(n1), Value::Counter(n2)) => {
            (n1 != n2).then(|| Value::Counter(n2.wrapping_sub(*n1)))
        }
        (Value::Gauge(n1), Value::Gauge(n2)) => (n1 != n2).then_some(Value::Gauge(*n2)),
        (Value::Label(_), Value::Label(_)) => None,
        (Value::Distribution(d1), Value::Distribution(d2)) => {
            (d1.count != d2.count).then(|| {
                Value::Distribution(DistributionStats {
                    count: d2.count.wrapping_sub(d1.count),
                    ..*d2
                })
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::diff;
    use crate::snapshot::{DistributionStats, Snapshot, Value};

    fn dist(count: i64, sum: f64, mean: f64, variance: f64, min: f64, max: f64) -> Value {
        Value::Distribution(DistributionStats {
            count,
            sum,
            mean,
            variance,
            min,
            max,
        })
    }

    #[test]
    fn test_first_sample_passes_everything_through() {
        let curr = Snapshot::new()
            .with("hits", Value::Counter(100))
            .with("temp", Value::Gauge(-4))
            .with("lat", dist(5, 50.0, 10.0, 2.0, 1.0, 20.0))
            .with("mode", Value::Label("primary".to_owned()));

        let delta = diff(&Snapshot::new(), &curr);
        assert_eq!(delta, curr);
    }

    #[test]
    fn test_counter_delta() {
        let prev = Snapshot::new().with("hits", Value::Counter(10));
        let curr = Snapshot::new().with("hits", Value::Counter(15));

        let delta = diff(&prev, &curr);
        assert_eq!(delta.get("hits"), Some(&Value::Counter(5)));
        assert_eq!(delta.len(), 1);
    }

    #[test]
    fn test_unchanged_counter_is_omitted() {
        let prev = Snapshot::new().with("hits", Value::Counter(10));
        let delta = diff(&prev, &prev.clone());
        assert!(delta.is_empty());
    }

    #[test]
    fn test_counter_reset_reports_negative_delta() {
        let prev = Snapshot::new().with("hits", Value::Counter(10));
        let curr = Snapshot::new().with("hits", Value::Counter(3));

        let delta = diff(&prev, &curr);
        assert_eq!(delta.get("hits"), Some(&Value::Counter(-7)));
    }

    #[test]
    fn test_counter_delta_does_not_overflow() {
        let prev = Snapshot::new().with("hits", Value::Counter(i64::MIN));
        let curr = Snapshot::new().with("hits", Value::Counter(i64::MAX));

        let delta = diff(&prev, &curr);
        assert_eq!(delta.get("hits"), Some(&Value::Counter(-1)));
    }

    #[test]
    fn test_gauge_reports_raw_reading() {
        let prev = Snapshot::new().with("conns", Value::Gauge(10));
        let curr = Snapshot::new().with("conns", Value::Gauge(12));

        let delta = diff(&prev, &curr);
        assert_eq!(delta.get("conns"), Some(&Value::Gauge(12)));

        let delta = diff(&curr, &curr);
        assert!(delta.is_empty());
    }

    #[test]
    fn test_labels_are_never_reported_after_first_sample() {
        let prev = Snapshot::new().with("mode", Value::Label("primary".to_owned()));
        let curr = Snapshot::new().with("mode", Value::Label("replica".to_owned()));

        assert!(diff(&prev, &curr).is_empty());
        assert!(diff(&curr, &curr).is_empty());
    }

    #[test]
    fn test_distribution_with_same_count_is_omitted() {
        let prev = Snapshot::new().with("lat", dist(5, 50.0, 10.0, 2.0, 1.0, 20.0));
        let curr = Snapshot::new().with("lat", dist(5, 99.0, 19.8, 7.0, 0.5, 40.0));

        assert!(diff(&prev, &curr).is_empty());
    }

    #[test]
    fn test_distribution_reports_count_delta_and_raw_fields() {
        let prev = Snapshot::new().with("lat", dist(5, 50.0, 10.0, 2.0, 1.0, 20.0));
        let curr = Snapshot::new().with("lat", dist(8, 92.0, 11.5, 3.25, 1.0, 24.0));

        let delta = diff(&prev, &curr);
        assert_eq!(delta.get("lat"), Some(&dist(3, 92.0, 11.5, 3.25, 1.0, 24.0)));
    }

    #[test]
    fn test_kind_change_is_skipped() {
        let prev = Snapshot::new().with("thing", Value::Gauge(3));
        let curr = Snapshot::new().with("thing", Value::Counter(7));

        assert!(diff(&prev, &curr).is_empty());
    }

    #[test]
    fn test_disappeared_metrics_produce_nothing() {
        let prev = Snapshot::new()
            .with("gone", Value::Counter(1))
            .with("kept", Value::Counter(1));
        let curr = Snapshot::new().with("kept", Value::Counter(2));

        let delta = diff(&prev, &curr);
        assert_eq!(delta, Snapshot::new().with("kept", Value::Counter(1)));
    }

    #[test]
    fn test_identical_snapshots_produce_empty_delta() {
        let snapshot = Snapshot::new()
            .with("hits", Value::Counter(100))
            .with("temp", Value::Gauge(21))
            .with("lat", dist(5, 50.0, 10.0, 2.0, 1.0, 20.0))
            .with("mode", Value::Label("primary".to_owned()));

        assert!(diff(&snapshot, &snapshot).is_empty());
    }
}
