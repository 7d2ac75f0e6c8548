use std::fmt;

use tracing::debug;

use crate::snapshot::{DistributionStats, Value};

// <PREFIX.><METRIC_NAME><.SUFFIX><.SUB_NAME>:<VALUE>|<TYPE>
//
// One line per datagram, no trailing newline. TYPE is `c` for counters and `g` for gauges.

/// Statsd metric type suffix.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::Counter => "c",
            MetricType::Gauge => "g",
        }
    }
}

/// A numeric value as it is written on the wire.
///
/// Integers are written in plain decimal. Floats use the shortest decimal form that round-trips
/// back to the same `f64`, never in exponent notation, so `50.0` is written as `50` and `0.1` as
/// `0.1`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricValue {
    Integer(i64),
    Float(f64),
}

impl MetricValue {
    fn is_finite(self) -> bool {
        match self {
            MetricValue::Integer(_) => true,
            MetricValue::Float(v) => v.is_finite(),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Integer(v) => write!(f, "{}", v),
            MetricValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// The global prefix and suffix wrapped around every metric name.
///
/// Empty segments are dropped together with their dot, so a prefix of `app` and no suffix turns
/// `requests` into `app.requests`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Namespace {
    dotted_prefix: String,
    dotted_suffix: String,
}

impl Namespace {
    pub fn new(prefix: &str, suffix: &str) -> Self {
        let dotted_prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}.", prefix)
        };
        let dotted_suffix = if suffix.is_empty() {
            String::new()
        } else {
            format!(".{}", suffix)
        };
        Namespace {
            dotted_prefix,
            dotted_suffix,
        }
    }

    pub fn full_name(&self, name: &str) -> String {
        let mut out =
            String::with_capacity(self.dotted_prefix.len() + name.len() + self.dotted_suffix.len());
        out.push_str(&self.dotted_prefix);
        out.push_str(name);
        out.push_str(&self.dotted_suffix);
        out
    }
}

/// Encodes a single metric into the statsd lines that should be sent for it.
///
/// Counters and gauges produce one line, labels produce none, and distributions expand into six
/// lines: `mean`, `variance`, `count`, `sum`, `min` and `max`, in that order. A float that is not
/// finite cannot be parsed by statsd, so the line carrying it is left out.
pub fn encode(name: &str, value: &Value, namespace: &Namespace) -> Vec<String> {
    let full_name = namespace.full_name(name);
    let mut lines = Vec::new();

    match value {
        Value::Counter(n) => push_line(
            &mut lines,
            &full_name,
            None,
            MetricValue::Integer(*n),
            MetricType::Counter,
        ),
        Value::Gauge(n) => push_line(
            &mut lines,
            &full_name,
            None,
            MetricValue::Integer(*n),
            MetricType::Gauge,
        ),
        Value::Label(_) => {}
        Value::Distribution(stats) => encode_distribution(&mut lines, &full_name, stats),
    }

    lines
}

fn encode_distribution(lines: &mut Vec<String>, full_name: &str, stats: &DistributionStats) {
    let fields = [
        ("mean", MetricValue::Float(stats.mean), MetricType::Gauge),
        ("variance", MetricValue::Float(stats.variance), MetricType::Gauge),
        ("count", MetricValue::Integer(stats.count), MetricType::Counter),
        ("sum", MetricValue::Float(stats.sum), MetricType::Gauge),
        ("min", MetricValue::Float(stats.min), MetricType::Gauge),
        ("max", MetricValue::Float(stats.max), MetricType::Gauge),
    ];

    for (sub_name, value, mtype) in fields {
        push_line(lines, full_name, Some(sub_name), value, mtype);
    }
}

fn push_line(
    lines: &mut Vec<String>,
    full_name: &str,
    sub_name: Option<&str>,
    value: MetricValue,
    mtype: MetricType,
) {
    if !value.is_finite() {
        debug!(
            metric = full_name,
            field = sub_name.unwrap_or(""),
            "skipping non-finite value"
        );
        return;
    }

    let mut buffer = String::new();
    write_metric_line(&mut buffer, full_name, sub_name, value, mtype);
    lines.push(buffer);
}

/// Appends one statsd line to `buffer`, without a trailing newline.
pub fn write_metric_line<T>(
    buffer: &mut String,
    full_name: &str,
    sub_name: Option<&str>,
    value: T,
    mtype: MetricType,
) where
    T: fmt::Display,
{
    buffer.push_str(full_name);

    if let Some(sub) = sub_name {
        buffer.push('.');
        buffer.push_str(sub);
    }

    buffer.push(':');
    buffer.push_str(value.to_string().as_str());
    buffer.push('|');
    buffer.push_str(mtype.as_str());
}

/// Sanitizes a metric name coming from the `metrics` facade.
///
/// - Metric names must start with a letter or an underscore.
/// - Metric names must only contain ASCII alphanumerics, underscores, and periods.
/// - Other characters, including spaces and the `:`/`|` separators, are converted to underscores.
pub fn sanitize_metric_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut is_invalid: fn(char) -> bool = invalid_metric_name_start_character;
    for c in name.chars() {
        if is_invalid(c) {
            out.push('_');
        } else {
            out.push(c);
        }
        is_invalid = invalid_metric_name_character;
    }
    out
}

/// Sanitizes a single dot-delimited segment, such as a label value appended to a name.
pub fn sanitize_metric_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        if invalid_metric_segment_character(c) {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out
}

#[inline]
fn invalid_metric_name_start_character(c: char) -> bool {
    // Essentially, needs to match the regex pattern of [a-zA-Z_].
    !(c.is_ascii_alphabetic() || c == '_')
}

#[inline]
fn invalid_metric_name_character(c: char) -> bool {
    // Essentially, needs to match the regex pattern of [a-zA-Z0-9_.].
    !(c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

#[inline]
fn invalid_metric_segment_character(c: char) -> bool {
    // Essentially, needs to match the regex pattern of [a-zA-Z0-9_].
    !(c.is_ascii_alphanumeric() || c == '_')
}
