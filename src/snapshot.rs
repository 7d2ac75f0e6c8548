use indexmap::IndexMap;

/// Summary statistics of a distribution, accumulated since some reset point inside the source.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DistributionStats {
    pub count: i64,
    pub sum: f64,
    pub mean: f64,
    pub variance: f64,
    pub min: f64,
    pub max: f64,
}

/// The value of a single metric at the time a [`Snapshot`] was taken.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Cumulative count. Transmitted as the change since the previous sample.
    Counter(i64),
    /// Instantaneous reading. Transmitted as-is whenever it changes.
    Gauge(i64),
    /// Opaque string state. Never transmitted.
    Label(String),
    /// Summary statistics. Transmitted with a delta count and raw everything else.
    Distribution(DistributionStats),
}

impl Value {
    pub(crate) fn kind_str(&self) -> &'static str {
        match self {
            Value::Counter(_) => "counter",
            Value::Gauge(_) => "gauge",
            Value::Label(_) => "label",
            Value::Distribution(_) => "distribution",
        }
    }
}

/// A point-in-time mapping from metric name to [`Value`].
///
/// Names are unique within a snapshot. Insertion order is kept so that anything rendered from a
/// snapshot comes out in a stable order, but it carries no other meaning.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    metrics: IndexMap<String, Value>,
}

/// The subset of a snapshot that should be transmitted in a given cycle.
pub type DeltaSample = Snapshot;

impl Snapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a metric, replacing any previous value under the same name.
    pub fn insert<N>(&mut self, name: N, value: Value) -> Option<Value>
    where
        N: Into<String>,
    {
        self.metrics.insert(name.into(), value)
    }

    /// Builder-style variant of [`insert`][Self::insert].
    #[must_use]
    pub fn with<N>(mut self, name: N, value: Value) -> Self
    where
        N: Into<String>,
    {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.metrics.get(name)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.metrics.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<N> FromIterator<(N, Value)> for Snapshot
where
    N: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, Value)>>(iter: I) -> Self {
        let metrics = iter
            .into_iter()
            .map(|(name, value)| (name.into(), value))
            .collect();
        Snapshot { metrics }
    }
}

impl IntoIterator for Snapshot {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.metrics.into_iter()
    }
}

/// Something that can produce a fully materialized [`Snapshot`] of a metrics store on demand.
///
/// The exporter calls [`sample`][SnapshotSource::sample] once per cycle from its background
/// task. Implementations must return a consistent view even while other parts of the
/// application update the store concurrently.
pub trait SnapshotSource: Send + 'static {
    fn sample(&self) -> Snapshot;
}

impl<F> SnapshotSource for F
where
    F: Fn() -> Snapshot + Send + 'static,
{
    fn sample(&self) -> Snapshot {
        self()
    }
}
