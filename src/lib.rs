//! Periodically samples an in-process metrics store and pushes the changes to statsd.
//!
//! ## Basics
//!
//! `metrics-exporter-statsd-sampler` does not store metrics itself. On every tick it asks a
//! [`SnapshotSource`] for a point-in-time [`Snapshot`], works out what changed since the previous
//! tick, and sends those changes to a statsd collector over UDP.
//!
//! ## Behavior
//!
//! This exporter makes some explicit trade-offs to accomplish its task:
//!
//! - Counters are sent as the difference between two samples, and not at all when unchanged
//! - Gauges are sent as their current reading, only when it changed
//! - Distributions are sent as six lines (`mean`, `variance`, `count`, `sum`, `min`, `max`) with
//!   the count of new samples, only when the count changed
//! - Labels are never sent
//! - The first tick sends every metric with its full value, so counters that were already running
//!   show up as one large increment
//! - Each line is its own UDP datagram; nothing is batched, retried or acknowledged
//! - The time spent on a tick is subtracted from the following sleep
//!
//! ## Usage
//!
//! ```ignore
//! // Any closure returning a `Snapshot` can be sampled.
//! let source = || Snapshot::new().with("requests", Value::Counter(read_requests()));
//!
//! // Configure where to send metrics and how often, then start the exporter on a background
//! // task. If you're already inside a Tokio runtime, the task is spawned on that runtime;
//! // otherwise a single-threaded runtime is started on a background thread.
//! let handle = StatsdBuilder::new()
//!     .with_collector("127.0.0.1", 8125)?
//!     .set_flush_interval(Duration::from_secs(1))
//!     .set_global_prefix("myapp")
//!     .spawn(source)?;
//!
//! // Metrics recorded through the `metrics` facade can be sampled too.
//! let recorder_handle = SnapshotRecorder::new().install()?;
//! let other = StatsdBuilder::new().spawn(recorder_handle)?;
//!
//! // Stop the exporter and find out how it ended.
//! handle.stop();
//! handle.wait().await?;
//! ```
mod common;
pub use self::common::{BuildError, ExporterError};

mod snapshot;
pub use self::snapshot::{DeltaSample, DistributionStats, Snapshot, SnapshotSource, Value};

mod delta;
pub use self::delta::diff;

pub mod formatting;

mod transport;
pub use self::transport::{resolve, SendMode, Transport};

mod exporter;
pub use self::exporter::{ExporterHandle, ExporterStats};

mod builder;
pub use self::builder::StatsdBuilder;

mod recorder;
pub use self::recorder::{SnapshotRecorder, SnapshotRecorderHandle};
