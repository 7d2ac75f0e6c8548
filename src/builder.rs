use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use quanta::Clock;
use tokio::runtime;
use tokio::sync::oneshot;

use crate::common::BuildError;
use crate::exporter::{join_outcome, ExporterHandle, SyncLoop};
use crate::formatting::Namespace;
use crate::snapshot::SnapshotSource;
use crate::transport::{resolve, SendMode, Transport};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8125;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(1000);

/// Builder for configuring and starting a statsd exporter.
#[derive(Clone, Debug)]
pub struct StatsdBuilder {
    host: String,
    port: u16,
    endpoint: Option<SocketAddr>,
    flush_interval: Duration,
    debug: bool,
    prefix: String,
    suffix: String,
}

impl StatsdBuilder {
    /// Creates a new [`StatsdBuilder`].
    ///
    /// Defaults to sending to `127.0.0.1:8125` once per second, with no prefix or suffix.
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            endpoint: None,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            debug: false,
            prefix: String::new(),
            suffix: String::new(),
        }
    }

    /// Sets the statsd collector to send to, resolving it right away.
    ///
    /// ## Errors
    ///
    /// If `host` and `port` do not resolve to at least one socket address, an error variant will
    /// be returned describing the error.
    pub fn with_collector<H>(mut self, host: H, port: u16) -> Result<Self, BuildError>
    where
        H: Into<String>,
    {
        self.host = host.into();
        self.port = port;
        self.endpoint = Some(resolve(&self.host, self.port)?);
        Ok(self)
    }

    /// Sets the collector host, keeping the current port. Resolution happens when the exporter is
    /// spawned.
    #[must_use]
    pub fn with_host<H>(mut self, host: H) -> Self
    where
        H: Into<String>,
    {
        self.host = host.into();
        self.endpoint = None;
        self
    }

    /// Sets the collector port, keeping the current host. Resolution happens when the exporter is
    /// spawned.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self.endpoint = None;
        self
    }

    /// Sets the target period between two flushes.
    ///
    /// The time spent sampling and sending is subtracted from the following sleep. When a cycle
    /// takes longer than the interval, the next one starts right away.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn set_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Enables debug mode.
    ///
    /// The socket gets connected to the collector so that send errors are reported, and every
    /// outgoing line as well as every send failure is written to stderr.
    #[must_use]
    pub fn set_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Adds a global prefix for every metric name.
    ///
    /// Its intended use is to introduce a configurable namespace for every metric generated by the
    /// application such that different deployments can operate on their own family of metrics
    /// without overlap.
    #[must_use]
    pub fn set_global_prefix<P>(mut self, prefix: P) -> Self
    where
        P: Into<String>,
    {
        self.prefix = prefix.into();
        self
    }

    /// Adds a global suffix for every metric name, such as a host name.
    #[must_use]
    pub fn set_global_suffix<S>(mut self, suffix: S) -> Self
    where
        S: Into<String>,
    {
        self.suffix = suffix.into();
        self
    }

    /// Starts the exporter on a background task, sampling `source` once per flush interval.
    ///
    /// When called from within a Tokio runtime, the exporter is spawned directly into the runtime.
    /// Otherwise, a new single-threaded Tokio runtime is created on a background thread, and the
    /// exporter is spawned there.
    ///
    /// ## Errors
    ///
    /// If the collector address does not resolve, the socket cannot be opened, or the background
    /// runtime cannot be created, an error variant will be returned and nothing is started.
    pub fn spawn<S>(self, source: S) -> Result<ExporterHandle, BuildError>
    where
        S: SnapshotSource,
    {
        self.spawn_with_clock(source, Clock::new())
    }

    pub(crate) fn spawn_with_clock<S>(
        self,
        source: S,
        clock: Clock,
    ) -> Result<ExporterHandle, BuildError>
    where
        S: SnapshotSource,
    {
        let endpoint = match self.endpoint {
            Some(endpoint) => endpoint,
            None => resolve(&self.host, self.port)?,
        };
        let mode = if self.debug {
            SendMode::Debug
        } else {
            SendMode::Normal
        };
        let namespace = Namespace::new(&self.prefix, &self.suffix);
        let interval = self.flush_interval;

        let build_loop = move || -> Result<_, BuildError> {
            let transport = Transport::open(endpoint, mode)?;
            Ok(SyncLoop::new(source, transport, namespace, interval, clock))
        };

        let (tx, rx) = oneshot::channel();

        if let Ok(handle) = runtime::Handle::try_current() {
            let sync_loop = {
                let _g = handle.enter();
                build_loop()?
            };
            let shutdown = sync_loop.shutdown();
            let stats = sync_loop.stats();

            let task = handle.spawn(sync_loop.run());
            let abort = task.abort_handle();
            handle.spawn(async move {
                let _ = tx.send(join_outcome(task.await));
            });

            Ok(ExporterHandle::new(shutdown, stats, abort, rx))
        } else {
            let runtime = runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

            let sync_loop = {
                let _g = runtime.enter();
                build_loop()?
            };
            let shutdown = sync_loop.shutdown();
            let stats = sync_loop.stats();

            let task = runtime.spawn(sync_loop.run());
            let abort = task.abort_handle();

            thread::Builder::new()
                .name("statsd-exporter".to_owned())
                .spawn(move || {
                    let outcome = runtime.block_on(task);
                    let _ = tx.send(join_outcome(outcome));
                })
                .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

            Ok(ExporterHandle::new(shutdown, stats, abort, rx))
        }
    }
}

impl Default for StatsdBuilder {
    fn default() -> Self {
        StatsdBuilder::new()
    }
}
