use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use portable_atomic::AtomicU64;
use quanta::Clock;
use tokio::sync::{oneshot, Notify};
use tokio::task::{AbortHandle, JoinError};
use tracing::{debug, error, trace, warn};

use crate::common::ExporterError;
use crate::delta::diff;
use crate::formatting::{encode, Namespace};
use crate::snapshot::{DeltaSample, Snapshot, SnapshotSource};
use crate::transport::{SendMode, Transport};

/// Running totals kept by the exporter's background task.
#[derive(Debug, Default)]
pub struct ExporterStats {
    cycles: AtomicU64,
    datagrams_sent: AtomicU64,
    send_failures: AtomicU64,
    overruns: AtomicU64,
}

impl ExporterStats {
    /// Number of completed sample/diff/flush cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Number of datagrams handed to the socket successfully.
    pub fn datagrams_sent(&self) -> u64 {
        self.datagrams_sent.load(Ordering::Relaxed)
    }

    /// Number of datagrams whose send call failed.
    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }

    /// Number of cycles that took at least the whole flush interval.
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
pub(crate) struct Shutdown {
    requested: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    fn request(&self) {
        self.requested.store(true, Ordering::Release);
        // `notify_one` stores a permit if the loop isn't currently waiting.
        self.notify.notify_one();
    }

    fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// Sends delta samples to the collector, one datagram per line.
struct Flusher {
    transport: Transport,
    namespace: Namespace,
    stats: Arc<ExporterStats>,
}

impl Flusher {
    async fn flush(&self, delta: &DeltaSample) {
        let mut sent = 0;
        let mut failed = 0;

        for (name, value) in delta.iter() {
            for line in encode(name, value, &self.namespace) {
                match self.transport.send(&line).await {
                    Ok(_) => sent += 1,
                    Err(e) => {
                        // we just log the error here because we can just skip sending one
                        // datagram and try sending the other ones anyway
                        failed += 1;
                        if self.transport.mode() == SendMode::Debug {
                            eprintln!("ERROR: Couldn't send packet: {}", e);
                        }
                        error!(error = %e, line = %line, "error sending datagram to statsd");
                    }
                }
            }
        }

        self.stats.datagrams_sent.fetch_add(sent, Ordering::Relaxed);
        self.stats.send_failures.fetch_add(failed, Ordering::Relaxed);
        trace!(metrics = delta.len(), sent, failed, "flushed delta sample");
    }
}

/// The sample-diff-flush loop. Owns the socket and the previous snapshot.
pub(crate) struct SyncLoop<S> {
    source: S,
    flusher: Flusher,
    interval: Duration,
    clock: Clock,
    shutdown: Arc<Shutdown>,
}

impl<S> SyncLoop<S>
where
    S: SnapshotSource,
{
    pub(crate) fn new(
        source: S,
        transport: Transport,
        namespace: Namespace,
        interval: Duration,
        clock: Clock,
    ) -> Self {
        SyncLoop {
            source,
            flusher: Flusher {
                transport,
                namespace,
                stats: Arc::new(ExporterStats::default()),
            },
            interval,
            clock,
            shutdown: Arc::new(Shutdown::default()),
        }
    }

    pub(crate) fn shutdown(&self) -> Arc<Shutdown> {
        self.shutdown.clone()
    }

    pub(crate) fn stats(&self) -> Arc<ExporterStats> {
        self.flusher.stats.clone()
    }

    /// Runs until a stop is requested. Cancelling the future drops the socket.
    pub(crate) async fn run(self) {
        let SyncLoop {
            source,
            flusher,
            interval,
            clock,
            shutdown,
        } = self;

        debug!(
            endpoint = %flusher.transport.endpoint(),
            ?interval,
            debug = flusher.transport.mode() == SendMode::Debug,
            "starting statsd exporter"
        );

        let mut previous = Snapshot::new();
        loop {
            if shutdown.is_requested() {
                break;
            }

            let start = clock.now();
            let current = source.sample();
            let delta = diff(&previous, &current);
            flusher.flush(&delta).await;
            let elapsed = clock.now().saturating_duration_since(start);

            previous = current;
            flusher.stats.cycles.fetch_add(1, Ordering::Relaxed);

            // If the cycle took longer than the interval, we don't sleep at all, but still give
            // the runtime a chance to run other tasks before starting the next one.
            let remaining = interval.saturating_sub(elapsed);
            if remaining.is_zero() {
                flusher.stats.overruns.fetch_add(1, Ordering::Relaxed);
                warn!(
                    ?elapsed,
                    ?interval,
                    "statsd flush took longer than the flush interval"
                );
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = shutdown.notify.notified() => {}
            }
        }

        debug!("statsd exporter stopped");
    }
}

/// Handle to a running exporter.
///
/// Dropping the handle does not stop the exporter; use [`stop`][ExporterHandle::stop] or
/// [`abort`][ExporterHandle::abort].
pub struct ExporterHandle {
    shutdown: Arc<Shutdown>,
    stats: Arc<ExporterStats>,
    abort: AbortHandle,
    outcome: oneshot::Receiver<Result<(), ExporterError>>,
}

impl ExporterHandle {
    pub(crate) fn new(
        shutdown: Arc<Shutdown>,
        stats: Arc<ExporterStats>,
        abort: AbortHandle,
        outcome: oneshot::Receiver<Result<(), ExporterError>>,
    ) -> Self {
        ExporterHandle {
            shutdown,
            stats,
            abort,
            outcome,
        }
    }

    /// Asks the exporter to stop.
    ///
    /// A cycle that is already sending finishes first; a pending sleep is cut short. The task then
    /// ends with `Ok(())`.
    pub fn stop(&self) {
        self.shutdown.request();
    }

    /// Cancels the exporter immediately, even in the middle of a cycle.
    ///
    /// The task ends with [`ExporterError::Cancelled`].
    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn stats(&self) -> &ExporterStats {
        &self.stats
    }

    /// Returns how the exporter ended, or `None` if it is still running.
    pub fn try_outcome(&mut self) -> Option<Result<(), ExporterError>> {
        match self.outcome.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(ExporterError::Cancelled)),
        }
    }

    /// Waits for the exporter to end.
    pub async fn wait(self) -> Result<(), ExporterError> {
        self.outcome.await.unwrap_or(Err(ExporterError::Cancelled))
    }

    /// Blocks the current thread until the exporter ends.
    ///
    /// ## Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn blocking_wait(self) -> Result<(), ExporterError> {
        self.outcome
            .blocking_recv()
            .unwrap_or(Err(ExporterError::Cancelled))
    }
}

pub(crate) fn join_outcome(result: Result<(), JoinError>) -> Result<(), ExporterError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            error!(panic = %message, "statsd exporter task panicked");
            Err(ExporterError::Panicked(message))
        }
        Err(_) => Err(ExporterError::Cancelled),
    }
}

fn panic_message(payload: Box<dyn Any + Send + 'static>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
