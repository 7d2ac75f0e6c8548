use std::io;

use thiserror::Error as ThisError;

/// Errors that could occur while building or starting the exporter.
#[derive(Debug, ThisError)]
pub enum BuildError {
    /// The collector address could not be resolved to any socket address.
    #[error("invalid collector address: {reason}")]
    InvalidCollectorAddress {
        /// Details about the resolution failure.
        reason: String,
    },

    /// Binding or connecting the UDP socket failed.
    #[error("failed to open UDP socket: {0}")]
    Io(#[from] io::Error),

    /// Creating the background runtime or thread failed.
    #[error("failed to spawn Tokio runtime for exporter: {0}")]
    FailedToCreateRuntime(String),

    /// Another global recorder was already installed.
    #[error("failed to install recorder as global recorder")]
    FailedToInstall,
}

/// Reasons the exporter's background task ended, other than a requested stop.
#[derive(Debug, ThisError)]
pub enum ExporterError {
    /// The task panicked, most likely inside the snapshot source.
    #[error("exporter task panicked: {0}")]
    Panicked(String),

    /// The task was cancelled before it could finish, either through
    /// [`ExporterHandle::abort`](crate::ExporterHandle::abort) or because its runtime shut down.
    #[error("exporter task was cancelled")]
    Cancelled,
}
