//! Error types for process control.

use thiserror::Error;

/// Errors that can occur controlling a worker process.
///
/// These are observed-and-logged by the scheduler, never fatal to it, and
/// never counted as crashes (crash accounting is reserved for post-start
/// exit signals).
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The worker is already running or paused.
    #[error("agent already running")]
    AlreadyRunning,

    /// There is no running worker to stop.
    #[error("agent not running")]
    NotRunning,

    /// The worker binary could not be spawned.
    #[error("failed to spawn agent: {0}")]
    Spawn(String),

    /// The worker did not exit within the stop timeout.
    #[error("agent did not stop within {0} seconds")]
    StopTimeout(u64),
}
