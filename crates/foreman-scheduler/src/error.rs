//! Error types for the scheduler.

use thiserror::Error;

/// Errors that can occur in scheduler operations.
///
/// Per-schedule failures are isolated at every call site: one schedule's
/// error is logged and never blocks loading or firing of other schedules.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Store error (validation, unavailability).
    #[error(transparent)]
    Store(#[from] foreman_store::StoreError),

    /// A schedule's triggers could not be registered; the schedule is
    /// considered unloaded until the next reconciliation pass.
    #[error("trigger registration failed: {0}")]
    TriggerRegistration(String),

    /// The service's background loops were already started.
    #[error("scheduler service already started")]
    AlreadyStarted,
}
