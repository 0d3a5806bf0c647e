//! Window-based agent scheduler for Foreman.
//!
//! Starts and stops long-running agent worker processes per project on
//! recurring daily windows (start time + duration + day-of-week mask, all
//! UTC), tolerating crashes and manual human overrides:
//!
//! - [`window`] decides whether an instant falls inside a schedule's
//!   recurring window, including midnight-crossing windows
//! - [`TriggerEngine`] fires start/stop events at wall-clock time with a
//!   bounded misfire grace
//! - [`OverrideLedger`] records manual start/stop overrides that suppress
//!   the conflicting automatic action until the window ends
//! - [`PrecedenceResolver`] implements latest-stop-wins across overlapping
//!   schedules of one project
//! - [`CrashRecoveryController`] restarts crashed agents with bounded
//!   exponential backoff
//! - [`Reconciler`] resumes in-progress windows after a scheduler restart
//! - [`SchedulerService`] composes the above behind one handle

mod clock;
mod config;
mod error;
mod overrides;
mod precedence;
mod reconcile;
mod recovery;
mod service;
mod supervise;
mod triggers;
pub mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use overrides::OverrideLedger;
pub use precedence::{PrecedenceResolver, StartDecision, StopDecision};
pub use reconcile::Reconciler;
pub use recovery::CrashRecoveryController;
pub use service::SchedulerService;
pub use supervise::AgentSupervisor;
pub use triggers::{TriggerEngine, TriggerEvent, TriggerKind};
