//! Agent worker process contract for Foreman.
//!
//! The scheduler only ever talks to a worker through the
//! [`ProcessController`] trait: start with options, stop, observe status.
//! Status is published through a `watch` channel so crash detection is an
//! explicit subscription with a deterministic release point (drop the
//! receiver or abort the task holding it).
//!
//! [`LocalController`] is the shipped implementation: it spawns a
//! configured command per project and tracks its exit.

mod controller;
mod error;
mod local;

pub use controller::{
    AgentStatus, ControllerRegistry, ProcessController, StartOptions, StaticRegistry,
};
pub use error::ProcessError;
pub use local::LocalController;
