//! Data model and storage traits for Foreman.
//!
//! This crate provides:
//! - Core types: [`Schedule`], [`Override`], [`Project`], [`DayMask`]
//! - Storage traits the scheduler is injected with: [`ScheduleStore`],
//!   [`OverrideStore`], [`ProjectDirectory`]
//! - An in-memory implementation ([`MemoryStore`]) used by the daemon
//!   and by tests

mod error;
mod memory;
mod store;
mod types;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use store::{OverrideStore, ProjectDirectory, ScheduleStore};
pub use types::{DayMask, Override, OverrideKind, Project, Schedule};
