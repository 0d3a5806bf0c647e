//! Storage traits the scheduler is injected with.
//!
//! The scheduler holds no authoritative copy of schedules or overrides
//! beyond what it just read; the store is shared with the external
//! management API, so implementations must tolerate concurrent edits.
//! "Not found" is a benign no-op throughout, never an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{Override, OverrideKind, Project, Schedule, StoreError};

/// Access to schedule rows.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// List schedules, optionally filtered by project and enabled flag.
    /// Ordering is stable (creation order) so first-match scans are
    /// deterministic.
    async fn list(
        &self,
        project: Option<&str>,
        enabled_only: bool,
    ) -> Result<Vec<Schedule>, StoreError>;

    /// Fetch a single schedule.
    async fn get(&self, id: Uuid) -> Result<Option<Schedule>, StoreError>;

    /// Persist a new crash count. Missing schedules are a no-op.
    async fn update_crash_count(&self, id: Uuid, crash_count: u32) -> Result<(), StoreError>;

    /// Insert or replace a schedule. Validates before writing so malformed
    /// schedules are rejected at the boundary.
    async fn upsert(&self, schedule: Schedule) -> Result<(), StoreError>;

    /// Delete a schedule, cascading its overrides.
    async fn remove(&self, id: Uuid) -> Result<(), StoreError>;
}

/// Access to manual override rows.
#[async_trait]
pub trait OverrideStore: Send + Sync {
    /// Atomically delete any existing override of this schedule + kind and
    /// insert a new one expiring at `expires_at`. Both steps commit
    /// together so two concurrent manual actions can't leave duplicate
    /// unexpired overrides.
    async fn replace(
        &self,
        schedule_id: Uuid,
        kind: OverrideKind,
        expires_at: DateTime<Utc>,
    ) -> Result<Override, StoreError>;

    /// The unexpired override of this schedule + kind, if any.
    async fn active(
        &self,
        schedule_id: Uuid,
        kind: OverrideKind,
        now: DateTime<Utc>,
    ) -> Result<Option<Override>, StoreError>;

    /// Delete overrides of this schedule whose expiry has passed.
    /// Returns the number deleted.
    async fn purge_expired(&self, schedule_id: Uuid, now: DateTime<Utc>)
    -> Result<usize, StoreError>;

    /// Delete all overrides of a schedule (cascade on schedule deletion).
    async fn remove_for_schedule(&self, schedule_id: Uuid) -> Result<usize, StoreError>;
}

/// Source of registered projects, consulted at startup reconciliation and
/// schedule (re)loading.
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<Project>, StoreError>;
}
