//! Start/stop precedence decisions.
//!
//! "Latest stop wins": when a stop trigger fires for one schedule of a
//! project, the stop is suppressed if any other enabled schedule of the
//! same project is still inside its own window, or if a manual-start
//! override is active for the stopping schedule. A start is suppressed by
//! an active manual-stop override.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use foreman_store::{OverrideKind, Schedule, ScheduleStore};

use crate::{Clock, OverrideLedger, SchedulerError, window};

/// Outcome for a firing start trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartDecision {
    Proceed,
    /// A manual stop override is active until the given expiry.
    SuppressedByStopOverride(DateTime<Utc>),
}

/// Outcome for a firing stop trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopDecision {
    Proceed,
    /// Another schedule of the project is still inside its window.
    OtherWindowActive(Uuid),
    /// A manual start override is active until the given expiry.
    SuppressedByStartOverride(DateTime<Utc>),
}

/// Decides whether a firing trigger may act.
#[derive(Clone)]
pub struct PrecedenceResolver {
    schedules: Arc<dyn ScheduleStore>,
    ledger: OverrideLedger,
    clock: Arc<dyn Clock>,
}

impl PrecedenceResolver {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        ledger: OverrideLedger,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            schedules,
            ledger,
            clock,
        }
    }

    /// A start proceeds unless a manual stop override is active.
    pub async fn decide_start(&self, schedule: &Schedule) -> Result<StartDecision, SchedulerError> {
        if let Some(record) = self.ledger.active(schedule.id, OverrideKind::Stop).await? {
            return Ok(StartDecision::SuppressedByStopOverride(record.expires_at));
        }
        Ok(StartDecision::Proceed)
    }

    /// A stop proceeds unless another window of the project is still
    /// active or a manual start override is active.
    pub async fn decide_stop(&self, schedule: &Schedule) -> Result<StopDecision, SchedulerError> {
        self.ledger.purge_expired(schedule.id).await?;

        let now = self.clock.now();
        let siblings = self
            .schedules
            .list(Some(&schedule.project_name), true)
            .await?;
        if let Some(other) = siblings
            .iter()
            .find(|s| s.id != schedule.id && window::is_active(s, now))
        {
            return Ok(StopDecision::OtherWindowActive(other.id));
        }

        if let Some(record) = self.ledger.active(schedule.id, OverrideKind::Start).await? {
            return Ok(StopDecision::SuppressedByStartOverride(record.expires_at));
        }
        Ok(StopDecision::Proceed)
    }
}
