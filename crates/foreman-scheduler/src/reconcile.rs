//! Startup reconciliation.
//!
//! A scheduler restart can land in the middle of a window: the trigger for
//! it already fired (or never will, because the process was down). On
//! startup every known project is checked once; if an enabled schedule's
//! window is currently active and no manual stop override blocks it, the
//! agent is started as if the trigger had just fired. A failure for one
//! project never blocks reconciliation of the others.

use std::sync::Arc;

use tracing::{error, info};

use foreman_store::{OverrideKind, ProjectDirectory, ScheduleStore};

use crate::{AgentSupervisor, Clock, OverrideLedger, SchedulerError, window};

pub struct Reconciler {
    schedules: Arc<dyn ScheduleStore>,
    projects: Arc<dyn ProjectDirectory>,
    ledger: OverrideLedger,
    supervisor: Arc<AgentSupervisor>,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        projects: Arc<dyn ProjectDirectory>,
        ledger: OverrideLedger,
        supervisor: Arc<AgentSupervisor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            schedules,
            projects,
            ledger,
            supervisor,
            clock,
        }
    }

    /// Resume in-progress windows for every project. Returns the number of
    /// agents started.
    pub async fn run(&self) -> Result<usize, SchedulerError> {
        let projects = self.projects.list_projects().await?;
        info!(projects = projects.len(), "reconciling agents with active windows");

        let mut started = 0;
        for project in &projects {
            match self.reconcile_project(&project.name).await {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(project = %project.name, error = %e, "reconciliation failed");
                }
            }
        }
        info!(started, "reconciliation complete");
        Ok(started)
    }

    /// Start the project's agent if some enabled schedule's window is
    /// active right now. Schedules held down by a manual stop override are
    /// skipped; scanning stops at the first activation.
    async fn reconcile_project(&self, project: &str) -> Result<bool, SchedulerError> {
        let now = self.clock.now();
        for schedule in self.schedules.list(Some(project), true).await? {
            if !window::is_active(&schedule, now) {
                continue;
            }
            if let Some(record) = self.ledger.active(schedule.id, OverrideKind::Stop).await? {
                info!(
                    project,
                    schedule_id = %schedule.id,
                    expires_at = %record.expires_at,
                    "active window but manual stop override in force, skipping"
                );
                continue;
            }
            info!(
                project,
                schedule_id = %schedule.id,
                "window active at startup, starting agent"
            );
            self.supervisor.activate(&schedule).await;
            return Ok(true);
        }
        Ok(false)
    }
}
