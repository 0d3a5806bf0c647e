//! Crash recovery with bounded exponential backoff.
//!
//! When an agent process dies without being asked to, the crash is
//! attributed to the first enabled schedule of the project whose window is
//! currently active. That schedule's crash count funds a bounded number of
//! restart attempts per window; once exhausted, the next schedule with an
//! active window is considered instead. Outside any window the crash is
//! logged and the agent stays down until the next start trigger.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use foreman_store::{Schedule, ScheduleStore};

use crate::{AgentSupervisor, Clock, SchedulerConfig, SchedulerError, window};

pub struct CrashRecoveryController {
    schedules: Arc<dyn ScheduleStore>,
    supervisor: Arc<AgentSupervisor>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl CrashRecoveryController {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        supervisor: Arc<AgentSupervisor>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            schedules,
            supervisor,
            clock,
            config,
        }
    }

    /// React to a crash of the project's agent. Returns once the restart
    /// has been attempted, abandoned, or cancelled by shutdown.
    pub async fn handle_crash(
        &self,
        project: &str,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SchedulerError> {
        let Some(schedule) = self.eligible_schedule(project).await? else {
            info!(project, "crash outside any active window, leaving agent down");
            return Ok(());
        };

        let attempt = schedule.crash_count + 1;
        self.schedules
            .update_crash_count(schedule.id, attempt)
            .await?;

        let delay = self.config.backoff_delay(attempt);
        warn!(
            project,
            schedule_id = %schedule.id,
            attempt,
            delay_secs = delay.as_secs(),
            "agent crashed, scheduling restart"
        );

        // The backoff sleep is deliberately outside the project lock so a
        // stop trigger firing meanwhile is not stalled behind it.
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                info!(project, "shutdown during crash backoff, abandoning restart");
                return Ok(());
            }
        }

        let lock = self.supervisor.project_lock(project);
        let _guard = lock.lock().await;

        // Revalidate: the window may have closed or the schedule changed
        // while we slept.
        match self.schedules.get(schedule.id).await? {
            Some(current) if current.enabled && window::is_active(&current, self.clock.now()) => {
                info!(project, schedule_id = %current.id, attempt, "restarting crashed agent");
                self.supervisor.activate(&current).await;
            }
            Some(_) => {
                info!(
                    project,
                    schedule_id = %schedule.id,
                    "window no longer active after backoff, not restarting"
                );
            }
            None => {
                info!(
                    project,
                    schedule_id = %schedule.id,
                    "schedule removed during backoff, not restarting"
                );
            }
        }
        Ok(())
    }

    /// The first enabled schedule of the project with an active window and
    /// retries left. Schedules with exhausted retries are skipped so an
    /// overlapping sibling can still fund a restart.
    async fn eligible_schedule(&self, project: &str) -> Result<Option<Schedule>, SchedulerError> {
        let now = self.clock.now();
        for schedule in self.schedules.list(Some(project), true).await? {
            if !window::is_active(&schedule, now) {
                continue;
            }
            if schedule.crash_count >= self.config.max_crash_retries {
                error!(
                    project,
                    schedule_id = %schedule.id,
                    crash_count = schedule.crash_count,
                    "restart attempts exhausted for this window"
                );
                continue;
            }
            return Ok(Some(schedule));
        }
        Ok(None)
    }
}
