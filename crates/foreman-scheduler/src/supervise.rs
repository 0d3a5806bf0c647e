//! Agent activation and deactivation.
//!
//! The one place that talks to the process controllers. Activation
//! subscribes a monitor task to the controller's status channel so crashes
//! are reported back to the scheduler; the subscription is released
//! deterministically on deactivation, on start failure, or when the crash
//! fires. Also owns the per-project locks that serialize start/stop
//! decisions for the same project.

use std::sync::Arc;

use dashmap::DashMap;
use foreman_process::{AgentStatus, ControllerRegistry, StartOptions};
use foreman_store::Schedule;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Starts and stops agent workers and watches them for crashes.
pub struct AgentSupervisor {
    controllers: Arc<dyn ControllerRegistry>,
    crash_tx: mpsc::Sender<String>,
    monitors: DashMap<String, JoinHandle<()>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AgentSupervisor {
    pub fn new(controllers: Arc<dyn ControllerRegistry>, crash_tx: mpsc::Sender<String>) -> Self {
        Self {
            controllers,
            crash_tx,
            monitors: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// The mutex serializing decisions for one project. Triggers for
    /// different projects proceed concurrently; a stop decision must never
    /// race a start decision for the same project.
    pub fn project_lock(&self, project: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(project.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Start the project's agent with the schedule's options. Already-live
    /// agents and unknown projects are benign skips; a start failure is
    /// logged and releases the crash subscription.
    pub async fn activate(&self, schedule: &Schedule) {
        let project = schedule.project_name.as_str();
        let Some(controller) = self.controllers.controller(project) else {
            warn!(project, "no controller registered, skipping activation");
            return;
        };
        if controller.status().await.is_live() {
            info!(project, "agent already running, skipping scheduled start");
            return;
        }

        // Subscribe before starting so an immediate crash is not missed.
        self.watch_for_crashes(project, controller.watch_status());

        let options = StartOptions {
            yolo_mode: schedule.yolo_mode,
            model: schedule.model.clone(),
            max_concurrency: schedule.max_concurrency,
        };
        info!(
            project,
            schedule_id = %schedule.id,
            yolo = options.yolo_mode,
            concurrency = options.max_concurrency,
            "starting agent"
        );
        match controller.start(options).await {
            Ok(()) => info!(project, "agent started"),
            Err(e) => {
                // Not a crash: start failures never touch crash_count.
                error!(project, error = %e, "failed to start agent");
                self.release_monitor(project);
            }
        }
    }

    /// Stop the project's agent. Not-running and unknown projects are
    /// benign skips.
    pub async fn deactivate(&self, project: &str) {
        let Some(controller) = self.controllers.controller(project) else {
            warn!(project, "no controller registered, skipping deactivation");
            return;
        };

        // The scheduled kill must not be reported as a crash.
        self.release_monitor(project);

        if !controller.status().await.is_live() {
            info!(project, "agent not running, skipping scheduled stop");
            return;
        }
        match controller.stop().await {
            Ok(()) => info!(project, "agent stopped"),
            Err(e) => error!(project, error = %e, "failed to stop agent"),
        }
    }

    /// Spawn a monitor that reports the first crash to the recovery
    /// channel, replacing any previous monitor for the project.
    fn watch_for_crashes(
        &self,
        project: &str,
        mut status_rx: tokio::sync::watch::Receiver<AgentStatus>,
    ) {
        let crash_tx = self.crash_tx.clone();
        let name = project.to_string();
        let handle = tokio::spawn(async move {
            loop {
                if *status_rx.borrow_and_update() == AgentStatus::Crashed {
                    info!(project = %name, "crash detected, notifying recovery");
                    if crash_tx.send(name.clone()).await.is_err() {
                        debug!(project = %name, "recovery channel closed");
                    }
                    break;
                }
                if status_rx.changed().await.is_err() {
                    break;
                }
            }
        });
        if let Some(previous) = self.monitors.insert(project.to_string(), handle) {
            previous.abort();
        }
    }

    /// Drop the crash subscription for a project, if any.
    pub fn release_monitor(&self, project: &str) {
        if let Some((_, handle)) = self.monitors.remove(project) {
            handle.abort();
        }
    }

    /// Abort all monitors (scheduler shutdown).
    pub fn shutdown(&self) {
        for entry in self.monitors.iter() {
            entry.value().abort();
        }
        self.monitors.clear();
    }
}
