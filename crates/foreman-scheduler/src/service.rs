//! Scheduler service.
//!
//! The composition root: wires the trigger engine, supervisor, precedence
//! resolver, crash recovery and reconciler together behind one handle. The
//! daemon constructs one, calls [`SchedulerService::start`], and calls
//! [`SchedulerService::shutdown`] on its way out.
//!
//! Trigger handling for one project is serialized through the supervisor's
//! per-project lock; triggers for different projects are handled
//! concurrently.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use foreman_process::ControllerRegistry;
use foreman_store::{
    Override, OverrideKind, OverrideStore, ProjectDirectory, Schedule, ScheduleStore,
};

use crate::{
    AgentSupervisor, Clock, CrashRecoveryController, OverrideLedger, PrecedenceResolver,
    Reconciler, SchedulerConfig, SchedulerError, StartDecision, StopDecision, TriggerEngine,
    TriggerEvent, TriggerKind, window,
};

/// Capacity of the crash notification channel.
const CRASH_QUEUE_SIZE: usize = 16;

pub struct SchedulerService {
    schedules: Arc<dyn ScheduleStore>,
    projects: Arc<dyn ProjectDirectory>,
    ledger: OverrideLedger,
    resolver: PrecedenceResolver,
    supervisor: Arc<AgentSupervisor>,
    engine: Arc<TriggerEngine>,
    recovery: Arc<CrashRecoveryController>,
    clock: Arc<dyn Clock>,
    shutdown_tx: watch::Sender<bool>,
    events_rx: Mutex<Option<mpsc::Receiver<TriggerEvent>>>,
    crash_rx: Mutex<Option<mpsc::Receiver<String>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SchedulerService {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        overrides: Arc<dyn OverrideStore>,
        projects: Arc<dyn ProjectDirectory>,
        controllers: Arc<dyn ControllerRegistry>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let (crash_tx, crash_rx) = mpsc::channel(CRASH_QUEUE_SIZE);
        let (shutdown_tx, _) = watch::channel(false);
        let supervisor = Arc::new(AgentSupervisor::new(controllers, crash_tx));
        let ledger = OverrideLedger::new(overrides, clock.clone());
        let resolver =
            PrecedenceResolver::new(schedules.clone(), ledger.clone(), clock.clone());
        let recovery = Arc::new(CrashRecoveryController::new(
            schedules.clone(),
            supervisor.clone(),
            clock.clone(),
            config.clone(),
        ));
        let (engine, events_rx) = TriggerEngine::new(clock.clone(), &config);

        Arc::new(Self {
            schedules,
            projects,
            ledger,
            resolver,
            supervisor,
            engine,
            recovery,
            clock,
            shutdown_tx,
            events_rx: Mutex::new(Some(events_rx)),
            crash_rx: Mutex::new(Some(crash_rx)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Reconcile agents with in-progress windows, register triggers for
    /// every enabled schedule, and spawn the background loops.
    pub async fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let reconciler = Reconciler::new(
            self.schedules.clone(),
            self.projects.clone(),
            self.ledger.clone(),
            self.supervisor.clone(),
            self.clock.clone(),
        );
        reconciler.run().await?;

        let schedules = self.schedules.list(None, true).await?;
        for schedule in &schedules {
            if let Err(e) = self.engine.add_schedule(schedule).await {
                error!(schedule_id = %schedule.id, error = %e, "skipping unregistrable schedule");
            }
        }
        info!(schedules = schedules.len(), "scheduler service starting");

        let events_rx = self
            .events_rx
            .lock()
            .await
            .take()
            .ok_or(SchedulerError::AlreadyStarted)?;
        let crash_rx = self
            .crash_rx
            .lock()
            .await
            .take()
            .ok_or(SchedulerError::AlreadyStarted)?;

        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(
            self.engine.clone().run(self.shutdown_tx.subscribe()),
        ));
        tasks.push(tokio::spawn(
            self.clone().dispatch_loop(events_rx, self.shutdown_tx.subscribe()),
        ));
        tasks.push(tokio::spawn(
            self.clone().crash_loop(crash_rx, self.shutdown_tx.subscribe()),
        ));
        Ok(())
    }

    /// Stop the background loops and drop all crash subscriptions. Running
    /// agents are left running; stopping them is the daemon's choice.
    pub async fn shutdown(&self) {
        info!("scheduler service shutting down");
        let _ = self.shutdown_tx.send(true);
        self.supervisor.shutdown();
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
            let _ = task.await;
        }
    }

    /// Persist a schedule and register its triggers. Used for both create
    /// and update; trigger registration is an idempotent replace.
    pub async fn add_schedule(&self, schedule: Schedule) -> Result<(), SchedulerError> {
        self.schedules.upsert(schedule.clone()).await?;
        if schedule.enabled {
            self.engine.add_schedule(&schedule).await?;
        } else {
            self.engine.remove_schedule(schedule.id).await;
        }
        Ok(())
    }

    /// Remove a schedule, its overrides, and its triggers.
    pub async fn remove_schedule(&self, schedule_id: Uuid) -> Result<(), SchedulerError> {
        self.schedules.remove(schedule_id).await?;
        self.engine.remove_schedule(schedule_id).await;
        Ok(())
    }

    /// Re-read a project's schedules from the store and bring the trigger
    /// engine in line with them. Returns the number of registered
    /// schedules.
    pub async fn load_project_schedules(&self, project: &str) -> Result<usize, SchedulerError> {
        let mut registered = 0;
        for schedule in self.schedules.list(Some(project), false).await? {
            if schedule.enabled {
                match self.engine.add_schedule(&schedule).await {
                    Ok(()) => registered += 1,
                    Err(e) => {
                        error!(schedule_id = %schedule.id, error = %e, "skipping unregistrable schedule");
                    }
                }
            } else {
                self.engine.remove_schedule(schedule.id).await;
            }
        }
        info!(project, registered, "reloaded project schedules");
        Ok(registered)
    }

    /// External crash signal for a project's agent (e.g. an operator or a
    /// supervising system noticed the process die). Runs the same bounded
    /// backoff recovery as a detected crash.
    pub async fn handle_crash(&self, project: &str) -> Result<(), SchedulerError> {
        self.recovery
            .handle_crash(project, self.shutdown_tx.subscribe())
            .await
    }

    /// A human started the project's agent by hand. Records a start
    /// override for every currently-active schedule so scheduled stops
    /// before the window boundary leave the agent alone.
    pub async fn notify_manual_start(
        &self,
        project: &str,
    ) -> Result<Vec<Override>, SchedulerError> {
        self.record_manual_override(project, OverrideKind::Start).await
    }

    /// A human stopped the project's agent by hand. Records a stop override
    /// for every currently-active schedule so the scheduler does not
    /// restart the agent before the window ends.
    pub async fn notify_manual_stop(
        &self,
        project: &str,
    ) -> Result<Vec<Override>, SchedulerError> {
        self.record_manual_override(project, OverrideKind::Stop).await
    }

    async fn record_manual_override(
        &self,
        project: &str,
        kind: OverrideKind,
    ) -> Result<Vec<Override>, SchedulerError> {
        let now = self.clock.now();
        let schedules = self.schedules.list(Some(project), true).await?;
        let mut records = Vec::new();
        for schedule in schedules.iter().filter(|s| window::is_active(s, now)) {
            let expires_at = window::current_window_end(schedule, now);
            records.push(self.ledger.create(schedule.id, kind, expires_at).await?);
        }
        if records.is_empty() {
            info!(project, kind = %kind, "manual action outside any window, no override needed");
        }
        Ok(records)
    }

    async fn dispatch_loop(
        self: Arc<Self>,
        mut events_rx: mpsc::Receiver<TriggerEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    if let Err(e) = self.process_trigger(&event).await {
                        error!(
                            schedule_id = %event.schedule_id,
                            kind = %event.kind,
                            error = %e,
                            "trigger handling failed"
                        );
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("dispatch loop stopped");
    }

    /// Handle one trigger firing under the project lock.
    async fn process_trigger(&self, event: &TriggerEvent) -> Result<(), SchedulerError> {
        let lock = self.supervisor.project_lock(&event.project);
        let _guard = lock.lock().await;

        // Re-fetch: the schedule may have changed or vanished since the
        // trigger was registered.
        let Some(schedule) = self.schedules.get(event.schedule_id).await? else {
            debug!(schedule_id = %event.schedule_id, "trigger for removed schedule, ignoring");
            return Ok(());
        };
        if !schedule.enabled {
            debug!(schedule_id = %schedule.id, "trigger for disabled schedule, ignoring");
            return Ok(());
        }

        match event.kind {
            TriggerKind::Start => match self.resolver.decide_start(&schedule).await? {
                StartDecision::Proceed => {
                    // A new window gets a fresh crash-retry budget.
                    self.schedules.update_crash_count(schedule.id, 0).await?;
                    self.supervisor.activate(&schedule).await;
                }
                StartDecision::SuppressedByStopOverride(expires_at) => {
                    info!(
                        project = %event.project,
                        schedule_id = %schedule.id,
                        expires_at = %expires_at,
                        "start suppressed by manual stop override"
                    );
                }
            },
            TriggerKind::Stop => match self.resolver.decide_stop(&schedule).await? {
                StopDecision::Proceed => {
                    self.supervisor.deactivate(&event.project).await;
                }
                StopDecision::OtherWindowActive(other) => {
                    info!(
                        project = %event.project,
                        schedule_id = %schedule.id,
                        active_schedule = %other,
                        "stop suppressed, another window is still active"
                    );
                }
                StopDecision::SuppressedByStartOverride(expires_at) => {
                    info!(
                        project = %event.project,
                        schedule_id = %schedule.id,
                        expires_at = %expires_at,
                        "stop suppressed by manual start override"
                    );
                }
            },
        }
        Ok(())
    }

    async fn crash_loop(
        self: Arc<Self>,
        mut crash_rx: mpsc::Receiver<String>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                project = crash_rx.recv() => {
                    let Some(project) = project else { break };
                    let recovery = self.recovery.clone();
                    let shutdown = self.shutdown_tx.subscribe();
                    // Backoff sleeps must not serialize crashes of
                    // different projects.
                    tokio::spawn(async move {
                        if let Err(e) = recovery.handle_crash(&project, shutdown).await {
                            error!(project = %project, error = %e, "crash recovery failed");
                        }
                    });
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("crash loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveTime, Utc};
    use foreman_store::{DayMask, MemoryStore};

    use crate::ManualClock;
    use foreman_process::{
        AgentStatus, ProcessController, ProcessError, StartOptions, StaticRegistry,
    };

    struct NullController {
        status_tx: tokio::sync::watch::Sender<AgentStatus>,
    }

    impl NullController {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                status_tx: tokio::sync::watch::channel(AgentStatus::Idle).0,
            })
        }
    }

    #[async_trait::async_trait]
    impl ProcessController for NullController {
        async fn start(&self, _options: StartOptions) -> Result<(), ProcessError> {
            let _ = self.status_tx.send(AgentStatus::Running);
            Ok(())
        }

        async fn stop(&self) -> Result<(), ProcessError> {
            let _ = self.status_tx.send(AgentStatus::Idle);
            Ok(())
        }

        async fn status(&self) -> AgentStatus {
            *self.status_tx.borrow()
        }

        fn watch_status(&self) -> tokio::sync::watch::Receiver<AgentStatus> {
            self.status_tx.subscribe()
        }
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn schedule(project: &str, start: &str, duration: u32) -> Schedule {
        Schedule {
            id: Uuid::new_v4(),
            project_name: project.to_string(),
            start_time: NaiveTime::parse_from_str(start, "%H:%M").unwrap(),
            duration_minutes: duration,
            days_of_week: DayMask::EVERY_DAY,
            enabled: true,
            yolo_mode: false,
            model: None,
            max_concurrency: 1,
            crash_count: 0,
            created_at: Utc::now(),
        }
    }

    fn service(now: &str) -> (Arc<SchedulerService>, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(utc(now)));
        let registry = Arc::new(StaticRegistry::new());
        registry.insert("alpha", NullController::new());
        let svc = SchedulerService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            registry,
            clock.clone(),
            SchedulerConfig::default(),
        );
        (svc, store, clock)
    }

    #[tokio::test]
    async fn manual_stop_records_window_end_override() {
        let (svc, store, _clock) = service("2026-08-24T09:00:00Z");
        let s = schedule("alpha", "08:00", 120);
        store.upsert(s.clone()).await.unwrap();

        let records = svc.notify_manual_stop("alpha").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].schedule_id, s.id);
        assert_eq!(records[0].kind, OverrideKind::Stop);
        assert_eq!(records[0].expires_at, utc("2026-08-24T10:00:00Z"));
    }

    #[tokio::test]
    async fn manual_stop_covers_every_active_window() {
        let (svc, store, _clock) = service("2026-08-24T09:30:00Z");
        let a = schedule("alpha", "08:00", 120);
        let b = schedule("alpha", "09:00", 120);
        let idle = schedule("alpha", "14:00", 60);
        store.upsert(a.clone()).await.unwrap();
        store.upsert(b.clone()).await.unwrap();
        store.upsert(idle).await.unwrap();

        let records = svc.notify_manual_stop("alpha").await.unwrap();
        let mut covered: Vec<_> = records.iter().map(|r| r.schedule_id).collect();
        covered.sort();
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(covered, expected);
        // each override lasts until its own window ends
        for record in &records {
            let end = if record.schedule_id == a.id {
                utc("2026-08-24T10:00:00Z")
            } else {
                utc("2026-08-24T11:00:00Z")
            };
            assert_eq!(record.expires_at, end);
        }
    }

    #[tokio::test]
    async fn manual_action_outside_window_records_nothing() {
        let (svc, store, _clock) = service("2026-08-24T12:00:00Z");
        store.upsert(schedule("alpha", "08:00", 120)).await.unwrap();

        assert!(svc.notify_manual_start("alpha").await.unwrap().is_empty());
        assert!(svc.notify_manual_stop("alpha").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_schedule_persists_and_registers_triggers() {
        let (svc, store, _clock) = service("2026-08-24T07:00:00Z");
        let s = schedule("alpha", "08:00", 120);

        svc.add_schedule(s.clone()).await.unwrap();
        assert!(store.get(s.id).await.unwrap().is_some());
        assert_eq!(svc.engine.len().await, 1);

        // disabling deregisters the triggers but keeps the row
        let mut disabled = s.clone();
        disabled.enabled = false;
        svc.add_schedule(disabled).await.unwrap();
        assert!(svc.engine.is_empty().await);
        assert!(store.get(s.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn remove_schedule_cascades() {
        let (svc, store, clock) = service("2026-08-24T09:00:00Z");
        let s = schedule("alpha", "08:00", 120);
        svc.add_schedule(s.clone()).await.unwrap();
        svc.notify_manual_stop("alpha").await.unwrap();

        svc.remove_schedule(s.id).await.unwrap();
        assert!(store.get(s.id).await.unwrap().is_none());
        assert!(svc.engine.is_empty().await);
        assert!(
            foreman_store::OverrideStore::active(
                store.as_ref(),
                s.id,
                OverrideKind::Stop,
                clock.now()
            )
            .await
            .unwrap()
            .is_none()
        );
    }

    #[tokio::test]
    async fn start_trigger_resets_crash_budget() {
        let (svc, store, _clock) = service("2026-08-24T08:00:30Z");
        let mut s = schedule("alpha", "08:00", 120);
        s.crash_count = 2;
        store.upsert(s.clone()).await.unwrap();

        svc.process_trigger(&TriggerEvent {
            schedule_id: s.id,
            project: "alpha".to_string(),
            kind: TriggerKind::Start,
        })
        .await
        .unwrap();

        assert_eq!(store.get(s.id).await.unwrap().unwrap().crash_count, 0);
    }

    #[tokio::test]
    async fn load_project_schedules_tracks_enabled_flag() {
        let (svc, store, _clock) = service("2026-08-24T07:00:00Z");
        let a = schedule("alpha", "08:00", 60);
        let mut b = schedule("alpha", "10:00", 60);
        b.enabled = false;
        store.upsert(a.clone()).await.unwrap();
        store.upsert(b.clone()).await.unwrap();

        assert_eq!(svc.load_project_schedules("alpha").await.unwrap(), 1);
        assert_eq!(svc.engine.len().await, 1);

        // re-enabling shows up on the next load
        let mut b_enabled = b.clone();
        b_enabled.enabled = true;
        store.upsert(b_enabled).await.unwrap();
        assert_eq!(svc.load_project_schedules("alpha").await.unwrap(), 2);
        assert_eq!(svc.engine.len().await, 2);
    }

    #[tokio::test]
    async fn trigger_for_removed_schedule_is_ignored() {
        let (svc, _store, _clock) = service("2026-08-24T08:00:30Z");
        svc.process_trigger(&TriggerEvent {
            schedule_id: Uuid::new_v4(),
            project: "alpha".to_string(),
            kind: TriggerKind::Start,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn start_fails_when_called_twice() {
        let (svc, _store, _clock) = service("2026-08-24T07:00:00Z");
        svc.start().await.unwrap();
        assert!(matches!(
            svc.start().await,
            Err(SchedulerError::AlreadyStarted)
        ));
        svc.shutdown().await;
    }
}
