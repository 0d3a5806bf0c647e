//! Wall-clock trigger engine.
//!
//! Maintains one start trigger and one stop trigger per registered
//! schedule. The start trigger fires at `(start_time, days_of_week)`; the
//! stop trigger fires at the window's end time, with the day mask shifted
//! forward when the window crosses midnight (the stop physically happens
//! on the following calendar day).
//!
//! The run loop sleeps until the next trigger is due (bounded between 1s
//! and 60s, no busy polling) and emits firings into a bounded channel so
//! handling never blocks the loop. Firings more than `misfire_grace` late
//! are treated as missed and skipped.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use foreman_store::{DayMask, Schedule};

use crate::{Clock, SchedulerConfig, SchedulerError};

/// Minimum sleep duration between engine checks.
const MIN_SLEEP_SECS: u64 = 1;

/// Maximum sleep duration between engine checks.
const MAX_SLEEP_SECS: u64 = 60;

/// Capacity of the firing channel.
const EVENT_QUEUE_SIZE: usize = 64;

/// Which side of the window a trigger fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Start,
    Stop,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerKind::Start => write!(f, "start"),
            TriggerKind::Stop => write!(f, "stop"),
        }
    }
}

/// A trigger firing, handed to the dispatch loop.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    pub schedule_id: Uuid,
    pub project: String,
    pub kind: TriggerKind,
}

#[derive(Debug, Clone)]
struct Trigger {
    kind: TriggerKind,
    time: NaiveTime,
    days: DayMask,
    /// `None` when the day mask is empty (the trigger never fires).
    next_fire: Option<DateTime<Utc>>,
}

impl Trigger {
    fn new(kind: TriggerKind, time: NaiveTime, days: DayMask, after: DateTime<Utc>) -> Self {
        Self {
            kind,
            time,
            days,
            next_fire: next_fire_after(time, days, after),
        }
    }
}

#[derive(Debug, Clone)]
struct TriggerPair {
    project: String,
    start: Trigger,
    stop: Trigger,
}

/// The first instant strictly after `after` that matches the time of day
/// and day mask. `None` for an empty mask.
fn next_fire_after(time: NaiveTime, days: DayMask, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if days.is_empty() {
        return None;
    }
    // Eight iterations cover today's already-passed slot plus a full week.
    for offset in 0..=7 {
        let date = after.date_naive() + Duration::days(offset);
        if !days.contains(date.weekday()) {
            continue;
        }
        let candidate = date.and_time(time).and_utc();
        if candidate > after {
            return Some(candidate);
        }
    }
    None
}

/// Owns the future-time triggers for all registered schedules.
pub struct TriggerEngine {
    triggers: RwLock<HashMap<Uuid, TriggerPair>>,
    events_tx: mpsc::Sender<TriggerEvent>,
    clock: Arc<dyn Clock>,
    misfire_grace: Duration,
}

impl TriggerEngine {
    /// Create an engine and the receiving end of its firing channel.
    pub fn new(
        clock: Arc<dyn Clock>,
        config: &SchedulerConfig,
    ) -> (Arc<Self>, mpsc::Receiver<TriggerEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        let engine = Arc::new(Self {
            triggers: RwLock::new(HashMap::new()),
            events_tx,
            clock,
            misfire_grace: Duration::from_std(config.misfire_grace)
                .unwrap_or_else(|_| Duration::seconds(300)),
        });
        (engine, events_rx)
    }

    /// Register (or re-register) a schedule's trigger pair. Idempotent:
    /// an existing pair for the same id is replaced.
    pub async fn add_schedule(&self, schedule: &Schedule) -> Result<(), SchedulerError> {
        schedule.validate().map_err(|e| {
            SchedulerError::TriggerRegistration(format!("schedule {}: {e}", schedule.id))
        })?;
        if schedule.days_of_week.is_empty() {
            warn!(
                schedule_id = %schedule.id,
                "schedule has no days enabled, triggers will never fire"
            );
        }

        let now = self.clock.now();
        let start = Trigger::new(
            TriggerKind::Start,
            schedule.start_time,
            schedule.days_of_week,
            now,
        );
        let stop = Trigger::new(TriggerKind::Stop, schedule.end_time(), schedule.stop_days(), now);

        info!(
            schedule_id = %schedule.id,
            project = %schedule.project_name,
            start = %schedule.start_time.format("%H:%M"),
            next_start = ?start.next_fire,
            stop = %schedule.end_time().format("%H:%M"),
            next_stop = ?stop.next_fire,
            "registered schedule triggers"
        );

        self.triggers.write().await.insert(
            schedule.id,
            TriggerPair {
                project: schedule.project_name.clone(),
                start,
                stop,
            },
        );
        Ok(())
    }

    /// Deregister a schedule's triggers. Absence is not an error.
    pub async fn remove_schedule(&self, schedule_id: Uuid) {
        if self.triggers.write().await.remove(&schedule_id).is_some() {
            info!(%schedule_id, "removed schedule triggers");
        } else {
            debug!(%schedule_id, "no triggers registered for schedule");
        }
    }

    /// Number of registered schedules.
    pub async fn len(&self) -> usize {
        self.triggers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.triggers.read().await.is_empty()
    }

    /// Run until the shutdown channel flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!("trigger engine starting");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let now = self.clock.now();
            for event in self.take_due(now).await {
                // Bounded queue; a full queue drops the firing rather than
                // stalling other schedules' triggers.
                if let Err(e) = self.events_tx.try_send(event) {
                    warn!(error = %e, "trigger queue full, dropping firing");
                }
            }

            let sleep_duration = self.sleep_duration(now).await;
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = tokio::time::sleep(sleep_duration) => {}
            }
        }

        info!("trigger engine shut down");
    }

    /// Collect all due firings and advance their next-fire instants.
    async fn take_due(&self, now: DateTime<Utc>) -> Vec<TriggerEvent> {
        let mut events = Vec::new();
        let mut triggers = self.triggers.write().await;

        for (schedule_id, pair) in triggers.iter_mut() {
            let project = pair.project.clone();
            for trigger in [&mut pair.start, &mut pair.stop] {
                let Some(fire_at) = trigger.next_fire else {
                    continue;
                };
                if fire_at > now {
                    continue;
                }
                if now - fire_at <= self.misfire_grace {
                    events.push(TriggerEvent {
                        schedule_id: *schedule_id,
                        project: project.clone(),
                        kind: trigger.kind,
                    });
                } else {
                    warn!(
                        %schedule_id,
                        kind = %trigger.kind,
                        scheduled_for = %fire_at,
                        "trigger missed beyond grace period, skipping"
                    );
                }
                trigger.next_fire = next_fire_after(trigger.time, trigger.days, now);
            }
        }

        events
    }

    /// How long to sleep until the next trigger is due, bounded to
    /// `MIN_SLEEP_SECS..=MAX_SLEEP_SECS`.
    async fn sleep_duration(&self, now: DateTime<Utc>) -> std::time::Duration {
        let triggers = self.triggers.read().await;
        let next_due = triggers
            .values()
            .flat_map(|pair| [pair.start.next_fire, pair.stop.next_fire])
            .flatten()
            .min();

        let secs = match next_due {
            Some(next) => {
                let diff = (next - now).num_seconds();
                (diff.max(MIN_SLEEP_SECS as i64) as u64).min(MAX_SLEEP_SECS)
            }
            None => MAX_SLEEP_SECS,
        };

        std::time::Duration::from_secs(secs)
    }
}
