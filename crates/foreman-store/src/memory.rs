//! In-memory store implementation.
//!
//! Backs the daemon's single-instance deployment and every test. All three
//! storage traits share one `RwLock` so override replacement and schedule
//! removal cascades are atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::{
    Override, OverrideKind, OverrideStore, Project, ProjectDirectory, Schedule, ScheduleStore,
    StoreError,
};

#[derive(Default)]
struct Inner {
    schedules: HashMap<Uuid, Schedule>,
    overrides: HashMap<Uuid, Override>,
    projects: Vec<Project>,
}

/// In-memory schedule/override/project store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a project, replacing any existing entry with the same name.
    pub async fn register_project(&self, project: Project) {
        let mut inner = self.inner.write().await;
        inner.projects.retain(|p| p.name != project.name);
        inner.projects.push(project);
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn list(
        &self,
        project: Option<&str>,
        enabled_only: bool,
    ) -> Result<Vec<Schedule>, StoreError> {
        let inner = self.inner.read().await;
        let mut schedules: Vec<Schedule> = inner
            .schedules
            .values()
            .filter(|s| project.is_none_or(|p| s.project_name == p))
            .filter(|s| !enabled_only || s.enabled)
            .cloned()
            .collect();
        // Stable creation order keeps first-match scans deterministic.
        schedules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(schedules)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Schedule>, StoreError> {
        Ok(self.inner.read().await.schedules.get(&id).cloned())
    }

    async fn update_crash_count(&self, id: Uuid, crash_count: u32) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(schedule) = inner.schedules.get_mut(&id) {
            schedule.crash_count = crash_count;
        }
        Ok(())
    }

    async fn upsert(&self, schedule: Schedule) -> Result<(), StoreError> {
        schedule.validate()?;
        self.inner
            .write()
            .await
            .schedules
            .insert(schedule.id, schedule);
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.schedules.remove(&id);
        inner.overrides.retain(|_, o| o.schedule_id != id);
        Ok(())
    }
}

#[async_trait]
impl OverrideStore for MemoryStore {
    async fn replace(
        &self,
        schedule_id: Uuid,
        kind: OverrideKind,
        expires_at: DateTime<Utc>,
    ) -> Result<Override, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.overrides.len();
        inner
            .overrides
            .retain(|_, o| !(o.schedule_id == schedule_id && o.kind == kind));
        let deleted = before - inner.overrides.len();
        if deleted > 0 {
            debug!(%schedule_id, %kind, deleted, "replaced existing override(s)");
        }

        let record = Override {
            id: Uuid::new_v4(),
            schedule_id,
            kind,
            expires_at,
            created_at: Utc::now(),
        };
        inner.overrides.insert(record.id, record.clone());
        Ok(record)
    }

    async fn active(
        &self,
        schedule_id: Uuid,
        kind: OverrideKind,
        now: DateTime<Utc>,
    ) -> Result<Option<Override>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .overrides
            .values()
            .find(|o| o.schedule_id == schedule_id && o.kind == kind && !o.is_expired(now))
            .cloned())
    }

    async fn purge_expired(
        &self,
        schedule_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.overrides.len();
        inner
            .overrides
            .retain(|_, o| !(o.schedule_id == schedule_id && o.is_expired(now)));
        Ok(before - inner.overrides.len())
    }

    async fn remove_for_schedule(&self, schedule_id: Uuid) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.overrides.len();
        inner.overrides.retain(|_, o| o.schedule_id != schedule_id);
        Ok(before - inner.overrides.len())
    }
}

#[async_trait]
impl ProjectDirectory for MemoryStore {
    async fn list_projects(&self) -> Result<Vec<Project>, StoreError> {
        Ok(self.inner.read().await.projects.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveTime};
    use pretty_assertions::assert_eq;

    use crate::DayMask;

    fn schedule(project: &str, enabled: bool) -> Schedule {
        Schedule {
            id: Uuid::new_v4(),
            project_name: project.to_string(),
            start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            duration_minutes: 120,
            days_of_week: DayMask::EVERY_DAY,
            enabled,
            yolo_mode: false,
            model: None,
            max_concurrency: 1,
            crash_count: 0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn list_filters_by_project_and_enabled() {
        let store = MemoryStore::new();
        store.upsert(schedule("alpha", true)).await.unwrap();
        store.upsert(schedule("alpha", false)).await.unwrap();
        store.upsert(schedule("beta", true)).await.unwrap();

        assert_eq!(store.list(None, false).await.unwrap().len(), 3);
        assert_eq!(store.list(Some("alpha"), false).await.unwrap().len(), 2);
        assert_eq!(store.list(Some("alpha"), true).await.unwrap().len(), 1);
        assert_eq!(store.list(Some("gamma"), false).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn upsert_rejects_invalid_schedule() {
        let store = MemoryStore::new();
        let mut s = schedule("alpha", true);
        s.duration_minutes = 0;
        assert!(store.upsert(s).await.is_err());
        assert!(store.list(None, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_crash_count_missing_schedule_is_noop() {
        let store = MemoryStore::new();
        store
            .update_crash_count(Uuid::new_v4(), 2)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn replace_enforces_single_unexpired_override() {
        let store = MemoryStore::new();
        let s = schedule("alpha", true);
        let sid = s.id;
        store.upsert(s).await.unwrap();

        let now = Utc::now();
        store
            .replace(sid, OverrideKind::Stop, now + Duration::minutes(30))
            .await
            .unwrap();
        let second = store
            .replace(sid, OverrideKind::Stop, now + Duration::minutes(60))
            .await
            .unwrap();

        let active = store
            .active(sid, OverrideKind::Stop, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, second.id);
        assert_eq!(active.expires_at, now + Duration::minutes(60));

        // the start slot is independent of the stop slot
        store
            .replace(sid, OverrideKind::Start, now + Duration::minutes(10))
            .await
            .unwrap();
        assert!(
            store
                .active(sid, OverrideKind::Stop, now)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn override_round_trip_expires() {
        let store = MemoryStore::new();
        let sid = Uuid::new_v4();
        let now = Utc::now();

        store
            .replace(sid, OverrideKind::Stop, now + Duration::minutes(5))
            .await
            .unwrap();
        assert!(
            store
                .active(sid, OverrideKind::Stop, now)
                .await
                .unwrap()
                .is_some()
        );

        // past the expiry instant the override no longer applies
        let later = now + Duration::minutes(5);
        assert!(
            store
                .active(sid, OverrideKind::Stop, later)
                .await
                .unwrap()
                .is_none()
        );

        assert_eq!(store.purge_expired(sid, later).await.unwrap(), 1);
        assert_eq!(store.purge_expired(sid, later).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_schedule_cascades_overrides() {
        let store = MemoryStore::new();
        let s = schedule("alpha", true);
        let sid = s.id;
        store.upsert(s).await.unwrap();
        store
            .replace(sid, OverrideKind::Start, Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        ScheduleStore::remove(&store, sid).await.unwrap();
        assert!(store.get(sid).await.unwrap().is_none());
        assert!(
            store
                .active(sid, OverrideKind::Start, Utc::now())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn register_project_replaces_by_name() {
        let store = MemoryStore::new();
        store
            .register_project(Project {
                name: "alpha".to_string(),
                path: "/tmp/a".into(),
            })
            .await;
        store
            .register_project(Project {
                name: "alpha".to_string(),
                path: "/tmp/b".into(),
            })
            .await;

        let projects = store.list_projects().await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].path, std::path::PathBuf::from("/tmp/b"));
    }
}
