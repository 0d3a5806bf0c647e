//! Manual override bookkeeping.
//!
//! A human starting or stopping a project inside an active window records
//! an override that suppresses the conflicting automatic action until the
//! window ends. The store guarantees at most one unexpired override per
//! (schedule, kind); this ledger adds validation and expiry-aware queries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use foreman_store::{Override, OverrideKind, OverrideStore, StoreError};

use crate::{Clock, SchedulerError};

/// Records and queries manual start/stop overrides.
#[derive(Clone)]
pub struct OverrideLedger {
    store: Arc<dyn OverrideStore>,
    clock: Arc<dyn Clock>,
}

impl OverrideLedger {
    pub fn new(store: Arc<dyn OverrideStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Record an override, replacing any prior one of the same kind for
    /// this schedule. The expiry must be in the future.
    pub async fn create(
        &self,
        schedule_id: Uuid,
        kind: OverrideKind,
        expires_at: DateTime<Utc>,
    ) -> Result<Override, SchedulerError> {
        if expires_at <= self.clock.now() {
            return Err(StoreError::InvalidOverride(format!(
                "expiry {expires_at} is not in the future"
            ))
            .into());
        }
        let record = self.store.replace(schedule_id, kind, expires_at).await?;
        info!(
            %schedule_id,
            kind = %kind,
            expires_at = %expires_at,
            "recorded manual override"
        );
        Ok(record)
    }

    /// The unexpired override of this kind, if any.
    pub async fn active(
        &self,
        schedule_id: Uuid,
        kind: OverrideKind,
    ) -> Result<Option<Override>, SchedulerError> {
        Ok(self
            .store
            .active(schedule_id, kind, self.clock.now())
            .await?)
    }

    /// Opportunistically drop lapsed overrides for a schedule.
    pub async fn purge_expired(&self, schedule_id: Uuid) -> Result<usize, SchedulerError> {
        Ok(self
            .store
            .purge_expired(schedule_id, self.clock.now())
            .await?)
    }
}
