//! Engine-wide override lookup
//!
//! Actors keep the index current from their lifecycle events so the engine
//! can route `clear(override_id)` to the owning location and list active
//! overrides without asking every actor.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use traffic_model::{EmergencyOverride, LocationId, OverrideEvent, OverrideEventKind};
use uuid::Uuid;

/// Finished override ids remembered for routing late clears
const RETIRED_CAPACITY: usize = 4096;

#[derive(Default)]
struct Inner {
    active: HashMap<Uuid, EmergencyOverride>,
    owners: HashMap<Uuid, LocationId>,
    retired: VecDeque<Uuid>,
}

#[derive(Default)]
pub struct OverrideIndex {
    inner: Mutex<Inner>,
}

impl OverrideIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, event: &OverrideEvent) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = event.record.override_id;

        match event.kind {
            OverrideEventKind::Created | OverrideEventKind::Refreshed => {
                inner.owners.insert(id, event.record.location_id.clone());
                inner.active.insert(id, event.record.clone());
            }
            OverrideEventKind::Expired | OverrideEventKind::Cleared => {
                if inner.active.remove(&id).is_none() {
                    return;
                }
                inner.retired.push_back(id);
                while inner.retired.len() > RETIRED_CAPACITY {
                    if let Some(old) = inner.retired.pop_front() {
                        inner.owners.remove(&old);
                    }
                }
            }
        }
    }

    /// Location that owns (or owned) an override
    pub fn owner(&self, override_id: &Uuid) -> Option<LocationId> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.owners.get(override_id).cloned()
    }

    /// Active overrides ordered by location
    pub fn active(&self) -> Vec<EmergencyOverride> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut active: Vec<_> = inner.active.values().cloned().collect();
        active.sort_by(|a, b| a.location_id.cmp(&b.location_id));
        active
    }

    /// Forget active entries of a stopped location
    pub fn retire_location(&self, location_id: &LocationId) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.active.retain(|_, record| &record.location_id != location_id);
    }
}
