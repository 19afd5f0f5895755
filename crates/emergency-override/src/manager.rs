//! Override Manager Implementation

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};
use traffic_model::{
    DetectionSample, EmergencyOverride, LocationId, OverrideEvent, OverrideEventKind,
    OverrideStatus, PriorityLevel,
};
use uuid::Uuid;

/// Override configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideConfig {
    /// Time an override stays active after its latest emergency sample (seconds)
    pub duration_secs: i64,
    /// Terminal overrides remembered per location
    pub history_capacity: usize,
}

impl Default for OverrideConfig {
    fn default() -> Self {
        Self {
            duration_secs: 60,
            history_capacity: 32,
        }
    }
}

/// Outcome of feeding a sample to the manager
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideDecision {
    Created(EmergencyOverride),
    Refreshed(EmergencyOverride),
    Ignored,
}

/// Outcome of a manual clear
#[derive(Debug, Clone, PartialEq)]
pub enum ClearOutcome {
    Cleared(EmergencyOverride),
    AlreadyInactive,
}

/// Override state machine for one intersection
pub struct EmergencyOverrideManager {
    location_id: LocationId,
    config: OverrideConfig,
    /// The active override, if any
    active: Option<EmergencyOverride>,
    /// Expired and cleared overrides, newest last
    history: VecDeque<EmergencyOverride>,
    /// Lifecycle events not yet collected
    events: Vec<OverrideEvent>,
}

impl EmergencyOverrideManager {
    /// Create a manager for a location with no override
    pub fn new(location_id: LocationId, config: OverrideConfig) -> Self {
        Self {
            location_id,
            config,
            active: None,
            history: VecDeque::new(),
            events: Vec::new(),
        }
    }

    fn duration(&self) -> Duration {
        Duration::seconds(self.config.duration_secs)
    }

    /// Create or refresh the override for an emergency-bearing sample.
    ///
    /// A refresh moves the override to the sample's direction: the most
    /// recently detected emergency vehicle is the one served.
    pub fn on_emergency_detected(
        &mut self,
        sample: &DetectionSample,
        now: DateTime<Utc>,
    ) -> OverrideDecision {
        if !sample.emergency_detected {
            return OverrideDecision::Ignored;
        }
        if sample.location_id != self.location_id {
            warn!(
                "Emergency sample for {} routed to manager of {}",
                sample.location_id, self.location_id
            );
            return OverrideDecision::Ignored;
        }

        // An override past its expiry that the sweep has not reached yet is
        // finished; the new sample starts a fresh one.
        self.sweep_expired(now);

        let priority = PriorityLevel::classify(sample.emergency_class.as_deref());
        let expires_at = now + self.duration();

        if let Some(active) = self.active.as_mut() {
            if active.direction != sample.direction {
                warn!(
                    "Emergency override {} at {} moving from {} to {}",
                    active.override_id, self.location_id, active.direction, sample.direction
                );
            }
            active.expires_at = expires_at;
            active.direction = sample.direction;
            active.priority_level = priority;
            active.triggering_sample_count += 1;
            let record = active.clone();

            debug!(
                "Emergency override {} refreshed (samples: {}, expires {})",
                record.override_id, record.triggering_sample_count, record.expires_at
            );
            self.record_event(OverrideEventKind::Refreshed, record.clone(), now);
            return OverrideDecision::Refreshed(record);
        }

        let record = EmergencyOverride {
            override_id: Uuid::new_v4(),
            location_id: self.location_id.clone(),
            direction: sample.direction,
            priority_level: priority,
            activated_at: now,
            expires_at,
            status: OverrideStatus::Active,
            triggering_sample_count: 1,
        };

        warn!(
            "EMERGENCY VEHICLE ({}) at {} from {}: override {} active until {}",
            priority.as_str(),
            self.location_id,
            sample.direction,
            record.override_id,
            record.expires_at
        );
        self.active = Some(record.clone());
        self.record_event(OverrideEventKind::Created, record.clone(), now);
        OverrideDecision::Created(record)
    }

    /// Clear an override by id.
    ///
    /// Returns `None` when the id never belonged to this location.
    pub fn clear(&mut self, override_id: Uuid, now: DateTime<Utc>) -> Option<ClearOutcome> {
        let is_active = self
            .active
            .as_ref()
            .map(|active| active.override_id == override_id)
            .unwrap_or(false);

        if is_active {
            let record = self.finish(OverrideStatus::Cleared, now)?;
            info!("Emergency override manually cleared: {}", override_id);
            return Some(ClearOutcome::Cleared(record));
        }

        if self.history.iter().any(|o| o.override_id == override_id) {
            debug!("Override {} already inactive", override_id);
            return Some(ClearOutcome::AlreadyInactive);
        }

        None
    }

    /// Expire the active override once `now` is past its expiry
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        let due = self
            .active
            .as_ref()
            .map(|active| now > active.expires_at)
            .unwrap_or(false);

        if !due {
            return Vec::new();
        }

        match self.finish(OverrideStatus::Expired, now) {
            Some(record) => {
                info!(
                    "Emergency override expired: {} at {}",
                    record.override_id, self.location_id
                );
                vec![record.override_id]
            }
            None => Vec::new(),
        }
    }

    /// Move the active override into history with a terminal status
    fn finish(&mut self, status: OverrideStatus, now: DateTime<Utc>) -> Option<EmergencyOverride> {
        let mut record = self.active.take()?;
        record.status = status;

        if self.history.len() >= self.config.history_capacity.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(record.clone());

        let kind = match status {
            OverrideStatus::Cleared => OverrideEventKind::Cleared,
            _ => OverrideEventKind::Expired,
        };
        self.record_event(kind, record.clone(), now);
        Some(record)
    }

    fn record_event(&mut self, kind: OverrideEventKind, record: EmergencyOverride, at: DateTime<Utc>) {
        self.events.push(OverrideEvent { kind, record, at });
    }

    /// Currently active override
    pub fn active(&self) -> Option<&EmergencyOverride> {
        self.active.as_ref()
    }

    /// Terminal overrides, oldest first
    pub fn history(&self) -> impl Iterator<Item = &EmergencyOverride> {
        self.history.iter()
    }

    /// Take the lifecycle events recorded since the last call
    pub fn drain_events(&mut self) -> Vec<OverrideEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn location_id(&self) -> &LocationId {
        &self.location_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use traffic_model::Direction;

    fn location() -> LocationId {
        LocationId::new("x").unwrap()
    }

    fn manager() -> EmergencyOverrideManager {
        EmergencyOverrideManager::new(location(), OverrideConfig::default())
    }

    fn emergency(direction: Direction, at: DateTime<Utc>) -> DetectionSample {
        DetectionSample::new(location(), direction, at).with_emergency(0.9, Some("car"))
    }

    #[test]
    fn test_create_on_first_emergency() {
        let mut mgr = manager();
        let t0 = Utc::now();
        let decision = mgr.on_emergency_detected(&emergency(Direction::East, t0), t0);

        let OverrideDecision::Created(record) = decision else {
            panic!("expected created, got {:?}", decision);
        };
        assert_eq!(record.direction, Direction::East);
        assert_eq!(record.expires_at, t0 + Duration::seconds(60));
        assert_eq!(record.priority_level, PriorityLevel::Ambulance);
        assert_eq!(record.triggering_sample_count, 1);
        assert!(mgr.active().is_some());
    }

    #[test]
    fn test_non_emergency_ignored() {
        let mut mgr = manager();
        let t0 = Utc::now();
        let sample = DetectionSample::new(location(), Direction::North, t0).with_count("car", 4);
        assert_eq!(mgr.on_emergency_detected(&sample, t0), OverrideDecision::Ignored);
        assert!(mgr.active().is_none());
        assert!(mgr.drain_events().is_empty());
    }

    #[test]
    fn test_refresh_extends_does_not_duplicate() {
        let mut mgr = manager();
        let t0 = Utc::now();
        let first = match mgr.on_emergency_detected(&emergency(Direction::East, t0), t0) {
            OverrideDecision::Created(r) => r,
            other => panic!("expected created, got {:?}", other),
        };

        let t1 = t0 + Duration::seconds(10);
        let refreshed = match mgr.on_emergency_detected(&emergency(Direction::East, t1), t1) {
            OverrideDecision::Refreshed(r) => r,
            other => panic!("expected refreshed, got {:?}", other),
        };

        assert_eq!(refreshed.override_id, first.override_id);
        assert_eq!(refreshed.expires_at, t0 + Duration::seconds(70));
        assert_eq!(refreshed.triggering_sample_count, 2);
        assert_eq!(mgr.history().count(), 0);
    }

    #[test]
    fn test_refresh_takes_latest_direction() {
        let mut mgr = manager();
        let t0 = Utc::now();
        mgr.on_emergency_detected(&emergency(Direction::East, t0), t0);
        let t1 = t0 + Duration::seconds(5);
        let sample = DetectionSample::new(location(), Direction::North, t1)
            .with_emergency(0.8, Some("truck"));
        mgr.on_emergency_detected(&sample, t1);

        let active = mgr.active().unwrap();
        assert_eq!(active.direction, Direction::North);
        assert_eq!(active.priority_level, PriorityLevel::FireService);
    }

    #[test]
    fn test_expiry_by_sweep() {
        let mut mgr = manager();
        let t0 = Utc::now();
        mgr.on_emergency_detected(&emergency(Direction::East, t0), t0);

        assert!(mgr.sweep_expired(t0 + Duration::seconds(60)).is_empty());
        let expired = mgr.sweep_expired(t0 + Duration::seconds(61));
        assert_eq!(expired.len(), 1);
        assert!(mgr.active().is_none());

        let history: Vec<_> = mgr.history().collect();
        assert_eq!(history[0].status, OverrideStatus::Expired);

        let kinds: Vec<_> = mgr.drain_events().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![OverrideEventKind::Created, OverrideEventKind::Expired]);
    }

    #[test]
    fn test_manual_clear_is_idempotent() {
        let mut mgr = manager();
        let t0 = Utc::now();
        let id = match mgr.on_emergency_detected(&emergency(Direction::South, t0), t0) {
            OverrideDecision::Created(r) => r.override_id,
            other => panic!("expected created, got {:?}", other),
        };

        let t1 = t0 + Duration::seconds(2);
        match mgr.clear(id, t1) {
            Some(ClearOutcome::Cleared(record)) => assert_eq!(record.status, OverrideStatus::Cleared),
            other => panic!("expected cleared, got {:?}", other),
        }
        assert_eq!(mgr.clear(id, t1), Some(ClearOutcome::AlreadyInactive));
        assert_eq!(mgr.clear(Uuid::new_v4(), t1), None);
        assert!(mgr.sweep_expired(t0 + Duration::seconds(120)).is_empty());
    }

    #[test]
    fn test_late_sample_after_expiry_creates_new_override() {
        let mut mgr = manager();
        let t0 = Utc::now();
        mgr.on_emergency_detected(&emergency(Direction::East, t0), t0);

        let late = t0 + Duration::seconds(65);
        let decision = mgr.on_emergency_detected(&emergency(Direction::West, late), late);
        assert!(matches!(decision, OverrideDecision::Created(_)));
        assert_eq!(mgr.history().count(), 1);
    }

    #[test]
    fn test_history_bounded() {
        let mut mgr = EmergencyOverrideManager::new(
            location(),
            OverrideConfig {
                duration_secs: 1,
                history_capacity: 2,
            },
        );
        let mut t = Utc::now();
        for _ in 0..5 {
            mgr.on_emergency_detected(&emergency(Direction::North, t), t);
            t = t + Duration::seconds(5);
            mgr.sweep_expired(t);
        }
        assert_eq!(mgr.history().count(), 2);
    }

    proptest! {
        #[test]
        fn prop_at_most_one_active(
            steps in proptest::collection::vec((0u8..4, 0i64..90, any::<bool>()), 1..60)
        ) {
            let mut mgr = manager();
            let mut now = Utc::now();
            let mut active_ids = std::collections::HashSet::new();

            for (dir, advance, sweep) in steps {
                now = now + Duration::seconds(advance);
                let direction = Direction::ALL[dir as usize];
                if sweep {
                    mgr.sweep_expired(now);
                } else {
                    mgr.on_emergency_detected(&emergency(direction, now), now);
                }

                // replay events: an id may only become active after the previous one finished
                for event in mgr.drain_events() {
                    match event.kind {
                        OverrideEventKind::Created => {
                            prop_assert!(active_ids.is_empty());
                            active_ids.insert(event.record.override_id);
                        }
                        OverrideEventKind::Refreshed => {
                            prop_assert!(active_ids.contains(&event.record.override_id));
                        }
                        OverrideEventKind::Expired | OverrideEventKind::Cleared => {
                            prop_assert!(active_ids.remove(&event.record.override_id));
                        }
                    }
                }
                prop_assert_eq!(active_ids.len(), usize::from(mgr.active().is_some()));
            }
        }
    }
}
