//! Audit log store

use crate::AuditError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use traffic_model::{LocationId, OverrideEvent, OverrideEventKind};
use uuid::Uuid;

/// Stored lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    #[serde(flatten)]
    pub event: OverrideEvent,
}

/// Filter for [`AuditLog::query`]; results are newest first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    pub location_id: Option<LocationId>,
    pub override_id: Option<Uuid>,
    pub kind: Option<OverrideEventKind>,
    /// Only expired and cleared events
    #[serde(default)]
    pub terminal_only: bool,
    pub limit: Option<usize>,
}

impl AuditQuery {
    fn matches(&self, record: &AuditRecord) -> bool {
        let event = &record.event;
        self.location_id
            .as_ref()
            .map_or(true, |id| &event.record.location_id == id)
            && self.override_id.map_or(true, |id| event.record.override_id == id)
            && self.kind.map_or(true, |kind| event.kind == kind)
            && (!self.terminal_only
                || matches!(
                    event.kind,
                    OverrideEventKind::Expired | OverrideEventKind::Cleared
                ))
    }
}

struct Entries {
    records: VecDeque<AuditRecord>,
    next_id: i64,
}

/// Bounded in-memory audit log; the oldest records go first
pub struct AuditLog {
    entries: Mutex<Entries>,
    max_records: usize,
}

impl AuditLog {
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(max_records: usize) -> Self {
        info!("Creating override audit log (retention {})", max_records);
        Self {
            entries: Mutex::new(Entries {
                records: VecDeque::with_capacity(max_records.min(1024)),
                next_id: 1,
            }),
            max_records: max_records.max(1),
        }
    }

    /// Append an event, returning its record id
    pub fn append(&self, event: OverrideEvent) -> Result<i64, AuditError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| AuditError::Store(format!("Lock error: {}", e)))?;

        let id = entries.next_id;
        entries.next_id += 1;

        while entries.records.len() >= self.max_records {
            entries.records.pop_front();
        }

        debug!(
            "Audit #{}: override {} {} at {}",
            id,
            event.record.override_id,
            event.kind.as_str(),
            event.record.location_id
        );
        entries.records.push_back(AuditRecord { id, event });
        Ok(id)
    }

    pub fn get(&self, id: i64) -> Result<AuditRecord, AuditError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| AuditError::Store(format!("Lock error: {}", e)))?;

        entries
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(AuditError::NotFound(id))
    }

    /// Matching records, newest first
    pub fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, AuditError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| AuditError::Store(format!("Lock error: {}", e)))?;

        Ok(entries
            .records
            .iter()
            .rev()
            .filter(|r| query.matches(r))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Record every event from an override event feed until it closes
pub fn spawn_recorder(
    log: Arc<AuditLog>,
    mut events: broadcast::Receiver<OverrideEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = log.append(event) {
                        warn!("Failed to record override event: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Audit recorder fell behind; {} event(s) lost", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        info!("Audit recorder stopped ({} records)", log.len());
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use traffic_model::{Direction, EmergencyOverride, OverrideStatus, PriorityLevel};

    fn event(kind: OverrideEventKind, location: &str, override_id: Uuid) -> OverrideEvent {
        let now = Utc::now();
        OverrideEvent {
            kind,
            record: EmergencyOverride {
                override_id,
                location_id: LocationId::new(location).unwrap(),
                direction: Direction::South,
                priority_level: PriorityLevel::Ambulance,
                activated_at: now,
                expires_at: now + Duration::seconds(60),
                status: OverrideStatus::Active,
                triggering_sample_count: 1,
            },
            at: now,
        }
    }

    #[test]
    fn test_append_and_get() {
        let log = AuditLog::new();
        let id = log
            .append(event(OverrideEventKind::Created, "a", Uuid::new_v4()))
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(log.get(id).unwrap().event.kind, OverrideEventKind::Created);
        assert!(matches!(log.get(99), Err(AuditError::NotFound(99))));
    }

    #[test]
    fn test_query_filters_newest_first() {
        let log = AuditLog::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        log.append(event(OverrideEventKind::Created, "a", first)).unwrap();
        log.append(event(OverrideEventKind::Created, "b", second)).unwrap();
        log.append(event(OverrideEventKind::Expired, "a", first)).unwrap();

        let at_a = log
            .query(&AuditQuery {
                location_id: Some(LocationId::new("a").unwrap()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(at_a.len(), 2);
        assert_eq!(at_a[0].event.kind, OverrideEventKind::Expired);

        let terminal = log
            .query(&AuditQuery {
                terminal_only: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(terminal.len(), 1);

        let latest = log
            .query(&AuditQuery {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(latest[0].id, 3);

        let by_id = log
            .query(&AuditQuery {
                override_id: Some(second),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_id.len(), 1);
    }

    #[test]
    fn test_retention_limit() {
        let log = AuditLog::with_capacity(5);
        for _ in 0..10 {
            log.append(event(OverrideEventKind::Refreshed, "a", Uuid::new_v4()))
                .unwrap();
        }
        assert_eq!(log.len(), 5);
        let all = log.query(&AuditQuery::default()).unwrap();
        assert_eq!(all.last().unwrap().id, 6);
    }

    #[test]
    fn test_record_serializes_flat() {
        let record = AuditRecord {
            id: 7,
            event: event(OverrideEventKind::Cleared, "a", Uuid::new_v4()),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["kind"], "cleared");
        assert_eq!(json["record"]["location_id"], "a");
    }

    #[tokio::test]
    async fn test_recorder_drains_feed() {
        let log = Arc::new(AuditLog::new());
        let (tx, rx) = broadcast::channel(16);
        let recorder = spawn_recorder(log.clone(), rx);

        tx.send(event(OverrideEventKind::Created, "a", Uuid::new_v4())).unwrap();
        tx.send(event(OverrideEventKind::Cleared, "a", Uuid::new_v4())).unwrap();
        drop(tx);
        recorder.await.unwrap();

        assert_eq!(log.len(), 2);
    }
}
