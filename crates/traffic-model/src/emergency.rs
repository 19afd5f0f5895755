//! Emergency override records and lifecycle events

use crate::{Direction, LocationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of emergency service behind an override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    FireService,
    Ambulance,
    Police,
    #[default]
    General,
}

impl PriorityLevel {
    /// Classify from the detector class of the emergency vehicle.
    ///
    /// Large-body classes are taken as fire appliances, car-sized ones as
    /// ambulances.
    pub fn classify(class: Option<&str>) -> Self {
        let Some(class) = class else {
            return PriorityLevel::General;
        };
        let class = class.trim().to_ascii_lowercase();
        if class.starts_with("police") {
            PriorityLevel::Police
        } else if class.starts_with("fire") || class == "bus" || class == "truck" {
            PriorityLevel::FireService
        } else if class == "ambulance" || class == "car" || class == "van" {
            PriorityLevel::Ambulance
        } else {
            PriorityLevel::General
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityLevel::FireService => "fire_service",
            PriorityLevel::Ambulance => "ambulance",
            PriorityLevel::Police => "police",
            PriorityLevel::General => "general",
        }
    }
}

/// Lifecycle status of one override instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideStatus {
    Active,
    Expired,
    Cleared,
}

/// A temporary green grant for the approach of a detected emergency vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyOverride {
    pub override_id: Uuid,
    pub location_id: LocationId,
    /// Most recent emergency-bearing direction
    pub direction: Direction,
    pub priority_level: PriorityLevel,
    pub activated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: OverrideStatus,
    pub triggering_sample_count: u32,
}

impl EmergencyOverride {
    pub fn is_active(&self) -> bool {
        self.status == OverrideStatus::Active
    }

    /// Whole seconds left before expiry, rounded up, never negative
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u32 {
        let millis = (self.expires_at - now).num_milliseconds();
        if millis <= 0 {
            0
        } else {
            ((millis + 999) / 1000).min(u32::MAX as i64) as u32
        }
    }
}

/// Override lifecycle transition kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideEventKind {
    Created,
    Refreshed,
    Expired,
    Cleared,
}

impl OverrideEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideEventKind::Created => "created",
            OverrideEventKind::Refreshed => "refreshed",
            OverrideEventKind::Expired => "expired",
            OverrideEventKind::Cleared => "cleared",
        }
    }
}

/// Lifecycle event handed to the audit collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideEvent {
    pub kind: OverrideEventKind,
    /// Override as it stands after the transition
    pub record: EmergencyOverride,
    pub at: DateTime<Utc>,
}
