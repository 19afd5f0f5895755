//! Per-location signal state authority
//!
//! One [`SignalStateCoordinator`] owns everything that decides what a single
//! intersection shows: the density windows, the emergency override slot, any
//! operator-set manual timing and the last published [`SignalState`]. All
//! mutation goes through `&mut self`, so callers serialise access by owning
//! the coordinator (see [`crate::actor`]).
//!
//! Priority on every evaluation: an active emergency override wins, then a
//! manual allocation, then adaptive timing.
//!
//! In adaptive mode the green direction is re-picked on every rotation tick,
//! not when its green time runs out. A direction that becomes busier takes
//! over at the next tick even if the current green has time left. Between
//! ticks, samples only update counts and allocations.

use crate::config::EngineConfig;
use crate::EngineError;
use chrono::{DateTime, Duration, Timelike, Utc};
use density_aggregator::DensityAggregator;
use emergency_override::{ClearOutcome, EmergencyOverrideManager, OverrideDecision};
use signal_timing::{recommend_cycle_length, timing_efficiency, AdaptiveTimingCalculator, GreenBounds};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use traffic_model::{
    DetectionSample, Direction, DirectionState, EmergencyOverride, LocationId, ManualTiming,
    OverrideEvent, SignalMode, SignalPhase, SignalState,
};
use uuid::Uuid;

/// What caused an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Sample, override transition or sweep: keep the current adaptive green
    Event,
    /// Rotation cadence: the adaptive green may move
    Tick,
}

#[derive(Debug, Clone, Copy)]
struct Clearance {
    from: Direction,
    until: DateTime<Utc>,
}

/// Serialised decision core for one location
pub struct SignalStateCoordinator {
    location_id: LocationId,
    bounds: GreenBounds,
    staleness: Duration,
    yellow: Duration,
    peak_hours: Vec<u32>,
    aggregator: DensityAggregator,
    overrides: EmergencyOverrideManager,
    calculator: AdaptiveTimingCalculator,
    manual: Option<ManualTiming>,
    adaptive_green: Option<Direction>,
    clearance: Option<Clearance>,
    repick: bool,
    state: Arc<SignalState>,
}

impl SignalStateCoordinator {
    pub fn new(
        location_id: LocationId,
        directions: &[Direction],
        config: &EngineConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let mut aggregator = DensityAggregator::new(config.density_config());
        for direction in directions {
            aggregator.register_direction(*direction);
        }

        let mut state = SignalState::new(location_id.clone(), now);
        state.directions = aggregator.snapshot(now, config.staleness());

        Self {
            overrides: EmergencyOverrideManager::new(location_id.clone(), config.override_config()),
            location_id,
            bounds: config.bounds(),
            staleness: config.staleness(),
            yellow: config.yellow(),
            peak_hours: config.peak_hours.clone(),
            aggregator,
            calculator: AdaptiveTimingCalculator::new(config.scaling_k),
            manual: None,
            adaptive_green: None,
            clearance: None,
            repick: false,
            state: Arc::new(state),
        }
    }

    pub fn location_id(&self) -> &LocationId {
        &self.location_id
    }

    /// Last produced snapshot
    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    pub fn active_override(&self) -> Option<&EmergencyOverride> {
        self.overrides.active()
    }

    /// Terminal overrides, oldest first
    pub fn override_history(&self) -> Vec<EmergencyOverride> {
        self.overrides.history().cloned().collect()
    }

    /// Lifecycle events produced since the last drain
    pub fn drain_override_events(&mut self) -> Vec<OverrideEvent> {
        self.overrides.drain_events()
    }

    pub fn manual_timing(&self) -> Option<&ManualTiming> {
        self.manual.as_ref()
    }

    /// Fold a sample into density state and, if it carries an emergency,
    /// into the override slot. Call [`evaluate`](Self::evaluate) afterwards.
    pub fn ingest(&mut self, sample: &DetectionSample, now: DateTime<Utc>) -> DirectionState {
        let density = self.aggregator.ingest(sample, now);

        if sample.emergency_detected {
            match self.overrides.on_emergency_detected(sample, now) {
                OverrideDecision::Created(record) => {
                    info!(
                        "Emergency mode at {}: {} green for override {}",
                        self.location_id, record.direction, record.override_id
                    );
                }
                OverrideDecision::Refreshed(record) => {
                    debug!("Override {} extended at {}", record.override_id, self.location_id);
                }
                OverrideDecision::Ignored => {}
            }
        }

        density
    }

    /// Install an operator allocation
    pub fn set_manual(&mut self, timing: ManualTiming) -> Result<(), EngineError> {
        if timing.directions.is_empty() {
            return Err(EngineError::InvalidManualTiming(
                "at least one direction is required".to_string(),
            ));
        }
        let greens = timing
            .directions
            .values()
            .filter(|p| p.phase == Some(SignalPhase::Green))
            .count();
        if greens > 1 {
            return Err(EngineError::InvalidManualTiming(format!(
                "{} directions requested green at once",
                greens
            )));
        }

        for direction in timing.directions.keys() {
            self.aggregator.register_direction(*direction);
        }
        info!("Manual timing set at {}: {:?}", self.location_id, timing.directions);
        self.manual = Some(timing);
        Ok(())
    }

    /// Return to adaptive control; `false` if no manual timing was set
    pub fn clear_manual(&mut self) -> bool {
        let was_set = self.manual.take().is_some();
        if was_set {
            info!("Manual timing cleared at {}", self.location_id);
            self.repick = true;
        }
        was_set
    }

    /// `None` when the id never belonged to this location
    pub fn clear_override(&mut self, override_id: Uuid, now: DateTime<Utc>) -> Option<ClearOutcome> {
        self.overrides.clear(override_id, now)
    }

    /// Expire overrides past their deadline
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.overrides.sweep_expired(now)
    }

    /// Rebuild the signal state at `now`.
    ///
    /// Returns the new snapshot when anything other than the version and
    /// timestamp changed, `None` otherwise.
    pub fn evaluate(&mut self, now: DateTime<Utc>, trigger: Trigger) -> Option<Arc<SignalState>> {
        if !self.state.active {
            return None;
        }
        // an overdue override never drives a snapshot, swept or not
        self.overrides.sweep_expired(now);

        let mut next = SignalState::new(self.location_id.clone(), now);
        next.directions = self.aggregator.snapshot(now, self.staleness);

        if let Some(record) = self.overrides.active().cloned() {
            self.apply_emergency(&mut next, &record, now);
        } else if self.manual.is_some() {
            self.apply_manual(&mut next);
        } else {
            self.apply_adaptive(&mut next, now, trigger);
        }

        if next.same_signal(&self.state) {
            return None;
        }

        next.version = self.state.version + 1;
        debug!(
            "{} v{}: {:?} green {:?}",
            self.location_id, next.version, next.mode, next.active_direction
        );
        self.state = Arc::new(next);
        Some(self.state())
    }

    /// Produce the final, inactive snapshot.
    ///
    /// An override still active is cleared first so its lifecycle ends with
    /// a terminal event.
    pub fn deactivate(&mut self, now: DateTime<Utc>) -> Arc<SignalState> {
        if let Some(override_id) = self.overrides.active().map(|o| o.override_id) {
            self.overrides.clear(override_id, now);
        }
        if self.state.active {
            let mut last = (*self.state).clone();
            last.active = false;
            last.override_id = None;
            last.version += 1;
            last.updated_at = now;
            warn!("Location {} deactivated at v{}", self.location_id, last.version);
            self.state = Arc::new(last);
        }
        self.state()
    }

    fn apply_emergency(&mut self, next: &mut SignalState, record: &EmergencyOverride, now: DateTime<Utc>) {
        next.directions.entry(record.direction).or_default();
        let remaining = record.remaining_seconds(now);

        for (direction, density) in next.directions.iter_mut() {
            if *direction == record.direction {
                density.signal_phase = SignalPhase::Green;
                density.green_time_seconds = remaining;
            } else {
                density.signal_phase = SignalPhase::Red;
                density.green_time_seconds = 0;
            }
        }

        next.mode = SignalMode::Emergency;
        next.active_direction = Some(record.direction);
        next.override_id = Some(record.override_id);

        // adaptive control picks afresh once the override ends
        self.adaptive_green = Some(record.direction);
        self.clearance = None;
        self.repick = true;
    }

    fn apply_manual(&mut self, next: &mut SignalState) {
        let Some(manual) = self.manual.as_ref() else {
            return;
        };

        let any_explicit = manual.directions.values().any(|p| p.phase.is_some());
        let longest = manual
            .directions
            .iter()
            .fold(None, |best: Option<(Direction, u32)>, (&dir, p)| match best {
                Some((_, secs)) if secs >= p.green_time_seconds => best,
                _ => Some((dir, p.green_time_seconds)),
            })
            .map(|(dir, _)| dir);

        for (direction, density) in next.directions.iter_mut() {
            match manual.directions.get(direction) {
                Some(requested) => {
                    density.green_time_seconds = self.bounds.clamp(requested.green_time_seconds);
                    density.signal_phase = match requested.phase {
                        Some(phase) => phase,
                        None if !any_explicit && longest == Some(*direction) => SignalPhase::Green,
                        None => SignalPhase::Red,
                    };
                }
                None => {
                    density.signal_phase = SignalPhase::Red;
                    density.green_time_seconds = 0;
                }
            }
        }

        next.mode = SignalMode::Manual;
        next.active_direction = next.green_directions().first().copied();

        self.adaptive_green = next.active_direction;
        self.clearance = None;
        self.repick = true;
    }

    fn apply_adaptive(&mut self, next: &mut SignalState, now: DateTime<Utc>, trigger: Trigger) {
        let counts = self.aggregator.timing_counts(now, self.staleness);
        if counts.is_empty() {
            return;
        }
        let timings = self
            .calculator
            .compute(&counts, self.bounds.min_green, self.bounds.max_green);

        for (direction, density) in next.directions.iter_mut() {
            density.green_time_seconds = timings.get(direction).copied().unwrap_or(self.bounds.min_green);
            density.signal_phase = SignalPhase::Red;
        }

        let peak = self.peak_hours.contains(&now.hour());
        next.cycle_length_seconds = Some(recommend_cycle_length(&counts, peak));
        next.efficiency = Some(timing_efficiency(&counts, &timings));

        let Some(best) = busiest(&counts) else {
            return;
        };

        if let Some(clearance) = self.clearance {
            if now < clearance.until {
                show(next, clearance.from, SignalPhase::Yellow);
                return;
            }
            self.clearance = None;
            self.adaptive_green = Some(best);
            show(next, best, SignalPhase::Green);
            return;
        }

        let current = self.adaptive_green.filter(|d| counts.contains_key(d));
        let target = match current {
            Some(current) if trigger == Trigger::Event && !self.repick => current,
            _ => best,
        };
        self.repick = false;

        if let Some(current) = current {
            if current != target && self.yellow > Duration::zero() {
                debug!(
                    "{}: clearing {} before {} gets green",
                    self.location_id, current, target
                );
                self.clearance = Some(Clearance {
                    from: current,
                    until: now + self.yellow,
                });
                show(next, current, SignalPhase::Yellow);
                return;
            }
        }

        self.adaptive_green = Some(target);
        show(next, target, SignalPhase::Green);
    }
}

/// Highest count wins; ties go to the lowest ordinal
fn busiest(counts: &BTreeMap<Direction, i64>) -> Option<Direction> {
    counts
        .iter()
        .fold(None, |best: Option<(Direction, i64)>, (&dir, &count)| match best {
            Some((_, top)) if top >= count => best,
            _ => Some((dir, count)),
        })
        .map(|(dir, _)| dir)
}

fn show(next: &mut SignalState, direction: Direction, phase: SignalPhase) {
    if let Some(density) = next.directions.get_mut(&direction) {
        density.signal_phase = phase;
    }
    next.active_direction = Some(direction);
}
