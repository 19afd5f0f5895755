//! Location actor
//!
//! Each location runs one task that owns its [`SignalStateCoordinator`].
//! Commands arrive over a bounded mpsc queue and are applied one at a time in
//! arrival order; the rotation cadence is a local interval. Snapshots leave
//! through a `watch` channel and the live broadcaster, override lifecycle
//! events through the engine's event channel.

use crate::clock::Clock;
use crate::coordinator::{SignalStateCoordinator, Trigger};
use crate::index::OverrideIndex;
use crate::EngineError;
use emergency_override::ClearOutcome;
use live_broadcast::LiveStateBroadcaster;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use traffic_model::{
    DetectionSample, DirectionState, EmergencyOverride, ManualTiming, OverrideEvent, SignalState,
};
use uuid::Uuid;

/// Work for a location actor
#[derive(Debug)]
pub(crate) enum Command {
    Ingest {
        sample: DetectionSample,
        reply: oneshot::Sender<DirectionState>,
    },
    SetManual {
        timing: ManualTiming,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    ClearManual {
        reply: oneshot::Sender<bool>,
    },
    ClearOverride {
        override_id: Uuid,
        reply: oneshot::Sender<Option<ClearOutcome>>,
    },
    Sweep {
        reply: Option<oneshot::Sender<Vec<Uuid>>>,
    },
    History {
        reply: oneshot::Sender<Vec<EmergencyOverride>>,
    },
    /// Publish a final inactive snapshot and stop
    Deactivate,
    /// Stop without publishing
    Shutdown,
}

/// Shared outlets every actor publishes to
#[derive(Clone)]
pub(crate) struct Outlets {
    pub clock: Arc<dyn Clock>,
    pub broadcaster: Arc<LiveStateBroadcaster>,
    pub events: broadcast::Sender<OverrideEvent>,
    pub index: Arc<OverrideIndex>,
}

pub(crate) struct LocationActor {
    coordinator: SignalStateCoordinator,
    commands: mpsc::Receiver<Command>,
    snapshots: watch::Sender<Arc<SignalState>>,
    outlets: Outlets,
    cadence: Duration,
}

impl LocationActor {
    pub fn new(
        coordinator: SignalStateCoordinator,
        commands: mpsc::Receiver<Command>,
        snapshots: watch::Sender<Arc<SignalState>>,
        outlets: Outlets,
        cadence: Duration,
    ) -> Self {
        Self {
            coordinator,
            commands,
            snapshots,
            outlets,
            cadence,
        }
    }

    pub async fn run(mut self) {
        let location = self.coordinator.location_id().clone();
        info!("Location actor for {} started", location);

        let mut rotation = interval(self.cadence);
        rotation.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        rotation.tick().await;

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Deactivate) => {
                            let now = self.outlets.clock.now();
                            let last = self.coordinator.deactivate(now);
                            self.flush_events();
                            self.publish(last);
                            break;
                        }
                        Some(Command::Shutdown) | None => break,
                        Some(command) => self.handle(command),
                    }
                }
                _ = rotation.tick() => {
                    let now = self.outlets.clock.now();
                    self.settle(now, Trigger::Tick);
                }
            }
        }

        info!("Location actor for {} stopped", location);
    }

    fn handle(&mut self, command: Command) {
        let now = self.outlets.clock.now();

        match command {
            Command::Ingest { sample, reply } => {
                let density = self.coordinator.ingest(&sample, now);
                metrics::counter!("signal_samples_ingested_total").increment(1);
                self.settle(now, Trigger::Event);
                // the caller may have stopped waiting
                let _ = reply.send(density);
            }
            Command::SetManual { timing, reply } => {
                let result = self.coordinator.set_manual(timing);
                if result.is_ok() {
                    self.settle(now, Trigger::Event);
                }
                let _ = reply.send(result);
            }
            Command::ClearManual { reply } => {
                let cleared = self.coordinator.clear_manual();
                self.settle(now, Trigger::Event);
                let _ = reply.send(cleared);
            }
            Command::ClearOverride { override_id, reply } => {
                let outcome = self.coordinator.clear_override(override_id, now);
                self.settle(now, Trigger::Event);
                let _ = reply.send(outcome);
            }
            Command::Sweep { reply } => {
                let expired = self.coordinator.sweep(now);
                if !expired.is_empty() {
                    debug!(
                        "Swept {} override(s) at {}",
                        expired.len(),
                        self.coordinator.location_id()
                    );
                }
                // sweeps also age densities and finish yellow clearances
                self.settle(now, Trigger::Event);
                if let Some(reply) = reply {
                    let _ = reply.send(expired);
                }
            }
            Command::History { reply } => {
                let _ = reply.send(self.coordinator.override_history());
            }
            Command::Deactivate | Command::Shutdown => {}
        }
    }

    /// Re-evaluate, then push out the snapshot and any override events
    fn settle(&mut self, now: chrono::DateTime<chrono::Utc>, trigger: Trigger) {
        let state = self.coordinator.evaluate(now, trigger);
        self.flush_events();
        if let Some(state) = state {
            self.publish(state);
        }
    }

    fn flush_events(&mut self) {
        for event in self.coordinator.drain_override_events() {
            metrics::counter!("signal_overrides_total", "event" => event.kind.as_str()).increment(1);
            self.outlets.index.apply(&event);
            if self.outlets.events.send(event).is_err() {
                debug!("No override event listeners");
            }
        }
    }

    fn publish(&self, state: Arc<SignalState>) {
        self.snapshots.send_replace(Arc::clone(&state));
        let delivered = self.outlets.broadcaster.publish(state);
        if delivered == 0 {
            debug!("State for {} published with no live subscribers", self.coordinator.location_id());
        }
    }
}

impl Drop for LocationActor {
    fn drop(&mut self) {
        if self.coordinator.active_override().is_some() {
            warn!(
                "Location {} stopped with an active emergency override",
                self.coordinator.location_id()
            );
        }
    }
}
