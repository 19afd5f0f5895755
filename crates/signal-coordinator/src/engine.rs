//! Signal engine
//!
//! Registry of location actors plus the engine-wide pieces they share: the
//! sample validator, the live broadcaster, the override index and the
//! independent expiry sweep.

use crate::actor::{Command, LocationActor, Outlets};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::coordinator::SignalStateCoordinator;
use crate::index::OverrideIndex;
use crate::EngineError;
use emergency_override::ClearOutcome;
use live_broadcast::{LiveStateBroadcaster, Subscriber};
use sample_validator::SampleValidator;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use traffic_model::{
    DetectionSample, Direction, DirectionState, EmergencyOverride, LocationId, ManualTiming,
    OverrideEvent, SignalState,
};
use uuid::Uuid;

struct LocationHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Arc<SignalState>>,
    task: Option<JoinHandle<()>>,
    active: bool,
}

struct EngineInner {
    config: EngineConfig,
    validator: SampleValidator,
    locations: RwLock<HashMap<LocationId, LocationHandle>>,
    outlets: Outlets,
    shutdown: watch::Sender<bool>,
    started: AtomicBool,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to a running engine; cheap to clone
#[derive(Clone)]
pub struct SignalEngine {
    inner: Arc<EngineInner>,
}

impl SignalEngine {
    /// Create the engine and spawn actors for configured locations.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self, EngineError> {
        config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(EngineError::NoRuntime);
        }

        let (events, _) = broadcast::channel(config.event_queue_capacity);
        let (shutdown, _) = watch::channel(false);

        let engine = Self {
            inner: Arc::new(EngineInner {
                validator: SampleValidator::new(config.validation_config()),
                locations: RwLock::new(HashMap::new()),
                outlets: Outlets {
                    clock,
                    broadcaster: Arc::new(LiveStateBroadcaster::new(config.broadcast_config())),
                    events,
                    index: Arc::new(OverrideIndex::new()),
                },
                shutdown,
                started: AtomicBool::new(false),
                timers: Mutex::new(Vec::new()),
                config,
            }),
        };

        for seed in &engine.inner.config.locations {
            let location_id = LocationId::new(seed.id.as_str())?;
            engine.register(location_id, &seed.directions)?;
        }

        info!(
            "Signal engine ready ({} configured location(s))",
            engine.inner.config.locations.len()
        );
        Ok(engine)
    }

    /// Start the expiry sweep timer
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            warn!("Signal engine already started");
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.sweep_interval();
        let shutdown = self.inner.shutdown.subscribe();
        let handle = tokio::spawn(run_sweeper(weak, period, shutdown));

        self.inner
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        info!("Expiry sweep running every {:?}", period);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Register a location ahead of its first sample.
    ///
    /// Registering a location that already exists is a no-op.
    pub fn register(&self, location_id: LocationId, directions: &[Direction]) -> Result<(), EngineError> {
        let mut locations = self
            .inner
            .locations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !locations.contains_key(&location_id) {
            let handle = self.spawn_location(location_id.clone(), directions);
            locations.insert(location_id, handle);
            metrics::gauge!("signal_locations").set(locations.len() as f64);
        }
        Ok(())
    }

    fn spawn_location(&self, location_id: LocationId, directions: &[Direction]) -> LocationHandle {
        let config = &self.inner.config;
        let now = self.inner.outlets.clock.now();

        let coordinator = SignalStateCoordinator::new(location_id.clone(), directions, config, now);
        let (commands, receiver) = mpsc::channel(config.command_queue_capacity);
        let (snapshots_tx, snapshots) = watch::channel(coordinator.state());

        let actor = LocationActor::new(
            coordinator,
            receiver,
            snapshots_tx,
            self.inner.outlets.clone(),
            config.rotation_cadence(),
        );
        let task = tokio::spawn(actor.run());

        info!("Registered location {}", location_id);
        LocationHandle {
            commands,
            snapshots,
            task: Some(task),
            active: true,
        }
    }

    /// Command queue of a live location, optionally registering it
    fn sender(&self, location_id: &LocationId, register: bool) -> Result<mpsc::Sender<Command>, EngineError> {
        {
            let locations = self
                .inner
                .locations
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match locations.get(location_id) {
                Some(handle) if handle.active => return Ok(handle.commands.clone()),
                Some(_) => return Err(EngineError::LocationInactive(location_id.clone())),
                None if !register => return Err(EngineError::LocationNotFound(location_id.clone())),
                None => {}
            }
        }

        self.register(location_id.clone(), &[])?;
        let locations = self
            .inner
            .locations
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match locations.get(location_id) {
            Some(handle) if handle.active => Ok(handle.commands.clone()),
            Some(_) => Err(EngineError::LocationInactive(location_id.clone())),
            None => Err(EngineError::LocationNotFound(location_id.clone())),
        }
    }

    async fn request<T>(
        &self,
        location_id: &LocationId,
        register: bool,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, EngineError> {
        let commands = self.sender(location_id, register)?;
        let (reply, response) = oneshot::channel();
        commands
            .send(command(reply))
            .await
            .map_err(|_| EngineError::ChannelClosed(location_id.clone()))?;
        response
            .await
            .map_err(|_| EngineError::ChannelClosed(location_id.clone()))
    }

    /// Validate a detector sample and apply it to its location
    pub async fn ingest(&self, sample: DetectionSample) -> Result<DirectionState, EngineError> {
        let now = self.inner.outlets.clock.now();
        let result = self.inner.validator.sanitize(sample, now);
        for problem in &result.errors {
            debug!(
                "Sample for {}/{} corrected: {}",
                result.sample.location_id, result.sample.direction, problem
            );
        }

        let sample = result.sample;
        let location_id = sample.location_id.clone();
        match self
            .request(&location_id, true, |reply| Command::Ingest { sample, reply })
            .await
        {
            Err(EngineError::LocationInactive(id)) => {
                warn!("Ignoring sample for deactivated location {}", id);
                Err(EngineError::LocationInactive(id))
            }
            other => other,
        }
    }

    /// Forward a detector stream until it closes
    pub fn attach_feed(&self, mut feed: mpsc::Receiver<DetectionSample>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut forwarded: u64 = 0;
            while let Some(sample) = feed.recv().await {
                match engine.ingest(sample).await {
                    Ok(_) => forwarded += 1,
                    Err(e) => warn!("Detector sample rejected: {}", e),
                }
            }
            info!("Detector feed closed after {} sample(s)", forwarded);
        })
    }

    /// Pin a location to an operator allocation
    pub async fn set_manual_timing(
        &self,
        location_id: &LocationId,
        timing: ManualTiming,
    ) -> Result<(), EngineError> {
        self.request(location_id, false, |reply| Command::SetManual { timing, reply })
            .await?
    }

    /// Return a location to adaptive control; `false` if it was not manual
    pub async fn clear_manual(&self, location_id: &LocationId) -> Result<bool, EngineError> {
        self.request(location_id, false, |reply| Command::ClearManual { reply })
            .await
    }

    /// Clear an emergency override immediately
    pub async fn clear_override(&self, override_id: Uuid) -> Result<ClearOutcome, EngineError> {
        let owner = self
            .inner
            .outlets
            .index
            .owner(&override_id)
            .ok_or(EngineError::OverrideNotFound(override_id))?;

        let outcome = match self
            .request(&owner, false, |reply| Command::ClearOverride { override_id, reply })
            .await
        {
            Ok(outcome) => outcome,
            // deactivation ended every override of the location
            Err(EngineError::LocationInactive(_)) => Some(ClearOutcome::AlreadyInactive),
            Err(e) => return Err(e),
        };
        outcome.ok_or(EngineError::OverrideNotFound(override_id))
    }

    /// Expire overrides at every live location
    pub async fn sweep_expired(&self) -> Vec<Uuid> {
        let mut pending = Vec::new();
        for (location_id, commands) in self.live_senders() {
            let (reply, response) = oneshot::channel();
            if commands.send(Command::Sweep { reply: Some(reply) }).await.is_ok() {
                pending.push((location_id, response));
            }
        }

        let mut expired = Vec::new();
        for (location_id, response) in pending {
            match response.await {
                Ok(ids) => expired.extend(ids),
                Err(_) => debug!("Location {} stopped during sweep", location_id),
            }
        }
        expired
    }

    fn live_senders(&self) -> Vec<(LocationId, mpsc::Sender<Command>)> {
        let locations = self
            .inner
            .locations
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        locations
            .iter()
            .filter(|(_, handle)| handle.active)
            .map(|(id, handle)| (id.clone(), handle.commands.clone()))
            .collect()
    }

    pub fn current_state(&self, location_id: &LocationId) -> Option<Arc<SignalState>> {
        let locations = self
            .inner
            .locations
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        locations
            .get(location_id)
            .map(|handle| Arc::clone(&handle.snapshots.borrow()))
    }

    /// Latest snapshot of every location, ordered by location id
    pub fn states(&self) -> Vec<Arc<SignalState>> {
        let locations = self
            .inner
            .locations
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut states: Vec<_> = locations
            .values()
            .map(|handle| Arc::clone(&handle.snapshots.borrow()))
            .collect();
        states.sort_by(|a, b| a.location_id.cmp(&b.location_id));
        states
    }

    pub fn active_overrides(&self) -> Vec<EmergencyOverride> {
        self.inner.outlets.index.active()
    }

    /// Finished overrides of a location, oldest first
    pub async fn override_history(&self, location_id: &LocationId) -> Result<Vec<EmergencyOverride>, EngineError> {
        self.request(location_id, false, |reply| Command::History { reply })
            .await
    }

    /// Live state feed: every location's snapshot now, then changes
    pub fn subscribe(&self) -> Subscriber {
        self.inner.outlets.broadcaster.subscribe()
    }

    pub fn unsubscribe(&self, subscriber: Subscriber) {
        self.inner.outlets.broadcaster.unsubscribe(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.outlets.broadcaster.subscriber_count()
    }

    /// Override lifecycle events for audit consumers
    pub fn subscribe_override_events(&self) -> broadcast::Receiver<OverrideEvent> {
        self.inner.outlets.events.subscribe()
    }

    /// Stop a location after publishing its final snapshot
    pub async fn deactivate_location(&self, location_id: &LocationId) -> Result<Arc<SignalState>, EngineError> {
        let (commands, task) = {
            let mut locations = self
                .inner
                .locations
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let handle = locations
                .get_mut(location_id)
                .ok_or_else(|| EngineError::LocationNotFound(location_id.clone()))?;
            if !handle.active {
                return Err(EngineError::LocationInactive(location_id.clone()));
            }
            handle.active = false;
            (handle.commands.clone(), handle.task.take())
        };

        if commands.send(Command::Deactivate).await.is_err() {
            warn!("Location {} actor already stopped", location_id);
        }
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Location {} actor failed: {}", location_id, e);
            }
        }
        self.inner.outlets.index.retire_location(location_id);

        self.current_state(location_id)
            .ok_or_else(|| EngineError::LocationNotFound(location_id.clone()))
    }

    /// Stop timers and every location actor
    pub async fn shutdown(&self) {
        info!("Shutting down signal engine");
        self.inner.shutdown.send_replace(true);

        let actors: Vec<_> = {
            let mut locations = self
                .inner
                .locations
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            locations
                .values_mut()
                .filter(|handle| handle.active)
                .map(|handle| {
                    handle.active = false;
                    (handle.commands.clone(), handle.task.take())
                })
                .collect()
        };

        for (commands, task) in actors {
            let _ = commands.send(Command::Shutdown).await;
            if let Some(task) = task {
                if let Err(e) = task.await {
                    error!("Location actor failed during shutdown: {}", e);
                }
            }
        }

        let timers: Vec<_> = self
            .inner
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for timer in timers {
            let _ = timer.await;
        }
        info!("Signal engine stopped");
    }
}

/// Independent expiry timer; runs whether or not samples arrive
async fn run_sweeper(
    engine: Weak<EngineInner>,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(inner) = engine.upgrade() else {
                    break;
                };
                let engine = SignalEngine { inner };
                for (location_id, commands) in engine.live_senders() {
                    // a saturated location is swept on the next round
                    if let Err(mpsc::error::TrySendError::Full(_)) =
                        commands.try_send(Command::Sweep { reply: None })
                    {
                        debug!("Sweep skipped for busy location {}", location_id);
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Expiry sweep stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::LocationSeed;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use traffic_model::{OverrideEventKind, SignalMode, SignalPhase};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
    }

    fn loc(id: &str) -> LocationId {
        LocationId::new(id).unwrap()
    }

    fn sample(location: &str, direction: Direction, cars: i64) -> DetectionSample {
        DetectionSample::new(loc(location), direction, t0()).with_count("car", cars)
    }

    fn engine_with(config: EngineConfig) -> (SignalEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let engine = SignalEngine::new(config, clock.clone()).unwrap();
        (engine, clock)
    }

    fn engine() -> (SignalEngine, Arc<ManualClock>) {
        engine_with(EngineConfig::default())
    }

    #[tokio::test]
    async fn test_ingest_drives_adaptive_state() {
        let (engine, _clock) = engine();

        let north = engine.ingest(sample("a", Direction::North, 25)).await.unwrap();
        assert_eq!(north.vehicle_count, 25);
        engine.ingest(sample("a", Direction::South, 10)).await.unwrap();

        let state = engine.current_state(&loc("a")).unwrap();
        assert_eq!(state.mode, SignalMode::Adaptive);
        assert_eq!(state.active_direction, Some(Direction::North));
        assert_eq!(state.directions[&Direction::North].green_time_seconds, 90);
        assert_eq!(state.directions[&Direction::South].green_time_seconds, 45);
    }

    #[tokio::test]
    async fn test_emergency_expires_on_sweep() {
        let (engine, clock) = engine();
        let mut events = engine.subscribe_override_events();

        let emergency = sample("a", Direction::East, 1).with_emergency(0.9, Some("ambulance"));
        engine.ingest(emergency).await.unwrap();

        let state = engine.current_state(&loc("a")).unwrap();
        assert_eq!(state.mode, SignalMode::Emergency);
        assert_eq!(state.phase_of(Direction::East), Some(SignalPhase::Green));
        assert_eq!(engine.active_overrides().len(), 1);
        assert_eq!(events.recv().await.unwrap().kind, OverrideEventKind::Created);

        clock.advance(Duration::seconds(61));
        let expired = engine.sweep_expired().await;
        assert_eq!(expired.len(), 1);

        let state = engine.current_state(&loc("a")).unwrap();
        assert_eq!(state.mode, SignalMode::Adaptive);
        assert!(engine.active_overrides().is_empty());
        assert_eq!(events.recv().await.unwrap().kind, OverrideEventKind::Expired);

        let history = engine.override_history(&loc("a")).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].override_id, expired[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_timer_expires_without_traffic() {
        let (engine, clock) = engine();
        engine.start();

        let emergency = sample("quiet", Direction::West, 0).with_emergency(1.0, None);
        engine.ingest(emergency).await.unwrap();
        assert_eq!(
            engine.current_state(&loc("quiet")).unwrap().mode,
            SignalMode::Emergency
        );

        clock.advance(Duration::seconds(61));
        tokio::time::sleep(std::time::Duration::from_millis(2500)).await;

        assert_eq!(
            engine.current_state(&loc("quiet")).unwrap().mode,
            SignalMode::Adaptive
        );
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_clear_override_outcomes() {
        let (engine, _clock) = engine();

        let emergency = sample("a", Direction::South, 0).with_emergency(1.0, Some("police"));
        engine.ingest(emergency).await.unwrap();
        let id = engine.active_overrides()[0].override_id;

        assert!(matches!(
            engine.clear_override(id).await.unwrap(),
            ClearOutcome::Cleared(_)
        ));
        assert_eq!(engine.current_state(&loc("a")).unwrap().mode, SignalMode::Adaptive);

        assert!(matches!(
            engine.clear_override(id).await.unwrap(),
            ClearOutcome::AlreadyInactive
        ));
        assert!(matches!(
            engine.clear_override(Uuid::new_v4()).await,
            Err(EngineError::OverrideNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_manual_timing_requires_known_location() {
        let (engine, _clock) = engine();
        let timing = ManualTiming::from_times([(Direction::North, 30)]);

        assert!(matches!(
            engine.set_manual_timing(&loc("nowhere"), timing.clone()).await,
            Err(EngineError::LocationNotFound(_))
        ));

        engine.ingest(sample("a", Direction::North, 4)).await.unwrap();
        engine.set_manual_timing(&loc("a"), timing).await.unwrap();
        assert_eq!(engine.current_state(&loc("a")).unwrap().mode, SignalMode::Manual);

        assert!(engine.clear_manual(&loc("a")).await.unwrap());
        assert_eq!(engine.current_state(&loc("a")).unwrap().mode, SignalMode::Adaptive);
    }

    #[tokio::test]
    async fn test_locations_do_not_interfere() {
        let (engine, _clock) = engine();

        engine.ingest(sample("a", Direction::North, 10)).await.unwrap();
        engine.ingest(sample("b", Direction::North, 10)).await.unwrap();
        let emergency = sample("a", Direction::East, 0).with_emergency(1.0, None);
        engine.ingest(emergency).await.unwrap();

        assert_eq!(engine.current_state(&loc("a")).unwrap().mode, SignalMode::Emergency);
        assert_eq!(engine.current_state(&loc("b")).unwrap().mode, SignalMode::Adaptive);
        assert_eq!(engine.states().len(), 2);
    }

    #[tokio::test]
    async fn test_low_confidence_emergency_ignored() {
        let (engine, _clock) = engine_with(EngineConfig {
            min_emergency_confidence: 0.5,
            ..Default::default()
        });

        let weak = sample("a", Direction::East, 3).with_emergency(0.2, Some("ambulance"));
        engine.ingest(weak).await.unwrap();

        assert_eq!(engine.current_state(&loc("a")).unwrap().mode, SignalMode::Adaptive);
        assert!(engine.active_overrides().is_empty());
    }

    #[tokio::test]
    async fn test_subscriber_sees_snapshot_then_updates() {
        let (engine, _clock) = engine();
        engine.ingest(sample("a", Direction::North, 5)).await.unwrap();

        let mut subscriber = engine.subscribe();
        let first = subscriber.try_recv().unwrap();
        assert_eq!(first.location_id, loc("a"));

        engine.ingest(sample("a", Direction::North, 6)).await.unwrap();
        let next = subscriber.recv().await.unwrap();
        assert!(next.version > first.version);

        engine.unsubscribe(subscriber);
        assert_eq!(engine.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_attached_feed_forwards_until_closed() {
        let (engine, _clock) = engine();
        let (tx, rx) = mpsc::channel(8);
        let feed = engine.attach_feed(rx);

        for cars in [3, 7, 11] {
            tx.send(sample("cam", Direction::West, cars)).await.unwrap();
        }
        drop(tx);
        feed.await.unwrap();

        let state = engine.current_state(&loc("cam")).unwrap();
        assert_eq!(state.directions[&Direction::West].vehicle_count, 11);
    }

    #[tokio::test]
    async fn test_deactivated_location_ignores_samples() {
        let (engine, _clock) = engine();
        engine.ingest(sample("a", Direction::North, 5)).await.unwrap();

        let last = engine.deactivate_location(&loc("a")).await.unwrap();
        assert!(!last.active);

        assert!(matches!(
            engine.ingest(sample("a", Direction::North, 9)).await,
            Err(EngineError::LocationInactive(_))
        ));
        let state = engine.current_state(&loc("a")).unwrap();
        assert_eq!(state.version, last.version);
        assert!(matches!(
            engine.deactivate_location(&loc("a")).await,
            Err(EngineError::LocationInactive(_))
        ));
    }

    #[tokio::test]
    async fn test_deactivation_ends_active_override() {
        let (engine, _clock) = engine();
        let mut events = engine.subscribe_override_events();

        let emergency = sample("a", Direction::North, 2).with_emergency(1.0, Some("ambulance"));
        engine.ingest(emergency).await.unwrap();
        let id = engine.active_overrides()[0].override_id;
        assert_eq!(events.recv().await.unwrap().kind, OverrideEventKind::Created);

        let last = engine.deactivate_location(&loc("a")).await.unwrap();
        assert!(!last.active);
        assert!(last.override_id.is_none());

        let terminal = events.recv().await.unwrap();
        assert_eq!(terminal.kind, OverrideEventKind::Cleared);
        assert_eq!(terminal.record.override_id, id);
        assert!(engine.active_overrides().is_empty());

        assert!(matches!(
            engine.clear_override(id).await.unwrap(),
            ClearOutcome::AlreadyInactive
        ));
    }

    #[tokio::test]
    async fn test_configured_locations_registered() {
        let (engine, _clock) = engine_with(EngineConfig {
            locations: vec![LocationSeed {
                id: "main-and-5th".to_string(),
                directions: vec![Direction::North, Direction::South],
            }],
            ..Default::default()
        });

        let states = engine.states();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].directions.len(), 2);
        engine.shutdown().await;

        assert!(matches!(
            engine.ingest(sample("main-and-5th", Direction::North, 1)).await,
            Err(EngineError::LocationInactive(_))
        ));
    }

    #[test]
    fn test_new_requires_runtime() {
        let clock = Arc::new(ManualClock::new(t0()));
        assert!(matches!(
            SignalEngine::new(EngineConfig::default(), clock),
            Err(EngineError::NoRuntime)
        ));
    }
}
