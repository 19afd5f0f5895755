//! Broadcaster Implementation

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, info};
use traffic_model::{LocationId, SignalState};

/// Broadcaster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Snapshots buffered per subscriber before older ones are dropped.
    ///
    /// Only snapshots superseded by a newer one for the same location are
    /// evicted, so a lagging subscriber always ends up with every
    /// location's latest state.
    pub queue_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { queue_capacity: 64 }
    }
}

/// Outbound buffer of one subscriber
struct SubscriberQueue {
    id: u64,
    buffer: Mutex<VecDeque<Arc<SignalState>>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl SubscriberQueue {
    /// Enqueue without waiting; returns true when an old snapshot was evicted
    fn push(&self, state: Arc<SignalState>) -> bool {
        let evicted = {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            let evicted = buffer.len() >= self.capacity
                && superseded(&buffer, &state)
                    .and_then(|index| buffer.remove(index))
                    .is_some();
            buffer.push_back(state);
            evicted
        };
        if evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        evicted
    }

    fn pop(&self) -> Option<Arc<SignalState>> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Oldest buffered snapshot that a later one (or `incoming`) replaces.
///
/// `None` when every buffered snapshot is the latest of its location; the
/// queue then grows past capacity, bounded by the number of locations.
fn superseded(buffer: &VecDeque<Arc<SignalState>>, incoming: &SignalState) -> Option<usize> {
    buffer.iter().enumerate().position(|(index, queued)| {
        queued.location_id == incoming.location_id
            || buffer
                .iter()
                .skip(index + 1)
                .any(|later| later.location_id == queued.location_id)
    })
}

/// Receiving end of a live subscription
pub struct Subscriber {
    queue: Arc<SubscriberQueue>,
    /// Last version delivered per location
    acknowledged: HashMap<LocationId, u64>,
}

impl Subscriber {
    pub fn id(&self) -> u64 {
        self.queue.id
    }

    /// Whether a snapshot is newer than what this subscriber already saw
    fn accept(&mut self, state: &SignalState) -> bool {
        match self.acknowledged.get(&state.location_id) {
            Some(&seen) if state.version <= seen => false,
            _ => {
                self.acknowledged
                    .insert(state.location_id.clone(), state.version);
                true
            }
        }
    }

    /// Take the next buffered snapshot without waiting
    pub fn try_recv(&mut self) -> Option<Arc<SignalState>> {
        while let Some(state) = self.queue.pop() {
            if self.accept(&state) {
                return Some(state);
            }
        }
        None
    }

    /// Wait for the next snapshot; `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<Arc<SignalState>> {
        loop {
            if let Some(state) = self.try_recv() {
                return Some(state);
            }
            if self.queue.is_closed() {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Last version this subscriber received for a location
    pub fn acknowledged_version(&self, location_id: &LocationId) -> Option<u64> {
        self.acknowledged.get(location_id).copied()
    }

    /// Snapshots evicted from this subscriber's queue so far
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}

struct Registry {
    latest: HashMap<LocationId, Arc<SignalState>>,
    subscribers: HashMap<u64, Arc<SubscriberQueue>>,
    next_id: u64,
}

/// Fan-out hub for signal state snapshots
pub struct LiveStateBroadcaster {
    config: BroadcastConfig,
    registry: Mutex<Registry>,
}

impl LiveStateBroadcaster {
    /// Create a new broadcaster
    pub fn new(config: BroadcastConfig) -> Self {
        info!(
            "Creating live state broadcaster (queue capacity {})",
            config.queue_capacity
        );
        Self {
            config,
            registry: Mutex::new(Registry {
                latest: HashMap::new(),
                subscribers: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Publish a snapshot to every live subscriber; returns how many received it
    pub fn publish(&self, state: Arc<SignalState>) -> usize {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);

        let newer = registry
            .latest
            .get(&state.location_id)
            .map(|current| state.version >= current.version)
            .unwrap_or(true);
        if newer {
            registry
                .latest
                .insert(state.location_id.clone(), Arc::clone(&state));
        }

        // Subscribers whose handle was dropped are only referenced from here
        registry.subscribers.retain(|id, queue| {
            let alive = !queue.is_closed() && Arc::strong_count(queue) > 1;
            if !alive {
                debug!("Pruning subscriber {}", id);
            }
            alive
        });

        let mut delivered = 0;
        for queue in registry.subscribers.values() {
            if queue.push(Arc::clone(&state)) {
                metrics::counter!("signal_broadcast_dropped_total").increment(1);
                debug!(
                    "Subscriber {} lagging, dropped oldest update for {}",
                    queue.id, state.location_id
                );
            }
            delivered += 1;
        }

        metrics::gauge!("signal_subscribers").set(registry.subscribers.len() as f64);
        delivered
    }

    /// Open a subscription; the current state of every location is queued first
    pub fn subscribe(&self) -> Subscriber {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);

        let id = registry.next_id;
        registry.next_id += 1;

        let mut snapshot: Vec<Arc<SignalState>> = registry.latest.values().cloned().collect();
        snapshot.sort_by(|a, b| a.location_id.cmp(&b.location_id));

        let queue = Arc::new(SubscriberQueue {
            id,
            capacity: self.config.queue_capacity.max(snapshot.len()).max(1),
            buffer: Mutex::new(VecDeque::from(snapshot)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        registry.subscribers.insert(id, Arc::clone(&queue));
        info!(
            "Subscriber {} connected. Total subscribers: {}",
            id,
            registry.subscribers.len()
        );

        Subscriber {
            queue,
            acknowledged: HashMap::new(),
        }
    }

    /// Close a subscription
    pub fn unsubscribe(&self, subscriber: Subscriber) {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(queue) = registry.subscribers.remove(&subscriber.queue.id) {
            queue.close();
        }
        info!(
            "Subscriber {} disconnected. Total subscribers: {}",
            subscriber.queue.id,
            registry.subscribers.len()
        );
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .len()
    }

    /// Latest published snapshot for a location
    pub fn latest(&self, location_id: &LocationId) -> Option<Arc<SignalState>> {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latest
            .get(location_id)
            .cloned()
    }
}

impl Default for LiveStateBroadcaster {
    fn default() -> Self {
        Self::new(BroadcastConfig::default())
    }
}
