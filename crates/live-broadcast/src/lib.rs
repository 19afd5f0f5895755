//! Live State Broadcasting
//!
//! Fans out `SignalState` snapshots to dashboard subscribers. Publication
//! never waits on a subscriber: every subscriber owns a bounded queue, and a
//! full queue drops its oldest snapshot so the newest state always gets
//! through.

mod broadcaster;

pub use broadcaster::{BroadcastConfig, LiveStateBroadcaster, Subscriber};
