//! Process-wide service seams available to components.
//!
//! The runtime implements these traits once per connector and injects
//! them through the [`ComponentContext`](crate::ComponentContext);
//! components never reach for globals.

use braid_event::EventSender;
use serde_json::Value;
use std::time::Duration;

/// Identifies the worker that registered a timer or cache entry, so
/// its resources can be purged when it stops.
pub type OwnerId = u64;

/// Per-component timer registration.
///
/// A fired timer is delivered as a TIMER event on the owning
/// component's input queue. Interval timers reschedule from the last
/// firing time on a monotonic clock. Cancellation is race-safe: an
/// already-enqueued event may still be delivered and handlers must
/// tolerate it.
pub trait TimerService: Send + Sync {
    /// Registers (or replaces) a timer.
    fn add_timer(
        &self,
        owner: OwnerId,
        target: EventSender,
        delay: Duration,
        timer_id: &str,
        interval: Option<Duration>,
        payload: Option<Value>,
    );

    /// Cancels one timer of an owner.
    fn cancel_timer(&self, owner: OwnerId, timer_id: &str);

    /// Purges every pending timer of an owner (component stop).
    fn cancel_owner(&self, owner: OwnerId);
}

/// Identifies who should receive a CACHE_EXPIRY event for an entry.
#[derive(Clone, Debug)]
pub struct CacheOwner {
    /// The registering worker.
    pub owner: OwnerId,
    /// Its input queue.
    pub target: EventSender,
}

/// Key/value store with TTL and expiry events.
///
/// Values are opaque to the service; access is serialized internally.
/// When an entry with an owner expires, a CACHE_EXPIRY event carrying
/// `{key, metadata, expired_data}` is enqueued to the owner.
pub trait CacheService: Send + Sync {
    /// Stores a value, optionally with expiry, metadata and an owner.
    fn add_data(
        &self,
        key: &str,
        value: Value,
        expiry: Option<Duration>,
        metadata: Option<Value>,
        owner: Option<CacheOwner>,
    );

    /// Reads a value; expired entries read as absent.
    fn get_data(&self, key: &str) -> Option<Value>;

    /// Removes a value and any pending expiry notification.
    fn remove_data(&self, key: &str);
}

/// Timer service that drops every registration. For tests and
/// harnesses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTimerService;

impl TimerService for NoopTimerService {
    fn add_timer(
        &self,
        _owner: OwnerId,
        _target: EventSender,
        _delay: Duration,
        _timer_id: &str,
        _interval: Option<Duration>,
        _payload: Option<Value>,
    ) {
    }

    fn cancel_timer(&self, _owner: OwnerId, _timer_id: &str) {}

    fn cancel_owner(&self, _owner: OwnerId) {}
}

/// Cache service that stores nothing. For tests and harnesses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCacheService;

impl CacheService for NoopCacheService {
    fn add_data(
        &self,
        _key: &str,
        _value: Value,
        _expiry: Option<Duration>,
        _metadata: Option<Value>,
        _owner: Option<CacheOwner>,
    ) {
    }

    fn get_data(&self, _key: &str) -> Option<Value> {
        None
    }

    fn remove_data(&self, _key: &str) {}
}
