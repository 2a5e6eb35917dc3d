//! Process-wide services shared by every component of a connector.

mod cache;
mod timer;
mod trace;

pub use cache::{create_backend, CacheBackend, CacheEntry, MemoryCacheBackend, SharedCacheService};
pub use timer::TimerManager;
pub use trace::{TraceRecord, TraceSink};

use crate::config::{CacheConfig, ConfigError, TraceConfig};
use crate::messaging::MessagingBuilder;
use braid_component::{CacheService, NoopCacheService, NoopTimerService, OwnerId, TimerService};
use braid_event::{event_channel, EventReceiver, EventSender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Capacity of the internal error queue feeding the error flow.
const ERROR_QUEUE_DEPTH: usize = 50;

/// One connector's shared services, injected into every component
/// context instead of living as process globals.
pub struct RuntimeServices {
    /// Connector instance name (log prefixes, error envelopes).
    pub instance_name: String,
    /// Timer service.
    pub timers: Arc<dyn TimerService>,
    /// Cache service.
    pub cache: Arc<dyn CacheService>,
    /// Broker connection factory.
    pub messaging: Arc<MessagingBuilder>,
    /// Producer side of the error queue (given to workers).
    pub error_sender: EventSender,
    /// Consumer side of the error queue (given to `error_input`).
    pub error_receiver: EventReceiver,
    /// Optional event trace sink.
    pub trace: Option<TraceSink>,
    /// Connector-wide shutdown signal.
    pub stop: CancellationToken,
    owner_counter: AtomicU64,
}

impl RuntimeServices {
    /// Builds the full service set. Must be called within a tokio
    /// runtime: the timer manager and cache sweeper spawn tasks.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unknown cache backends or an
    /// unwritable trace file.
    pub fn new(
        instance_name: impl Into<String>,
        cache_config: &CacheConfig,
        trace_config: &TraceConfig,
    ) -> Result<Arc<Self>, ConfigError> {
        let stop = CancellationToken::new();
        let trace = match (&trace_config.trace_file, trace_config.enabled()) {
            (Some(path), true) => Some(TraceSink::to_file(path, stop.clone()).map_err(
                |source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                },
            )?),
            _ => None,
        };
        let backend = create_backend(&cache_config.backend)?;
        let (error_sender, error_receiver) = event_channel(ERROR_QUEUE_DEPTH);
        Ok(Arc::new(Self {
            instance_name: instance_name.into(),
            timers: Arc::new(TimerManager::new(stop.clone())),
            cache: SharedCacheService::new(backend, stop.clone()),
            messaging: Arc::new(MessagingBuilder::new()),
            error_sender,
            error_receiver,
            trace,
            stop,
            owner_counter: AtomicU64::new(1),
        }))
    }

    /// Service set with inert timers and cache, usable outside a tokio
    /// runtime. For tests.
    #[must_use]
    pub fn for_tests() -> Arc<Self> {
        let (error_sender, error_receiver) = event_channel(ERROR_QUEUE_DEPTH);
        Arc::new(Self {
            instance_name: "braid-test".to_string(),
            timers: Arc::new(NoopTimerService),
            cache: Arc::new(NoopCacheService),
            messaging: Arc::new(MessagingBuilder::new()),
            error_sender,
            error_receiver,
            trace: None,
            stop: CancellationToken::new(),
            owner_counter: AtomicU64::new(1),
        })
    }

    /// Allocates a fresh worker identity.
    #[must_use]
    pub fn next_owner(&self) -> OwnerId {
        self.owner_counter.fetch_add(1, Ordering::Relaxed)
    }
}
