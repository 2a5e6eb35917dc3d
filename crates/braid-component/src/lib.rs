//! Component trait and runtime interface for braid.
//!
//! Components are the processing stages of a flow. Each runs as one or
//! more workers over a shared bounded input queue and communicates only
//! through messages, the cache service, and timers:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Flow                              │
//! │  [queue] ─► group 0 ─► [queue] ─► group 1 ─► [queue] ─►  │
//! │             workers               workers                │
//! └──────────────────────────────────────────────────────────┘
//!                 │ each worker drives one
//!                 ▼
//!          Box<dyn Component>
//! ```
//!
//! # Component Roles
//!
//! | Role | Overrides | Examples |
//! |------|-----------|----------|
//! | processing | `invoke` | pass_through, iterate |
//! | source | `is_source`, `next_event` | broker_input, stdin_input |
//! | sink | `send_output` | broker_output, router |
//!
//! # Crate Contents
//!
//! - [`Component`] - the trait every stage implements
//! - [`ComponentContext`] - configuration chain + services + forwarding
//! - [`ComponentInfo`] / [`ConfigParameter`] - static metadata
//! - [`ComponentRegistry`] - name → factory resolution
//! - [`TimerService`] / [`CacheService`] - process-wide service seams
//! - [`testing`] - a harness for driving a component without a flow

mod component;
mod context;
mod error;
mod info;
mod registry;
mod services;
pub mod testing;

pub use component::Component;
pub use context::{ComponentContext, ContextBuilder};
pub use error::ComponentError;
pub use info::{ComponentInfo, ConfigParameter};
pub use registry::{ComponentFactory, ComponentRegistry};
pub use services::{CacheOwner, CacheService, NoopCacheService, NoopTimerService, OwnerId, TimerService};
