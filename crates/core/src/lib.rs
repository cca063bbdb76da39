//! Core library for coordinating the lifecycle of timed media overlays.
//!
//! A timeline drives each overlay instance through `setup`, `start`, `end`
//! and `teardown`. Instances wait on a [`ResourceGate`] for their external
//! prerequisites without blocking the timeline, share on-screen regions
//! through the reference-counted [`ContainerRegistry`], and load shared
//! scripts once through the [`ScriptLoadDeduplicator`]. Everything runs on a
//! single thread against the virtual clock of a [`TimerQueue`].

pub mod config;
pub mod controller;
pub mod error;
pub mod gate;
pub mod host;
pub mod plugins;
pub mod providers;
pub mod registry;
pub mod runtime;
pub mod script;
pub mod timeline;
pub mod timers;

pub use config::{AppConfig, CoordinatorConfig, OverlayOptions, PluginOptions};
pub use controller::{
    EventKind, EventPayload, InstanceController, InstanceId, InstanceSnapshot, InstanceState,
    Outcome, RenderAdapter,
};
pub use error::{OverlayError, Result};
pub use gate::{GateStatus, PollPolicy, ResolvedData, ResourceGate};
pub use host::{HostPage, MemoryPage, NodeId};
pub use plugins::PluginKind;
pub use providers::{ResourceProvider, SimulatedProvider, SimulatedResponses};
pub use registry::{Container, ContainerRegistry};
pub use runtime::OverlayRuntime;
pub use script::ScriptLoadDeduplicator;
pub use timeline::{PlaybackClock, TimelineScheduler};
pub use timers::TimerQueue;
