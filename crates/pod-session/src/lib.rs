//! # pod-session — Pod Session Coordinator
//!
//! Orchestrates the pure components from `pod-state` behind a single
//! [`SessionCoordinator`]. The coordinator accepts commands from any number
//! of concurrent callers, lets at most one reach the pod at a time, folds
//! each response into the lifecycle machine, temp basal tracker, and alert
//! registry, and then records, persists, and publishes the result.
//!
//! ## Modules
//!
//! - `coordinator.rs`: the command pipeline and session lifecycle.
//! - `command.rs`: commands, decoded responses, errors, outcomes.
//! - `ports.rs`: transport, persistence, event, and clock traits.
//! - `events.rs`: [`PodEvent`] and the in-process [`EventBus`].
//! - `snapshot.rs`: [`PumpStatusSnapshot`] for display.
//! - `persist.rs`: the versioned JSON session blob.
//! - `config.rs`: [`SessionConfig`] with env loading.
//!
//! ## Observability
//!
//! Structured `tracing` events for every transition, rejection, and failure.
//! Counters through the `metrics` facade: `pod_commands_total{command,status}`
//! and `pod_state_transitions_total{to}`. Installing an exporter is left to
//! the host.

pub mod command;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod persist;
pub mod ports;
pub mod snapshot;

pub use command::{
    CommandError, CommandOutcome, CommandReport, CommandRequest, PodCommand, PodResponse,
    TransportError,
};
pub use config::{BeepConfig, ConfigError, DeliveryLimits, SessionConfig};
pub use coordinator::SessionCoordinator;
pub use events::{EventBus, PodEvent};
pub use persist::{PersistedSession, SessionError, STATE_VERSION};
pub use ports::{
    Clock, EventPublisher, FilePersistence, InMemoryPersistence, ManualClock, PodTransport,
    SessionPorts, StatePersistence, SystemClock,
};
pub use snapshot::{ActiveAlert, BolusRecord, ErrorInfo, LinkState, PumpStatusSnapshot};

pub use pod_state::{
    AlertDescriptionResolver, AlertSet, AlertSlot, AlertType, CommandHistoryItem, CommandKind,
    CommandStatus, DefaultAlertDescriptions, DriverState, HistoryEntryKind, PodLifecycleState,
    StateTransition, TempBasalPair, TransitionEvent,
};
