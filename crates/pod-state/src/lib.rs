//! # pod-state — Pure Pod Session Components
//!
//! The pieces of pod session state that can be reasoned about without a
//! radio, a clock, or a disk. Every operation here is synchronous and
//! deterministic; time is always passed in.
//!
//! ## Components
//!
//! - **Lifecycle** (`lifecycle.rs`): `PodStateMachine` over
//!   `PodLifecycleState`, driven by `TransitionEvent`s. Rejected transitions
//!   leave the machine untouched.
//!
//! - **Temp basal** (`temp_basal.rs`): `TempBasalTracker`, at most one
//!   temporary basal at a time, replace-on-start, idempotent clear.
//!
//! - **Alerts** (`alert.rs`): `AlertRegistry`, the slot → alert type
//!   configuration plus the currently active slot set.
//!
//! - **History** (`history.rs`): `CommandHistoryLog`, append-only and
//!   optionally bounded.
//!
//! The session coordinator in `pod-session` owns one of each and keeps them
//! consistent with each other.

pub mod alert;
pub mod history;
pub mod lifecycle;
pub mod temp_basal;

// ─── Lifecycle re-exports ───────────────────────────────────────────

pub use lifecycle::{
    DriverState, InvalidTransitionError, PodLifecycleState, PodStateMachine, StateTransition,
    TransitionEvent,
};

// ─── Alert re-exports ───────────────────────────────────────────────

pub use alert::{
    AlertDescriptionResolver, AlertRegistry, AlertSet, AlertSlot, AlertSlotError, AlertType,
    DefaultAlertDescriptions,
};

// ─── Temp basal re-exports ──────────────────────────────────────────

pub use temp_basal::{TempBasalPair, TempBasalTracker};

// ─── History re-exports ─────────────────────────────────────────────

pub use history::{CommandHistoryItem, CommandHistoryLog, CommandKind, CommandStatus, HistoryEntryKind};
