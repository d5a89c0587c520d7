//! # Pod Lifecycle State Machine
//!
//! Sole authority on the pod's lifecycle state. Every change goes through
//! [`PodStateMachine::transition`], which checks the event against a fixed
//! table and either moves to the next state or returns an
//! [`InvalidTransitionError`] leaving the state untouched.
//!
//! ## States
//!
//! ```text
//! NeverContacted ──Discover──▶ Discovering ──PairingStarted──▶ Pairing
//!                                                                 │
//!                                                        PairingCompleted
//!                                                                 ▼
//!   ┌──────── AlertCleared (last) ────────┐                   Priming
//!   ▼                                     │                       │
//! Active ──AlertRaised──▶ ActiveAlerting ─┘              PrimingCompleted
//!   │  ▲                      │                                   │
//!   │  └──────────────────────┼──────────── (Active) ◀────────────┘
//!   │     DeliverySuspended   │ DeliverySuspended
//!   └──────────▶ Suspended ◀──┘
//!                   │ DeliveryResumed ──▶ Active / ActiveAlerting
//!
//! any non-terminal, non-faulted state ──FaultDetected──▶ Faulted
//! Active | ActiveAlerting | Suspended | Faulted ──DeactivationRequested──▶ Deactivated
//! ```
//!
//! `Faulted` is sticky: the only way out is deactivation. `Deactivated` is
//! terminal: every event is rejected so a caller driving a retired pod
//! finds out immediately.
//!
//! ## Alerts
//!
//! Whether `AlertCleared` returns the pod to `Active` depends on whether
//! other alerts are still signaling. That knowledge lives in the
//! [`AlertRegistry`]; the machine only reads it. The caller updates the
//! registry after a successful transition.
//!
//! ## Purity
//!
//! The machine performs no I/O. History and event publication are driven by
//! the returned [`StateTransition`] in the session coordinator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use pod_core::FaultCode;

use crate::alert::{AlertRegistry, AlertSlot};

// ─── Lifecycle State ─────────────────────────────────────────────────

/// The lifecycle state of the pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodLifecycleState {
    /// No pod has been contacted in this session.
    NeverContacted,
    /// Looking for an unpaired pod.
    Discovering,
    /// Address assigned, pairing in progress.
    Pairing,
    /// Paired; reservoir priming and cannula insertion in progress.
    Priming,
    /// Delivering basal insulin, no alerts signaling.
    Active,
    /// Delivering, with at least one alert signaling.
    ActiveAlerting,
    /// Delivery suspended by command.
    Suspended,
    /// Pod reported a hard fault. Sticky until deactivation.
    Faulted,
    /// Pod deactivated (terminal).
    Deactivated,
}

impl PodLifecycleState {
    /// Every state, in lifecycle order.
    pub const ALL: [PodLifecycleState; 9] = [
        Self::NeverContacted,
        Self::Discovering,
        Self::Pairing,
        Self::Priming,
        Self::Active,
        Self::ActiveAlerting,
        Self::Suspended,
        Self::Faulted,
        Self::Deactivated,
    ];

    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deactivated)
    }

    /// Whether the pod is delivering basal insulin in this state.
    pub fn is_delivering(&self) -> bool {
        matches!(self, Self::Active | Self::ActiveAlerting)
    }

    /// Whether a paired pod is attached (pairing finished, not yet retired).
    pub fn is_paired(&self) -> bool {
        matches!(
            self,
            Self::Priming | Self::Active | Self::ActiveAlerting | Self::Suspended | Self::Faulted
        )
    }

    /// The canonical string name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NeverContacted => "NEVER_CONTACTED",
            Self::Discovering => "DISCOVERING",
            Self::Pairing => "PAIRING",
            Self::Priming => "PRIMING",
            Self::Active => "ACTIVE",
            Self::ActiveAlerting => "ACTIVE_ALERTING",
            Self::Suspended => "SUSPENDED",
            Self::Faulted => "FAULTED",
            Self::Deactivated => "DEACTIVATED",
        }
    }
}

impl std::fmt::Display for PodLifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Driver State ────────────────────────────────────────────────────

/// Status of the software session, independent of the pod.
///
/// After an app restart the driver is `Initializing` while the pod is still
/// in whatever state was persisted; the two are tracked separately for that
/// reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverState {
    /// Coordinator constructed, nothing loaded yet.
    NotInitialized,
    /// Restoring persisted state.
    Initializing,
    /// Ready to issue commands.
    Initialized,
    /// Session closed; no further commands.
    SessionEnded,
}

impl DriverState {
    /// The canonical string name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::Initializing => "INITIALIZING",
            Self::Initialized => "INITIALIZED",
            Self::SessionEnded => "SESSION_ENDED",
        }
    }
}

impl std::fmt::Display for DriverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Events ──────────────────────────────────────────────────────────

/// An event that may move the lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionEvent {
    /// An unpaired pod answered.
    Discover,
    /// Address assignment accepted; pairing begun.
    PairingStarted,
    /// Pod accepted its setup parameters.
    PairingCompleted,
    /// Priming and cannula insertion finished; basal delivery running.
    PrimingCompleted,
    /// A slot started signaling.
    AlertRaised(AlertSlot),
    /// A slot stopped signaling.
    AlertCleared(AlertSlot),
    /// Delivery suspended by command.
    DeliverySuspended,
    /// Delivery resumed by command.
    DeliveryResumed,
    /// Pod reported a hard fault.
    FaultDetected(FaultCode),
    /// Pod deactivation confirmed.
    DeactivationRequested,
}

impl TransitionEvent {
    /// The canonical string name of this event (without payload).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Discover => "DISCOVER",
            Self::PairingStarted => "PAIRING_STARTED",
            Self::PairingCompleted => "PAIRING_COMPLETED",
            Self::PrimingCompleted => "PRIMING_COMPLETED",
            Self::AlertRaised(_) => "ALERT_RAISED",
            Self::AlertCleared(_) => "ALERT_CLEARED",
            Self::DeliverySuspended => "DELIVERY_SUSPENDED",
            Self::DeliveryResumed => "DELIVERY_RESUMED",
            Self::FaultDetected(_) => "FAULT_DETECTED",
            Self::DeactivationRequested => "DEACTIVATION_REQUESTED",
        }
    }
}

impl std::fmt::Display for TransitionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlertRaised(slot) | Self::AlertCleared(slot) => {
                write!(f, "{}({})", self.name(), slot)
            }
            Self::FaultDetected(code) => write!(f, "{}({})", self.name(), code),
            _ => f.write_str(self.name()),
        }
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

/// An event was not permitted from the current state.
///
/// Always a logic error on the caller's side (or a pod doing something the
/// host did not expect); never silently ignored.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid pod transition from {from} on {event}: {reason}")]
pub struct InvalidTransitionError {
    /// State at the time of the attempt (unchanged).
    pub from: PodLifecycleState,
    /// The rejected event.
    pub event: TransitionEvent,
    /// Why it was rejected.
    pub reason: String,
}

// ─── Transition Record ───────────────────────────────────────────────

/// A transition that was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// The event that caused it.
    pub event: TransitionEvent,
    /// State before.
    pub from: PodLifecycleState,
    /// State after (may equal `from` for accepted self-transitions).
    pub to: PodLifecycleState,
}

impl StateTransition {
    /// Whether the state actually changed.
    pub fn is_change(&self) -> bool {
        self.from != self.to
    }
}

// ─── Machine ─────────────────────────────────────────────────────────

/// Owner of the authoritative [`PodLifecycleState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodStateMachine {
    state: PodLifecycleState,
}

impl Default for PodStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PodStateMachine {
    /// A machine for a session that has not contacted any pod.
    pub fn new() -> Self {
        Self {
            state: PodLifecycleState::NeverContacted,
        }
    }

    /// Rebuild a machine from a persisted state.
    pub fn restore(state: PodLifecycleState) -> Self {
        Self { state }
    }

    /// The current state.
    pub fn state(&self) -> PodLifecycleState {
        self.state
    }

    /// Apply `event`. On success returns the new state; on failure the state
    /// is left exactly as it was.
    pub fn transition(
        &mut self,
        event: TransitionEvent,
        alerts: &AlertRegistry,
    ) -> Result<PodLifecycleState, InvalidTransitionError> {
        self.apply(event, alerts).map(|t| t.to)
    }

    /// Like [`transition`](Self::transition) but returns the full record.
    pub fn apply(
        &mut self,
        event: TransitionEvent,
        alerts: &AlertRegistry,
    ) -> Result<StateTransition, InvalidTransitionError> {
        let from = self.state;
        let to = self.permits(event, alerts)?;
        self.state = to;
        Ok(StateTransition { event, from, to })
    }

    /// The state `event` would lead to, without applying it.
    pub fn permits(
        &self,
        event: TransitionEvent,
        alerts: &AlertRegistry,
    ) -> Result<PodLifecycleState, InvalidTransitionError> {
        next_state(self.state, event, alerts).map_err(|reason| InvalidTransitionError {
            from: self.state,
            event,
            reason: reason.to_string(),
        })
    }
}

/// The transition table. No wildcard arm on the state side so that adding
/// a state forces this match to be revisited.
fn next_state(
    from: PodLifecycleState,
    event: TransitionEvent,
    alerts: &AlertRegistry,
) -> Result<PodLifecycleState, &'static str> {
    use PodLifecycleState as S;
    use TransitionEvent as E;

    match (from, event) {
        (S::Deactivated, _) => Err("pod is deactivated; no further transitions"),

        (S::Faulted, E::DeactivationRequested) => Ok(S::Deactivated),
        (S::Faulted, _) => Err("pod is faulted; only deactivation is accepted"),

        (_, E::FaultDetected(_)) => Ok(S::Faulted),

        (S::NeverContacted, E::Discover) => Ok(S::Discovering),
        (S::Discovering, E::PairingStarted) => Ok(S::Pairing),
        (S::Pairing, E::PairingCompleted) => Ok(S::Priming),
        (S::Priming, E::PrimingCompleted) => {
            if alerts.has_active_alerts() {
                Ok(S::ActiveAlerting)
            } else {
                Ok(S::Active)
            }
        }

        (S::Pairing | S::Priming | S::Suspended | S::ActiveAlerting, E::AlertRaised(_)) => Ok(from),
        (S::Active, E::AlertRaised(_)) => Ok(S::ActiveAlerting),

        (S::Pairing | S::Priming | S::Active | S::ActiveAlerting | S::Suspended, E::AlertCleared(slot))
            if !alerts.is_active(slot) =>
        {
            Err("alert slot is not active")
        }
        (S::Pairing | S::Priming | S::Suspended, E::AlertCleared(_)) => Ok(from),
        (S::ActiveAlerting, E::AlertCleared(slot)) => {
            if alerts.has_other_active(slot) {
                Ok(S::ActiveAlerting)
            } else {
                Ok(S::Active)
            }
        }

        (S::Active | S::ActiveAlerting, E::DeliverySuspended) => Ok(S::Suspended),
        (S::Suspended, E::DeliveryResumed) => {
            if alerts.has_active_alerts() {
                Ok(S::ActiveAlerting)
            } else {
                Ok(S::Active)
            }
        }

        (S::Active | S::ActiveAlerting | S::Suspended, E::DeactivationRequested) => {
            Ok(S::Deactivated)
        }

        (
            S::NeverContacted
            | S::Discovering
            | S::Pairing
            | S::Priming
            | S::Active
            | S::ActiveAlerting
            | S::Suspended,
            _,
        ) => Err("event not permitted in this state"),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
