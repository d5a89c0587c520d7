//! # Pod Commands, Responses, and Outcomes
//!
//! The vocabulary exchanged between the coordinator, the transport, and
//! the host application. Responses arrive already decoded; message
//! framing and encryption belong to the transport.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use pod_core::{FaultCode, InsulinRate, InsulinUnits, PodInfo, Timestamp};
use pod_state::{
    AlertSet, AlertSlot, AlertType, CommandKind, DriverState, InvalidTransitionError,
    PodLifecycleState, StateTransition, TransitionEvent,
};

use crate::config::BeepConfig;

// ─── Commands ───────────────────────────────────────────────────────

/// A command the host application asks the session to send to the pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PodCommand {
    Discover,
    StartPairing,
    CompletePairing,
    Prime,
    SetTempBasal {
        rate: InsulinRate,
        duration_minutes: u32,
    },
    CancelTempBasal,
    Bolus {
        units: InsulinUnits,
        /// Issued by the closed loop rather than the user.
        automatic: bool,
    },
    SuspendDelivery,
    ResumeDelivery,
    ConfigureAlerts {
        alerts: Vec<(AlertSlot, AlertType)>,
    },
    GetStatus,
    Deactivate,
}

impl PodCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Discover => CommandKind::Discover,
            Self::StartPairing => CommandKind::StartPairing,
            Self::CompletePairing => CommandKind::CompletePairing,
            Self::Prime => CommandKind::Prime,
            Self::SetTempBasal { .. } => CommandKind::SetTempBasal,
            Self::CancelTempBasal => CommandKind::CancelTempBasal,
            Self::Bolus { .. } => CommandKind::Bolus,
            Self::SuspendDelivery => CommandKind::SuspendDelivery,
            Self::ResumeDelivery => CommandKind::ResumeDelivery,
            Self::ConfigureAlerts { .. } => CommandKind::ConfigureAlerts,
            Self::GetStatus => CommandKind::GetStatus,
            Self::Deactivate => CommandKind::Deactivate,
        }
    }

    /// The lifecycle event a successful run of this command produces, if any.
    pub fn lifecycle_event(&self) -> Option<TransitionEvent> {
        match self {
            Self::Discover => Some(TransitionEvent::Discover),
            Self::StartPairing => Some(TransitionEvent::PairingStarted),
            Self::CompletePairing => Some(TransitionEvent::PairingCompleted),
            Self::Prime => Some(TransitionEvent::PrimingCompleted),
            Self::SuspendDelivery => Some(TransitionEvent::DeliverySuspended),
            Self::ResumeDelivery => Some(TransitionEvent::DeliveryResumed),
            Self::Deactivate => Some(TransitionEvent::DeactivationRequested),
            Self::SetTempBasal { .. }
            | Self::CancelTempBasal
            | Self::Bolus { .. }
            | Self::ConfigureAlerts { .. }
            | Self::GetStatus => None,
        }
    }

    /// Whether the pod should beep for this command.
    pub fn beep(&self, beeps: &BeepConfig) -> bool {
        match self {
            Self::Bolus { automatic: false, .. } => beeps.bolus,
            Self::Bolus { automatic: true, .. } => beeps.smb,
            Self::SuspendDelivery | Self::ResumeDelivery => beeps.basal,
            Self::SetTempBasal { .. } | Self::CancelTempBasal => beeps.temp_basal,
            _ => false,
        }
    }
}

impl std::fmt::Display for PodCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SetTempBasal {
                rate,
                duration_minutes,
            } => write!(f, "SET_TEMP_BASAL({rate} for {duration_minutes} min)"),
            Self::Bolus { units, automatic } => {
                write!(f, "BOLUS({units}{})", if *automatic { ", automatic" } else { "" })
            }
            other => f.write_str(other.kind().as_str()),
        }
    }
}

/// What the transport receives: the command plus session framing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Per-session request counter.
    pub sequence: u64,
    pub command: PodCommand,
    pub beep: bool,
}

// ─── Responses ──────────────────────────────────────────────────────

/// A decoded pod response. Fields the pod did not report are `None`/empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodResponse {
    /// Full active alert set as reported by the pod.
    pub active_alerts: Option<AlertSet>,
    /// Hard fault, if the pod reported one.
    pub fault: Option<FaultCode>,
    /// Reservoir estimate in units.
    pub reservoir_units: Option<f64>,
    /// Battery estimate, 0-100.
    pub battery_percent: Option<u8>,
    /// Slot configuration the pod confirmed.
    pub alert_configuration: Vec<(AlertSlot, AlertType)>,
    /// Identity learned during discovery or pairing.
    pub pod_info: Option<PodInfo>,
}

impl PodResponse {
    /// A response that reports nothing beyond success.
    pub fn ack() -> Self {
        Self::default()
    }

    pub fn with_alerts(mut self, alerts: AlertSet) -> Self {
        self.active_alerts = Some(alerts);
        self
    }

    pub fn with_fault(mut self, fault: FaultCode) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn with_pod_info(mut self, info: PodInfo) -> Self {
        self.pod_info = Some(info);
        self
    }

    pub fn with_reservoir(mut self, units: f64) -> Self {
        self.reservoir_units = Some(units);
        self
    }

    pub fn with_battery(mut self, percent: u8) -> Self {
        self.battery_percent = Some(percent);
        self
    }
}

// ─── Errors ─────────────────────────────────────────────────────────

/// Failures reported by a [`PodTransport`](crate::PodTransport).
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportError {
    #[error("no reply from pod within the command timeout")]
    Timeout,
    #[error("pod did not respond")]
    NoResponse,
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("radio link unavailable: {0}")]
    LinkUnavailable(String),
    #[error("pod rejected the command (code {code})")]
    DeviceRejected { code: u16 },
}

/// Why `issue_command` did not complete.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("another command is already in flight")]
    AlreadyInProgress,
    #[error("driver not ready (state {0})")]
    DriverNotReady(DriverState),
    #[error("{command} is not permitted while the pod is {state}")]
    NotPermitted {
        command: CommandKind,
        state: PodLifecycleState,
    },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransitionError),
    #[error("transport failure: {0}")]
    TransportFailure(#[from] TransportError),
    #[error("pod reported fault {0}")]
    DeviceFault(FaultCode),
}

impl CommandError {
    /// Whether the command may have reached the pod.
    pub fn reached_device(&self) -> bool {
        matches!(self, Self::TransportFailure(_) | Self::DeviceFault(_))
    }
}

// ─── Outcomes ───────────────────────────────────────────────────────

/// Summary of a successfully completed command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReport {
    pub command: CommandKind,
    /// Transitions applied, in order.
    pub transitions: Vec<StateTransition>,
    /// Lifecycle state after the command.
    pub state: PodLifecycleState,
    pub completed_at: Timestamp,
    /// Whether the resulting state reached persistent storage.
    pub persisted: bool,
}

/// Final result of a command that was accepted for sending, as published
/// to subscribers and retained as the session's last outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Completed(CommandReport),
    Failed {
        command: CommandKind,
        error: CommandError,
    },
}

impl CommandOutcome {
    pub fn command(&self) -> CommandKind {
        match self {
            Self::Completed(report) => report.command,
            Self::Failed { command, .. } => *command,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_event_mapping() {
        assert_eq!(PodCommand::Prime.kind(), CommandKind::Prime);
        assert_eq!(
            PodCommand::Prime.lifecycle_event(),
            Some(TransitionEvent::PrimingCompleted)
        );
        assert_eq!(PodCommand::GetStatus.lifecycle_event(), None);
        assert_eq!(PodCommand::CancelTempBasal.lifecycle_event(), None);
    }

    #[test]
    fn test_beep_follows_family() {
        let beeps = BeepConfig {
            bolus: true,
            smb: false,
            basal: true,
            temp_basal: false,
        };
        let manual = PodCommand::Bolus {
            units: InsulinUnits::from_units(1.0).unwrap(),
            automatic: false,
        };
        let smb = PodCommand::Bolus {
            units: InsulinUnits::from_units(0.1).unwrap(),
            automatic: true,
        };
        assert!(manual.beep(&beeps));
        assert!(!smb.beep(&beeps));
        assert!(PodCommand::SuspendDelivery.beep(&beeps));
        assert!(!PodCommand::CancelTempBasal.beep(&beeps));
        assert!(!PodCommand::GetStatus.beep(&BeepConfig::default()));
    }

    #[test]
    fn test_command_display() {
        let cmd = PodCommand::SetTempBasal {
            rate: InsulinRate::from_units_per_hour(1.5).unwrap(),
            duration_minutes: 30,
        };
        assert_eq!(cmd.to_string(), "SET_TEMP_BASAL(1.50 U/h for 30 min)");
        assert_eq!(PodCommand::Deactivate.to_string(), "DEACTIVATE");
    }

    #[test]
    fn test_command_serialization() {
        let cmd = PodCommand::Bolus {
            units: InsulinUnits::from_units(2.0).unwrap(),
            automatic: false,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"BOLUS\""));
        let parsed: PodCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cmd);
    }

    #[test]
    fn test_error_messages() {
        let err = CommandError::NotPermitted {
            command: CommandKind::Bolus,
            state: PodLifecycleState::Suspended,
        };
        assert_eq!(err.to_string(), "BOLUS is not permitted while the pod is SUSPENDED");
        let err: CommandError = TransportError::Timeout.into();
        assert!(err.reached_device());
        assert!(!CommandError::AlreadyInProgress.reached_device());
    }
}
