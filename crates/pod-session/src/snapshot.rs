//! # Pump Status Snapshot
//!
//! Immutable, self-consistent view of the session for display. Built from
//! the committed state under a read lock, so it never reflects a command
//! that is halfway through and never waits for one to finish.

use serde::{Deserialize, Serialize};

use pod_core::{FaultCode, InsulinUnits, LotNumber, PodInfo, SessionId, Timestamp};
use pod_state::{AlertSlot, AlertType, CommandKind, DriverState, PodLifecycleState, TempBasalPair};

/// State of the radio link as of the last command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkState {
    #[default]
    Idle,
    Communicating,
    ErrorWhenCommunicating,
    TimeoutWhenCommunicating,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Communicating => "COMMUNICATING",
            Self::ErrorWhenCommunicating => "ERROR_WHEN_COMMUNICATING",
            Self::TimeoutWhenCommunicating => "TIMEOUT_WHEN_COMMUNICATING",
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The most recent bolus the pod acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BolusRecord {
    pub units: InsulinUnits,
    pub automatic: bool,
    pub at: Timestamp,
}

/// An active alert with its configured type and display text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveAlert {
    pub slot: AlertSlot,
    pub alert_type: AlertType,
    pub description: String,
}

/// Error details for display after a failed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub link_state: LinkState,
    pub message: String,
    pub fault_code: Option<FaultCode>,
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpStatusSnapshot {
    pub session_id: SessionId,
    pub taken_at: Timestamp,
    pub lifecycle: PodLifecycleState,
    pub driver_state: DriverState,
    pub link_state: LinkState,
    /// Running temp basal; `None` when none is set or it has expired.
    pub temp_basal: Option<TempBasalPair>,
    pub temp_basal_remaining_minutes: u32,
    pub active_alerts: Vec<ActiveAlert>,
    pub reservoir_units: Option<f64>,
    pub battery_percent: Option<u8>,
    pub last_bolus: Option<BolusRecord>,
    /// Last time a command completed against the pod.
    pub last_known_good: Option<Timestamp>,
    pub last_error: Option<String>,
    pub fault_code: Option<FaultCode>,
    /// A command may have reached the pod without a confirmed response.
    pub state_uncertain: bool,
    /// Command currently being exchanged with the pod.
    pub current_command: Option<CommandKind>,
    pub pod_info: Option<PodInfo>,
}

impl PumpStatusSnapshot {
    /// Whether the session holds state for a pod (anything past first contact).
    pub fn has_pod_state(&self) -> bool {
        self.lifecycle != PodLifecycleState::NeverContacted
    }

    pub fn lot_number(&self) -> Option<LotNumber> {
        self.pod_info.map(|info| info.lot)
    }

    pub fn is_temp_basal_running(&self) -> bool {
        self.temp_basal.is_some()
    }

    /// Error details, when the last command failed or the pod is faulted.
    pub fn error_info(&self) -> Option<ErrorInfo> {
        if self.last_error.is_none() && self.fault_code.is_none() {
            return None;
        }
        Some(ErrorInfo {
            link_state: self.link_state,
            message: self
                .last_error
                .clone()
                .unwrap_or_else(|| "pod fault".to_string()),
            fault_code: self.fault_code,
        })
    }

    /// Whether a command is being exchanged with the pod right now.
    pub fn is_command_in_flight(&self) -> bool {
        self.current_command.is_some()
    }

    /// Whether the pod can currently accept delivery commands.
    pub fn is_delivering(&self) -> bool {
        self.lifecycle.is_delivering()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pod_core::{InsulinRate, PodAddress};

    fn base() -> PumpStatusSnapshot {
        PumpStatusSnapshot {
            session_id: SessionId::new(),
            taken_at: Timestamp::parse("2026-03-01T08:00:00Z").unwrap(),
            lifecycle: PodLifecycleState::NeverContacted,
            driver_state: DriverState::Initialized,
            link_state: LinkState::Idle,
            temp_basal: None,
            temp_basal_remaining_minutes: 0,
            active_alerts: Vec::new(),
            reservoir_units: None,
            battery_percent: None,
            last_bolus: None,
            last_known_good: None,
            last_error: None,
            fault_code: None,
            state_uncertain: false,
            current_command: None,
            pod_info: None,
        }
    }

    #[test]
    fn test_fresh_session_has_no_pod_state() {
        let snap = base();
        assert!(!snap.has_pod_state());
        assert_eq!(snap.lot_number(), None);
        assert!(!snap.is_temp_basal_running());
        assert_eq!(snap.error_info(), None);
    }

    #[test]
    fn test_accessors_on_active_pod() {
        let snap = PumpStatusSnapshot {
            lifecycle: PodLifecycleState::Active,
            pod_info: Some(PodInfo {
                lot: LotNumber(44_223),
                tid: 9,
                address: PodAddress::new(0x1F01_4820).unwrap(),
            }),
            temp_basal: Some(TempBasalPair {
                rate: InsulinRate::from_units_per_hour(1.0).unwrap(),
                start: Timestamp::parse("2026-03-01T07:45:00Z").unwrap(),
                duration_minutes: 30,
            }),
            ..base()
        };
        assert!(snap.has_pod_state());
        assert_eq!(snap.lot_number(), Some(LotNumber(44_223)));
        assert!(snap.is_temp_basal_running());
        assert!(snap.is_delivering());
    }

    #[test]
    fn test_error_info_after_timeout() {
        let snap = PumpStatusSnapshot {
            link_state: LinkState::TimeoutWhenCommunicating,
            last_error: Some("transport failure: no reply".to_string()),
            ..base()
        };
        let info = snap.error_info().unwrap();
        assert_eq!(info.link_state, LinkState::TimeoutWhenCommunicating);
        assert!(info.fault_code.is_none());
    }

    #[test]
    fn test_error_info_for_fault_without_message() {
        let snap = PumpStatusSnapshot {
            lifecycle: PodLifecycleState::Faulted,
            fault_code: Some(FaultCode::new(0x31).unwrap()),
            ..base()
        };
        assert_eq!(snap.error_info().unwrap().message, "pod fault");
    }

    #[test]
    fn test_current_command_serialized_by_name() {
        let snap = PumpStatusSnapshot {
            link_state: LinkState::Communicating,
            current_command: Some(CommandKind::Bolus),
            ..base()
        };
        assert!(snap.is_command_in_flight());
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["current_command"], "BOLUS");
        assert!(!base().is_command_in_flight());
    }

    #[test]
    fn test_link_state_serialization() {
        let json = serde_json::to_string(&LinkState::ErrorWhenCommunicating).unwrap();
        assert_eq!(json, "\"ERROR_WHEN_COMMUNICATING\"");
    }
}
