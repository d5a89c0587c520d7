//! Persisted session blob.
//!
//! JSON with an explicit `version`. A blob with any other version is
//! refused rather than guessed at.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use pod_core::{FaultCode, PodInfo, SessionId, Timestamp};
use pod_state::{AlertRegistry, DriverState, PodLifecycleState, TempBasalPair};

use crate::config::ConfigError;
use crate::snapshot::BolusRecord;

/// Current blob layout.
pub const STATE_VERSION: u32 = 1;

/// Errors from session-level operations (as opposed to pod commands).
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("persistence I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("session blob is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unsupported session blob version {0} (expected {STATE_VERSION})")]
    UnsupportedStateVersion(u32),
    #[error("{operation} is not allowed while the driver is {state}")]
    InvalidDriverState {
        operation: &'static str,
        state: DriverState,
    },
    #[error("pod cannot be discarded while {0}")]
    CannotDiscard(PodLifecycleState),
    #[error("a command is in flight")]
    Busy,
}

/// Everything needed to resume a session after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub version: u32,
    pub session_id: SessionId,
    pub lifecycle: PodLifecycleState,
    pub driver_state: DriverState,
    pub temp_basal: TempBasalPair,
    pub alerts: AlertRegistry,
    pub pod_info: Option<PodInfo>,
    pub fault_code: Option<FaultCode>,
    pub last_known_good: Option<Timestamp>,
    pub last_bolus: Option<BolusRecord>,
    pub reservoir_units: Option<f64>,
    pub battery_percent: Option<u8>,
    #[serde(default)]
    pub state_uncertain: bool,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

impl PersistedSession {
    pub fn encode(&self) -> Result<Vec<u8>, SessionError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn decode(blob: &[u8]) -> Result<Self, SessionError> {
        let probe: VersionProbe = serde_json::from_slice(blob)?;
        if probe.version != STATE_VERSION {
            return Err(SessionError::UnsupportedStateVersion(probe.version));
        }
        Ok(serde_json::from_slice(blob)?)
    }

    /// Whether the session that wrote this blob closed cleanly.
    pub fn ended_cleanly(&self) -> bool {
        self.driver_state == DriverState::SessionEnded && !self.state_uncertain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pod_core::InsulinRate;
    use pod_state::{AlertSlot, AlertType};

    fn sample() -> PersistedSession {
        let mut alerts = AlertRegistry::new();
        let slot = AlertSlot::new(4).unwrap();
        alerts.configure(slot, AlertType::LowReservoirAlert);
        alerts.mark_active(slot);
        PersistedSession {
            version: STATE_VERSION,
            session_id: SessionId::new(),
            lifecycle: PodLifecycleState::ActiveAlerting,
            driver_state: DriverState::Initialized,
            temp_basal: TempBasalPair {
                rate: InsulinRate::from_units_per_hour(0.5).unwrap(),
                start: Timestamp::parse("2026-03-01T08:00:00Z").unwrap(),
                duration_minutes: 60,
            },
            alerts,
            pod_info: None,
            fault_code: None,
            last_known_good: Some(Timestamp::parse("2026-03-01T08:00:00Z").unwrap()),
            last_bolus: None,
            reservoir_units: Some(42.5),
            battery_percent: Some(80),
            state_uncertain: false,
        }
    }

    #[test]
    fn test_encode_decode() {
        let blob = sample().encode().unwrap();
        let parsed = PersistedSession::decode(&blob).unwrap();
        assert_eq!(parsed, sample_with_id(&parsed));
    }

    fn sample_with_id(parsed: &PersistedSession) -> PersistedSession {
        PersistedSession {
            session_id: parsed.session_id,
            ..sample()
        }
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut value: serde_json::Value = serde_json::from_slice(&sample().encode().unwrap()).unwrap();
        value["version"] = serde_json::json!(2);
        let blob = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            PersistedSession::decode(&blob),
            Err(SessionError::UnsupportedStateVersion(2))
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            PersistedSession::decode(b"not json"),
            Err(SessionError::Serialization(_))
        ));
    }

    #[test]
    fn test_clean_end_detection() {
        let mut blob = sample();
        assert!(!blob.ended_cleanly());
        blob.driver_state = DriverState::SessionEnded;
        assert!(blob.ended_cleanly());
        blob.state_uncertain = true;
        assert!(!blob.ended_cleanly());
    }
}
