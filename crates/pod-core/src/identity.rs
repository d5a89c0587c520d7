//! # Pod Identity Newtypes
//!
//! Newtype wrappers for the identifiers a pod session deals with. The pod's
//! lot number, its radio address, and the fault codes it reports are all
//! small integers on the wire; keeping them as distinct types means a lot
//! number cannot be handed to something expecting an address.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PodError;

/// Unique identifier for one coordinator session (one app/process lifetime
/// or one restored blob).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a new random session identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

/// Manufacturing lot number printed on the pod and reported during pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LotNumber(pub u32);

impl std::fmt::Display for LotNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Radio address assigned to the pod during pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PodAddress(u32);

impl PodAddress {
    /// Address every unpaired pod listens on. Never valid as an assigned address.
    pub const BROADCAST: u32 = 0xFFFF_FFFF;

    /// Validate and wrap an assigned address.
    pub fn new(raw: u32) -> Result<Self, PodError> {
        if raw == Self::BROADCAST {
            return Err(PodError::Validation(
                "pod address must not be the broadcast address".to_string(),
            ));
        }
        Ok(Self(raw))
    }

    /// The raw 32-bit address.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for PodAddress {
    type Error = PodError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<PodAddress> for u32 {
    fn from(addr: PodAddress) -> Self {
        addr.0
    }
}

impl std::fmt::Display for PodAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Hard-fault code reported by the pod. Zero means "no fault" on the wire
/// and is therefore not a valid `FaultCode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct FaultCode(u8);

impl FaultCode {
    /// Validate and wrap a fault code.
    pub fn new(code: u8) -> Result<Self, PodError> {
        if code == 0 {
            return Err(PodError::Validation(
                "fault code 0 means no fault".to_string(),
            ));
        }
        Ok(Self(code))
    }

    /// The raw code.
    pub fn code(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for FaultCode {
    type Error = PodError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::new(code)
    }
}

impl From<FaultCode> for u8 {
    fn from(code: FaultCode) -> Self {
        code.0
    }
}

impl std::fmt::Display for FaultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Identity of the paired pod, as learned during discovery/pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    /// Manufacturing lot.
    pub lot: LotNumber,
    /// Serial within the lot.
    pub tid: u32,
    /// Assigned radio address.
    pub address: PodAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn test_session_id_display_prefix() {
        assert!(SessionId::new().to_string().starts_with("session:"));
    }

    #[test]
    fn test_pod_address_rejects_broadcast() {
        assert!(PodAddress::new(PodAddress::BROADCAST).is_err());
        assert_eq!(PodAddress::new(0x1F01_4820).unwrap().value(), 0x1F01_4820);
    }

    #[test]
    fn test_pod_address_display() {
        assert_eq!(PodAddress::new(0x1F).unwrap().to_string(), "0x0000001f");
    }

    #[test]
    fn test_pod_address_serde_validates() {
        let parsed: Result<PodAddress, _> = serde_json::from_str("4294967295");
        assert!(parsed.is_err());
        let ok: PodAddress = serde_json::from_str("42").unwrap();
        assert_eq!(ok.value(), 42);
    }

    #[test]
    fn test_fault_code_zero_rejected() {
        assert!(FaultCode::new(0).is_err());
        assert_eq!(FaultCode::new(7).unwrap().code(), 7);
    }

    #[test]
    fn test_fault_code_display_is_hex() {
        assert_eq!(FaultCode::new(0x31).unwrap().to_string(), "0x31");
    }

    #[test]
    fn test_pod_info_serialization() {
        let info = PodInfo {
            lot: LotNumber(44_223),
            tid: 1_180_771,
            address: PodAddress::new(0x1F01_4820).unwrap(),
        };
        let json = serde_json::to_string(&info).unwrap();
        let parsed: PodInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, info);
    }
}
