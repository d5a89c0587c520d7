//! # Alert Registry
//!
//! The pod exposes eight hardware alert slots. Which condition a slot
//! signals is configured by the host and changes over the pod's life (the
//! pairing reminder slot is later reused for the expiration advisory, for
//! example), so the slot → type mapping is session state, not a constant.
//!
//! The registry tracks two things:
//!
//! - the configured mapping, overwritten whenever the pod reports a
//!   reconfiguration and cleared on deactivation;
//! - the set of slots currently signaling, as last reported by the pod.
//!
//! Localized descriptions are not produced here. [`AlertRegistry::translate`]
//! returns a typed [`AlertType`]; turning that into text is the job of an
//! [`AlertDescriptionResolver`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Slots ───────────────────────────────────────────────────────────

/// Error constructing an [`AlertSlot`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("alert slot {0} out of range (pod has slots 0..={max})", max = AlertSlot::MAX)]
pub struct AlertSlotError(pub u8);

/// One of the pod's hardware alert slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct AlertSlot(u8);

impl AlertSlot {
    /// Number of slots on the pod.
    pub const COUNT: u8 = 8;
    /// Highest valid slot index.
    pub const MAX: u8 = Self::COUNT - 1;

    /// Validate and wrap a slot index.
    pub fn new(index: u8) -> Result<Self, AlertSlotError> {
        if index > Self::MAX {
            return Err(AlertSlotError(index));
        }
        Ok(Self(index))
    }

    /// The slot index (0..=7).
    pub fn index(&self) -> u8 {
        self.0
    }

    /// Every slot, in index order.
    pub fn all() -> impl Iterator<Item = AlertSlot> {
        (0..Self::COUNT).map(AlertSlot)
    }

    fn bit(self) -> u8 {
        1 << self.0
    }
}

impl TryFrom<u8> for AlertSlot {
    type Error = AlertSlotError;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Self::new(index)
    }
}

impl From<AlertSlot> for u8 {
    fn from(slot: AlertSlot) -> Self {
        slot.0
    }
}

impl std::fmt::Display for AlertSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot{}", self.0)
    }
}

// ─── Alert types ─────────────────────────────────────────────────────

/// Device-defined alert conditions a slot can be configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    /// Pairing was started but not finished.
    FinishPairingReminder,
    /// Pairing finished but cannula insertion/setup did not.
    FinishSetupReminder,
    /// Pod reached its rated lifetime.
    ExpirationAlert,
    /// Pod is approaching its rated lifetime.
    ExpirationAdvisoryAlert,
    /// Pod will stop delivering shortly.
    ShutdownImminentAlarm,
    /// Reservoir is below the configured threshold.
    LowReservoirAlert,
    /// No user interaction within the auto-off window.
    AutoOffAlarm,
    /// Delivery is suspended (periodic reminder).
    SuspendInProgress,
    /// A timed suspension has ended.
    SuspendEnded,
    /// Slot is not configured, or configured for something unrecognised.
    Unknown,
}

impl AlertType {
    /// The canonical string name of this alert type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FinishPairingReminder => "FINISH_PAIRING_REMINDER",
            Self::FinishSetupReminder => "FINISH_SETUP_REMINDER",
            Self::ExpirationAlert => "EXPIRATION_ALERT",
            Self::ExpirationAdvisoryAlert => "EXPIRATION_ADVISORY_ALERT",
            Self::ShutdownImminentAlarm => "SHUTDOWN_IMMINENT_ALARM",
            Self::LowReservoirAlert => "LOW_RESERVOIR_ALERT",
            Self::AutoOffAlarm => "AUTO_OFF_ALARM",
            Self::SuspendInProgress => "SUSPEND_IN_PROGRESS",
            Self::SuspendEnded => "SUSPEND_ENDED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Alert set ───────────────────────────────────────────────────────

/// Set of alert slots, stored as the one-byte bitmask the pod reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertSet(u8);

impl AlertSet {
    /// The empty set.
    pub const EMPTY: AlertSet = AlertSet(0);

    /// Build a set from the raw bitmask (bit N = slot N).
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// The raw bitmask.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Add a slot.
    pub fn insert(&mut self, slot: AlertSlot) {
        self.0 |= slot.bit();
    }

    /// Remove a slot.
    pub fn remove(&mut self, slot: AlertSlot) {
        self.0 &= !slot.bit();
    }

    /// Whether the slot is in the set.
    pub fn contains(&self, slot: AlertSlot) -> bool {
        self.0 & slot.bit() != 0
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Number of slots in the set.
    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Slots in `self` but not in `other`.
    pub fn difference(&self, other: AlertSet) -> AlertSet {
        AlertSet(self.0 & !other.0)
    }

    /// Iterate the slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = AlertSlot> + '_ {
        AlertSlot::all().filter(move |slot| self.contains(*slot))
    }
}

impl FromIterator<AlertSlot> for AlertSet {
    fn from_iter<I: IntoIterator<Item = AlertSlot>>(iter: I) -> Self {
        let mut set = AlertSet::EMPTY;
        for slot in iter {
            set.insert(slot);
        }
        set
    }
}

// ─── Description resolution ──────────────────────────────────────────

/// Resolves an [`AlertType`] to a human-readable (localized) description.
///
/// Implementations must be pure and must handle [`AlertType::Unknown`]
/// without failing; a missing translation degrades to a generic label.
pub trait AlertDescriptionResolver: Send + Sync {
    /// Describe the alert type.
    fn resolve(&self, alert_type: AlertType) -> String;
}

/// Built-in English descriptions.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAlertDescriptions;

impl AlertDescriptionResolver for DefaultAlertDescriptions {
    fn resolve(&self, alert_type: AlertType) -> String {
        let text = match alert_type {
            AlertType::FinishPairingReminder => "Finish pairing reminder",
            AlertType::FinishSetupReminder => "Finish setup reminder",
            AlertType::ExpirationAlert => "Pod expired",
            AlertType::ExpirationAdvisoryAlert => "Pod expiration advisory",
            AlertType::ShutdownImminentAlarm => "Pod shutdown imminent",
            AlertType::LowReservoirAlert => "Low reservoir",
            AlertType::AutoOffAlarm => "Auto-off",
            AlertType::SuspendInProgress => "Insulin delivery suspended",
            AlertType::SuspendEnded => "Suspension ended",
            AlertType::Unknown => "Unknown alert",
        };
        text.to_string()
    }
}

// ─── Registry ────────────────────────────────────────────────────────

/// Slot configuration and active-alert membership for the current pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRegistry {
    configured: BTreeMap<AlertSlot, AlertType>,
    active: AlertSet,
}

impl AlertRegistry {
    /// An empty registry: nothing configured, nothing active.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the mapping for a slot.
    pub fn configure(&mut self, slot: AlertSlot, alert_type: AlertType) {
        self.configured.insert(slot, alert_type);
    }

    /// Mark a slot as currently signaling.
    pub fn mark_active(&mut self, slot: AlertSlot) {
        self.active.insert(slot);
    }

    /// Mark a slot as no longer signaling. Clearing an inactive slot is a no-op.
    pub fn mark_cleared(&mut self, slot: AlertSlot) {
        self.active.remove(slot);
    }

    /// The slots currently signaling.
    pub fn active_alerts(&self) -> AlertSet {
        self.active
    }

    /// Whether any slot is signaling.
    pub fn has_active_alerts(&self) -> bool {
        !self.active.is_empty()
    }

    /// Whether any slot other than `slot` is signaling.
    pub fn has_other_active(&self, slot: AlertSlot) -> bool {
        let mut others = self.active;
        others.remove(slot);
        !others.is_empty()
    }

    /// Whether `slot` is signaling.
    pub fn is_active(&self, slot: AlertSlot) -> bool {
        self.active.contains(slot)
    }

    /// The alert type configured for `slot`; [`AlertType::Unknown`] when
    /// the slot has never been configured. Never fails.
    pub fn translate(&self, slot: AlertSlot) -> AlertType {
        self.configured
            .get(&slot)
            .copied()
            .unwrap_or(AlertType::Unknown)
    }

    /// Active slots paired with their configured types, in slot order.
    pub fn active_with_types(&self) -> Vec<(AlertSlot, AlertType)> {
        self.active
            .iter()
            .map(|slot| (slot, self.translate(slot)))
            .collect()
    }

    /// Descriptions of every active alert, in slot order.
    pub fn translated_active_alerts(&self, resolver: &dyn AlertDescriptionResolver) -> Vec<String> {
        self.active
            .iter()
            .map(|slot| resolver.resolve(self.translate(slot)))
            .collect()
    }

    /// The configured mapping, in slot order.
    pub fn configuration(&self) -> impl Iterator<Item = (AlertSlot, AlertType)> + '_ {
        self.configured.iter().map(|(slot, ty)| (*slot, *ty))
    }

    /// Forget all configuration and active alerts (pod deactivated or discarded).
    pub fn clear(&mut self) {
        self.configured.clear();
        self.active = AlertSet::EMPTY;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(i: u8) -> AlertSlot {
        AlertSlot::new(i).unwrap()
    }

    #[test]
    fn test_slot_range() {
        assert!(AlertSlot::new(7).is_ok());
        assert_eq!(AlertSlot::new(8), Err(AlertSlotError(8)));
        assert_eq!(AlertSlot::all().count(), 8);
    }

    #[test]
    fn test_translate_unconfigured_is_unknown() {
        let registry = AlertRegistry::new();
        for s in AlertSlot::all() {
            assert_eq!(registry.translate(s), AlertType::Unknown);
        }
    }

    #[test]
    fn test_configure_overwrites() {
        let mut registry = AlertRegistry::new();
        registry.configure(slot(7), AlertType::FinishPairingReminder);
        registry.configure(slot(7), AlertType::ExpirationAdvisoryAlert);
        assert_eq!(registry.translate(slot(7)), AlertType::ExpirationAdvisoryAlert);
    }

    #[test]
    fn test_active_membership() {
        let mut registry = AlertRegistry::new();
        registry.mark_active(slot(3));
        registry.mark_active(slot(5));
        assert!(registry.is_active(slot(3)));
        assert!(registry.has_other_active(slot(3)));
        registry.mark_cleared(slot(5));
        assert!(!registry.has_other_active(slot(3)));
        assert_eq!(registry.active_alerts().iter().collect::<Vec<_>>(), vec![slot(3)]);
    }

    #[test]
    fn test_mark_cleared_inactive_is_noop() {
        let mut registry = AlertRegistry::new();
        registry.mark_cleared(slot(2));
        assert!(!registry.has_active_alerts());
    }

    #[test]
    fn test_translated_active_alerts() {
        let mut registry = AlertRegistry::new();
        registry.configure(slot(3), AlertType::LowReservoirAlert);
        registry.mark_active(slot(3));
        registry.mark_active(slot(6));
        let texts = registry.translated_active_alerts(&DefaultAlertDescriptions);
        assert_eq!(texts, vec!["Low reservoir".to_string(), "Unknown alert".to_string()]);
    }

    #[test]
    fn test_clear_forgets_everything() {
        let mut registry = AlertRegistry::new();
        registry.configure(slot(1), AlertType::ExpirationAlert);
        registry.mark_active(slot(1));
        registry.clear();
        assert!(!registry.has_active_alerts());
        assert_eq!(registry.translate(slot(1)), AlertType::Unknown);
    }

    #[test]
    fn test_alert_set_bits_and_difference() {
        let reported = AlertSet::from_bits(0b0010_1000);
        assert_eq!(reported.len(), 2);
        assert!(reported.contains(slot(3)));
        assert!(reported.contains(slot(5)));
        let known: AlertSet = [slot(3)].into_iter().collect();
        assert_eq!(reported.difference(known).iter().collect::<Vec<_>>(), vec![slot(5)]);
    }

    #[test]
    fn test_alert_type_serializes_screaming_snake() {
        let json = serde_json::to_string(&AlertType::LowReservoirAlert).unwrap();
        assert_eq!(json, "\"LOW_RESERVOIR_ALERT\"");
        assert_eq!(AlertType::LowReservoirAlert.to_string(), "LOW_RESERVOIR_ALERT");
    }

    #[test]
    fn test_registry_serialization() {
        let mut registry = AlertRegistry::new();
        registry.configure(slot(4), AlertType::ShutdownImminentAlarm);
        registry.mark_active(slot(4));
        let json = serde_json::to_string(&registry).unwrap();
        let parsed: AlertRegistry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, registry);
    }
}
