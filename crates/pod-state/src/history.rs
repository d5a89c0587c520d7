//! # Command History Log
//!
//! Append-only record of what the session did: every applied state
//! transition, every command that completed or failed without one, and
//! every pod discard. Entries carry a monotonically increasing sequence
//! number so consumers can page through the log without timestamps, which
//! may collide at seconds resolution.
//!
//! ## Retention
//!
//! With a retention cap the oldest entries are evicted first. Appending
//! never fails.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use pod_core::Timestamp;

use crate::lifecycle::{PodLifecycleState, StateTransition};

// ─── Command Kind ───────────────────────────────────────────────────

/// Payload-free identifier of a pod command, used for history, metrics,
/// and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    Discover,
    StartPairing,
    CompletePairing,
    Prime,
    SetTempBasal,
    CancelTempBasal,
    Bolus,
    SuspendDelivery,
    ResumeDelivery,
    ConfigureAlerts,
    GetStatus,
    Deactivate,
}

impl CommandKind {
    /// Stable name used as a log field and metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discover => "DISCOVER",
            Self::StartPairing => "START_PAIRING",
            Self::CompletePairing => "COMPLETE_PAIRING",
            Self::Prime => "PRIME",
            Self::SetTempBasal => "SET_TEMP_BASAL",
            Self::CancelTempBasal => "CANCEL_TEMP_BASAL",
            Self::Bolus => "BOLUS",
            Self::SuspendDelivery => "SUSPEND_DELIVERY",
            Self::ResumeDelivery => "RESUME_DELIVERY",
            Self::ConfigureAlerts => "CONFIGURE_ALERTS",
            Self::GetStatus => "GET_STATUS",
            Self::Deactivate => "DEACTIVATE",
        }
    }

    /// Whether the command changes insulin delivery.
    pub fn is_delivery(&self) -> bool {
        matches!(
            self,
            Self::SetTempBasal
                | Self::CancelTempBasal
                | Self::Bolus
                | Self::SuspendDelivery
                | Self::ResumeDelivery
        )
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Entries ────────────────────────────────────────────────────────

/// How a command without a state transition ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Completed,
    Failed(String),
}

/// What a history entry records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryEntryKind {
    /// A lifecycle transition was applied. `command` is `None` for
    /// transitions the session applied on its own.
    Transition {
        command: Option<CommandKind>,
        transition: StateTransition,
    },
    /// A command finished without changing the lifecycle state.
    Command {
        command: CommandKind,
        status: CommandStatus,
    },
    /// The pod was discarded and the session reset for a new one.
    PodDiscarded { previous: PodLifecycleState },
}

/// One history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandHistoryItem {
    /// Position in the log. Strictly increasing, never reused.
    pub sequence: u64,
    /// When the entry was recorded.
    pub timestamp: Timestamp,
    /// What happened.
    pub kind: HistoryEntryKind,
    /// Lifecycle state after the entry took effect.
    pub device_state: PodLifecycleState,
}

impl CommandHistoryItem {
    /// The command this entry belongs to, if any.
    pub fn command(&self) -> Option<CommandKind> {
        match &self.kind {
            HistoryEntryKind::Transition { command, .. } => *command,
            HistoryEntryKind::Command { command, .. } => Some(*command),
            HistoryEntryKind::PodDiscarded { .. } => None,
        }
    }

    /// Whether the entry records a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self.kind,
            HistoryEntryKind::Command {
                status: CommandStatus::Failed(_),
                ..
            }
        )
    }
}

// ─── Log ────────────────────────────────────────────────────────────

/// Ordered, optionally bounded command history.
#[derive(Debug, Clone, Default)]
pub struct CommandHistoryLog {
    entries: VecDeque<CommandHistoryItem>,
    retention: Option<usize>,
    next_sequence: u64,
}

impl CommandHistoryLog {
    /// An unbounded log.
    pub fn new() -> Self {
        Self::default()
    }

    /// A log keeping at most `retention` entries. A zero cap is treated as 1.
    pub fn with_retention(retention: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            retention: Some(retention.max(1)),
            next_sequence: 0,
        }
    }

    /// Append an entry, evicting the oldest if over the cap. Returns the
    /// sequence number assigned.
    pub fn append(
        &mut self,
        timestamp: Timestamp,
        kind: HistoryEntryKind,
        device_state: PodLifecycleState,
    ) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push_back(CommandHistoryItem {
            sequence,
            timestamp,
            kind,
            device_state,
        });
        if let Some(cap) = self.retention {
            while self.entries.len() > cap {
                self.entries.pop_front();
            }
        }
        sequence
    }

    /// Up to `n` entries, most recent first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &CommandHistoryItem> + '_ {
        self.entries.iter().rev().take(n)
    }

    /// All retained entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &CommandHistoryItem> + '_ {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The retention cap, if any.
    pub fn retention(&self) -> Option<usize> {
        self.retention
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::TransitionEvent;

    fn at(secs: i64) -> Timestamp {
        Timestamp::from_epoch_secs(1_770_000_000 + secs).unwrap()
    }

    fn completed(command: CommandKind) -> HistoryEntryKind {
        HistoryEntryKind::Command {
            command,
            status: CommandStatus::Completed,
        }
    }

    #[test]
    fn test_append_assigns_increasing_sequence() {
        let mut log = CommandHistoryLog::new();
        let a = log.append(at(0), completed(CommandKind::GetStatus), PodLifecycleState::Active);
        let b = log.append(at(0), completed(CommandKind::GetStatus), PodLifecycleState::Active);
        assert!(b > a);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_recent_is_most_recent_first() {
        let mut log = CommandHistoryLog::new();
        log.append(at(0), completed(CommandKind::Discover), PodLifecycleState::Discovering);
        log.append(at(1), completed(CommandKind::GetStatus), PodLifecycleState::Discovering);
        log.append(at(2), completed(CommandKind::Bolus), PodLifecycleState::Active);
        let cmds: Vec<_> = log.recent(2).filter_map(|e| e.command()).collect();
        assert_eq!(cmds, vec![CommandKind::Bolus, CommandKind::GetStatus]);
    }

    #[test]
    fn test_recent_larger_than_log() {
        let mut log = CommandHistoryLog::new();
        log.append(at(0), completed(CommandKind::GetStatus), PodLifecycleState::Active);
        assert_eq!(log.recent(10).count(), 1);
        assert_eq!(CommandHistoryLog::new().recent(5).count(), 0);
    }

    #[test]
    fn test_retention_evicts_oldest() {
        let mut log = CommandHistoryLog::with_retention(3);
        for i in 0..5 {
            log.append(at(i), completed(CommandKind::GetStatus), PodLifecycleState::Active);
        }
        assert_eq!(log.len(), 3);
        let seqs: Vec<u64> = log.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[test]
    fn test_transition_entry_reports_command() {
        let mut log = CommandHistoryLog::new();
        log.append(
            at(0),
            HistoryEntryKind::Transition {
                command: Some(CommandKind::Discover),
                transition: StateTransition {
                    event: TransitionEvent::Discover,
                    from: PodLifecycleState::NeverContacted,
                    to: PodLifecycleState::Discovering,
                },
            },
            PodLifecycleState::Discovering,
        );
        let entry = log.recent(1).next().unwrap();
        assert_eq!(entry.command(), Some(CommandKind::Discover));
        assert!(!entry.is_failure());
    }

    #[test]
    fn test_failure_entry() {
        let mut log = CommandHistoryLog::new();
        log.append(
            at(0),
            HistoryEntryKind::Command {
                command: CommandKind::Bolus,
                status: CommandStatus::Failed("transport timed out".to_string()),
            },
            PodLifecycleState::Active,
        );
        assert!(log.iter().next().unwrap().is_failure());
    }

    #[test]
    fn test_entry_serialization() {
        let item = CommandHistoryItem {
            sequence: 7,
            timestamp: at(0),
            kind: HistoryEntryKind::PodDiscarded {
                previous: PodLifecycleState::Faulted,
            },
            device_state: PodLifecycleState::NeverContacted,
        };
        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains("\"POD_DISCARDED\""));
        let parsed: CommandHistoryItem = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, item);
    }

    #[test]
    fn test_command_kind_display() {
        assert_eq!(CommandKind::SetTempBasal.to_string(), "SET_TEMP_BASAL");
        assert!(CommandKind::Bolus.is_delivery());
        assert!(!CommandKind::GetStatus.is_delivery());
    }
}
