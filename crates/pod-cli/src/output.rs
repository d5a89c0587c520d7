//! JSON rendering for session events.

use serde_json::{json, Value};

use pod_session::{CommandOutcome, PodEvent};

/// Render an event as a JSON object tagged with its name.
pub fn event_json(event: &PodEvent) -> Value {
    match event {
        PodEvent::StateChanged { old, new } => json!({
            "event": event.name(),
            "old": old,
            "new": new,
        }),
        PodEvent::AlertRaised { slot, alert_type } => json!({
            "event": event.name(),
            "slot": slot,
            "alert_type": alert_type,
        }),
        PodEvent::AlertCleared { slot } => json!({
            "event": event.name(),
            "slot": slot,
        }),
        PodEvent::CommandCompleted(CommandOutcome::Completed(report)) => json!({
            "event": event.name(),
            "command": report.command,
            "status": "COMPLETED",
            "state": report.state,
            "transitions": report.transitions,
            "completed_at": report.completed_at,
            "persisted": report.persisted,
        }),
        PodEvent::CommandCompleted(CommandOutcome::Failed { command, error }) => json!({
            "event": event.name(),
            "command": command,
            "status": "FAILED",
            "error": error.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pod_session::{CommandError, CommandKind, PodLifecycleState, TransportError};

    #[test]
    fn test_state_change_json() {
        let value = event_json(&PodEvent::StateChanged {
            old: PodLifecycleState::Active,
            new: PodLifecycleState::Suspended,
        });
        assert_eq!(value["event"], "STATE_CHANGED");
        assert_eq!(value["new"], "Suspended");
    }

    #[test]
    fn test_failed_outcome_carries_message() {
        let value = event_json(&PodEvent::CommandCompleted(CommandOutcome::Failed {
            command: CommandKind::GetStatus,
            error: CommandError::TransportFailure(TransportError::Timeout),
        }));
        assert_eq!(value["command"], "GET_STATUS");
        assert_eq!(value["status"], "FAILED");
        assert!(value["error"].as_str().unwrap().contains("no reply from pod"));
    }
}
