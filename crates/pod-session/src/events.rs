//! Session events and a fan-out bus for them.
//!
//! Each subscriber gets its own unbounded FIFO, so one slow consumer
//! never delays the coordinator or another subscriber. Subscribers that
//! dropped their receiver are pruned on the next publish.

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use pod_state::{AlertSlot, AlertType, PodLifecycleState};

use crate::command::CommandOutcome;
use crate::ports::EventPublisher;

/// Something that happened in the session.
#[derive(Debug, Clone, PartialEq)]
pub enum PodEvent {
    /// Net lifecycle change caused by one command.
    StateChanged {
        old: PodLifecycleState,
        new: PodLifecycleState,
    },
    AlertRaised {
        slot: AlertSlot,
        alert_type: AlertType,
    },
    AlertCleared {
        slot: AlertSlot,
    },
    /// Final outcome of every command that was accepted for sending.
    CommandCompleted(CommandOutcome),
}

impl PodEvent {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "STATE_CHANGED",
            Self::AlertRaised { .. } => "ALERT_RAISED",
            Self::AlertCleared { .. } => "ALERT_CLEARED",
            Self::CommandCompleted(_) => "COMMAND_COMPLETED",
        }
    }
}

/// In-process fan-out of [`PodEvent`]s.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<UnboundedSender<PodEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. It sees every event published from now on,
    /// in publish order.
    pub fn subscribe(&self) -> UnboundedReceiver<PodEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Live subscriber count.
    pub fn subscriber_count(&self) -> usize {
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| !tx.is_closed());
        subs.len()
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: PodEvent) {
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
        tracing::trace!(event = event.name(), subscribers = subs.len(), "published pod event");
    }
}
