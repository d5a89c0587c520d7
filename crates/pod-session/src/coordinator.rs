//! # Session Coordinator
//!
//! Single entry point for everything that talks to the pod. Owns the
//! lifecycle machine, alert registry, temp basal tracker, and history log,
//! and is the only code that mutates them.
//!
//! ## Concurrency
//!
//! Two locks, never nested in the other order:
//!
//! - `in_flight` (`tokio::sync::Mutex<()>`) is taken with `try_lock` and
//!   held across the transport await. A second caller gets
//!   [`CommandError::AlreadyInProgress`] immediately instead of queueing.
//!   The guard lives in an RAII value, so it is released on every return
//!   path and when the caller drops the future.
//!
//! - `state` (`parking_lot::RwLock`) holds the committed session state.
//!   Write locks are short and never span an await. [`snapshot`] takes
//!   only the read lock and so never waits for an in-flight command.
//!
//! ## Command pipeline
//!
//! 1. Acquire the in-flight guard.
//! 2. Require an initialized driver.
//! 3. Drop an expired temp basal.
//! 4. Validate parameters and state before anything is sent.
//! 5. Send, bounded by the configured timeout.
//! 6. Transport failure: record, mark state uncertain, lifecycle unchanged.
//! 7. Device fault: transition to `Faulted`, clear the temp basal.
//! 8. Success: derive events, apply them to scratch copies, commit all or
//!    nothing, record one history entry per event, persist, publish.
//!
//! [`snapshot`]: SessionCoordinator::snapshot

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};

use pod_core::{FaultCode, PodInfo, SessionId, Timestamp};
use pod_state::{
    AlertRegistry, AlertSet, AlertSlot, AlertType, CommandHistoryItem, CommandHistoryLog,
    CommandKind, CommandStatus, DriverState, HistoryEntryKind, PodLifecycleState,
    PodStateMachine, StateTransition, TempBasalTracker, TransitionEvent,
};

use crate::command::{
    CommandError, CommandOutcome, CommandReport, CommandRequest, PodCommand, PodResponse,
    TransportError,
};
use crate::config::{DeliveryLimits, SessionConfig};
use crate::events::PodEvent;
use crate::persist::{PersistedSession, SessionError, STATE_VERSION};
use crate::ports::SessionPorts;
use crate::snapshot::{ActiveAlert, BolusRecord, LinkState, PumpStatusSnapshot};

// ─── Session State ──────────────────────────────────────────────────

#[derive(Debug)]
struct SessionState {
    session_id: SessionId,
    driver: DriverState,
    machine: PodStateMachine,
    alerts: AlertRegistry,
    temp_basal: TempBasalTracker,
    history: CommandHistoryLog,
    link_state: LinkState,
    pod_info: Option<PodInfo>,
    fault_code: Option<FaultCode>,
    last_known_good: Option<Timestamp>,
    last_bolus: Option<BolusRecord>,
    reservoir_units: Option<f64>,
    battery_percent: Option<u8>,
    last_error: Option<String>,
    state_uncertain: bool,
    current_command: Option<CommandKind>,
    last_outcome: Option<CommandOutcome>,
}

impl SessionState {
    fn new(history: CommandHistoryLog) -> Self {
        Self {
            session_id: SessionId::new(),
            driver: DriverState::NotInitialized,
            machine: PodStateMachine::new(),
            alerts: AlertRegistry::new(),
            temp_basal: TempBasalTracker::new(),
            history,
            link_state: LinkState::Idle,
            pod_info: None,
            fault_code: None,
            last_known_good: None,
            last_bolus: None,
            reservoir_units: None,
            battery_percent: None,
            last_error: None,
            state_uncertain: false,
            current_command: None,
            last_outcome: None,
        }
    }

    fn lifecycle(&self) -> PodLifecycleState {
        self.machine.state()
    }

    fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            version: STATE_VERSION,
            session_id: self.session_id,
            lifecycle: self.machine.state(),
            driver_state: self.driver,
            temp_basal: self.temp_basal.current(),
            alerts: self.alerts.clone(),
            pod_info: self.pod_info,
            fault_code: self.fault_code,
            last_known_good: self.last_known_good,
            last_bolus: self.last_bolus,
            reservoir_units: self.reservoir_units,
            battery_percent: self.battery_percent,
            state_uncertain: self.state_uncertain,
        }
    }

    fn restore_from(&mut self, blob: PersistedSession) {
        self.session_id = blob.session_id;
        self.machine = PodStateMachine::restore(blob.lifecycle);
        self.alerts = blob.alerts;
        self.temp_basal = TempBasalTracker::restore(blob.temp_basal);
        self.pod_info = blob.pod_info;
        self.fault_code = blob.fault_code;
        self.last_known_good = blob.last_known_good;
        self.last_bolus = blob.last_bolus;
        self.reservoir_units = blob.reservoir_units;
        self.battery_percent = blob.battery_percent;
        self.state_uncertain = blob.state_uncertain;
    }
}

// ─── In-flight Guard ────────────────────────────────────────────────

/// Holds the in-flight lock for one command. Dropping it clears the
/// in-flight flag; if the command was still talking to the pod (the
/// caller dropped the future mid-send) the session is marked uncertain.
struct InFlight<'a> {
    state: &'a RwLock<SessionState>,
    _guard: MutexGuard<'a, ()>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut st = self.state.write();
        let current = st.current_command.take();
        if st.link_state == LinkState::Communicating {
            tracing::warn!(command = ?current, "command abandoned while communicating; pod state uncertain");
            st.link_state = LinkState::ErrorWhenCommunicating;
            st.state_uncertain = true;
            st.last_error = Some("command abandoned before the pod replied".to_string());
        }
    }
}

// ─── Coordinator ────────────────────────────────────────────────────

/// Serializes commands to one pod and keeps the session state consistent.
///
/// Share it as `Arc<SessionCoordinator>`; all methods take `&self`.
pub struct SessionCoordinator {
    config: SessionConfig,
    limits: DeliveryLimits,
    ports: SessionPorts,
    in_flight: Mutex<()>,
    state: RwLock<SessionState>,
    request_sequence: AtomicU64,
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.read();
        f.debug_struct("SessionCoordinator")
            .field("session_id", &st.session_id)
            .field("driver", &st.driver)
            .field("lifecycle", &st.lifecycle())
            .finish_non_exhaustive()
    }
}

impl SessionCoordinator {
    /// Build a coordinator. The driver starts `NotInitialized`; call
    /// [`initialize`](Self::initialize) before issuing commands.
    pub fn new(config: SessionConfig, ports: SessionPorts) -> Result<Self, SessionError> {
        config.validate()?;
        let limits = config.limits()?;
        let history = match config.history_retention {
            Some(cap) => CommandHistoryLog::with_retention(cap),
            None => CommandHistoryLog::new(),
        };
        Ok(Self {
            config,
            limits,
            ports,
            in_flight: Mutex::new(()),
            state: RwLock::new(SessionState::new(history)),
            request_sequence: AtomicU64::new(0),
        })
    }

    /// The configuration this coordinator was built with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ── Session lifecycle ───────────────────────────────────────────

    /// Move the driver to `Initialized`, restoring any persisted session.
    ///
    /// A blob left by a session that did not end cleanly restores with
    /// `state_uncertain` set: the previous process may have died mid-command.
    pub fn initialize(&self) -> Result<(), SessionError> {
        {
            let mut st = self.state.write();
            if st.driver != DriverState::NotInitialized {
                return Err(SessionError::InvalidDriverState {
                    operation: "initialize",
                    state: st.driver,
                });
            }
            st.driver = DriverState::Initializing;
        }

        let loaded = self
            .ports
            .persistence
            .load()
            .map_err(SessionError::from)
            .and_then(|blob| blob.map(|b| PersistedSession::decode(&b)).transpose());

        let mut st = self.state.write();
        match loaded {
            Ok(Some(blob)) => {
                let unclean = !blob.ended_cleanly();
                st.restore_from(blob);
                if unclean {
                    st.state_uncertain = true;
                }
                tracing::info!(
                    session = %st.session_id,
                    lifecycle = %st.lifecycle(),
                    state_uncertain = st.state_uncertain,
                    "restored pod session"
                );
            }
            Ok(None) => {
                tracing::info!(session = %st.session_id, "starting new pod session");
            }
            Err(e) => {
                st.driver = DriverState::NotInitialized;
                tracing::error!(error = %e, "failed to restore pod session");
                return Err(e);
            }
        }
        st.driver = DriverState::Initialized;
        Ok(())
    }

    /// Close the session cleanly and persist that fact.
    pub fn end_session(&self) -> Result<(), SessionError> {
        let _guard = self.in_flight.try_lock().map_err(|_| SessionError::Busy)?;
        let blob = {
            let mut st = self.state.write();
            if st.driver != DriverState::Initialized {
                return Err(SessionError::InvalidDriverState {
                    operation: "end_session",
                    state: st.driver,
                });
            }
            st.driver = DriverState::SessionEnded;
            tracing::info!(session = %st.session_id, lifecycle = %st.lifecycle(), "pod session ended");
            st.to_persisted()
        };
        self.ports.persistence.save(&blob.encode()?)?;
        Ok(())
    }

    /// Forget a faulted or deactivated pod so a new one can be paired.
    pub fn discard_pod(&self) -> Result<(), SessionError> {
        let _guard = self.in_flight.try_lock().map_err(|_| SessionError::Busy)?;
        let now = self.ports.clock.now();
        let (blob, old) = {
            let mut st = self.state.write();
            if st.driver != DriverState::Initialized {
                return Err(SessionError::InvalidDriverState {
                    operation: "discard_pod",
                    state: st.driver,
                });
            }
            let previous = st.lifecycle();
            if !matches!(
                previous,
                PodLifecycleState::Faulted | PodLifecycleState::Deactivated
            ) {
                return Err(SessionError::CannotDiscard(previous));
            }
            st.machine = PodStateMachine::new();
            st.alerts.clear();
            st.temp_basal.clear(now);
            st.pod_info = None;
            st.fault_code = None;
            st.last_bolus = None;
            st.reservoir_units = None;
            st.battery_percent = None;
            st.last_error = None;
            st.state_uncertain = false;
            st.link_state = LinkState::Idle;
            st.history.append(
                now,
                HistoryEntryKind::PodDiscarded { previous },
                PodLifecycleState::NeverContacted,
            );
            tracing::info!(previous = %previous, "pod discarded");
            (st.to_persisted(), previous)
        };
        self.persist(&blob);
        self.ports.events.publish(PodEvent::StateChanged {
            old,
            new: PodLifecycleState::NeverContacted,
        });
        Ok(())
    }

    /// Clear the temp basal if it has run out. Returns whether it did.
    pub fn reconcile_temp_basal(&self) -> Result<bool, SessionError> {
        let _guard = self.in_flight.try_lock().map_err(|_| SessionError::Busy)?;
        let now = self.ports.clock.now();
        let blob = {
            let mut st = self.state.write();
            if !expire_temp_basal(&mut st, now) {
                return Ok(false);
            }
            st.to_persisted()
        };
        self.persist(&blob);
        Ok(true)
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Send one command to the pod and fold its response into the session.
    pub async fn issue_command(&self, command: PodCommand) -> Result<CommandReport, CommandError> {
        let kind = command.kind();
        let Ok(guard) = self.in_flight.try_lock() else {
            tracing::debug!(command = %kind, "rejected: command already in flight");
            count_command(kind, "busy");
            return Err(CommandError::AlreadyInProgress);
        };
        let _in_flight = InFlight {
            state: &self.state,
            _guard: guard,
        };

        let now = self.ports.clock.now();
        {
            let mut st = self.state.write();
            if st.driver != DriverState::Initialized {
                count_command(kind, "rejected");
                return Err(CommandError::DriverNotReady(st.driver));
            }
            expire_temp_basal(&mut st, now);
            if let Err(e) = self.check_command(&command, &st) {
                tracing::warn!(command = %command, state = %st.lifecycle(), error = %e, "command rejected before sending");
                count_command(kind, "rejected");
                return Err(e);
            }
            st.link_state = LinkState::Communicating;
            st.current_command = Some(kind);
        }

        let request = CommandRequest {
            sequence: self.request_sequence.fetch_add(1, Ordering::Relaxed),
            beep: command.beep(&self.config.beeps),
            command,
        };
        if self.config.trace_transport {
            tracing::debug!(sequence = request.sequence, request = ?request, "sending pod command");
        }

        let result = match tokio::time::timeout(
            self.config.command_timeout(),
            self.ports.transport.send(&request),
        )
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(TransportError::Timeout),
        };
        if self.config.trace_transport {
            tracing::debug!(sequence = request.sequence, response = ?result, "pod command returned");
        }

        let now = self.ports.clock.now();
        let already_faulted = self.state.read().lifecycle() == PodLifecycleState::Faulted;
        match result {
            Err(e) => Err(self.on_transport_failure(kind, e, now)),
            Ok(response) => match response.fault {
                Some(code) if !already_faulted => {
                    Err(self.on_device_fault(kind, code, &response, now))
                }
                _ => self.on_response(&request.command, response, now),
            },
        }
    }

    fn check_command(&self, command: &PodCommand, st: &SessionState) -> Result<(), CommandError> {
        let state = st.lifecycle();
        let kind = command.kind();
        let not_permitted = || CommandError::NotPermitted {
            command: kind,
            state,
        };

        match state {
            PodLifecycleState::Deactivated => return Err(not_permitted()),
            PodLifecycleState::Faulted
                if !matches!(kind, CommandKind::GetStatus | CommandKind::Deactivate) =>
            {
                return Err(not_permitted())
            }
            _ => {}
        }

        match command {
            PodCommand::SetTempBasal {
                rate,
                duration_minutes,
            } => {
                if *rate > self.limits.max_temp_basal_rate {
                    return Err(CommandError::InvalidParameter(format!(
                        "temp basal rate {rate} exceeds limit {}",
                        self.limits.max_temp_basal_rate
                    )));
                }
                if *duration_minutes == 0 || *duration_minutes > self.limits.max_temp_basal_minutes {
                    return Err(CommandError::InvalidParameter(format!(
                        "temp basal duration {duration_minutes} min outside 1..={}",
                        self.limits.max_temp_basal_minutes
                    )));
                }
            }
            PodCommand::Bolus { units, .. } => {
                if units.hundredths() == 0 || *units > self.limits.max_bolus {
                    return Err(CommandError::InvalidParameter(format!(
                        "bolus {units} outside (0, {}]",
                        self.limits.max_bolus
                    )));
                }
            }
            PodCommand::ConfigureAlerts { alerts } => {
                let mut seen = AlertSet::EMPTY;
                for (slot, _) in alerts {
                    if seen.contains(*slot) {
                        return Err(CommandError::InvalidParameter(format!(
                            "alert {slot} configured twice"
                        )));
                    }
                    seen.insert(*slot);
                }
            }
            _ => {}
        }

        match kind {
            CommandKind::SetTempBasal | CommandKind::CancelTempBasal | CommandKind::Bolus
                if !state.is_delivering() =>
            {
                return Err(not_permitted())
            }
            CommandKind::ConfigureAlerts if !tracks_alerts(state) => return Err(not_permitted()),
            CommandKind::GetStatus if state == PodLifecycleState::NeverContacted => {
                return Err(not_permitted())
            }
            _ => {}
        }

        if let Some(event) = command.lifecycle_event() {
            st.machine.permits(event, &st.alerts)?;
        }
        Ok(())
    }

    fn on_transport_failure(&self, kind: CommandKind, error: TransportError, now: Timestamp) -> CommandError {
        let err = CommandError::TransportFailure(error.clone());
        let blob = {
            let mut st = self.state.write();
            st.link_state = match error {
                TransportError::Timeout => LinkState::TimeoutWhenCommunicating,
                _ => LinkState::ErrorWhenCommunicating,
            };
            if leaves_state_uncertain(&error) {
                st.state_uncertain = true;
            }
            st.last_error = Some(err.to_string());
            let device_state = st.lifecycle();
            st.history.append(
                now,
                HistoryEntryKind::Command {
                    command: kind,
                    status: CommandStatus::Failed(err.to_string()),
                },
                device_state,
            );
            st.last_outcome = Some(CommandOutcome::Failed {
                command: kind,
                error: err.clone(),
            });
            tracing::warn!(
                command = %kind,
                error = %error,
                lifecycle = %device_state,
                state_uncertain = st.state_uncertain,
                "pod command failed in transport"
            );
            st.to_persisted()
        };
        count_command(kind, "transport_failure");
        self.persist(&blob);
        self.ports.events.publish(PodEvent::CommandCompleted(CommandOutcome::Failed {
            command: kind,
            error: err.clone(),
        }));
        err
    }

    fn on_device_fault(
        &self,
        kind: CommandKind,
        code: FaultCode,
        response: &PodResponse,
        now: Timestamp,
    ) -> CommandError {
        let err = CommandError::DeviceFault(code);
        let (blob, transition, raised, cleared) = {
            let mut st = self.state.write();
            let mut machine = st.machine.clone();
            let transition = match machine.apply(TransitionEvent::FaultDetected(code), &st.alerts) {
                Ok(t) => t,
                Err(e) => {
                    // Only Faulted and Deactivated reject a fault, and neither reaches here.
                    tracing::error!(error = %e, "fault transition rejected");
                    return CommandError::InvalidTransition(e);
                }
            };
            st.machine = machine;
            st.temp_basal.clear(now);
            st.fault_code = Some(code);
            st.link_state = LinkState::Idle;
            st.last_error = Some(err.to_string());
            apply_telemetry(&mut st, response);
            // Alarms reported alongside the fault are kept; Faulted does not
            // track them as lifecycle events.
            let (raised, cleared) = match response.active_alerts {
                Some(reported) => diff_alerts(&st.alerts, reported),
                None => (Vec::new(), Vec::new()),
            };
            for slot in &raised {
                st.alerts.mark_active(*slot);
            }
            for slot in &cleared {
                st.alerts.mark_cleared(*slot);
            }
            let raised: Vec<(AlertSlot, AlertType)> =
                raised.iter().map(|slot| (*slot, st.alerts.translate(*slot))).collect();
            st.history.append(
                now,
                HistoryEntryKind::Transition {
                    command: Some(kind),
                    transition,
                },
                transition.to,
            );
            st.last_outcome = Some(CommandOutcome::Failed {
                command: kind,
                error: err.clone(),
            });
            (st.to_persisted(), transition, raised, cleared)
        };
        tracing::error!(command = %kind, fault = %code, from = %transition.from, "pod reported hard fault");
        count_command(kind, "device_fault");
        count_transition(&transition);
        self.persist(&blob);
        self.ports.events.publish(PodEvent::StateChanged {
            old: transition.from,
            new: transition.to,
        });
        for (slot, alert_type) in raised {
            self.ports.events.publish(PodEvent::AlertRaised { slot, alert_type });
        }
        for slot in cleared {
            self.ports.events.publish(PodEvent::AlertCleared { slot });
        }
        self.ports.events.publish(PodEvent::CommandCompleted(CommandOutcome::Failed {
            command: kind,
            error: err.clone(),
        }));
        err
    }

    fn on_response(
        &self,
        command: &PodCommand,
        response: PodResponse,
        now: Timestamp,
    ) -> Result<CommandReport, CommandError> {
        let kind = command.kind();
        let mut st = self.state.write();
        let old = st.lifecycle();

        // Scratch copies; committed only if every event applies.
        let mut machine = st.machine.clone();
        let mut alerts = st.alerts.clone();
        if let PodCommand::ConfigureAlerts { alerts: configured } = command {
            for (slot, alert_type) in configured {
                alerts.configure(*slot, *alert_type);
            }
        }
        for (slot, alert_type) in &response.alert_configuration {
            alerts.configure(*slot, *alert_type);
        }

        let mut transitions = Vec::new();
        if let Some(event) = command.lifecycle_event() {
            match machine.apply(event, &alerts) {
                Ok(t) => transitions.push(t),
                Err(e) => return Err(self.on_rejected_response(st, kind, e, now)),
            }
        }

        let mut raised = Vec::new();
        let mut cleared = Vec::new();
        if kind == CommandKind::Deactivate {
            cleared = alerts.active_alerts().iter().collect();
            alerts.clear();
        } else if let Some(reported) = response.active_alerts {
            (raised, cleared) = diff_alerts(&alerts, reported);
            if tracks_alerts(machine.state()) {
                for slot in &raised {
                    match machine.apply(TransitionEvent::AlertRaised(*slot), &alerts) {
                        Ok(t) => transitions.push(t),
                        Err(e) => return Err(self.on_rejected_response(st, kind, e, now)),
                    }
                    alerts.mark_active(*slot);
                }
                for slot in &cleared {
                    match machine.apply(TransitionEvent::AlertCleared(*slot), &alerts) {
                        Ok(t) => transitions.push(t),
                        Err(e) => return Err(self.on_rejected_response(st, kind, e, now)),
                    }
                    alerts.mark_cleared(*slot);
                }
            } else {
                // No lifecycle meaning in this state; just track what the pod reports.
                for slot in &raised {
                    alerts.mark_active(*slot);
                }
                for slot in &cleared {
                    alerts.mark_cleared(*slot);
                }
            }
        }

        // Commit.
        st.machine = machine;
        st.alerts = alerts;
        match command {
            PodCommand::SetTempBasal {
                rate,
                duration_minutes,
            } => st.temp_basal.start(*rate, *duration_minutes, now),
            PodCommand::CancelTempBasal | PodCommand::SuspendDelivery | PodCommand::Deactivate => {
                st.temp_basal.clear(now)
            }
            PodCommand::Bolus { units, automatic } => {
                st.last_bolus = Some(BolusRecord {
                    units: *units,
                    automatic: *automatic,
                    at: now,
                });
            }
            _ => {}
        }
        apply_telemetry(&mut st, &response);
        st.link_state = LinkState::Idle;
        st.last_error = None;
        st.last_known_good = Some(now);
        if kind == CommandKind::GetStatus {
            st.state_uncertain = false;
        }

        for transition in &transitions {
            st.history.append(
                now,
                HistoryEntryKind::Transition {
                    command: Some(kind),
                    transition: *transition,
                },
                transition.to,
            );
        }
        if transitions.is_empty() {
            let device_state = st.lifecycle();
            st.history.append(
                now,
                HistoryEntryKind::Command {
                    command: kind,
                    status: CommandStatus::Completed,
                },
                device_state,
            );
        }

        let new = st.lifecycle();
        let raised_typed: Vec<(AlertSlot, AlertType)> =
            raised.iter().map(|slot| (*slot, st.alerts.translate(*slot))).collect();
        let blob = st.to_persisted();
        drop(st);

        for transition in &transitions {
            count_transition(transition);
            if transition.is_change() {
                tracing::info!(
                    command = %kind,
                    event = %transition.event,
                    from = %transition.from,
                    to = %transition.to,
                    "pod state transition"
                );
            }
        }
        let persisted = self.persist(&blob);

        let report = CommandReport {
            command: kind,
            transitions,
            state: new,
            completed_at: now,
            persisted,
        };
        self.state.write().last_outcome = Some(CommandOutcome::Completed(report.clone()));
        count_command(kind, "completed");

        if old != new {
            self.ports.events.publish(PodEvent::StateChanged { old, new });
        }
        for (slot, alert_type) in raised_typed {
            self.ports.events.publish(PodEvent::AlertRaised { slot, alert_type });
        }
        for slot in cleared {
            self.ports.events.publish(PodEvent::AlertCleared { slot });
        }
        self.ports
            .events
            .publish(PodEvent::CommandCompleted(CommandOutcome::Completed(report.clone())));
        Ok(report)
    }

    /// The pod accepted a command but its response does not fit the
    /// lifecycle. Nothing is committed; the session is marked uncertain.
    fn on_rejected_response(
        &self,
        mut st: parking_lot::RwLockWriteGuard<'_, SessionState>,
        kind: CommandKind,
        error: pod_state::InvalidTransitionError,
        now: Timestamp,
    ) -> CommandError {
        let err = CommandError::InvalidTransition(error);
        tracing::warn!(command = %kind, error = %err, "pod response rejected by state machine");
        st.link_state = LinkState::Idle;
        st.state_uncertain = true;
        st.last_error = Some(err.to_string());
        let device_state = st.lifecycle();
        st.history.append(
            now,
            HistoryEntryKind::Command {
                command: kind,
                status: CommandStatus::Failed(err.to_string()),
            },
            device_state,
        );
        st.last_outcome = Some(CommandOutcome::Failed {
            command: kind,
            error: err.clone(),
        });
        let blob = st.to_persisted();
        drop(st);
        count_command(kind, "invalid_transition");
        self.persist(&blob);
        self.ports.events.publish(PodEvent::CommandCompleted(CommandOutcome::Failed {
            command: kind,
            error: err.clone(),
        }));
        err
    }

    /// Save the blob. Failure is logged, never raised; the device already
    /// acted on the command.
    fn persist(&self, blob: &PersistedSession) -> bool {
        let result = blob
            .encode()
            .and_then(|bytes| self.ports.persistence.save(&bytes).map_err(SessionError::from));
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, session = %blob.session_id, "failed to persist pod session");
                false
            }
        }
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Consistent view of the committed state. Never waits on a command.
    pub fn snapshot(&self) -> PumpStatusSnapshot {
        let now = self.ports.clock.now();
        let st = self.state.read();
        let temp_basal = st.temp_basal.active_at(now);
        PumpStatusSnapshot {
            session_id: st.session_id,
            taken_at: now,
            lifecycle: st.lifecycle(),
            driver_state: st.driver,
            link_state: st.link_state,
            temp_basal,
            temp_basal_remaining_minutes: st.temp_basal.remaining_minutes(now),
            active_alerts: st
                .alerts
                .active_with_types()
                .into_iter()
                .map(|(slot, alert_type)| ActiveAlert {
                    slot,
                    alert_type,
                    description: self.ports.alert_descriptions.resolve(alert_type),
                })
                .collect(),
            reservoir_units: st.reservoir_units,
            battery_percent: st.battery_percent,
            last_bolus: st.last_bolus,
            last_known_good: st.last_known_good,
            last_error: st.last_error.clone(),
            fault_code: st.fault_code,
            state_uncertain: st.state_uncertain,
            current_command: st.current_command,
            pod_info: st.pod_info,
        }
    }

    /// Localized descriptions of the active alerts.
    pub fn translated_active_alerts(&self) -> Vec<String> {
        self.state
            .read()
            .alerts
            .translated_active_alerts(self.ports.alert_descriptions.as_ref())
    }

    /// Up to `n` history entries, most recent first.
    pub fn history(&self, n: usize) -> Vec<CommandHistoryItem> {
        self.state.read().history.recent(n).cloned().collect()
    }

    /// Outcome of the most recent command that reached the pod.
    pub fn last_outcome(&self) -> Option<CommandOutcome> {
        self.state.read().last_outcome.clone()
    }

    /// Current driver state.
    pub fn driver_state(&self) -> DriverState {
        self.state.read().driver
    }

    /// Current pod lifecycle state.
    pub fn lifecycle_state(&self) -> PodLifecycleState {
        self.state.read().lifecycle()
    }

    /// Identifier of this session, stable across restores.
    pub fn session_id(&self) -> SessionId {
        self.state.read().session_id
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

/// States in which alert changes are lifecycle events.
fn tracks_alerts(state: PodLifecycleState) -> bool {
    matches!(
        state,
        PodLifecycleState::Pairing
            | PodLifecycleState::Priming
            | PodLifecycleState::Active
            | PodLifecycleState::ActiveAlerting
            | PodLifecycleState::Suspended
    )
}

/// Whether the pod may have acted on a command that failed this way.
fn leaves_state_uncertain(error: &TransportError) -> bool {
    matches!(
        error,
        TransportError::Timeout | TransportError::NoResponse | TransportError::MalformedResponse(_)
    )
}

/// Slots `reported` adds to and drops from the registry's active set.
fn diff_alerts(registry: &AlertRegistry, reported: AlertSet) -> (Vec<AlertSlot>, Vec<AlertSlot>) {
    let previous = registry.active_alerts();
    (
        reported.difference(previous).iter().collect(),
        previous.difference(reported).iter().collect(),
    )
}

fn expire_temp_basal(st: &mut SessionState, now: Timestamp) -> bool {
    let current = st.temp_basal.current();
    if current.is_none() || !st.temp_basal.is_expired(now) {
        return false;
    }
    st.temp_basal.clear(now);
    tracing::info!(rate = %current.rate, ended = %current.end(), "temp basal expired");
    true
}

fn apply_telemetry(st: &mut SessionState, response: &PodResponse) {
    if let Some(units) = response.reservoir_units {
        st.reservoir_units = Some(units);
    }
    if let Some(percent) = response.battery_percent {
        st.battery_percent = Some(percent);
    }
    if let Some(info) = response.pod_info {
        st.pod_info = Some(info);
    }
}

fn count_command(kind: CommandKind, status: &'static str) {
    metrics::counter!("pod_commands_total", "command" => kind.as_str(), "status" => status)
        .increment(1);
}

fn count_transition(transition: &StateTransition) {
    metrics::counter!("pod_state_transitions_total", "to" => transition.to.as_str()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use pod_core::InsulinRate;

    use crate::ports::{InMemoryPersistence, ManualClock, PodTransport, StatePersistence};

    struct Echo;

    #[async_trait::async_trait]
    impl PodTransport for Echo {
        async fn send(&self, _request: &CommandRequest) -> Result<PodResponse, TransportError> {
            Ok(PodResponse::ack().with_alerts(AlertSet::EMPTY))
        }
    }

    fn coordinator(clock: ManualClock) -> SessionCoordinator {
        let ports = SessionPorts::new(Arc::new(Echo)).with_clock(Arc::new(clock));
        SessionCoordinator::new(SessionConfig::default(), ports).unwrap()
    }

    fn start() -> Timestamp {
        Timestamp::parse("2026-03-01T08:00:00Z").unwrap()
    }

    async fn activate(c: &SessionCoordinator) {
        for cmd in [
            PodCommand::Discover,
            PodCommand::StartPairing,
            PodCommand::CompletePairing,
            PodCommand::Prime,
        ] {
            c.issue_command(cmd).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_commands_require_initialized_driver() {
        let c = coordinator(ManualClock::new(start()));
        let err = c.issue_command(PodCommand::Discover).await.unwrap_err();
        assert_eq!(err, CommandError::DriverNotReady(DriverState::NotInitialized));
        assert!(c.history(10).is_empty());
    }

    #[tokio::test]
    async fn test_initialize_twice_rejected() {
        let c = coordinator(ManualClock::new(start()));
        c.initialize().unwrap();
        assert!(matches!(
            c.initialize(),
            Err(SessionError::InvalidDriverState { .. })
        ));
    }

    #[tokio::test]
    async fn test_delivery_rejected_before_activation() {
        let c = coordinator(ManualClock::new(start()));
        c.initialize().unwrap();
        c.issue_command(PodCommand::Discover).await.unwrap();
        let err = c
            .issue_command(PodCommand::SetTempBasal {
                rate: InsulinRate::from_units_per_hour(1.0).unwrap(),
                duration_minutes: 30,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NotPermitted { .. }));
        assert_eq!(c.history(10).len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_order_pairing_is_invalid_transition() {
        let c = coordinator(ManualClock::new(start()));
        c.initialize().unwrap();
        let err = c.issue_command(PodCommand::Prime).await.unwrap_err();
        assert!(matches!(err, CommandError::InvalidTransition(_)));
        assert_eq!(c.lifecycle_state(), PodLifecycleState::NeverContacted);
    }

    #[tokio::test]
    async fn test_parameter_limits() {
        let c = coordinator(ManualClock::new(start()));
        c.initialize().unwrap();
        activate(&c).await;
        let too_fast = PodCommand::SetTempBasal {
            rate: InsulinRate::from_units_per_hour(31.0).unwrap(),
            duration_minutes: 30,
        };
        assert!(matches!(
            c.issue_command(too_fast).await,
            Err(CommandError::InvalidParameter(_))
        ));
        let zero_minutes = PodCommand::SetTempBasal {
            rate: InsulinRate::from_units_per_hour(1.0).unwrap(),
            duration_minutes: 0,
        };
        assert!(matches!(
            c.issue_command(zero_minutes).await,
            Err(CommandError::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_temp_basal_dropped_before_next_command() {
        let clock = ManualClock::new(start());
        let c = coordinator(clock.clone());
        c.initialize().unwrap();
        activate(&c).await;
        c.issue_command(PodCommand::SetTempBasal {
            rate: InsulinRate::from_units_per_hour(2.0).unwrap(),
            duration_minutes: 30,
        })
        .await
        .unwrap();
        assert!(c.snapshot().is_temp_basal_running());
        clock.advance_minutes(31);
        assert!(!c.snapshot().is_temp_basal_running());
        assert!(c.reconcile_temp_basal().unwrap());
        assert!(!c.reconcile_temp_basal().unwrap());
    }

    #[tokio::test]
    async fn test_suspend_clears_temp_basal() {
        let c = coordinator(ManualClock::new(start()));
        c.initialize().unwrap();
        activate(&c).await;
        c.issue_command(PodCommand::SetTempBasal {
            rate: InsulinRate::from_units_per_hour(0.5).unwrap(),
            duration_minutes: 120,
        })
        .await
        .unwrap();
        c.issue_command(PodCommand::SuspendDelivery).await.unwrap();
        let snap = c.snapshot();
        assert_eq!(snap.lifecycle, PodLifecycleState::Suspended);
        assert!(!snap.is_temp_basal_running());
    }

    #[tokio::test]
    async fn test_discard_requires_retired_pod() {
        let c = coordinator(ManualClock::new(start()));
        c.initialize().unwrap();
        activate(&c).await;
        assert!(matches!(
            c.discard_pod(),
            Err(SessionError::CannotDiscard(PodLifecycleState::Active))
        ));
        c.issue_command(PodCommand::Deactivate).await.unwrap();
        c.discard_pod().unwrap();
        assert_eq!(c.lifecycle_state(), PodLifecycleState::NeverContacted);
        assert!(matches!(
            c.history(1)[0].kind,
            HistoryEntryKind::PodDiscarded {
                previous: PodLifecycleState::Deactivated
            }
        ));
    }

    #[tokio::test]
    async fn test_end_session_persists_clean_shutdown() {
        let store = InMemoryPersistence::new();
        let ports = SessionPorts::new(Arc::new(Echo))
            .with_clock(Arc::new(ManualClock::new(start())))
            .with_persistence(Arc::new(store.clone()));
        let c = SessionCoordinator::new(SessionConfig::default(), ports).unwrap();
        c.initialize().unwrap();
        c.end_session().unwrap();
        assert_eq!(c.driver_state(), DriverState::SessionEnded);
        let blob = PersistedSession::decode(&store.load().unwrap().unwrap()).unwrap();
        assert!(blob.ended_cleanly());
        assert!(matches!(
            c.issue_command(PodCommand::Discover).await,
            Err(CommandError::DriverNotReady(DriverState::SessionEnded))
        ));
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let config = SessionConfig {
            command_timeout_ms: 0,
            ..SessionConfig::default()
        };
        let ports = SessionPorts::new(Arc::new(Echo));
        assert!(matches!(
            SessionCoordinator::new(config, ports),
            Err(SessionError::Config(_))
        ));
    }
}
