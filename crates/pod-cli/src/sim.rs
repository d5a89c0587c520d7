//! # Simulated Pod
//!
//! In-process [`PodTransport`] that answers like a healthy pod unless a
//! reply has been scripted for the next send. Reservoir and battery drift
//! down a little with every command so snapshots show movement.

use std::collections::VecDeque;

use parking_lot::Mutex;

use pod_core::{FaultCode, LotNumber, PodAddress, PodInfo};
use pod_session::{
    AlertSet, CommandKind, CommandRequest, PodResponse, PodTransport, TransportError,
};

const START_RESERVOIR_UNITS: f64 = 200.0;
const UNITS_PER_COMMAND: f64 = 0.05;

/// A scripted reply for one send.
#[derive(Debug, Clone, PartialEq)]
pub enum SimReply {
    /// Report this full active alert set.
    Alerts(AlertSet),
    /// Report a hard fault.
    Fault(FaultCode),
    /// Fail in transport.
    Error(TransportError),
    /// Never answer.
    Hang,
}

#[derive(Debug)]
struct SimState {
    script: VecDeque<SimReply>,
    alerts: AlertSet,
    reservoir_units: f64,
    battery_percent: u8,
    sent: Vec<CommandKind>,
}

/// The simulated pod.
#[derive(Debug)]
pub struct SimulatedPod {
    info: PodInfo,
    state: Mutex<SimState>,
}

impl SimulatedPod {
    pub fn new(info: PodInfo) -> Self {
        Self {
            info,
            state: Mutex::new(SimState {
                script: VecDeque::new(),
                alerts: AlertSet::EMPTY,
                reservoir_units: START_RESERVOIR_UNITS,
                battery_percent: 100,
                sent: Vec::new(),
            }),
        }
    }

    /// A pod with a fixed demo identity.
    pub fn demo() -> anyhow::Result<Self> {
        Ok(Self::new(PodInfo {
            lot: LotNumber(44_223),
            tid: 1_180_771,
            address: PodAddress::new(0x1F01_4820)?,
        }))
    }

    /// Queue a reply for a future send, after any already queued.
    pub fn script(&self, reply: SimReply) {
        self.state.lock().script.push_back(reply);
    }

    /// Commands received so far.
    pub fn sent(&self) -> Vec<CommandKind> {
        self.state.lock().sent.clone()
    }
}

#[async_trait::async_trait]
impl PodTransport for SimulatedPod {
    async fn send(&self, request: &CommandRequest) -> Result<PodResponse, TransportError> {
        let kind = request.command.kind();
        let scripted = {
            let mut st = self.state.lock();
            st.sent.push(kind);
            st.script.pop_front()
        };
        tracing::debug!(command = %kind, sequence = request.sequence, scripted = ?scripted, "simulated pod received command");

        let response = {
            let mut st = self.state.lock();
            let base = match scripted {
                Some(SimReply::Hang) => None,
                Some(SimReply::Error(e)) => return Err(e),
                Some(SimReply::Fault(code)) => Some(PodResponse::ack().with_fault(code)),
                Some(SimReply::Alerts(alerts)) => {
                    st.alerts = alerts;
                    Some(PodResponse::ack())
                }
                None => Some(PodResponse::ack()),
            };
            base.map(|response| {
                st.reservoir_units = (st.reservoir_units - UNITS_PER_COMMAND).max(0.0);
                st.battery_percent = st.battery_percent.saturating_sub(1);
                let mut response = response
                    .with_alerts(st.alerts)
                    .with_reservoir(st.reservoir_units)
                    .with_battery(st.battery_percent);
                if kind == CommandKind::Discover {
                    response = response.with_pod_info(self.info);
                }
                response
            })
        };

        match response {
            Some(response) => Ok(response),
            None => {
                std::future::pending::<()>().await;
                Err(TransportError::NoResponse)
            }
        }
    }
}
