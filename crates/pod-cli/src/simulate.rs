//! # Simulate Subcommand
//!
//! Runs a scripted session against [`SimulatedPod`] and prints every
//! published event followed by the final status snapshot, one JSON
//! document per line.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, ValueEnum};

use pod_core::{FaultCode, InsulinRate, InsulinUnits};
use pod_session::{
    AlertSlot, AlertType, EventBus, FilePersistence, PodCommand, SessionConfig,
    SessionCoordinator, SessionPorts,
};

use crate::output;
use crate::sim::{SimReply, SimulatedPod};

/// Upper bound on the command timeout for the `timeout` scenario.
const TIMEOUT_SCENARIO_MS: u64 = 500;

/// Scripted session to run.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Pair, prime, set a temp basal, and bolus.
    Activate,
    /// Raise and clear a low reservoir alert.
    Alerts,
    /// A status query that never gets an answer, then one that does.
    Timeout,
    /// Pod faults; deactivate and discard it.
    Fault,
}

/// Arguments for the simulate subcommand.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Scenario to run.
    #[arg(long, value_enum)]
    pub scenario: Scenario,

    /// YAML session configuration. Defaults come from `POD_*` variables.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Persist the session to this file instead of memory.
    #[arg(long)]
    pub state_file: Option<PathBuf>,
}

/// Load a session configuration from YAML, or from the environment.
pub fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SessionConfig> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let config: SessionConfig = serde_yaml::from_str(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?;
            config.validate()?;
            config
        }
        None => SessionConfig::from_env()?,
    };
    Ok(config)
}

/// Run the subcommand, writing JSON lines to stdout.
pub async fn run(args: &SimulateArgs) -> anyhow::Result<()> {
    let lines = run_scenario(args).await?;
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

/// Run the scenario and return the JSON lines it would print.
pub async fn run_scenario(args: &SimulateArgs) -> anyhow::Result<Vec<String>> {
    let mut config = load_config(args.config.as_ref())?;
    if args.scenario == Scenario::Timeout {
        config.command_timeout_ms = config.command_timeout_ms.min(TIMEOUT_SCENARIO_MS);
    }

    let pod = Arc::new(SimulatedPod::demo()?);
    let bus = Arc::new(EventBus::new());
    let mut events = bus.subscribe();
    let mut ports = SessionPorts::new(pod.clone()).with_events(bus.clone());
    if let Some(path) = &args.state_file {
        ports = ports.with_persistence(Arc::new(FilePersistence::new(path.clone())));
    }
    let coordinator = SessionCoordinator::new(config, ports)?;
    coordinator.initialize()?;
    tracing::info!(scenario = ?args.scenario, session = %coordinator.session_id(), "running scenario");

    match args.scenario {
        Scenario::Activate => {
            activate(&coordinator).await?;
            coordinator
                .issue_command(PodCommand::SetTempBasal {
                    rate: InsulinRate::from_units_per_hour(1.0)?,
                    duration_minutes: 30,
                })
                .await?;
            coordinator
                .issue_command(PodCommand::Bolus {
                    units: InsulinUnits::from_units(1.5)?,
                    automatic: false,
                })
                .await?;
        }
        Scenario::Alerts => {
            activate(&coordinator).await?;
            let slot = AlertSlot::new(3)?;
            coordinator
                .issue_command(PodCommand::ConfigureAlerts {
                    alerts: vec![(slot, AlertType::LowReservoirAlert)],
                })
                .await?;
            pod.script(SimReply::Alerts([slot].into_iter().collect()));
            coordinator.issue_command(PodCommand::GetStatus).await?;
            pod.script(SimReply::Alerts(pod_session::AlertSet::EMPTY));
            coordinator.issue_command(PodCommand::GetStatus).await?;
        }
        Scenario::Timeout => {
            activate(&coordinator).await?;
            pod.script(SimReply::Hang);
            if let Err(e) = coordinator.issue_command(PodCommand::GetStatus).await {
                tracing::warn!(error = %e, "status query failed as scripted");
            }
            coordinator.issue_command(PodCommand::GetStatus).await?;
        }
        Scenario::Fault => {
            activate(&coordinator).await?;
            pod.script(SimReply::Fault(FaultCode::new(0x31)?));
            if let Err(e) = coordinator.issue_command(PodCommand::GetStatus).await {
                tracing::warn!(error = %e, "pod faulted as scripted");
            }
            coordinator.issue_command(PodCommand::Deactivate).await?;
            coordinator.discard_pod()?;
        }
    }

    let snapshot = coordinator.snapshot();
    coordinator.end_session()?;

    let mut lines = Vec::new();
    while let Ok(event) = events.try_recv() {
        lines.push(serde_json::to_string(&output::event_json(&event))?);
    }
    lines.push(serde_json::to_string(&serde_json::json!({ "snapshot": snapshot }))?);
    Ok(lines)
}

async fn activate(coordinator: &SessionCoordinator) -> anyhow::Result<()> {
    for command in [
        PodCommand::Discover,
        PodCommand::StartPairing,
        PodCommand::CompletePairing,
        PodCommand::Prime,
    ] {
        coordinator.issue_command(command).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(scenario: Scenario) -> SimulateArgs {
        SimulateArgs {
            scenario,
            config: None,
            state_file: None,
        }
    }

    fn snapshot_of(lines: &[String]) -> serde_json::Value {
        let last: serde_json::Value = serde_json::from_str(lines.last().unwrap()).unwrap();
        last["snapshot"].clone()
    }

    #[tokio::test]
    async fn test_activate_scenario_ends_active_with_temp_basal() {
        let lines = run_scenario(&args(Scenario::Activate)).await.unwrap();
        let snap = snapshot_of(&lines);
        assert_eq!(snap["lifecycle"], "Active");
        assert!(snap["temp_basal"].is_object());
        assert!(snap["last_bolus"].is_object());
    }

    #[tokio::test]
    async fn test_alerts_scenario_publishes_raise_and_clear() {
        let lines = run_scenario(&args(Scenario::Alerts)).await.unwrap();
        assert!(lines.iter().any(|l| l.contains("\"ALERT_RAISED\"")));
        assert!(lines.iter().any(|l| l.contains("\"ALERT_CLEARED\"")));
        assert_eq!(snapshot_of(&lines)["lifecycle"], "Active");
    }

    #[tokio::test]
    async fn test_timeout_scenario_recovers() {
        let lines = run_scenario(&args(Scenario::Timeout)).await.unwrap();
        assert!(lines.iter().any(|l| l.contains("no reply from pod")));
        let snap = snapshot_of(&lines);
        assert_eq!(snap["lifecycle"], "Active");
        assert_eq!(snap["state_uncertain"], false);
    }

    #[tokio::test]
    async fn test_fault_scenario_discards_pod() {
        let lines = run_scenario(&args(Scenario::Fault)).await.unwrap();
        assert!(lines.iter().any(|l| l.contains("\"Faulted\"")));
        assert_eq!(snapshot_of(&lines)["lifecycle"], "NeverContacted");
    }

    #[tokio::test]
    async fn test_state_file_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pod.json");
        let args = SimulateArgs {
            scenario: Scenario::Activate,
            config: None,
            state_file: Some(path.clone()),
        };
        run_scenario(&args).await.unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"SessionEnded\""));
    }

    #[test]
    fn test_load_config_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.yaml");
        std::fs::write(&path, "command_timeout_ms: 1500\nbeeps:\n  smb: false\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.command_timeout_ms, 1500);
        assert!(!config.beeps.smb);
    }

    #[test]
    fn test_load_config_rejects_invalid_yaml_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.yaml");
        std::fs::write(&path, "command_timeout_ms: 0\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
