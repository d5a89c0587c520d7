//! # Status Subcommand
//!
//! Loads a persisted session and prints its snapshot. The session is
//! opened with an offline transport, so no command can reach a pod and
//! the state file is never written.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;

use pod_session::{
    CommandRequest, FilePersistence, PodResponse, PodTransport, PumpStatusSnapshot,
    SessionConfig, SessionCoordinator, SessionPorts, TransportError,
};

/// Arguments for the status subcommand.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Session state file written by a previous run.
    #[arg(long)]
    pub state_file: PathBuf,
}

struct OfflineTransport;

#[async_trait::async_trait]
impl PodTransport for OfflineTransport {
    async fn send(&self, _request: &CommandRequest) -> Result<PodResponse, TransportError> {
        Err(TransportError::LinkUnavailable("status inspection is offline".to_string()))
    }
}

/// Restore the session in `args.state_file` and return its snapshot.
pub fn load_snapshot(args: &StatusArgs) -> anyhow::Result<PumpStatusSnapshot> {
    if !args.state_file.exists() {
        anyhow::bail!("state file {} does not exist", args.state_file.display());
    }
    let ports = SessionPorts::new(Arc::new(OfflineTransport))
        .with_persistence(Arc::new(FilePersistence::new(args.state_file.clone())));
    let coordinator = SessionCoordinator::new(SessionConfig::default(), ports)?;
    coordinator
        .initialize()
        .with_context(|| format!("restoring session from {}", args.state_file.display()))?;
    Ok(coordinator.snapshot())
}

/// Run the subcommand, printing the snapshot as pretty JSON.
pub fn run(args: &StatusArgs) -> anyhow::Result<()> {
    let snapshot = load_snapshot(args)?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
