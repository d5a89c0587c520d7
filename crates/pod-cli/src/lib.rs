//! # pod-cli — Pod Session Command-Line Interface
//!
//! `podctl` drives the session coordinator from a terminal. Useful for
//! demonstrating the command pipeline end to end and for inspecting state
//! files left behind by a host application.
//!
//! ## Subcommands
//!
//! - `simulate` — Run a scripted session against an in-process simulated pod
//! - `status` — Print the snapshot of a persisted session
//!
//! ## Crate Policy
//!
//! - Argument parsing is separated from the handlers.
//! - Handlers delegate to `pod-session`; no session logic lives here.
//! - Output is JSON so it can be piped into other tools.

pub mod output;
pub mod sim;
pub mod simulate;
pub mod status;
