//! # pod-core — Foundational Types for the Pod Session Stack
//!
//! Leaf crate of the workspace. Defines the primitives every other crate
//! passes around: timestamps, pod identifiers, fault codes, and insulin
//! quantities. It depends on no other `pod-*` crate.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for device identifiers.** `LotNumber`, `PodAddress`,
//!    `FaultCode`, `SessionId`. You cannot pass a lot number where a radio
//!    address is expected.
//!
//! 2. **Exact insulin arithmetic.** `InsulinRate` and `InsulinUnits` store
//!    hundredths of a unit as integers. Two rates that print the same compare
//!    equal; there is no float drift between what was requested and what is
//!    recorded.
//!
//! 3. **UTC-only timestamps.** `Timestamp` is UTC with seconds precision,
//!    the resolution the pod itself reports.
//!
//! ## Crate Policy
//!
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.
//! - All public types derive `Debug`, `Clone`, and implement `Serialize`/`Deserialize`.

pub mod error;
pub mod identity;
pub mod temporal;
pub mod units;

pub use error::PodError;
pub use identity::{FaultCode, LotNumber, PodAddress, PodInfo, SessionId};
pub use temporal::Timestamp;
pub use units::{InsulinRate, InsulinUnits};
