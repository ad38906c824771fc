//! Delivery-integrity harness: workload planning, emission through a
//! channel under test, arrival recording and verification.
//!
//! Leaves first: [`payload`] and [`planner`] build the workload,
//! [`emitter`] publishes it, [`recorder`] captures what the channel
//! delivered, [`verify`] diffs the two. [`run`] wires one complete run.

pub mod emitter;
pub mod error;
pub mod payload;
pub mod planner;
pub mod recorder;
pub mod run;
pub mod stats;
pub mod verify;

pub use emitter::{EmissionConfig, EmissionController, EmissionRecord, EmissionReport, PublishFailure};
pub use error::HarnessError;
pub use planner::{Manifest, ManifestEntry, MessageDescriptor, Rng, plan};
pub use recorder::{ArrivalRecord, ArrivalRecorder, spawn_arrival_task};
pub use run::{Harness, RunLimits, RunOutcome, RunRequest, RunSettings};
pub use stats::LatencyStats;
pub use verify::{ContentMismatch, VerificationResult, verify};
