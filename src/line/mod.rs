//! Assembly line core
//!
//! - [`queue`]: FIFO of orders waiting for admission
//! - [`gate`]: single-slot admission gate in front of the line
//! - [`stages`]: light barrier sequence and wait sampling
//! - [`runner`]: per-order task walking the four barriers
//! - [`controller`]: glues the above together and publishes reports

pub mod controller;
pub mod gate;
pub mod queue;
pub mod runner;
pub mod stages;

pub use controller::{LineController, LineStats};
pub use gate::{AdmissionGate, GateState};
pub use queue::OrderQueue;
pub use runner::{PipelineRunner, RunOutcome, RunTicket, RunnerHooks};
pub use stages::{Stage, StageSchedule};
