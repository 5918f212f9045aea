//! Assembly Line Simulator
//!
//! Simulates a four-station production line. Machine orders arrive from an
//! external source, enter the line one at a time through a single-slot
//! admission gate, cross four light barriers with randomised stage times and
//! leave as a manufacturing report published to an external sink.
//!
//! ## Architecture
//!
//! - **Line**: order queue, admission gate, per-order pipeline runners
//! - **Codec**: single-line XML for orders and reports
//! - **Transport**: in-process bus, stdio and TCP broker adapters
//! - **Intake**: pumps an order source into the line

pub mod codec;
pub mod config;
pub mod intake;
pub mod line;
pub mod transport;
pub mod types;

// Re-export configuration
pub use config::{ConfigError, LineConfig};

// Re-export the line core
pub use line::{GateState, LineController, LineStats, RunOutcome, RunTicket};

// Re-export commonly used types
pub use types::{MachineOrder, OrderId, Report, ReportError, LIGHT_BARRIER_COUNT};

// Re-export transport seams
pub use transport::{OrderEvent, OrderSource, ReportSink, TransportError};
