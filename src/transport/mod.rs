//! Intake and publish adapters
//!
//! The line core only sees two seams:
//! - [`OrderSource`]: where machine orders come from
//! - [`ReportSink`]: where finished reports go
//!
//! Implementations:
//! - [`bus`]: in-process fanout exchanges (embedding, tests)
//! - [`stdio`]: orders on stdin, reports on stdout
//! - [`tcp`]: line-protocol client for a fanout message broker

pub mod bus;
pub mod stdio;
pub mod tcp;

use async_trait::async_trait;
use thiserror::Error;

use crate::codec::CodecError;
use crate::types::{MachineOrder, Report};

pub use bus::{BusOrderSource, BusReportSink, MessageBus};
pub use stdio::{StdinOrderSource, StdoutReportSink};
pub use tcp::{BrokerClient, TcpOrderSource, TcpReportSink};

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout waiting for broker")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Malformed message: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Connection-level failures are worth a reconnect; malformed input is not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionFailed(_)
                | TransportError::Timeout
                | TransportError::ConnectionClosed
                | TransportError::Io(_)
        )
    }
}

/// Events produced by an order source.
#[derive(Debug)]
pub enum OrderEvent {
    /// A well-formed machine order was received.
    Order(MachineOrder),
    /// The source is exhausted (EOF, exchange closed).
    Eof,
}

/// Trait abstracting where machine orders come from.
///
/// Implementations decode the wire format themselves and skip malformed
/// messages with a warning. The intake loop calls [`next_order`] in a
/// `select!` with cancellation.
///
/// [`next_order`]: OrderSource::next_order
#[async_trait]
pub trait OrderSource: Send + 'static {
    /// Wait for the next order.
    ///
    /// Returns `Err` only when the source cannot continue (e.g. reconnect
    /// budget exhausted).
    async fn next_order(&mut self) -> Result<OrderEvent, TransportError>;

    /// Human-readable name for logging (e.g. "stdin", "bus", "broker").
    fn source_name(&self) -> &str;
}

/// Trait abstracting where finished reports are published.
#[async_trait]
pub trait ReportSink: Send + Sync + 'static {
    /// Publish one report. No acknowledgement is expected; a returned error
    /// means the report is lost.
    async fn publish(&self, report: &Report) -> Result<(), TransportError>;

    fn sink_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(TransportError::Timeout.is_recoverable());
        assert!(TransportError::ConnectionClosed.is_recoverable());
        assert!(TransportError::ConnectionFailed("refused".into()).is_recoverable());
        assert!(!TransportError::Protocol("bad verb".into()).is_recoverable());
        assert!(!TransportError::Codec(CodecError::Empty).is_recoverable());
    }
}
