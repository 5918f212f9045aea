//! Intake loop - feeds orders from an [`OrderSource`] into the line
//!
//! Runs until the source is exhausted, fails for good, or the cancellation
//! token fires. Decoding and reconnecting are the source's business; the loop
//! only forwards well-formed orders to [`LineController::received_order`].

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::line::{LineController, LineStats};
use crate::transport::{OrderEvent, OrderSource};

const BANNER_RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// Why the intake loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeEnd {
    /// Source reported end of stream.
    Eof,
    /// Cancellation token fired.
    Cancelled,
    /// Source failed and cannot continue.
    SourceError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeSummary {
    pub orders_forwarded: u64,
    pub end: IntakeEnd,
}

pub struct IntakeLoop {
    line: LineController,
    cancel_token: CancellationToken,
}

impl IntakeLoop {
    pub fn new(line: LineController, cancel_token: CancellationToken) -> Self {
        Self { line, cancel_token }
    }

    pub async fn run<S: OrderSource + ?Sized>(self, source: &mut S) -> IntakeSummary {
        let mut orders_forwarded = 0u64;
        info!("📥 Receiving machine orders from {}...", source.source_name());

        let end = loop {
            let event = tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("[Intake] Shutdown signal received");
                    break IntakeEnd::Cancelled;
                }
                result = source.next_order() => {
                    match result {
                        Ok(ev) => ev,
                        Err(e) => {
                            warn!("[Intake] Source error: {}", e);
                            break IntakeEnd::SourceError(e.to_string());
                        }
                    }
                }
            };

            match event {
                OrderEvent::Order(order) => {
                    orders_forwarded += 1;
                    info!(order_id = %order.id, "Received machine order");
                    self.line.received_order(order);
                }
                OrderEvent::Eof => {
                    info!("[Intake] Source reached end ({} orders received)", orders_forwarded);
                    break IntakeEnd::Eof;
                }
            }
        };

        IntakeSummary {
            orders_forwarded,
            end,
        }
    }
}

/// Log the end-of-run statistics block.
pub fn log_final_stats(stats: &LineStats) {
    info!("");
    info!("{}", BANNER_RULE);
    info!("📊 FINAL STATISTICS");
    info!("{}", BANNER_RULE);
    info!("   Orders Received:      {}", stats.orders_received);
    info!("   Orders Started:       {}", stats.orders_admitted);
    info!("   Orders Completed:     {}", stats.orders_completed);
    info!("   Orders Abandoned:     {}", stats.orders_abandoned);
    info!("   Reports Published:    {}", stats.reports_published);
    info!("   Publish Failures:     {}", stats.publish_failures);
    info!("   Still Queued:         {}", stats.queue_depth);
    info!("   Gate:                 {}", stats.gate);
    info!("{}", BANNER_RULE);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageTiming;
    use crate::line::StageSchedule;
    use crate::transport::{ReportSink, TransportError};
    use crate::types::{MachineOrder, Report};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Arc;

    struct ScriptedSource {
        events: VecDeque<Result<OrderEvent, TransportError>>,
    }

    #[async_trait]
    impl OrderSource for ScriptedSource {
        async fn next_order(&mut self) -> Result<OrderEvent, TransportError> {
            match self.events.pop_front() {
                Some(ev) => ev,
                None => std::future::pending().await,
            }
        }

        fn source_name(&self) -> &str {
            "scripted"
        }
    }

    struct NullSink;

    #[async_trait]
    impl ReportSink for NullSink {
        async fn publish(&self, _report: &Report) -> Result<(), TransportError> {
            Ok(())
        }

        fn sink_name(&self) -> &str {
            "null"
        }
    }

    fn line() -> LineController {
        LineController::with_schedule(
            StageSchedule::new([StageTiming::new(5.0, 0.0); 4], 1.0),
            Arc::new(NullSink),
        )
    }

    fn order(id: &str) -> Result<OrderEvent, TransportError> {
        Ok(OrderEvent::Order(MachineOrder::new(id)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwards_until_eof() {
        let line = line();
        let mut source = ScriptedSource {
            events: VecDeque::from(vec![order("A"), order("B"), Ok(OrderEvent::Eof), order("never")]),
        };

        let summary = IntakeLoop::new(line.clone(), CancellationToken::new())
            .run(&mut source)
            .await;

        assert_eq!(summary.orders_forwarded, 2);
        assert_eq!(summary.end, IntakeEnd::Eof);
        assert_eq!(line.stats().orders_received, 2);
        line.wait_idle().await;
        assert_eq!(line.stats().reports_published, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_source_error() {
        let line = line();
        let mut source = ScriptedSource {
            events: VecDeque::from(vec![order("A"), Err(TransportError::ConnectionClosed)]),
        };

        let summary = IntakeLoop::new(line, CancellationToken::new())
            .run(&mut source)
            .await;
        assert_eq!(summary.orders_forwarded, 1);
        assert!(matches!(summary.end, IntakeEnd::SourceError(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_waiting_source() {
        let cancel = CancellationToken::new();
        let mut source = ScriptedSource {
            events: VecDeque::new(),
        };
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let summary = IntakeLoop::new(line(), cancel).run(&mut source).await;
        assert_eq!(summary.end, IntakeEnd::Cancelled);
        assert_eq!(summary.orders_forwarded, 0);
    }
}
