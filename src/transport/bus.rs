//! In-process fanout exchanges
//!
//! A [`MessageBus`] behaves like a set of fanout exchanges: every subscriber
//! bound to an exchange at publish time receives its own copy, messages
//! published with nobody bound are dropped. Payloads are the same XML strings
//! that go over the wire, so bus-connected lines exercise the codec too.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{OrderEvent, OrderSource, ReportSink, TransportError};
use crate::codec;
use crate::config::defaults::BUS_CHANNEL_CAPACITY;
use crate::types::{MachineOrder, Report};

#[derive(Clone)]
pub struct MessageBus {
    exchanges: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
    capacity: usize,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_capacity(BUS_CHANNEL_CAPACITY)
    }

    /// Per-subscriber buffer size. Slow subscribers lose the oldest messages.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            exchanges: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<String>>> {
        self.exchanges.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Declare (if needed) and bind a new subscriber to `exchange`.
    pub fn subscribe(&self, exchange: &str) -> broadcast::Receiver<String> {
        let capacity = self.capacity;
        self.lock()
            .entry(exchange.to_string())
            .or_insert_with(|| broadcast::channel(capacity).0)
            .subscribe()
    }

    /// Fan `payload` out to all current subscribers. Returns how many got it.
    pub fn publish(&self, exchange: &str, payload: String) -> usize {
        let sender = self.lock().get(exchange).cloned();
        match sender.map(|tx| tx.send(payload)) {
            Some(Ok(delivered)) => delivered,
            _ => {
                debug!(exchange, "No subscribers, message dropped");
                0
            }
        }
    }

    /// Delete an exchange. Its subscribers see end-of-stream once drained.
    pub fn close(&self, exchange: &str) {
        self.lock().remove(exchange);
    }

    pub fn subscriber_count(&self, exchange: &str) -> usize {
        self.lock()
            .get(exchange)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

// ============================================================================
// Adapters
// ============================================================================

/// Orders consumed from a bus exchange.
pub struct BusOrderSource {
    exchange: String,
    rx: broadcast::Receiver<String>,
}

impl BusOrderSource {
    /// Binds immediately, so orders published after this call are not missed.
    pub fn new(bus: &MessageBus, exchange: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            rx: bus.subscribe(exchange),
        }
    }
}

#[async_trait]
impl OrderSource for BusOrderSource {
    async fn next_order(&mut self) -> Result<OrderEvent, TransportError> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => match codec::decode_order(&payload) {
                    Ok(order) => return Ok(OrderEvent::Order(order)),
                    Err(e) => {
                        warn!(exchange = %self.exchange, error = %e, "Skipping malformed order");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(exchange = %self.exchange, missed, "Order subscriber lagged, orders lost");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(OrderEvent::Eof),
            }
        }
    }

    fn source_name(&self) -> &str {
        "bus"
    }
}

/// Reports published to a bus exchange.
pub struct BusReportSink {
    bus: MessageBus,
    exchange: String,
}

impl BusReportSink {
    pub fn new(bus: &MessageBus, exchange: &str) -> Self {
        Self {
            bus: bus.clone(),
            exchange: exchange.to_string(),
        }
    }
}

#[async_trait]
impl ReportSink for BusReportSink {
    async fn publish(&self, report: &Report) -> Result<(), TransportError> {
        let payload = codec::encode_report(report)?;
        self.bus.publish(&self.exchange, payload);
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "bus"
    }
}

/// Publish an order onto `exchange` in wire format.
pub fn publish_order(bus: &MessageBus, exchange: &str, order: &MachineOrder) -> Result<usize, TransportError> {
    Ok(bus.publish(exchange, codec::encode_order(order)?))
}
