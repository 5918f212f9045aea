//! Broker client over TCP
//!
//! Speaks a minimal line protocol to a fanout message broker. Every frame is
//! one `\n`-terminated UTF-8 line:
//!
//! ```text
//! client → broker   SUBSCRIBE <exchange>
//! client → broker   PUBLISH <exchange> <payload>
//! broker → client   MESSAGE <exchange> <payload>
//! ```
//!
//! Payloads are the single-line XML documents produced by [`crate::codec`].
//! The client survives broker restarts: connection loss triggers reconnect
//! with exponential backoff, after which all subscriptions are re-sent.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{OrderEvent, OrderSource, ReportSink, TransportError};
use crate::codec;
use crate::config::defaults::{INITIAL_RECONNECT_DELAY_SECS, MAX_RECONNECT_DELAY_SECS};
use crate::config::{parse_host_port, TransportConfig};
use crate::types::Report;

/// One frame received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub exchange: String,
    pub payload: String,
}

/// Parse a `MESSAGE <exchange> <payload>` line.
pub fn parse_message_line(line: &str) -> Result<BrokerMessage, TransportError> {
    let rest = line
        .strip_prefix("MESSAGE ")
        .ok_or_else(|| TransportError::Protocol(format!("unexpected frame: {line}")))?;
    let (exchange, payload) = rest
        .split_once(' ')
        .ok_or_else(|| TransportError::Protocol(format!("frame without payload: {line}")))?;
    if exchange.is_empty() {
        return Err(TransportError::Protocol("empty exchange name".to_string()));
    }
    Ok(BrokerMessage {
        exchange: exchange.to_string(),
        payload: payload.to_string(),
    })
}

fn check_frame_part(part: &str, what: &str) -> Result<(), TransportError> {
    if part.contains('\n') || part.contains('\r') {
        return Err(TransportError::Protocol(format!("{what} contains a line break")));
    }
    Ok(())
}

/// Connection health counters
#[derive(Debug, Clone, Default)]
pub struct BrokerClientStats {
    pub connected: bool,
    pub messages_received: u64,
    pub messages_published: u64,
    pub reconnections: u64,
}

/// Line-protocol broker client with reconnection.
pub struct BrokerClient {
    addr: String,
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Option<OwnedWriteHalf>,
    line_buffer: String,
    /// Exchanges to re-subscribe after a reconnect
    subscriptions: Vec<String>,
    connect_timeout: Duration,
    max_reconnect_attempts: u32,
    initial_reconnect_delay: Duration,
    max_reconnect_delay: Duration,
    stats: BrokerClientStats,
}

impl BrokerClient {
    /// Create a client for `HOST:PORT`. Does not connect yet.
    pub fn new(addr: &str) -> Result<Self, TransportError> {
        if parse_host_port(addr).is_none() {
            return Err(TransportError::ConnectionFailed(format!(
                "invalid broker address '{addr}', expected HOST:PORT"
            )));
        }
        Ok(Self {
            addr: addr.to_string(),
            reader: None,
            writer: None,
            line_buffer: String::with_capacity(512),
            subscriptions: Vec::new(),
            connect_timeout: Duration::from_secs(crate::config::defaults::CONNECT_TIMEOUT_SECS),
            max_reconnect_attempts: crate::config::defaults::MAX_RECONNECT_ATTEMPTS,
            initial_reconnect_delay: Duration::from_secs(INITIAL_RECONNECT_DELAY_SECS),
            max_reconnect_delay: Duration::from_secs(MAX_RECONNECT_DELAY_SECS),
            stats: BrokerClientStats::default(),
        })
    }

    pub fn from_config(config: &TransportConfig) -> Result<Self, TransportError> {
        Ok(Self::new(&config.host)?
            .with_connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .with_max_reconnect_attempts(config.max_reconnect_attempts))
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// First delay and cap of the reconnect backoff. Default is 2s doubling up to 60s.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_reconnect_delay = initial;
        self.max_reconnect_delay = max;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    pub fn stats(&self) -> BrokerClientStats {
        BrokerClientStats {
            connected: self.is_connected(),
            ..self.stats.clone()
        }
    }

    /// Connect with timeout and re-send all known subscriptions.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if self.is_connected() {
            return Ok(());
        }

        info!(address = %self.addr, "Connecting to message broker");
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        // Keepalive detects a broker that vanished without closing the socket
        let sock_ref = socket2::SockRef::from(&stream);
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(Duration::from_secs(30))
            .with_interval(Duration::from_secs(10));
        let _ = sock_ref.set_tcp_keepalive(&keepalive);
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();
        self.reader = Some(BufReader::new(read_half));
        self.writer = Some(write_half);

        let subscriptions = self.subscriptions.clone();
        for exchange in &subscriptions {
            if let Err(e) = self.send_frame(&format!("SUBSCRIBE {exchange}")).await {
                self.drop_connection();
                return Err(e);
            }
        }

        info!(address = %self.addr, subscriptions = subscriptions.len(), "Broker connection established");
        Ok(())
    }

    fn drop_connection(&mut self) {
        self.reader = None;
        self.writer = None;
    }

    pub async fn disconnect(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        self.reader = None;
        info!(address = %self.addr, "Broker connection closed");
    }

    /// Reconnect with exponential backoff.
    ///
    /// Returns Ok(()) when reconnected, Err if max attempts exhausted.
    pub async fn reconnect(&mut self) -> Result<(), TransportError> {
        self.disconnect().await;

        for attempt in 1..=self.max_reconnect_attempts {
            let delay = self
                .initial_reconnect_delay
                .saturating_mul(2u32.saturating_pow(attempt - 1))
                .min(self.max_reconnect_delay);

            warn!(
                attempt = attempt,
                max_attempts = self.max_reconnect_attempts,
                delay_ms = delay.as_millis() as u64,
                "Broker reconnecting after failure"
            );
            tokio::time::sleep(delay).await;

            match self.connect().await {
                Ok(()) => {
                    self.stats.reconnections += 1;
                    info!(
                        attempt = attempt,
                        total_reconnections = self.stats.reconnections,
                        "Broker reconnection successful"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt = attempt, error = %e, "Reconnection attempt failed");
                }
            }
        }

        error!(
            max_attempts = self.max_reconnect_attempts,
            "Broker reconnection exhausted, all attempts failed"
        );
        Err(TransportError::ConnectionFailed(format!(
            "Failed to reconnect after {} attempts",
            self.max_reconnect_attempts
        )))
    }

    async fn send_frame(&mut self, frame: &str) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::ConnectionClosed)?;
        let mut line = String::with_capacity(frame.len() + 1);
        line.push_str(frame);
        line.push('\n');
        let result = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            self.drop_connection();
            return Err(e.into());
        }
        Ok(())
    }

    /// Bind to `exchange`. Remembered across reconnects.
    pub async fn subscribe(&mut self, exchange: &str) -> Result<(), TransportError> {
        check_frame_part(exchange, "exchange name")?;
        if exchange.is_empty() || exchange.contains(' ') {
            return Err(TransportError::Protocol(format!("invalid exchange name '{exchange}'")));
        }
        if !self.subscriptions.iter().any(|s| s == exchange) {
            self.subscriptions.push(exchange.to_string());
        }
        if !self.is_connected() {
            return self.connect().await;
        }
        self.send_frame(&format!("SUBSCRIBE {exchange}")).await
    }

    /// Send one payload to `exchange`. Does not retry.
    pub async fn publish(&mut self, exchange: &str, payload: &str) -> Result<(), TransportError> {
        check_frame_part(exchange, "exchange name")?;
        check_frame_part(payload, "payload")?;
        if !self.is_connected() {
            self.connect().await?;
        }
        self.send_frame(&format!("PUBLISH {exchange} {payload}")).await?;
        self.stats.messages_published += 1;
        Ok(())
    }

    /// Wait for the next `MESSAGE` frame. Does not reconnect.
    ///
    /// Unknown or malformed frames are skipped with a warning.
    pub async fn read_message(&mut self) -> Result<BrokerMessage, TransportError> {
        loop {
            let reader = self.reader.as_mut().ok_or(TransportError::ConnectionClosed)?;
            self.line_buffer.clear();
            let bytes = match reader.read_line(&mut self.line_buffer).await {
                Ok(b) => b,
                Err(e) => {
                    self.drop_connection();
                    return Err(e.into());
                }
            };
            if bytes == 0 {
                self.drop_connection();
                return Err(TransportError::ConnectionClosed);
            }

            let line = self.line_buffer.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                continue;
            }
            match parse_message_line(line) {
                Ok(message) => {
                    self.stats.messages_received += 1;
                    return Ok(message);
                }
                Err(e) => warn!(error = %e, "Skipping broker frame"),
            }
        }
    }
}

// ============================================================================
// Adapters
// ============================================================================

/// Orders consumed from a broker exchange.
pub struct TcpOrderSource {
    client: BrokerClient,
    exchange: String,
}

impl TcpOrderSource {
    /// Connect and subscribe. Fails if the broker is unreachable right now.
    pub async fn connect(mut client: BrokerClient, exchange: &str) -> Result<Self, TransportError> {
        client.subscribe(exchange).await?;
        Ok(Self {
            client,
            exchange: exchange.to_string(),
        })
    }

    pub fn client(&self) -> &BrokerClient {
        &self.client
    }
}

#[async_trait]
impl OrderSource for TcpOrderSource {
    async fn next_order(&mut self) -> Result<OrderEvent, TransportError> {
        loop {
            match self.client.read_message().await {
                Ok(message) if message.exchange != self.exchange => {
                    debug!(exchange = %message.exchange, "Ignoring message from other exchange");
                }
                Ok(message) => match codec::decode_order(&message.payload) {
                    Ok(order) => return Ok(OrderEvent::Order(order)),
                    Err(e) => warn!(exchange = %self.exchange, error = %e, "Skipping malformed order"),
                },
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, "Broker connection lost, attempting reconnect");
                    // Exhausted reconnects surface as Err and end intake
                    self.client.reconnect().await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn source_name(&self) -> &str {
        "broker"
    }
}

/// Reports published to a broker exchange.
pub struct TcpReportSink {
    client: Mutex<BrokerClient>,
    exchange: String,
}

impl TcpReportSink {
    pub async fn connect(mut client: BrokerClient, exchange: &str) -> Result<Self, TransportError> {
        client.connect().await?;
        Ok(Self {
            client: Mutex::new(client),
            exchange: exchange.to_string(),
        })
    }
}

#[async_trait]
impl ReportSink for TcpReportSink {
    async fn publish(&self, report: &Report) -> Result<(), TransportError> {
        let payload = codec::encode_report(report)?;
        let mut client = self.client.lock().await;
        match client.publish(&self.exchange, &payload).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_recoverable() => {
                warn!(order_id = %report.order_id(), error = %e, "Publish failed, reconnecting");
                client.reconnect().await?;
                client.publish(&self.exchange, &payload).await
            }
            Err(e) => Err(e),
        }
    }

    fn sink_name(&self) -> &str {
        "broker"
    }
}
