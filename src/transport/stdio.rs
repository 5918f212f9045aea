//! Standard streams transport
//!
//! Orders arrive one per line on stdin (XML or JSON), reports leave one per
//! line on stdout as XML. Logs go to stderr so stdout stays machine-readable:
//! `order-feed --count 5 | assembly-line-sim --stdin > reports.xml`

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use super::{OrderEvent, OrderSource, ReportSink, TransportError};
use crate::codec;
use crate::types::Report;

/// Reads machine orders line by line from any buffered reader (stdin by default).
pub struct StdinOrderSource<R = BufReader<tokio::io::Stdin>> {
    reader: R,
    line_buffer: String,
    skipped: u64,
}

impl StdinOrderSource {
    pub fn new() -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()))
    }
}

impl Default for StdinOrderSource {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: AsyncBufRead + Unpin + Send + 'static> StdinOrderSource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader,
            line_buffer: String::with_capacity(256),
            skipped: 0,
        }
    }

    /// Lines dropped because they did not decode.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send + 'static> OrderSource for StdinOrderSource<R> {
    async fn next_order(&mut self) -> Result<OrderEvent, TransportError> {
        loop {
            self.line_buffer.clear();
            let bytes = self.reader.read_line(&mut self.line_buffer).await?;
            if bytes == 0 {
                return Ok(OrderEvent::Eof);
            }
            let line = self.line_buffer.trim();
            if line.is_empty() {
                continue;
            }
            match codec::decode_order(line) {
                Ok(order) => return Ok(OrderEvent::Order(order)),
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!("[StdinOrderSource] Failed to parse order: {}", e);
                }
            }
        }
    }

    fn source_name(&self) -> &str {
        "stdin"
    }
}

/// Writes each report as one XML line.
pub struct StdoutReportSink<W = tokio::io::Stdout> {
    writer: Mutex<W>,
}

impl StdoutReportSink {
    pub fn new() -> Self {
        Self::from_writer(tokio::io::stdout())
    }
}

impl Default for StdoutReportSink {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: AsyncWrite + Unpin + Send + 'static> StdoutReportSink<W> {
    pub fn from_writer(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> ReportSink for StdoutReportSink<W> {
    async fn publish(&self, report: &Report) -> Result<(), TransportError> {
        let mut line = codec::encode_report(report)?;
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "stdout"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderId, LIGHT_BARRIER_COUNT};

    #[tokio::test]
    async fn test_reads_xml_and_json_lines_and_skips_junk() {
        let input = "<machineOrder><id>A</id></machineOrder>\n\n{\"id\":\"B\"}\nnonsense\n";
        let mut source = StdinOrderSource::from_reader(BufReader::new(input.as_bytes()));

        let mut ids = Vec::new();
        while let OrderEvent::Order(order) = source.next_order().await.unwrap() {
            ids.push(order.id.to_string());
        }
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(source.skipped(), 1);
    }

    #[tokio::test]
    async fn test_report_written_as_single_line() {
        let mut report = Report::new(OrderId::from("A"));
        for _ in 0..LIGHT_BARRIER_COUNT {
            report.pass_light_barrier().unwrap();
        }
        report.set_speed_driller_rpm(10_000.0).unwrap();
        report.set_speed_shaper_rpm(15_500.0).unwrap();

        let sink = StdoutReportSink::from_writer(Vec::new());
        sink.publish(&report).await.unwrap();
        sink.publish(&report).await.unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("<report>"));
        assert_eq!(codec::decode_report(lines[1]).unwrap(), report);
    }
}
