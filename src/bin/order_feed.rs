//! Machine Order Feed
//!
//! Generates machine orders the way an ERP front end would and writes them to
//! stdout (one per line) or publishes them to a broker exchange.
//!
//! # Usage
//! ```bash
//! ./order-feed --count 10 --interval-ms 500 | ./assembly-line-sim --stdin --speed 20
//! ./order-feed --broker localhost:5672
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rand::prelude::*;
use std::io::{self, Write};
use std::time::Duration;

use assembly_line_sim::codec;
use assembly_line_sim::config::defaults::{ORDER_EXCHANGE, ORDER_FEED_INTERVAL_MS};
use assembly_line_sim::transport::BrokerClient;
use assembly_line_sim::{MachineOrder, OrderId};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Xml,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "order-feed")]
#[command(about = "Machine order generator for the assembly line simulator")]
#[command(version)]
struct Args {
    /// Number of orders to emit (runs until interrupted when omitted)
    #[arg(short = 'n', long)]
    count: Option<u64>,

    /// Pause between orders in milliseconds
    #[arg(short, long, default_value_t = ORDER_FEED_INTERVAL_MS)]
    interval_ms: u64,

    /// Random seed for reproducible order ids
    #[arg(long)]
    seed: Option<u64>,

    /// Output format on stdout
    #[arg(short, long, value_enum, default_value_t = Format::Xml)]
    format: Format,

    /// Publish to a broker (HOST:PORT) instead of stdout
    #[arg(long, value_name = "HOST:PORT")]
    broker: Option<String>,

    /// Exchange to publish on when using --broker
    #[arg(long, default_value = ORDER_EXCHANGE)]
    exchange: String,

    /// Suppress progress messages on stderr
    #[arg(short, long)]
    quiet: bool,
}

// ============================================================================
// Order Generation
// ============================================================================

/// Random v4 UUID drawn from `rng`, so seeded runs repeat exactly.
fn next_order_id(rng: &mut StdRng) -> OrderId {
    let bytes: [u8; 16] = rng.gen();
    OrderId::new(uuid::Builder::from_random_bytes(bytes).into_uuid().to_string())
}

fn render(order: &MachineOrder, format: Format) -> Result<String> {
    match format {
        Format::Xml => codec::encode_order(order).context("Failed to encode order as XML"),
        Format::Json => serde_json::to_string(order).context("Failed to encode order as JSON"),
    }
}

fn log_feed(message: &str, quiet: bool) {
    if !quiet {
        eprintln!("[order-feed] {}", message);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut rng = match args.seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    let mut broker = match &args.broker {
        Some(addr) => {
            let mut client = BrokerClient::new(addr)?;
            client
                .connect()
                .await
                .with_context(|| format!("Failed to connect to broker at {}", addr))?;
            log_feed(&format!("Publishing to exchange {} at {}", args.exchange, addr), args.quiet);
            Some(client)
        }
        None => None,
    };

    let interval = Duration::from_millis(args.interval_ms);
    let mut emitted = 0u64;
    let stdout = io::stdout();

    loop {
        if args.count.is_some_and(|n| emitted >= n) {
            break;
        }
        if emitted > 0 && !interval.is_zero() {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        let order = MachineOrder::new(next_order_id(&mut rng));
        match broker.as_mut() {
            Some(client) => {
                let payload = codec::encode_order(&order)?;
                client
                    .publish(&args.exchange, &payload)
                    .await
                    .context("Failed to publish order")?;
            }
            None => {
                let line = render(&order, args.format)?;
                let mut out = stdout.lock();
                if writeln!(out, "{}", line).and_then(|_| out.flush()).is_err() {
                    // Downstream closed the pipe
                    break;
                }
            }
        }
        emitted += 1;
        log_feed(&format!("#{} {}", emitted, order.id), args.quiet);
    }

    if let Some(mut client) = broker {
        client.disconnect().await;
    }
    log_feed(&format!("Done, {} orders emitted", emitted), args.quiet);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_ids_repeat() {
        let a: Vec<OrderId> = {
            let mut rng = StdRng::seed_from_u64(9);
            (0..3).map(|_| next_order_id(&mut rng)).collect()
        };
        let b: Vec<OrderId> = {
            let mut rng = StdRng::seed_from_u64(9);
            (0..3).map(|_| next_order_id(&mut rng)).collect()
        };
        assert_eq!(a, b);
        assert_ne!(a[0], a[1]);
        let parsed = uuid::Uuid::parse_str(a[0].as_str()).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn test_render_formats_decode_back() {
        let order = MachineOrder::new("MO-1");
        for format in [Format::Xml, Format::Json] {
            let line = render(&order, format).unwrap();
            assert!(!line.contains('\n'));
            assert_eq!(codec::decode_order(&line).unwrap(), order);
        }
    }
}
