//! System-wide default constants.
//!
//! Centralises the line's timing table, instrument ranges and transport
//! tunables. Grouped by subsystem for easy discovery.

// ============================================================================
// Stage Timing (real-world milliseconds, divided by the speed-up factor)
// ============================================================================

/// Wait before the first light barrier.
pub const FIRST_BARRIER_BASE_MS: f64 = 1_000.0;
pub const FIRST_BARRIER_JITTER_MS: f64 = 20.0;

/// Wait before the second light barrier (driller station).
pub const SECOND_BARRIER_BASE_MS: f64 = 4_250.0;
pub const SECOND_BARRIER_JITTER_MS: f64 = 450.0;

/// Wait before the third light barrier (shaper station, end of gated section).
pub const THIRD_BARRIER_BASE_MS: f64 = 7_100.0;
pub const THIRD_BARRIER_JITTER_MS: f64 = 1_000.0;

/// Wait before the fourth light barrier (end of line).
pub const FOURTH_BARRIER_BASE_MS: f64 = 9_500.0;
pub const FOURTH_BARRIER_JITTER_MS: f64 = 3_000.0;

/// Default simulation speed (1 = real-world timing).
pub const SPEED_UP_FACTOR: f64 = 1.0;

// ============================================================================
// Instruments
// ============================================================================

/// Driller spindle speed range (RPM), half-open.
pub const DRILLER_RPM_MIN: f64 = 9_200.0;
pub const DRILLER_RPM_MAX: f64 = 11_200.0;

/// Shaper spindle speed range (RPM), half-open.
pub const SHAPER_RPM_MIN: f64 = 15_000.0;
pub const SHAPER_RPM_MAX: f64 = 16_000.0;

// ============================================================================
// Transport
// ============================================================================

/// Broker endpoint used when neither config nor CLI name one.
pub const BROKER_HOST: &str = "localhost:5672";

/// Fanout exchange carrying machine orders from the ERP side.
pub const ORDER_EXCHANGE: &str = "MACHINE_ORDER_EXCHANGE";

/// Fanout exchange carrying finished reports.
pub const REPORT_EXCHANGE: &str = "REPORT_EXCHANGE";

/// TCP connect timeout (seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Maximum reconnection attempts before giving up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Initial reconnection delay (doubles each attempt).
pub const INITIAL_RECONNECT_DELAY_SECS: u64 = 2;

/// Maximum reconnection delay cap (seconds).
pub const MAX_RECONNECT_DELAY_SECS: u64 = 60;

/// Capacity of each in-process bus exchange before slow subscribers lag.
pub const BUS_CHANNEL_CAPACITY: usize = 1_024;

// ============================================================================
// Order Feed
// ============================================================================

/// Default pause between generated orders (ms).
pub const ORDER_FEED_INTERVAL_MS: u64 = 5_000;
