//! Manufacturing report - one order's timeline through the line

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::OrderId;

/// Number of light barriers an order crosses on its way through the line.
pub const LIGHT_BARRIER_COUNT: usize = 4;

/// Report mutation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportError {
    #[error("Order {0} already passed all {LIGHT_BARRIER_COUNT} light barriers")]
    BarrierOverflow(OrderId),

    #[error("{reading} reading for order {order_id} was already recorded")]
    ReadingAlreadySet {
        order_id: OrderId,
        reading: &'static str,
    },
}

/// Timeline of a single order.
///
/// `start_time` is fixed at construction. Barrier timestamps are append-only,
/// one per crossing, and the two spindle readings are written at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "report")]
pub struct Report {
    #[serde(rename = "orderId")]
    order_id: OrderId,

    #[serde(rename = "startTime")]
    start_time: DateTime<Utc>,

    #[serde(rename = "passedLightBarrier", default)]
    passed_light_barriers: Vec<DateTime<Utc>>,

    #[serde(
        rename = "speedDrillerRPM",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    speed_driller_rpm: Option<f64>,

    #[serde(
        rename = "speedShaperRPM",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    speed_shaper_rpm: Option<f64>,
}

impl Report {
    /// Start a new report for `order_id`, stamped with the current time.
    pub fn new(order_id: OrderId) -> Self {
        Self::started_at(order_id, Utc::now())
    }

    pub fn started_at(order_id: OrderId, start_time: DateTime<Utc>) -> Self {
        Self {
            order_id,
            start_time,
            passed_light_barriers: Vec::with_capacity(LIGHT_BARRIER_COUNT),
            speed_driller_rpm: None,
            speed_shaper_rpm: None,
        }
    }

    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn passed_light_barriers(&self) -> &[DateTime<Utc>] {
        &self.passed_light_barriers
    }

    /// Driller spindle speed, zero until recorded.
    pub fn speed_driller_rpm(&self) -> f64 {
        self.speed_driller_rpm.unwrap_or_default()
    }

    /// Shaper spindle speed, zero until recorded.
    pub fn speed_shaper_rpm(&self) -> f64 {
        self.speed_shaper_rpm.unwrap_or_default()
    }

    /// Record a light barrier crossing at the current time.
    ///
    /// Returns the 1-based barrier number that was crossed.
    pub fn pass_light_barrier(&mut self) -> Result<usize, ReportError> {
        self.pass_light_barrier_at(Utc::now())
    }

    pub fn pass_light_barrier_at(&mut self, at: DateTime<Utc>) -> Result<usize, ReportError> {
        if self.passed_light_barriers.len() >= LIGHT_BARRIER_COUNT {
            return Err(ReportError::BarrierOverflow(self.order_id.clone()));
        }
        self.passed_light_barriers.push(at);
        Ok(self.passed_light_barriers.len())
    }

    pub fn set_speed_driller_rpm(&mut self, rpm: f64) -> Result<(), ReportError> {
        Self::set_once(&mut self.speed_driller_rpm, rpm, &self.order_id, "Driller")
    }

    pub fn set_speed_shaper_rpm(&mut self, rpm: f64) -> Result<(), ReportError> {
        Self::set_once(&mut self.speed_shaper_rpm, rpm, &self.order_id, "Shaper")
    }

    /// All light barriers have been crossed; the report may be published.
    pub fn is_complete(&self) -> bool {
        self.passed_light_barriers.len() == LIGHT_BARRIER_COUNT
    }

    fn set_once(
        slot: &mut Option<f64>,
        rpm: f64,
        order_id: &OrderId,
        reading: &'static str,
    ) -> Result<(), ReportError> {
        if slot.is_some() {
            return Err(ReportError::ReadingAlreadySet {
                order_id: order_id.clone(),
                reading,
            });
        }
        *slot = Some(rpm);
        Ok(())
    }
}
