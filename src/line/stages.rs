//! Stage table - the fixed sequence of light barriers and their timed waits
//!
//! ```text
//! start ──wait──▶ LB1 ──wait──▶ LB2 ──wait──▶ LB3 ──wait──▶ LB4
//!                        driller RPM   shaper RPM      publish
//!                                      + release gate
//! ```
//!
//! Every wait is `base / speed + clamp(N(0,1), -1, 1) * jitter / speed`.

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use std::time::Duration;

use crate::config::defaults::{DRILLER_RPM_MAX, DRILLER_RPM_MIN, SHAPER_RPM_MAX, SHAPER_RPM_MIN};
use crate::config::{LineConfig, StageTiming};

/// One light barrier on the line, in crossing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    FirstBarrier,
    SecondBarrier,
    ThirdBarrier,
    FourthBarrier,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::FirstBarrier,
        Stage::SecondBarrier,
        Stage::ThirdBarrier,
        Stage::FourthBarrier,
    ];

    /// Crossing this barrier ends the order's occupancy of the gated section.
    pub const RELEASE_POINT: Stage = Stage::ThirdBarrier;

    /// 1-based barrier number.
    pub fn number(self) -> usize {
        match self {
            Stage::FirstBarrier => 1,
            Stage::SecondBarrier => 2,
            Stage::ThirdBarrier => 3,
            Stage::FourthBarrier => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::FirstBarrier => "first",
            Stage::SecondBarrier => "second",
            Stage::ThirdBarrier => "third",
            Stage::FourthBarrier => "fourth",
        }
    }

    fn index(self) -> usize {
        self.number() - 1
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} light barrier", self.name())
    }
}

/// Stage waits with the speed-up factor already applied.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSchedule {
    scaled: [StageTiming; 4],
}

impl StageSchedule {
    pub fn new(timings: [StageTiming; 4], speed_up_factor: f64) -> Self {
        let scaled = timings.map(|t| StageTiming {
            base_ms: t.base_ms / speed_up_factor,
            jitter_ms: t.jitter_ms / speed_up_factor,
        });
        Self { scaled }
    }

    pub fn from_config(config: &LineConfig) -> Self {
        let s = &config.stages;
        Self::new(
            [
                s.first_barrier,
                s.second_barrier,
                s.third_barrier,
                s.fourth_barrier,
            ],
            config.speed_up_factor,
        )
    }

    /// Scaled base and jitter of `stage`, in milliseconds.
    pub fn timing(&self, stage: Stage) -> StageTiming {
        self.scaled[stage.index()]
    }

    /// Shortest and longest wait `stage` can draw.
    pub fn bounds(&self, stage: Stage) -> (Duration, Duration) {
        let t = self.timing(stage);
        (
            millis_to_duration(t.base_ms - t.jitter_ms),
            millis_to_duration(t.base_ms + t.jitter_ms),
        )
    }

    /// Draw the wait before `stage`'s barrier.
    pub fn sample_wait<R: Rng + ?Sized>(&self, stage: Stage, rng: &mut R) -> Duration {
        let t = self.timing(stage);
        millis_to_duration(t.base_ms + bounded_gaussian(rng) * t.jitter_ms)
    }

    /// Sum of all base waits; the typical time an order spends on the line.
    pub fn nominal_cycle(&self) -> Duration {
        millis_to_duration(self.scaled.iter().map(|t| t.base_ms).sum())
    }
}

/// Standard-normal sample clamped to [-1, 1].
pub fn bounded_gaussian<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let z: f64 = StandardNormal.sample(rng);
    z.clamp(-1.0, 1.0)
}

/// Driller spindle speed reading, uniform in [9200, 11200).
pub fn sample_driller_rpm<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.gen_range(DRILLER_RPM_MIN..DRILLER_RPM_MAX)
}

/// Shaper spindle speed reading, uniform in [15000, 16000).
pub fn sample_shaper_rpm<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.gen_range(SHAPER_RPM_MIN..SHAPER_RPM_MAX)
}

fn millis_to_duration(ms: f64) -> Duration {
    let nanos = (ms.max(0.0) * 1_000_000.0).round();
    if nanos >= u64::MAX as f64 {
        Duration::MAX
    } else {
        Duration::from_nanos(nanos as u64)
    }
}
