//! Program preprocessing and remaining-time estimation.
//!
//! Before a program runs, one flattened walk validates every declared ramp
//! against the physical rate limit and accumulates the totals the ETA
//! estimate is built from. While the program runs, the estimator refines an
//! empirical seconds-per-degree rate from observed fast ramps.

use core::time::Duration;

use crate::control::CYCLE_START_TOLERANCE;
use crate::program::{Program, ProgramPools, StaleHandle};

/// Fastest rate the block can physically ramp, in milliseconds per degree.
/// Declared ramps shorter than this are demoted to fast ramps.
pub const PLATE_FAST_RAMP_THRESHOLD_MS: f32 = 1000.0;

/// Seconds-per-degree assumed for fast ramps until the block has actually
/// cooled at least once.
pub const DEFAULT_FAST_RAMP_SECS_PER_DEGREE: f32 = 1.0;

/// Durations and degrees accumulated across one whole program.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ProgramTotals {
    /// Sum of every step's hold duration.
    pub hold: Duration,
    /// Sum of every controlled ramp's declared duration.
    pub controlled_ramp: Duration,
    /// Degrees traversed by uncontrolled fast ramps, net of the arrival
    /// tolerance per step.
    pub fast_ramp_degrees: f32,
}

impl ProgramTotals {
    /// Projects the whole-program duration for a given fast-ramp rate.
    #[must_use]
    pub fn estimated_duration(&self, secs_per_degree: f32) -> Duration {
        let fast_secs = self.fast_ramp_degrees.max(0.0) * secs_per_degree;
        self.hold + self.controlled_ramp + Duration::from_secs_f32(fast_secs.max(0.0))
    }
}

/// Walks the flattened step sequence once, clamping unachievable ramps to
/// zero and accumulating [`ProgramTotals`].
///
/// The first step has no predecessor, so its ramp is never clamped and its
/// fast-ramp span is measured from `initial_plate_temp`. The traversal is
/// left exhausted; callers rewind with [`Program::begin_iteration`].
pub fn preprocess_program(
    pools: &mut ProgramPools,
    program: &mut Program,
    initial_plate_temp: f32,
) -> Result<ProgramTotals, StaleHandle> {
    let mut totals = ProgramTotals::default();
    let mut previous_temp: Option<f32> = None;

    program.begin_iteration(pools)?;
    while let Some(handle) = program.next_step(pools)? {
        let step = pools.steps().get(handle)?;
        if step.is_final() {
            break;
        }
        let target = step.target_temp();
        let ramp_ms = step.ramp_duration().as_secs_f32() * 1000.0;

        if let Some(previous) = previous_temp {
            let delta = (target - previous).abs();
            if ramp_ms < delta * PLATE_FAST_RAMP_THRESHOLD_MS {
                pools.steps_mut().get_mut(handle)?.clear_ramp();
            }
        }

        let step = pools.steps().get(handle)?;
        totals.hold += step.hold_duration();
        if step.ramp_duration() > Duration::ZERO {
            totals.controlled_ramp += step.ramp_duration();
        } else {
            let from = previous_temp.unwrap_or(initial_plate_temp);
            totals.fast_ramp_degrees += (from - target).abs() - CYCLE_START_TOLERANCE;
        }

        previous_temp = Some(target);
    }

    Ok(totals)
}

/// Remaining-time estimator fed by preprocessing totals and observed fast
/// ramps.
#[derive(Copy, Clone, Debug, Default)]
pub struct EtaEstimator {
    totals: ProgramTotals,
    elapsed_fast_ramp_degrees: f32,
    elapsed_fast_ramp: Duration,
    has_cooled: bool,
    remaining: Duration,
}

impl EtaEstimator {
    /// Re-arms the estimator for a new program run.
    pub fn reset(&mut self, totals: ProgramTotals) {
        *self = Self {
            totals,
            ..Self::default()
        };
    }

    /// Records one completed uncontrolled fast ramp.
    pub fn record_fast_ramp(&mut self, degrees: f32, duration: Duration) {
        self.elapsed_fast_ramp_degrees += degrees;
        self.elapsed_fast_ramp += duration;
    }

    /// Marks that the block has cooled at least once, enabling the
    /// empirical rate.
    pub fn mark_cooled(&mut self) {
        self.has_cooled = true;
    }

    /// Empirical fast-ramp rate, defaulting to
    /// [`DEFAULT_FAST_RAMP_SECS_PER_DEGREE`] until real cooling data exists.
    #[must_use]
    pub fn seconds_per_degree(&self) -> f32 {
        if self.elapsed_fast_ramp_degrees <= 0.0 || !self.has_cooled {
            DEFAULT_FAST_RAMP_SECS_PER_DEGREE
        } else {
            self.elapsed_fast_ramp.as_secs_f32() / self.elapsed_fast_ramp_degrees
        }
    }

    /// Refreshes the remaining-time estimate from elapsed program time.
    pub fn update(&mut self, elapsed: Duration) {
        let estimated = self.totals.estimated_duration(self.seconds_per_degree());
        self.remaining = estimated.saturating_sub(elapsed);
    }

    /// Latest remaining-time estimate, floored at zero.
    #[must_use]
    pub const fn remaining(&self) -> Duration {
        self.remaining
    }
}
