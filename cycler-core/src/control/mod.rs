//! Control-strategy primitives: the PID capability boundary, gain-schedule
//! tables for the plate and lid loops, and the tunable control policy.
//!
//! The PID arithmetic itself is a supplied capability behind [`PidChannel`];
//! this module owns *when* it runs and *with what tunings*. All tuning
//! values were bench-tuned on the reference hardware and are pinned by
//! tests.

use core::fmt;

/// Proportional/integral/derivative gain triple.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Tunings {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl Tunings {
    /// Creates a gain triple.
    #[must_use]
    pub const fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self { kp, ki, kd }
    }
}

/// Whether a PID channel updates its internal state on compute.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PidMode {
    /// The channel holds its last output; `compute` is a no-op.
    Manual,
    /// The channel runs the control law each compute.
    Automatic,
}

/// Supplied PID capability for one control channel.
///
/// Implementations must honor [`PidMode::Manual`] by leaving internal state
/// untouched and returning the last computed drive, so the controller can
/// run bang-bang over an idle channel and hand back smoothly.
pub trait PidChannel {
    /// Runs one control-law update and returns the drive signal.
    fn compute(&mut self, input: f32, setpoint: f32) -> f32;

    /// Replaces the gain triple.
    fn set_tunings(&mut self, tunings: Tunings);

    /// Switches between manual and automatic operation.
    fn set_mode(&mut self, mode: PidMode);

    /// Clamps the drive signal range.
    fn set_output_limits(&mut self, min: f32, max: f32);

    /// Clears the accumulated integral term.
    fn reset_integral(&mut self);
}

/// Actuator polarity derived from the sign of the drive signal.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum ThermalDirection {
    #[default]
    Off,
    Heat,
    Cool,
}

impl fmt::Display for ThermalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ThermalDirection::Off => "off",
            ThermalDirection::Heat => "heat",
            ThermalDirection::Cool => "cool",
        })
    }
}

/// Active plate control mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PlateControlMode {
    /// Full-scale drive toward the target, used while far away.
    BangBang,
    /// Closed-loop PID, used near the target.
    Pid,
}

/// Which way the plate is being driven relative to the current block
/// temperature when a step begins.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RampDirection {
    Increasing,
    Decreasing,
}

/// Distance from target beyond which the plate runs bang-bang.
pub const PLATE_BANGBANG_THRESHOLD: f32 = 2.0;

/// Tolerance around a step target that counts as "arrived".
pub const CYCLE_START_TOLERANCE: f32 = 0.2;

/// How far below its target the lid may be when a program starts.
pub const LID_START_TOLERANCE: f32 = 1.0;

/// Increasing-direction tunings for targets at or above
/// [`PLATE_PID_INC_LOW_THRESHOLD`].
pub const PLATE_PID_INC_NORM: Tunings = Tunings::new(1000.0, 250.0, 250.0);

/// Below this target, heating uses the gentler low-range tunings.
pub const PLATE_PID_INC_LOW_THRESHOLD: f32 = 40.0;

/// Increasing-direction tunings for low targets.
pub const PLATE_PID_INC_LOW: Tunings = Tunings::new(600.0, 200.0, 400.0);

/// Above this target, cooling uses the aggressive high-range tunings.
pub const PLATE_PID_DEC_HIGH_THRESHOLD: f32 = 70.0;

/// Decreasing-direction tunings for high targets.
pub const PLATE_PID_DEC_HIGH: Tunings = Tunings::new(800.0, 700.0, 300.0);

/// Decreasing-direction tunings between the two thresholds.
pub const PLATE_PID_DEC_NORM: Tunings = Tunings::new(500.0, 400.0, 200.0);

/// Below this target, cooling uses the low-range tunings; it also bounds
/// the integral-reset heuristic in the decreasing branch.
pub const PLATE_PID_DEC_LOW_THRESHOLD: f32 = 35.0;

/// Decreasing-direction tunings for low targets.
pub const PLATE_PID_DEC_LOW: Tunings = Tunings::new(2000.0, 100.0, 200.0);

/// Peltier drive signal range.
pub const MIN_PELTIER_DRIVE: f32 = -1023.0;
pub const MAX_PELTIER_DRIVE: f32 = 1023.0;

/// Lid heater drive range.
pub const MIN_LID_DRIVE: f32 = 0.0;
pub const MAX_LID_DRIVE: f32 = 255.0;

/// Selects the plate gain triple for a new step from direction and target
/// bucket.
#[must_use]
pub fn plate_tunings(direction: RampDirection, target_temp: f32) -> Tunings {
    match direction {
        RampDirection::Increasing => {
            if target_temp < PLATE_PID_INC_LOW_THRESHOLD {
                PLATE_PID_INC_LOW
            } else {
                PLATE_PID_INC_NORM
            }
        }
        RampDirection::Decreasing => {
            if target_temp > PLATE_PID_DEC_HIGH_THRESHOLD {
                PLATE_PID_DEC_HIGH
            } else if target_temp < PLATE_PID_DEC_LOW_THRESHOLD {
                PLATE_PID_DEC_LOW
            } else {
                PLATE_PID_DEC_NORM
            }
        }
    }
}

/// One row of the lid gain schedule: tunings valid up to `max_temp`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LidScheduleEntry {
    pub max_temp: f32,
    pub tunings: Tunings,
}

impl LidScheduleEntry {
    const fn new(max_temp: f32, tunings: Tunings) -> Self {
        Self { max_temp, tunings }
    }
}

/// Ordered lid gain schedule, selected by the lid *target* temperature.
pub const LID_GAIN_SCHEDULE: [LidScheduleEntry; 2] = [
    LidScheduleEntry::new(70.0, Tunings::new(40.0, 0.15, 60.0)),
    LidScheduleEntry::new(200.0, Tunings::new(80.0, 1.1, 10.0)),
];

/// Selects lid tunings: the first entry whose bound covers the target,
/// falling back to the hottest row.
#[must_use]
pub fn lid_tunings(target_temp: f32) -> Tunings {
    for entry in &LID_GAIN_SCHEDULE {
        if target_temp <= entry.max_temp {
            return entry.tunings;
        }
    }
    LID_GAIN_SCHEDULE[LID_GAIN_SCHEDULE.len() - 1].tunings
}

/// Empirically tuned behaviors preserved as switchable policy rather than
/// re-derived.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ControlPolicy {
    /// While cooling toward a target above the low threshold, keep
    /// resetting the integral term until the block has overshot below the
    /// target.
    pub decrease_integral_reset: bool,
    /// Keep driving the plate loop after the program completes, holding
    /// the terminal step temperature.
    pub control_after_complete: bool,
}

impl Default for ControlPolicy {
    fn default() -> Self {
        Self {
            decrease_integral_reset: true,
            control_after_complete: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plate_schedule_buckets_by_direction_and_target() {
        assert_eq!(
            plate_tunings(RampDirection::Increasing, 95.0),
            PLATE_PID_INC_NORM
        );
        assert_eq!(
            plate_tunings(RampDirection::Increasing, 25.0),
            PLATE_PID_INC_LOW
        );
        assert_eq!(
            plate_tunings(RampDirection::Decreasing, 72.0),
            PLATE_PID_DEC_HIGH
        );
        assert_eq!(
            plate_tunings(RampDirection::Decreasing, 55.0),
            PLATE_PID_DEC_NORM
        );
        assert_eq!(
            plate_tunings(RampDirection::Decreasing, 16.0),
            PLATE_PID_DEC_LOW
        );
    }

    #[test]
    fn plate_schedule_matches_bench_tuning() {
        assert_eq!(PLATE_PID_INC_NORM, Tunings::new(1000.0, 250.0, 250.0));
        assert_eq!(PLATE_PID_INC_LOW, Tunings::new(600.0, 200.0, 400.0));
        assert_eq!(PLATE_PID_DEC_HIGH, Tunings::new(800.0, 700.0, 300.0));
        assert_eq!(PLATE_PID_DEC_NORM, Tunings::new(500.0, 400.0, 200.0));
        assert_eq!(PLATE_PID_DEC_LOW, Tunings::new(2000.0, 100.0, 200.0));
        assert_eq!(PLATE_BANGBANG_THRESHOLD, 2.0);
    }

    #[test]
    fn lid_schedule_selects_by_target_bound() {
        assert_eq!(lid_tunings(60.0), LID_GAIN_SCHEDULE[0].tunings);
        assert_eq!(lid_tunings(70.0), LID_GAIN_SCHEDULE[0].tunings);
        assert_eq!(lid_tunings(110.0), LID_GAIN_SCHEDULE[1].tunings);
        assert_eq!(lid_tunings(250.0), LID_GAIN_SCHEDULE[1].tunings);
    }
}
