//! Concrete PID channel backing the emulator.
//!
//! The core treats PID arithmetic as a supplied capability; this is the
//! supply. Classic discrete form with derivative-on-measurement and an
//! anti-windup clamp on the integral term.

use cycler_core::control::{PidChannel, PidMode, Tunings};

/// Stateful PID channel with a fixed sample period.
#[derive(Clone, Debug)]
pub struct SimplePid {
    tunings: Tunings,
    mode: PidMode,
    out_min: f32,
    out_max: f32,
    sample_secs: f32,
    integral: f32,
    last_input: f32,
    last_output: f32,
    primed: bool,
}

impl SimplePid {
    /// Creates a channel computing once per `sample_secs`.
    pub fn new(sample_secs: f32) -> Self {
        Self {
            tunings: Tunings::new(0.0, 0.0, 0.0),
            mode: PidMode::Automatic,
            out_min: -1.0,
            out_max: 1.0,
            sample_secs,
            integral: 0.0,
            last_input: 0.0,
            last_output: 0.0,
            primed: false,
        }
    }
}

impl PidChannel for SimplePid {
    fn compute(&mut self, input: f32, setpoint: f32) -> f32 {
        if self.mode == PidMode::Manual {
            self.last_input = input;
            return self.last_output;
        }

        let error = setpoint - input;

        self.integral += self.tunings.ki * error * self.sample_secs;
        self.integral = self.integral.clamp(self.out_min, self.out_max);

        // Derivative on measurement avoids kicks on setpoint changes.
        let derivative = if self.primed {
            (self.last_input - input) / self.sample_secs
        } else {
            0.0
        };
        self.primed = true;
        self.last_input = input;

        let output = (self.tunings.kp * error + self.integral + self.tunings.kd * derivative)
            .clamp(self.out_min, self.out_max);
        self.last_output = output;
        output
    }

    fn set_tunings(&mut self, tunings: Tunings) {
        self.tunings = tunings;
    }

    fn set_mode(&mut self, mode: PidMode) {
        if mode == PidMode::Automatic && self.mode == PidMode::Manual {
            // Bumpless transfer: resume from wherever manual left the drive.
            self.integral = self.last_output.clamp(self.out_min, self.out_max);
            self.primed = false;
        }
        self.mode = mode;
    }

    fn set_output_limits(&mut self, min: f32, max: f32) {
        self.out_min = min;
        self.out_max = max;
        self.integral = self.integral.clamp(min, max);
        self.last_output = self.last_output.clamp(min, max);
    }

    fn reset_integral(&mut self) {
        self.integral = 0.0;
    }
}
