//! The thermocycler controller: program state machine, per-tick control
//! orchestration, and the command interface.
//!
//! [`Thermocycler`] is an explicit context object passed to the entry
//! points that need it. It owns the program pools, both PID channels, and
//! every piece of run state; hardware stays behind [`CyclerIo`] so the same
//! engine drives MCU firmware and the host emulator.

use core::fmt;
use core::time::Duration;

use heapless::String;

use crate::control::{
    ControlPolicy, CYCLE_START_TOLERANCE, LID_START_TOLERANCE, MAX_PELTIER_DRIVE, MIN_LID_DRIVE,
    MAX_LID_DRIVE, MIN_PELTIER_DRIVE, PLATE_BANGBANG_THRESHOLD, PLATE_PID_DEC_LOW_THRESHOLD,
    PLATE_PID_INC_NORM, PidChannel, PidMode, PlateControlMode, RampDirection, ThermalDirection,
    lid_tunings, plate_tunings,
};
use crate::eta::{EtaEstimator, ProgramTotals, preprocess_program};
use crate::program::{
    BuildError, Cycle, Program, ProgramPools, ProgramSpec, Step, StepHandle, build_program,
};
use crate::time::Instant;

/// Hardware warm-up delay before the controller accepts commands.
pub const STARTUP_DELAY: Duration = Duration::from_millis(4_000);

/// Bound on program display names.
pub const MAX_PROGRAM_NAME: usize = 20;

/// Display contrast applied until a config command overrides it.
pub const DEFAULT_CONTRAST: u8 = 100;

/// Bounded program name.
pub type ProgramName = String<MAX_PROGRAM_NAME>;

/// Program state machine phases.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProgramState {
    /// Hardware warm-up; the controller idles until the delay elapses.
    Startup,
    /// Idle, ready for a start command.
    Stopped,
    /// Waiting for the lid to warm before the program begins.
    LidWait,
    /// Executing the installed program.
    Running,
    /// Program finished; the terminal target is still held.
    Complete,
    /// Unrecoverable hardware fault. Actuation is halted until a stop.
    Error,
}

impl ProgramState {
    /// Wire-protocol name for the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ProgramState::Startup => "startup",
            ProgramState::Stopped => "stopped",
            ProgramState::LidWait => "lidwait",
            ProgramState::Running => "running",
            ProgramState::Complete => "complete",
            ProgramState::Error => "error",
        }
    }

    /// Returns `true` when a program is in flight.
    #[must_use]
    pub const fn is_executing(self) -> bool {
        matches!(self, ProgramState::Running | ProgramState::Complete)
    }
}

impl fmt::Display for ProgramState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thermal activity reported to the display and host.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ThermalState {
    Holding,
    Heating,
    Cooling,
    Idle,
}

impl ThermalState {
    /// Wire-protocol name for the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ThermalState::Holding => "holding",
            ThermalState::Heating => "heating",
            ThermalState::Cooling => "cooling",
            ThermalState::Idle => "idle",
        }
    }
}

impl fmt::Display for ThermalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boundary to the excluded hardware collaborators.
///
/// Thermistor sampling, actuation, and the display sit behind this trait;
/// the controller never touches an ADC channel or a PWM register.
pub trait CyclerIo {
    /// Samples the lid thermistor.
    fn read_lid_temp(&mut self) -> f32;

    /// Samples the plate thermistor.
    fn read_plate_temp(&mut self) -> f32;

    /// Drives the Peltier stack with the given polarity and magnitude.
    fn set_peltier(&mut self, direction: ThermalDirection, magnitude: u16);

    /// Drives the lid heater.
    fn set_lid_heater(&mut self, duty: u8);

    /// Clears the attached display on state reset.
    fn display_clear(&mut self);

    /// Forwards a contrast change to the attached display.
    fn display_set_contrast(&mut self, contrast: u8);
}

/// IO boundary that performs no hardware interaction.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopCyclerIo;

impl NoopCyclerIo {
    /// Creates a new no-op IO boundary.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl CyclerIo for NoopCyclerIo {
    fn read_lid_temp(&mut self) -> f32 {
        0.0
    }

    fn read_plate_temp(&mut self) -> f32 {
        0.0
    }

    fn set_peltier(&mut self, _: ThermalDirection, _: u16) {}

    fn set_lid_heater(&mut self, _: u8) {}

    fn display_clear(&mut self) {}

    fn display_set_contrast(&mut self, _: u8) {}
}

/// Parsed start request delivered by the command layer.
#[derive(Clone, Debug, PartialEq)]
pub struct StartCommand {
    pub name: ProgramName,
    pub lid_temp: f32,
    pub spec: ProgramSpec,
}

/// Parsed command delivered by the command layer.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Install a new program and start it.
    Start(StartCommand),
    /// Stop unconditionally.
    Stop,
    /// Update the display contrast.
    Config { contrast: u8 },
}

/// Errors surfaced by the command interface.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PcrError {
    /// Start requested with no program installed.
    NoProgram,
    /// The submitted program definition was rejected; nothing was
    /// installed.
    Build(BuildError),
}

impl fmt::Display for PcrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PcrError::NoProgram => f.write_str("no program installed"),
            PcrError::Build(err) => write!(f, "program rejected: {err}"),
        }
    }
}

impl From<BuildError> for PcrError {
    fn from(err: BuildError) -> Self {
        PcrError::Build(err)
    }
}

/// The thermocycler control engine.
pub struct Thermocycler<P: PidChannel> {
    pools: ProgramPools,
    program: Option<Program>,
    program_name: ProgramName,
    policy: ControlPolicy,

    state: ProgramState,
    boot_at: Option<Instant>,
    now: Instant,

    current_step: Option<StepHandle>,
    previous_step: Option<StepHandle>,

    plate_pid: P,
    lid_pid: P,
    plate_control_mode: PlateControlMode,
    is_decreasing: bool,
    is_ramping: bool,
    thermal_direction: ThermalDirection,
    peltier_drive: f32,
    lid_drive: f32,

    lid_temp: f32,
    plate_temp: f32,
    target_lid_temp: f32,
    target_plate_temp: f32,

    program_start: Instant,
    ramp_start: Instant,
    ramp_start_temp: f32,
    hold_start: Instant,

    eta: EtaEstimator,
    contrast: u8,
}

impl<P: PidChannel> Thermocycler<P> {
    /// Creates a controller around the supplied PID channels.
    pub fn new(mut plate_pid: P, mut lid_pid: P, policy: ControlPolicy) -> Self {
        plate_pid.set_tunings(PLATE_PID_INC_NORM);
        plate_pid.set_output_limits(MIN_PELTIER_DRIVE, MAX_PELTIER_DRIVE);
        plate_pid.set_mode(PidMode::Automatic);
        lid_pid.set_tunings(lid_tunings(0.0));
        lid_pid.set_output_limits(MIN_LID_DRIVE, MAX_LID_DRIVE);
        lid_pid.set_mode(PidMode::Automatic);

        Self {
            pools: ProgramPools::new(),
            program: None,
            program_name: ProgramName::new(),
            policy,
            state: ProgramState::Startup,
            boot_at: None,
            now: Instant::ZERO,
            current_step: None,
            previous_step: None,
            plate_pid,
            lid_pid,
            plate_control_mode: PlateControlMode::Pid,
            is_decreasing: false,
            is_ramping: true,
            thermal_direction: ThermalDirection::Off,
            peltier_drive: 0.0,
            lid_drive: 0.0,
            lid_temp: 0.0,
            plate_temp: 0.0,
            target_lid_temp: 0.0,
            target_plate_temp: 0.0,
            program_start: Instant::ZERO,
            ramp_start: Instant::ZERO,
            ramp_start_temp: 0.0,
            hold_start: Instant::ZERO,
            eta: EtaEstimator::default(),
            contrast: DEFAULT_CONTRAST,
        }
    }

    /// Runs one control tick.
    ///
    /// Within a tick the order is fixed: sensor sampling, then the state
    /// machine, then control computation and actuation, then the ETA
    /// refresh. Later phases depend on values produced earlier in the same
    /// tick.
    pub fn tick(&mut self, now: Instant, io: &mut impl CyclerIo) {
        if self.boot_at.is_none() {
            self.boot_at = Some(now);
        }
        self.now = now;

        self.lid_temp = io.read_lid_temp();
        self.plate_temp = io.read_plate_temp();

        self.advance_state_machine(now);

        self.control_lid(io);
        self.calc_plate_target();
        self.control_peltier(io);
        self.update_eta();
    }

    /// Handles a parsed command from the serial layer.
    pub fn process_command(
        &mut self,
        command: Command,
        io: &mut impl CyclerIo,
    ) -> Result<(), PcrError> {
        match command {
            Command::Start(start) => {
                self.stop(io);
                match build_program(&mut self.pools, &start.spec) {
                    Ok(program) => {
                        self.program = Some(program);
                        self.program_name = start.name;
                        self.target_lid_temp = start.lid_temp;
                        self.start()
                    }
                    Err(err) => {
                        self.pools.reset();
                        Err(PcrError::Build(err))
                    }
                }
            }
            Command::Stop => {
                self.stop(io);
                Ok(())
            }
            Command::Config { contrast } => {
                self.contrast = contrast;
                io.display_set_contrast(contrast);
                Ok(())
            }
        }
    }

    /// Starts the installed program, moving to the lid-wait phase.
    pub fn start(&mut self) -> Result<(), PcrError> {
        if self.program.is_none() {
            return Err(PcrError::NoProgram);
        }
        self.state = ProgramState::LidWait;
        Ok(())
    }

    /// Stops unconditionally: resets to `Stopped`, drops the program,
    /// invalidates both pools, and clears the display. Always succeeds,
    /// whatever the current state.
    pub fn stop(&mut self, io: &mut impl CyclerIo) {
        self.state = ProgramState::Stopped;
        self.program = None;
        self.program_name.clear();
        self.current_step = None;
        self.previous_step = None;
        self.pools.reset();
        io.display_clear();
    }

    /// Records an unrecoverable hardware fault. Actuation is zeroed on the
    /// next tick and stays off until a stop.
    pub fn report_fault(&mut self) {
        self.state = ProgramState::Error;
    }

    fn advance_state_machine(&mut self, now: Instant) {
        match self.state {
            ProgramState::Startup => {
                let boot_at = self.boot_at.unwrap_or(now);
                if now.duration_since(boot_at) >= STARTUP_DELAY {
                    self.state = ProgramState::Stopped;
                }
            }
            ProgramState::LidWait => {
                if self.lid_temp >= self.target_lid_temp - LID_START_TOLERANCE {
                    self.thermal_direction = ThermalDirection::Off;
                    self.peltier_drive = 0.0;

                    let totals = match self.program.as_mut() {
                        Some(program) => {
                            let totals =
                                preprocess_program(&mut self.pools, program, self.plate_temp)
                                    .unwrap_or_default();
                            let _ = program.begin_iteration(&mut self.pools);
                            totals
                        }
                        None => ProgramTotals::default(),
                    };
                    self.eta.reset(totals);

                    self.state = ProgramState::Running;
                    self.advance_to_next_step(now);
                    self.program_start = now;
                }
            }
            ProgramState::Running => self.advance_running(now),
            ProgramState::Complete => {
                if self.is_ramping
                    && let Some((target, _, _, _)) = self.current_step_fields()
                    && (target - self.plate_temp).abs() <= CYCLE_START_TOLERANCE
                {
                    self.is_ramping = false;
                }
            }
            ProgramState::Stopped | ProgramState::Error => {}
        }
    }

    fn advance_running(&mut self, now: Instant) {
        let Some((target, ramp_duration, hold_duration, is_final)) = self.current_step_fields()
        else {
            return;
        };

        if self.is_ramping {
            let ramp_elapsed = now.duration_since(self.ramp_start);
            if (target - self.plate_temp).abs() <= CYCLE_START_TOLERANCE
                && ramp_elapsed > ramp_duration
            {
                if ramp_duration.is_zero() {
                    self.eta.record_fast_ramp(
                        (self.plate_temp - self.ramp_start_temp).abs(),
                        ramp_elapsed,
                    );
                }
                if self.ramp_start_temp > self.plate_temp {
                    self.eta.mark_cooled();
                }
                self.is_ramping = false;
                self.hold_start = now;
            }
        } else if !is_final && now.duration_since(self.hold_start) > hold_duration {
            self.advance_to_next_step(now);
            let finished = self
                .current_step_fields()
                .is_none_or(|(_, _, _, is_final)| is_final);
            if finished {
                self.state = ProgramState::Complete;
            }
        }
    }

    fn advance_to_next_step(&mut self, now: Instant) {
        self.previous_step = self.current_step;
        self.current_step = match self.program.as_mut() {
            Some(program) => program.next_step(&mut self.pools).unwrap_or(None),
            None => None,
        };

        let Some((target, _, _, _)) = self.current_step_fields() else {
            return;
        };

        match self.previous_step_temp() {
            Some(previous) if previous == target => {
                // Same target as the last step: no ramp, the hold starts
                // immediately.
                self.hold_start = now;
            }
            _ => {
                self.is_ramping = true;
                self.ramp_start = now;
                self.ramp_start_temp = self.plate_temp;
            }
        }

        self.calc_plate_target();
        self.set_plate_control_strategy();
    }

    /// Selects control mode and gain schedule for a freshly entered step.
    /// Left untouched while a controlled ramp is pacing the plate.
    fn set_plate_control_strategy(&mut self) {
        if self.in_controlled_ramp() {
            return;
        }

        if (self.target_plate_temp - self.plate_temp).abs() >= PLATE_BANGBANG_THRESHOLD {
            self.plate_control_mode = PlateControlMode::BangBang;
            self.plate_pid.set_mode(PidMode::Manual);
        } else {
            self.plate_control_mode = PlateControlMode::Pid;
            self.plate_pid.set_mode(PidMode::Automatic);
        }

        if self.is_ramping {
            let direction = if self.target_plate_temp >= self.plate_temp {
                self.is_decreasing = false;
                RampDirection::Increasing
            } else {
                self.is_decreasing = true;
                RampDirection::Decreasing
            };
            self.plate_pid
                .set_tunings(plate_tunings(direction, self.target_plate_temp));
        }
    }

    /// Computes the plate setpoint: linear interpolation while inside a
    /// controlled ramp, otherwise the step target. A missing step leaves
    /// the previous target untouched.
    fn calc_plate_target(&mut self) {
        let Some((target, ramp_duration, _, _)) = self.current_step_fields() else {
            return;
        };

        if self.in_controlled_ramp() {
            let Some(previous) = self.previous_step_temp() else {
                return;
            };
            let ramp_point =
                self.ramp_elapsed().as_secs_f32() / ramp_duration.as_secs_f32();
            self.target_plate_temp = previous + (target - previous) * ramp_point;
        } else {
            self.target_plate_temp = target;
        }
    }

    fn control_peltier(&mut self, io: &mut impl CyclerIo) {
        let mut direction = ThermalDirection::Off;
        let active = self.state == ProgramState::Running
            || (self.state == ProgramState::Complete
                && self.current_step_fields().is_some()
                && self.policy.control_after_complete);

        if active {
            let target = self.target_plate_temp;

            // Nearing the target under bang-bang: hand over to PID with a
            // clean integrator.
            if self.plate_control_mode == PlateControlMode::BangBang
                && (target - self.plate_temp).abs() < PLATE_BANGBANG_THRESHOLD
            {
                self.plate_control_mode = PlateControlMode::Pid;
                self.plate_pid.set_mode(PidMode::Automatic);
                self.plate_pid.reset_integral();
            }

            let pid_drive = self.plate_pid.compute(self.plate_temp, target);
            self.peltier_drive = if self.plate_control_mode == PlateControlMode::BangBang {
                if target > self.plate_temp {
                    MAX_PELTIER_DRIVE
                } else {
                    MIN_PELTIER_DRIVE
                }
            } else {
                pid_drive
            };

            if self.policy.decrease_integral_reset
                && self.is_decreasing
                && target > PLATE_PID_DEC_LOW_THRESHOLD
            {
                if target < self.plate_temp {
                    self.plate_pid.reset_integral();
                } else {
                    self.is_decreasing = false;
                }
            }

            if self.peltier_drive > 0.0 {
                direction = ThermalDirection::Heat;
            } else if self.peltier_drive < 0.0 {
                direction = ThermalDirection::Cool;
            }
        } else {
            self.peltier_drive = 0.0;
        }

        self.thermal_direction = direction;
        let magnitude = self.peltier_drive.abs().min(MAX_PELTIER_DRIVE) as u16;
        io.set_peltier(direction, magnitude);
    }

    fn control_lid(&mut self, io: &mut impl CyclerIo) {
        let drive = if matches!(self.state, ProgramState::LidWait | ProgramState::Running) {
            self.lid_pid.set_tunings(lid_tunings(self.target_lid_temp));
            self.lid_pid
                .compute(self.lid_temp, self.target_lid_temp)
                .clamp(MIN_LID_DRIVE, MAX_LID_DRIVE)
        } else {
            0.0
        };
        self.lid_drive = drive;
        io.set_lid_heater(drive as u8);
    }

    fn update_eta(&mut self) {
        if self.state == ProgramState::Running {
            self.eta.update(self.now.duration_since(self.program_start));
        }
    }

    fn current_step_fields(&self) -> Option<(f32, Duration, Duration, bool)> {
        let handle = self.current_step?;
        let step = self.pools.steps().get(handle).ok()?;
        Some((
            step.target_temp(),
            step.ramp_duration(),
            step.hold_duration(),
            step.is_final(),
        ))
    }

    fn previous_step_temp(&self) -> Option<f32> {
        self.previous_step
            .and_then(|handle| self.pools.steps().get(handle).ok())
            .map(Step::target_temp)
    }

    // accessors

    /// Current program state.
    #[must_use]
    pub const fn program_state(&self) -> ProgramState {
        self.state
    }

    /// Current thermal activity.
    #[must_use]
    pub fn thermal_state(&self) -> ThermalState {
        if matches!(self.state, ProgramState::Startup | ProgramState::Stopped) {
            return ThermalState::Idle;
        }
        if self.is_ramping {
            match (self.current_step_fields(), self.previous_step_temp()) {
                (Some((target, _, _, _)), Some(previous)) => {
                    if target > previous {
                        ThermalState::Heating
                    } else {
                        ThermalState::Cooling
                    }
                }
                _ => {
                    if self.thermal_direction == ThermalDirection::Heat {
                        ThermalState::Heating
                    } else {
                        ThermalState::Cooling
                    }
                }
            }
        } else {
            ThermalState::Holding
        }
    }

    /// The step currently executing, if any.
    #[must_use]
    pub fn current_step(&self) -> Option<&Step> {
        self.current_step
            .and_then(|handle| self.pools.steps().get(handle).ok())
    }

    /// Last sampled lid temperature.
    #[must_use]
    pub const fn lid_temp(&self) -> f32 {
        self.lid_temp
    }

    /// Last sampled plate temperature.
    #[must_use]
    pub const fn plate_temp(&self) -> f32 {
        self.plate_temp
    }

    /// Plate setpoint computed this tick.
    #[must_use]
    pub const fn plate_target(&self) -> f32 {
        self.target_plate_temp
    }

    /// Lid setpoint for the installed program.
    #[must_use]
    pub const fn target_lid_temp(&self) -> f32 {
        self.target_lid_temp
    }

    /// Estimated time remaining in the running program.
    #[must_use]
    pub const fn time_remaining(&self) -> Duration {
        self.eta.remaining()
    }

    /// Time elapsed since the program entered `Running`.
    #[must_use]
    pub fn time_elapsed(&self) -> Duration {
        if self.state.is_executing() {
            self.now.duration_since(self.program_start)
        } else {
            Duration::ZERO
        }
    }

    /// Time spent in the current ramp.
    #[must_use]
    pub fn ramp_elapsed(&self) -> Duration {
        self.now.duration_since(self.ramp_start)
    }

    /// Repeat count of the display cycle.
    #[must_use]
    pub fn num_cycles(&self) -> u16 {
        self.display_cycle().map_or(0, Cycle::repeat_count)
    }

    /// One-based repeat of the display cycle currently in progress.
    #[must_use]
    pub fn current_cycle_num(&self) -> u16 {
        self.display_cycle().map_or(0, Cycle::current_cycle)
    }

    /// Name of the installed program.
    #[must_use]
    pub fn program_name(&self) -> &str {
        &self.program_name
    }

    /// Current display contrast.
    #[must_use]
    pub const fn contrast(&self) -> u8 {
        self.contrast
    }

    /// Returns `true` while transitioning between step targets.
    #[must_use]
    pub const fn is_ramping(&self) -> bool {
        self.is_ramping
    }

    /// Returns `true` while a declared-duration ramp is pacing the plate.
    #[must_use]
    pub fn in_controlled_ramp(&self) -> bool {
        if !self.is_ramping {
            return false;
        }
        let Some((_, ramp_duration, _, _)) = self.current_step_fields() else {
            return false;
        };
        ramp_duration > Duration::ZERO && self.previous_step_temp().is_some()
    }

    /// Signed Peltier drive computed this tick.
    #[must_use]
    pub const fn peltier_drive(&self) -> f32 {
        self.peltier_drive
    }

    /// Lid heater drive computed this tick.
    #[must_use]
    pub const fn lid_drive(&self) -> f32 {
        self.lid_drive
    }

    /// Actuator polarity applied this tick.
    #[must_use]
    pub const fn thermal_direction(&self) -> ThermalDirection {
        self.thermal_direction
    }

    fn display_cycle(&self) -> Option<&Cycle> {
        self.program
            .as_ref()
            .and_then(|program| self.pools.cycles().get(program.display_cycle()).ok())
    }
}
