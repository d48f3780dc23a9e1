use core::time::Duration;

use cycler_core::control::{ControlPolicy, PidChannel, PidMode, ThermalDirection, Tunings};
use cycler_core::controller::{CyclerIo, ProgramState, Thermocycler};
use cycler_core::eta::preprocess_program;
use cycler_core::program::{ProgramPools, ProgramSpec, SpecItem, StepSpec, build_program};
use cycler_core::repl::grammar::{HostCommand, parse_line};
use cycler_core::time::Instant;

#[derive(Clone, Debug, Default)]
struct ScriptedPid;

impl PidChannel for ScriptedPid {
    fn compute(&mut self, _input: f32, _setpoint: f32) -> f32 {
        0.0
    }

    fn set_tunings(&mut self, _tunings: Tunings) {}

    fn set_mode(&mut self, _mode: PidMode) {}

    fn set_output_limits(&mut self, _min: f32, _max: f32) {}

    fn reset_integral(&mut self) {}
}

#[derive(Clone, Debug, Default)]
struct BenchIo {
    lid_temp: f32,
    plate_temp: f32,
}

impl CyclerIo for BenchIo {
    fn read_lid_temp(&mut self) -> f32 {
        self.lid_temp
    }

    fn read_plate_temp(&mut self) -> f32 {
        self.plate_temp
    }

    fn set_peltier(&mut self, _direction: ThermalDirection, _magnitude: u16) {}

    fn set_lid_heater(&mut self, _duty: u8) {}

    fn display_clear(&mut self) {}

    fn display_set_contrast(&mut self, _contrast: u8) {}
}

fn step(name: &str, temp: f32, ramp_s: u64, hold_s: u64) -> SpecItem {
    SpecItem::Step(
        StepSpec::new(
            name,
            temp,
            Duration::from_secs(ramp_s),
            Duration::from_secs(hold_s),
        )
        .expect("valid step spec"),
    )
}

fn tick_at(
    cycler: &mut Thermocycler<ScriptedPid>,
    io: &mut BenchIo,
    t_ms: u64,
    lid: f32,
    plate: f32,
) {
    io.lid_temp = lid;
    io.plate_temp = plate;
    cycler.tick(Instant::from_millis(t_ms), io);
}

#[test]
fn preprocess_clamps_only_unachievable_ramps() {
    let mut pools = ProgramPools::new();
    let mut spec = ProgramSpec::new();
    spec.push(step("Denature", 95.0, 0, 30)).unwrap();
    // 40 degrees in 30 seconds beats the physical rate bound.
    spec.push(step("Crash", 55.0, 30, 30)).unwrap();
    // 17 degrees in 120 seconds is comfortably paced.
    spec.push(step("Climb", 72.0, 120, 30)).unwrap();

    let mut program = build_program(&mut pools, &spec).expect("valid program");
    preprocess_program(&mut pools, &mut program, 25.0).expect("live program");

    program.begin_iteration(&mut pools).expect("live root");
    let mut ramps = Vec::new();
    while let Some(handle) = program.next_step(&mut pools).expect("valid traversal") {
        let found = pools.steps().get(handle).expect("live handle");
        if found.is_final() {
            break;
        }
        ramps.push(found.ramp_duration());
    }
    assert_eq!(
        ramps,
        [
            Duration::ZERO,
            Duration::ZERO,
            Duration::from_secs(120)
        ]
    );
}

#[test]
fn controlled_ramp_interpolates_between_step_targets() {
    let mut cycler = Thermocycler::new(
        ScriptedPid,
        ScriptedPid,
        ControlPolicy::default(),
    );
    let mut io = BenchIo::default();

    tick_at(&mut cycler, &mut io, 0, 20.0, 25.0);
    tick_at(&mut cycler, &mut io, 4_000, 20.0, 25.0);

    let command = match parse_line("start Paced lid=110 (95,0,10,Heat)(55,60,10,Cool)")
        .expect("valid line")
    {
        HostCommand::Controller(command) => command,
        HostCommand::Status => panic!("expected a controller command"),
    };
    cycler.process_command(command, &mut io).expect("accepted");

    tick_at(&mut cycler, &mut io, 5_000, 110.0, 25.0);
    assert_eq!(cycler.program_state(), ProgramState::Running);

    // Arrive at the first step and let its hold elapse.
    tick_at(&mut cycler, &mut io, 6_000, 110.0, 95.0);
    tick_at(&mut cycler, &mut io, 16_100, 110.0, 95.0);
    assert_eq!(cycler.current_step().map(|s| s.name()), Some("Cool"));
    assert!(cycler.in_controlled_ramp());

    // Ramp entry: the setpoint starts at the previous target.
    assert!((cycler.plate_target() - 95.0).abs() < 1e-3);

    // Halfway through the declared 60 s ramp.
    tick_at(&mut cycler, &mut io, 46_100, 110.0, 95.0);
    assert!((cycler.plate_target() - 75.0).abs() < 1e-3);

    // Three quarters through.
    tick_at(&mut cycler, &mut io, 61_100, 110.0, 95.0);
    assert!((cycler.plate_target() - 65.0).abs() < 1e-3);

    // At the declared duration the setpoint reaches the step target.
    tick_at(&mut cycler, &mut io, 76_100, 110.0, 95.0);
    assert!((cycler.plate_target() - 55.0).abs() < 1e-3);

    // Arrival ends the ramp; the setpoint pins to the step target.
    tick_at(&mut cycler, &mut io, 76_200, 110.0, 55.0);
    assert!(!cycler.in_controlled_ramp());
    assert!((cycler.plate_target() - 55.0).abs() < 1e-3);
}

#[test]
fn eta_uses_empirical_rate_after_cooling() {
    let mut cycler = Thermocycler::new(
        ScriptedPid,
        ScriptedPid,
        ControlPolicy::default(),
    );
    let mut io = BenchIo::default();

    tick_at(&mut cycler, &mut io, 0, 20.0, 25.0);
    tick_at(&mut cycler, &mut io, 4_000, 20.0, 25.0);

    let command = match parse_line("start Cooldown lid=110 (95,0,5,Hot)(55,0,5,Cold)(95,0,5,HotAgain)")
        .expect("valid line")
    {
        HostCommand::Controller(command) => command,
        HostCommand::Status => panic!("expected a controller command"),
    };
    cycler.process_command(command, &mut io).expect("accepted");

    tick_at(&mut cycler, &mut io, 5_000, 110.0, 25.0);

    // Fast ramp up: 70 degrees in 10 s.
    tick_at(&mut cycler, &mut io, 15_000, 110.0, 95.0);
    tick_at(&mut cycler, &mut io, 20_100, 110.0, 95.0);

    // Fast ramp down: 40 degrees in 20 s. This is the first real cooling,
    // which arms the empirical seconds-per-degree rate.
    tick_at(&mut cycler, &mut io, 40_100, 110.0, 55.0);
    let remaining_cooled = cycler.time_remaining();
    assert!(remaining_cooled > Duration::ZERO);

    // Once cooled, the estimate uses observed time over observed degrees
    // rather than the 1 s/degree default; the remaining hot ramp (40
    // degrees at ~0.27 s/degree) plus the last hold lands well under the
    // default-rate projection.
    let elapsed = Duration::from_millis(40_100 - 5_000);
    let default_rate_projection = Duration::from_secs(15)
        + Duration::from_secs_f32(69.8 + 39.8 + 39.8)
        .saturating_sub(elapsed);
    assert!(remaining_cooled < default_rate_projection);
}
