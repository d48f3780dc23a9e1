//! Interactive emulator session: the control engine wired to the simulated
//! plant under a simulated clock, with a transcript of every exchange.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crossterm::style::Stylize;

use cycler_core::control::ControlPolicy;
use cycler_core::controller::{ProgramState, Thermocycler};
use cycler_core::repl::grammar::{HostCommand, parse_line};
use cycler_core::repl::status::{StatusFormatter, StatusSnapshot};
use cycler_core::time::Instant;

use crate::pid::SimplePid;
use crate::plant::ThermalPlant;

/// Simulated control-loop period.
pub const TICK_INTERVAL_MS: u64 = 100;

/// Ambient temperature the plant starts from.
pub const AMBIENT_TEMP: f32 = 25.0;

/// Cap on the simulated span of a single `run` command.
const MAX_RUN_SECS: u64 = 24 * 60 * 60;

pub const HELP_LINES: &[&str] = &[
    "start <name> lid=<temp> <component>...  - install and start a program",
    "  component: (temp,ramp_s,hold_s[,name]) or (<count> x <component>...)",
    "stop                                    - stop and clear the program",
    "status                                  - one-line controller status",
    "config contrast=<0-255>                 - set display contrast",
    "tick [n]                                - advance n control ticks (100 ms each)",
    "run <secs>                              - advance whole simulated seconds",
    "exit | quit                             - leave the session",
];

enum TranscriptRole {
    Host,
    Emulator,
}

struct TranscriptLogger {
    writer: BufWriter<File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "Thermocycler emulator transcript")?;
        writer.flush()?;
        Ok(Self { writer })
    }

    fn append_line(&mut self, at_ms: u64, role: &TranscriptRole, text: &str) -> io::Result<()> {
        let marker = match role {
            TranscriptRole::Host => "host>",
            TranscriptRole::Emulator => "emu <",
        };
        let secs = at_ms as f64 / 1_000.0;
        writeln!(self.writer, "[+{secs:9.3}s] {marker} {text}")?;
        self.writer.flush()
    }
}

/// One emulator session: controller, plant, clock, and transcript.
pub struct Session {
    cycler: Thermocycler<SimplePid>,
    plant: ThermalPlant,
    clock_ms: u64,
    command_count: u32,
    transcript: Option<TranscriptLogger>,
}

impl Session {
    /// Creates a session logging to `log_path`.
    pub fn new(log_path: &Path) -> io::Result<Self> {
        let mut session = Self::bare();
        session.transcript = Some(TranscriptLogger::new(log_path)?);
        Ok(session)
    }

    /// Creates a session with no transcript, for embedding and tests.
    pub fn bare() -> Self {
        let sample_secs = TICK_INTERVAL_MS as f32 / 1_000.0;
        Self {
            cycler: Thermocycler::new(
                SimplePid::new(sample_secs),
                SimplePid::new(sample_secs),
                ControlPolicy::default(),
            ),
            plant: ThermalPlant::new(AMBIENT_TEMP),
            clock_ms: 0,
            command_count: 0,
            transcript: None,
        }
    }

    /// The wrapped controller.
    pub fn cycler(&self) -> &Thermocycler<SimplePid> {
        &self.cycler
    }

    /// The simulated plant.
    pub fn plant(&self) -> &ThermalPlant {
        &self.plant
    }

    /// Simulated time since the session began.
    pub fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    /// Advances the simulation one control tick.
    pub fn tick(&mut self) {
        self.cycler
            .tick(Instant::from_millis(self.clock_ms), &mut self.plant);
        self.plant.step(TICK_INTERVAL_MS as f32 / 1_000.0);
        self.clock_ms += TICK_INTERVAL_MS;
    }

    /// Advances `count` ticks, reporting state transitions as they happen.
    pub fn run_ticks(&mut self, count: u64) -> Vec<String> {
        let mut lines = Vec::new();
        for _ in 0..count {
            let before = self.cycler.program_state();
            self.tick();
            let after = self.cycler.program_state();
            if before != after {
                lines.push(self.transition_line(before, after));
            }
        }
        lines.push(self.summary_line());
        lines
    }

    /// Handles one host input line, returning the response lines.
    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        self.log(&TranscriptRole::Host, trimmed)?;
        let responses = self.dispatch(trimmed);
        for response in &responses {
            self.log(&TranscriptRole::Emulator, response)?;
        }
        Ok(responses)
    }

    fn dispatch(&mut self, trimmed: &str) -> Vec<String> {
        if trimmed.eq_ignore_ascii_case("help") {
            return HELP_LINES.iter().map(|&s| s.to_string()).collect();
        }

        if let Some(response) = self.handle_simulation_command(trimmed) {
            return response;
        }

        match parse_line(trimmed) {
            Ok(HostCommand::Status) => {
                let snapshot = StatusSnapshot::capture(&self.cycler, self.command_count);
                let mut status = String::new();
                if StatusFormatter::new(&snapshot)
                    .write_line(&mut status)
                    .is_err()
                {
                    status = "ERR status render".to_string();
                }
                vec![status]
            }
            Ok(HostCommand::Controller(command)) => {
                self.command_count += 1;
                match self.cycler.process_command(command, &mut self.plant) {
                    Ok(()) => vec![format!(
                        "OK d={} state={}",
                        self.command_count,
                        self.cycler.program_state()
                    )],
                    Err(err) => vec![format!("ERR command {err}")],
                }
            }
            Err(err) => vec![format!("ERR syntax {err}")],
        }
    }

    fn handle_simulation_command(&mut self, trimmed: &str) -> Option<Vec<String>> {
        let mut words = trimmed.split_whitespace();
        let keyword = words.next()?;

        if keyword.eq_ignore_ascii_case("tick") {
            let count = match words.next() {
                None => 1,
                Some(raw) => match raw.parse::<u64>() {
                    Ok(count) if count > 0 => count,
                    _ => return Some(vec!["ERR tick expects a positive count".to_string()]),
                },
            };
            if words.next().is_some() {
                return Some(vec!["ERR tick takes at most one argument".to_string()]);
            }
            return Some(self.run_ticks(count));
        }

        if keyword.eq_ignore_ascii_case("run") {
            let Some(raw) = words.next() else {
                return Some(vec!["ERR run expects a duration in seconds".to_string()]);
            };
            let secs = match raw.trim_end_matches('s').parse::<u64>() {
                Ok(secs) if secs > 0 && secs <= MAX_RUN_SECS => secs,
                _ => {
                    return Some(vec![
                        "ERR run expects seconds between 1 and 86400".to_string(),
                    ]);
                }
            };
            if words.next().is_some() {
                return Some(vec!["ERR run takes exactly one argument".to_string()]);
            }
            return Some(self.run_ticks(secs * 1_000 / TICK_INTERVAL_MS));
        }

        None
    }

    fn log(&mut self, role: &TranscriptRole, text: &str) -> io::Result<()> {
        match self.transcript.as_mut() {
            Some(transcript) => transcript.append_line(self.clock_ms, role, text),
            None => Ok(()),
        }
    }

    fn transition_line(&self, from: ProgramState, to: ProgramState) -> String {
        let secs = self.clock_ms as f64 / 1_000.0;
        let text = format!("[+{secs:9.3}s] state {from} -> {to}");
        if to == ProgramState::Error {
            format!("{}", text.red())
        } else {
            format!("{}", text.green())
        }
    }

    fn summary_line(&self) -> String {
        let secs = self.clock_ms as f64 / 1_000.0;
        format!(
            "t=+{secs:.1}s state={} plate={:.1} lid={:.1} step={} cycle={}/{} eta={}s",
            self.cycler.program_state(),
            self.cycler.plate_temp(),
            self.cycler.lid_temp(),
            self.cycler.current_step().map_or("-", |step| {
                if step.is_final() {
                    "<final>"
                } else {
                    step.name()
                }
            }),
            self.cycler.current_cycle_num(),
            self.cycler.num_cycles(),
            self.cycler.time_remaining().as_secs(),
        )
    }
}
