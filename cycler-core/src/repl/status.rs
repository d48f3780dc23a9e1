//! Shared status surface for the host link.
//!
//! The serial layer polls [`StatusSnapshot::capture`] each time the host
//! asks, then renders the wire line through [`StatusFormatter`]. Keeping
//! the snapshot separate from the rendering lets front-ends reuse the same
//! fields for richer displays.

use core::fmt;

use crate::control::PidChannel;
use crate::controller::{ProgramState, Thermocycler, ThermalState};
use crate::program::{StepName, bounded_name};

/// Version string reported while the controller is idle.
pub const FIRMWARE_VERSION: &str = "0.1.0";

/// Progress fields present while a program is running or complete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressStatus {
    pub elapsed_secs: u64,
    pub remaining_secs: u64,
    pub num_cycles: u16,
    pub current_cycle: u16,
    pub step_name: StepName,
}

/// One status poll of the controller.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusSnapshot {
    /// Identifier of the last command the host sent.
    pub command_id: u32,
    pub program_state: ProgramState,
    pub thermal_state: ThermalState,
    pub lid_temp: f32,
    pub plate_temp: f32,
    pub contrast: u8,
    /// Present while the program state is executing.
    pub progress: Option<ProgressStatus>,
}

impl StatusSnapshot {
    /// Captures the controller's reporting surface.
    #[must_use]
    pub fn capture<P: PidChannel>(cycler: &Thermocycler<P>, command_id: u32) -> Self {
        let progress = cycler.program_state().is_executing().then(|| ProgressStatus {
            elapsed_secs: cycler.time_elapsed().as_secs(),
            remaining_secs: cycler.time_remaining().as_secs(),
            num_cycles: cycler.num_cycles(),
            current_cycle: cycler.current_cycle_num(),
            step_name: cycler
                .current_step()
                .and_then(|step| bounded_name(step.name()).ok())
                .unwrap_or_default(),
        });

        Self {
            command_id,
            program_state: cycler.program_state(),
            thermal_state: cycler.thermal_state(),
            lid_temp: cycler.lid_temp(),
            plate_temp: cycler.plate_temp(),
            contrast: cycler.contrast(),
            progress,
        }
    }
}

/// Renders a [`StatusSnapshot`] as the `key=value&…` wire line.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    snapshot: &'a StatusSnapshot,
}

impl<'a> StatusFormatter<'a> {
    /// Creates a formatter for the provided snapshot.
    #[must_use]
    pub const fn new(snapshot: &'a StatusSnapshot) -> Self {
        Self { snapshot }
    }

    /// Writes the status line.
    pub fn write_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let snapshot = self.snapshot;
        write!(writer, "d={}", snapshot.command_id)?;
        write!(writer, "&s={}", snapshot.program_state)?;
        write!(writer, "&l={}", snapshot.lid_temp as i32)?;
        write!(writer, "&b={:.1}", snapshot.plate_temp)?;
        write!(writer, "&t={}", snapshot.thermal_state)?;
        write!(writer, "&o={}", snapshot.contrast)?;

        if let Some(progress) = &snapshot.progress {
            write!(
                writer,
                "&e={}&r={}&u={}&c={}",
                progress.elapsed_secs,
                progress.remaining_secs,
                progress.num_cycles,
                progress.current_cycle
            )?;
            if !progress.step_name.is_empty() {
                write!(writer, "&p={}", progress.step_name)?;
            }
        } else {
            write!(writer, "&v={FIRMWARE_VERSION}")?;
        }

        Ok(())
    }
}
