#![no_std]

// Control engine for a Peltier-based PCR thermocycler.
//
// This crate stays portable across MCU firmware and host tooling by avoiding
// the Rust standard library: sensors, actuators, the display, and the PID
// arithmetic all sit behind traits, and every data structure is bounded.

pub mod control;
pub mod controller;
pub mod eta;
pub mod program;
pub mod repl;
pub mod time;
