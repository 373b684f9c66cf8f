#![no_std]

extern crate alloc;

// Shared real-time logic for the optogenetic laser rig.
//
// This crate stays portable across MCU firmware and host tooling by avoiding
// the Rust standard library. Hardware lines, the host serial link, and the
// tick counter are abstractions the other crates bind to real peripherals or
// to simulations.

pub mod calibration;
pub mod channel;
pub mod clock;
pub mod command;
pub mod debounce;
pub mod io;
pub mod rig;
pub mod telemetry;
pub mod trigger;
