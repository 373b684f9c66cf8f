//! Board-level identity shared by the runtime and diagnostics.
//!
//! Channel names double as the configuration keys the host addresses, so
//! they are fixed here rather than derived at runtime.

#![allow(dead_code)]

/// Primary channel names paired with their sync-mask companions.
pub const CHANNEL_PAIRS: [(&str, &str); 4] = [
    ("laser1", "laser1_mask"),
    ("laser2", "laser2_mask"),
    ("laser3", "laser3_mask"),
    ("laser4", "laser4_mask"),
];

/// Configuration key of the single trigger coordinator.
pub const TRIGGER_NAME: &str = "trigger1";

/// Channels armed by the coordinator out of reset.
pub const DEFAULT_TRIGGER_MEMBERS: [&str; 2] = ["laser1", "laser2"];

/// Scheduler period for the waveform loop.
pub const TICK_INTERVAL_MS: u64 = 1;

/// Host link baud rate, matching the instrument-side controller.
pub const UART_BAUD: u32 = 115_200;

/// Heap backing the configuration decoder and name bookkeeping.
pub const HEAP_SIZE: usize = 16 * 1024;
